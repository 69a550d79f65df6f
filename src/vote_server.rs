//! Vote server (C18): an embedded HTTP server exposing the recently-started
//! playlist and accepting audience votes.
//!
//! Grounded on the original `LocalVoteServer.cpp`'s four routes, reworked
//! onto `axum`/`tower` instead of hand-rolled socket parsing: the framework
//! already owns request-line/header parsing and chunked-vs-identity
//! transfer encoding, so this module only needs to own form-body parsing
//! (`multipart/form-data` and `application/x-www-form-urlencoded`) and the
//! in-process playback history.

use crate::db::VoteKind;
use crate::library::LibraryStore;
use crate::model::{ContentHash, PrimaryView, Tag};
use crate::player::PlayerSignal;
use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, body::Bytes};
use crossbeam_channel::Receiver;
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Mutex as AsyncMutex;

const INDEX_HTML: &str = include_str!("../webstatic/index.html");
const STYLE_CSS: &str = include_str!("../webstatic/style.css");
const VOTE_JS: &str = include_str!("../webstatic/vote.js");

/// Upper bound on remembered playback-history entries (§9's open question:
/// the original's history grows without bound for the life of the process).
/// Older entries are dropped from the front; `History::base` keeps the
/// playlist-start header's indices meaningful across that drop.
const HISTORY_CAP: usize = 2000;

#[derive(Clone, Serialize)]
pub struct PlaylistEntry {
    hash: String,
    author: String,
    title: String,
    #[serde(rename = "fileName")]
    file_name: String,
    genre: String,
    mpm: f64,
    index: usize,
    #[serde(rename = "ratingRC")]
    rating_rc: f64,
    #[serde(rename = "ratingGT")]
    rating_gt: f64,
    #[serde(rename = "ratingPop")]
    rating_pop: f64,
}

#[derive(Default)]
struct History {
    base: usize,
    entries: Vec<PlaylistEntry>,
}

impl History {
    fn push(&mut self, mut entry: PlaylistEntry) {
        entry.index = self.base + self.entries.len();
        self.entries.push(entry);
        if self.entries.len() > HISTORY_CAP {
            let drop_n = self.entries.len() - HISTORY_CAP;
            self.entries.drain(0..drop_n);
            self.base += drop_n;
        }
    }

    fn slice_from(&self, start: usize) -> &[PlaylistEntry] {
        let offset = start.saturating_sub(self.base).min(self.entries.len());
        &self.entries[offset..]
    }
}

struct AppState {
    library: Arc<AsyncMutex<LibraryStore>>,
    history: AsyncMutex<History>,
}

/// Build the server's router and start the background history recorder
/// that subscribes to the player's `StartedPlayback` signal. `GET
/// /static/<path>` serves the small fixed set of page assets bundled into
/// the binary (`style.css`, `vote.js`) rather than anything off disk.
///
/// The recorder runs on its own thread since `PlayerSignal` arrives over a
/// `crossbeam_channel`, not an async channel; `runtime` lets it hop back
/// onto the tokio executor to await the library lock.
pub fn router(
    library: Arc<AsyncMutex<LibraryStore>>,
    signals: Receiver<PlayerSignal>,
    runtime: Handle,
) -> Router {
    let state = Arc::new(AppState {
        library,
        history: AsyncMutex::new(History::default()),
    });

    spawn_history_recorder(Arc::clone(&state), signals, runtime);

    Router::new()
        .route("/", get(index))
        .route("/static/{*path}", get(static_file))
        .route("/api/playlist", get(playlist))
        .route("/api/vote", post(vote))
        .with_state(state)
}

fn spawn_history_recorder(state: Arc<AppState>, signals: Receiver<PlayerSignal>, runtime: Handle) {
    std::thread::spawn(move || {
        while let Ok(signal) = signals.recv() {
            let PlayerSignal::StartedPlayback(item) = signal else {
                continue;
            };
            let state = Arc::clone(&state);
            runtime.spawn(async move {
                let entry = {
                    let lib = state.library.lock().await;
                    build_entry(&lib, item.song_hash)
                };
                if let Some(entry) = entry {
                    state.history.lock().await.push(entry);
                }
            });
        }
    });
}

fn build_entry(library: &LibraryStore, hash: ContentHash) -> Option<PlaylistEntry> {
    let song = library.song_from_hash(hash).into_iter().next()?;
    let shared = library.shared_data(hash);
    let default_tag = Tag::default();
    let manual = shared.map(|s| &s.tag_manual).unwrap_or(&default_tag);
    let view = PrimaryView {
        manual,
        id3: &song.tag_id3,
        file_name: &song.tag_file_name,
    };
    Some(PlaylistEntry {
        hash: hash.to_hex(),
        author: view.author().unwrap_or_default().to_string(),
        title: view.title().unwrap_or_default().to_string(),
        file_name: song.file_name.clone(),
        genre: view.genre().unwrap_or_default().to_string(),
        mpm: view.mpm().unwrap_or(0.0),
        index: 0,
        rating_rc: shared
            .and_then(|s| s.rating.rhythm_clarity.value().copied())
            .unwrap_or(0.0),
        rating_gt: shared
            .and_then(|s| s.rating.genre_typicality.value().copied())
            .unwrap_or(0.0),
        rating_pop: shared
            .and_then(|s| s.rating.popularity.value().copied())
            .unwrap_or(0.0),
    })
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn static_file(AxumPath(path): AxumPath<String>) -> Response {
    match path.as_str() {
        "style.css" => ([(header::CONTENT_TYPE, "text/css")], STYLE_CSS).into_response(),
        "vote.js" => (
            [(header::CONTENT_TYPE, "application/javascript")],
            VOTE_JS,
        )
            .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn playlist(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let start = headers
        .get("x-skautan-playlist-start")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let history = state.history.lock().await;
    Json(history.slice_from(start).to_vec()).into_response()
}

struct VoteFields {
    song_hash: String,
    vote_type: String,
    vote_value: i64,
}

async fn vote(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let Some(fields) = parse_vote_fields(content_type, &body) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if fields.song_hash.len() != 40 {
        return StatusCode::NOT_FOUND.into_response();
    }
    let Some(hash) = ContentHash::from_hex(&fields.song_hash) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(kind) = vote_kind_from_str(&fields.vote_type) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut library = state.library.lock().await;
    match library.add_vote(hash, kind, fields.vote_value).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            tracing::warn!("vote rejected: {e}");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

fn vote_kind_from_str(s: &str) -> Option<VoteKind> {
    match s {
        "rhythmClarity" => Some(VoteKind::RhythmClarity),
        "genreTypicality" => Some(VoteKind::GenreTypicality),
        "popularity" => Some(VoteKind::Popularity),
        _ => None,
    }
}

fn parse_vote_fields(content_type: &str, body: &[u8]) -> Option<VoteFields> {
    if content_type.starts_with("multipart/form-data") {
        let boundary = content_type.split("boundary=").nth(1)?.trim_matches('"');
        parse_multipart(body, boundary)
    } else {
        parse_urlencoded(body)
    }
}

fn parse_urlencoded(body: &[u8]) -> Option<VoteFields> {
    let text = std::str::from_utf8(body).ok()?;
    let mut song_hash = None;
    let mut vote_type = None;
    let mut vote_value = None;
    for pair in text.split('&').filter(|p| !p.is_empty()) {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        let value = parts.next().unwrap_or("");
        let decoded = urlencoding::decode(value).ok()?.into_owned();
        match key {
            "songHash" => song_hash = Some(decoded),
            "voteType" => vote_type = Some(decoded),
            "voteValue" => vote_value = decoded.parse::<i64>().ok(),
            _ => {}
        }
    }
    Some(VoteFields {
        song_hash: song_hash?,
        vote_type: vote_type?,
        vote_value: vote_value?,
    })
}

fn parse_multipart(body: &[u8], boundary: &str) -> Option<VoteFields> {
    let text = String::from_utf8_lossy(body);
    let delimiter = format!("--{boundary}");
    let mut song_hash = None;
    let mut vote_type = None;
    let mut vote_value = None;
    for part in text.split(&delimiter) {
        let part = part.trim_matches(|c| c == '\r' || c == '\n');
        if part.is_empty() || part == "--" {
            continue;
        }
        let Some((part_headers, value)) = part.split_once("\r\n\r\n") else {
            continue;
        };
        let Some(name) = part_headers
            .split("name=\"")
            .nth(1)
            .and_then(|s| s.split('"').next())
        else {
            continue;
        };
        let value = value.trim_end_matches("\r\n");
        match name {
            "songHash" => song_hash = Some(value.to_string()),
            "voteType" => vote_type = Some(value.to_string()),
            "voteValue" => vote_value = value.parse::<i64>().ok(),
            _ => {}
        }
    }
    Some(VoteFields {
        song_hash: song_hash?,
        vote_type: vote_type?,
        vote_value: vote_value?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencoded_vote_fields_parse() {
        let body = b"songHash=aabbccddeeff00112233445566778899aabbccdd&voteType=popularity&voteValue=4";
        let fields = parse_urlencoded(body).unwrap();
        assert_eq!(fields.song_hash.len(), 40);
        assert_eq!(fields.vote_type, "popularity");
        assert_eq!(fields.vote_value, 4);
    }

    #[test]
    fn multipart_vote_fields_parse() {
        let boundary = "X-BOUNDARY";
        let body = format!(
            "--{boundary}\r\ncontent-disposition: form-data; name=\"songHash\"\r\n\r\n{}\r\n--{boundary}\r\ncontent-disposition: form-data; name=\"voteType\"\r\n\r\nrhythmClarity\r\n--{boundary}\r\ncontent-disposition: form-data; name=\"voteValue\"\r\n\r\n2\r\n--{boundary}--\r\n",
            "a".repeat(40),
        );
        let fields = parse_multipart(body.as_bytes(), boundary).unwrap();
        assert_eq!(fields.song_hash, "a".repeat(40));
        assert_eq!(fields.vote_type, "rhythmClarity");
        assert_eq!(fields.vote_value, 2);
    }

    #[test]
    fn vote_kind_rejects_unknown_type() {
        assert!(vote_kind_from_str("bogus").is_none());
        assert!(vote_kind_from_str("popularity").is_some());
    }

    #[test]
    fn history_window_respects_base_after_capping() {
        let mut history = History::default();
        for i in 0..(HISTORY_CAP + 10) {
            history.push(PlaylistEntry {
                hash: format!("{i:040x}"),
                author: String::new(),
                title: String::new(),
                file_name: String::new(),
                genre: String::new(),
                mpm: 0.0,
                index: 0,
                rating_rc: 0.0,
                rating_gt: 0.0,
                rating_pop: 0.0,
            });
        }
        assert_eq!(history.entries.len(), HISTORY_CAP);
        assert_eq!(history.base, 10);
        assert_eq!(history.slice_from(0).len(), HISTORY_CAP);
        assert_eq!(history.slice_from(15).len(), HISTORY_CAP - 5);
    }
}
