//! `play` subcommand: build a playlist (C16) from a root directory or a
//! saved template (C9/C15) and run it through the full playback chain
//! (C2-C6, C17) against the default audio device.

use crate::library::LibraryStore;
use crate::model::ContentHash;
use crate::player::audio::AudioOutput;
use crate::player::playlist::{Playlist, PlaylistItem};
use crate::player::{Player, SongResolver, bridge_audio_events};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

struct StoreResolver(Arc<LibraryStore>);

impl SongResolver for StoreResolver {
    fn resolve_path(&self, hash: &ContentHash) -> Option<PathBuf> {
        self.0.song_from_hash(*hash).first().map(|song| PathBuf::from(&song.file_name))
    }

    fn song_length(&self, hash: &ContentHash) -> Option<f64> {
        self.0.shared_data(*hash).and_then(|shared| shared.length.value().copied())
    }
}

pub fn run(rt: &Runtime, root: &Path, template: Option<&str>) -> anyhow::Result<()> {
    let config = crate::config::load();
    let store = rt.block_on(async { super::open_store(&config).await })?;
    let store = Arc::new(store);

    let mut playlist = Playlist::new();
    if let Some(name) = template {
        let row = store
            .templates()
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| anyhow::anyhow!("no such template: {name}"))?;
        let picks = store.pick_songs_for_template(row);
        if picks.is_empty() {
            anyhow::bail!("template '{name}' produced no picks (no filter matched any song)");
        }
        playlist.add_from_template(&picks, None);
    } else {
        for song in store.songs() {
            let Some(hash) = song.hash else { continue };
            if Path::new(&song.file_name).starts_with(root) {
                playlist.append(PlaylistItem::new(hash, None, None));
            }
        }
        if playlist.items().is_empty() {
            anyhow::bail!("no catalogued songs found under {}", root.display());
        }
    }

    let track_count = playlist.items().len();
    println!("playing {track_count} track(s)");

    let (audio_tx, audio_rx) = crossbeam_channel::unbounded();
    let audio = Arc::new(AudioOutput::new(audio_tx)?);
    let resolver: Arc<dyn SongResolver> = Arc::new(StoreResolver(Arc::clone(&store)));
    let (player, signal_rx) = Player::new(audio, resolver);
    bridge_audio_events(Arc::clone(&player), audio_rx);

    *player.playlist() = playlist;
    player.playlist().set_current(Some(0));
    player.start_pause_playback();

    let mut started = 0usize;
    let mut last_length = Duration::ZERO;
    while started < track_count {
        match signal_rx.recv_timeout(Duration::from_secs(3600)) {
            Ok(crate::player::PlayerSignal::StartedPlayback(item)) => {
                started += 1;
                println!("[{started}/{track_count}] {}", item.song_hash.to_hex());
                last_length = store
                    .shared_data(item.song_hash)
                    .and_then(|shared| shared.length.value().copied())
                    .map(Duration::from_secs_f64)
                    .unwrap_or(Duration::ZERO);
            }
            Ok(crate::player::PlayerSignal::InvalidTrack(item)) => {
                started += 1;
                println!("[{started}/{track_count}] skipped (could not open): {}", item.song_hash.to_hex());
                last_length = Duration::ZERO;
            }
            Ok(_) => {}
            Err(_) => return Ok(()),
        }
    }
    // The playlist-advance signals fire on track *start*; wait out the
    // final track's own length before returning so the process does not
    // exit mid-playback.
    std::thread::sleep(last_length);
    Ok(())
}
