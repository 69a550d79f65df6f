//! Library store: SQLite-backed persistence for songs, filters, templates,
//! playback history and votes (C10).
//!
//! Every dated field round-trips through a `(value, timestamp)` column pair
//! so that [`crate::model::DatedOptional::update_if_newer`] can be applied
//! symmetrically whether the newer data came from a rescan or from another
//! machine's export.

use crate::filter::Filter;
use crate::model::{ContentHash, DatedOptional, Rating, Rgb, Song, SongSharedData, Tag};
use chrono::{DateTime, Utc};
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite};

pub const DEFAULT_DB_NAME: &str = "skautan.db";

pub fn db_url(path: Option<&std::path::Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{DEFAULT_DB_NAME}"),
    }
}

pub async fn init_db(db_url: &str) -> Result<SqlitePool, sqlx::Error> {
    if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
        Sqlite::create_database(db_url).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

fn dated_string(d: &DatedOptional<String>) -> (Option<String>, Option<String>) {
    match d {
        DatedOptional::Present { value, timestamp } => {
            (Some(value.clone()), Some(timestamp.to_rfc3339()))
        }
        DatedOptional::Absent => (None, None),
    }
}

fn dated_f64(d: &DatedOptional<f64>) -> (Option<f64>, Option<String>) {
    match d {
        DatedOptional::Present { value, timestamp } => (Some(*value), Some(timestamp.to_rfc3339())),
        DatedOptional::Absent => (None, None),
    }
}

fn to_dated_string(value: Option<String>, ts: Option<String>) -> DatedOptional<String> {
    match (value, ts.and_then(|t| DateTime::parse_from_rfc3339(&t).ok())) {
        (Some(v), Some(ts)) => DatedOptional::dated(v, ts.with_timezone(&Utc)),
        _ => DatedOptional::Absent,
    }
}

fn to_dated_f64(value: Option<f64>, ts: Option<String>) -> DatedOptional<f64> {
    match (value, ts.and_then(|t| DateTime::parse_from_rfc3339(&t).ok())) {
        (Some(v), Some(ts)) => DatedOptional::dated(v, ts.with_timezone(&Utc)),
        _ => DatedOptional::Absent,
    }
}

fn tag_from_row(row: &sqlx::sqlite::SqliteRow, prefix: &str) -> Tag {
    Tag {
        author: to_dated_string(
            row.get(format!("{prefix}_author").as_str()),
            row.get(format!("{prefix}_author_ts").as_str()),
        ),
        title: to_dated_string(
            row.get(format!("{prefix}_title").as_str()),
            row.get(format!("{prefix}_title_ts").as_str()),
        ),
        genre: to_dated_string(
            row.get(format!("{prefix}_genre").as_str()),
            row.get(format!("{prefix}_genre_ts").as_str()),
        ),
        measures_per_minute: to_dated_f64(
            row.get(format!("{prefix}_mpm").as_str()),
            row.get(format!("{prefix}_mpm_ts").as_str()),
        ),
    }
}

fn song_from_row(row: &sqlx::sqlite::SqliteRow) -> Song {
    let file_size: i64 = row.get("file_size");
    let hash: Option<String> = row.get("hash");
    let last_tag_rescanned: Option<String> = row.get("last_tag_rescanned");
    let num_tag_rescan_attempts: i64 = row.get("num_tag_rescan_attempts");
    Song {
        file_name: row.get("path"),
        file_size: file_size as u64,
        hash: hash.and_then(|h| ContentHash::from_hex(&h)),
        tag_file_name: tag_from_row(row, "tag_filename"),
        tag_id3: tag_from_row(row, "tag_id3"),
        last_tag_rescanned: match last_tag_rescanned.and_then(|t| DateTime::parse_from_rfc3339(&t).ok()) {
            Some(ts) => DatedOptional::dated(ts.with_timezone(&Utc), ts.with_timezone(&Utc)),
            None => DatedOptional::Absent,
        },
        num_tag_rescan_attempts: num_tag_rescan_attempts as u32,
    }
}

/// Insert or fully overwrite the file-level record for `song.file_name`.
pub async fn upsert_song_file(pool: &SqlitePool, song: &Song) -> sqlx::Result<()> {
    let (id3_author, id3_author_ts) = dated_string(&song.tag_id3.author);
    let (id3_title, id3_title_ts) = dated_string(&song.tag_id3.title);
    let (id3_genre, id3_genre_ts) = dated_string(&song.tag_id3.genre);
    let (id3_mpm, id3_mpm_ts) = dated_f64(&song.tag_id3.measures_per_minute);
    let (fn_author, fn_author_ts) = dated_string(&song.tag_file_name.author);
    let (fn_title, fn_title_ts) = dated_string(&song.tag_file_name.title);
    let (fn_genre, fn_genre_ts) = dated_string(&song.tag_file_name.genre);
    let (fn_mpm, fn_mpm_ts) = dated_f64(&song.tag_file_name.measures_per_minute);
    let last_tag_rescanned = song.last_tag_rescanned.value().map(|ts| ts.to_rfc3339());

    sqlx::query(
        r#"
        INSERT INTO song_files (
            path, file_size, hash,
            tag_id3_author, tag_id3_author_ts, tag_id3_title, tag_id3_title_ts,
            tag_id3_genre, tag_id3_genre_ts, tag_id3_mpm, tag_id3_mpm_ts,
            tag_filename_author, tag_filename_author_ts, tag_filename_title, tag_filename_title_ts,
            tag_filename_genre, tag_filename_genre_ts, tag_filename_mpm, tag_filename_mpm_ts,
            last_tag_rescanned, num_tag_rescan_attempts
        ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
        ON CONFLICT(path) DO UPDATE SET
            file_size = excluded.file_size,
            hash = excluded.hash,
            tag_id3_author = excluded.tag_id3_author, tag_id3_author_ts = excluded.tag_id3_author_ts,
            tag_id3_title = excluded.tag_id3_title, tag_id3_title_ts = excluded.tag_id3_title_ts,
            tag_id3_genre = excluded.tag_id3_genre, tag_id3_genre_ts = excluded.tag_id3_genre_ts,
            tag_id3_mpm = excluded.tag_id3_mpm, tag_id3_mpm_ts = excluded.tag_id3_mpm_ts,
            tag_filename_author = excluded.tag_filename_author, tag_filename_author_ts = excluded.tag_filename_author_ts,
            tag_filename_title = excluded.tag_filename_title, tag_filename_title_ts = excluded.tag_filename_title_ts,
            tag_filename_genre = excluded.tag_filename_genre, tag_filename_genre_ts = excluded.tag_filename_genre_ts,
            tag_filename_mpm = excluded.tag_filename_mpm, tag_filename_mpm_ts = excluded.tag_filename_mpm_ts,
            last_tag_rescanned = excluded.last_tag_rescanned,
            num_tag_rescan_attempts = excluded.num_tag_rescan_attempts
        "#,
    )
    .bind(&song.file_name)
    .bind(song.file_size as i64)
    .bind(song.hash.map(|h| h.to_hex()))
    .bind(id3_author)
    .bind(id3_author_ts)
    .bind(id3_title)
    .bind(id3_title_ts)
    .bind(id3_genre)
    .bind(id3_genre_ts)
    .bind(id3_mpm)
    .bind(id3_mpm_ts)
    .bind(fn_author)
    .bind(fn_author_ts)
    .bind(fn_title)
    .bind(fn_title_ts)
    .bind(fn_genre)
    .bind(fn_genre_ts)
    .bind(fn_mpm)
    .bind(fn_mpm_ts)
    .bind(last_tag_rescanned)
    .bind(song.num_tag_rescan_attempts as i64)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_song_file(pool: &SqlitePool, path: &str) -> sqlx::Result<Option<Song>> {
    let row = sqlx::query("SELECT * FROM song_files WHERE path = ?")
        .bind(path)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(song_from_row))
}

pub async fn get_all_song_files(pool: &SqlitePool) -> sqlx::Result<Vec<Song>> {
    let rows = sqlx::query("SELECT * FROM song_files").fetch_all(pool).await?;
    Ok(rows.iter().map(song_from_row).collect())
}

/// Delete a song file's record and record it in `removed_songs` so a future
/// scan can tell "never seen" apart from "seen and since removed".
pub async fn remove_song_file(pool: &SqlitePool, path: &str) -> sqlx::Result<bool> {
    let mut tx = pool.begin().await?;
    let result = sqlx::query("DELETE FROM song_files WHERE path = ?")
        .bind(path)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "INSERT INTO removed_songs (path, removed_at) VALUES (?, ?)
         ON CONFLICT(path) DO UPDATE SET removed_at = excluded.removed_at",
    )
    .bind(path)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

fn shared_from_row(row: &sqlx::sqlite::SqliteRow) -> SongSharedData {
    let hash: String = row.get("hash");
    let last_played: Option<String> = row.get("last_played");
    let bg_r: Option<i64> = row.get("bg_color_r");
    let bg_g: Option<i64> = row.get("bg_color_g");
    let bg_b: Option<i64> = row.get("bg_color_b");
    let bg_ts: Option<String> = row.get("bg_color_ts");

    SongSharedData {
        hash: ContentHash::from_hex(&hash).expect("stored hash must be valid hex"),
        length: to_dated_f64(row.get("length"), row.get("length_ts")),
        last_played: match last_played.and_then(|t| DateTime::parse_from_rfc3339(&t).ok()) {
            Some(ts) => DatedOptional::dated(ts.with_timezone(&Utc), ts.with_timezone(&Utc)),
            None => DatedOptional::Absent,
        },
        rating: Rating {
            local: to_dated_f64(row.get("rating_local"), row.get("rating_local_ts")),
            rhythm_clarity: to_dated_f64(
                row.get("rating_rhythm_clarity"),
                row.get("rating_rhythm_clarity_ts"),
            ),
            genre_typicality: to_dated_f64(
                row.get("rating_genre_typicality"),
                row.get("rating_genre_typicality_ts"),
            ),
            popularity: to_dated_f64(row.get("rating_popularity"), row.get("rating_popularity_ts")),
        },
        tag_manual: tag_from_row(row, "tag_manual"),
        skip_start: to_dated_f64(row.get("skip_start"), row.get("skip_start_ts")),
        notes: to_dated_string(row.get("notes"), row.get("notes_ts")),
        bg_color: match (bg_r, bg_g, bg_b, bg_ts.and_then(|t| DateTime::parse_from_rfc3339(&t).ok())) {
            (Some(r), Some(g), Some(b), Some(ts)) => DatedOptional::dated(
                Rgb {
                    r: r as u8,
                    g: g as u8,
                    b: b as u8,
                },
                ts.with_timezone(&Utc),
            ),
            _ => DatedOptional::Absent,
        },
        detected_tempo: to_dated_f64(row.get("detected_tempo"), row.get("detected_tempo_ts")),
        duplicates: Default::default(),
    }
}

pub async fn upsert_song_shared_data(pool: &SqlitePool, shared: &SongSharedData) -> sqlx::Result<()> {
    let (len, len_ts) = dated_f64(&shared.length);
    let last_played = shared.last_played.value().map(|ts| ts.to_rfc3339());
    let (local, local_ts) = dated_f64(&shared.rating.local);
    let (rc, rc_ts) = dated_f64(&shared.rating.rhythm_clarity);
    let (gt, gt_ts) = dated_f64(&shared.rating.genre_typicality);
    let (pop, pop_ts) = dated_f64(&shared.rating.popularity);
    let (manual_author, manual_author_ts) = dated_string(&shared.tag_manual.author);
    let (manual_title, manual_title_ts) = dated_string(&shared.tag_manual.title);
    let (manual_genre, manual_genre_ts) = dated_string(&shared.tag_manual.genre);
    let (manual_mpm, manual_mpm_ts) = dated_f64(&shared.tag_manual.measures_per_minute);
    let (skip_start, skip_start_ts) = dated_f64(&shared.skip_start);
    let (notes, notes_ts) = dated_string(&shared.notes);
    let (bg_r, bg_g, bg_b, bg_ts) = match &shared.bg_color {
        DatedOptional::Present { value, timestamp } => (
            Some(value.r as i64),
            Some(value.g as i64),
            Some(value.b as i64),
            Some(timestamp.to_rfc3339()),
        ),
        DatedOptional::Absent => (None, None, None, None),
    };
    let (tempo, tempo_ts) = dated_f64(&shared.detected_tempo);

    sqlx::query(
        r#"
        INSERT INTO song_shared_data (
            hash, length, length_ts, last_played,
            rating_local, rating_local_ts, rating_rhythm_clarity, rating_rhythm_clarity_ts,
            rating_genre_typicality, rating_genre_typicality_ts, rating_popularity, rating_popularity_ts,
            tag_manual_author, tag_manual_author_ts, tag_manual_title, tag_manual_title_ts,
            tag_manual_genre, tag_manual_genre_ts, tag_manual_mpm, tag_manual_mpm_ts,
            skip_start, skip_start_ts, notes, notes_ts,
            bg_color_r, bg_color_g, bg_color_b, bg_color_ts,
            detected_tempo, detected_tempo_ts
        ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
        ON CONFLICT(hash) DO UPDATE SET
            length = excluded.length, length_ts = excluded.length_ts,
            last_played = excluded.last_played,
            rating_local = excluded.rating_local, rating_local_ts = excluded.rating_local_ts,
            rating_rhythm_clarity = excluded.rating_rhythm_clarity, rating_rhythm_clarity_ts = excluded.rating_rhythm_clarity_ts,
            rating_genre_typicality = excluded.rating_genre_typicality, rating_genre_typicality_ts = excluded.rating_genre_typicality_ts,
            rating_popularity = excluded.rating_popularity, rating_popularity_ts = excluded.rating_popularity_ts,
            tag_manual_author = excluded.tag_manual_author, tag_manual_author_ts = excluded.tag_manual_author_ts,
            tag_manual_title = excluded.tag_manual_title, tag_manual_title_ts = excluded.tag_manual_title_ts,
            tag_manual_genre = excluded.tag_manual_genre, tag_manual_genre_ts = excluded.tag_manual_genre_ts,
            tag_manual_mpm = excluded.tag_manual_mpm, tag_manual_mpm_ts = excluded.tag_manual_mpm_ts,
            skip_start = excluded.skip_start, skip_start_ts = excluded.skip_start_ts,
            notes = excluded.notes, notes_ts = excluded.notes_ts,
            bg_color_r = excluded.bg_color_r, bg_color_g = excluded.bg_color_g,
            bg_color_b = excluded.bg_color_b, bg_color_ts = excluded.bg_color_ts,
            detected_tempo = excluded.detected_tempo, detected_tempo_ts = excluded.detected_tempo_ts
        "#,
    )
    .bind(shared.hash.to_hex())
    .bind(len)
    .bind(len_ts)
    .bind(last_played)
    .bind(local)
    .bind(local_ts)
    .bind(rc)
    .bind(rc_ts)
    .bind(gt)
    .bind(gt_ts)
    .bind(pop)
    .bind(pop_ts)
    .bind(manual_author)
    .bind(manual_author_ts)
    .bind(manual_title)
    .bind(manual_title_ts)
    .bind(manual_genre)
    .bind(manual_genre_ts)
    .bind(manual_mpm)
    .bind(manual_mpm_ts)
    .bind(skip_start)
    .bind(skip_start_ts)
    .bind(notes)
    .bind(notes_ts)
    .bind(bg_r)
    .bind(bg_g)
    .bind(bg_b)
    .bind(bg_ts)
    .bind(tempo)
    .bind(tempo_ts)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_song_shared_data(
    pool: &SqlitePool,
    hash: ContentHash,
) -> sqlx::Result<Option<SongSharedData>> {
    let row = sqlx::query("SELECT * FROM song_shared_data WHERE hash = ?")
        .bind(hash.to_hex())
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(shared_from_row))
}

pub async fn get_all_song_shared_data(pool: &SqlitePool) -> sqlx::Result<Vec<SongSharedData>> {
    let rows = sqlx::query("SELECT * FROM song_shared_data")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(shared_from_row).collect())
}

/// Record a playback event for content-hash based history/weighting (C15).
pub async fn record_playback(pool: &SqlitePool, hash: ContentHash) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO playback_history (hash, played_at) VALUES (?, ?)")
        .bind(hash.to_hex())
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;
    sqlx::query(
        "INSERT INTO song_shared_data (hash, last_played) VALUES (?, ?)
         ON CONFLICT(hash) DO UPDATE SET last_played = excluded.last_played",
    )
    .bind(hash.to_hex())
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn count_times_played(pool: &SqlitePool, hash: ContentHash) -> sqlx::Result<u32> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM playback_history WHERE hash = ?")
        .bind(hash.to_hex())
        .fetch_one(pool)
        .await?;
    Ok(row.0 as u32)
}

/// The three independently-voted rating dimensions exposed over the vote
/// server (C18).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteKind {
    RhythmClarity,
    GenreTypicality,
    Popularity,
}

impl VoteKind {
    fn table(self) -> &'static str {
        match self {
            VoteKind::RhythmClarity => "votes_rhythm_clarity",
            VoteKind::GenreTypicality => "votes_genre_typicality",
            VoteKind::Popularity => "votes_popularity",
        }
    }

    fn rating_column(self) -> &'static str {
        match self {
            VoteKind::RhythmClarity => "rating_rhythm_clarity",
            VoteKind::GenreTypicality => "rating_genre_typicality",
            VoteKind::Popularity => "rating_popularity",
        }
    }
}

/// Record a single vote and recompute the aggregate rating for its kind as
/// the mean of all votes cast for that content hash.
pub async fn record_vote(pool: &SqlitePool, hash: ContentHash, kind: VoteKind, value: i64) -> sqlx::Result<()> {
    let hex = hash.to_hex();
    let mut tx = pool.begin().await?;

    let insert = format!(
        "INSERT INTO {} (hash, value, voted_at) VALUES (?, ?, ?)",
        kind.table()
    );
    sqlx::query(&insert)
        .bind(&hex)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

    let mean_query = format!("SELECT AVG(value) FROM {} WHERE hash = ?", kind.table());
    let (mean,): (Option<f64>,) = sqlx::query_as(&mean_query)
        .bind(&hex)
        .fetch_one(&mut *tx)
        .await?;

    let update = format!(
        "INSERT INTO song_shared_data (hash, {col}, {col}_ts) VALUES (?, ?, ?)
         ON CONFLICT(hash) DO UPDATE SET {col} = excluded.{col}, {col}_ts = excluded.{col}_ts",
        col = kind.rating_column()
    );
    sqlx::query(&update)
        .bind(&hex)
        .bind(mean)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

// ---------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------

pub async fn insert_filter(pool: &SqlitePool, name: &str, filter: &Filter) -> sqlx::Result<i64> {
    let tree_json = serde_json::to_string(filter).expect("Filter serializes");
    let result = sqlx::query("INSERT INTO filters (name, tree_json) VALUES (?, ?)")
        .bind(name)
        .bind(tree_json)
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}

pub async fn update_filter(pool: &SqlitePool, id: i64, name: &str, filter: &Filter) -> sqlx::Result<()> {
    let tree_json = serde_json::to_string(filter).expect("Filter serializes");
    sqlx::query("UPDATE filters SET name = ?, tree_json = ? WHERE id = ?")
        .bind(name)
        .bind(tree_json)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_filter(pool: &SqlitePool, id: i64) -> sqlx::Result<Option<(String, Filter)>> {
    let row = sqlx::query("SELECT name, tree_json FROM filters WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| {
        let name: String = r.get("name");
        let tree_json: String = r.get("tree_json");
        let filter: Filter = serde_json::from_str(&tree_json).expect("stored filter is valid JSON");
        (name, filter)
    }))
}

pub async fn list_filters(pool: &SqlitePool) -> sqlx::Result<Vec<(i64, String)>> {
    let rows = sqlx::query("SELECT id, name FROM filters ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| (r.get("id"), r.get("name"))).collect())
}

pub async fn delete_filter(pool: &SqlitePool, id: i64) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM filters WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Full row for a stored filter: its display attributes plus the tree
/// itself, as needed by the library store (C10) rather than the bare
/// name/tree pair `get_filter` returns.
#[derive(Debug, Clone)]
pub struct FilterRow {
    pub id: i64,
    pub name: String,
    pub filter: Filter,
    pub notes: String,
    pub is_favorite: bool,
    pub bg_color: Option<Rgb>,
    pub duration_limit: Option<f64>,
    pub position: i64,
}

fn filter_row_from_row(row: &sqlx::sqlite::SqliteRow) -> FilterRow {
    let tree_json: String = row.get("tree_json");
    let bg_r: Option<i64> = row.get("bg_color_r");
    let bg_g: Option<i64> = row.get("bg_color_g");
    let bg_b: Option<i64> = row.get("bg_color_b");
    FilterRow {
        id: row.get("id"),
        name: row.get("name"),
        filter: serde_json::from_str(&tree_json).expect("stored filter is valid JSON"),
        notes: row.get("notes"),
        is_favorite: row.get::<i64, _>("is_favorite") != 0,
        bg_color: match (bg_r, bg_g, bg_b) {
            (Some(r), Some(g), Some(b)) => Some(Rgb {
                r: r as u8,
                g: g as u8,
                b: b as u8,
            }),
            _ => None,
        },
        duration_limit: row.get("duration_limit"),
        position: row.get("position"),
    }
}

pub async fn list_filter_rows(pool: &SqlitePool) -> sqlx::Result<Vec<FilterRow>> {
    let rows = sqlx::query("SELECT * FROM filters ORDER BY position")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(filter_row_from_row).collect())
}

pub async fn get_filter_row(pool: &SqlitePool, id: i64) -> sqlx::Result<Option<FilterRow>> {
    let row = sqlx::query("SELECT * FROM filters WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(filter_row_from_row))
}

pub async fn get_favorite_filter_rows(pool: &SqlitePool) -> sqlx::Result<Vec<FilterRow>> {
    let rows = sqlx::query("SELECT * FROM filters WHERE is_favorite != 0 ORDER BY position")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(filter_row_from_row).collect())
}

/// Save a filter's display attributes and tree in one statement. Used both
/// for edits to an existing row and, via `insert_filter_full`, for import.
pub async fn save_filter_row(pool: &SqlitePool, row: &FilterRow) -> sqlx::Result<()> {
    let tree_json = serde_json::to_string(&row.filter).expect("Filter serializes");
    let (bg_r, bg_g, bg_b) = match row.bg_color {
        Some(c) => (Some(c.r as i64), Some(c.g as i64), Some(c.b as i64)),
        None => (None, None, None),
    };
    sqlx::query(
        "UPDATE filters SET name = ?, tree_json = ?, notes = ?, is_favorite = ?, \
         bg_color_r = ?, bg_color_g = ?, bg_color_b = ?, duration_limit = ?, position = ? \
         WHERE id = ?",
    )
    .bind(&row.name)
    .bind(tree_json)
    .bind(&row.notes)
    .bind(row.is_favorite as i64)
    .bind(bg_r)
    .bind(bg_g)
    .bind(bg_b)
    .bind(row.duration_limit)
    .bind(row.position)
    .bind(row.id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Insert a filter that arrives with no row id yet (an import, or a
/// brand-new filter created by the UI). Returns the assigned id.
pub async fn insert_filter_full(
    pool: &SqlitePool,
    name: &str,
    filter: &Filter,
    notes: &str,
    is_favorite: bool,
    bg_color: Option<Rgb>,
    duration_limit: Option<f64>,
    position: i64,
) -> sqlx::Result<i64> {
    let tree_json = serde_json::to_string(filter).expect("Filter serializes");
    let (bg_r, bg_g, bg_b) = match bg_color {
        Some(c) => (Some(c.r as i64), Some(c.g as i64), Some(c.b as i64)),
        None => (None, None, None),
    };
    let result = sqlx::query(
        "INSERT INTO filters (name, tree_json, notes, is_favorite, bg_color_r, bg_color_g, bg_color_b, duration_limit, position) \
         VALUES (?,?,?,?,?,?,?,?,?)",
    )
    .bind(name)
    .bind(tree_json)
    .bind(notes)
    .bind(is_favorite as i64)
    .bind(bg_r)
    .bind(bg_g)
    .bind(bg_b)
    .bind(duration_limit)
    .bind(position)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Delete a filter and cascade its removal out of every template, all in
/// one transaction (§4.9 `del_filter`).
pub async fn delete_filter_cascading(pool: &SqlitePool, filter_id: i64) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM template_items WHERE filter_id = ?")
        .bind(filter_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM filters WHERE id = ?")
        .bind(filter_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Swap the `position` column of two filters. A no-op if the ids match,
/// mirroring `Template::swap_positions`'s rejection of a self-swap.
pub async fn swap_filter_positions(pool: &SqlitePool, id_a: i64, id_b: i64) -> sqlx::Result<()> {
    if id_a == id_b {
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    let pos_a: (i64,) = sqlx::query_as("SELECT position FROM filters WHERE id = ?")
        .bind(id_a)
        .fetch_one(&mut *tx)
        .await?;
    let pos_b: (i64,) = sqlx::query_as("SELECT position FROM filters WHERE id = ?")
        .bind(id_b)
        .fetch_one(&mut *tx)
        .await?;
    sqlx::query("UPDATE filters SET position = ? WHERE id = ?")
        .bind(pos_b.0)
        .bind(id_a)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE filters SET position = ? WHERE id = ?")
        .bind(pos_a.0)
        .bind(id_b)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

// ---------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TemplateRow {
    pub id: i64,
    pub name: String,
    pub notes: String,
    pub bg_color: Option<Rgb>,
    pub position: i64,
    pub items: Vec<crate::template::TemplateItem>,
}

pub async fn insert_template(
    pool: &SqlitePool,
    name: &str,
    notes: &str,
    bg_color: Option<Rgb>,
    position: i64,
) -> sqlx::Result<i64> {
    let (bg_r, bg_g, bg_b) = match bg_color {
        Some(c) => (Some(c.r as i64), Some(c.g as i64), Some(c.b as i64)),
        None => (None, None, None),
    };
    let result = sqlx::query(
        "INSERT INTO templates (name, notes, bg_color_r, bg_color_g, bg_color_b, position) VALUES (?,?,?,?,?,?)",
    )
    .bind(name)
    .bind(notes)
    .bind(bg_r)
    .bind(bg_g)
    .bind(bg_b)
    .bind(position)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Replace a template's item list wholesale and persist its display
/// attributes, all inside one transaction (§4.9 `Template::save`, §8
/// testable property 7: reloading yields the same ordered filter refs).
pub async fn save_template(pool: &SqlitePool, row: &TemplateRow) -> sqlx::Result<()> {
    let (bg_r, bg_g, bg_b) = match row.bg_color {
        Some(c) => (Some(c.r as i64), Some(c.g as i64), Some(c.b as i64)),
        None => (None, None, None),
    };
    let mut tx = pool.begin().await?;
    sqlx::query(
        "UPDATE templates SET name = ?, notes = ?, bg_color_r = ?, bg_color_g = ?, bg_color_b = ?, position = ? WHERE id = ?",
    )
    .bind(&row.name)
    .bind(&row.notes)
    .bind(bg_r)
    .bind(bg_g)
    .bind(bg_b)
    .bind(row.position)
    .bind(row.id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM template_items WHERE template_id = ?")
        .bind(row.id)
        .execute(&mut *tx)
        .await?;
    for (position, item) in row.items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO template_items (template_id, position, filter_id, duration_limit) VALUES (?,?,?,?)",
        )
        .bind(row.id)
        .bind(position as i64)
        .bind(item.filter_id)
        .bind(item.duration_limit)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn get_template(pool: &SqlitePool, id: i64) -> sqlx::Result<Option<TemplateRow>> {
    let Some(row) = sqlx::query("SELECT * FROM templates WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
    else {
        return Ok(None);
    };
    let item_rows = sqlx::query(
        "SELECT filter_id, duration_limit FROM template_items WHERE template_id = ? ORDER BY position",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;
    let bg_r: Option<i64> = row.get("bg_color_r");
    let bg_g: Option<i64> = row.get("bg_color_g");
    let bg_b: Option<i64> = row.get("bg_color_b");
    Ok(Some(TemplateRow {
        id: row.get("id"),
        name: row.get("name"),
        notes: row.get("notes"),
        bg_color: match (bg_r, bg_g, bg_b) {
            (Some(r), Some(g), Some(b)) => Some(Rgb {
                r: r as u8,
                g: g as u8,
                b: b as u8,
            }),
            _ => None,
        },
        position: row.get("position"),
        items: item_rows
            .iter()
            .map(|r| crate::template::TemplateItem {
                filter_id: r.get("filter_id"),
                duration_limit: r.get("duration_limit"),
            })
            .collect(),
    }))
}

pub async fn list_templates(pool: &SqlitePool) -> sqlx::Result<Vec<(i64, String)>> {
    let rows = sqlx::query("SELECT id, name FROM templates ORDER BY position")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| (r.get("id"), r.get("name"))).collect())
}

pub async fn delete_template(pool: &SqlitePool, id: i64) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM templates WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------
// New-files staging (C10 `add_song_file` pending-hash state)
// ---------------------------------------------------------------------

/// Record a file by name only; it stays invisible to the live song table
/// until a hash job promotes it via [`promote_new_file`].
pub async fn add_new_file(pool: &SqlitePool, path: &str, file_size: u64) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO new_files (path, file_size, added_at) VALUES (?, ?, ?) \
         ON CONFLICT(path) DO NOTHING",
    )
    .bind(path)
    .bind(file_size as i64)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_new_files(pool: &SqlitePool) -> sqlx::Result<Vec<(String, u64)>> {
    let rows = sqlx::query("SELECT path, file_size FROM new_files")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|r| (r.get("path"), r.get::<i64, _>("file_size") as u64))
        .collect())
}

/// Move a file from `new_files` to the live `song_files` table once its
/// hash has been computed, attaching or creating its `SongSharedData` row
/// (§4.9 `song_hash_calculated`). Returns the promoted [`Song`].
pub async fn promote_new_file(
    pool: &SqlitePool,
    path: &str,
    hash: ContentHash,
    length_seconds: f64,
) -> sqlx::Result<Song> {
    let mut tx = pool.begin().await?;
    let file_size: Option<(i64,)> = sqlx::query_as("SELECT file_size FROM new_files WHERE path = ?")
        .bind(path)
        .fetch_optional(&mut *tx)
        .await?;
    let file_size = file_size.map(|(s,)| s).unwrap_or(0);

    sqlx::query("DELETE FROM new_files WHERE path = ?")
        .bind(path)
        .execute(&mut *tx)
        .await?;

    let mut song = Song::new(path, file_size as u64);
    song.hash = Some(hash);
    sqlx::query(
        "INSERT INTO song_files (path, file_size, hash) VALUES (?, ?, ?) \
         ON CONFLICT(path) DO UPDATE SET file_size = excluded.file_size, hash = excluded.hash",
    )
    .bind(path)
    .bind(file_size)
    .bind(hash.to_hex())
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO song_shared_data (hash, length, length_ts) VALUES (?, ?, ?) \
         ON CONFLICT(hash) DO UPDATE SET \
            length = CASE WHEN song_shared_data.length IS NULL THEN excluded.length ELSE song_shared_data.length END, \
            length_ts = CASE WHEN song_shared_data.length IS NULL THEN excluded.length_ts ELSE song_shared_data.length_ts END",
    )
    .bind(hash.to_hex())
    .bind(length_seconds)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(song)
}

// ---------------------------------------------------------------------
// Removal log
// ---------------------------------------------------------------------

pub struct RemovedSongRow {
    pub path: String,
    pub hash: Option<ContentHash>,
    pub removed_at: DateTime<Utc>,
    pub was_file_deleted: bool,
    pub num_duplicates_at_time: u32,
}

pub async fn add_song_removal_history(
    pool: &SqlitePool,
    path: &str,
    hash: Option<ContentHash>,
    was_file_deleted: bool,
    num_duplicates_at_time: u32,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO removed_songs (path, removed_at, hash, was_file_deleted, num_duplicates_at_time) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(path) DO UPDATE SET removed_at = excluded.removed_at, hash = excluded.hash, \
            was_file_deleted = excluded.was_file_deleted, num_duplicates_at_time = excluded.num_duplicates_at_time",
    )
    .bind(path)
    .bind(Utc::now().to_rfc3339())
    .bind(hash.map(|h| h.to_hex()))
    .bind(was_file_deleted as i64)
    .bind(num_duplicates_at_time as i64)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn removed_songs(pool: &SqlitePool) -> sqlx::Result<Vec<RemovedSongRow>> {
    let rows = sqlx::query("SELECT * FROM removed_songs ORDER BY removed_at")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|r| {
            let removed_at: String = r.get("removed_at");
            let hash: Option<String> = r.get("hash");
            RemovedSongRow {
                path: r.get("path"),
                hash: hash.and_then(|h| ContentHash::from_hex(&h)),
                removed_at: DateTime::parse_from_rfc3339(&removed_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                was_file_deleted: r.get::<i64, _>("was_file_deleted") != 0,
                num_duplicates_at_time: r.get::<i64, _>("num_duplicates_at_time") as u32,
            }
        })
        .collect())
}

pub async fn clear_removed_songs(pool: &SqlitePool) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM removed_songs").execute(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------
// Playback history
// ---------------------------------------------------------------------

pub struct HistoryItem {
    pub hash: ContentHash,
    pub played_at: DateTime<Utc>,
}

pub async fn playback_history(pool: &SqlitePool) -> sqlx::Result<Vec<HistoryItem>> {
    let rows = sqlx::query("SELECT hash, played_at FROM playback_history ORDER BY played_at")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|r| {
            let hash: String = r.get("hash");
            let played_at: String = r.get("played_at");
            HistoryItem {
                hash: ContentHash::from_hex(&hash).expect("stored hash must be valid hex"),
                played_at: DateTime::parse_from_rfc3339(&played_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            }
        })
        .collect())
}

/// Bulk-insert history items, used when merging another machine's export
/// (§4.9 `add_playback_history`). Each entry also bumps `last_played` on its
/// shared-data row if the incoming timestamp is newer.
pub async fn add_playback_history(pool: &SqlitePool, items: &[HistoryItem]) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    for item in items {
        sqlx::query("INSERT INTO playback_history (hash, played_at) VALUES (?, ?)")
            .bind(item.hash.to_hex())
            .bind(item.played_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO song_shared_data (hash, last_played) VALUES (?, ?) \
             ON CONFLICT(hash) DO UPDATE SET last_played = excluded.last_played \
             WHERE excluded.last_played > song_shared_data.last_played OR song_shared_data.last_played IS NULL",
        )
        .bind(item.hash.to_hex())
        .bind(item.played_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

// ---------------------------------------------------------------------
// Schema migration / backup (§4.9, §4.15)
// ---------------------------------------------------------------------

/// The schema version this build expects. Bumped whenever a migration is
/// added under `migrations/`.
pub const LATEST_VERSION: i64 = 2;

/// Opens (creating if absent) the database at `db_url`, backing up the file
/// first if it is older than [`LATEST_VERSION`], then runs pending
/// migrations and VACUUMs.
///
/// The original drives this from a hand-rolled `Version` table and per-step
/// transactions with foreign keys disabled; here `sqlx::migrate!` already
/// applies each `migrations/*.sql` script in its own transaction, so the
/// wrapper's job is just the version check, the pre-upgrade backup, and the
/// final `VACUUM` — see `DESIGN.md` for why this substitution was made.
pub async fn open_with_backup(
    db_path: &std::path::Path,
    backup_dir: Option<&std::path::Path>,
) -> Result<SqlitePool, sqlx::Error> {
    let url = db_url(Some(db_path));
    let existed = db_path.exists();

    if existed
        && let Some(backup_dir) = backup_dir
    {
        let current_version = read_user_version(&url).await?;
        if current_version < LATEST_VERSION {
            backup_database_file(db_path, backup_dir, current_version)
                .map_err(|e| sqlx::Error::Io(e))?;
        }
    }

    let pool = init_db(&url).await?;
    set_user_version(&pool, LATEST_VERSION).await?;
    sqlx::query("VACUUM").execute(&pool).await?;
    Ok(pool)
}

async fn read_user_version(url: &str) -> Result<i64, sqlx::Error> {
    if !Sqlite::database_exists(url).await.unwrap_or(false) {
        return Ok(0);
    }
    let pool = SqlitePoolOptions::new().max_connections(1).connect(url).await?;
    let (version,): (i64,) = sqlx::query_as("PRAGMA user_version").fetch_one(&pool).await?;
    pool.close().await;
    Ok(version)
}

async fn set_user_version(pool: &SqlitePool, version: i64) -> Result<(), sqlx::Error> {
    sqlx::query(&format!("PRAGMA user_version = {version}"))
        .execute(pool)
        .await?;
    Ok(())
}

/// Copies `db_path` to `<backup_dir>/<YYYY>/<YYYY>-<MM>-<DD>-verN.<ext>`,
/// erroring if that exact path already exists (§4.15).
fn backup_database_file(
    db_path: &std::path::Path,
    backup_dir: &std::path::Path,
    from_version: i64,
) -> std::io::Result<()> {
    let now = Utc::now();
    let year_dir = backup_dir.join(now.format("%Y").to_string());
    std::fs::create_dir_all(&year_dir)?;
    let ext = db_path.extension().and_then(|e| e.to_str()).unwrap_or("db");
    let backup_path = year_dir.join(format!(
        "{}-ver{}.{}",
        now.format("%Y-%m-%d"),
        from_version,
        ext
    ));
    if backup_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("backup file already exists: {}", backup_path.display()),
        ));
    }
    std::fs::copy(db_path, &backup_path)?;
    Ok(())
}

/// Copies `db_path` to `<backup_dir>/<YYYY>/<YYYY>-<MM>-<DD>.<ext>` unless a
/// backup for today already exists. Intended to run once per process start
/// (§4.15's daily-backup task), independent of the migration-driven backup.
pub fn daily_backup_if_needed(
    db_path: &std::path::Path,
    backup_dir: &std::path::Path,
) -> std::io::Result<bool> {
    let now = Utc::now();
    let year_dir = backup_dir.join(now.format("%Y").to_string());
    std::fs::create_dir_all(&year_dir)?;
    let ext = db_path.extension().and_then(|e| e.to_str()).unwrap_or("db");
    let backup_path = year_dir.join(format!("{}.{}", now.format("%Y-%m-%d"), ext));
    if backup_path.exists() {
        return Ok(false);
    }
    std::fs::copy(db_path, &backup_path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Comparison, Node, SongProperty, Value};

    async fn temp_pool() -> (SqlitePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let pool = init_db(&format!("sqlite:{}", db_path.display())).await.unwrap();
        (pool, dir)
    }

    #[tokio::test]
    async fn song_file_round_trips_through_store() {
        let (pool, _dir) = temp_pool().await;
        let mut song = Song::new("/music/a.mp3", 12345);
        song.tag_id3.author.set("Artist".to_string());
        song.hash = Some(ContentHash([7u8; 20]));

        upsert_song_file(&pool, &song).await.unwrap();
        let loaded = get_song_file(&pool, "/music/a.mp3").await.unwrap().unwrap();

        assert_eq!(loaded.tag_id3.author.value().map(|s| s.as_str()), Some("Artist"));
        assert_eq!(loaded.hash, Some(ContentHash([7u8; 20])));
        assert_eq!(loaded.file_size, 12345);
    }

    #[tokio::test]
    async fn shared_data_round_trips_ratings_and_tags() {
        let (pool, _dir) = temp_pool().await;
        let hash = ContentHash([9u8; 20]);
        let mut shared = SongSharedData::new(hash);
        shared.rating.local.set(4.5);
        shared.tag_manual.genre.set("SW".to_string());

        upsert_song_shared_data(&pool, &shared).await.unwrap();
        let loaded = get_song_shared_data(&pool, hash).await.unwrap().unwrap();

        assert_eq!(loaded.rating.local.value(), Some(&4.5));
        assert_eq!(loaded.tag_manual.genre.value().map(|s| s.as_str()), Some("SW"));
    }

    #[tokio::test]
    async fn vote_recomputes_mean_rating() {
        let (pool, _dir) = temp_pool().await;
        let hash = ContentHash([1u8; 20]);
        record_vote(&pool, hash, VoteKind::Popularity, 3).await.unwrap();
        record_vote(&pool, hash, VoteKind::Popularity, 5).await.unwrap();

        let shared = get_song_shared_data(&pool, hash).await.unwrap().unwrap();
        assert_eq!(shared.rating.popularity.value(), Some(&4.0));
    }

    #[tokio::test]
    async fn playback_history_counts_plays() {
        let (pool, _dir) = temp_pool().await;
        let hash = ContentHash([2u8; 20]);
        record_playback(&pool, hash).await.unwrap();
        record_playback(&pool, hash).await.unwrap();

        assert_eq!(count_times_played(&pool, hash).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn filter_round_trips_through_json_storage() {
        let (pool, _dir) = temp_pool().await;
        let mut filter = Filter::noop();
        let root = filter.root();
        filter.set_node(
            root,
            Node::Comparison {
                property: SongProperty::PrimaryGenre,
                comparison: Comparison::Equal,
                value: Value::String("SW".to_string()),
            },
        );

        let id = insert_filter(&pool, "Slow Waltzes", &filter).await.unwrap();
        let (name, loaded) = get_filter(&pool, id).await.unwrap().unwrap();
        assert_eq!(name, "Slow Waltzes");
        assert_eq!(loaded.hash(), filter.hash());
    }
}
