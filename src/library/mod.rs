//! Library store (C10): the in-memory catalogue of songs, shared data,
//! filters, templates, history and votes, kept synchronized with the
//! database in [`crate::db`].
//!
//! The original owns all of this as plain in-process collections and
//! requires the caller (its single UI thread) to serialize access; this
//! port keeps that contract — every mutator here takes `&mut self` and
//! none of it is `Sync` — but, unlike the original's direct in-memory
//! mutation, each call also persists through `sqlx` so the cache and the
//! database never drift apart.

use crate::db::{self, FilterRow, HistoryItem, RemovedSongRow, TemplateRow, VoteKind};
use crate::filter::{EvalContext, Filter};
use crate::model::{ContentHash, Song, SongSharedData};
use crate::sampler::{self, RatingInputs};
use crate::scanner;
use crate::template::Template;
use futures::StreamExt;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;

/// One song picked for a template slot, paired with the filter it matched
/// (§4.9 `pick_songs_for_template`).
pub struct TemplatePick {
    pub song_hash: ContentHash,
    pub filter_id: i64,
}

/// A pending file: known on disk but not yet hashed, so it has no
/// `SongSharedData` attached and does not appear in [`LibraryStore::songs`].
#[derive(Debug, Clone)]
pub struct NewFile {
    pub path: String,
    pub file_size: u64,
}

pub struct LibraryStore {
    pool: SqlitePool,
    songs: Vec<Song>,
    shared: HashMap<ContentHash, SongSharedData>,
    new_files: Vec<NewFile>,
    filters: Vec<FilterRow>,
    templates: Vec<TemplateRow>,
    history: Vec<HistoryItem>,
}

impl LibraryStore {
    /// Load the full catalogue into memory from `pool`.
    pub async fn open(pool: SqlitePool) -> sqlx::Result<Self> {
        let songs = db::get_all_song_files(&pool).await?;
        let shared_rows = db::get_all_song_shared_data(&pool).await?;
        let shared = shared_rows.into_iter().map(|s| (s.hash, s)).collect();
        let new_files = db::list_new_files(&pool)
            .await?
            .into_iter()
            .map(|(path, file_size)| NewFile { path, file_size })
            .collect();
        let filters = db::list_filter_rows(&pool).await?;
        let mut templates = Vec::new();
        for (id, _name) in db::list_templates(&pool).await? {
            if let Some(t) = db::get_template(&pool, id).await? {
                templates.push(t);
            }
        }
        let history = db::playback_history(&pool).await?;

        Ok(Self {
            pool,
            songs,
            shared,
            new_files,
            filters,
            templates,
            history,
        })
    }

    // -----------------------------------------------------------------
    // Songs
    // -----------------------------------------------------------------

    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    pub fn new_files(&self) -> &[NewFile] {
        &self.new_files
    }

    pub fn shared_data(&self, hash: ContentHash) -> Option<&SongSharedData> {
        self.shared.get(&hash)
    }

    pub fn song_from_hash(&self, hash: ContentHash) -> Vec<&Song> {
        self.songs.iter().filter(|s| s.hash == Some(hash)).collect()
    }

    pub fn song_from_file_name(&self, file_name: &str) -> Option<&Song> {
        self.songs.iter().find(|s| s.file_name == file_name)
    }

    /// Queue one file for hashing. A no-op if the path is already tracked,
    /// either live or pending (§4.9 dedupe-by-file-name).
    pub async fn add_song_file(&mut self, path: &str, file_size: u64) -> sqlx::Result<()> {
        if self.song_from_file_name(path).is_some() || self.new_files.iter().any(|f| f.path == path) {
            return Ok(());
        }
        db::add_new_file(&self.pool, path, file_size).await?;
        self.new_files.push(NewFile {
            path: path.to_string(),
            file_size,
        });
        Ok(())
    }

    /// Walk `root` and queue every audio file found beneath it that is not
    /// already tracked.
    pub async fn add_song_files(&mut self, root: PathBuf) -> sqlx::Result<usize> {
        let paths = scanner::scan(root);
        futures::pin_mut!(paths);
        let mut added = 0usize;
        while let Some(path) = paths.next().await {
            let file_size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            let path = path.to_string_lossy().to_string();
            let before = self.new_files.len();
            self.add_song_file(&path, file_size).await?;
            if self.new_files.len() > before {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Promote a hashed file out of the new-files queue into the live song
    /// table, attaching or creating its `SongSharedData` (§4.9
    /// `song_hash_calculated`). The caller is responsible for separately
    /// enqueuing a tag-rescan request (C13) once this returns.
    pub async fn song_hash_calculated(
        &mut self,
        path: &str,
        hash: ContentHash,
        length_seconds: f64,
    ) -> sqlx::Result<Song> {
        let song = db::promote_new_file(&self.pool, path, hash, length_seconds).await?;
        self.new_files.retain(|f| f.path != path);
        self.shared
            .entry(hash)
            .or_insert_with(|| SongSharedData::new(hash))
            .duplicates
            .insert(path.to_string());
        self.songs.retain(|s| s.file_name != path);
        self.songs.push(song.clone());
        Ok(song)
    }

    /// Persist a song whose tags have just been (re)scanned (C13), updating
    /// both rows and the in-memory cache. The caller fills in `tag_id3`,
    /// `tag_file_name`, and `last_tag_rescanned` before calling this.
    pub async fn record_tag_rescan(&mut self, song: Song) -> sqlx::Result<()> {
        db::upsert_song_file(&self.pool, &song).await?;
        self.songs.retain(|s| s.file_name != song.file_name);
        self.songs.push(song);
        Ok(())
    }

    /// Remove a song from the catalogue, logging it to the removal history
    /// and optionally deleting the underlying file. `SharedData` survives —
    /// other files may still point at the same content hash.
    pub async fn remove_song(&mut self, file_name: &str, delete_file: bool) -> std::io::Result<()> {
        let Some(pos) = self.songs.iter().position(|s| s.file_name == file_name) else {
            return Ok(());
        };
        let song = self.songs.remove(pos);
        let num_duplicates_at_time = song
            .hash
            .and_then(|h| self.shared.get(&h))
            .map(|s| s.duplicates.len() as u32)
            .unwrap_or(0);

        if let Some(hash) = song.hash
            && let Some(shared) = self.shared.get_mut(&hash)
        {
            shared.duplicates.remove(file_name);
        }

        if delete_file {
            std::fs::remove_file(file_name)?;
        }

        db::remove_song_file(&self.pool, file_name)
            .await
            .map_err(std::io::Error::other)?;
        db::add_song_removal_history(&self.pool, file_name, song.hash, delete_file, num_duplicates_at_time)
            .await
            .map_err(std::io::Error::other)?;
        Ok(())
    }

    pub async fn rename_file(&mut self, old_path: &str, new_path: &str) -> sqlx::Result<()> {
        if let Some(song) = self.songs.iter_mut().find(|s| s.file_name == old_path) {
            song.file_name = new_path.to_string();
        }
        sqlx::query("UPDATE song_files SET path = ? WHERE path = ?")
            .bind(new_path)
            .bind(old_path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Filters
    // -----------------------------------------------------------------

    pub fn filters(&self) -> &[FilterRow] {
        &self.filters
    }

    pub fn get_favorite_filters(&self) -> Vec<&FilterRow> {
        self.filters.iter().filter(|f| f.is_favorite).collect()
    }

    /// Create a brand-new filter (no assigned id yet) and persist it.
    pub async fn create_filter(&mut self, name: &str) -> sqlx::Result<i64> {
        let position = self.filters.len() as i64;
        let id = db::insert_filter_full(&self.pool, name, &Filter::noop(), "", false, None, None, position).await?;
        self.filters.push(FilterRow {
            id,
            name: name.to_string(),
            filter: Filter::noop(),
            notes: String::new(),
            is_favorite: false,
            bg_color: None,
            duration_limit: None,
            position,
        });
        Ok(id)
    }

    /// Import a filter that must not already carry a row id (§4.9
    /// `add_filter`).
    pub async fn add_filter(&mut self, mut row: FilterRow) -> sqlx::Result<i64> {
        let position = self.filters.len() as i64;
        row.position = position;
        let id = db::insert_filter_full(
            &self.pool,
            &row.name,
            &row.filter,
            &row.notes,
            row.is_favorite,
            row.bg_color,
            row.duration_limit,
            position,
        )
        .await?;
        row.id = id;
        self.filters.push(row);
        Ok(id)
    }

    pub async fn save_filter(&mut self, row: FilterRow) -> sqlx::Result<()> {
        db::save_filter_row(&self.pool, &row).await?;
        if let Some(slot) = self.filters.iter_mut().find(|f| f.id == row.id) {
            *slot = row;
        }
        Ok(())
    }

    /// Delete a filter, cascading its removal out of every template that
    /// references it, in a single transaction.
    pub async fn del_filter(&mut self, filter_id: i64) -> sqlx::Result<()> {
        db::delete_filter_cascading(&self.pool, filter_id).await?;
        self.filters.retain(|f| f.id != filter_id);
        for template in &mut self.templates {
            template.items.retain(|item| item.filter_id != filter_id);
        }
        Ok(())
    }

    pub async fn swap_filters_by_idx(&mut self, idx_a: usize, idx_b: usize) -> sqlx::Result<()> {
        if idx_a == idx_b || idx_a >= self.filters.len() || idx_b >= self.filters.len() {
            return Ok(());
        }
        let id_a = self.filters[idx_a].id;
        let id_b = self.filters[idx_b].id;
        db::swap_filter_positions(&self.pool, id_a, id_b).await?;
        self.filters.swap(idx_a, idx_b);
        let pos_a = self.filters[idx_a].position;
        self.filters[idx_a].position = self.filters[idx_b].position;
        self.filters[idx_b].position = pos_a;
        Ok(())
    }

    fn eval_context<'a>(&'a self, song: &'a Song) -> EvalContext<'a> {
        EvalContext {
            song,
            shared: song.hash.and_then(|h| self.shared.get(&h)),
        }
    }

    /// Count distinct songs (by file) in the catalogue that satisfy `filter`.
    pub fn num_songs_matching_filter(&self, filter: &Filter) -> usize {
        self.songs
            .iter()
            .filter(|song| filter.is_satisfied_by(&self.eval_context(song)))
            .count()
    }

    // -----------------------------------------------------------------
    // Templates
    // -----------------------------------------------------------------

    pub fn templates(&self) -> &[TemplateRow] {
        &self.templates
    }

    pub async fn create_template(&mut self, name: &str) -> sqlx::Result<i64> {
        let position = self.templates.len() as i64;
        let id = db::insert_template(&self.pool, name, "", None, position).await?;
        self.templates.push(TemplateRow {
            id,
            name: name.to_string(),
            notes: String::new(),
            bg_color: None,
            position,
            items: Vec::new(),
        });
        Ok(id)
    }

    pub async fn save_template(&mut self, row: TemplateRow) -> sqlx::Result<()> {
        db::save_template(&self.pool, &row).await?;
        if let Some(slot) = self.templates.iter_mut().find(|t| t.id == row.id) {
            *slot = row;
        } else {
            self.templates.push(row);
        }
        Ok(())
    }

    pub async fn del_template(&mut self, template_id: i64) -> sqlx::Result<()> {
        db::delete_template(&self.pool, template_id).await?;
        self.templates.retain(|t| t.id != template_id);
        Ok(())
    }

    /// Convert a stored row into the pure [`Template`] type `template.rs`
    /// operates on, for callers that want to splice/reorder items before
    /// calling [`LibraryStore::save_template`].
    pub fn template_as_value(row: &TemplateRow) -> Template {
        let mut t = Template::new(row.name.clone());
        t.id = Some(row.id);
        for item in &row.items {
            t.append(item.filter_id, item.duration_limit);
        }
        t
    }

    /// Run §4.11's picker for every item in a template, returning one song
    /// per item that matched (items whose filter had no eligible song are
    /// skipped).
    pub fn pick_songs_for_template(&self, template: &TemplateRow) -> Vec<TemplatePick> {
        let mut picks = Vec::with_capacity(template.items.len());
        for item in &template.items {
            let Some(filter_row) = self.filters.iter().find(|f| f.id == item.filter_id) else {
                continue;
            };
            if let Some(hash) = self.pick_song_for_filter(&filter_row.filter, None) {
                picks.push(TemplatePick {
                    song_hash: hash,
                    filter_id: item.filter_id,
                });
            }
        }
        picks
    }

    /// Pick one song satisfying `filter`, weighted per C15. Candidates are
    /// deduplicated by content hash: a song with no hash yet (still in
    /// `new_files`) can never be picked. `avoid` is returned verbatim if
    /// nothing else matches.
    pub fn pick_song_for_filter(&self, filter: &Filter, avoid: Option<ContentHash>) -> Option<ContentHash> {
        let mut seen = std::collections::HashSet::new();
        let mut candidates = Vec::new();
        for song in &self.songs {
            let Some(hash) = song.hash else { continue };
            if !seen.insert(hash) {
                continue;
            }
            if !filter.is_satisfied_by(&self.eval_context(song)) {
                continue;
            }
            let shared = self.shared.get(&hash);
            let days_since_last_played = shared.and_then(|s| s.last_played.value()).map(|ts| {
                (chrono::Utc::now() - *ts).num_seconds() as f64 / 86400.0
            });
            let ratings = shared
                .map(|s| RatingInputs {
                    genre_typicality: s.rating.genre_typicality.value().copied(),
                    popularity: s.rating.popularity.value().copied(),
                    rhythm_clarity: s.rating.rhythm_clarity.value().copied(),
                })
                .unwrap_or_default();
            let weight = sampler::song_weight(days_since_last_played, &[], ratings);
            candidates.push((hash, weight));
        }
        let total: i64 = candidates.iter().map(|(_, w)| *w as i64).sum();
        let draw = sampler::draw_uniform(total.max(1));
        sampler::pick_song(&candidates, avoid.as_ref(), draw).copied()
    }

    // -----------------------------------------------------------------
    // History
    // -----------------------------------------------------------------

    pub fn playback_history(&self) -> &[HistoryItem] {
        &self.history
    }

    pub async fn record_playback(&mut self, hash: ContentHash) -> sqlx::Result<()> {
        db::record_playback(&self.pool, hash).await?;
        self.history.push(HistoryItem {
            hash,
            played_at: chrono::Utc::now(),
        });
        self.shared
            .entry(hash)
            .or_insert_with(|| SongSharedData::new(hash))
            .last_played = crate::model::DatedOptional::now(chrono::Utc::now());
        Ok(())
    }

    /// Merge another machine's exported history into this one (§4.9
    /// `add_playback_history`).
    pub async fn add_playback_history(&mut self, items: Vec<HistoryItem>) -> sqlx::Result<()> {
        db::add_playback_history(&self.pool, &items).await?;
        self.history.extend(items);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Votes
    // -----------------------------------------------------------------

    pub async fn add_vote(&mut self, hash: ContentHash, kind: VoteKind, value: i64) -> sqlx::Result<()> {
        db::record_vote(&self.pool, hash, kind, value).await?;
        let shared_rows = db::get_all_song_shared_data(&self.pool).await?;
        if let Some(row) = shared_rows.into_iter().find(|s| s.hash == hash) {
            self.shared.insert(hash, row);
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Removal log
    // -----------------------------------------------------------------

    pub async fn removed_songs(&self) -> sqlx::Result<Vec<RemovedSongRow>> {
        db::removed_songs(&self.pool).await
    }

    pub async fn clear_removed_songs(&self) -> sqlx::Result<()> {
        db::clear_removed_songs(&self.pool).await
    }

    pub async fn add_song_removal_history(
        &self,
        path: &str,
        hash: Option<ContentHash>,
        was_file_deleted: bool,
        num_duplicates_at_time: u32,
    ) -> sqlx::Result<()> {
        db::add_song_removal_history(&self.pool, path, hash, was_file_deleted, num_duplicates_at_time).await
    }

    // -----------------------------------------------------------------
    // Save-all (bulk post-import commit)
    // -----------------------------------------------------------------

    pub async fn save_all_song_shared_data(&self) -> sqlx::Result<()> {
        for shared in self.shared.values() {
            db::upsert_song_shared_data(&self.pool, shared).await?;
        }
        Ok(())
    }

    pub async fn save_all_templates(&self) -> sqlx::Result<()> {
        for template in &self.templates {
            db::save_template(&self.pool, template).await?;
        }
        Ok(())
    }
}
