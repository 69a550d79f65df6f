//! `scan` subcommand: queue new files under a directory, then drive them
//! through hashing (C12) and tag scanning (C13) to completion.
//!
//! A GUI leaves newly-queued files in [`crate::library::LibraryStore::new_files`]
//! for a background pool (C11) to drain at its own pace; a one-shot CLI
//! invocation has no such pool running afterwards, so this command drains
//! the queue before returning. The decode-and-hash step is CPU-bound and
//! per-file independent, so it runs across a `rayon` pool rather than
//! one file at a time on the async runtime thread.

use crate::model::{DatedOptional, Tag};
use crate::player::format_adapter::FormatAdapter;
use crate::{hash, metadata};
use rayon::prelude::*;
use std::path::Path;

pub async fn run(path: &Path) -> anyhow::Result<()> {
    let config = crate::config::load();
    let mut store = super::open_store(&config).await?;

    let added = store.add_song_files(path.to_path_buf()).await?;
    tracing::info!(path = %path.display(), added, "queued new files for hashing");

    let pending = store.new_files().to_vec();
    let results: Vec<(String, anyhow::Result<Scanned>)> = pending
        .par_iter()
        .map(|file| (file.path.clone(), process_file(Path::new(&file.path))))
        .collect();

    let mut promoted = 0usize;
    for (path_str, result) in results {
        match result {
            Ok(scanned) => {
                let mut song = store
                    .song_hash_calculated(&path_str, scanned.hash, scanned.length_seconds)
                    .await?;
                song.tag_id3 = scanned.tag_id3;
                song.tag_file_name = scanned.tag_file_name;
                song.last_tag_rescanned = DatedOptional::now(chrono::Utc::now());
                store.record_tag_rescan(song).await?;
                promoted += 1;
            }
            Err(e) => tracing::warn!(path = %path_str, error = %e, "failed to process new file"),
        }
    }

    println!(
        "scanned {}: {added} new file(s) queued, {promoted} promoted, catalogue now has {} song(s)",
        path.display(),
        store.songs().len()
    );
    Ok(())
}

struct Scanned {
    hash: crate::model::ContentHash,
    length_seconds: f64,
    tag_id3: Tag,
    tag_file_name: Tag,
}

/// Decode, hash (C12), and tag-scan (C13) one file. Pure and thread-safe —
/// runs inside a `rayon` worker, never touching the store.
fn process_file(path: &Path) -> anyhow::Result<Scanned> {
    let adapter = FormatAdapter::create(path)?;
    let mut source = adapter.into_pcm_source();
    let (content_hash, length_seconds) = hash::hash_and_length(&mut source)?;
    Ok(Scanned {
        hash: content_hash,
        length_seconds,
        tag_id3: metadata::read_embedded_tag(path),
        tag_file_name: metadata::parse_file_name_tag(path),
    })
}
