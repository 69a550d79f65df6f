//! Playlist (C16): an ordered sequence of playable items plus a
//! current-item pointer.
//!
//! Grounded on a `PlayQueue`/`QueueItem` shape, generalized from
//! file-path items to content-hash items carrying the filter they were
//! sampled under and an optional per-item duration-limit override.

use crate::library::TemplatePick;
use crate::model::ContentHash;

/// A playable unit: a song, the filter it was picked under (if any), and
/// an optional duration-limit override. `None` means "no limit", mirroring
/// the original's `-1` sentinel.
#[derive(Debug, Clone)]
pub struct PlaylistItem {
    pub song_hash: ContentHash,
    pub filter_id: Option<i64>,
    pub duration_limit: Option<f64>,
    /// Expected start time relative to playlist start, recomputed by
    /// `update_track_times_from_current`.
    pub expected_start: f64,
}

impl PlaylistItem {
    pub fn new(song_hash: ContentHash, filter_id: Option<i64>, duration_limit: Option<f64>) -> Self {
        Self {
            song_hash,
            filter_id,
            duration_limit,
            expected_start: 0.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct Playlist {
    items: Vec<PlaylistItem>,
    /// `None` mirrors the original's -1 "no current item".
    current: Option<usize>,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[PlaylistItem] {
        &self.items
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&PlaylistItem> {
        self.current.and_then(|i| self.items.get(i))
    }

    pub fn set_current(&mut self, idx: Option<usize>) {
        self.current = idx.filter(|i| *i < self.items.len());
    }

    pub fn insert_at(&mut self, idx: usize, item: PlaylistItem) {
        let idx = idx.min(self.items.len());
        self.items.insert(idx, item);
        if let Some(cur) = self.current
            && idx <= cur
        {
            self.current = Some(cur + 1);
        }
    }

    pub fn append(&mut self, item: PlaylistItem) {
        self.items.push(item);
    }

    pub fn delete_at(&mut self, idx: usize) {
        if idx >= self.items.len() {
            return;
        }
        self.items.remove(idx);
        self.current = match self.current {
            Some(cur) if cur == idx => None,
            Some(cur) if cur > idx => Some(cur - 1),
            other => other,
        };
    }

    pub fn move_item(&mut self, from: usize, to: usize) {
        if from >= self.items.len() || to >= self.items.len() || from == to {
            return;
        }
        let item = self.items.remove(from);
        self.items.insert(to, item);
        self.current = self.current.map(|cur| remap_index(cur, from, to));
    }

    pub fn replace(&mut self, idx: usize, item: PlaylistItem) {
        if let Some(slot) = self.items.get_mut(idx) {
            *slot = item;
        }
    }

    /// Append every pick from a template's run through C15, in order.
    pub fn add_from_template(&mut self, picks: &[TemplatePick], duration_limit: Option<f64>) {
        for pick in picks {
            self.append(PlaylistItem::new(pick.song_hash, Some(pick.filter_id), duration_limit));
        }
    }

    /// Append one song sampled under a single filter.
    pub fn add_from_filter(&mut self, song_hash: ContentHash, filter_id: i64, duration_limit: Option<f64>) {
        self.append(PlaylistItem::new(song_hash, Some(filter_id), duration_limit));
    }

    /// Advance the current-item pointer by one; returns the new current
    /// item, or `None` at the end of the playlist.
    pub fn advance(&mut self) -> Option<&PlaylistItem> {
        let next = self.current.map_or(0, |c| c + 1);
        self.set_current(Some(next));
        self.current()
    }

    pub fn prev(&mut self) -> Option<&PlaylistItem> {
        let prev = self.current.and_then(|c| c.checked_sub(1))?;
        self.set_current(Some(prev));
        self.current()
    }

    /// Recompute each item's expected start time from the current item
    /// onward, using `length_of` to resolve each item's actual track
    /// length (clamped by its own duration limit).
    pub fn update_track_times_from_current(&mut self, length_of: impl Fn(&PlaylistItem) -> f64) {
        let Some(start) = self.current else { return };
        let mut t = 0.0;
        for item in &mut self.items[start..] {
            item.expected_start = t;
            let full_length = length_of(item);
            let effective = item.duration_limit.map_or(full_length, |d| full_length.min(d));
            t += effective;
        }
    }
}

fn remap_index(cur: usize, from: usize, to: usize) -> usize {
    if cur == from {
        to
    } else if from < to && cur > from && cur <= to {
        cur - 1
    } else if to < from && cur >= to && cur < from {
        cur + 1
    } else {
        cur
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(b: u8) -> ContentHash {
        ContentHash([b; 20])
    }

    #[test]
    fn advance_walks_forward_and_stops_past_end() {
        let mut pl = Playlist::new();
        pl.append(PlaylistItem::new(hash(1), None, None));
        pl.append(PlaylistItem::new(hash(2), None, None));
        assert!(pl.advance().is_some());
        assert_eq!(pl.current_index(), Some(0));
        assert!(pl.advance().is_some());
        assert_eq!(pl.current_index(), Some(1));
        assert!(pl.advance().is_none());
    }

    #[test]
    fn delete_at_current_clears_current_pointer() {
        let mut pl = Playlist::new();
        pl.append(PlaylistItem::new(hash(1), None, None));
        pl.set_current(Some(0));
        pl.delete_at(0);
        assert_eq!(pl.current_index(), None);
    }

    #[test]
    fn update_track_times_accounts_for_duration_limit() {
        let mut pl = Playlist::new();
        pl.append(PlaylistItem::new(hash(1), None, Some(5.0)));
        pl.append(PlaylistItem::new(hash(2), None, None));
        pl.set_current(Some(0));
        pl.update_track_times_from_current(|_| 300.0);
        assert_eq!(pl.items()[0].expected_start, 0.0);
        assert_eq!(pl.items()[1].expected_start, 5.0);
    }

    #[test]
    fn move_item_updates_current_pointer() {
        let mut pl = Playlist::new();
        pl.append(PlaylistItem::new(hash(1), None, None));
        pl.append(PlaylistItem::new(hash(2), None, None));
        pl.append(PlaylistItem::new(hash(3), None, None));
        pl.set_current(Some(2));
        pl.move_item(0, 2);
        assert_eq!(pl.current_index(), Some(1));
    }
}
