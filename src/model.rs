//! Core data model: dated optionals, tags, songs, and shared data (C7).
//!
//! Every mutable field on a [`Song`] or [`SongSharedData`] is a [`DatedOptional`],
//! carrying the timestamp of its last write. This is the substrate that makes
//! database import idempotent: two records for the same song can be merged by
//! keeping whichever field was modified most recently (see [`DatedOptional::update_if_newer`]).

use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// A value that may be absent, tagged with the time it was last modified.
///
/// `Present` always carries a timestamp; there is no "value with no timestamp"
/// state, which keeps `update_if_newer` total.
#[derive(Debug, Clone, PartialEq)]
pub enum DatedOptional<T> {
    Present { value: T, timestamp: DateTime<Utc> },
    Absent,
}

impl<T> Default for DatedOptional<T> {
    fn default() -> Self {
        DatedOptional::Absent
    }
}

impl<T: Clone> DatedOptional<T> {
    /// Construct a present value, stamped with the current time.
    pub fn now(value: T) -> Self {
        DatedOptional::Present {
            value,
            timestamp: Utc::now(),
        }
    }

    /// Construct a present value with an explicit timestamp (e.g. loaded from the DB).
    pub fn dated(value: T, timestamp: DateTime<Utc>) -> Self {
        DatedOptional::Present { value, timestamp }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, DatedOptional::Present { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            DatedOptional::Present { value, .. } => Some(value),
            DatedOptional::Absent => None,
        }
    }

    pub fn value_or(&self, default: T) -> T {
        match self {
            DatedOptional::Present { value, .. } => value.clone(),
            DatedOptional::Absent => default,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            DatedOptional::Present { timestamp, .. } => Some(*timestamp),
            DatedOptional::Absent => None,
        }
    }

    /// Assign a new value, stamping it with the current time. Mirrors the
    /// original's `operator=`, which always bumps the timestamp on write.
    pub fn set(&mut self, value: T) {
        *self = DatedOptional::now(value);
    }

    pub fn reset(&mut self) {
        *self = DatedOptional::Absent;
    }

    /// Merge `other` into `self`, keeping `self` unchanged when it is at
    /// least as new. Ties favor the existing value.
    pub fn update_if_newer(&mut self, other: &DatedOptional<T>) {
        let Some(other_ts) = other.timestamp() else {
            return;
        };
        if let Some(self_ts) = self.timestamp()
            && self_ts >= other_ts
        {
            return;
        }
        *self = other.clone();
    }
}

impl DatedOptional<String> {
    /// Strings are considered empty both when absent and when the contained
    /// string is itself empty.
    pub fn is_empty(&self) -> bool {
        match self {
            DatedOptional::Absent => true,
            DatedOptional::Present { value, .. } => value.is_empty(),
        }
    }
}

/// A multi-sourced text/numeric field: per-source tags, resolved to a single
/// "primary" view by preferring the most authoritative non-empty source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub author: DatedOptional<String>,
    pub title: DatedOptional<String>,
    pub genre: DatedOptional<String>,
    pub measures_per_minute: DatedOptional<f64>,
}

/// RGB background color, stored as packed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// The four independent rating components tracked per content hash.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rating {
    pub local: DatedOptional<f64>,
    pub rhythm_clarity: DatedOptional<f64>,
    pub genre_typicality: DatedOptional<f64>,
    pub popularity: DatedOptional<f64>,
}

/// A 20-byte SHA-1 digest of a song's decoded PCM content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(pub [u8; 20]);

impl ContentHash {
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 40 {
            return None;
        }
        let mut out = [0u8; 20];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(ContentHash(out))
    }
}

/// Per-content metadata, shared across every file (Song) with the same
/// decoded-audio hash.
#[derive(Debug, Clone)]
pub struct SongSharedData {
    pub hash: ContentHash,
    pub length: DatedOptional<f64>,
    pub last_played: DatedOptional<DateTime<Utc>>,
    pub rating: Rating,
    pub tag_manual: Tag,
    pub skip_start: DatedOptional<f64>,
    pub notes: DatedOptional<String>,
    pub bg_color: DatedOptional<Rgb>,
    pub detected_tempo: DatedOptional<f64>,
    /// File paths of Songs currently pointing at this content. A weak
    /// back-reference in spirit: the store, not this struct, owns the Songs.
    pub duplicates: HashSet<String>,
}

impl SongSharedData {
    pub fn new(hash: ContentHash) -> Self {
        Self {
            hash,
            length: DatedOptional::Absent,
            last_played: DatedOptional::Absent,
            rating: Rating::default(),
            tag_manual: Tag::default(),
            skip_start: DatedOptional::Absent,
            notes: DatedOptional::Absent,
            bg_color: DatedOptional::Absent,
            detected_tempo: DatedOptional::Absent,
            duplicates: HashSet::new(),
        }
    }
}

/// A per-file record. Until `hash` is set, the song is still in the
/// "new files" pending-hash state and has no `SongSharedData`.
#[derive(Debug, Clone)]
pub struct Song {
    pub file_name: String,
    pub file_size: u64,
    pub hash: Option<ContentHash>,
    pub tag_file_name: Tag,
    pub tag_id3: Tag,
    pub last_tag_rescanned: DatedOptional<DateTime<Utc>>,
    pub num_tag_rescan_attempts: u32,
}

impl Song {
    pub fn new(file_name: impl Into<String>, file_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            file_size,
            hash: None,
            tag_file_name: Tag::default(),
            tag_id3: Tag::default(),
            last_tag_rescanned: DatedOptional::Absent,
            num_tag_rescan_attempts: 0,
        }
    }

    /// `needs_tag_rescan` = true when either the id3 or file-name author has
    /// never been set (i.e. this song's tags have never successfully been scanned).
    pub fn needs_tag_rescan(&self) -> bool {
        !self.tag_id3.author.is_present() || !self.tag_file_name.author.is_present()
    }
}

/// Source precedence for "primary" field resolution: manual, then id3, then filename.
pub struct PrimaryView<'a> {
    pub manual: &'a Tag,
    pub id3: &'a Tag,
    pub file_name: &'a Tag,
}

impl<'a> PrimaryView<'a> {
    pub fn author(&self) -> Option<&str> {
        first_non_empty(&[&self.manual.author, &self.id3.author, &self.file_name.author])
    }

    pub fn title(&self) -> Option<&str> {
        first_non_empty(&[&self.manual.title, &self.id3.title, &self.file_name.title])
    }

    pub fn genre(&self) -> Option<&str> {
        first_non_empty(&[&self.manual.genre, &self.id3.genre, &self.file_name.genre])
    }

    pub fn mpm(&self) -> Option<f64> {
        [
            &self.manual.measures_per_minute,
            &self.id3.measures_per_minute,
            &self.file_name.measures_per_minute,
        ]
        .into_iter()
        .find_map(|d| d.value().copied())
    }
}

fn first_non_empty<'a>(fields: &[&'a DatedOptional<String>]) -> Option<&'a str> {
    fields
        .iter()
        .find_map(|d| d.value().map(|s| s.as_str()).filter(|s| !s.is_empty()))
}

/// Composite key identifying a song's entity-level identity in the store:
/// the file path, used as the primary key for `Song` records.
pub type SongKey = String;

/// The per-genre competition tempo range, in MPM. Unknown genres return
/// `(0, u16::MAX)`, matching the original's `competitionTempoRangeForGenre`.
pub fn competition_tempo_range_for_genre(genre: &str) -> (u16, u16) {
    match genre {
        "SW" => (27, 30),
        "TG" => (30, 32),
        "VW" => (58, 60),
        "SF" => (27, 30),
        "QS" => (48, 52),
        "SB" => (48, 52),
        "CH" => (27, 32),
        "RU" => (23, 26),
        "PD" => (58, 60),
        "JI" => (40, 44),
        "PO" => (56, 60),
        _ => (0, u16::MAX),
    }
}

/// Human-readable warnings for a song, given its primary tag view and shared
/// data, mirroring `Song::getWarnings()`.
pub fn song_warnings(view: &PrimaryView<'_>, shared: Option<&SongSharedData>) -> Vec<String> {
    let mut warnings = Vec::new();

    let id3_genre = view.id3.genre.value().map(|s| s.as_str());
    let file_genre = view.file_name.genre.value().map(|s| s.as_str());
    if view.manual.genre.value().is_none()
        && let (Some(a), Some(b)) = (id3_genre, file_genre)
        && !a.eq_ignore_ascii_case(b)
    {
        warnings.push(format!(
            "Genre disagreement: id3 says \"{a}\", file name says \"{b}\""
        ));
    }

    if view.manual.measures_per_minute.value().is_none()
        && let Some(mpm) = view.mpm()
        && let Some(genre) = view.genre()
    {
        let (low, high) = competition_tempo_range_for_genre(genre);
        let lo = 0.7 * low as f64;
        let hi = 1.05 * high as f64;
        if mpm < lo || mpm > hi {
            warnings.push(format!(
                "MPM {mpm} is outside the competition range [{lo:.1}, {hi:.1}] for genre {genre}"
            ));
        }
    }

    let _ = shared;
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn update_if_newer_keeps_self_on_tie() {
        let now = Utc::now();
        let mut a: DatedOptional<i32> = DatedOptional::dated(1, now);
        let b: DatedOptional<i32> = DatedOptional::dated(2, now);
        a.update_if_newer(&b);
        assert_eq!(a.value(), Some(&1));
    }

    #[test]
    fn update_if_newer_replaces_when_strictly_older() {
        let now = Utc::now();
        let mut a: DatedOptional<i32> = DatedOptional::dated(1, now - Duration::seconds(5));
        let b: DatedOptional<i32> = DatedOptional::dated(2, now);
        a.update_if_newer(&b);
        assert_eq!(a.value(), Some(&2));
    }

    #[test]
    fn update_if_newer_ignores_absent_other() {
        let mut a: DatedOptional<i32> = DatedOptional::now(1);
        let b: DatedOptional<i32> = DatedOptional::Absent;
        a.update_if_newer(&b);
        assert_eq!(a.value(), Some(&1));
    }

    #[test]
    fn string_is_empty_true_when_absent_or_empty() {
        let absent: DatedOptional<String> = DatedOptional::Absent;
        let empty: DatedOptional<String> = DatedOptional::now(String::new());
        let present: DatedOptional<String> = DatedOptional::now("x".to_string());
        assert!(absent.is_empty());
        assert!(empty.is_empty());
        assert!(!present.is_empty());
    }

    #[test]
    fn primary_view_prefers_manual_then_id3_then_filename() {
        let manual = Tag::default();
        let mut id3 = Tag::default();
        id3.genre.set("TG".to_string());
        let mut file_name = Tag::default();
        file_name.genre.set("SW".to_string());

        let view = PrimaryView {
            manual: &manual,
            id3: &id3,
            file_name: &file_name,
        };
        assert_eq!(view.genre(), Some("TG"));
    }

    #[test]
    fn competition_range_known_and_unknown_genres() {
        assert_eq!(competition_tempo_range_for_genre("SW"), (27, 30));
        assert_eq!(competition_tempo_range_for_genre("XX"), (0, u16::MAX));
    }

    #[test]
    fn needs_tag_rescan_true_until_both_authors_set() {
        let mut song = Song::new("a.mp3", 100);
        assert!(song.needs_tag_rescan());
        song.tag_id3.author.set("A".to_string());
        song.tag_file_name.author.set("B".to_string());
        assert!(!song.needs_tag_rescan());
    }

    #[test]
    fn content_hash_hex_roundtrip() {
        let hash = ContentHash([0xab; 20]);
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 40);
        assert_eq!(ContentHash::from_hex(&hex), Some(hash));
    }
}
