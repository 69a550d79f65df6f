//! Filter tree: boolean combinations of song-property comparisons (C8).
//!
//! Nodes live in a flat arena owned by the [`Filter`]; children are addressed
//! by index rather than through `Rc`/`RefCell`, so a clone of a `Filter` is a
//! clone of a `Vec` and carries no shared-mutability hazards.

use crate::model::{DatedOptional, PrimaryView, Song, SongSharedData};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SongProperty {
    /// Primary (manual > id3 > filename) views.
    PrimaryAuthor,
    PrimaryTitle,
    PrimaryGenre,
    PrimaryMeasuresPerMinute,
    /// Manual (user-authoritative) tag, queried directly.
    ManualAuthor,
    ManualTitle,
    ManualGenre,
    ManualMeasuresPerMinute,
    /// Embedded id3 tag, queried directly.
    Id3Author,
    Id3Title,
    Id3Genre,
    Id3MeasuresPerMinute,
    /// Filename-heuristic tag, queried directly.
    FileNameAuthor,
    FileNameTitle,
    FileNameGenre,
    FileNameMeasuresPerMinute,
    FileName,
    Length,
    LastPlayed,
    LocalRating,
    RhythmClarityRating,
    GenreTypicalityRating,
    PopularityRating,
    WarningCount,
    Notes,
    DetectedTempo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Equal,
    NotEqual,
    Contains,
    NotContains,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Number(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    And(Vec<usize>),
    Or(Vec<usize>),
    Comparison {
        property: SongProperty,
        comparison: Comparison,
        value: Value,
    },
    /// Always-true leaf, used as a default root for newly created filters.
    Noop,
}

/// Context a filter is evaluated against: the file-level song plus whatever
/// content-level data has been resolved for its hash, if any.
pub struct EvalContext<'a> {
    pub song: &'a Song,
    pub shared: Option<&'a SongSharedData>,
}

impl<'a> EvalContext<'a> {
    fn primary_view(&self) -> PrimaryView<'a> {
        let manual = self.shared.map(|s| &s.tag_manual);
        PrimaryView {
            manual: manual.unwrap_or(&EMPTY_TAG),
            id3: &self.song.tag_id3,
            file_name: &self.song.tag_file_name,
        }
    }
}

static EMPTY_TAG: crate::model::Tag = crate::model::Tag {
    author: DatedOptional::Absent,
    title: DatedOptional::Absent,
    genre: DatedOptional::Absent,
    measures_per_minute: DatedOptional::Absent,
};

/// An arena-backed boolean filter tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    nodes: Vec<Node>,
    parents: Vec<Option<usize>>,
    root: usize,
}

impl Default for Filter {
    fn default() -> Self {
        Self::noop()
    }
}

impl Filter {
    /// A filter that is satisfied by every song: the default for new filters.
    pub fn noop() -> Self {
        Self {
            nodes: vec![Node::Noop],
            parents: vec![None],
            root: 0,
        }
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn node(&self, idx: usize) -> &Node {
        &self.nodes[idx]
    }

    pub fn parent(&self, idx: usize) -> Option<usize> {
        self.parents[idx]
    }

    /// Overwrite the node at `idx` in place, keeping its parent/children
    /// bookkeeping untouched. Used to turn a freshly-`noop()`'d root into a
    /// real comparison or composite node.
    pub fn set_node(&mut self, idx: usize, node: Node) {
        self.nodes[idx] = node;
    }

    /// Insert a new node and return its index. It starts parentless; use
    /// `add_child` to attach it under an And/Or node.
    pub fn insert(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.parents.push(None);
        self.nodes.len() - 1
    }

    pub fn add_child(&mut self, parent: usize, child: usize) {
        match &mut self.nodes[parent] {
            Node::And(children) | Node::Or(children) => children.push(child),
            _ => panic!("add_child on a non-composite node"),
        }
        self.parents[child] = Some(parent);
    }

    pub fn replace_child(&mut self, parent: usize, old: usize, new: usize) {
        match &mut self.nodes[parent] {
            Node::And(children) | Node::Or(children) => {
                if let Some(pos) = children.iter().position(|&c| c == old) {
                    children[pos] = new;
                }
            }
            _ => panic!("replace_child on a non-composite node"),
        }
        self.parents[old] = None;
        self.parents[new] = Some(parent);
    }

    pub fn remove_child(&mut self, parent: usize, child: usize) {
        match &mut self.nodes[parent] {
            Node::And(children) | Node::Or(children) => children.retain(|&c| c != child),
            _ => panic!("remove_child on a non-composite node"),
        }
        self.parents[child] = None;
    }

    /// Check that every non-root node's recorded parent actually lists it as
    /// a child, and vice versa. Intended for debug assertions, not hot paths.
    pub fn check_consistency(&self) -> bool {
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Node::And(children) | Node::Or(children) = node {
                for &child in children {
                    if self.parents[child] != Some(idx) {
                        return false;
                    }
                }
            }
        }
        true
    }

    pub fn is_satisfied_by(&self, ctx: &EvalContext<'_>) -> bool {
        self.node_satisfied(self.root, ctx)
    }

    fn node_satisfied(&self, idx: usize, ctx: &EvalContext<'_>) -> bool {
        match &self.nodes[idx] {
            Node::Noop => true,
            Node::And(children) => children.iter().all(|&c| self.node_satisfied(c, ctx)),
            Node::Or(children) => children.iter().any(|&c| self.node_satisfied(c, ctx)),
            Node::Comparison {
                property,
                comparison,
                value,
            } => comparison_satisfied(*property, *comparison, value, ctx),
        }
    }

    /// A stable SHA-1 digest of the filter tree's shape and leaf values,
    /// used to detect whether two filters are semantically identical.
    pub fn hash(&self) -> [u8; 20] {
        let mut hasher = Sha1::new();
        self.hash_node(self.root, &mut hasher);
        hasher.finalize().into()
    }

    fn hash_node(&self, idx: usize, hasher: &mut Sha1) {
        match &self.nodes[idx] {
            Node::Noop => hasher.update(b"noop"),
            Node::And(children) => {
                hasher.update(b"and(");
                for &c in children {
                    self.hash_node(c, hasher);
                }
                hasher.update(b")");
            }
            Node::Or(children) => {
                hasher.update(b"or(");
                for &c in children {
                    self.hash_node(c, hasher);
                }
                hasher.update(b")");
            }
            Node::Comparison {
                property,
                comparison,
                value,
            } => {
                hasher.update(format!("{property:?}{comparison:?}").as_bytes());
                match value {
                    Value::String(s) => hasher.update(s.as_bytes()),
                    Value::Number(n) => hasher.update(n.to_bits().to_le_bytes()),
                }
            }
        }
    }
}

fn comparison_satisfied(
    property: SongProperty,
    comparison: Comparison,
    value: &Value,
    ctx: &EvalContext<'_>,
) -> bool {
    let manual_default = crate::model::Tag::default();
    let manual = ctx.shared.map(|s| &s.tag_manual).unwrap_or(&manual_default);
    let id3 = &ctx.song.tag_id3;
    let file_name_tag = &ctx.song.tag_file_name;

    match property {
        SongProperty::PrimaryAuthor => string_satisfied(ctx.primary_view().author(), comparison, value),
        SongProperty::PrimaryTitle => string_satisfied(ctx.primary_view().title(), comparison, value),
        SongProperty::PrimaryGenre => string_satisfied(ctx.primary_view().genre(), comparison, value),
        SongProperty::PrimaryMeasuresPerMinute => number_satisfied(ctx.primary_view().mpm(), comparison, value),

        SongProperty::ManualAuthor => {
            string_satisfied(manual.author.value().map(|s| s.as_str()), comparison, value)
        }
        SongProperty::ManualTitle => {
            string_satisfied(manual.title.value().map(|s| s.as_str()), comparison, value)
        }
        SongProperty::ManualGenre => {
            string_satisfied(manual.genre.value().map(|s| s.as_str()), comparison, value)
        }
        SongProperty::ManualMeasuresPerMinute => {
            number_satisfied(manual.measures_per_minute.value().copied(), comparison, value)
        }

        SongProperty::Id3Author => string_satisfied(id3.author.value().map(|s| s.as_str()), comparison, value),
        SongProperty::Id3Title => string_satisfied(id3.title.value().map(|s| s.as_str()), comparison, value),
        SongProperty::Id3Genre => string_satisfied(id3.genre.value().map(|s| s.as_str()), comparison, value),
        SongProperty::Id3MeasuresPerMinute => {
            number_satisfied(id3.measures_per_minute.value().copied(), comparison, value)
        }

        SongProperty::FileNameAuthor => {
            string_satisfied(file_name_tag.author.value().map(|s| s.as_str()), comparison, value)
        }
        SongProperty::FileNameTitle => {
            string_satisfied(file_name_tag.title.value().map(|s| s.as_str()), comparison, value)
        }
        SongProperty::FileNameGenre => {
            string_satisfied(file_name_tag.genre.value().map(|s| s.as_str()), comparison, value)
        }
        SongProperty::FileNameMeasuresPerMinute => {
            number_satisfied(file_name_tag.measures_per_minute.value().copied(), comparison, value)
        }

        SongProperty::FileName => string_satisfied(Some(ctx.song.file_name.as_str()), comparison, value),
        SongProperty::Notes => string_satisfied(
            ctx.shared.and_then(|s| s.notes.value()).map(|s| s.as_str()),
            comparison,
            value,
        ),
        SongProperty::Length => {
            number_satisfied(ctx.shared.and_then(|s| s.length.value()).copied(), comparison, value)
        }
        SongProperty::DetectedTempo => number_satisfied(
            ctx.shared.and_then(|s| s.detected_tempo.value()).copied(),
            comparison,
            value,
        ),
        SongProperty::LocalRating => {
            number_satisfied(ctx.shared.and_then(|s| s.rating.local.value()).copied(), comparison, value)
        }
        SongProperty::RhythmClarityRating => number_satisfied(
            ctx.shared.and_then(|s| s.rating.rhythm_clarity.value()).copied(),
            comparison,
            value,
        ),
        SongProperty::GenreTypicalityRating => number_satisfied(
            ctx.shared.and_then(|s| s.rating.genre_typicality.value()).copied(),
            comparison,
            value,
        ),
        SongProperty::PopularityRating => number_satisfied(
            ctx.shared.and_then(|s| s.rating.popularity.value()).copied(),
            comparison,
            value,
        ),
        SongProperty::WarningCount => {
            let view = ctx.primary_view();
            let count = crate::model::song_warnings(&view, ctx.shared).len() as f64;
            number_satisfied(Some(count), comparison, value)
        }
        SongProperty::LastPlayed => {
            let ts = ctx.shared.and_then(|s| s.last_played.value()).map(|dt| dt.timestamp() as f64);
            number_satisfied(ts, comparison, value)
        }
    }
}

/// String comparisons treat a missing/empty actual value as satisfying only
/// `NotContains`, matching the original's `isStringComparisonSatisfiedBy`.
fn string_satisfied(actual: Option<&str>, comparison: Comparison, value: &Value) -> bool {
    let Value::String(expected) = value else {
        return false;
    };
    let actual = match actual {
        Some(s) if !s.is_empty() => s,
        _ => return comparison == Comparison::NotContains,
    };
    let actual_lower = actual.to_lowercase();
    let expected_lower = expected.to_lowercase();
    match comparison {
        Comparison::Equal => actual_lower == expected_lower,
        Comparison::NotEqual => actual_lower != expected_lower,
        Comparison::Contains => actual_lower.contains(&expected_lower),
        Comparison::NotContains => !actual_lower.contains(&expected_lower),
        Comparison::GreaterThan => actual_lower > expected_lower,
        Comparison::GreaterThanOrEqual => actual_lower >= expected_lower,
        Comparison::LessThan => actual_lower < expected_lower,
        Comparison::LessThanOrEqual => actual_lower <= expected_lower,
    }
}

const NUMBER_EPS: f64 = 1e-6;

/// Numeric comparisons: an absent actual value is unconditionally `false`
/// for every comparator, including `Contains`/`NotContains`. This follows
/// the original `isNumberComparisonSatisfiedBy(DatedOptional<double>)`
/// rather than treating absence as satisfying `NotContains` the way strings
/// do — an unscanned tempo should not quietly pass a "tempo not like X" filter.
fn number_satisfied(actual: Option<f64>, comparison: Comparison, value: &Value) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    let Value::Number(expected) = value else {
        return false;
    };
    match comparison {
        Comparison::Equal => (actual - expected).abs() < NUMBER_EPS,
        Comparison::NotEqual => (actual - expected).abs() >= NUMBER_EPS,
        Comparison::Contains => actual.to_string().contains(&expected.to_string()),
        Comparison::NotContains => !actual.to_string().contains(&expected.to_string()),
        Comparison::GreaterThan => actual.partial_cmp(expected) == Some(Ordering::Greater),
        Comparison::GreaterThanOrEqual => actual >= *expected - NUMBER_EPS,
        Comparison::LessThan => actual.partial_cmp(expected) == Some(Ordering::Less),
        Comparison::LessThanOrEqual => actual <= *expected + NUMBER_EPS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tag;

    fn song_with_genre(genre: &str) -> Song {
        let mut song = Song::new("f.mp3", 0);
        song.tag_id3.genre.set(genre.to_string());
        song
    }

    fn ctx(song: &Song) -> EvalContext<'_> {
        EvalContext { song, shared: None }
    }

    #[test]
    fn noop_filter_always_satisfied() {
        let filter = Filter::noop();
        let song = Song::new("x.mp3", 0);
        assert!(filter.is_satisfied_by(&ctx(&song)));
    }

    #[test]
    fn string_comparison_is_case_insensitive() {
        let mut filter = Filter::noop();
        filter.nodes[0] = Node::Comparison {
            property: SongProperty::PrimaryGenre,
            comparison: Comparison::Equal,
            value: Value::String("sw".to_string()),
        };
        let song = song_with_genre("SW");
        assert!(filter.is_satisfied_by(&ctx(&song)));
    }

    /// spec.md §8 scenario (b): manual genre "SW", id3 genre "TG". A filter
    /// on the primary view sees manual first; filters on a specific source
    /// must bypass that precedence and see only their own source.
    #[test]
    fn per_source_properties_bypass_primary_view_precedence() {
        let mut song = Song::new("f.mp3", 0);
        song.tag_id3.genre.set("TG".to_string());

        let shared = {
            let mut s = SongSharedData::new(crate::model::ContentHash([0u8; 20]));
            s.tag_manual.genre.set("SW".to_string());
            s
        };
        let context = EvalContext { song: &song, shared: Some(&shared) };

        let mut filter = Filter::noop();
        filter.nodes[0] = Node::Comparison {
            property: SongProperty::ManualGenre,
            comparison: Comparison::Equal,
            value: Value::String("sw".to_string()),
        };
        assert!(filter.is_satisfied_by(&context));

        filter.nodes[0] = Node::Comparison {
            property: SongProperty::Id3Genre,
            comparison: Comparison::Equal,
            value: Value::String("tg".to_string()),
        };
        assert!(filter.is_satisfied_by(&context));

        filter.nodes[0] = Node::Comparison {
            property: SongProperty::ManualGenre,
            comparison: Comparison::NotEqual,
            value: Value::String("SW".to_string()),
        };
        assert!(!filter.is_satisfied_by(&context));
    }

    #[test]
    fn warning_count_reflects_song_warnings() {
        let mut song = Song::new("f.mp3", 0);
        song.tag_id3.genre.set("TG".to_string());
        song.tag_file_name.genre.set("SW".to_string());
        let context = EvalContext { song: &song, shared: None };

        let mut filter = Filter::noop();
        filter.nodes[0] = Node::Comparison {
            property: SongProperty::WarningCount,
            comparison: Comparison::GreaterThanOrEqual,
            value: Value::Number(1.0),
        };
        assert!(filter.is_satisfied_by(&context));
    }

    #[test]
    fn missing_string_only_satisfies_not_contains() {
        let mut filter = Filter::noop();
        filter.nodes[0] = Node::Comparison {
            property: SongProperty::PrimaryGenre,
            comparison: Comparison::Contains,
            value: Value::String("sw".to_string()),
        };
        let song = Song::new("x.mp3", 0);
        assert!(!filter.is_satisfied_by(&ctx(&song)));

        filter.nodes[0] = Node::Comparison {
            property: SongProperty::PrimaryGenre,
            comparison: Comparison::NotContains,
            value: Value::String("sw".to_string()),
        };
        assert!(filter.is_satisfied_by(&ctx(&song)));
    }

    #[test]
    fn missing_number_never_satisfies_any_comparator() {
        let song = Song::new("x.mp3", 0);
        for comparison in [
            Comparison::Equal,
            Comparison::NotEqual,
            Comparison::Contains,
            Comparison::NotContains,
            Comparison::GreaterThan,
            Comparison::LessThan,
        ] {
            let mut filter = Filter::noop();
            filter.nodes[0] = Node::Comparison {
                property: SongProperty::PrimaryMeasuresPerMinute,
                comparison,
                value: Value::Number(30.0),
            };
            assert!(!filter.is_satisfied_by(&ctx(&song)), "{comparison:?} should be false on absent");
        }
    }

    #[test]
    fn and_or_composite_dispatch() {
        let mut filter = Filter::noop();
        let a = filter.insert(Node::Comparison {
            property: SongProperty::PrimaryGenre,
            comparison: Comparison::Equal,
            value: Value::String("SW".to_string()),
        });
        let b = filter.insert(Node::Comparison {
            property: SongProperty::PrimaryGenre,
            comparison: Comparison::Equal,
            value: Value::String("VW".to_string()),
        });
        let or_node = filter.insert(Node::Or(vec![]));
        filter.add_child(or_node, a);
        filter.add_child(or_node, b);
        filter.nodes[0] = Node::And(vec![]);
        filter.parents[or_node] = Some(0);
        filter.nodes[0] = Node::And(vec![or_node]);

        let song = song_with_genre("VW");
        assert!(filter.is_satisfied_by(&ctx(&song)));
        assert!(filter.check_consistency());
    }

    #[test]
    fn hash_is_stable_and_shape_sensitive() {
        let f1 = Filter::noop();
        let f2 = Filter::noop();
        assert_eq!(f1.hash(), f2.hash());

        let mut f3 = Filter::noop();
        f3.nodes[0] = Node::Comparison {
            property: SongProperty::PrimaryGenre,
            comparison: Comparison::Equal,
            value: Value::String("SW".to_string()),
        };
        assert_ne!(f1.hash(), f3.hash());
    }

    #[test]
    fn remove_and_replace_child_maintain_parent_pointers() {
        let mut filter = Filter::noop();
        let a = filter.insert(Node::Noop);
        let b = filter.insert(Node::Noop);
        filter.nodes[0] = Node::And(vec![]);
        filter.add_child(0, a);
        assert_eq!(filter.parent(a), Some(0));

        filter.replace_child(0, a, b);
        assert_eq!(filter.parent(b), Some(0));
        assert_eq!(filter.parent(a), None);

        filter.remove_child(0, b);
        assert_eq!(filter.parent(b), None);
        assert!(filter.check_consistency());
    }
}
