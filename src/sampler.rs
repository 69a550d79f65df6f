//! Song-weight sampler (C15): turn a song's play history and ratings into a
//! sampling weight, then draw one candidate from a weighted population.
//!
//! Weight computation and the draw itself are kept pure and RNG-free so a
//! literal worked scenario (three weights, a fixed draw, a specific
//! winner) can be asserted directly, with the actual `rand` draw plugged
//! in by the caller (see [`draw_uniform`]).

use rand::Rng;

/// The three voted rating dimensions that feed into a song's weight, as
/// already resolved for one song (`None` = never rated).
#[derive(Debug, Clone, Copy, Default)]
pub struct RatingInputs {
    pub genre_typicality: Option<f64>,
    pub popularity: Option<f64>,
    pub rhythm_clarity: Option<f64>,
}

/// Base weight before any adjustment, per the original's `getSongWeight`.
pub const BASE_WEIGHT: f64 = 10000.0;

/// Compute a song's sampling weight.
///
/// `days_since_last_played` is `None` for a song that has never been played
/// (treated as an arbitrarily large recency gap, i.e. factor ~1).
/// `distances_from_end` lists, for every occurrence of this song already in
/// an optional reference playlist, how many items separate it from the end.
pub fn song_weight(
    days_since_last_played: Option<f64>,
    distances_from_end: &[f64],
    ratings: RatingInputs,
) -> i32 {
    let mut weight = BASE_WEIGHT;

    let days = days_since_last_played.unwrap_or(f64::MAX / 4.0);
    weight *= (days + 1.0) / (days + 2.0);

    for &distance in distances_from_end {
        weight *= (distance + 100.0) / (distance + 200.0);
    }

    for rating in [ratings.genre_typicality, ratings.popularity, ratings.rhythm_clarity] {
        weight *= match rating {
            Some(r) => (r + 1.0) / 5.0,
            None => 3.5 / 5.0,
        };
    }

    weight.clamp(0.0, i32::MAX as f64) as i32
}

/// Walk cumulative weights until `draw` falls inside one, mirroring the
/// original's linear-scan roulette wheel. `draw` must be in `[0, total)`
/// where `total` is the sum of all candidate weights; behavior for an
/// out-of-range draw is to fall off the end and return `None`.
pub fn weighted_pick<T>(candidates: &[(T, i32)], mut draw: i64) -> Option<&T> {
    for (item, weight) in candidates {
        if draw < *weight as i64 {
            return Some(item);
        }
        draw -= *weight as i64;
    }
    None
}

/// Draw a uniform integer in `[0, total)` using the process RNG. Kept as a
/// thin wrapper so callers can substitute a seeded RNG in tests without
/// touching `weighted_pick`'s pure logic.
pub fn draw_uniform(total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    rand::rng().random_range(0..total)
}

/// Pick a candidate matching a filter, weighted by `song_weight`. Candidates
/// already known to satisfy the filter and already deduplicated by shared
/// content (one entry per distinct hash) are passed in alongside their
/// precomputed weight. If the candidate list is empty, falls back to `avoid`
/// (a song that does NOT satisfy the filter is never a valid `avoid` value —
/// callers must check that themselves before passing one in).
pub fn pick_song<'a, T>(candidates: &'a [(T, i32)], avoid: Option<&'a T>, draw: i64) -> Option<&'a T> {
    let total: i64 = candidates.iter().map(|(_, w)| *w as i64).sum();
    if total > 0 {
        if let Some(picked) = weighted_pick(candidates, draw) {
            return Some(picked);
        }
    }
    avoid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_pick_matches_spec_scenario_c() {
        let candidates = vec![("a", 1000), ("b", 2000), ("c", 7000)];
        let picked = weighted_pick(&candidates, 5000).unwrap();
        assert_eq!(*picked, "c");
    }

    #[test]
    fn weighted_pick_selects_first_bucket() {
        let candidates = vec![("a", 1000), ("b", 2000), ("c", 7000)];
        assert_eq!(weighted_pick(&candidates, 0), Some(&"a"));
        assert_eq!(weighted_pick(&candidates, 999), Some(&"a"));
        assert_eq!(weighted_pick(&candidates, 1000), Some(&"b"));
    }

    #[test]
    fn sum_of_weights_equals_upper_bound_used_for_the_draw() {
        let candidates = vec![("a", 1000), ("b", 2000), ("c", 7000)];
        let total: i64 = candidates.iter().map(|(_, w)| *w as i64).sum();
        for draw in 0..total {
            assert!(weighted_pick(&candidates, draw).is_some());
        }
        assert!(weighted_pick(&candidates, total).is_none());
    }

    #[test]
    fn never_played_song_has_near_unity_recency_factor() {
        let never = song_weight(None, &[], RatingInputs::default());
        let just_played = song_weight(Some(0.0), &[], RatingInputs::default());
        assert!(never > just_played);
    }

    #[test]
    fn fully_rated_song_outweighs_unrated_song() {
        let unrated = song_weight(Some(30.0), &[], RatingInputs::default());
        let rated = song_weight(
            Some(30.0),
            &[],
            RatingInputs {
                genre_typicality: Some(5.0),
                popularity: Some(5.0),
                rhythm_clarity: Some(5.0),
            },
        );
        assert!(rated > unrated);
    }

    #[test]
    fn empty_candidates_fall_back_to_avoid() {
        let candidates: Vec<(&str, i32)> = vec![];
        assert_eq!(pick_song(&candidates, Some(&"fallback"), 0), Some(&"fallback"));
    }
}
