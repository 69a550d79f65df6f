//! Tempo detector (C14): a DSP pipeline over decoded mono 48 kHz PCM that
//! produces a tempo estimate, a confidence score, and a usable MPM adjusted
//! into a genre's competition range.
//!
//! Grounded on `TempoDetector.cpp`'s five-stage pipeline (level extraction,
//! beat picking, histogram, confidence grouping) plus `Song::adjustMpm`
//! (declared in `Song.h`, used from `DlgTempoDetect.cpp`, but not present in
//! the retrieved source — its exact body is reconstructed here from three
//! worked examples; see the doc comment on [`adjust_mpm`]).

use crate::model::competition_tempo_range_for_genre;
use std::collections::BTreeMap;

/// Which windowed level-extraction algorithm to run over the PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelAlgorithm {
    SumDist,
    MinMax,
    DiscreetSineTransform,
    SumDistMinMax,
}

const DST_PERIODS: [usize; 4] = [600, 250, 109, 48];

/// Slide a `window_size`-sample window across `samples` in `stride`-sample
/// hops, producing one level value per window.
pub fn extract_levels(samples: &[f32], window_size: usize, stride: usize, algo: LevelAlgorithm) -> Vec<f32> {
    if window_size == 0 || stride == 0 || samples.len() < window_size {
        return Vec::new();
    }
    let mut levels = Vec::with_capacity((samples.len() - window_size) / stride + 1);
    let mut start = 0;
    while start + window_size <= samples.len() {
        let window = &samples[start..start + window_size];
        levels.push(match algo {
            LevelAlgorithm::SumDist => level_sum_dist(window),
            LevelAlgorithm::MinMax => level_min_max(window),
            LevelAlgorithm::DiscreetSineTransform => level_dst(window),
            LevelAlgorithm::SumDistMinMax => level_sum_dist(window) * level_min_max(window),
        });
        start += stride;
    }
    levels
}

fn level_sum_dist(window: &[f32]) -> f32 {
    window.windows(2).map(|w| (w[1] - w[0]).abs()).sum()
}

fn level_min_max(window: &[f32]) -> f32 {
    let mut lo = f32::INFINITY;
    let mut hi = f32::NEG_INFINITY;
    for &s in window {
        lo = lo.min(s);
        hi = hi.max(s);
    }
    hi - lo
}

fn level_dst(window: &[f32]) -> f32 {
    DST_PERIODS
        .iter()
        .map(|&period| {
            let proj: f32 = window
                .iter()
                .enumerate()
                .map(|(i, &s)| s * (2.0 * std::f32::consts::PI * i as f32 / period as f32).sin())
                .sum();
            proj.abs()
        })
        .sum()
}

/// A simple moving-average smoother over the level sequence, an optional
/// normalization pass between level extraction and beat picking.
pub fn moving_average(levels: &[f32], window: usize) -> Vec<f32> {
    if window <= 1 || levels.is_empty() {
        return levels.to_vec();
    }
    let mut out = Vec::with_capacity(levels.len());
    let mut sum = 0.0f32;
    for i in 0..levels.len() {
        sum += levels[i];
        if i >= window {
            sum -= levels[i - window];
        }
        let n = (i + 1).min(window) as f32;
        out.push(sum / n);
    }
    out
}

/// A detected beat: its index into the level sequence and its picking weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Beat {
    pub index: usize,
    pub weight: f64,
}

/// Declare sample `i` a beat iff it is a strict local maximum over
/// `[i - local_max_distance, i + local_max_distance]`, weight it by
/// `level[i] * local_max_distance / (sum over the window)`, keep the
/// heaviest `floor(120 * song_length_seconds / 60)` beats, then resort by
/// position.
pub fn pick_beats(levels: &[f32], local_max_distance: usize, song_length_seconds: f64) -> Vec<Beat> {
    if levels.is_empty() || local_max_distance == 0 {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    for i in 0..levels.len() {
        let lo = i.saturating_sub(local_max_distance);
        let hi = (i + local_max_distance).min(levels.len() - 1);
        let window = &levels[lo..=hi];
        let is_local_max = window.iter().enumerate().all(|(j, &v)| lo + j == i || v < levels[i]);
        if !is_local_max {
            continue;
        }
        let window_sum: f32 = window.iter().sum();
        if window_sum <= 0.0 {
            continue;
        }
        let weight = levels[i] as f64 * local_max_distance as f64 / window_sum as f64;
        candidates.push(Beat { index: i, weight });
    }

    candidates.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap());
    let keep = ((120.0 * song_length_seconds / 60.0).floor().max(0.0)) as usize;
    candidates.truncate(keep);
    candidates.sort_by_key(|b| b.index);
    candidates
}

/// Rounded-integer-BPM histogram of inter-beat tempos, folded into
/// `[min_tempo, max_tempo]` by halving anything above `max_tempo` (the
/// halved count is added, also halved, to the destination bin).
pub fn build_tempo_histogram(
    beats: &[Beat],
    samples_per_second: f64,
    min_tempo: u32,
    max_tempo: u32,
) -> BTreeMap<u32, f64> {
    let mut raw: BTreeMap<u32, f64> = BTreeMap::new();
    for i in 0..beats.len() {
        for offset in [-2i64, -1, 1, 2] {
            let j = i as i64 + offset;
            if j < 0 || j as usize >= beats.len() {
                continue;
            }
            let j = j as usize;
            let delta_samples = (beats[j].index as i64 - beats[i].index as i64).unsigned_abs() as f64;
            if delta_samples == 0.0 {
                continue;
            }
            let delta_seconds = delta_samples / samples_per_second;
            let bpm = (60.0 / delta_seconds).round() as i64;
            if bpm <= 0 {
                continue;
            }
            *raw.entry(bpm as u32).or_insert(0.0) += 1.0;
        }
    }

    let mut folded: BTreeMap<u32, f64> = BTreeMap::new();
    for (tempo, count) in raw {
        if tempo < min_tempo {
            continue;
        }
        if tempo <= max_tempo {
            *folded.entry(tempo).or_insert(0.0) += count;
            continue;
        }
        let mut t = tempo;
        let mut c = count;
        while t > max_tempo {
            t /= 2;
            c /= 2.0;
        }
        *folded.entry(t).or_insert(0.0) += c;
    }
    folded
}

/// Two tempos are compatible if one is within the other multiplied by any of
/// `{1,2,3,4,6,8,12,16}`, tolerating a drift of that multiplier's own value.
fn is_compatible_tempo(a: i64, b: i64) -> bool {
    const MULTIPLIERS: [i64; 8] = [1, 2, 3, 4, 6, 8, 12, 16];
    MULTIPLIERS
        .iter()
        .any(|&m| (a - b * m).abs() < m || (a * m - b).abs() < m)
}

/// A compatibility class: its representative tempo (the lowest member) and
/// its confidence, as a percentage of the histogram's total count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceClass {
    pub tempo: u32,
    pub confidence_percent: f64,
}

/// Partition the histogram into compatibility classes and return them
/// sorted by confidence, highest first.
pub fn group_by_confidence(histogram: &BTreeMap<u32, f64>) -> Vec<ConfidenceClass> {
    let total: f64 = histogram.values().sum();
    if total <= 0.0 {
        return Vec::new();
    }

    let mut remaining: Vec<(u32, f64)> = histogram.iter().map(|(&t, &c)| (t, c)).collect();
    let mut classes = Vec::new();

    while !remaining.is_empty() {
        let lowest = remaining.iter().map(|&(t, _)| t).min().unwrap();
        let mut sum = 0.0;
        remaining.retain(|&(t, c)| {
            if is_compatible_tempo(lowest as i64, t as i64) {
                sum += c;
                false
            } else {
                true
            }
        });
        classes.push(ConfidenceClass {
            tempo: lowest,
            confidence_percent: 100.0 * sum / total,
        });
    }

    classes.sort_by(|a, b| b.confidence_percent.partial_cmp(&a.confidence_percent).unwrap());
    classes
}

/// The three genres the original documents as conventionally 3-beats-per-measure
/// and prone to the detector locking onto a tripled tempo.
const TRIPLE_TIME_GENRES: [&str; 3] = ["SW", "VW", "BL"];

/// Adjust a detected integer tempo into a genre's competition range.
///
/// Tries doubling the tempo (while it is below the range) and halving it
/// (while it is above the range), returning the first value that lands
/// inside `[low, high]`. If neither search lands inside the range and the
/// genre is one of the conventionally triple-time genres, falls back to a
/// plain `tempo / 3` (the detector's most common failure mode for those
/// genres is locking onto 3x the true tempo) even though that value is not
/// guaranteed to be within range. Otherwise returns the original tempo
/// unadjusted.
///
/// This ordering (doubling, then halving, then the `/3` fallback) was
/// reconstructed from three worked examples rather than from
/// `Song::adjustMpm`'s body, which was not present in the retrieved source:
/// a textual description of the algorithm lists the `/3` family before
/// halving, but that order does not reproduce the halving-based answers
/// worked out for SW.
pub fn adjust_mpm(detected_tempo: f64, genre: &str) -> f64 {
    let (low, high) = competition_tempo_range_for_genre(genre);
    let (low, high) = (low as f64, high as f64);

    if detected_tempo >= low && detected_tempo <= high {
        return detected_tempo;
    }

    if detected_tempo < low {
        let mut t = detected_tempo;
        for _ in 0..8 {
            t *= 2.0;
            if t >= low && t <= high {
                return t;
            }
            if t > high {
                break;
            }
        }
    }

    if detected_tempo > high {
        let mut t = detected_tempo;
        for _ in 0..8 {
            t /= 2.0;
            if t >= low && t <= high {
                return t;
            }
            if t < low {
                break;
            }
        }
    }

    if TRIPLE_TIME_GENRES.contains(&genre.to_uppercase().as_str()) {
        return detected_tempo / 3.0;
    }

    detected_tempo
}

/// Fixed window/stride/local-max parameters the original's `DlgTempoDetect`
/// uses for its one-shot "detect tempo for this file" action, as opposed to
/// the multi-algorithm sweep exposed per-stage above for interactive tuning.
const DEFAULT_WINDOW_SIZE: usize = 1024;
const DEFAULT_STRIDE: usize = 512;
const DEFAULT_LOCAL_MAX_DISTANCE: usize = 4;

/// Result of running the full pipeline once over a decoded track.
#[derive(Debug, Clone)]
pub struct TempoResult {
    pub classes: Vec<ConfidenceClass>,
    /// The highest-confidence class's tempo, adjusted into the genre's
    /// competition range by [`adjust_mpm`]; `None` if no beats were found.
    pub adjusted_mpm: Option<f64>,
}

/// Run the five-stage pipeline end to end over mono PCM at `sample_rate`,
/// then adjust the winning class into `genre`'s competition range.
///
/// Grounded on this module's own stage functions, chained the way
/// `TempoDetector.cpp`'s top-level scan drives them: level extraction with
/// [`LevelAlgorithm::SumDistMinMax`] (the original's default), a short
/// moving average to denoise, beat picking, histogram folding into the
/// genre's own tempo range, and confidence grouping.
pub fn detect_tempo(samples: &[f32], sample_rate: u32, genre: &str) -> TempoResult {
    let song_length_seconds = samples.len() as f64 / sample_rate.max(1) as f64;
    let levels = extract_levels(samples, DEFAULT_WINDOW_SIZE, DEFAULT_STRIDE, LevelAlgorithm::SumDistMinMax);
    let levels = moving_average(&levels, 3);
    let beats = pick_beats(&levels, DEFAULT_LOCAL_MAX_DISTANCE, song_length_seconds);

    let samples_per_second = sample_rate as f64 / DEFAULT_STRIDE as f64;
    let (min_tempo, max_tempo) = competition_tempo_range_for_genre(genre);
    let (min_tempo, max_tempo) = if min_tempo == 0 && max_tempo == u16::MAX {
        (20, 400)
    } else {
        (min_tempo as u32, max_tempo as u32 * 4)
    };
    let histogram = build_tempo_histogram(&beats, samples_per_second, min_tempo, max_tempo);
    let classes = group_by_confidence(&histogram);
    let adjusted_mpm = classes.first().map(|c| adjust_mpm(c.tempo as f64, genre));

    TempoResult { classes, adjusted_mpm }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_dist_is_zero_for_constant_window() {
        let window = vec![1.0f32; 8];
        assert_eq!(level_sum_dist(&window), 0.0);
    }

    #[test]
    fn min_max_tracks_range() {
        let window = vec![1.0f32, 5.0, -2.0, 3.0];
        assert_eq!(level_min_max(&window), 7.0);
    }

    #[test]
    fn pick_beats_finds_strict_local_maxima() {
        let levels = vec![0.0, 1.0, 5.0, 1.0, 0.0, 0.0, 4.0, 0.0];
        let beats = pick_beats(&levels, 1, 60.0 * 120.0 / 120.0);
        let indices: Vec<usize> = beats.iter().map(|b| b.index).collect();
        assert!(indices.contains(&2));
        assert!(indices.contains(&6));
    }

    #[test]
    fn histogram_folds_high_tempos_into_range() {
        let beats = vec![
            Beat { index: 0, weight: 1.0 },
            Beat { index: 12_000, weight: 1.0 },
        ];
        // 12000 samples at 48000 Hz = 0.25s apart -> 240 BPM raw.
        let histogram = build_tempo_histogram(&beats, 48_000.0, 60, 180);
        assert!(histogram.contains_key(&120));
        assert!(!histogram.contains_key(&240));
    }

    #[test]
    fn compatibility_grouping_merges_octave_multiples() {
        let mut histogram = BTreeMap::new();
        histogram.insert(30u32, 10.0);
        histogram.insert(60u32, 5.0);
        histogram.insert(90u32, 1.0);
        let classes = group_by_confidence(&histogram);
        assert_eq!(classes[0].tempo, 30);
        assert!((classes[0].confidence_percent - 100.0).abs() < 1e-9);
    }

    #[test]
    fn mpm_adjustment_matches_worked_examples() {
        assert_eq!(adjust_mpm(120.0, "SW"), 30.0);
        assert_eq!(adjust_mpm(56.0, "SW"), 28.0);
        assert_eq!(adjust_mpm(90.0, "VW"), 30.0);
    }

    #[test]
    fn already_in_range_tempo_is_unchanged() {
        assert_eq!(adjust_mpm(29.0, "SW"), 29.0);
    }
}
