//! `tempo-detect` subcommand: run the tempo detector (C14) on one file
//! outside the background pool, for inspecting a single track's reading.

use crate::player::format_adapter::FormatAdapter;
use crate::tempo;
use std::path::Path;

pub fn run(path: &Path, genre: &str) -> anyhow::Result<()> {
    let mut adapter = FormatAdapter::create(path)?;
    let channels = adapter.channels().max(1) as usize;
    let sample_rate = adapter.sample_rate();

    let mut mono = Vec::new();
    let mut length_seconds = 0.0;
    adapter.feed_raw_audio_data_to(
        |interleaved| {
            mono.extend(interleaved.chunks_exact(channels).map(|frame| {
                frame.iter().sum::<f32>() / channels as f32
            }));
        },
        &mut length_seconds,
    )?;

    let result = tempo::detect_tempo(&mono, sample_rate, genre);
    if result.classes.is_empty() {
        println!("no beats detected in {}", path.display());
        return Ok(());
    }

    println!("{} ({length_seconds:.1}s, genre {genre}):", path.display());
    for class in &result.classes {
        println!("  {} BPM  ({:.1}% confidence)", class.tempo, class.confidence_percent);
    }
    if let Some(mpm) = result.adjusted_mpm {
        println!("adjusted MPM: {mpm:.1}");
    }
    Ok(())
}
