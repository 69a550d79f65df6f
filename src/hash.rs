//! Content hash / length calculator (C12).
//!
//! Streams raw decoded PCM through SHA-1 to produce the identity a song's
//! [`crate::model::SongSharedData`] is keyed on, and reports the track
//! length implied by the sample count and format. Decoupled from the actual
//! decoder via [`PcmSource`] so it can be driven by either the real
//! [`crate::audio::decoder`] or a canned byte stream in tests.

use crate::model::ContentHash;
use sha1::{Digest, Sha1};
use std::io::Read;

/// Minimal decoded-audio source: raw interleaved sample bytes plus enough
/// format info to turn a byte count into seconds.
pub trait PcmSource {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    /// Bytes per sample per channel (2 for i16, 4 for f32).
    fn bytes_per_sample(&self) -> u16;
    /// Pull the next chunk of raw bytes. Returns an empty slice at EOF.
    fn next_chunk(&mut self) -> std::io::Result<Vec<u8>>;
}

/// Streams `source` to completion, returning its content hash and length in
/// seconds. Matches the original's `feedRawAudioDataTo` + running SHA-1.
pub fn hash_and_length(source: &mut dyn PcmSource) -> std::io::Result<(ContentHash, f64)> {
    let mut hasher = Sha1::new();
    let mut total_bytes: u64 = 0;

    loop {
        let chunk = source.next_chunk()?;
        if chunk.is_empty() {
            break;
        }
        hasher.update(&chunk);
        total_bytes += chunk.len() as u64;
    }

    let frame_bytes = source.channels() as u64 * source.bytes_per_sample() as u64;
    let length = if frame_bytes == 0 || source.sample_rate() == 0 {
        0.0
    } else {
        (total_bytes / frame_bytes) as f64 / source.sample_rate() as f64
    };

    let digest: [u8; 20] = hasher.finalize().into();
    Ok((ContentHash(digest), length))
}

/// Adapts any `Read` of raw PCM bytes into a [`PcmSource`] with a fixed
/// format, reading in 64 KiB chunks.
pub struct ReaderPcmSource<R> {
    reader: R,
    sample_rate: u32,
    channels: u16,
    bytes_per_sample: u16,
}

impl<R: Read> ReaderPcmSource<R> {
    pub fn new(reader: R, sample_rate: u32, channels: u16, bytes_per_sample: u16) -> Self {
        Self {
            reader,
            sample_rate,
            channels,
            bytes_per_sample,
        }
    }
}

impl<R: Read> PcmSource for ReaderPcmSource<R> {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn bytes_per_sample(&self) -> u16 {
        self.bytes_per_sample
    }

    fn next_chunk(&mut self) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; 64 * 1024];
        let n = self.reader.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_for_same_bytes() {
        let data = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut a = ReaderPcmSource::new(&data[..], 48_000, 2, 2);
        let mut b = ReaderPcmSource::new(&data[..], 48_000, 2, 2);
        let (hash_a, _) = hash_and_length(&mut a).unwrap();
        let (hash_b, _) = hash_and_length(&mut b).unwrap();
        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn length_derives_from_byte_count_and_format() {
        // 48000 frames/sec * 2 channels * 2 bytes = 192000 bytes/sec.
        let data = vec![0u8; 192_000 * 3];
        let mut src = ReaderPcmSource::new(&data[..], 48_000, 2, 2);
        let (_, length) = hash_and_length(&mut src).unwrap();
        assert!((length - 3.0).abs() < 1e-6);
    }

    #[test]
    fn differing_bytes_produce_differing_hashes() {
        let mut a = ReaderPcmSource::new(&[1u8, 2, 3][..], 48_000, 1, 2);
        let mut b = ReaderPcmSource::new(&[1u8, 2, 4][..], 48_000, 1, 2);
        let (hash_a, _) = hash_and_length(&mut a).unwrap();
        let (hash_b, _) = hash_and_length(&mut b).unwrap();
        assert_ne!(hash_a, hash_b);
    }
}
