//! Resampler (C3): converts decoded PCM from the source format to the
//! output device's format — sample rate via `rubato`, channel layout via a
//! small in-house remap, sample representation to signed-16 or float-32.
//!
//! Grounded on a `rubato::FftFixedIn` resampler setup; generalized from a
//! fixed stereo pass-through into a channel-count-agnostic contract
//! (destination channel count in {1,2,4,5,6}) with scratch-buffer growth
//! reporting. The growth check uses `>=`, not `>`, to avoid growing the
//! buffer one frame too late.

use crate::error::{Error, Result};
use rubato::{FftFixedIn, Resampler as RubatoResampler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    I16,
    F32,
}

/// The output device's negotiated format. Channel count is restricted to
/// the five standard layouts the resampler knows how to remap into.
#[derive(Debug, Clone, Copy)]
pub struct DeviceFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl DeviceFormat {
    pub fn bytes_per_frame(&self) -> usize {
        let sample_size = match self.sample_format {
            SampleFormat::I16 => 2,
            SampleFormat::F32 => 4,
        };
        self.channels as usize * sample_size
    }

    pub fn bytes_per_second(&self) -> usize {
        self.bytes_per_frame() * self.sample_rate as usize
    }
}

const CHUNK_SIZE: usize = 1024;

/// Source-to-device sample-rate and channel-layout conversion, with the
/// final step of packing into signed-16 or float-32 interleaved bytes.
pub struct Resampler {
    source_rate: u32,
    source_channels: u16,
    device: DeviceFormat,
    rate_converter: Option<FftFixedIn<f32>>,
    input_buffer: Vec<Vec<f32>>,
    scratch: Vec<f32>,
}

impl Resampler {
    /// Build a resampler from a source stream's format to `device`.
    /// Rejects destination channel counts outside {1,2,4,5,6} and is
    /// otherwise infallible — rate and channel mismatches are both handled
    /// by the conversion pipeline, never refused.
    pub fn new(source_rate: u32, source_channels: u16, device: DeviceFormat) -> Result<Self> {
        if !matches!(device.channels, 1 | 2 | 4 | 5 | 6) {
            return Err(Error::UnsupportedChannelLayout(device.channels));
        }

        let rate_converter = if source_rate == device.sample_rate {
            None
        } else {
            Some(
                FftFixedIn::<f32>::new(
                    source_rate as usize,
                    device.sample_rate as usize,
                    CHUNK_SIZE,
                    2,
                    source_channels as usize,
                )
                .map_err(|e| Error::Codec(format!("failed to build resampler: {e}")))?,
            )
        };

        Ok(Self {
            source_rate,
            source_channels,
            device,
            rate_converter,
            input_buffer: vec![Vec::new(); source_channels as usize],
            scratch: Vec::with_capacity(CHUNK_SIZE * 2),
        })
    }

    pub fn ratio(&self) -> f64 {
        self.device.sample_rate as f64 / self.source_rate as f64
    }

    /// Push one block of interleaved source-format `f32` samples, returning
    /// the resulting bytes in the device's sample format. May return an
    /// empty vec if not enough input has accumulated yet to run a chunk.
    pub fn process(&mut self, input: &[f32]) -> Vec<u8> {
        let converted = self.convert_rate(input);
        let remapped = remap_channels(&converted, self.source_channels, self.device.channels);
        self.ensure_scratch_capacity(remapped.len());
        pack_samples(&remapped, self.device.sample_format)
    }

    /// Flush whatever partial chunk remains buffered (end of stream).
    pub fn flush(&mut self) -> Vec<u8> {
        let Some(ref mut conv) = self.rate_converter else {
            return Vec::new();
        };
        let remaining = self.input_buffer[0].len();
        if remaining == 0 {
            return Vec::new();
        }
        let pad_needed = CHUNK_SIZE - remaining;
        for ch in &mut self.input_buffer {
            ch.extend(std::iter::repeat_n(0.0, pad_needed));
        }
        let chunks: Vec<Vec<f32>> = self.input_buffer.drain(..).collect();
        self.input_buffer = vec![Vec::new(); self.source_channels as usize];

        let expected_frames = (remaining as f64 * self.ratio()).ceil() as usize;
        let mut interleaved = Vec::new();
        if let Ok(resampled) = conv.process(&chunks, None)
            && !resampled.is_empty()
        {
            let frames = resampled[0].len().min(expected_frames);
            for frame in 0..frames {
                for ch in &resampled {
                    interleaved.push(ch[frame]);
                }
            }
        }
        let remapped = remap_channels(&interleaved, self.source_channels, self.device.channels);
        pack_samples(&remapped, self.device.sample_format)
    }

    pub fn reset(&mut self) {
        for ch in &mut self.input_buffer {
            ch.clear();
        }
        if let Some(ref mut conv) = self.rate_converter {
            conv.reset();
        }
    }

    fn convert_rate(&mut self, input: &[f32]) -> Vec<f32> {
        let Some(ref mut conv) = self.rate_converter else {
            return input.to_vec();
        };
        let channels = self.source_channels as usize;
        for (i, sample) in input.iter().enumerate() {
            self.input_buffer[i % channels].push(*sample);
        }

        let mut output = Vec::new();
        while self.input_buffer[0].len() >= CHUNK_SIZE {
            let chunks: Vec<Vec<f32>> = self
                .input_buffer
                .iter_mut()
                .map(|ch| ch.drain(..CHUNK_SIZE).collect())
                .collect();
            match conv.process(&chunks, None) {
                Ok(resampled) if !resampled.is_empty() => {
                    let frames = resampled[0].len();
                    for frame in 0..frames {
                        for ch in &resampled {
                            output.push(ch[frame]);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("resampling error: {e}"),
            }
        }
        output
    }

    fn ensure_scratch_capacity(&mut self, needed: usize) {
        if needed >= self.scratch.capacity() {
            let new_cap = (needed + 1).next_power_of_two();
            tracing::debug!(
                old = self.scratch.capacity(),
                new = new_cap,
                "resampler scratch buffer growing"
            );
            self.scratch.reserve(new_cap - self.scratch.capacity());
        }
    }
}

/// Map `source_channels` interleaved samples onto `dest_channels`. Mono
/// sources are duplicated across the first two destination channels;
/// multi-channel sources are downmixed to mono by averaging, or truncated
/// to the destination's front channels when upmixing would otherwise lose
/// information; any destination channel beyond the source's own is
/// silence.
fn remap_channels(interleaved: &[f32], source_channels: u16, dest_channels: u16) -> Vec<f32> {
    let src = source_channels as usize;
    let dst = dest_channels as usize;
    if src == dst {
        return interleaved.to_vec();
    }
    let frames = interleaved.len() / src.max(1);
    let mut out = Vec::with_capacity(frames * dst);
    for frame in 0..frames {
        let base = frame * src;
        let frame_samples = &interleaved[base..base + src];
        match (src, dst) {
            (1, _) => {
                for ch in 0..dst {
                    out.push(if ch < 2 { frame_samples[0] } else { 0.0 });
                }
            }
            (_, 1) => {
                let avg = frame_samples.iter().sum::<f32>() / src as f32;
                out.push(avg);
            }
            _ => {
                for ch in 0..dst {
                    out.push(frame_samples.get(ch).copied().unwrap_or(0.0));
                }
            }
        }
    }
    out
}

/// Inverse of [`pack_samples`]: unpack device-format interleaved bytes back
/// into `f32` samples. Used by the audio output (C6) to apply volume and
/// tempo scaling to bytes the playback buffer already holds in device
/// format.
pub fn unpack_samples(bytes: &[u8], format: SampleFormat) -> Vec<f32> {
    match format {
        SampleFormat::F32 => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect(),
        SampleFormat::I16 => bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes(c.try_into().unwrap()) as f32 / i16::MAX as f32)
            .collect(),
    }
}

pub fn pack_samples(samples: &[f32], format: SampleFormat) -> Vec<u8> {
    match format {
        SampleFormat::F32 => samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
        SampleFormat::I16 => samples
            .iter()
            .flat_map(|s| {
                let clamped = s.clamp(-1.0, 1.0);
                let v = (clamped * i16::MAX as f32) as i16;
                v.to_le_bytes()
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_device(rate: u32) -> DeviceFormat {
        DeviceFormat {
            sample_rate: rate,
            channels: 2,
            sample_format: SampleFormat::F32,
        }
    }

    #[test]
    fn passthrough_when_rate_and_channels_match() {
        let mut r = Resampler::new(48000, 2, stereo_device(48000)).unwrap();
        let input = vec![0.1, 0.2, 0.3, 0.4];
        let bytes = r.process(&input);
        let floats: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(floats, input);
    }

    #[test]
    fn rejects_unsupported_channel_count() {
        let device = DeviceFormat {
            sample_rate: 48000,
            channels: 3,
            sample_format: SampleFormat::F32,
        };
        assert!(Resampler::new(48000, 2, device).is_err());
    }

    #[test]
    fn mono_source_duplicates_into_stereo() {
        let out = remap_channels(&[0.5, 0.25], 1, 2);
        assert_eq!(out, vec![0.5, 0.5, 0.25, 0.25]);
    }

    #[test]
    fn stereo_source_downmixes_to_mono_by_average() {
        let out = remap_channels(&[1.0, 0.0, 0.0, 1.0], 2, 1);
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn i16_packing_clamps_and_scales() {
        let bytes = pack_samples(&[1.5, -1.5, 0.0], SampleFormat::I16);
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(samples, vec![i16::MAX, -i16::MAX, 0]);
    }
}
