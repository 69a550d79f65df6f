//! Format adapter (C2): open a file, probe its container, decode packets
//! into interleaved `f32` PCM, and either push the result (resampled to a
//! sink's device format) or stream it raw to a byte-oriented consumer such
//! as the hash calculator (C12) or tempo detector (C14).
//!
//! Grounded on a `symphonia`-based `AudioDecoder`; kept almost unchanged
//! for the probe/decode/seek mechanics, generalized to a
//! `create` / `route_audio_to` / `decode` / `feed_raw_audio_data_to`
//! shape with a cooperative-cancellation contract.

use crate::error::{Error, Result};
use crate::hash::PcmSource;
use crate::player::resampler::{DeviceFormat, Resampler};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

/// A downstream consumer of resampled, device-format bytes. `write`
/// returns `false` when the sink wants decoding to stop — e.g. a
/// [`crate::player::playback_buffer::PlaybackBuffer`] that has been
/// aborted.
pub trait AudioSink {
    fn device_format(&self) -> DeviceFormat;
    fn write(&mut self, bytes: &[u8]) -> bool;
}

pub struct FormatAdapter {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    duration: Duration,
    time_base: Option<symphonia::core::units::TimeBase>,
    should_terminate: Arc<AtomicBool>,
}

impl FormatAdapter {
    /// Open `path`, probing its container and selecting the first audio
    /// track. No partial state survives a failed open (§4.2).
    pub fn create(path: &Path) -> Result<Self> {
        let file =
            File::open(path).map_err(|e| Error::Codec(format!("{}: {e}", path.display())))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension() {
            hint.with_extension(&ext.to_string_lossy());
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let metadata_opts = MetadataOptions::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &metadata_opts)
            .map_err(|e| Error::Codec(format!("unsupported container: {e}")))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Codec("no audio track found".into()))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| Error::Codec("unknown sample rate".into()))?;
        let channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(2);

        let time_base = codec_params.time_base;
        let duration = match codec_params.n_frames {
            Some(n_frames) => match time_base {
                Some(tb) => {
                    let time = tb.calc_time(n_frames);
                    Duration::from_secs_f64(time.seconds as f64 + time.frac)
                }
                None => Duration::from_secs_f64(n_frames as f64 / sample_rate as f64),
            },
            None => Duration::ZERO,
        };

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Codec(format!("unsupported codec: {e}")))?;

        Ok(Self {
            reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            duration,
            time_base,
            should_terminate: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Shared flag a caller can set to request `decode`/`feed_raw_audio_data_to`
    /// stop at the next packet boundary.
    pub fn should_terminate_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.should_terminate)
    }

    pub fn seek(&mut self, seconds: f64) -> Result<()> {
        if self.duration.is_zero() {
            return Ok(());
        }
        let seek_to = SeekTo::Time {
            time: Time::from(seconds),
            track_id: Some(self.track_id),
        };
        self.reader
            .seek(SeekMode::Accurate, seek_to)
            .map_err(|e| Error::Codec(format!("seek failed: {e}")))?;
        self.decoder.reset();
        Ok(())
    }

    /// Pull one decoded frame of interleaved `f32` samples, or `None` at
    /// end of stream.
    fn decode_next_raw(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            if self.should_terminate.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(Error::Codec(e.to_string())),
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(Error::Codec(e.to_string())),
            };
            return Ok(Some(convert_to_f32(&decoded)));
        }
    }

    /// Route the decoded, resampled stream into `sink` until end of stream,
    /// abort, or the sink refuses further data (§4.2 `decode`). The
    /// resampler is constructed lazily from the first frame's format and
    /// the sink's declared device format.
    pub fn decode(&mut self, sink: &mut dyn AudioSink) -> Result<()> {
        let device = sink.device_format();
        let mut resampler: Option<Resampler> = None;

        while let Some(samples) = self.decode_next_raw()? {
            let resampler = match &mut resampler {
                Some(r) => r,
                None => {
                    resampler = Some(Resampler::new(self.sample_rate, self.channels, device)?);
                    resampler.as_mut().unwrap()
                }
            };
            let bytes = resampler.process(&samples);
            if !bytes.is_empty() && !sink.write(&bytes) {
                return Ok(());
            }
        }
        if let Some(r) = &mut resampler {
            let tail = r.flush();
            if !tail.is_empty() {
                sink.write(&tail);
            }
        }
        Ok(())
    }

    /// Stream raw (un-resampled) decoded samples to `callback`, reporting
    /// the total length in seconds. Used by the hash/length calculator
    /// (C12) and the tempo detector (C14), neither of which wants the
    /// device-format conversion (§4.2 `feed_raw_audio_data_to`).
    pub fn feed_raw_audio_data_to(
        &mut self,
        mut callback: impl FnMut(&[f32]),
        out_length_seconds: &mut f64,
    ) -> Result<()> {
        let mut total_frames: u64 = 0;
        while let Some(samples) = self.decode_next_raw()? {
            total_frames += samples.len() as u64 / self.channels.max(1) as u64;
            callback(&samples);
        }
        *out_length_seconds = if self.sample_rate == 0 {
            0.0
        } else {
            total_frames as f64 / self.sample_rate as f64
        };
        Ok(())
    }

    /// Wrap this adapter as a [`PcmSource`] of raw `f32` PCM, for driving
    /// [`crate::hash::hash_and_length`] directly.
    pub fn into_pcm_source(self) -> FormatAdapterPcmSource {
        FormatAdapterPcmSource { adapter: self }
    }
}

fn convert_to_f32(buffer: &AudioBufferRef) -> Vec<f32> {
    match buffer {
        AudioBufferRef::F32(buf) => {
            let planes = buf.planes();
            let plane_slice = planes.planes();
            if plane_slice.is_empty() {
                return Vec::new();
            }
            let frames = plane_slice[0].len();
            let mut output = Vec::with_capacity(frames * plane_slice.len());
            for frame in 0..frames {
                for plane in plane_slice {
                    output.push(plane[frame]);
                }
            }
            output
        }
        AudioBufferRef::S16(buf) => {
            let planes = buf.planes();
            let mut output = Vec::with_capacity(buf.frames() * planes.planes().len());
            for frame in 0..buf.frames() {
                for plane in planes.planes() {
                    output.push(plane[frame] as f32 / 32768.0);
                }
            }
            output
        }
        AudioBufferRef::S24(buf) => {
            let planes = buf.planes();
            let mut output = Vec::with_capacity(buf.frames() * planes.planes().len());
            for frame in 0..buf.frames() {
                for plane in planes.planes() {
                    output.push(plane[frame].0 as f32 / 8388608.0);
                }
            }
            output
        }
        AudioBufferRef::S32(buf) => {
            let planes = buf.planes();
            let mut output = Vec::with_capacity(buf.frames() * planes.planes().len());
            for frame in 0..buf.frames() {
                for plane in planes.planes() {
                    output.push(plane[frame] as f32 / 2147483648.0);
                }
            }
            output
        }
        AudioBufferRef::U8(buf) => {
            let planes = buf.planes();
            let mut output = Vec::with_capacity(buf.frames() * planes.planes().len());
            for frame in 0..buf.frames() {
                for plane in planes.planes() {
                    output.push((plane[frame] as f32 - 128.0) / 128.0);
                }
            }
            output
        }
        _ => Vec::new(),
    }
}

/// Adapts a [`FormatAdapter`] into a [`PcmSource`] of raw, un-resampled
/// `f32` PCM bytes, so C12's `hash_and_length` can run directly off a
/// decoded file without a resampling step.
pub struct FormatAdapterPcmSource {
    adapter: FormatAdapter,
}

impl PcmSource for FormatAdapterPcmSource {
    fn sample_rate(&self) -> u32 {
        self.adapter.sample_rate()
    }

    fn channels(&self) -> u16 {
        self.adapter.channels()
    }

    fn bytes_per_sample(&self) -> u16 {
        4
    }

    fn next_chunk(&mut self) -> std::io::Result<Vec<u8>> {
        match self.adapter.decode_next_raw() {
            Ok(Some(samples)) => Ok(samples.iter().flat_map(|s| s.to_le_bytes()).collect()),
            Ok(None) => Ok(Vec::new()),
            Err(e) => Err(std::io::Error::other(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_reports_codec_error_for_missing_file() {
        let result = FormatAdapter::create(Path::new("/nonexistent/file.mp3"));
        assert!(result.is_err());
    }
}
