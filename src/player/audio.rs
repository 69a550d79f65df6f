//! Audio output (C6): pulls decoded samples from the current playback
//! buffer, applies tempo stretch and volume, and feeds the soundcard via
//! `cpal`.
//!
//! Grounded on `cpal`'s own device-selection and stream-building pattern;
//! the lock-free ring-buffer handoff (`rtrb`) between the pull thread and
//! the real-time callback is replaced by this crate's own
//! [`crate::ring_buffer::RingBuffer`] (C1), so the only cross-thread
//! data-plane primitive in the whole playback path is this module's own.
//! Position is a lock-free atomic; all other control is serialized through
//! an internal mutex.

use crate::player::playback_buffer::PlaybackBuffer;
use crate::player::resampler::{DeviceFormat, Resampler, SampleFormat, pack_samples, unpack_samples};
use crate::ring_buffer::RingBuffer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Events the output emits for the Player (C17) to react to.
#[derive(Debug, Clone)]
pub enum AudioOutputEvent {
    TrackFinished,
}

struct Shared {
    volume_bits: AtomicU32,
    tempo_bits: AtomicU32,
    is_playing: AtomicBool,
    position_frames: AtomicU64,
    total_frames: AtomicU64,
    should_terminate: AtomicBool,
    fade_requested_msec: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            tempo_bits: AtomicU32::new(1.0f32.to_bits()),
            is_playing: AtomicBool::new(false),
            position_frames: AtomicU64::new(0),
            total_frames: AtomicU64::new(0),
            should_terminate: AtomicBool::new(false),
            fade_requested_msec: AtomicU64::new(0),
        }
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    fn tempo(&self) -> f32 {
        f32::from_bits(self.tempo_bits.load(Ordering::Relaxed))
    }
}

/// Drives the device and owns the pull thread that feeds it. All UI-facing
/// setters (`set_tempo`, `set_volume`, `load`, `start`, `pause`, `stop`,
/// `seek`) go through `inner`, which is held only briefly per call; the
/// audio callback never touches it.
pub struct AudioOutput {
    device_format: DeviceFormat,
    shared: Arc<Shared>,
    inner: Mutex<Inner>,
    _stream: Stream,
}

struct Inner {
    current: Option<PlaybackBuffer>,
    pull_thread: Option<JoinHandle<()>>,
    device_ring: RingBuffer,
    event_tx: Sender<AudioOutputEvent>,
}

impl AudioOutput {
    pub fn new(event_tx: Sender<AudioOutputEvent>) -> crate::error::Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| crate::error::Error::AudioDevice("no output device found".into()))?;

        let name = device.name().unwrap_or_else(|_| "unknown".into());
        tracing::info!("using audio device: {name}");

        let supported = device
            .default_output_config()
            .map_err(|e| crate::error::Error::AudioDevice(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let sample_format = match supported.sample_format() {
            cpal::SampleFormat::F32 => SampleFormat::F32,
            cpal::SampleFormat::I16 => SampleFormat::I16,
            other => {
                return Err(crate::error::Error::AudioDevice(format!(
                    "unsupported device sample format: {other:?}"
                )));
            }
        };
        let device_format = DeviceFormat {
            sample_rate,
            channels,
            sample_format,
        };

        // Half a second of device-format audio: enough to absorb scheduling
        // jitter in the pull thread without adding noticeable latency.
        let device_ring = RingBuffer::new(device_format.bytes_per_second() / 2);

        let shared = Arc::new(Shared::new());
        let config = StreamConfig {
            channels,
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match sample_format {
            SampleFormat::F32 => {
                build_stream_f32(&device, &config, device_ring.clone(), Arc::clone(&shared))
            }
            SampleFormat::I16 => {
                build_stream_i16(&device, &config, device_ring.clone(), Arc::clone(&shared))
            }
        }
        .map_err(|e| crate::error::Error::AudioDevice(e.to_string()))?;
        stream
            .play()
            .map_err(|e| crate::error::Error::AudioDevice(e.to_string()))?;

        Ok(Self {
            device_format,
            shared,
            inner: Mutex::new(Inner {
                current: None,
                pull_thread: None,
                device_ring,
                event_tx,
            }),
            _stream: stream,
        })
    }

    pub fn device_format(&self) -> DeviceFormat {
        self.device_format
    }

    /// Swap in a new track's buffer, starting the pull thread for it.
    /// Any previous track's pull thread is stopped first.
    pub fn load(&self, buffer: PlaybackBuffer, total_frames: u64) {
        let mut inner = self.inner.lock();
        self.stop_pull_thread(&mut inner);

        inner.device_ring.reset();
        self.shared.position_frames.store(0, Ordering::SeqCst);
        self.shared.total_frames.store(total_frames, Ordering::SeqCst);
        self.shared.should_terminate.store(false, Ordering::SeqCst);
        self.shared.fade_requested_msec.store(0, Ordering::SeqCst);

        let pull_buffer = buffer.clone();
        let ring = inner.device_ring.clone();
        let shared = Arc::clone(&self.shared);
        let device_format = self.device_format;
        let event_tx = inner.event_tx.clone();

        let handle = thread::Builder::new()
            .name("audio-output-pull".into())
            .spawn(move || pull_loop(pull_buffer, ring, shared, device_format, event_tx))
            .expect("failed to spawn audio-output pull thread");

        inner.current = Some(buffer);
        inner.pull_thread = Some(handle);
    }

    fn stop_pull_thread(&self, inner: &mut Inner) {
        self.shared.should_terminate.store(true, Ordering::SeqCst);
        if let Some(buf) = &inner.current {
            buf.abort();
        }
        inner.device_ring.abort();
        if let Some(handle) = inner.pull_thread.take() {
            let _ = handle.join();
        }
        inner.current = None;
    }

    pub fn start(&self) {
        self.shared.is_playing.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.shared.is_playing.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        self.stop_pull_thread(&mut inner);
        self.shared.is_playing.store(false, Ordering::SeqCst);
        self.shared.position_frames.store(0, Ordering::SeqCst);
    }

    pub fn seek(&self, seconds: f64) {
        let inner = self.inner.lock();
        if let Some(buf) = &inner.current {
            buf.seek_to(seconds);
            let frame = (seconds * self.device_format.sample_rate as f64).round() as u64;
            self.shared.position_frames.store(frame, Ordering::SeqCst);
        }
    }

    pub fn fade_out(&self, msec: u64) {
        self.shared.fade_requested_msec.store(msec.max(1), Ordering::SeqCst);
    }

    /// Tempo coefficient in [0.5, 2.0]; out-of-range values are clamped.
    pub fn set_tempo(&self, coeff: f32) {
        self.shared
            .tempo_bits
            .store(coeff.clamp(0.5, 2.0).to_bits(), Ordering::Relaxed);
    }

    pub fn tempo(&self) -> f32 {
        self.shared.tempo()
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared
            .volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        self.shared.volume()
    }

    pub fn is_playing(&self) -> bool {
        self.shared.is_playing.load(Ordering::SeqCst)
    }

    pub fn current_position(&self) -> f64 {
        self.shared.position_frames.load(Ordering::SeqCst) as f64
            / self.device_format.sample_rate as f64
    }

    pub fn total_time(&self) -> f64 {
        self.shared.total_frames.load(Ordering::SeqCst) as f64
            / self.device_format.sample_rate as f64
    }

    pub fn remaining_time(&self) -> f64 {
        (self.total_time() - self.current_position()).max(0.0)
    }
}

/// Moves bytes from the track's playback buffer into the device-facing
/// ring, applying tempo resampling and volume, until the buffer reports
/// end or the output is told to stop.
fn pull_loop(
    buffer: PlaybackBuffer,
    ring: RingBuffer,
    shared: Arc<Shared>,
    device: DeviceFormat,
    event_tx: Sender<AudioOutputEvent>,
) {
    let bytes_per_frame = device.bytes_per_frame().max(1);
    let mut read_buf = vec![0u8; bytes_per_frame * 2048];
    let mut resampler: Option<(f32, Resampler)> = None;
    let mut fade_active = false;

    loop {
        if shared.should_terminate.load(Ordering::SeqCst) {
            return;
        }
        if shared.fade_requested_msec.load(Ordering::SeqCst) > 0 && !fade_active {
            let msec = shared.fade_requested_msec.swap(0, Ordering::SeqCst);
            buffer.fade_out(msec);
            fade_active = true;
        }

        buffer.wait_for_data();
        let n = buffer.read(&mut read_buf);
        if n == 0 {
            if buffer.should_abort() {
                return;
            }
            let _ = event_tx.send(AudioOutputEvent::TrackFinished);
            return;
        }

        let frames_read = n / bytes_per_frame;
        shared.position_frames.fetch_add(frames_read as u64, Ordering::SeqCst);

        let tempo = shared.tempo();
        let volume = shared.volume();
        let mut samples = unpack_samples(&read_buf[..n], device.sample_format);
        for s in &mut samples {
            *s *= volume;
        }

        let out_bytes = if (tempo - 1.0).abs() < f32::EPSILON {
            pack_samples(&samples, device.sample_format)
        } else {
            let r = resampler.get_or_insert_with(|| {
                let source_rate = (device.sample_rate as f64 * tempo as f64).round() as u32;
                (
                    tempo,
                    Resampler::new(source_rate.max(1), device.channels, device)
                        .expect("device channel layout already validated at startup"),
                )
            });
            if (r.0 - tempo).abs() > f32::EPSILON {
                let source_rate = (device.sample_rate as f64 * tempo as f64).round() as u32;
                if let Ok(fresh) = Resampler::new(source_rate.max(1), device.channels, device) {
                    *r = (tempo, fresh);
                }
            }
            r.1.process(&samples)
        };

        if ring.write(&out_bytes) < out_bytes.len() && ring.should_abort() {
            return;
        }
    }
}

fn build_stream_f32(
    device: &Device,
    config: &StreamConfig,
    mut ring: RingBuffer,
    shared: Arc<Shared>,
) -> Result<Stream, cpal::BuildStreamError> {
    device.build_output_stream(
        config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            if !shared.is_playing.load(Ordering::Relaxed) {
                data.fill(0.0);
                return;
            }
            let mut bytes = vec![0u8; data.len() * 4];
            let n = ring.read(&mut bytes);
            let floats = unpack_samples(&bytes[..n], SampleFormat::F32);
            for (out, sample) in data.iter_mut().zip(floats.iter().chain(std::iter::repeat(&0.0))) {
                *out = *sample;
            }
        },
        |err| tracing::error!("audio stream error: {err}"),
        None,
    )
}

fn build_stream_i16(
    device: &Device,
    config: &StreamConfig,
    mut ring: RingBuffer,
    shared: Arc<Shared>,
) -> Result<Stream, cpal::BuildStreamError> {
    device.build_output_stream(
        config,
        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
            if !shared.is_playing.load(Ordering::Relaxed) {
                data.fill(0);
                return;
            }
            let mut bytes = vec![0u8; data.len() * 2];
            let n = ring.read(&mut bytes);
            let samples = unpack_samples(&bytes[..n], SampleFormat::I16);
            for (out, sample) in data.iter_mut().zip(
                samples
                    .iter()
                    .map(|s| (s * i16::MAX as f32) as i16)
                    .chain(std::iter::repeat(0i16)),
            ) {
                *out = sample;
            }
        },
        |err| tracing::error!("audio stream error: {err}"),
        None,
    )
}

pub fn list_audio_devices() -> Vec<String> {
    let host = cpal::default_host();
    host.output_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_volume_and_tempo_round_trip_through_bits() {
        let shared = Shared::new();
        shared.volume_bits.store(0.5f32.to_bits(), Ordering::Relaxed);
        shared.tempo_bits.store(1.25f32.to_bits(), Ordering::Relaxed);
        assert_eq!(shared.volume(), 0.5);
        assert_eq!(shared.tempo(), 1.25);
    }
}
