//! Song decoder (C5): owns one song's decode thread, wiring a
//! [`FormatAdapter`] into a [`PlaybackBuffer`] and running until end of
//! stream, abort, or a fatal codec error.

use crate::error::Result;
use crate::player::format_adapter::{AudioSink, FormatAdapter};
use crate::player::playback_buffer::PlaybackBuffer;
use crate::player::resampler::DeviceFormat;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

struct BufferSink {
    buffer: PlaybackBuffer,
    device: DeviceFormat,
}

impl AudioSink for BufferSink {
    fn device_format(&self) -> DeviceFormat {
        self.device
    }

    fn write(&mut self, bytes: &[u8]) -> bool {
        self.buffer.write_decoded_audio(bytes)
    }
}

/// Drives C2 -> C3 -> C4 on a dedicated thread with cooperative
/// cancellation. The thread's join handle is awaited on drop so destructors
/// block until the decode thread has actually exited.
pub struct SongDecoder {
    buffer: PlaybackBuffer,
    should_terminate: std::sync::Arc<std::sync::atomic::AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SongDecoder {
    /// Open `path` and start decoding into a fresh [`PlaybackBuffer`] sized
    /// to the track's reported duration.
    pub fn start(path: &Path, device: DeviceFormat) -> Result<Self> {
        let mut adapter = FormatAdapter::create(path)?;
        let buffer = PlaybackBuffer::new(device);
        buffer.set_duration(adapter.duration().as_secs_f64());
        let should_terminate = adapter.should_terminate_handle();

        let thread_buffer = buffer.clone();
        let thread = thread::Builder::new()
            .name("song-decoder".into())
            .spawn(move || {
                let mut sink = BufferSink {
                    buffer: thread_buffer.clone(),
                    device,
                };
                if let Err(e) = adapter.decode(&mut sink) {
                    tracing::warn!("song decode failed: {e}");
                }
                thread_buffer.decoded_eof();
            })
            .expect("failed to spawn song-decoder thread");

        Ok(Self {
            buffer,
            should_terminate,
            thread: Some(thread),
        })
    }

    pub fn buffer(&self) -> &PlaybackBuffer {
        &self.buffer
    }

    /// Signal the decode thread and the buffer to stop, then wait for the
    /// thread to exit. Idempotent.
    pub fn abort(&mut self) {
        self.should_terminate.store(true, Ordering::SeqCst);
        self.buffer.abort();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SongDecoder {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::resampler::SampleFormat;

    fn device() -> DeviceFormat {
        DeviceFormat {
            sample_rate: 44100,
            channels: 2,
            sample_format: SampleFormat::F32,
        }
    }

    #[test]
    fn start_reports_error_for_missing_file() {
        let result = SongDecoder::start(Path::new("/nonexistent/track.mp3"), device());
        assert!(result.is_err());
    }
}
