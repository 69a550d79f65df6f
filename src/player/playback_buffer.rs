//! Playback buffer (C4): holds an entire decoded, device-format track in a
//! flat, sample-addressable buffer with a read cursor and optional
//! fade-out, rather than the wrapping byte ring of C1.
//!
//! Guarded by the same mutex+condvar pairing as [`crate::ring_buffer`], but
//! the storage itself never wraps: `set_duration` reserves it once up
//! front, and the write cursor only ever moves forward until
//! `decoded_eof` freezes it.

use crate::player::resampler::{DeviceFormat, SampleFormat};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

struct FadeState {
    /// Byte offset (into `data`) where the fade begins.
    start: usize,
    /// Length of the fade window in bytes.
    len: usize,
}

struct Inner {
    data: Vec<u8>,
    write_pos: usize,
    read_pos: usize,
    /// Frozen to `write_pos` by `decoded_eof`; until then equals the
    /// reserved size so reads can race ahead of decode without seeing a
    /// premature end.
    buffer_limit: usize,
    reserved_size: usize,
    eof: bool,
    should_abort: bool,
    fade: Option<FadeState>,
    format: DeviceFormat,
}

impl Inner {
    fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_frame().max(1)
    }
}

/// A sample-addressable buffer for one fully-decoded track. Clone to share
/// between the decode thread ([`crate::player::song_decoder`]) and the
/// audio-output pull thread (C6).
#[derive(Clone)]
pub struct PlaybackBuffer {
    inner: Arc<Mutex<Inner>>,
    cv: Arc<Condvar>,
}

impl PlaybackBuffer {
    pub fn new(format: DeviceFormat) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data: Vec::new(),
                write_pos: 0,
                read_pos: 0,
                buffer_limit: 0,
                reserved_size: 0,
                eof: false,
                should_abort: false,
                fade: None,
                format,
            })),
            cv: Arc::new(Condvar::new()),
        }
    }

    /// Reserve storage for `seconds` of audio at the buffer's device
    /// format. Idempotent: a second call is ignored, matching the "reserve
    /// exactly once" contract.
    pub fn set_duration(&self, seconds: f64) {
        let mut guard = self.inner.lock();
        if guard.reserved_size > 0 {
            return;
        }
        let bytes_per_frame = guard.bytes_per_frame();
        let frames = (seconds * guard.format.sample_rate as f64).ceil() as usize;
        let size = frames * bytes_per_frame;
        guard.data = vec![0u8; size];
        guard.reserved_size = size;
        guard.buffer_limit = size;
    }

    /// Append decoded bytes at the write cursor. Returns `false` if the
    /// writer should stop: either the buffer was aborted or there is no
    /// room left (the reserved size underestimated the track).
    pub fn write_decoded_audio(&self, bytes: &[u8]) -> bool {
        let mut guard = self.inner.lock();
        if guard.should_abort {
            return false;
        }
        let room = guard.data.len().saturating_sub(guard.write_pos);
        let n = room.min(bytes.len());
        if n > 0 {
            let start = guard.write_pos;
            guard.data[start..start + n].copy_from_slice(&bytes[..n]);
            guard.write_pos += n;
        }
        self.cv.notify_all();
        n == bytes.len() && !guard.should_abort
    }

    /// Freeze the buffer's effective length to the current write cursor.
    pub fn decoded_eof(&self) {
        let mut guard = self.inner.lock();
        guard.buffer_limit = guard.write_pos;
        guard.eof = true;
        self.cv.notify_all();
    }

    pub fn seek_to_frame(&self, frame: usize) {
        let mut guard = self.inner.lock();
        let bytes_per_frame = guard.bytes_per_frame();
        let target = (frame * bytes_per_frame).min(guard.buffer_limit);
        guard.read_pos = target - target % bytes_per_frame;
        guard.fade = None;
        self.cv.notify_all();
    }

    pub fn seek_to(&self, seconds: f64) {
        let frame = (seconds * self.inner.lock().format.sample_rate as f64).round() as usize;
        self.seek_to_frame(frame);
    }

    /// Copy up to `dst.len()` bytes (rounded down to a whole frame) from
    /// the read cursor, applying any in-progress fade-out gain. Does not
    /// block: returns 0 both when decoded data has not caught up yet (call
    /// `wait_for_data` first) and at the frozen end of the buffer -
    /// distinguish the two via `should_abort`/a stalled `write_pos`.
    pub fn read(&self, dst: &mut [u8]) -> usize {
        let mut guard = self.inner.lock();
        if guard.should_abort {
            return 0;
        }
        let bytes_per_frame = guard.bytes_per_frame();
        let want = dst.len() - dst.len() % bytes_per_frame;
        let decoded_end = guard.write_pos.min(guard.buffer_limit);
        let avail = decoded_end.saturating_sub(guard.read_pos);
        let n = want.min(avail);
        if n == 0 {
            return 0;
        }
        let start = guard.read_pos;
        dst[..n].copy_from_slice(&guard.data[start..start + n]);
        guard.read_pos += n;

        if let Some(fade) = &guard.fade {
            apply_fade(&mut dst[..n], start, fade, guard.format.sample_format);
            if guard.read_pos >= fade.start + fade.len {
                guard.buffer_limit = guard.read_pos;
                guard.eof = true;
            }
        }
        self.cv.notify_all();
        n
    }

    /// Begin a linear fade-out over the next `msec` milliseconds of reads;
    /// once the fade window has fully played, the buffer reports end.
    pub fn fade_out(&self, msec: u64) {
        let mut guard = self.inner.lock();
        let bytes_per_frame = guard.bytes_per_frame();
        let frames = (guard.format.sample_rate as u64 * msec / 1000) as usize;
        let len = frames * bytes_per_frame;
        guard.fade = Some(FadeState {
            start: guard.read_pos,
            len,
        });
    }

    pub fn wait_for_data(&self) {
        let mut guard = self.inner.lock();
        while !guard.should_abort && !guard.eof && guard.read_pos >= guard.write_pos {
            self.cv.wait(&mut guard);
        }
    }

    pub fn abort(&self) {
        let mut guard = self.inner.lock();
        guard.should_abort = true;
        self.cv.notify_all();
    }

    pub fn should_abort(&self) -> bool {
        self.inner.lock().should_abort
    }

    pub fn read_pos(&self) -> usize {
        self.inner.lock().read_pos
    }

    pub fn write_pos(&self) -> usize {
        self.inner.lock().write_pos
    }

    pub fn buffer_limit(&self) -> usize {
        self.inner.lock().buffer_limit
    }

    pub fn reserved_size(&self) -> usize {
        self.inner.lock().reserved_size
    }

    pub fn format(&self) -> DeviceFormat {
        self.inner.lock().format
    }
}

fn apply_fade(bytes: &mut [u8], read_start: usize, fade: &FadeState, format: SampleFormat) {
    let sample_size = match format {
        SampleFormat::I16 => 2,
        SampleFormat::F32 => 4,
    };
    for (i, chunk) in bytes.chunks_exact_mut(sample_size).enumerate() {
        let offset = read_start + i * sample_size;
        if offset < fade.start {
            continue;
        }
        let progress = (offset - fade.start) as f64 / fade.len.max(1) as f64;
        let gain = (1.0 - progress).clamp(0.0, 1.0);
        match format {
            SampleFormat::F32 => {
                let v = f32::from_le_bytes(chunk.try_into().unwrap());
                chunk.copy_from_slice(&(v * gain as f32).to_le_bytes());
            }
            SampleFormat::I16 => {
                let v = i16::from_le_bytes(chunk.try_into().unwrap());
                chunk.copy_from_slice(&((v as f64 * gain) as i16).to_le_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono_i16() -> DeviceFormat {
        DeviceFormat {
            sample_rate: 100,
            channels: 1,
            sample_format: SampleFormat::I16,
        }
    }

    #[test]
    fn read_cursor_never_passes_write_cursor_or_buffer_limit() {
        let buf = PlaybackBuffer::new(mono_i16());
        buf.set_duration(1.0);
        assert!(buf.write_decoded_audio(&[0u8; 20]));
        let mut out = [0u8; 100];
        let n = buf.read(&mut out);
        assert!(n <= 20);
        assert!(buf.read_pos() <= buf.write_pos());
        assert!(buf.write_pos() <= buf.buffer_limit());
        assert!(buf.buffer_limit() <= buf.reserved_size());
    }

    #[test]
    fn decoded_eof_freezes_write_cursor_as_limit() {
        let buf = PlaybackBuffer::new(mono_i16());
        buf.set_duration(1.0);
        buf.write_decoded_audio(&[1u8; 10]);
        buf.decoded_eof();
        assert_eq!(buf.buffer_limit(), 10);
        let mut out = [0u8; 100];
        assert_eq!(buf.read(&mut out), 10);
        assert_eq!(buf.read(&mut out), 0);
    }

    #[test]
    fn set_duration_is_idempotent() {
        let buf = PlaybackBuffer::new(mono_i16());
        buf.set_duration(1.0);
        let first = buf.reserved_size();
        buf.set_duration(5.0);
        assert_eq!(buf.reserved_size(), first);
    }

    #[test]
    fn seek_to_frame_clamps_to_buffer_limit() {
        let buf = PlaybackBuffer::new(mono_i16());
        buf.set_duration(1.0);
        buf.write_decoded_audio(&[0u8; 10]);
        buf.decoded_eof();
        buf.seek_to_frame(1000);
        assert_eq!(buf.read_pos(), 10);
    }

    #[test]
    fn fade_out_silences_samples_and_then_reports_end() {
        let buf = PlaybackBuffer::new(mono_i16());
        buf.set_duration(1.0);
        let samples: Vec<u8> = (0..50).flat_map(|_| 1000i16.to_le_bytes()).collect();
        buf.write_decoded_audio(&samples);
        buf.decoded_eof();
        buf.fade_out(250); // 25 frames at 100 Hz
        let mut out = [0u8; 100];
        let n = buf.read(&mut out);
        assert!(n > 0);
        // past the fade window, buffer should report end
        let mut out2 = [0u8; 1000];
        buf.read(&mut out2);
        let mut out3 = [0u8; 10];
        assert_eq!(buf.read(&mut out3), 0);
    }

    #[test]
    fn abort_unblocks_waiters_and_reads_return_zero() {
        let buf = PlaybackBuffer::new(mono_i16());
        buf.set_duration(1.0);
        buf.abort();
        let mut out = [0u8; 10];
        assert_eq!(buf.read(&mut out), 0);
    }
}
