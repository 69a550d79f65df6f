//! Blocking byte ring buffer used to hand decoded audio between threads (C1).
//!
//! Readers and writers block on a shared condvar pair rather than spinning or
//! polling: a writer waiting for free space wakes on `cv_has_free_space`, a
//! reader waiting for data wakes on `cv_has_data`. One byte of capacity is
//! always kept unused so that `write_pos == read_pos` is unambiguously "empty"
//! rather than colliding with "full".

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

struct Inner {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    is_eof: bool,
    should_abort: bool,
}

impl Inner {
    fn avail_read(&self) -> usize {
        if self.write_pos >= self.read_pos {
            self.write_pos - self.read_pos
        } else {
            self.buf.len() - self.read_pos + self.write_pos
        }
    }

    fn avail_write(&self) -> usize {
        // One slot is always reserved so the buffer never reports full==empty.
        self.buf.len() - 1 - self.avail_read()
    }
}

/// A fixed-capacity byte ring buffer with blocking read/write and a sticky
/// abort flag. Clone to share between the writer and reader thread; both
/// clones refer to the same underlying buffer.
#[derive(Clone)]
pub struct RingBuffer {
    inner: Arc<Mutex<Inner>>,
    cv_has_data: Arc<Condvar>,
    cv_has_free_space: Arc<Condvar>,
}

impl RingBuffer {
    /// `capacity` is the number of bytes that can be held; one extra byte of
    /// backing storage is allocated to disambiguate full from empty.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                buf: vec![0u8; capacity + 1],
                read_pos: 0,
                write_pos: 0,
                is_eof: false,
                should_abort: false,
            })),
            cv_has_data: Arc::new(Condvar::new()),
            cv_has_free_space: Arc::new(Condvar::new()),
        }
    }

    /// Write `data` into the buffer, blocking while there is no free space.
    /// Returns the number of bytes actually written, which is less than
    /// `data.len()` only on abort or EOF having already been signaled.
    pub fn write(&self, data: &[u8]) -> usize {
        let mut written = 0;
        let mut guard = self.inner.lock();
        while written < data.len() {
            if guard.should_abort {
                break;
            }
            if guard.avail_write() == 0 {
                self.cv_has_free_space.wait(&mut guard);
                continue;
            }
            written += self.single_write(&mut guard, &data[written..]);
            self.cv_has_data.notify_one();
        }
        written
    }

    fn single_write(&self, guard: &mut Inner, data: &[u8]) -> usize {
        let avail = guard.avail_write();
        let n = avail.min(data.len());
        if n == 0 {
            return 0;
        }
        let buf_len = guard.buf.len();
        let first = n.min(buf_len - guard.write_pos);
        guard.buf[guard.write_pos..guard.write_pos + first].copy_from_slice(&data[..first]);
        if first < n {
            guard.buf[..n - first].copy_from_slice(&data[first..n]);
        }
        guard.write_pos = (guard.write_pos + n) % buf_len;
        n
    }

    /// Block until `out` is entirely filled. Returns fewer bytes than
    /// `out.len()` only on abort, or once EOF is reached with no more data
    /// to drain; otherwise keeps waiting for more bytes to arrive.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let mut read = 0;
        let mut guard = self.inner.lock();
        while read < out.len() {
            if guard.should_abort {
                break;
            }
            if guard.avail_read() == 0 {
                if guard.is_eof {
                    break;
                }
                self.cv_has_data.wait(&mut guard);
                continue;
            }
            read += self.single_read(&mut guard, &mut out[read..]);
            self.cv_has_free_space.notify_one();
        }
        read
    }

    fn single_read(&self, guard: &mut Inner, out: &mut [u8]) -> usize {
        let avail = guard.avail_read();
        let n = avail.min(out.len());
        if n == 0 {
            return 0;
        }
        let buf_len = guard.buf.len();
        let first = n.min(buf_len - guard.read_pos);
        out[..first].copy_from_slice(&guard.buf[guard.read_pos..guard.read_pos + first]);
        if first < n {
            out[first..n].copy_from_slice(&guard.buf[..n - first]);
        }
        guard.read_pos = (guard.read_pos + n) % buf_len;
        n
    }

    /// Block until there is data to read, EOF, or abort.
    pub fn wait_for_data(&self) {
        let mut guard = self.inner.lock();
        while !guard.should_abort && !guard.is_eof && guard.avail_read() == 0 {
            self.cv_has_data.wait(&mut guard);
        }
    }

    /// Signal that no more data will be written. Wakes any blocked reader.
    pub fn write_eof(&self) {
        let mut guard = self.inner.lock();
        guard.is_eof = true;
        self.cv_has_data.notify_all();
    }

    /// Sticky abort: unblocks every current and future wait on this buffer.
    pub fn abort(&self) {
        let mut guard = self.inner.lock();
        guard.should_abort = true;
        self.cv_has_data.notify_all();
        self.cv_has_free_space.notify_all();
    }

    pub fn should_abort(&self) -> bool {
        self.inner.lock().should_abort
    }

    pub fn is_eof(&self) -> bool {
        self.inner.lock().is_eof
    }

    /// Reset to an empty, non-aborted, non-EOF state. Used when reusing a
    /// buffer across songs rather than reallocating.
    pub fn reset(&self) {
        let mut guard = self.inner.lock();
        guard.read_pos = 0;
        guard.write_pos = 0;
        guard.is_eof = false;
        guard.should_abort = false;
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().buf.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn write_then_read_round_trips() {
        let rb = RingBuffer::new(16);
        assert_eq!(rb.write(b"hello"), 5);
        let mut out = [0u8; 5];
        assert_eq!(rb.read(&mut out), 5);
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn read_blocks_until_write_then_wakes() {
        let rb = RingBuffer::new(16);
        let reader = rb.clone();
        let handle = thread::spawn(move || {
            let mut out = [0u8; 3];
            let n = reader.read(&mut out);
            (n, out)
        });
        thread::sleep(Duration::from_millis(20));
        rb.write(b"abc");
        let (n, out) = handle.join().unwrap();
        assert_eq!(n, 3);
        assert_eq!(&out, b"abc");
    }

    #[test]
    fn read_keeps_blocking_across_multiple_writes_until_full() {
        let rb = RingBuffer::new(16);
        let reader = rb.clone();
        let handle = thread::spawn(move || {
            let mut out = [0u8; 6];
            let n = reader.read(&mut out);
            (n, out)
        });
        thread::sleep(Duration::from_millis(20));
        rb.write(b"abc");
        thread::sleep(Duration::from_millis(20));
        rb.write(b"def");
        let (n, out) = handle.join().unwrap();
        assert_eq!(n, 6);
        assert_eq!(&out, b"abcdef");
    }

    #[test]
    fn eof_unblocks_reader_with_zero_when_drained() {
        let rb = RingBuffer::new(16);
        rb.write(b"xy");
        let mut out = [0u8; 2];
        assert_eq!(rb.read(&mut out), 2);
        rb.write_eof();
        let mut out2 = [0u8; 2];
        assert_eq!(rb.read(&mut out2), 0);
    }

    #[test]
    fn abort_unblocks_blocked_reader_immediately() {
        let rb = RingBuffer::new(16);
        let reader = rb.clone();
        let handle = thread::spawn(move || {
            let mut out = [0u8; 4];
            reader.read(&mut out)
        });
        thread::sleep(Duration::from_millis(20));
        rb.abort();
        let n = handle.join().unwrap();
        assert_eq!(n, 0);
        assert!(rb.should_abort());
    }

    #[test]
    fn write_wraps_around_buffer_end() {
        let rb = RingBuffer::new(4);
        rb.write(b"ab");
        let mut tmp = [0u8; 2];
        rb.read(&mut tmp);
        assert_eq!(rb.write(b"cdef"), 4);
        let mut out = [0u8; 4];
        assert_eq!(rb.read(&mut out), 4);
        assert_eq!(&out, b"cdef");
    }

    #[test]
    fn capacity_reserves_one_slot() {
        // `new(n)` allocates `n + 1` backing bytes so write_pos == read_pos is
        // unambiguously "empty"; all `n` bytes remain usable to the caller.
        let rb = RingBuffer::new(4);
        assert_eq!(rb.capacity(), 4);
        assert_eq!(rb.write(b"abcd"), 4);
    }
}
