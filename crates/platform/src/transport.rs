//! Transport sinks
//!
//! The streaming multiplexer writes packets into per-transport ring buffers.
//! The serial and network drivers drain them on their own schedule. Each
//! ring has its own lock, held only for a free-space check, an append or a
//! drain, never across a driver call.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Byte sink consumed by the streaming multiplexer.
///
/// Both operations are non-blocking.
pub trait TransportSink {
    /// Bytes that can be appended right now.
    fn free_space(&self) -> usize;

    /// Append `bytes` if they fit entirely.
    ///
    /// Returns the number of bytes accepted: `bytes.len()` on success, `0`
    /// if they do not fit. No partial writes.
    fn try_append(&self, bytes: &[u8]) -> usize;
}

impl<T: TransportSink + ?Sized> TransportSink for &T {
    fn free_space(&self) -> usize {
        (**self).free_space()
    }

    fn try_append(&self, bytes: &[u8]) -> usize {
        (**self).try_append(bytes)
    }
}

/// Fixed-size byte ring.
///
/// One byte is kept free to tell "full" from "empty", so the usable capacity
/// is `N - 1`.
pub struct ByteRing<const N: usize> {
    buffer: [u8; N],
    write_pos: usize,
    read_pos: usize,
}

impl<const N: usize> Default for ByteRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ByteRing<N> {
    /// Create an empty ring
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: [0; N],
            write_pos: 0,
            read_pos: 0,
        }
    }

    /// Bytes waiting to be drained
    #[must_use]
    #[allow(clippy::arithmetic_side_effects)] // Safety: write_pos/read_pos always < N
    pub fn available(&self) -> usize {
        if self.write_pos >= self.read_pos {
            self.write_pos - self.read_pos
        } else {
            N - self.read_pos + self.write_pos
        }
    }

    /// Bytes that can still be written
    #[must_use]
    pub fn free_space(&self) -> usize {
        N.saturating_sub(self.available()).saturating_sub(1)
    }

    /// Write all of `data` or nothing. Returns bytes written.
    #[allow(clippy::arithmetic_side_effects)] // Safety: write_pos+1 wraps via % N; N > 0 when data fits
    #[allow(clippy::indexing_slicing)] // Safety: write_pos < N invariant
    pub fn write_all_or_nothing(&mut self, data: &[u8]) -> usize {
        if data.len() > self.free_space() {
            return 0;
        }
        for &byte in data {
            self.buffer[self.write_pos] = byte;
            self.write_pos = (self.write_pos + 1) % N;
        }
        data.len()
    }

    /// Read up to `out.len()` bytes. Returns bytes read.
    #[allow(clippy::arithmetic_side_effects)] // Safety: read_pos+1 wraps via % N; to_read <= available
    #[allow(clippy::indexing_slicing)] // Safety: to_read <= out.len(); read_pos < N invariant
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let to_read = out.len().min(self.available());
        for slot in &mut out[..to_read] {
            *slot = self.buffer[self.read_pos];
            self.read_pos = (self.read_pos + 1) % N;
        }
        to_read
    }

    /// Drop all buffered bytes
    pub fn clear(&mut self) {
        self.read_pos = self.write_pos;
    }
}

/// A [`ByteRing`] behind its own lock, shared between the streaming task
/// (writer) and one transport driver (reader).
pub struct RingSink<M: RawMutex, const N: usize> {
    ring: Mutex<M, RefCell<ByteRing<N>>>,
}

impl<M: RawMutex, const N: usize> Default for RingSink<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const N: usize> RingSink<M, N> {
    /// Create an empty sink.
    pub const fn new() -> Self {
        Self {
            ring: Mutex::new(RefCell::new(ByteRing::new())),
        }
    }

    /// Drain up to `out.len()` bytes for transmission.
    pub fn drain(&self, out: &mut [u8]) -> usize {
        self.ring.lock(|ring| ring.borrow_mut().read(out))
    }

    /// Bytes waiting for the transport driver.
    pub fn pending(&self) -> usize {
        self.ring.lock(|ring| ring.borrow().available())
    }

    /// Discard everything buffered (link dropped).
    pub fn reset(&self) {
        self.ring.lock(|ring| ring.borrow_mut().clear());
    }
}

impl<M: RawMutex, const N: usize> TransportSink for RingSink<M, N> {
    fn free_space(&self) -> usize {
        self.ring.lock(|ring| ring.borrow().free_space())
    }

    fn try_append(&self, bytes: &[u8]) -> usize {
        self.ring
            .lock(|ring| ring.borrow_mut().write_all_or_nothing(bytes))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    #[test]
    fn ring_reserves_one_byte() {
        let ring = ByteRing::<8>::new();
        assert_eq!(ring.free_space(), 7);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn append_is_all_or_nothing() {
        let sink = RingSink::<NoopRawMutex, 8>::new();
        assert_eq!(sink.try_append(&[1, 2, 3, 4, 5]), 5);
        assert_eq!(sink.free_space(), 2);
        assert_eq!(sink.try_append(&[6, 7, 8]), 0, "does not fit, nothing written");
        assert_eq!(sink.pending(), 5);
    }

    #[test]
    fn drain_wraps_around() {
        let sink = RingSink::<NoopRawMutex, 8>::new();
        let mut out = [0u8; 8];
        assert_eq!(sink.try_append(&[1, 2, 3, 4, 5, 6]), 6);
        assert_eq!(sink.drain(&mut out[..4]), 4);
        assert_eq!(sink.try_append(&[7, 8, 9, 10, 11]), 5);
        let n = sink.drain(&mut out);
        assert_eq!(&out[..n], &[5, 6, 7, 8, 9, 10, 11]);
        assert_eq!(sink.free_space(), 7);
    }

    #[test]
    fn reset_discards_pending_bytes() {
        let sink = RingSink::<NoopRawMutex, 16>::new();
        sink.try_append(b"hello");
        sink.reset();
        assert_eq!(sink.pending(), 0);
        assert_eq!(sink.free_space(), 15);
    }
}
