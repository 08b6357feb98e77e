//! Fixed-capacity byte ring buffer backing a connection's receive side.
//!
//! Plays the role of `circbuf_t` in the original driver (`circbuf_write`/
//! `circbuf_read`/`circbuf_peekat`/`circbuf_skip`), but over a `VecDeque<u8>`
//! instead of hand-rolled pointer arithmetic.

use std::collections::VecDeque;

use crate::error::Error;

#[derive(Debug, Default)]
pub struct RingBuffer {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl RingBuffer {
    pub fn new() -> Self {
        Self { buf: VecDeque::new(), capacity: 0 }
    }

    /// Grows (never shrinks) the buffer's logical capacity. Returns
    /// `Error::NoMemory` if the backing allocation can't be grown, the
    /// same failure mode `kmm_realloc` has in the original driver.
    pub fn resize(&mut self, capacity: usize) -> Result<(), Error> {
        if capacity <= self.capacity {
            return Ok(());
        }
        let additional = capacity - self.buf.capacity().min(capacity);
        self.buf.try_reserve(additional).map_err(|_| Error::NoMemory)?;
        self.capacity = capacity;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn space(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len())
    }

    /// Writes as many bytes of `data` as fit, returning the number written.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.space());
        self.buf.extend(data[..n].iter().copied());
        n
    }

    /// Pops up to `out.len()` bytes into `out`, returning the number read.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.buf.len());
        for slot in out.iter_mut().take(n) {
            *slot = self.buf.pop_front().expect("checked len above");
        }
        n
    }

    /// Copies up to `out.len()` bytes without consuming them.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.buf.len());
        for (slot, byte) in out.iter_mut().zip(self.buf.iter()).take(n) {
            *slot = *byte;
        }
        n
    }

    /// Discards up to `n` bytes from the front without copying them.
    pub fn skip(&mut self, n: usize) -> usize {
        let n = n.min(self.buf.len());
        self.buf.drain(..n);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_roundtrip() {
        let mut rb = RingBuffer::new();
        rb.resize(8).unwrap();
        assert_eq!(rb.write(b"hello"), 5);
        let mut out = [0u8; 5];
        assert_eq!(rb.read(&mut out), 5);
        assert_eq!(&out, b"hello");
        assert!(rb.is_empty());
    }

    #[test]
    fn write_truncates_at_capacity() {
        let mut rb = RingBuffer::new();
        rb.resize(4).unwrap();
        assert_eq!(rb.write(b"abcdef"), 4);
        assert_eq!(rb.space(), 0);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut rb = RingBuffer::new();
        rb.resize(8).unwrap();
        rb.write(b"ab");
        let mut out = [0u8; 2];
        assert_eq!(rb.peek(&mut out), 2);
        assert_eq!(rb.len(), 2);
        assert_eq!(&out, b"ab");
    }

    #[test]
    fn skip_discards_front_bytes() {
        let mut rb = RingBuffer::new();
        rb.resize(8).unwrap();
        rb.write(b"abcdef");
        assert_eq!(rb.skip(3), 3);
        let mut out = [0u8; 3];
        rb.read(&mut out);
        assert_eq!(&out, b"def");
    }

    #[test]
    fn resize_never_shrinks() {
        let mut rb = RingBuffer::new();
        rb.resize(16).unwrap();
        rb.resize(4).unwrap();
        assert_eq!(rb.capacity(), 16);
    }
}
