//! Growable circular byte buffer.
//!
//! Every connection carries several of these: the receive buffer the socket reads into, the
//! transmit buffer the socket drains, the staging buffer for response chunks and the input
//! buffer that holds the decoded request body.
//!
//! The readable window is `start..end` modulo the backing length. One slot is always kept free so
//! that `start == end` unambiguously means empty, so the buffer holds at most `capacity - 1` bytes.
//! Growing the backing storage re-linearizes the content so that `start` becomes zero.

use std::fmt;
use std::io;

use bytes::Buf;

/// Default initial backing size for connection buffers.
pub const DEFAULT_BUF_SIZE: usize = 4 * 1024;

#[derive(Clone)]
pub struct RingBuf {
    data: Vec<u8>,
    start: usize,
    end: usize,
    max: usize,
}

impl RingBuf {
    /// Creates a buffer with `initial` bytes of backing storage that may grow up to `max` bytes.
    pub fn with_limits(initial: usize, max: usize) -> Self {
        let initial = initial.max(2);
        let max = max.max(initial);
        Self { data: vec![0; initial], start: 0, end: 0, max }
    }

    /// Creates a buffer with no growth limit other than memory.
    pub fn unbounded(initial: usize) -> Self {
        Self::with_limits(initial, usize::MAX)
    }

    /// Number of readable bytes.
    #[inline]
    pub fn len(&self) -> usize {
        if self.end >= self.start { self.end - self.start } else { self.data.len() - self.start + self.end }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Bytes the buffer can hold without growing.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len() - 1
    }

    /// Bytes that can be written without growing.
    #[inline]
    pub fn room(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Bytes that can still be written, growing up to the maximum size.
    #[inline]
    pub fn max_room(&self) -> usize {
        self.max - 1 - self.len()
    }

    pub fn max_size(&self) -> usize {
        self.max
    }

    /// Appends as much of `src` as fits, growing when needed. Returns the number of bytes taken.
    pub fn put_slice(&mut self, src: &[u8]) -> usize {
        if src.len() > self.room() {
            self.grow(src.len());
        }
        let count = src.len().min(self.room());
        let mut written = 0;
        while written < count {
            let space = self.write_space();
            let n = space.len().min(count - written);
            space[..n].copy_from_slice(&src[written..written + n]);
            self.commit(n);
            written += n;
        }
        count
    }

    pub fn put_byte(&mut self, byte: u8) -> bool {
        self.put_slice(&[byte]) == 1
    }

    /// Copies readable bytes into `dst`, consuming them. Returns the number of bytes copied.
    pub fn get(&mut self, dst: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < dst.len() && !self.is_empty() {
            let chunk = self.readable();
            let n = chunk.len().min(dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&chunk[..n]);
            self.consume(n);
            copied += n;
        }
        copied
    }

    pub fn get_byte(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.data[self.start];
        self.consume(1);
        Some(byte)
    }

    /// Returns the byte at `index` positions past the read cursor without consuming it.
    pub fn peek(&self, index: usize) -> Option<u8> {
        (index < self.len()).then(|| self.data[(self.start + index) % self.data.len()])
    }

    /// The readable bytes as two slices, in order.
    pub fn as_slices(&self) -> (&[u8], &[u8]) {
        if self.end >= self.start {
            (&self.data[self.start..self.end], &[])
        } else {
            (&self.data[self.start..], &self.data[..self.end])
        }
    }

    /// Rotates the content so the readable bytes are one contiguous slice.
    pub fn make_contiguous(&mut self) -> &[u8] {
        if self.end < self.start {
            let len = self.len();
            self.data.rotate_left(self.start);
            self.start = 0;
            self.end = len;
        }
        &self.data[self.start..self.end]
    }

    /// The contiguous writable region after the write cursor.
    ///
    /// Bytes written here become readable after [`RingBuf::commit`].
    pub fn write_space(&mut self) -> &mut [u8] {
        let cap = self.data.len();
        let upto = if self.end >= self.start {
            if self.start == 0 { cap - 1 } else { cap }
        } else {
            self.start - 1
        };
        &mut self.data[self.end..upto]
    }

    /// Marks `n` bytes of [`RingBuf::write_space`] as written.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.room());
        self.end = (self.end + n) % self.data.len();
    }

    /// Ensures at least `additional` bytes of room, growing if the maximum allows it.
    pub fn reserve(&mut self, additional: usize) -> bool {
        if self.room() >= additional {
            return true;
        }
        self.grow(additional);
        self.room() >= additional
    }

    /// Discards all content and rewinds the cursors.
    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Moves the content to the front of the backing storage so the write space is maximal.
    pub fn compact(&mut self) {
        if self.is_empty() {
            self.clear();
        } else if self.start != 0 {
            let len = self.len();
            self.make_contiguous();
            self.data.copy_within(self.start..self.start + len, 0);
            self.start = 0;
            self.end = len;
        }
    }

    /// Removes and returns every readable byte.
    pub fn take_vec(&mut self) -> Vec<u8> {
        let (a, b) = self.as_slices();
        let mut out = Vec::with_capacity(a.len() + b.len());
        out.extend_from_slice(a);
        out.extend_from_slice(b);
        self.clear();
        out
    }

    fn readable(&self) -> &[u8] {
        if self.end >= self.start { &self.data[self.start..self.end] } else { &self.data[self.start..] }
    }

    fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.start = (self.start + n) % self.data.len();
        if self.start == self.end {
            self.clear();
        }
    }

    /// Grows the backing storage so that `additional` bytes fit after the current content.
    fn grow(&mut self, additional: usize) {
        let cap = self.data.len();
        if cap >= self.max {
            return;
        }
        let needed = self.len().saturating_add(additional).saturating_add(1);
        let new_cap = cap.saturating_mul(2).max(needed).min(self.max);
        self.compact();
        self.data.resize(new_cap, 0);
    }
}

impl Default for RingBuf {
    fn default() -> Self {
        Self::unbounded(DEFAULT_BUF_SIZE)
    }
}

impl fmt::Debug for RingBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuf")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("start", &self.start)
            .field("end", &self.end)
            .field("max", &self.max)
            .finish()
    }
}

impl Buf for RingBuf {
    fn remaining(&self) -> usize {
        self.len()
    }

    fn chunk(&self) -> &[u8] {
        self.readable()
    }

    fn advance(&mut self, cnt: usize) {
        assert!(cnt <= self.len(), "cannot advance past the readable window");
        self.consume(cnt);
    }
}

impl io::Write for RingBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.put_slice(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for RingBuf {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.get(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_put_and_get() {
        let mut buf = RingBuf::with_limits(8, 8);
        assert_eq!(buf.capacity(), 7);
        assert_eq!(buf.put_slice(b"hello"), 5);
        assert_eq!(buf.len(), 5);

        let mut out = [0u8; 3];
        assert_eq!(buf.get(&mut out), 3);
        assert_eq!(&out, b"hel");
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_never_fully_wraps() {
        let mut buf = RingBuf::with_limits(8, 8);
        assert_eq!(buf.put_slice(b"0123456789"), 7);
        assert_eq!(buf.room(), 0);
        assert!(!buf.is_empty());
        assert!(!buf.put_byte(b'x'));
    }

    #[test]
    fn test_wrap_around() {
        let mut buf = RingBuf::with_limits(8, 8);
        buf.put_slice(b"abcdef");
        let mut out = [0u8; 4];
        buf.get(&mut out);
        // content is "ef", write cursor near the end, so this wraps
        assert_eq!(buf.put_slice(b"ghijk"), 5);
        let (a, b) = buf.as_slices();
        assert!(!b.is_empty());
        assert_eq!([a, b].concat(), b"efghijk");
        assert_eq!(buf.make_contiguous(), b"efghijk");
        assert_eq!(buf.take_vec(), b"efghijk");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_grow_relinearizes() {
        let mut buf = RingBuf::with_limits(8, 64);
        buf.put_slice(b"abcdef");
        assert_eq!(buf.get_byte(), Some(b'a'));
        assert_eq!(buf.get_byte(), Some(b'b'));
        buf.put_slice(b"gh");
        assert_eq!(buf.put_slice(b"ijklmnopqrstuvwxyz"), 18);
        assert!(buf.capacity() >= 24);
        assert_eq!(buf.chunk(), b"cdefghijklmnopqrstuvwxyz");
    }

    #[test]
    fn test_grow_stops_at_max() {
        let mut buf = RingBuf::with_limits(4, 16);
        assert_eq!(buf.put_slice(&[b'a'; 32]), 15);
        assert_eq!(buf.max_room(), 0);
        assert!(!buf.reserve(1));
    }

    #[test]
    fn test_write_space_and_commit() {
        let mut buf = RingBuf::with_limits(16, 16);
        let space = buf.write_space();
        assert_eq!(space.len(), 15);
        space[..3].copy_from_slice(b"xyz");
        buf.commit(3);
        assert_eq!(buf.chunk(), b"xyz");
        assert_eq!(buf.peek(1), Some(b'y'));
        assert_eq!(buf.peek(3), None);
    }

    #[test]
    fn test_buf_trait_and_compact() {
        let mut buf = RingBuf::with_limits(16, 16);
        write!(buf, "{:X}\r\n", 255).unwrap();
        assert_eq!(buf.remaining(), 4);
        buf.advance(2);
        buf.compact();
        assert_eq!(buf.write_space().len(), 13);
        assert_eq!(buf.copy_to_bytes(2).as_ref(), b"\r\n");
        assert!(buf.is_empty());
    }
}
