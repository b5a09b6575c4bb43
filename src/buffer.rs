//! Cursor-based byte buffer for FINS field serialization.
//!
//! [`ByteBuffer`] is a growable byte store with independent read and write
//! cursors. Arriving socket bytes are appended at the write cursor and frames
//! are parsed from the read cursor, so a parse attempt that runs out of data
//! can rewind the read cursor and retry once more bytes arrive.
//!
//! # Invariants
//!
//! `read_pos <= write_pos <= store length` at all times. Every multi-byte
//! integer is big-endian, and strings are raw bytes with no length prefix.
//!
//! # Strict and lenient reads
//!
//! All `read_*` methods are strict: a request past the write cursor returns
//! [`FinsError::BufferOverrun`] and leaves the read cursor untouched.
//! [`ByteBuffer::read_bytes_at`] is the one lenient exception. It zero-pads a
//! short window and moves the read cursor to the write cursor. The codec only
//! uses it for diagnostic dumps of a partially received frame.
//!
//! # Example
//!
//! ```
//! use omron_fins_tcp::ByteBuffer;
//!
//! let mut buf = ByteBuffer::new();
//! buf.put_bytes(b"FINS");
//! buf.put_u32(0x0000_000C);
//!
//! assert_eq!(buf.read_string(4).unwrap(), "FINS");
//! assert_eq!(buf.read_u32().unwrap(), 12);
//! assert_eq!(buf.read_length(), 0);
//! ```

use crate::error::{FinsError, Result};

/// Growable byte store with independent read and write cursors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    store: Vec<u8>,
    read: usize,
    write: usize,
}

impl ByteBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty buffer with room for `capacity` bytes before reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            store: Vec::with_capacity(capacity),
            read: 0,
            write: 0,
        }
    }

    /// Returns the capacity of the backing store.
    pub fn cap(&self) -> usize {
        self.store.capacity()
    }

    /// Returns the number of written bytes not yet read.
    pub fn read_length(&self) -> usize {
        self.write - self.read
    }

    /// Returns the read cursor.
    pub fn read_pos(&self) -> usize {
        self.read
    }

    /// Returns the write cursor.
    pub fn write_pos(&self) -> usize {
        self.write
    }

    /// Returns the unread bytes without consuming them.
    pub fn readable(&self) -> &[u8] {
        &self.store[self.read..self.write]
    }

    /// Moves the read cursor back to the start of the buffer.
    pub fn reset_read(&mut self) {
        self.read = 0;
    }

    /// Moves the write cursor back to the start of the buffer.
    ///
    /// The read cursor is clamped along with it. Bytes already in the store are
    /// kept and get overwritten by later puts.
    pub fn reset_write(&mut self) {
        self.write = 0;
        self.read = 0;
    }

    /// Moves the read cursor to `pos`.
    ///
    /// # Errors
    ///
    /// Returns [`FinsError::BufferOverrun`] if `pos` is past the write cursor.
    pub fn set_read_pos(&mut self, pos: usize) -> Result<()> {
        if pos > self.write {
            return Err(FinsError::buffer_overrun(pos, 0, self.write));
        }
        self.read = pos;
        Ok(())
    }

    /// Drops the bytes before the read cursor and shifts the rest to the front.
    ///
    /// Used between frames by a long-lived session buffer so it does not grow
    /// without bound.
    pub fn compact(&mut self) {
        if self.read == 0 {
            return;
        }
        self.store.copy_within(self.read..self.write, 0);
        self.write -= self.read;
        self.read = 0;
    }

    /// Appends `data` at the write cursor, growing the store if needed.
    pub fn put_bytes(&mut self, data: &[u8]) {
        let end = self.write + data.len();
        if end > self.store.len() {
            self.store.resize(end, 0);
        }
        self.store[self.write..end].copy_from_slice(data);
        self.write = end;
    }

    /// Overwrites bytes starting at `pos`.
    ///
    /// The write cursor only moves if the write extends past it.
    ///
    /// # Errors
    ///
    /// Returns [`FinsError::BufferOverrun`] if `pos` is past the write cursor.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_tcp::ByteBuffer;
    ///
    /// let mut buf = ByteBuffer::new();
    /// buf.put_bytes(&[0, 0, 0, 0]);
    /// buf.put_bytes_at(1, &[0xAA]).unwrap();
    /// assert_eq!(buf.readable(), &[0x00, 0xAA, 0x00, 0x00]);
    /// assert!(buf.put_bytes_at(5, &[0x01]).is_err());
    /// ```
    pub fn put_bytes_at(&mut self, pos: usize, data: &[u8]) -> Result<()> {
        if pos > self.write {
            return Err(FinsError::buffer_overrun(pos, data.len(), self.write));
        }
        let end = pos + data.len();
        if end > self.store.len() {
            self.store.resize(end, 0);
        }
        self.store[pos..end].copy_from_slice(data);
        if end > self.write {
            self.write = end;
        }
        Ok(())
    }

    /// Appends a single byte.
    pub fn put_u8(&mut self, value: u8) {
        self.put_bytes(&[value]);
    }

    /// Appends a big-endian `u16`.
    pub fn put_u16(&mut self, value: u16) {
        self.put_bytes(&value.to_be_bytes());
    }

    /// Appends a big-endian `u32`.
    pub fn put_u32(&mut self, value: u32) {
        self.put_bytes(&value.to_be_bytes());
    }

    /// Appends a big-endian `i32`.
    pub fn put_i32(&mut self, value: i32) {
        self.put_bytes(&value.to_be_bytes());
    }

    /// Appends the raw bytes of `value`, without a length prefix.
    pub fn put_str(&mut self, value: &str) {
        self.put_bytes(value.as_bytes());
    }

    /// Consumes `length` bytes from the read cursor.
    ///
    /// # Errors
    ///
    /// Returns [`FinsError::BufferOverrun`] if fewer than `length` bytes are
    /// readable. The read cursor is left unchanged.
    pub fn read_bytes(&mut self, length: usize) -> Result<Vec<u8>> {
        self.take(length).map(<[u8]>::to_vec)
    }

    /// Reads `length` bytes starting at `pos`, tolerating a short window.
    ///
    /// If the window runs past the write cursor, the available bytes are
    /// returned zero-padded to `length` and the read cursor moves to the write
    /// cursor. Otherwise the read cursor moves to `pos + length`.
    ///
    /// The returned vector is always `length` bytes long, so callers bound
    /// `length` themselves.
    ///
    /// # Errors
    ///
    /// Returns [`FinsError::BufferOverrun`] if `pos` itself is past the write
    /// cursor, or [`FinsError::InvalidParameter`] if `length` bytes cannot be
    /// allocated.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_tcp::ByteBuffer;
    ///
    /// let mut buf = ByteBuffer::new();
    /// buf.put_bytes(&[1, 2, 3]);
    /// assert_eq!(buf.read_bytes_at(1, 4).unwrap(), vec![2, 3, 0, 0]);
    /// assert_eq!(buf.read_pos(), 3);
    /// ```
    pub fn read_bytes_at(&mut self, pos: usize, length: usize) -> Result<Vec<u8>> {
        if pos > self.write {
            return Err(FinsError::buffer_overrun(pos, length, self.write));
        }
        let mut out = Vec::new();
        out.try_reserve_exact(length).map_err(|e| {
            FinsError::invalid_parameter("length", format!("cannot allocate {length} bytes: {e}"))
        })?;
        out.resize(length, 0);
        let end = pos.saturating_add(length);
        if end > self.write {
            let available = self.write - pos;
            out[..available].copy_from_slice(&self.store[pos..self.write]);
            self.read = self.write;
        } else {
            out.copy_from_slice(&self.store[pos..end]);
            self.read = end;
        }
        Ok(out)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let [b] = self.take_array::<1>()?;
        Ok(b)
    }

    /// Reads a big-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16> {
        self.take_array().map(u16::from_be_bytes)
    }

    /// Reads a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.take_array().map(u32::from_be_bytes)
    }

    /// Reads a big-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32> {
        self.take_array().map(i32::from_be_bytes)
    }

    /// Reads `length` raw bytes as a UTF-8 string.
    ///
    /// No encoding conversion happens, so fields that may carry arbitrary
    /// bytes (such as a controller's padded model name) belong in
    /// [`read_bytes`](Self::read_bytes) instead.
    ///
    /// # Errors
    ///
    /// Returns [`FinsError::BufferOverrun`] on a short buffer, or
    /// [`FinsError::InvalidFrame`] if the bytes are not UTF-8. The read cursor
    /// is unchanged on error, so the same field can be re-read with
    /// `read_bytes`.
    pub fn read_string(&mut self, length: usize) -> Result<String> {
        let bytes = self.peek(length)?;
        let value = std::str::from_utf8(bytes)
            .map_err(|e| FinsError::invalid_frame(format!("string field is not UTF-8: {e}")))?
            .to_owned();
        self.read += length;
        Ok(value)
    }

    /// Finds `pattern` in the unread bytes.
    ///
    /// Returns the offset from the start of the buffer, or `None` if absent.
    /// Cursors are not moved.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_tcp::ByteBuffer;
    ///
    /// let mut buf = ByteBuffer::new();
    /// buf.put_bytes(b"xxFINSxx");
    /// buf.read_u8().unwrap();
    /// assert_eq!(buf.index(b"FINS"), Some(2));
    /// assert_eq!(buf.index(b"PLC"), None);
    /// ```
    pub fn index(&self, pattern: &[u8]) -> Option<usize> {
        if pattern.is_empty() {
            return Some(self.read);
        }
        self.readable()
            .windows(pattern.len())
            .position(|window| window == pattern)
            .map(|offset| self.read + offset)
    }

    fn peek(&self, length: usize) -> Result<&[u8]> {
        let available = self.read_length();
        if length > available {
            return Err(FinsError::buffer_overrun(self.read, length, available));
        }
        Ok(&self.store[self.read..self.read + length])
    }

    fn take(&mut self, length: usize) -> Result<&[u8]> {
        let start = self.read;
        self.peek(length)?;
        self.read += length;
        Ok(&self.store[start..self.read])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(data: &[u8]) -> Self {
        let mut buf = Self::with_capacity(data.len());
        buf.put_bytes(data);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_is_empty() {
        let buf = ByteBuffer::new();
        assert_eq!(buf.read_length(), 0);
        assert_eq!(buf.read_pos(), 0);
        assert_eq!(buf.write_pos(), 0);
    }

    #[test]
    fn test_put_u32_is_big_endian() {
        let mut buf = ByteBuffer::new();
        buf.put_u32(0x0102_0304);
        assert_eq!(buf.read_bytes(4).unwrap(), vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_put_i32_negative() {
        let mut buf = ByteBuffer::new();
        buf.put_i32(-2);
        assert_eq!(buf.readable(), &[0xFF, 0xFF, 0xFF, 0xFE]);
        assert_eq!(buf.read_i32().unwrap(), -2);
    }

    #[test]
    fn test_read_integers() {
        let mut buf = ByteBuffer::from(&[0x7F, 0x12, 0x34, 0xDE, 0xAD, 0xBE, 0xEF][..]);
        assert_eq!(buf.read_u8().unwrap(), 0x7F);
        assert_eq!(buf.read_u16().unwrap(), 0x1234);
        assert_eq!(buf.read_u32().unwrap(), 0xDEAD_BEEF);
        assert!(buf.read_u8().is_err());
    }

    #[test]
    fn test_strict_read_overrun_keeps_cursor() {
        let mut buf = ByteBuffer::new();
        buf.put_bytes(&[1, 2, 3]);
        buf.read_u8().unwrap();

        let err = buf.read_u32().unwrap_err();
        assert!(matches!(
            err,
            FinsError::BufferOverrun {
                position: 1,
                requested: 4,
                available: 2
            }
        ));
        assert_eq!(buf.read_pos(), 1);
        assert!(buf.read_bytes(3).is_err());
        assert!(buf.read_string(3).is_err());
        assert_eq!(buf.read_pos(), 1);
    }

    #[test]
    fn test_read_string_raw_bytes() {
        let mut buf = ByteBuffer::new();
        buf.put_str("CJ2M");
        buf.put_str("-CPU");
        assert_eq!(buf.read_string(4).unwrap(), "CJ2M");
        assert_eq!(buf.read_string(4).unwrap(), "-CPU");
    }

    #[test]
    fn test_read_string_rejects_invalid_utf8() {
        let mut buf = ByteBuffer::from(&[0xFF, 0xFE][..]);
        assert!(matches!(
            buf.read_string(2),
            Err(FinsError::InvalidFrame { .. })
        ));
        assert_eq!(buf.read_pos(), 0);
    }

    #[test]
    fn test_put_bytes_at_overwrites_inside_extent() {
        let mut buf = ByteBuffer::new();
        buf.put_bytes(&[1, 2, 3, 4]);
        buf.put_bytes_at(1, &[9, 9]).unwrap();
        assert_eq!(buf.write_pos(), 4);
        assert_eq!(buf.readable(), &[1, 9, 9, 4]);
    }

    #[test]
    fn test_put_bytes_at_extends_write_cursor() {
        let mut buf = ByteBuffer::new();
        buf.put_bytes(&[1, 2]);
        buf.put_bytes_at(1, &[7, 8, 9]).unwrap();
        assert_eq!(buf.write_pos(), 4);
        assert_eq!(buf.readable(), &[1, 7, 8, 9]);

        buf.put_bytes_at(4, &[5]).unwrap();
        assert_eq!(buf.readable(), &[1, 7, 8, 9, 5]);
    }

    #[test]
    fn test_put_bytes_at_beyond_extent_fails() {
        let mut buf = ByteBuffer::new();
        buf.put_bytes(&[1]);
        assert!(buf.put_bytes_at(2, &[0]).is_err());
        assert_eq!(buf.write_pos(), 1);
    }

    #[test]
    fn test_read_bytes_at_full_window() {
        let mut buf = ByteBuffer::from(&[10, 20, 30, 40][..]);
        assert_eq!(buf.read_bytes_at(1, 2).unwrap(), vec![20, 30]);
        assert_eq!(buf.read_pos(), 3);
    }

    #[test]
    fn test_read_bytes_at_short_window_is_padded() {
        let mut buf = ByteBuffer::from(&[10, 20, 30][..]);
        assert_eq!(buf.read_bytes_at(2, 4).unwrap(), vec![30, 0, 0, 0]);
        assert_eq!(buf.read_pos(), 3);
        assert!(buf.read_bytes_at(4, 1).is_err());
    }

    #[test]
    fn test_read_bytes_at_past_extent_reports_write_cursor() {
        let mut buf = ByteBuffer::from(&[10, 20, 30][..]);
        let err = buf.read_bytes_at(5, 2).unwrap_err();
        assert!(matches!(
            err,
            FinsError::BufferOverrun {
                position: 5,
                requested: 2,
                available: 3
            }
        ));
        assert_eq!(buf.read_pos(), 0);
    }

    #[test]
    fn test_read_bytes_at_huge_length_fails_without_abort() {
        let mut buf = ByteBuffer::from(&[1, 2][..]);
        assert!(matches!(
            buf.read_bytes_at(0, usize::MAX),
            Err(FinsError::InvalidParameter { .. })
        ));
        assert_eq!(buf.read_pos(), 0);
    }

    #[test]
    fn test_non_utf8_field_readable_as_bytes() {
        let mut buf = ByteBuffer::new();
        buf.put_bytes(&[b'C', b'J', 0xFF, 0x00]);
        assert!(buf.read_string(4).is_err());
        assert_eq!(buf.read_bytes(4).unwrap(), vec![b'C', b'J', 0xFF, 0x00]);
    }

    #[test]
    fn test_index_searches_from_read_cursor() {
        let mut buf = ByteBuffer::new();
        buf.put_bytes(b"FINS..FINS");
        assert_eq!(buf.index(b"FINS"), Some(0));
        buf.set_read_pos(1).unwrap();
        assert_eq!(buf.index(b"FINS"), Some(6));
        assert_eq!(buf.read_pos(), 1);
        assert_eq!(buf.index(b"NOPE"), None);
    }

    #[test]
    fn test_index_ignores_stale_bytes_past_write_cursor() {
        let mut buf = ByteBuffer::new();
        buf.put_bytes(b"abcFINS");
        buf.reset_write();
        buf.put_bytes(b"ab");
        assert_eq!(buf.index(b"FINS"), None);
    }

    #[test]
    fn test_set_read_pos_bounds() {
        let mut buf = ByteBuffer::from(&[1, 2][..]);
        buf.set_read_pos(2).unwrap();
        assert_eq!(buf.read_length(), 0);
        assert!(buf.set_read_pos(3).is_err());
        assert_eq!(buf.read_pos(), 2);
    }

    #[test]
    fn test_reset_read_and_write() {
        let mut buf = ByteBuffer::from(&[1, 2, 3][..]);
        buf.read_bytes(2).unwrap();
        buf.reset_read();
        assert_eq!(buf.read_length(), 3);

        buf.reset_write();
        assert_eq!(buf.read_length(), 0);
        buf.put_u8(9);
        assert_eq!(buf.readable(), &[9]);
    }

    #[test]
    fn test_compact_keeps_unread_bytes() {
        let mut buf = ByteBuffer::from(&[1, 2, 3, 4, 5][..]);
        buf.read_bytes(3).unwrap();
        buf.compact();
        assert_eq!(buf.read_pos(), 0);
        assert_eq!(buf.write_pos(), 2);
        assert_eq!(buf.readable(), &[4, 5]);
        buf.put_u8(6);
        assert_eq!(buf.readable(), &[4, 5, 6]);
    }

    #[test]
    fn test_cap_grows() {
        let mut buf = ByteBuffer::with_capacity(4);
        assert!(buf.cap() >= 4);
        buf.put_bytes(&[0; 64]);
        assert!(buf.cap() >= 64);
    }

    proptest! {
        #[test]
        fn prop_put_then_read_roundtrip(prefix in proptest::collection::vec(any::<u8>(), 0..32),
                                        data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut buf = ByteBuffer::new();
            buf.put_bytes(&prefix);
            buf.set_read_pos(prefix.len()).unwrap();
            buf.put_bytes(&data);
            prop_assert_eq!(buf.read_bytes(data.len()).unwrap(), data);
            prop_assert_eq!(buf.read_length(), 0);
        }

        #[test]
        fn prop_overrun_leaves_cursor(data in proptest::collection::vec(any::<u8>(), 0..64),
                                      consumed in 0usize..64,
                                      extra in 1usize..16) {
            let mut buf = ByteBuffer::from(&data[..]);
            let consumed = consumed.min(data.len());
            buf.set_read_pos(consumed).unwrap();
            let before = buf.read_pos();
            prop_assert!(buf.read_bytes(buf.read_length() + extra).is_err());
            prop_assert_eq!(buf.read_pos(), before);
        }
    }
}
