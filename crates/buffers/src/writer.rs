//! Growable little-endian buffer writer.

use crate::BufferError;

/// A binary buffer writer that grows automatically as needed.
///
/// All multi-byte quantities are written little-endian. Positions returned by
/// [`Writer::pos`] stay valid for the lifetime of the writer, so callers can
/// reserve a placeholder and patch it once the real value is known.
///
/// # Example
///
/// ```
/// use ice_buffers::Writer;
///
/// let mut writer = Writer::new();
/// writer.u8(0x01);
/// let at = writer.pos();
/// writer.i32(0);
/// writer.patch_i32(at, 0x0504_0302).unwrap();
/// assert_eq!(writer.flush(), [0x01, 0x02, 0x03, 0x04, 0x05]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Writer {
    uint8: Vec<u8>,
}

impl Writer {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self { uint8: Vec::new() }
    }

    /// Current write position, which is also the number of bytes written.
    #[inline]
    pub fn pos(&self) -> usize {
        self.uint8.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uint8.is_empty()
    }

    /// Returns a view of everything written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.uint8
    }

    /// Returns the written data and leaves the writer empty.
    pub fn flush(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.uint8)
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.uint8
    }

    #[inline]
    pub fn u8(&mut self, val: u8) {
        self.uint8.push(val);
    }

    /// Writes a boolean as a single `0`/`1` byte.
    #[inline]
    pub fn bool(&mut self, val: bool) {
        self.uint8.push(u8::from(val));
    }

    #[inline]
    pub fn i16(&mut self, val: i16) {
        self.uint8.extend_from_slice(&val.to_le_bytes());
    }

    #[inline]
    pub fn i32(&mut self, val: i32) {
        self.uint8.extend_from_slice(&val.to_le_bytes());
    }

    #[inline]
    pub fn i64(&mut self, val: i64) {
        self.uint8.extend_from_slice(&val.to_le_bytes());
    }

    #[inline]
    pub fn f32(&mut self, val: f32) {
        self.uint8.extend_from_slice(&val.to_le_bytes());
    }

    #[inline]
    pub fn f64(&mut self, val: f64) {
        self.uint8.extend_from_slice(&val.to_le_bytes());
    }

    /// Writes a byte slice verbatim.
    pub fn buf(&mut self, buf: &[u8]) {
        self.uint8.extend_from_slice(buf);
    }

    /// Writes the UTF-8 bytes of `s` (no length prefix). Returns the number
    /// of bytes written.
    pub fn utf8(&mut self, s: &str) -> usize {
        self.uint8.extend_from_slice(s.as_bytes());
        s.len()
    }

    /// Overwrites the byte at `at`.
    pub fn patch_u8(&mut self, at: usize, val: u8) -> Result<(), BufferError> {
        let len = self.uint8.len();
        let slot = self
            .uint8
            .get_mut(at)
            .ok_or(BufferError::OutOfRange { offset: at, len })?;
        *slot = val;
        Ok(())
    }

    /// Overwrites four bytes at `at` with a little-endian `i32`.
    pub fn patch_i32(&mut self, at: usize, val: i32) -> Result<(), BufferError> {
        let len = self.uint8.len();
        let end = at.checked_add(4).filter(|end| *end <= len);
        match end {
            Some(end) => {
                self.uint8[at..end].copy_from_slice(&val.to_le_bytes());
                Ok(())
            }
            None => Err(BufferError::OutOfRange { offset: at, len }),
        }
    }
}
