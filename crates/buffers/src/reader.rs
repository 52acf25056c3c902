//! Bounds-checked little-endian buffer reader.

use crate::BufferError;

/// A binary buffer reader over a borrowed byte slice.
///
/// The reader keeps a cursor `x` and an exclusive `end` bound. Every read
/// checks that enough bytes remain before `end` and fails with
/// [`BufferError::EndOfBuffer`] otherwise, leaving the cursor untouched.
///
/// # Example
///
/// ```
/// use ice_buffers::Reader;
///
/// let data = [0x01, 0x03, 0x02];
/// let mut reader = Reader::new(&data);
///
/// assert_eq!(reader.u8().unwrap(), 0x01);
/// assert_eq!(reader.i16().unwrap(), 0x0203);
/// assert!(reader.u8().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    uint8: &'a [u8],
    x: usize,
    end: usize,
}

impl<'a> Reader<'a> {
    pub fn new(uint8: &'a [u8]) -> Self {
        let end = uint8.len();
        Self { uint8, x: 0, end }
    }

    /// Creates a reader over `uint8[x..end]`; `end` is clamped to the slice.
    pub fn from_slice(uint8: &'a [u8], x: usize, end: usize) -> Self {
        let end = end.min(uint8.len());
        Self {
            uint8,
            x: x.min(end),
            end,
        }
    }

    #[inline]
    pub fn pos(&self) -> usize {
        self.x
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    /// Number of bytes left before `end`.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.end - self.x
    }

    #[inline]
    pub fn is_at_end(&self) -> bool {
        self.x >= self.end
    }

    /// Moves the cursor to an absolute position (used to rewind).
    pub fn set_pos(&mut self, x: usize) -> Result<(), BufferError> {
        if x > self.end {
            return Err(BufferError::OutOfRange {
                offset: x,
                len: self.end,
            });
        }
        self.x = x;
        Ok(())
    }

    #[inline]
    fn check(&self, n: usize) -> Result<(), BufferError> {
        if n > self.remaining() {
            Err(BufferError::EndOfBuffer {
                offset: self.x,
                needed: n,
                remaining: self.remaining(),
            })
        } else {
            Ok(())
        }
    }

    #[inline]
    fn take<const N: usize>(&mut self) -> Result<[u8; N], BufferError> {
        self.check(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.uint8[self.x..self.x + N]);
        self.x += N;
        Ok(out)
    }

    /// Advances the cursor by `length` bytes.
    pub fn skip(&mut self, length: usize) -> Result<(), BufferError> {
        self.check(length)?;
        self.x += length;
        Ok(())
    }

    /// Returns the next `size` bytes without copying and advances the cursor.
    pub fn buf(&mut self, size: usize) -> Result<&'a [u8], BufferError> {
        self.check(size)?;
        let bin = &self.uint8[self.x..self.x + size];
        self.x += size;
        Ok(bin)
    }

    /// Returns `uint8[start..end]` regardless of the cursor.
    pub fn window(&self, start: usize, end: usize) -> Result<&'a [u8], BufferError> {
        if start > end || end > self.end {
            return Err(BufferError::OutOfRange {
                offset: end,
                len: self.end,
            });
        }
        Ok(&self.uint8[start..end])
    }

    #[inline]
    pub fn u8(&mut self) -> Result<u8, BufferError> {
        self.check(1)?;
        let val = self.uint8[self.x];
        self.x += 1;
        Ok(val)
    }

    /// Reads a boolean; any non-zero byte is `true`.
    #[inline]
    pub fn bool(&mut self) -> Result<bool, BufferError> {
        Ok(self.u8()? != 0)
    }

    #[inline]
    pub fn i16(&mut self) -> Result<i16, BufferError> {
        Ok(i16::from_le_bytes(self.take()?))
    }

    #[inline]
    pub fn i32(&mut self) -> Result<i32, BufferError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    #[inline]
    pub fn i64(&mut self) -> Result<i64, BufferError> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    #[inline]
    pub fn f32(&mut self) -> Result<f32, BufferError> {
        Ok(f32::from_le_bytes(self.take()?))
    }

    #[inline]
    pub fn f64(&mut self) -> Result<f64, BufferError> {
        Ok(f64::from_le_bytes(self.take()?))
    }
}
