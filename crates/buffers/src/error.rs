use thiserror::Error;

/// Error type for bounds-checked buffer access.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("unexpected end of buffer: need {needed} bytes at offset {offset}, {remaining} remaining")]
    EndOfBuffer {
        offset: usize,
        needed: usize,
        remaining: usize,
    },
    #[error("offset {offset} is outside the buffer of length {len}")]
    OutOfRange { offset: usize, len: usize },
}
