//! Little-endian byte buffers used by the Ice encoding streams.
//!
//! [`Writer`] appends to a growable buffer and can patch previously written
//! placeholders in place. [`Reader`] walks a borrowed slice and bounds-checks
//! every read.

mod error;
mod reader;
mod writer;

pub use error::BufferError;
pub use reader::Reader;
pub use writer::Writer;
