//! Ice binary encoding engine.
//!
//! Implements encodings 1.0 and 1.1 of the Ice protocol's data encoding:
//! encapsulations, tagged (optional) members, class graphs with shared and
//! cyclic references, slicing of unknown derived types and user exceptions.
//!
//! Streams are configured from a [`StreamConfig`] value. Polymorphic types
//! are created while decoding through a [`FactoryRegistry`].
//!
//! ```
//! use ice_encoding::{InputStream, OutputStream, ENCODING_1_1};
//!
//! let mut os = OutputStream::with_encoding(ENCODING_1_1);
//! os.start_encapsulation().unwrap();
//! os.write_tagged(1, Some(&42i32)).unwrap();
//! os.end_encapsulation().unwrap();
//! let bytes = os.finished();
//!
//! let mut is = InputStream::with_encoding(&bytes, ENCODING_1_1);
//! is.start_encapsulation().unwrap();
//! assert_eq!(is.read_tagged::<i32>(1).unwrap(), Some(42));
//! assert_eq!(is.read_tagged::<i32>(2).unwrap(), None);
//! is.end_encapsulation().unwrap();
//! ```

pub mod config;
pub mod error;
pub mod exception;
pub mod factory;
pub mod format;
pub mod input_stream;
pub mod output_stream;
pub mod streamable;
pub mod value;
pub mod version;

pub use config::StreamConfig;
pub use error::Error;
pub use exception::UserException;
pub use factory::{ExceptionFactory, FactoryRegistry, ValueFactory};
pub use format::{FormatType, OptionalFormat};
pub use input_stream::InputStream;
pub use output_stream::OutputStream;
pub use streamable::Streamable;
pub use value::{
    new_value, SliceInfo, SlicedData, UnknownSlicedValue, Value, ValuePtr, ValueSlot,
    OBJECT_TYPE_ID,
};
pub use version::{
    check_supported_encoding, EncodingVersion, CURRENT_ENCODING, ENCODING_1_0, ENCODING_1_1,
};
