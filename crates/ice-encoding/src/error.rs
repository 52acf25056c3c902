//! Error type for the encoding engine.
//!
//! Every variant corresponds to one Ice local exception. [`Error::ice_ids`]
//! exposes the exception's inheritance chain so callers can test for a
//! whole family (`::Ice::MarshalException`, `::Ice::ProtocolException`)
//! without matching each variant.

use ice_buffers::BufferError;
use thiserror::Error;

use crate::version::EncodingVersion;

const LOCAL_EXCEPTION: &str = "::Ice::LocalException";
const PROTOCOL_EXCEPTION: &str = "::Ice::ProtocolException";
const MARSHAL_EXCEPTION: &str = "::Ice::MarshalException";
const UNKNOWN_EXCEPTION: &str = "::Ice::UnknownException";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unmarshal out of bounds: {reason}")]
    UnmarshalOutOfBounds { reason: String },
    #[error("encapsulation error: {reason}")]
    Encapsulation { reason: String },
    #[error("marshal error: {reason}")]
    Marshal { reason: String },
    #[error("no value factory for type `{type_id}': {reason}")]
    NoValueFactory { reason: String, type_id: String },
    #[error("unexpected value of type `{type_id}', expected `{expected_type}'")]
    UnexpectedObject {
        type_id: String,
        expected_type: String,
    },
    #[error("memory limit exceeded: {reason}")]
    MemoryLimit { reason: String },
    #[error("string conversion failed: {reason}")]
    StringConversion { reason: String },
    #[error("unsupported encoding {bad}, this engine supports encoding {supported}")]
    UnsupportedEncoding {
        bad: EncodingVersion,
        supported: EncodingVersion,
    },
    #[error("feature not supported: {feature}")]
    FeatureNotSupported { feature: String },
    #[error("unknown user exception `{unknown}'")]
    UnknownUserException { unknown: String },
    #[error("{kind} `{id}' is already registered")]
    AlreadyRegistered { kind: String, id: String },
    #[error("{kind} `{id}' is not registered")]
    NotRegistered { kind: String, id: String },
    #[error("invalid version string `{input}'")]
    VersionParse { input: String },
    #[error("initialization error: {reason}")]
    Initialization { reason: String },
}

impl Error {
    pub fn marshal(reason: impl Into<String>) -> Self {
        Error::Marshal {
            reason: reason.into(),
        }
    }

    pub fn out_of_bounds(reason: impl Into<String>) -> Self {
        Error::UnmarshalOutOfBounds {
            reason: reason.into(),
        }
    }

    pub fn encapsulation(reason: impl Into<String>) -> Self {
        Error::Encapsulation {
            reason: reason.into(),
        }
    }

    pub fn no_value_factory(reason: impl Into<String>, type_id: impl Into<String>) -> Self {
        Error::NoValueFactory {
            reason: reason.into(),
            type_id: type_id.into(),
        }
    }

    /// Type id of the Ice exception this error represents.
    pub fn ice_id(&self) -> &'static str {
        self.ice_ids()[0]
    }

    /// Inheritance chain, most-derived first, ending at
    /// `::Ice::LocalException`.
    pub fn ice_ids(&self) -> &'static [&'static str] {
        match self {
            Error::UnmarshalOutOfBounds { .. } => &[
                "::Ice::UnmarshalOutOfBoundsException",
                MARSHAL_EXCEPTION,
                PROTOCOL_EXCEPTION,
                LOCAL_EXCEPTION,
            ],
            Error::Encapsulation { .. } => &[
                "::Ice::EncapsulationException",
                MARSHAL_EXCEPTION,
                PROTOCOL_EXCEPTION,
                LOCAL_EXCEPTION,
            ],
            Error::Marshal { .. } => &[MARSHAL_EXCEPTION, PROTOCOL_EXCEPTION, LOCAL_EXCEPTION],
            Error::NoValueFactory { .. } => &[
                "::Ice::NoValueFactoryException",
                MARSHAL_EXCEPTION,
                PROTOCOL_EXCEPTION,
                LOCAL_EXCEPTION,
            ],
            Error::UnexpectedObject { .. } => &[
                "::Ice::UnexpectedObjectException",
                MARSHAL_EXCEPTION,
                PROTOCOL_EXCEPTION,
                LOCAL_EXCEPTION,
            ],
            Error::MemoryLimit { .. } => &[
                "::Ice::MemoryLimitException",
                MARSHAL_EXCEPTION,
                PROTOCOL_EXCEPTION,
                LOCAL_EXCEPTION,
            ],
            Error::StringConversion { .. } => &[
                "::Ice::StringConversionException",
                MARSHAL_EXCEPTION,
                PROTOCOL_EXCEPTION,
                LOCAL_EXCEPTION,
            ],
            Error::UnsupportedEncoding { .. } => &[
                "::Ice::UnsupportedEncodingException",
                PROTOCOL_EXCEPTION,
                LOCAL_EXCEPTION,
            ],
            Error::FeatureNotSupported { .. } => {
                &["::Ice::FeatureNotSupportedException", LOCAL_EXCEPTION]
            }
            Error::UnknownUserException { .. } => &[
                "::Ice::UnknownUserException",
                UNKNOWN_EXCEPTION,
                LOCAL_EXCEPTION,
            ],
            Error::AlreadyRegistered { .. } => {
                &["::Ice::AlreadyRegisteredException", LOCAL_EXCEPTION]
            }
            Error::NotRegistered { .. } => &["::Ice::NotRegisteredException", LOCAL_EXCEPTION],
            Error::VersionParse { .. } => &["::Ice::VersionParseException", LOCAL_EXCEPTION],
            Error::Initialization { .. } => {
                &["::Ice::InitializationException", LOCAL_EXCEPTION]
            }
        }
    }

    /// Whether this error is, or derives from, the exception `id`.
    pub fn is_a(&self, id: &str) -> bool {
        self.ice_ids().contains(&id)
    }

    pub fn is_marshal_error(&self) -> bool {
        self.is_a(MARSHAL_EXCEPTION)
    }

    pub fn is_protocol_error(&self) -> bool {
        self.is_a(PROTOCOL_EXCEPTION)
    }
}

impl From<BufferError> for Error {
    fn from(err: BufferError) -> Self {
        Error::out_of_bounds(err.to_string())
    }
}
