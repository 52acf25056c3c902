//! Encoding versions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// An Ice encoding version, marshaled as two bytes (major, minor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EncodingVersion {
    pub major: u8,
    pub minor: u8,
}

pub const ENCODING_1_0: EncodingVersion = EncodingVersion { major: 1, minor: 0 };
pub const ENCODING_1_1: EncodingVersion = EncodingVersion { major: 1, minor: 1 };
pub const CURRENT_ENCODING: EncodingVersion = ENCODING_1_1;

impl EncodingVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl Default for EncodingVersion {
    fn default() -> Self {
        CURRENT_ENCODING
    }
}

impl fmt::Display for EncodingVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for EncodingVersion {
    type Err = Error;

    /// Parses `"<major>.<minor>"`; both parts must fit in a byte.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_err = || Error::VersionParse {
            input: s.to_string(),
        };
        let (major, minor) = s.trim().split_once('.').ok_or_else(parse_err)?;
        let major = major.parse::<u8>().map_err(|_| parse_err())?;
        let minor = minor.parse::<u8>().map_err(|_| parse_err())?;
        Ok(Self { major, minor })
    }
}

impl TryFrom<String> for EncodingVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EncodingVersion> for String {
    fn from(v: EncodingVersion) -> Self {
        v.to_string()
    }
}

/// Fails with [`Error::UnsupportedEncoding`] unless `v` is 1.0 or 1.1.
pub fn check_supported_encoding(v: EncodingVersion) -> Result<(), Error> {
    if v.major != CURRENT_ENCODING.major || v.minor > CURRENT_ENCODING.minor {
        return Err(Error::UnsupportedEncoding {
            bad: v,
            supported: CURRENT_ENCODING,
        });
    }
    Ok(())
}
