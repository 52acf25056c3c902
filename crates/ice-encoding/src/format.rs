//! Wire-format categories, class formats and slice flags.

use serde::{Deserialize, Serialize};

/// Wire-format category of a tagged member, stored in the low three bits
/// of the tag header. A reader can skip a member of any category without
/// knowing its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OptionalFormat {
    F1 = 0,
    F2 = 1,
    F4 = 2,
    F8 = 3,
    Size = 4,
    VSize = 5,
    FSize = 6,
    Class = 7,
}

impl OptionalFormat {
    /// Decodes the low three bits of a tag header byte.
    pub fn from_tag_byte(v: u8) -> Self {
        match v & 0x07 {
            0 => OptionalFormat::F1,
            1 => OptionalFormat::F2,
            2 => OptionalFormat::F4,
            3 => OptionalFormat::F8,
            4 => OptionalFormat::Size,
            5 => OptionalFormat::VSize,
            6 => OptionalFormat::FSize,
            _ => OptionalFormat::Class,
        }
    }
}

/// Class and exception encoding format for an encapsulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatType {
    /// Use the format configured on the stream.
    Default,
    /// Only the most-derived slice carries a type id; slices have no size.
    #[default]
    Compact,
    /// Every slice carries its type id and size so receivers can skip it.
    Sliced,
}

pub const OPTIONAL_END_MARKER: u8 = 0xFF;

pub const FLAG_HAS_TYPE_ID_STRING: u8 = 1 << 0;
pub const FLAG_HAS_TYPE_ID_INDEX: u8 = 1 << 1;
pub const FLAG_HAS_TYPE_ID_COMPACT: u8 = FLAG_HAS_TYPE_ID_STRING | FLAG_HAS_TYPE_ID_INDEX;
pub const FLAG_HAS_OPTIONAL_MEMBERS: u8 = 1 << 2;
pub const FLAG_HAS_INDIRECTION_TABLE: u8 = 1 << 3;
pub const FLAG_HAS_SLICE_SIZE: u8 = 1 << 4;
pub const FLAG_IS_LAST_SLICE: u8 = 1 << 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SliceType {
    NoSlice,
    Value,
    Exception,
}
