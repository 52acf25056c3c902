//! Stream configuration.
//!
//! A [`StreamConfig`] replaces the communicator-wide settings an Ice stream
//! would normally inherit. It can be deserialized from any serde format
//! (keys are kebab-case and every key is optional) or built from Ice
//! property names with [`StreamConfig::from_properties`].

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::format::FormatType;
use crate::version::{EncodingVersion, CURRENT_ENCODING};

pub const DEFAULT_CLASS_GRAPH_DEPTH_MAX: usize = 100;
const UNLIMITED_CLASS_GRAPH_DEPTH: usize = 0x7fff_ffff;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StreamConfig {
    /// Encoding used outside of any encapsulation.
    pub encoding: EncodingVersion,
    /// Class format used by encapsulations started with
    /// [`FormatType::Default`].
    pub format: FormatType,
    /// Skip slices of unknown value types instead of failing.
    pub slice_values: bool,
    /// Maximum nesting depth of a received class graph.
    pub class_graph_depth_max: usize,
    /// Log each sliced type under the `ice::slicing` target.
    pub trace_slicing: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            encoding: CURRENT_ENCODING,
            format: FormatType::Compact,
            slice_values: true,
            class_graph_depth_max: DEFAULT_CLASS_GRAPH_DEPTH_MAX,
            trace_slicing: false,
        }
    }
}

impl StreamConfig {
    /// Builds a configuration from Ice properties. Unknown keys are ignored.
    ///
    /// | property | effect |
    /// |---|---|
    /// | `Ice.Default.EncodingVersion` | `encoding` |
    /// | `Ice.Default.SlicedFormat` | `> 0` selects the sliced format |
    /// | `Ice.ClassGraphDepthMax` | `< 1` means unlimited |
    /// | `Ice.Trace.Slicing` | `> 0` enables slicing traces |
    pub fn from_properties<I, K, V>(props: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in props {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            match key {
                "Ice.Default.EncodingVersion" => {
                    config.encoding = value.parse().map_err(|_| Error::Initialization {
                        reason: format!("invalid value `{value}' for property `{key}'"),
                    })?;
                }
                "Ice.Default.SlicedFormat" => {
                    config.format = if int_property(key, value)? > 0 {
                        FormatType::Sliced
                    } else {
                        FormatType::Compact
                    };
                }
                "Ice.ClassGraphDepthMax" => {
                    let depth = int_property(key, value)?;
                    config.class_graph_depth_max = if depth < 1 {
                        UNLIMITED_CLASS_GRAPH_DEPTH
                    } else {
                        depth as usize
                    };
                }
                "Ice.Trace.Slicing" => {
                    config.trace_slicing = int_property(key, value)? > 0;
                }
                _ => {}
            }
        }
        Ok(config)
    }

    /// Format that [`FormatType::Default`] resolves to.
    pub fn default_format(&self) -> FormatType {
        match self.format {
            FormatType::Default => FormatType::Compact,
            other => other,
        }
    }
}

fn int_property(key: &str, value: &str) -> Result<i32, Error> {
    value.parse::<i32>().map_err(|_| Error::Initialization {
        reason: format!("invalid integer value `{value}' for property `{key}'"),
    })
}
