//! Marshaling of Ice-encoded data.

mod encoder;

use ice_buffers::Writer;

use crate::config::StreamConfig;
use crate::error::Error;
use crate::exception::UserException;
use crate::format::{FormatType, OptionalFormat};
use crate::streamable::Streamable;
use crate::value::ValuePtr;
use crate::version::{check_supported_encoding, EncodingVersion, ENCODING_1_0};

use encoder::Encoder;

struct WriteEncaps {
    /// Offset of the size field; unused by the implicit encapsulation.
    start: usize,
    encoding: EncodingVersion,
    format: FormatType,
    encoder: Option<Encoder>,
    implicit: bool,
}

/// Converts a length to its `i32` wire form.
fn wire_size(v: usize) -> Result<i32, Error> {
    i32::try_from(v).map_err(|_| Error::marshal(format!("size {v} does not fit in an i32")))
}

/// Writes Ice-encoded data into a growable buffer.
///
/// Data written outside any explicit encapsulation uses the stream's
/// encoding and configured class format.
pub struct OutputStream {
    writer: Writer,
    encoding: EncodingVersion,
    config: StreamConfig,
    encaps_stack: Vec<WriteEncaps>,
}

impl Default for OutputStream {
    fn default() -> Self {
        Self::new(StreamConfig::default())
    }
}

impl OutputStream {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            writer: Writer::new(),
            encoding: config.encoding,
            config,
            encaps_stack: Vec::new(),
        }
    }

    pub fn with_encoding(encoding: EncodingVersion) -> Self {
        Self::new(StreamConfig {
            encoding,
            ..StreamConfig::default()
        })
    }

    /// Encoding of the current encapsulation, or the stream's encoding.
    pub fn encoding(&self) -> EncodingVersion {
        self.encaps_stack
            .last()
            .map_or(self.encoding, |encaps| encaps.encoding)
    }

    /// Class format in effect for the current encapsulation.
    pub fn format(&self) -> FormatType {
        match self.encaps_stack.last().map(|encaps| encaps.format) {
            Some(FormatType::Default) | None => self.config.default_format(),
            Some(format) => format,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn pos(&self) -> usize {
        self.writer.pos()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.writer.as_slice()
    }

    /// Returns the encoded bytes.
    pub fn finished(self) -> Vec<u8> {
        self.writer.into_vec()
    }

    // ------------------------------------------------------------ Primitives

    pub fn write_byte(&mut self, v: u8) {
        self.writer.u8(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.writer.bool(v);
    }

    pub fn write_short(&mut self, v: i16) {
        self.writer.i16(v);
    }

    pub fn write_int(&mut self, v: i32) {
        self.writer.i32(v);
    }

    pub fn write_long(&mut self, v: i64) {
        self.writer.i64(v);
    }

    pub fn write_float(&mut self, v: f32) {
        self.writer.f32(v);
    }

    pub fn write_double(&mut self, v: f64) {
        self.writer.f64(v);
    }

    /// Overwrites the `i32` at `pos`.
    pub fn rewrite_int(&mut self, v: i32, pos: usize) -> Result<(), Error> {
        self.writer
            .patch_i32(pos, v)
            .map_err(|e| Error::marshal(e.to_string()))
    }

    // ----------------------------------------------------------------- Sizes

    /// Writes a size: one byte up to 254, otherwise `255` and an `i32`.
    ///
    /// Sizes above `i32::MAX` cannot be represented on the wire and fail
    /// with [`Error::Marshal`].
    pub fn write_size(&mut self, v: usize) -> Result<(), Error> {
        if v > 254 {
            let v = wire_size(v)?;
            self.writer.u8(255);
            self.writer.i32(v);
        } else {
            self.writer.u8(v as u8);
        }
        Ok(())
    }

    /// Rewrites a size previously written at `pos` with the same width.
    pub fn rewrite_size(&mut self, v: usize, pos: usize) -> Result<(), Error> {
        let patched = if v > 254 {
            let v = wire_size(v)?;
            self.writer
                .patch_u8(pos, 255)
                .and_then(|_| self.writer.patch_i32(pos + 1, v))
        } else {
            self.writer.patch_u8(pos, v as u8)
        };
        patched.map_err(|e| Error::marshal(e.to_string()))
    }

    /// Reserves a four-byte size placeholder and returns its position.
    pub fn start_size(&mut self) -> usize {
        let pos = self.writer.pos();
        self.writer.i32(0);
        pos
    }

    /// Patches the placeholder at `pos` with the number of bytes written
    /// after it.
    pub fn end_size(&mut self, pos: usize) -> Result<(), Error> {
        let size = self
            .writer
            .pos()
            .checked_sub(pos + 4)
            .ok_or_else(|| Error::marshal(format!("no size placeholder at {pos}")))?;
        self.rewrite_int(wire_size(size)?, pos)
    }

    // ------------------------------------------------------ Strings and blobs

    pub fn write_string(&mut self, v: &str) -> Result<(), Error> {
        self.write_size(v.len())?;
        self.writer.utf8(v);
        Ok(())
    }

    /// Writes raw bytes with no size prefix.
    pub fn write_blob(&mut self, v: &[u8]) {
        self.writer.buf(v);
    }

    pub fn write_byte_seq(&mut self, v: &[u8]) -> Result<(), Error> {
        self.write_size(v.len())?;
        self.writer.buf(v);
        Ok(())
    }

    pub fn write<T: Streamable>(&mut self, v: &T) -> Result<(), Error> {
        v.write(self)
    }

    /// Writes an enumerator; 1.0 picks the narrowest integer able to hold
    /// `max_value`, 1.1 uses a size.
    pub fn write_enum(&mut self, v: i32, max_value: i32) -> Result<(), Error> {
        if v < 0 || v > max_value {
            return Err(Error::marshal(format!("enumerator value {v} is out of range")));
        }
        if self.encoding() == ENCODING_1_0 {
            if max_value < 127 {
                self.write_byte(v as u8);
            } else if max_value < 32767 {
                self.write_short(v as i16);
            } else {
                self.write_int(v);
            }
        } else {
            self.write_size(v as usize)?;
        }
        Ok(())
    }

    // --------------------------------------------------------- Encapsulations

    /// Starts an encapsulation with the current encapsulation's encoding and
    /// format, or with the stream's encoding and the default format.
    pub fn start_encapsulation(&mut self) -> Result<(), Error> {
        match self.encaps_stack.last() {
            Some(encaps) => {
                let (encoding, format) = (encaps.encoding, encaps.format);
                self.start_encapsulation_with(encoding, format)
            }
            None => self.start_encapsulation_with(self.encoding, FormatType::Default),
        }
    }

    pub fn start_encapsulation_with(
        &mut self,
        encoding: EncodingVersion,
        format: FormatType,
    ) -> Result<(), Error> {
        check_supported_encoding(encoding)?;
        let start = self.writer.pos();
        self.encaps_stack.push(WriteEncaps {
            start,
            encoding,
            format,
            encoder: None,
            implicit: false,
        });
        self.writer.i32(0);
        self.write_encoding_version(encoding);
        Ok(())
    }

    /// Patches the size of the current encapsulation, which counts the size
    /// field and the encoding version.
    pub fn end_encapsulation(&mut self) -> Result<(), Error> {
        let start = match self.encaps_stack.last() {
            Some(encaps) if !encaps.implicit => encaps.start,
            _ => return Err(Error::encapsulation("no encapsulation to end")),
        };
        let size = wire_size(self.writer.pos() - start)?;
        self.rewrite_int(size, start)?;
        self.encaps_stack.pop();
        Ok(())
    }

    pub fn write_empty_encapsulation(&mut self, encoding: EncodingVersion) -> Result<(), Error> {
        check_supported_encoding(encoding)?;
        self.writer.i32(6);
        self.write_encoding_version(encoding);
        Ok(())
    }

    /// Copies an already encoded encapsulation, header included.
    pub fn write_encapsulation(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if bytes.len() < 6 {
            return Err(Error::encapsulation(format!(
                "encapsulation of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        self.writer.buf(bytes);
        Ok(())
    }

    pub fn write_encoding_version(&mut self, v: EncodingVersion) {
        self.writer.u8(v.major);
        self.writer.u8(v.minor);
    }

    /// Makes sure an encapsulation with an encoder exists, creating the
    /// implicit one if needed.
    fn init_encaps(&mut self) {
        if self.encaps_stack.is_empty() {
            self.encaps_stack.push(WriteEncaps {
                start: self.writer.pos(),
                encoding: self.encoding,
                format: FormatType::Default,
                encoder: None,
                implicit: true,
            });
        }
        let default_format = self.config.default_format();
        if let Some(encaps) = self.encaps_stack.last_mut() {
            if encaps.format == FormatType::Default {
                encaps.format = default_format;
            }
            if encaps.encoder.is_none() {
                encaps.encoder = Some(Encoder::new(encaps.encoding, encaps.format));
            }
        }
    }

    // ---------------------------------------------------------------- Tagged

    /// Writes the header of a tagged member. Returns `false` when the
    /// encoding does not support tagged members, in which case the member
    /// must not be written.
    pub fn write_optional(&mut self, tag: u32, format: OptionalFormat) -> Result<bool, Error> {
        if self.encoding() == ENCODING_1_0 {
            return Ok(false);
        }
        let v = format as u8;
        if tag < 30 {
            self.writer.u8(v | (tag as u8) << 3);
        } else {
            let tag = wire_size(tag as usize)?;
            self.writer.u8(v | 0xF0);
            self.write_size(tag as usize)?;
        }
        self.mark_optional_members();
        Ok(true)
    }

    /// Writes `v` as tagged member `tag`; nothing is written when `v` is
    /// absent.
    pub fn write_tagged<T: Streamable>(&mut self, tag: u32, v: Option<&T>) -> Result<(), Error> {
        if let Some(v) = v {
            if self.write_optional(tag, T::OPTIONAL_FORMAT)? {
                v.write_tagged_body(self)?;
            }
        }
        Ok(())
    }

    /// Writes an enumerator as tagged member `tag` with the `Size` format.
    pub fn write_tagged_enum(
        &mut self,
        tag: u32,
        v: Option<i32>,
        max_value: i32,
    ) -> Result<(), Error> {
        if let Some(v) = v {
            if self.write_optional(tag, OptionalFormat::Size)? {
                self.write_enum(v, max_value)?;
            }
        }
        Ok(())
    }

    pub fn write_tagged_value(&mut self, tag: u32, v: Option<&ValuePtr>) -> Result<(), Error> {
        if let Some(v) = v {
            if self.write_optional(tag, OptionalFormat::Class)? {
                self.write_value(Some(v))?;
            }
        }
        Ok(())
    }

    // --------------------------------------------------------------- Classes

    /// Writes a class reference; `None` is the nil reference.
    pub fn write_value(&mut self, v: Option<&ValuePtr>) -> Result<(), Error> {
        self.init_encaps();
        self.encoder_write_value(v)
    }

    /// Writes the instances queued by 1.0 class references. With 1.1 there
    /// is nothing to write.
    pub fn write_pending_values(&mut self) -> Result<(), Error> {
        let has_encoder = self
            .encaps_stack
            .last()
            .is_some_and(|encaps| encaps.encoder.is_some());
        if has_encoder {
            self.encoder_write_pending_values()
        } else {
            if self.encoding() == ENCODING_1_0 {
                self.write_size(0)?;
            }
            Ok(())
        }
    }

    pub fn write_exception(&mut self, ex: &dyn UserException) -> Result<(), Error> {
        self.init_encaps();
        self.encoder_write_exception(ex)
    }
}
