//! Unmarshaling of Ice-encoded data.

mod decoder;

use std::rc::Rc;

use ice_buffers::Reader;

use crate::config::StreamConfig;
use crate::error::Error;
use crate::exception::UserException;
use crate::factory::FactoryRegistry;
use crate::format::{OptionalFormat, OPTIONAL_END_MARKER};
use crate::streamable::Streamable;
use crate::value::ValueSlot;
use crate::version::{check_supported_encoding, EncodingVersion, ENCODING_1_0};

use decoder::Decoder;

struct ReadEncaps {
    /// Offset of the size field.
    start: usize,
    /// Size including the six header bytes.
    size: usize,
    encoding: EncodingVersion,
    decoder: Option<Decoder>,
    /// Spans the whole buffer and has no header on the wire.
    implicit: bool,
}

impl ReadEncaps {
    fn end(&self) -> usize {
        self.start + self.size
    }
}

/// Reads Ice-encoded data from a borrowed buffer.
///
/// Without an explicit encapsulation the whole buffer is treated as one
/// encapsulation using the stream's encoding.
pub struct InputStream<'a> {
    reader: Reader<'a>,
    encoding: EncodingVersion,
    config: StreamConfig,
    registry: Rc<FactoryRegistry>,
    encaps_stack: Vec<ReadEncaps>,
    start_seq: Option<usize>,
    min_seq_size: usize,
    compact_id_resolver: Option<Box<dyn Fn(i32) -> Option<String>>>,
}

impl<'a> InputStream<'a> {
    pub fn new(bytes: &'a [u8], config: StreamConfig, registry: Rc<FactoryRegistry>) -> Self {
        Self {
            reader: Reader::new(bytes),
            encoding: config.encoding,
            config,
            registry,
            encaps_stack: Vec::new(),
            start_seq: None,
            min_seq_size: 0,
            compact_id_resolver: None,
        }
    }

    /// A stream with the default configuration and no factories.
    pub fn with_encoding(bytes: &'a [u8], encoding: EncodingVersion) -> Self {
        Self::new(
            bytes,
            StreamConfig {
                encoding,
                ..StreamConfig::default()
            },
            Rc::new(FactoryRegistry::default()),
        )
    }

    /// Installs a resolver consulted for compact type ids before the
    /// registry's compact-id table.
    pub fn set_compact_id_resolver<F>(&mut self, resolver: F)
    where
        F: Fn(i32) -> Option<String> + 'static,
    {
        self.compact_id_resolver = Some(Box::new(resolver));
    }

    pub fn registry(&self) -> &FactoryRegistry {
        &self.registry
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Encoding of the current encapsulation, or the stream's encoding.
    pub fn encoding(&self) -> EncodingVersion {
        self.encaps_stack
            .last()
            .map_or(self.encoding, |encaps| encaps.encoding)
    }

    pub fn pos(&self) -> usize {
        self.reader.pos()
    }

    pub fn remaining(&self) -> usize {
        self.reader.remaining()
    }

    pub fn skip(&mut self, n: usize) -> Result<(), Error> {
        Ok(self.reader.skip(n)?)
    }

    // ------------------------------------------------------------ Primitives

    pub fn read_byte(&mut self) -> Result<u8, Error> {
        Ok(self.reader.u8()?)
    }

    pub fn read_bool(&mut self) -> Result<bool, Error> {
        Ok(self.reader.bool()?)
    }

    pub fn read_short(&mut self) -> Result<i16, Error> {
        Ok(self.reader.i16()?)
    }

    pub fn read_int(&mut self) -> Result<i32, Error> {
        Ok(self.reader.i32()?)
    }

    pub fn read_long(&mut self) -> Result<i64, Error> {
        Ok(self.reader.i64()?)
    }

    pub fn read_float(&mut self) -> Result<f32, Error> {
        Ok(self.reader.f32()?)
    }

    pub fn read_double(&mut self) -> Result<f64, Error> {
        Ok(self.reader.f64()?)
    }

    // ----------------------------------------------------------------- Sizes

    pub fn read_size(&mut self) -> Result<usize, Error> {
        let b = self.reader.u8()?;
        if b < 255 {
            return Ok(b as usize);
        }
        let v = self.reader.i32()?;
        if v < 0 {
            return Err(Error::out_of_bounds(format!("negative size {v}")));
        }
        Ok(v as usize)
    }

    pub fn skip_size(&mut self) -> Result<(), Error> {
        if self.reader.u8()? == 255 {
            self.reader.skip(4)?;
        }
        Ok(())
    }

    /// Reads a sequence size and checks that the remaining input can hold
    /// `size * min_size` bytes. Sizes of sequences nested in a sequence
    /// still being read are accumulated into one estimate.
    pub fn read_and_check_seq_size(&mut self, min_size: usize) -> Result<usize, Error> {
        let size = self.read_size()?;
        if size == 0 {
            return Ok(0);
        }
        let pos = self.reader.pos();
        let needed = size.saturating_mul(min_size);
        match self.start_seq {
            Some(start) if pos <= start.saturating_add(self.min_seq_size) => {
                self.min_seq_size = self.min_seq_size.saturating_add(needed);
            }
            _ => {
                self.start_seq = Some(pos);
                self.min_seq_size = needed;
            }
        }
        let start = self.start_seq.unwrap_or(pos);
        if start.saturating_add(self.min_seq_size) > self.reader.end() {
            return Err(Error::out_of_bounds(format!(
                "sequence of {size} elements exceeds the remaining input"
            )));
        }
        Ok(size)
    }

    // ------------------------------------------------------ Strings and blobs

    pub fn read_string(&mut self) -> Result<String, Error> {
        let size = self.read_size()?;
        if size == 0 {
            return Ok(String::new());
        }
        let bytes = self.reader.buf(size)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::StringConversion {
            reason: e.to_string(),
        })
    }

    /// Reads `n` raw bytes without copying.
    pub fn read_blob(&mut self, n: usize) -> Result<&'a [u8], Error> {
        Ok(self.reader.buf(n)?)
    }

    pub fn read_byte_seq(&mut self) -> Result<&'a [u8], Error> {
        let size = self.read_size()?;
        self.read_blob(size)
    }

    pub fn read<T: Streamable>(&mut self) -> Result<T, Error> {
        T::read(self)
    }

    /// Reads an enumerator and checks it against `max_value`.
    pub fn read_enum(&mut self, max_value: i32) -> Result<i32, Error> {
        let v = if self.encoding() == ENCODING_1_0 {
            if max_value < 127 {
                self.read_byte()? as i32
            } else if max_value < 32767 {
                self.read_short()? as i32
            } else {
                self.read_int()?
            }
        } else {
            self.read_size()? as i32
        };
        if v < 0 || v > max_value {
            return Err(Error::marshal(format!("enumerator value {v} is out of range")));
        }
        Ok(v)
    }

    // --------------------------------------------------------- Encapsulations

    pub fn read_encoding_version(&mut self) -> Result<EncodingVersion, Error> {
        let major = self.reader.u8()?;
        let minor = self.reader.u8()?;
        Ok(EncodingVersion::new(major, minor))
    }

    /// Reads an encapsulation header; the encapsulation must fit in the
    /// remaining input.
    fn read_encaps_header(&mut self) -> Result<(usize, usize, EncodingVersion), Error> {
        let start = self.reader.pos();
        let size = self.reader.i32()?;
        if size < 6 {
            return Err(Error::out_of_bounds(format!(
                "encapsulation size {size} is smaller than its header"
            )));
        }
        let size = size as usize;
        if start + size > self.reader.end() {
            return Err(Error::out_of_bounds(format!(
                "encapsulation of {size} bytes exceeds the remaining input"
            )));
        }
        let encoding = self.read_encoding_version()?;
        Ok((start, size, encoding))
    }

    pub fn start_encapsulation(&mut self) -> Result<EncodingVersion, Error> {
        let (start, size, encoding) = self.read_encaps_header()?;
        check_supported_encoding(encoding)?;
        self.encaps_stack.push(ReadEncaps {
            start,
            size,
            encoding,
            decoder: None,
            implicit: false,
        });
        Ok(encoding)
    }

    /// Ends the current encapsulation. With 1.1, unread tagged members are
    /// skipped first.
    pub fn end_encapsulation(&mut self) -> Result<(), Error> {
        let (end, encoding) = match self.encaps_stack.last() {
            Some(encaps) if !encaps.implicit => (encaps.end(), encaps.encoding),
            _ => return Err(Error::encapsulation("no encapsulation to end")),
        };
        if encoding != ENCODING_1_0 {
            self.skip_optionals()?;
            if self.reader.pos() != end {
                return Err(unread_encapsulation(self.reader.pos(), end));
            }
        } else if self.reader.pos() != end {
            // Old 1.0 peers may append one byte to some encapsulations.
            if self.reader.pos() + 1 != end {
                return Err(unread_encapsulation(self.reader.pos(), end));
            }
            self.reader.skip(1)?;
        }
        self.encaps_stack.pop();
        Ok(())
    }

    /// Skips an encapsulation expected to be empty. With 1.0 it must be
    /// exactly six bytes; with 1.1 any tagged content is skipped.
    pub fn skip_empty_encapsulation(&mut self) -> Result<EncodingVersion, Error> {
        let start = self.reader.pos();
        let size = self.reader.i32()?;
        if size < 6 {
            return Err(Error::encapsulation(format!(
                "encapsulation size {size} is smaller than its header"
            )));
        }
        let size = size as usize;
        if start + size > self.reader.end() {
            return Err(Error::out_of_bounds(format!(
                "encapsulation of {size} bytes exceeds the remaining input"
            )));
        }
        let encoding = self.read_encoding_version()?;
        check_supported_encoding(encoding)?;
        if encoding == ENCODING_1_0 {
            if size != 6 {
                return Err(Error::encapsulation(format!(
                    "1.0 encapsulation of {size} bytes is not empty"
                )));
            }
        } else {
            self.reader.set_pos(start + size)?;
        }
        Ok(encoding)
    }

    /// Returns a whole encapsulation, header included, without copying.
    pub fn read_encapsulation(&mut self) -> Result<(EncodingVersion, &'a [u8]), Error> {
        let (start, size, encoding) = self.read_encaps_header()?;
        self.reader.set_pos(start + size)?;
        Ok((encoding, self.reader.window(start, start + size)?))
    }

    pub fn skip_encapsulation(&mut self) -> Result<EncodingVersion, Error> {
        let (start, size, encoding) = self.read_encaps_header()?;
        self.reader.set_pos(start + size)?;
        Ok(encoding)
    }

    /// Size of the current encapsulation's payload, excluding the header.
    pub fn encapsulation_size(&self) -> Result<usize, Error> {
        match self.encaps_stack.last() {
            Some(encaps) if !encaps.implicit => Ok(encaps.size - 6),
            _ => Err(Error::encapsulation("no current encapsulation")),
        }
    }

    /// Makes sure an encapsulation with a decoder exists, creating the
    /// implicit one spanning the whole buffer if needed.
    fn init_encaps(&mut self) {
        if self.encaps_stack.is_empty() {
            self.encaps_stack.push(ReadEncaps {
                start: 0,
                size: self.reader.end(),
                encoding: self.encoding,
                decoder: None,
                implicit: true,
            });
        }
        let config = &self.config;
        if let Some(encaps) = self.encaps_stack.last_mut() {
            if encaps.decoder.is_none() {
                encaps.decoder = Some(Decoder::new(encaps.encoding, config));
            }
        }
    }

    fn encaps_end(&self) -> usize {
        self.encaps_stack
            .last()
            .map_or(self.reader.end(), ReadEncaps::end)
    }

    // ---------------------------------------------------------------- Tagged

    /// Positions the stream on tagged member `tag` if present.
    ///
    /// Lower tags are skipped. Returns `false` without consuming anything
    /// when the member is absent; fails when the member exists with a
    /// different format.
    pub fn read_optional(&mut self, tag: u32, expected: OptionalFormat) -> Result<bool, Error> {
        if self.in_slice_without_optional_members() {
            return Ok(false);
        }
        self.read_optional_impl(tag, expected)
    }

    fn read_optional_impl(&mut self, tag: u32, expected: OptionalFormat) -> Result<bool, Error> {
        if self.encoding() == ENCODING_1_0 {
            return Ok(false);
        }
        let end = self.encaps_end();
        loop {
            if self.reader.pos() >= end {
                return Ok(false);
            }
            let v = self.reader.u8()?;
            if v == OPTIONAL_END_MARKER {
                self.reader.set_pos(self.reader.pos() - 1)?;
                return Ok(false);
            }
            let format = OptionalFormat::from_tag_byte(v);
            let mut read_tag = (v >> 3) as u32;
            if read_tag == 30 {
                read_tag = self.read_size()? as u32;
            }
            if read_tag > tag {
                let rewind = if read_tag < 30 {
                    1
                } else if read_tag < 255 {
                    2
                } else {
                    6
                };
                self.reader.set_pos(self.reader.pos() - rewind)?;
                return Ok(false);
            }
            if read_tag < tag {
                tracing::trace!(target: "ice::slicing", tag = read_tag, ?format, "skipping tagged member");
                self.skip_optional(format)?;
                continue;
            }
            if format != expected {
                return Err(Error::marshal(format!(
                    "invalid optional data member `{tag}': unexpected format"
                )));
            }
            return Ok(true);
        }
    }

    /// Skips the body of a tagged member of the given format.
    pub fn skip_optional(&mut self, format: OptionalFormat) -> Result<(), Error> {
        match format {
            OptionalFormat::F1 => self.skip(1),
            OptionalFormat::F2 => self.skip(2),
            OptionalFormat::F4 => self.skip(4),
            OptionalFormat::F8 => self.skip(8),
            OptionalFormat::Size => self.skip_size(),
            OptionalFormat::VSize => {
                let size = self.read_size()?;
                self.skip(size)
            }
            OptionalFormat::FSize => {
                let size = self.read_int()?;
                if size < 0 {
                    return Err(Error::out_of_bounds(format!("negative FSize {size}")));
                }
                self.skip(size as usize)
            }
            OptionalFormat::Class => {
                self.init_encaps();
                self.decoder_read_value(None)
            }
        }
    }

    /// Skips every remaining tagged member up to the end marker (consumed)
    /// or the end of the encapsulation.
    pub fn skip_optionals(&mut self) -> Result<(), Error> {
        let end = self.encaps_end();
        loop {
            if self.reader.pos() >= end {
                return Ok(());
            }
            let v = self.reader.u8()?;
            if v == OPTIONAL_END_MARKER {
                return Ok(());
            }
            let format = OptionalFormat::from_tag_byte(v);
            if v >> 3 == 30 {
                self.skip_size()?;
            }
            tracing::trace!(target: "ice::slicing", ?format, "skipping trailing tagged member");
            self.skip_optional(format)?;
        }
    }

    /// Reads tagged member `tag`, or `None` when it is absent.
    pub fn read_tagged<T: Streamable>(&mut self, tag: u32) -> Result<Option<T>, Error> {
        if self.read_optional(tag, T::OPTIONAL_FORMAT)? {
            Ok(Some(T::read_tagged_body(self)?))
        } else {
            Ok(None)
        }
    }

    pub fn read_tagged_enum(&mut self, tag: u32, max_value: i32) -> Result<Option<i32>, Error> {
        if self.read_optional(tag, OptionalFormat::Size)? {
            Ok(Some(self.read_enum(max_value)?))
        } else {
            Ok(None)
        }
    }

    pub fn read_tagged_value(&mut self, tag: u32) -> Result<Option<ValueSlot>, Error> {
        if self.read_optional(tag, OptionalFormat::Class)? {
            Ok(Some(self.read_value()?))
        } else {
            Ok(None)
        }
    }

    // --------------------------------------------------------------- Classes

    /// Reads a class reference. The returned slot is filled once the
    /// instance is available, which may be after this call returns.
    pub fn read_value(&mut self) -> Result<ValueSlot, Error> {
        let slot = ValueSlot::new();
        self.read_value_into(&slot)?;
        Ok(slot)
    }

    pub fn read_value_into(&mut self, slot: &ValueSlot) -> Result<(), Error> {
        self.init_encaps();
        self.decoder_read_value(Some(slot.clone()))
    }

    /// Reads the instances that follow 1.0-encoded data using classes. With
    /// 1.1 there is nothing to read.
    pub fn read_pending_values(&mut self) -> Result<(), Error> {
        let has_decoder = self
            .encaps_stack
            .last()
            .is_some_and(|encaps| encaps.decoder.is_some());
        if has_decoder {
            self.decoder_read_pending_values()
        } else {
            if self.encoding() == ENCODING_1_0 {
                self.skip_size()?;
            }
            Ok(())
        }
    }

    /// Reads a user exception, instantiated through the registry.
    pub fn read_exception(&mut self) -> Result<Box<dyn UserException>, Error> {
        self.init_encaps();
        self.decoder_read_exception()
    }
}

fn unread_encapsulation(pos: usize, end: usize) -> Error {
    Error::encapsulation(format!(
        "encapsulation ends at offset {end} but the stream is at offset {pos}"
    ))
}
