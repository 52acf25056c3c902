//! Class and exception encoders for encodings 1.0 and 1.1.
//!
//! The encoder state lives in the current encapsulation. The marshaling
//! logic is implemented on [`OutputStream`] so that user callbacks
//! (`ice_write`) can receive the stream while no encoder state is borrowed.

use std::collections::HashMap;
use std::mem;
use std::rc::Rc;

use indexmap::IndexMap;

use super::{wire_size, OutputStream};
use crate::error::Error;
use crate::exception::UserException;
use crate::format::{
    FormatType, SliceType, FLAG_HAS_INDIRECTION_TABLE, FLAG_HAS_OPTIONAL_MEMBERS,
    FLAG_HAS_SLICE_SIZE, FLAG_HAS_TYPE_ID_COMPACT, FLAG_HAS_TYPE_ID_INDEX,
    FLAG_HAS_TYPE_ID_STRING, FLAG_IS_LAST_SLICE, OPTIONAL_END_MARKER,
};
use crate::value::{value_key, SlicedData, ValuePtr, OBJECT_TYPE_ID};
use crate::version::{EncodingVersion, ENCODING_1_0};

pub(super) struct Encoder {
    type_id_map: HashMap<String, usize>,
    type_id_index: usize,
    kind: EncoderKind,
}

enum EncoderKind {
    V10(Encoder10),
    V11(Encoder11),
}

struct Encoder10 {
    slice_type: SliceType,
    /// Start of the current slice's payload, set while a slice is open.
    write_slice: Option<usize>,
    value_id_index: usize,
    to_be_marshaled: IndexMap<usize, (usize, ValuePtr)>,
    marshaled: HashMap<usize, (usize, ValuePtr)>,
}

struct Encoder11 {
    format: FormatType,
    value_id_index: usize,
    marshaled: HashMap<usize, (usize, ValuePtr)>,
    stack: Vec<InstanceData>,
}

struct InstanceData {
    slice_type: SliceType,
    first_slice: bool,
    slice_flags: u8,
    slice_flags_pos: usize,
    write_slice: Option<usize>,
    indirection_table: Vec<ValuePtr>,
    indirection_map: HashMap<usize, usize>,
}

impl InstanceData {
    fn new(slice_type: SliceType) -> Self {
        Self {
            slice_type,
            first_slice: true,
            slice_flags: 0,
            slice_flags_pos: 0,
            write_slice: None,
            indirection_table: Vec::new(),
            indirection_map: HashMap::new(),
        }
    }
}

impl Encoder {
    pub(super) fn new(encoding: EncodingVersion, format: FormatType) -> Self {
        let kind = if encoding == ENCODING_1_0 {
            EncoderKind::V10(Encoder10 {
                slice_type: SliceType::NoSlice,
                write_slice: None,
                value_id_index: 0,
                to_be_marshaled: IndexMap::new(),
                marshaled: HashMap::new(),
            })
        } else {
            EncoderKind::V11(Encoder11 {
                format,
                value_id_index: 1,
                marshaled: HashMap::new(),
                stack: Vec::new(),
            })
        };
        Self {
            type_id_map: HashMap::new(),
            type_id_index: 0,
            kind,
        }
    }

    /// Returns the index of an already written type id, or registers it
    /// and returns `None`.
    fn register_type_id(&mut self, type_id: &str) -> Option<usize> {
        if let Some(index) = self.type_id_map.get(type_id) {
            return Some(*index);
        }
        self.type_id_index += 1;
        self.type_id_map
            .insert(type_id.to_string(), self.type_id_index);
        None
    }

    fn v10(&mut self) -> Result<&mut Encoder10, Error> {
        match &mut self.kind {
            EncoderKind::V10(e) => Ok(e),
            EncoderKind::V11(_) => Err(Error::marshal("1.0 encoder expected")),
        }
    }

    fn v11(&mut self) -> Result<&mut Encoder11, Error> {
        match &mut self.kind {
            EncoderKind::V11(e) => Ok(e),
            EncoderKind::V10(_) => Err(Error::marshal("1.1 encoder expected")),
        }
    }

    fn current(&mut self) -> Result<&mut InstanceData, Error> {
        self.v11()?
            .stack
            .last_mut()
            .ok_or_else(|| Error::marshal("no instance is being marshaled"))
    }

    fn is_v10(&self) -> bool {
        matches!(self.kind, EncoderKind::V10(_))
    }
}

fn slice_not_started() -> Error {
    Error::marshal("end_slice without start_slice")
}

fn pre_marshal(v: &ValuePtr) {
    match v.try_borrow_mut() {
        Ok(mut value) => value.ice_pre_marshal(),
        Err(_) => tracing::warn!("skipping ice_pre_marshal on a borrowed instance"),
    }
}

fn write_instance_body(os: &mut OutputStream, v: &ValuePtr) -> Result<(), Error> {
    let value = v
        .try_borrow()
        .map_err(|_| Error::marshal("instance is mutably borrowed while being marshaled"))?;
    value.ice_write(os)
}

impl OutputStream {
    fn encoder(&mut self) -> Result<&mut Encoder, Error> {
        self.encaps_stack
            .last_mut()
            .and_then(|encaps| encaps.encoder.as_mut())
            .ok_or_else(|| Error::marshal("no class encoder is active"))
    }

    pub(super) fn mark_optional_members(&mut self) {
        let Some(encoder) = self
            .encaps_stack
            .last_mut()
            .and_then(|encaps| encaps.encoder.as_mut())
        else {
            return;
        };
        if let EncoderKind::V11(e) = &mut encoder.kind {
            if let Some(current) = e.stack.last_mut() {
                current.slice_flags |= FLAG_HAS_OPTIONAL_MEMBERS;
            }
        }
    }

    pub(super) fn encoder_write_value(&mut self, v: Option<&ValuePtr>) -> Result<(), Error> {
        if self.encoder()?.is_v10() {
            self.write_value10(v)
        } else {
            self.write_value11(v)
        }
    }

    pub(super) fn encoder_write_pending_values(&mut self) -> Result<(), Error> {
        if self.encoder()?.is_v10() {
            self.write_pending_values10()
        } else {
            Ok(())
        }
    }

    pub(super) fn encoder_write_exception(&mut self, ex: &dyn UserException) -> Result<(), Error> {
        if self.encoder()?.is_v10() {
            // 1.0 exceptions start with a flag telling whether pending
            // values follow the exception slices.
            let uses_classes = ex.ice_uses_classes();
            self.write_bool(uses_classes);
            ex.ice_write(self)?;
            if uses_classes {
                self.write_pending_values10()?;
            }
            Ok(())
        } else {
            ex.ice_write(self)
        }
    }

    /// Starts marshaling a class instance. Preserved slices are written
    /// first when the sliced format is in effect.
    pub fn start_value(&mut self, sliced_data: Option<Rc<SlicedData>>) -> Result<(), Error> {
        self.start_instance(SliceType::Value, sliced_data)
    }

    pub fn end_value(&mut self) -> Result<(), Error> {
        self.end_instance()
    }

    pub fn start_exception(&mut self, sliced_data: Option<Rc<SlicedData>>) -> Result<(), Error> {
        self.start_instance(SliceType::Exception, sliced_data)
    }

    pub fn end_exception(&mut self) -> Result<(), Error> {
        self.end_instance()
    }

    fn start_instance(
        &mut self,
        slice_type: SliceType,
        sliced_data: Option<Rc<SlicedData>>,
    ) -> Result<(), Error> {
        self.init_encaps();
        let encoder = self.encoder()?;
        match &mut encoder.kind {
            EncoderKind::V10(e) => {
                e.slice_type = slice_type;
                Ok(())
            }
            EncoderKind::V11(e) => {
                e.stack.push(InstanceData::new(slice_type));
                match sliced_data {
                    Some(data) => self.write_sliced_data(&data),
                    None => Ok(()),
                }
            }
        }
    }

    fn end_instance(&mut self) -> Result<(), Error> {
        let encoder = self.encoder()?;
        match &mut encoder.kind {
            EncoderKind::V10(e) => {
                if e.slice_type == SliceType::Value {
                    // 1.0 instances end with an empty `::Ice::Object` slice.
                    self.start_slice10(OBJECT_TYPE_ID)?;
                    self.write_size(0)?;
                    self.end_slice10()?;
                }
                self.encoder()?.v10()?.slice_type = SliceType::NoSlice;
                Ok(())
            }
            EncoderKind::V11(e) => {
                e.stack.pop();
                Ok(())
            }
        }
    }

    /// Starts a slice. `compact_id` replaces the type id string with a
    /// number when set; `last` marks the least-derived slice.
    pub fn start_slice(
        &mut self,
        type_id: &str,
        compact_id: Option<i32>,
        last: bool,
    ) -> Result<(), Error> {
        if self.encoder()?.is_v10() {
            self.start_slice10(type_id)
        } else {
            self.start_slice11(type_id, compact_id, last)
        }
    }

    pub fn end_slice(&mut self) -> Result<(), Error> {
        if self.encoder()?.is_v10() {
            self.end_slice10()
        } else {
            self.end_slice11()
        }
    }

    // ------------------------------------------------------------- 1.0

    fn write_value10(&mut self, v: Option<&ValuePtr>) -> Result<(), Error> {
        match v {
            None => self.write_int(0),
            Some(v) => {
                let index = self.register_value10(v)?;
                self.write_int(-wire_size(index)?);
            }
        }
        Ok(())
    }

    fn register_value10(&mut self, v: &ValuePtr) -> Result<usize, Error> {
        let key = value_key(v);
        let e = self.encoder()?.v10()?;
        if let Some((index, _)) = e.to_be_marshaled.get(&key) {
            return Ok(*index);
        }
        if let Some((index, _)) = e.marshaled.get(&key) {
            return Ok(*index);
        }
        e.value_id_index += 1;
        let index = e.value_id_index;
        e.to_be_marshaled.insert(key, (index, Rc::clone(v)));
        Ok(index)
    }

    fn write_pending_values10(&mut self) -> Result<(), Error> {
        loop {
            let batch = {
                let e = self.encoder()?.v10()?;
                if e.to_be_marshaled.is_empty() {
                    break;
                }
                // Instances referenced while writing this batch go into a
                // fresh to-be-marshaled map and form the next batch.
                let batch = mem::take(&mut e.to_be_marshaled);
                for (key, entry) in &batch {
                    e.marshaled.insert(*key, entry.clone());
                }
                batch
            };
            self.write_size(batch.len())?;
            for (_, (index, v)) in batch {
                self.write_int(wire_size(index)?);
                pre_marshal(&v);
                write_instance_body(self, &v)?;
            }
        }
        self.write_size(0)?;
        Ok(())
    }

    fn start_slice10(&mut self, type_id: &str) -> Result<(), Error> {
        let encoder = self.encoder()?;
        let is_value = encoder.v10()?.slice_type == SliceType::Value;
        if is_value {
            match encoder.register_type_id(type_id) {
                None => {
                    self.write_bool(false);
                    self.write_string(type_id)?;
                }
                Some(index) => {
                    self.write_bool(true);
                    self.write_size(index)?;
                }
            }
        } else {
            self.write_string(type_id)?;
        }
        self.write_int(0);
        let pos = self.pos();
        self.encoder()?.v10()?.write_slice = Some(pos);
        Ok(())
    }

    fn end_slice10(&mut self) -> Result<(), Error> {
        let write_slice = self
            .encoder()?
            .v10()?
            .write_slice
            .take()
            .ok_or_else(slice_not_started)?;
        self.patch_slice_size(write_slice)
    }

    /// Patches the `i32` preceding `write_slice` with the slice size, which
    /// counts the size field itself.
    fn patch_slice_size(&mut self, write_slice: usize) -> Result<(), Error> {
        let size = wire_size(self.pos() - write_slice + 4)?;
        self.rewrite_int(size, write_slice - 4)
    }

    // ------------------------------------------------------------- 1.1

    fn write_value11(&mut self, v: Option<&ValuePtr>) -> Result<(), Error> {
        let Some(v) = v else {
            return self.write_size(0);
        };
        let e = self.encoder()?.v11()?;
        if e.format != FormatType::Sliced || e.stack.is_empty() {
            return self.write_instance11(v);
        }
        // Inside a sliced-format slice, references go through the slice's
        // indirection table (position + 1, 0 is nil).
        let current = self.encoder()?.current()?;
        let key = value_key(v);
        let index = match current.indirection_map.get(&key) {
            Some(index) => *index,
            None => {
                current.indirection_table.push(Rc::clone(v));
                let index = current.indirection_table.len();
                current.indirection_map.insert(key, index);
                index
            }
        };
        self.write_size(index)
    }

    fn write_instance11(&mut self, v: &ValuePtr) -> Result<(), Error> {
        let key = value_key(v);
        let e = self.encoder()?.v11()?;
        if let Some((id, _)) = e.marshaled.get(&key) {
            let id = *id;
            return self.write_size(id);
        }
        e.value_id_index += 1;
        e.marshaled.insert(key, (e.value_id_index, Rc::clone(v)));
        pre_marshal(v);
        self.write_size(1)?;
        write_instance_body(self, v)
    }

    fn start_slice11(
        &mut self,
        type_id: &str,
        compact_id: Option<i32>,
        last: bool,
    ) -> Result<(), Error> {
        let flags_pos = self.pos();
        let encoder = self.encoder()?;
        let e = encoder.v11()?;
        let sliced = e.format == FormatType::Sliced;
        let current = e
            .stack
            .last_mut()
            .ok_or_else(|| Error::marshal("slice started outside of an instance"))?;
        current.slice_flags_pos = flags_pos;
        current.slice_flags = 0;
        if sliced {
            current.slice_flags |= FLAG_HAS_SLICE_SIZE;
        }
        if last {
            current.slice_flags |= FLAG_IS_LAST_SLICE;
        }
        let slice_type = current.slice_type;
        let first_slice = current.first_slice;
        self.write_byte(0);

        if slice_type == SliceType::Value {
            // Compact format only identifies the most-derived slice.
            if sliced || first_slice {
                if let Some(compact_id) = compact_id {
                    let compact_id = usize::try_from(compact_id).map_err(|_| {
                        Error::marshal(format!("invalid compact type id {compact_id}"))
                    })?;
                    self.encoder()?.current()?.slice_flags |= FLAG_HAS_TYPE_ID_COMPACT;
                    self.write_size(compact_id)?;
                } else {
                    let encoder = self.encoder()?;
                    match encoder.register_type_id(type_id) {
                        None => {
                            encoder.current()?.slice_flags |= FLAG_HAS_TYPE_ID_STRING;
                            self.write_string(type_id)?;
                        }
                        Some(index) => {
                            encoder.current()?.slice_flags |= FLAG_HAS_TYPE_ID_INDEX;
                            self.write_size(index)?;
                        }
                    }
                }
            }
        } else {
            self.write_string(type_id)?;
        }

        if sliced {
            self.write_int(0);
        }
        let pos = self.pos();
        let current = self.encoder()?.current()?;
        current.write_slice = Some(pos);
        current.first_slice = false;
        Ok(())
    }

    fn end_slice11(&mut self) -> Result<(), Error> {
        let (flags, write_slice) = {
            let current = self.encoder()?.current()?;
            let write_slice = current.write_slice.take().ok_or_else(slice_not_started)?;
            (current.slice_flags, write_slice)
        };
        // The end marker is part of the slice, the indirection table is not.
        if flags & FLAG_HAS_OPTIONAL_MEMBERS != 0 {
            self.write_byte(OPTIONAL_END_MARKER);
        }
        if flags & FLAG_HAS_SLICE_SIZE != 0 {
            self.patch_slice_size(write_slice)?;
        }

        let table = {
            let current = self.encoder()?.current()?;
            current.indirection_map.clear();
            mem::take(&mut current.indirection_table)
        };
        if !table.is_empty() {
            self.encoder()?.current()?.slice_flags |= FLAG_HAS_INDIRECTION_TABLE;
            self.write_size(table.len())?;
            for v in &table {
                self.write_instance11(v)?;
            }
        }

        let current = self.encoder()?.current()?;
        let (flags, flags_pos) = (current.slice_flags, current.slice_flags_pos);
        self.writer
            .patch_u8(flags_pos, flags)
            .map_err(|e| Error::marshal(e.to_string()))
    }

    /// Re-marshals preserved slices. With the compact format they are
    /// dropped, which slices the instance to its most-derived known type.
    fn write_sliced_data(&mut self, data: &SlicedData) -> Result<(), Error> {
        if self.encoder()?.v11()?.format != FormatType::Sliced {
            return Ok(());
        }
        for info in &data.slices {
            self.start_slice11(&info.type_id, info.compact_id, info.is_last_slice)?;
            self.write_blob(&info.bytes);
            let instances = info
                .instances
                .iter()
                .map(|slot| {
                    slot.get().ok_or_else(|| {
                        Error::marshal("preserved slice references an unresolved instance")
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let current = self.encoder()?.current()?;
            if info.has_optional_members {
                current.slice_flags |= FLAG_HAS_OPTIONAL_MEMBERS;
            }
            current.indirection_table = instances;
            self.end_slice11()?;
        }
        Ok(())
    }
}
