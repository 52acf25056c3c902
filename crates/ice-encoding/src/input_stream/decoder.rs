//! Class and exception decoders for encodings 1.0 and 1.1.
//!
//! Like the encoders, the decoder state lives in the current encapsulation
//! and the decoding logic is implemented on [`InputStream`], so that
//! `ice_read` callbacks get the stream while no decoder state is borrowed.
//!
//! References to instances not read yet are recorded as patch entries
//! keyed by instance id; the slots are filled as soon as the instance is
//! unmarshaled.

use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::rc::Rc;

use super::InputStream;
use crate::config::StreamConfig;
use crate::error::Error;
use crate::exception::UserException;
use crate::format::{
    SliceType, FLAG_HAS_INDIRECTION_TABLE, FLAG_HAS_OPTIONAL_MEMBERS, FLAG_HAS_SLICE_SIZE,
    FLAG_HAS_TYPE_ID_COMPACT, FLAG_HAS_TYPE_ID_INDEX, FLAG_HAS_TYPE_ID_STRING,
    FLAG_IS_LAST_SLICE,
};
use crate::value::{
    new_value, SliceInfo, SlicedData, UnknownSlicedValue, ValuePtr, ValueSlot, OBJECT_TYPE_ID,
};
use crate::version::{EncodingVersion, ENCODING_1_0};

struct PatchEntry {
    slot: ValueSlot,
    class_graph_depth: usize,
}

pub(super) struct Decoder {
    slice_values: bool,
    class_graph_depth_max: usize,
    class_graph_depth: usize,
    trace_slicing: bool,
    patch_map: BTreeMap<usize, Vec<PatchEntry>>,
    unmarshaled: HashMap<usize, ValuePtr>,
    type_id_map: HashMap<usize, String>,
    type_id_index: usize,
    value_list: Vec<ValuePtr>,
    compact_id_cache: HashMap<i32, String>,
    kind: DecoderKind,
}

enum DecoderKind {
    V10(Decoder10),
    V11(Decoder11),
}

struct Decoder10 {
    slice_type: SliceType,
    skip_first_slice: bool,
    slice_size: usize,
    type_id: String,
}

struct Decoder11 {
    value_id_index: usize,
    stack: Vec<InstanceData>,
}

struct InstanceData {
    slice_type: SliceType,
    skip_first_slice: bool,
    slices: Vec<SliceInfo>,
    indirection_tables: Vec<Vec<usize>>,

    slice_flags: u8,
    slice_size: usize,
    type_id: String,
    compact_id: Option<i32>,
    /// (indirection table position, slot) pairs resolved at `end_slice`.
    indirect_patch_list: Vec<(usize, ValueSlot)>,
}

impl InstanceData {
    fn new(slice_type: SliceType) -> Self {
        Self {
            slice_type,
            skip_first_slice: false,
            slices: Vec::new(),
            indirection_tables: Vec::new(),
            slice_flags: 0,
            slice_size: 0,
            type_id: String::new(),
            compact_id: None,
            indirect_patch_list: Vec::new(),
        }
    }
}

impl Decoder {
    pub(super) fn new(encoding: EncodingVersion, config: &StreamConfig) -> Self {
        let kind = if encoding == ENCODING_1_0 {
            DecoderKind::V10(Decoder10 {
                slice_type: SliceType::NoSlice,
                skip_first_slice: false,
                slice_size: 0,
                type_id: String::new(),
            })
        } else {
            DecoderKind::V11(Decoder11 {
                value_id_index: 1,
                stack: Vec::new(),
            })
        };
        Self {
            slice_values: config.slice_values,
            class_graph_depth_max: config.class_graph_depth_max,
            class_graph_depth: 0,
            trace_slicing: config.trace_slicing,
            patch_map: BTreeMap::new(),
            unmarshaled: HashMap::new(),
            type_id_map: HashMap::new(),
            type_id_index: 0,
            value_list: Vec::new(),
            compact_id_cache: HashMap::new(),
            kind,
        }
    }

    fn v10(&mut self) -> Result<&mut Decoder10, Error> {
        match &mut self.kind {
            DecoderKind::V10(d) => Ok(d),
            DecoderKind::V11(_) => Err(Error::marshal("1.0 decoder expected")),
        }
    }

    fn v11(&mut self) -> Result<&mut Decoder11, Error> {
        match &mut self.kind {
            DecoderKind::V11(d) => Ok(d),
            DecoderKind::V10(_) => Err(Error::marshal("1.1 decoder expected")),
        }
    }

    fn current(&mut self) -> Result<&mut InstanceData, Error> {
        self.v11()?
            .stack
            .last_mut()
            .ok_or_else(|| Error::marshal("no instance is being unmarshaled"))
    }

    fn is_v10(&self) -> bool {
        matches!(self.kind, DecoderKind::V10(_))
    }
}

fn post_unmarshal(v: &ValuePtr) {
    match v.try_borrow_mut() {
        Ok(mut value) => value.ice_post_unmarshal(),
        Err(_) => tracing::warn!("skipping ice_post_unmarshal on a borrowed instance"),
    }
}

fn slice_kind(slice_type: SliceType) -> &'static str {
    match slice_type {
        SliceType::Exception => "exception",
        _ => "value",
    }
}

impl InputStream<'_> {
    fn decoder(&mut self) -> Result<&mut Decoder, Error> {
        self.encaps_stack
            .last_mut()
            .and_then(|encaps| encaps.decoder.as_mut())
            .ok_or_else(|| Error::marshal("no class decoder is active"))
    }

    /// Whether the stream is inside a 1.1 slice that declared no tagged
    /// members.
    pub(super) fn in_slice_without_optional_members(&mut self) -> bool {
        let Some(decoder) = self
            .encaps_stack
            .last_mut()
            .and_then(|encaps| encaps.decoder.as_mut())
        else {
            return false;
        };
        match &decoder.kind {
            DecoderKind::V11(d) => d
                .stack
                .last()
                .is_some_and(|current| current.slice_flags & FLAG_HAS_OPTIONAL_MEMBERS == 0),
            DecoderKind::V10(_) => false,
        }
    }

    pub(super) fn decoder_read_value(&mut self, slot: Option<ValueSlot>) -> Result<(), Error> {
        if self.decoder()?.is_v10() {
            self.read_value10(slot)
        } else {
            self.read_value11(slot)
        }
    }

    pub(super) fn decoder_read_pending_values(&mut self) -> Result<(), Error> {
        if self.decoder()?.is_v10() {
            self.read_pending_values10()
        } else {
            Ok(())
        }
    }

    pub(super) fn decoder_read_exception(&mut self) -> Result<Box<dyn UserException>, Error> {
        if self.decoder()?.is_v10() {
            self.read_exception10()
        } else {
            self.read_exception11()
        }
    }

    /// Starts reading a class instance from within its `ice_read`.
    pub fn start_value(&mut self) -> Result<(), Error> {
        self.start_instance(SliceType::Value)
    }

    /// Finishes reading a class instance. With `preserve`, the slices that
    /// were skipped because their type was unknown are returned.
    pub fn end_value(&mut self, preserve: bool) -> Result<Option<Rc<SlicedData>>, Error> {
        self.end_instance(preserve)
    }

    pub fn start_exception(&mut self) -> Result<(), Error> {
        self.start_instance(SliceType::Exception)
    }

    pub fn end_exception(&mut self, preserve: bool) -> Result<Option<Rc<SlicedData>>, Error> {
        self.end_instance(preserve)
    }

    /// Reads the next slice header and returns its type id (empty for
    /// compact-format slices that carry none).
    pub fn start_slice(&mut self) -> Result<String, Error> {
        if self.decoder()?.is_v10() {
            self.start_slice10()
        } else {
            self.start_slice11()
        }
    }

    pub fn end_slice(&mut self) -> Result<(), Error> {
        if self.decoder()?.is_v10() {
            Ok(())
        } else {
            self.end_slice11()
        }
    }

    /// Skips the body of the current slice, preserving it with 1.1.
    pub fn skip_slice(&mut self) -> Result<(), Error> {
        if self.decoder()?.is_v10() {
            self.skip_slice10()
        } else {
            self.skip_slice11()
        }
    }

    fn start_instance(&mut self, slice_type: SliceType) -> Result<(), Error> {
        let decoder = self.decoder()?;
        // The first slice header was already read to find the factory.
        match &mut decoder.kind {
            DecoderKind::V10(d) => {
                if d.slice_type != slice_type {
                    return Err(Error::marshal("unexpected instance kind"));
                }
                d.skip_first_slice = true;
            }
            DecoderKind::V11(d) => {
                let current = d
                    .stack
                    .last_mut()
                    .filter(|current| current.slice_type == slice_type)
                    .ok_or_else(|| Error::marshal("unexpected instance kind"))?;
                current.skip_first_slice = true;
            }
        }
        Ok(())
    }

    fn end_instance(&mut self, preserve: bool) -> Result<Option<Rc<SlicedData>>, Error> {
        if self.decoder()?.is_v10() {
            return self.end_instance10();
        }
        let sliced_data = if preserve {
            self.read_sliced_data()?
        } else {
            None
        };
        self.decoder()?.v11()?.stack.pop();
        Ok(sliced_data)
    }

    // ------------------------------------------------------------ Shared

    fn read_type_id(&mut self, is_index: bool) -> Result<String, Error> {
        if is_index {
            let index = self.read_size()?;
            return self
                .decoder()?
                .type_id_map
                .get(&index)
                .cloned()
                .ok_or_else(|| Error::out_of_bounds(format!("unknown type id index {index}")));
        }
        let type_id = self.read_string()?;
        let decoder = self.decoder()?;
        decoder.type_id_index += 1;
        decoder
            .type_id_map
            .insert(decoder.type_id_index, type_id.clone());
        Ok(type_id)
    }

    fn new_instance(&self, type_id: &str) -> Option<ValuePtr> {
        self.registry.create_value(type_id)
    }

    fn resolve_compact_id(&self, compact_id: i32) -> Option<String> {
        self.compact_id_resolver
            .as_ref()
            .and_then(|resolve| resolve(compact_id))
            .filter(|type_id| !type_id.is_empty())
            .or_else(|| {
                self.registry
                    .type_id_for_compact_id(compact_id)
                    .map(str::to_string)
            })
    }

    fn add_patch_entry(&mut self, index: usize, slot: ValueSlot) -> Result<(), Error> {
        let decoder = self.decoder()?;
        if let Some(v) = decoder.unmarshaled.get(&index) {
            slot.set(Some(Rc::clone(v)));
            return Ok(());
        }
        let class_graph_depth = decoder.class_graph_depth;
        decoder.patch_map.entry(index).or_default().push(PatchEntry {
            slot,
            class_graph_depth,
        });
        Ok(())
    }

    /// Reads the members of a freshly created instance, then patches every
    /// reference waiting for it.
    fn unmarshal(&mut self, index: usize, v: &ValuePtr) -> Result<(), Error> {
        // Registered before reading so self-references resolve directly.
        self.decoder()?.unmarshaled.insert(index, Rc::clone(v));
        {
            let mut value = v
                .try_borrow_mut()
                .map_err(|_| Error::marshal("instance is borrowed while being unmarshaled"))?;
            value.ice_read(self)?;
        }

        let decoder = self.decoder()?;
        if let Some(entries) = decoder.patch_map.remove(&index) {
            for entry in entries {
                entry.slot.set(Some(Rc::clone(v)));
            }
        }
        if decoder.patch_map.is_empty() && decoder.value_list.is_empty() {
            post_unmarshal(v);
        } else {
            decoder.value_list.push(Rc::clone(v));
            if decoder.patch_map.is_empty() {
                for value in mem::take(&mut decoder.value_list) {
                    post_unmarshal(&value);
                }
            }
        }
        Ok(())
    }

    fn trace_skip_slice(&self, type_id: &str, compact_id: Option<i32>, slice_type: SliceType) {
        let traced = self
            .encaps_stack
            .last()
            .and_then(|encaps| encaps.decoder.as_ref())
            .is_some_and(|decoder| decoder.trace_slicing);
        if !traced {
            return;
        }
        match compact_id {
            Some(compact_id) if type_id.is_empty() => tracing::info!(
                target: "ice::slicing",
                kind = slice_kind(slice_type),
                compact_id,
                "slicing unknown {} type with compact id {compact_id}",
                slice_kind(slice_type),
            ),
            _ => tracing::info!(
                target: "ice::slicing",
                kind = slice_kind(slice_type),
                type_id,
                "slicing unknown {} type `{type_id}'",
                slice_kind(slice_type),
            ),
        }
    }

    // ------------------------------------------------------------- 1.0

    fn read_value10(&mut self, slot: Option<ValueSlot>) -> Result<(), Error> {
        // References are negated instance ids; 0 is nil.
        let index = self.read_int()?;
        if index > 0 {
            return Err(Error::marshal("invalid object id"));
        }
        let index = index.unsigned_abs() as usize;
        match slot {
            Some(slot) if index == 0 => slot.set(None),
            Some(slot) => self.add_patch_entry(index, slot)?,
            None => {}
        }
        Ok(())
    }

    fn read_pending_values10(&mut self) -> Result<(), Error> {
        loop {
            let count = self.read_size()?;
            for _ in 0..count {
                self.read_instance10()?;
            }
            if count == 0 {
                break;
            }
        }
        let decoder = self.decoder()?;
        if !decoder.patch_map.is_empty() {
            return Err(Error::marshal("index for class received, but no instance"));
        }
        for value in mem::take(&mut decoder.value_list) {
            post_unmarshal(&value);
        }
        Ok(())
    }

    fn read_instance10(&mut self) -> Result<(), Error> {
        let index = self.read_int()?;
        if index <= 0 {
            return Err(Error::marshal("invalid object id"));
        }
        let index = index as usize;
        {
            let d = self.decoder()?.v10()?;
            d.slice_type = SliceType::Value;
            d.skip_first_slice = false;
        }
        let most_derived = self.start_slice10()?;
        let value = loop {
            let type_id = self.decoder()?.v10()?.type_id.clone();
            // The `::Ice::Object` slice terminates every 1.0 instance.
            if type_id == OBJECT_TYPE_ID {
                return Err(Error::no_value_factory(
                    "reached the ::Ice::Object slice without finding a factory",
                    most_derived,
                ));
            }
            if let Some(v) = self.new_instance(&type_id) {
                break v;
            }
            if !self.decoder()?.slice_values {
                return Err(Error::no_value_factory(
                    "no value factory found and slicing is disabled",
                    type_id,
                ));
            }
            self.skip_slice10()?;
            self.start_slice10()?;
        };

        // The instance is as deep as its deepest referrer plus one.
        let decoder = self.decoder()?;
        let depth = decoder
            .patch_map
            .get(&index)
            .and_then(|entries| entries.iter().map(|e| e.class_graph_depth).max())
            .unwrap_or(0);
        decoder.class_graph_depth = depth + 1;
        if decoder.class_graph_depth > decoder.class_graph_depth_max {
            return Err(Error::marshal("maximum class graph depth reached"));
        }
        self.unmarshal(index, &value)
    }

    fn start_slice10(&mut self) -> Result<String, Error> {
        let slice_type = {
            let d = self.decoder()?.v10()?;
            if d.skip_first_slice {
                d.skip_first_slice = false;
                return Ok(d.type_id.clone());
            }
            d.slice_type
        };
        let type_id = if slice_type == SliceType::Value {
            let is_index = self.read_bool()?;
            self.read_type_id(is_index)?
        } else {
            self.read_string()?
        };
        let slice_size = self.read_int()?;
        if slice_size < 4 {
            return Err(Error::out_of_bounds(format!("invalid slice size {slice_size}")));
        }
        let d = self.decoder()?.v10()?;
        d.type_id = type_id.clone();
        d.slice_size = slice_size as usize;
        Ok(type_id)
    }

    fn skip_slice10(&mut self) -> Result<(), Error> {
        let (type_id, slice_type, slice_size) = {
            let d = self.decoder()?.v10()?;
            (d.type_id.clone(), d.slice_type, d.slice_size)
        };
        self.trace_skip_slice(&type_id, None, slice_type);
        self.skip(slice_size - 4)
    }

    fn end_instance10(&mut self) -> Result<Option<Rc<SlicedData>>, Error> {
        if self.decoder()?.v10()?.slice_type == SliceType::Value {
            self.start_slice10()?;
            if self.read_size()? != 0 {
                return Err(Error::marshal("invalid Object slice"));
            }
        }
        self.decoder()?.v10()?.slice_type = SliceType::NoSlice;
        Ok(None)
    }

    fn read_exception10(&mut self) -> Result<Box<dyn UserException>, Error> {
        let uses_classes = self.read_bool()?;
        {
            let d = self.decoder()?.v10()?;
            d.slice_type = SliceType::Exception;
            d.skip_first_slice = false;
        }
        let most_derived = self.start_slice10()?;
        loop {
            let type_id = self.decoder()?.v10()?.type_id.clone();
            if let Some(mut ex) = self.registry.create_exception(&type_id) {
                ex.ice_read(self)?;
                if uses_classes {
                    self.read_pending_values10()?;
                }
                return Ok(ex);
            }
            self.skip_slice10()?;
            // 1.0 has no last-slice marker: running out of input means no
            // slice was known.
            match self.start_slice10() {
                Ok(_) => {}
                Err(Error::UnmarshalOutOfBounds { .. }) => {
                    return Err(Error::out_of_bounds(format!(
                        "unknown exception type `{most_derived}'"
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ------------------------------------------------------------- 1.1

    fn read_value11(&mut self, slot: Option<ValueSlot>) -> Result<(), Error> {
        let index = self.read_size()?;
        if index == 0 {
            if let Some(slot) = slot {
                slot.set(None);
            }
            return Ok(());
        }
        // Inside a slice with an indirection table, the index points into
        // the table read at the end of the slice.
        if let Some(current) = self
            .decoder()?
            .v11()?
            .stack
            .last_mut()
            .filter(|current| current.slice_flags & FLAG_HAS_INDIRECTION_TABLE != 0)
        {
            if let Some(slot) = slot {
                current.indirect_patch_list.push((index - 1, slot));
            }
            return Ok(());
        }
        self.read_instance11(index, slot)?;
        Ok(())
    }

    /// Reads an instance or a reference to one. Returns the instance id.
    fn read_instance11(&mut self, index: usize, slot: Option<ValueSlot>) -> Result<usize, Error> {
        if index == 0 {
            return Err(Error::marshal("invalid object id"));
        }
        if index > 1 {
            if let Some(slot) = slot {
                self.add_patch_entry(index, slot)?;
            }
            return Ok(index);
        }

        // The id is taken before reading slices: skipped slices may carry
        // indirection tables with more instances.
        let index = {
            let d = self.decoder()?.v11()?;
            d.stack.push(InstanceData::new(SliceType::Value));
            d.value_id_index += 1;
            d.value_id_index
        };
        self.start_slice11()?;
        let mut most_derived: Option<String> = None;

        let value = loop {
            let (compact_id, mut type_id) = {
                let current = self.decoder()?.current()?;
                (current.compact_id, current.type_id.clone())
            };
            let mut update_cache = false;
            if let Some(compact_id) = compact_id {
                match self.decoder()?.compact_id_cache.get(&compact_id).cloned() {
                    Some(cached) => type_id = cached,
                    None => {
                        update_cache = true;
                        type_id = self.resolve_compact_id(compact_id).unwrap_or_default();
                    }
                }
                self.decoder()?.current()?.type_id = type_id.clone();
            }
            let most_derived_id = most_derived.get_or_insert_with(|| type_id.clone()).clone();

            if !type_id.is_empty() {
                if let Some(v) = self.new_instance(&type_id) {
                    if let (true, Some(compact_id)) = (update_cache, compact_id) {
                        self.decoder()?.compact_id_cache.insert(compact_id, type_id);
                    }
                    break v;
                }
            }

            if !self.decoder()?.slice_values {
                return Err(Error::no_value_factory(
                    "no value factory found and slicing is disabled",
                    type_id,
                ));
            }
            self.skip_slice11()?;

            if self.decoder()?.current()?.slice_flags & FLAG_IS_LAST_SLICE != 0 {
                // A factory registered for `::Ice::Object` gets the last
                // chance to supply the instance.
                break match self.new_instance(OBJECT_TYPE_ID) {
                    Some(v) => v,
                    None => new_value(UnknownSlicedValue::new(most_derived_id)),
                };
            }
            self.start_slice11()?;
        };

        {
            let decoder = self.decoder()?;
            decoder.class_graph_depth += 1;
            if decoder.class_graph_depth > decoder.class_graph_depth_max {
                return Err(Error::marshal("maximum class graph depth reached"));
            }
        }
        self.unmarshal(index, &value)?;

        let decoder = self.decoder()?;
        decoder.class_graph_depth -= 1;
        if decoder.v11()?.stack.is_empty() && !decoder.patch_map.is_empty() {
            return Err(Error::marshal("index for class received, but no instance"));
        }
        if let Some(slot) = slot {
            slot.set(Some(value));
        }
        Ok(index)
    }

    fn start_slice11(&mut self) -> Result<String, Error> {
        let slice_type = {
            let current = self.decoder()?.current()?;
            if current.skip_first_slice {
                current.skip_first_slice = false;
                return Ok(current.type_id.clone());
            }
            current.slice_type
        };

        let flags = self.read_byte()?;
        let (type_id, compact_id) = if slice_type == SliceType::Value {
            // The compact id flag overlaps the others and is tested first.
            if flags & FLAG_HAS_TYPE_ID_COMPACT == FLAG_HAS_TYPE_ID_COMPACT {
                (String::new(), Some(self.read_size()? as i32))
            } else if flags & (FLAG_HAS_TYPE_ID_STRING | FLAG_HAS_TYPE_ID_INDEX) != 0 {
                (self.read_type_id(flags & FLAG_HAS_TYPE_ID_INDEX != 0)?, None)
            } else {
                (String::new(), None)
            }
        } else {
            (self.read_string()?, None)
        };
        let slice_size = if flags & FLAG_HAS_SLICE_SIZE != 0 {
            let size = self.read_int()?;
            if size < 4 {
                return Err(Error::out_of_bounds(format!("invalid slice size {size}")));
            }
            size as usize
        } else {
            0
        };

        let current = self.decoder()?.current()?;
        current.slice_flags = flags;
        current.type_id = type_id.clone();
        current.compact_id = compact_id;
        current.slice_size = slice_size;
        Ok(type_id)
    }

    fn read_indirection_table(&mut self) -> Result<Vec<usize>, Error> {
        let n = self.read_and_check_seq_size(1)?;
        let mut table = Vec::with_capacity(n);
        for _ in 0..n {
            let index = self.read_size()?;
            table.push(self.read_instance11(index, None)?);
        }
        Ok(table)
    }

    fn end_slice11(&mut self) -> Result<(), Error> {
        let flags = self.decoder()?.current()?.slice_flags;
        if flags & FLAG_HAS_OPTIONAL_MEMBERS != 0 {
            self.skip_optionals()?;
        }
        if flags & FLAG_HAS_INDIRECTION_TABLE == 0 {
            return Ok(());
        }

        let table = self.read_indirection_table()?;
        if table.is_empty() {
            return Err(Error::marshal("empty indirection table"));
        }
        let patches = mem::take(&mut self.decoder()?.current()?.indirect_patch_list);
        // References from skipped tagged members may leave the list empty.
        if patches.is_empty() && flags & FLAG_HAS_OPTIONAL_MEMBERS == 0 {
            return Err(Error::marshal("no references to indirection table"));
        }
        for (position, slot) in patches {
            let index = *table
                .get(position)
                .ok_or_else(|| Error::marshal("indirection out of range"))?;
            self.add_patch_entry(index, slot)?;
        }
        Ok(())
    }

    fn skip_slice11(&mut self) -> Result<(), Error> {
        let (flags, slice_size, slice_type, type_id, compact_id) = {
            let current = self.decoder()?.current()?;
            (
                current.slice_flags,
                current.slice_size,
                current.slice_type,
                current.type_id.clone(),
                current.compact_id,
            )
        };
        self.trace_skip_slice(&type_id, compact_id, slice_type);

        let start = self.pos();
        if flags & FLAG_HAS_SLICE_SIZE != 0 {
            self.skip(slice_size - 4)?;
        } else if slice_type == SliceType::Value {
            return Err(Error::no_value_factory(
                "no value factory found and compact format prevents slicing \
                 (the sender should use the sliced format instead)",
                type_id,
            ));
        } else {
            return Err(Error::UnknownUserException { unknown: type_id });
        }

        // The end marker is written again when the slice is re-marshaled.
        let has_optional_members = flags & FLAG_HAS_OPTIONAL_MEMBERS != 0;
        let end = if has_optional_members {
            self.pos().saturating_sub(1).max(start)
        } else {
            self.pos()
        };
        let info = SliceInfo {
            type_id,
            compact_id,
            bytes: self.reader.window(start, end)?.to_vec(),
            instances: Vec::new(),
            has_optional_members,
            is_last_slice: flags & FLAG_IS_LAST_SLICE != 0,
        };

        let table = if flags & FLAG_HAS_INDIRECTION_TABLE != 0 {
            self.read_indirection_table()?
        } else {
            Vec::new()
        };
        let current = self.decoder()?.current()?;
        current.indirection_tables.push(table);
        current.slices.push(info);
        Ok(())
    }

    /// Collects the skipped slices of the current instance. Their
    /// indirection tables become slots patched like any other reference.
    fn read_sliced_data(&mut self) -> Result<Option<Rc<SlicedData>>, Error> {
        let (slices, tables) = {
            let current = self.decoder()?.current()?;
            (
                mem::take(&mut current.slices),
                mem::take(&mut current.indirection_tables),
            )
        };
        if slices.is_empty() {
            return Ok(None);
        }
        let mut out = Vec::with_capacity(slices.len());
        for (mut info, table) in slices.into_iter().zip(tables) {
            for index in table {
                let slot = ValueSlot::new();
                self.add_patch_entry(index, slot.clone())?;
                info.instances.push(slot);
            }
            out.push(info);
        }
        Ok(Some(Rc::new(SlicedData { slices: out })))
    }

    fn read_exception11(&mut self) -> Result<Box<dyn UserException>, Error> {
        self.decoder()?
            .v11()?
            .stack
            .push(InstanceData::new(SliceType::Exception));
        let most_derived = self.start_slice11()?;
        loop {
            let type_id = self.decoder()?.current()?.type_id.clone();
            if let Some(mut ex) = self.registry.create_exception(&type_id) {
                ex.ice_read(self)?;
                return Ok(ex);
            }
            self.skip_slice11()?;
            if self.decoder()?.current()?.slice_flags & FLAG_IS_LAST_SLICE != 0 {
                self.decoder()?.v11()?.stack.pop();
                return Err(Error::UnknownUserException {
                    unknown: most_derived,
                });
            }
            self.start_slice11()?;
        }
    }
}
