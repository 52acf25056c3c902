#![allow(dead_code)]

use std::any::Any;
use std::rc::Rc;

use ice_encoding::{
    Error, FactoryRegistry, FormatType, InputStream, OutputStream, SlicedData, StreamConfig,
    UserException, Value, ValuePtr, ValueSlot, ENCODING_1_0, ENCODING_1_1,
};

pub fn config(format: FormatType) -> StreamConfig {
    StreamConfig {
        format,
        ..StreamConfig::default()
    }
}

pub fn config_1_0() -> StreamConfig {
    StreamConfig {
        encoding: ENCODING_1_0,
        ..StreamConfig::default()
    }
}

pub fn registry_with(register: impl FnOnce(&mut FactoryRegistry)) -> Rc<FactoryRegistry> {
    let mut registry = FactoryRegistry::new();
    register(&mut registry);
    Rc::new(registry)
}

pub fn full_registry() -> Rc<FactoryRegistry> {
    registry_with(|r| {
        r.register_value::<Node>().unwrap();
        r.register_value::<Base>().unwrap();
        r.register_value::<Derived>().unwrap();
        r.register_value::<Point>().unwrap();
        r.add_compact_id(Point::COMPACT_ID, Point::ID).unwrap();
        r.register_exception::<BaseError>().unwrap();
        r.register_exception::<DerivedError>().unwrap();
    })
}

/// Writes a single class reference (plus pending 1.0 instances).
pub fn encode_value(config: StreamConfig, v: Option<&ValuePtr>) -> Vec<u8> {
    let mut os = OutputStream::new(config);
    os.write_value(v).unwrap();
    os.write_pending_values().unwrap();
    os.finished()
}

pub fn decode_value(
    bytes: &[u8],
    config: StreamConfig,
    registry: Rc<FactoryRegistry>,
) -> Result<ValueSlot, Error> {
    let mut is = InputStream::new(bytes, config, registry);
    let slot = is.read_value()?;
    is.read_pending_values()?;
    Ok(slot)
}

/// Singly linked node, used for shared references and cycles.
#[derive(Debug, Default)]
pub struct Node {
    pub value: i32,
    pub next: ValueSlot,
    pub post_unmarshal_calls: usize,
}

impl Node {
    pub const ID: &'static str = "::Test::Node";

    pub fn new(value: i32) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }
}

impl Value for Node {
    fn ice_id(&self) -> &str {
        Self::ID
    }

    fn ice_write(&self, os: &mut OutputStream) -> Result<(), Error> {
        os.start_value(None)?;
        os.start_slice(Self::ID, None, true)?;
        os.write_int(self.value);
        os.write_value(self.next.get().as_ref())?;
        os.end_slice()?;
        os.end_value()
    }

    fn ice_read(&mut self, is: &mut InputStream<'_>) -> Result<(), Error> {
        is.start_value()?;
        is.start_slice()?;
        self.value = is.read_int()?;
        is.read_value_into(&self.next)?;
        is.end_slice()?;
        is.end_value(false)?;
        Ok(())
    }

    fn ice_post_unmarshal(&mut self) {
        self.post_unmarshal_calls += 1;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Root of a two-level hierarchy.
#[derive(Debug, Default)]
pub struct Base {
    pub id: i32,
    pub sliced_data: Option<Rc<SlicedData>>,
}

impl Base {
    pub const ID: &'static str = "::Test::Base";

    fn write_base_slice(id: i32, os: &mut OutputStream) -> Result<(), Error> {
        os.start_slice(Self::ID, None, true)?;
        os.write_int(id);
        os.end_slice()
    }

    fn read_base_slice(is: &mut InputStream<'_>) -> Result<i32, Error> {
        is.start_slice()?;
        let id = is.read_int()?;
        is.end_slice()?;
        Ok(id)
    }
}

impl Value for Base {
    fn ice_id(&self) -> &str {
        Self::ID
    }

    fn ice_write(&self, os: &mut OutputStream) -> Result<(), Error> {
        os.start_value(self.sliced_data.clone())?;
        Self::write_base_slice(self.id, os)?;
        os.end_value()
    }

    // Preserves unknown derived slices so they can be forwarded.
    fn ice_read(&mut self, is: &mut InputStream<'_>) -> Result<(), Error> {
        is.start_value()?;
        self.id = Self::read_base_slice(is)?;
        self.sliced_data = is.end_value(true)?;
        Ok(())
    }

    fn ice_sliced_data(&self) -> Option<Rc<SlicedData>> {
        self.sliced_data.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Reads [`Base`] instances but drops unknown derived slices.
#[derive(Debug, Default)]
pub struct PlainBase {
    pub id: i32,
}

impl Value for PlainBase {
    fn ice_id(&self) -> &str {
        Base::ID
    }

    fn ice_write(&self, os: &mut OutputStream) -> Result<(), Error> {
        os.start_value(None)?;
        Base::write_base_slice(self.id, os)?;
        os.end_value()
    }

    fn ice_read(&mut self, is: &mut InputStream<'_>) -> Result<(), Error> {
        is.start_value()?;
        self.id = Base::read_base_slice(is)?;
        is.end_value(false)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Derives from [`Base`], with a tagged member and a class member.
#[derive(Debug, Default)]
pub struct Derived {
    pub id: i32,
    pub label: String,
    pub extra: Option<i32>,
    pub peer: ValueSlot,
}

impl Derived {
    pub const ID: &'static str = "::Test::Derived";
}

impl Value for Derived {
    fn ice_id(&self) -> &str {
        Self::ID
    }

    fn ice_write(&self, os: &mut OutputStream) -> Result<(), Error> {
        os.start_value(None)?;
        os.start_slice(Self::ID, None, false)?;
        os.write_string(&self.label)?;
        os.write_value(self.peer.get().as_ref())?;
        os.write_tagged(1, self.extra.as_ref())?;
        os.end_slice()?;
        Base::write_base_slice(self.id, os)?;
        os.end_value()
    }

    fn ice_read(&mut self, is: &mut InputStream<'_>) -> Result<(), Error> {
        is.start_value()?;
        is.start_slice()?;
        self.label = is.read_string()?;
        is.read_value_into(&self.peer)?;
        self.extra = is.read_tagged(1)?;
        is.end_slice()?;
        self.id = Base::read_base_slice(is)?;
        is.end_value(false)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Class identified on the wire by a compact id.
#[derive(Debug, Default)]
pub struct Point {
    pub x: i16,
    pub y: i16,
}

impl Point {
    pub const ID: &'static str = "::Test::Point";
    pub const COMPACT_ID: i32 = 7;
}

impl Value for Point {
    fn ice_id(&self) -> &str {
        Self::ID
    }

    fn ice_write(&self, os: &mut OutputStream) -> Result<(), Error> {
        os.start_value(None)?;
        os.start_slice(Self::ID, Some(Self::COMPACT_ID), true)?;
        os.write_short(self.x);
        os.write_short(self.y);
        os.end_slice()?;
        os.end_value()
    }

    fn ice_read(&mut self, is: &mut InputStream<'_>) -> Result<(), Error> {
        is.start_value()?;
        is.start_slice()?;
        self.x = is.read_short()?;
        self.y = is.read_short()?;
        is.end_slice()?;
        is.end_value(false)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct BaseError {
    pub reason: String,
}

impl BaseError {
    pub const ID: &'static str = "::Test::BaseError";

    fn write_base_slice(reason: &str, os: &mut OutputStream) -> Result<(), Error> {
        os.start_slice(Self::ID, None, true)?;
        os.write_string(reason)?;
        os.end_slice()
    }

    fn read_base_slice(is: &mut InputStream<'_>) -> Result<String, Error> {
        is.start_slice()?;
        let reason = is.read_string()?;
        is.end_slice()?;
        Ok(reason)
    }
}

impl UserException for BaseError {
    fn ice_id(&self) -> &str {
        Self::ID
    }

    fn ice_write(&self, os: &mut OutputStream) -> Result<(), Error> {
        os.start_exception(None)?;
        Self::write_base_slice(&self.reason, os)?;
        os.end_exception()
    }

    fn ice_read(&mut self, is: &mut InputStream<'_>) -> Result<(), Error> {
        is.start_exception()?;
        self.reason = Self::read_base_slice(is)?;
        is.end_exception(false)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct DerivedError {
    pub reason: String,
    pub code: i32,
    pub origin: ValueSlot,
}

impl DerivedError {
    pub const ID: &'static str = "::Test::DerivedError";
}

impl UserException for DerivedError {
    fn ice_id(&self) -> &str {
        Self::ID
    }

    fn ice_write(&self, os: &mut OutputStream) -> Result<(), Error> {
        os.start_exception(None)?;
        os.start_slice(Self::ID, None, false)?;
        os.write_int(self.code);
        os.write_value(self.origin.get().as_ref())?;
        os.end_slice()?;
        BaseError::write_base_slice(&self.reason, os)?;
        os.end_exception()
    }

    fn ice_read(&mut self, is: &mut InputStream<'_>) -> Result<(), Error> {
        is.start_exception()?;
        is.start_slice()?;
        self.code = is.read_int()?;
        is.read_value_into(&self.origin)?;
        is.end_slice()?;
        self.reason = BaseError::read_base_slice(is)?;
        is.end_exception(false)?;
        Ok(())
    }

    fn ice_uses_classes(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn encodings() -> [ice_encoding::EncodingVersion; 2] {
    [ENCODING_1_0, ENCODING_1_1]
}
