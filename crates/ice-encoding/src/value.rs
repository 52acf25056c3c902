//! Class instances, patchable references and preserved slices.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::Error;
use crate::format::FormatType;
use crate::input_stream::InputStream;
use crate::output_stream::OutputStream;
use crate::version::ENCODING_1_0;

/// Type id of the root of every class hierarchy. A factory registered under
/// this id gets a last chance to create an instance whose slices are all
/// unknown.
pub const OBJECT_TYPE_ID: &str = "::Ice::Object";

/// A class instance that can be marshaled by reference.
///
/// Implementations write themselves with `start_value`, one
/// `start_slice`/`end_slice` pair per class in the hierarchy (most-derived
/// first) and `end_value`, and read themselves back the same way.
pub trait Value: Any {
    /// Most-derived type id of the instance.
    fn ice_id(&self) -> &str;

    fn ice_write(&self, os: &mut OutputStream) -> Result<(), Error>;

    fn ice_read(&mut self, is: &mut InputStream<'_>) -> Result<(), Error>;

    /// Slices preserved when the instance was received as a more derived,
    /// unknown type.
    fn ice_sliced_data(&self) -> Option<Rc<SlicedData>> {
        None
    }

    /// Called before the instance is marshaled.
    fn ice_pre_marshal(&mut self) {}

    /// Called once every reference held by the instance has been patched.
    fn ice_post_unmarshal(&mut self) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub type ValuePtr = Rc<RefCell<dyn Value>>;

pub fn new_value<V: Value>(value: V) -> ValuePtr {
    Rc::new(RefCell::new(value))
}

/// Identity of an instance, used as the key of marshaling maps.
pub(crate) fn value_key(v: &ValuePtr) -> usize {
    Rc::as_ptr(v) as *const () as usize
}

/// Shared storage for a class reference.
///
/// Decoding hands out slots before the referenced instance exists; the slot
/// is filled once the instance has been read, which is how forward
/// references and cycles are resolved. Clones share the same storage.
#[derive(Clone, Default)]
pub struct ValueSlot(Rc<RefCell<Option<ValuePtr>>>);

impl ValueSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: ValuePtr) -> Self {
        Self(Rc::new(RefCell::new(Some(value))))
    }

    pub fn get(&self) -> Option<ValuePtr> {
        self.0.borrow().clone()
    }

    pub fn set(&self, value: Option<ValuePtr>) {
        *self.0.borrow_mut() = value;
    }

    pub fn is_none(&self) -> bool {
        self.0.borrow().is_none()
    }

    /// Runs `f` on the referenced instance if it is a `T`.
    pub fn downcast<T: Value, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let value = self.get()?;
        let value = value.try_borrow().ok()?;
        value.as_any().downcast_ref::<T>().map(f)
    }

    /// Whether both slots reference the same instance.
    pub fn ptr_eq(&self, other: &ValueSlot) -> bool {
        match (self.get(), other.get()) {
            (Some(a), Some(b)) => Rc::ptr_eq(&a, &b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for ValueSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            None => f.write_str("ValueSlot(nil)"),
            Some(v) => match v.try_borrow() {
                Ok(v) => write!(f, "ValueSlot({})", v.ice_id()),
                Err(_) => f.write_str("ValueSlot(<borrowed>)"),
            },
        }
    }
}

/// One slice of an instance that the receiver did not recognize.
#[derive(Debug, Clone, Default)]
pub struct SliceInfo {
    /// Type id of the slice; empty when the slice used a compact id.
    pub type_id: String,
    pub compact_id: Option<i32>,
    /// Encoded members, without the optional-member end marker.
    pub bytes: Vec<u8>,
    /// Targets of the slice's indirection table.
    pub instances: Vec<ValueSlot>,
    pub has_optional_members: bool,
    pub is_last_slice: bool,
}

/// Unknown slices preserved from a received instance or exception, most
/// derived first.
#[derive(Debug, Clone, Default)]
pub struct SlicedData {
    pub slices: Vec<SliceInfo>,
}

/// Instance of a class whose slices were all unknown to the receiver.
///
/// It keeps every slice so the instance can be forwarded intact with the
/// sliced format.
#[derive(Debug, Default)]
pub struct UnknownSlicedValue {
    unknown_type_id: String,
    sliced_data: Option<Rc<SlicedData>>,
}

impl UnknownSlicedValue {
    pub const STATIC_ID: &'static str = "::Ice::UnknownSlicedValue";

    pub fn new(unknown_type_id: impl Into<String>) -> Self {
        Self {
            unknown_type_id: unknown_type_id.into(),
            sliced_data: None,
        }
    }

    pub fn unknown_type_id(&self) -> &str {
        &self.unknown_type_id
    }
}

impl Value for UnknownSlicedValue {
    fn ice_id(&self) -> &str {
        &self.unknown_type_id
    }

    fn ice_write(&self, os: &mut OutputStream) -> Result<(), Error> {
        if os.encoding() == ENCODING_1_0 || os.format() != FormatType::Sliced {
            return Err(Error::marshal(format!(
                "cannot marshal instance of unknown type `{}' without the sliced format",
                self.unknown_type_id
            )));
        }
        os.start_value(self.sliced_data.clone())?;
        os.end_value()
    }

    fn ice_read(&mut self, is: &mut InputStream<'_>) -> Result<(), Error> {
        is.start_value()?;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_clones_share_storage() {
        let slot = ValueSlot::new();
        let other = slot.clone();
        assert!(other.is_none());
        slot.set(Some(new_value(UnknownSlicedValue::new("::Test::A"))));
        assert!(!other.is_none());
        assert!(slot.ptr_eq(&other));
        assert_eq!(format!("{other:?}"), "ValueSlot(::Test::A)");
    }

    #[test]
    fn downcast_checks_the_type() {
        let slot = ValueSlot::with_value(new_value(UnknownSlicedValue::new("::Test::B")));
        let id = slot.downcast(|v: &UnknownSlicedValue| v.unknown_type_id().to_string());
        assert_eq!(id.as_deref(), Some("::Test::B"));
        assert!(ValueSlot::new()
            .downcast(|v: &UnknownSlicedValue| v.unknown_type_id().len())
            .is_none());
    }

    #[test]
    fn value_key_is_identity() {
        let a = new_value(UnknownSlicedValue::new("::Test::A"));
        let b = new_value(UnknownSlicedValue::new("::Test::A"));
        assert_eq!(value_key(&a), value_key(&Rc::clone(&a)));
        assert_ne!(value_key(&a), value_key(&b));
    }
}
