//! User exceptions.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::error::Error;
use crate::input_stream::InputStream;
use crate::output_stream::OutputStream;
use crate::value::SlicedData;

/// An exception declared by an application, marshaled as a sequence of
/// slices like a class instance but never shared by reference.
pub trait UserException: Any + fmt::Debug {
    fn ice_id(&self) -> &str;

    fn ice_write(&self, os: &mut OutputStream) -> Result<(), Error>;

    fn ice_read(&mut self, is: &mut InputStream<'_>) -> Result<(), Error>;

    /// Whether any member is a class. Only the 1.0 encoding uses this, to
    /// decide if pending values follow the exception.
    fn ice_uses_classes(&self) -> bool {
        false
    }

    fn ice_sliced_data(&self) -> Option<Rc<SlicedData>> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

impl dyn UserException {
    pub fn downcast_ref<T: UserException>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}
