//! Value and exception factory registration.

use std::collections::HashMap;
use std::fmt;

use crate::error::Error;
use crate::exception::UserException;
use crate::value::{new_value, Value, ValuePtr};

/// Creates an instance for a type id, or declines with `None`.
pub type ValueFactory = Box<dyn Fn(&str) -> Option<ValuePtr>>;

/// Creates an empty user exception for a type id, or declines with `None`.
pub type ExceptionFactory = Box<dyn Fn(&str) -> Option<Box<dyn UserException>>>;

/// Factories consulted by an [`InputStream`](crate::InputStream) to
/// instantiate classes and exceptions by type id.
///
/// A value factory registered under the empty type id `""` is the default
/// factory; it is tried whenever no factory exists for a specific id.
#[derive(Default)]
pub struct FactoryRegistry {
    values: HashMap<String, ValueFactory>,
    exceptions: HashMap<String, ExceptionFactory>,
    compact_ids: HashMap<i32, String>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_value_factory<F>(&mut self, type_id: impl Into<String>, factory: F) -> Result<(), Error>
    where
        F: Fn(&str) -> Option<ValuePtr> + 'static,
    {
        let type_id = type_id.into();
        if self.values.contains_key(&type_id) {
            return Err(Error::AlreadyRegistered {
                kind: "value factory".into(),
                id: type_id,
            });
        }
        self.values.insert(type_id, Box::new(factory));
        Ok(())
    }

    /// Registers `T::default()` as the factory for `T`'s type id.
    pub fn register_value<T: Value + Default>(&mut self) -> Result<(), Error> {
        let type_id = T::default().ice_id().to_string();
        self.add_value_factory(type_id, |_| Some(new_value(T::default())))
    }

    pub fn remove_value_factory(&mut self, type_id: &str) -> Result<(), Error> {
        self.values
            .remove(type_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotRegistered {
                kind: "value factory".into(),
                id: type_id.to_string(),
            })
    }

    pub fn find_value_factory(&self, type_id: &str) -> Option<&ValueFactory> {
        self.values.get(type_id)
    }

    pub fn add_exception_factory<F>(
        &mut self,
        type_id: impl Into<String>,
        factory: F,
    ) -> Result<(), Error>
    where
        F: Fn(&str) -> Option<Box<dyn UserException>> + 'static,
    {
        let type_id = type_id.into();
        if self.exceptions.contains_key(&type_id) {
            return Err(Error::AlreadyRegistered {
                kind: "user exception factory".into(),
                id: type_id,
            });
        }
        self.exceptions.insert(type_id, Box::new(factory));
        Ok(())
    }

    pub fn register_exception<T: UserException + Default>(&mut self) -> Result<(), Error> {
        let type_id = T::default().ice_id().to_string();
        self.add_exception_factory(type_id, |_| Some(Box::new(T::default())))
    }

    pub fn find_exception_factory(&self, type_id: &str) -> Option<&ExceptionFactory> {
        self.exceptions.get(type_id)
    }

    /// Maps a compact type id to its string type id.
    pub fn add_compact_id(&mut self, compact_id: i32, type_id: impl Into<String>) -> Result<(), Error> {
        if let Some(existing) = self.compact_ids.get(&compact_id) {
            return Err(Error::AlreadyRegistered {
                kind: "compact id".into(),
                id: format!("{compact_id} ({existing})"),
            });
        }
        self.compact_ids.insert(compact_id, type_id.into());
        Ok(())
    }

    pub fn type_id_for_compact_id(&self, compact_id: i32) -> Option<&str> {
        self.compact_ids.get(&compact_id).map(String::as_str)
    }

    /// Creates an instance for `type_id`, falling back to the default
    /// factory when the specific factory is missing or declines.
    pub(crate) fn create_value(&self, type_id: &str) -> Option<ValuePtr> {
        self.find_value_factory(type_id)
            .and_then(|f| f(type_id))
            .or_else(|| self.find_value_factory("").and_then(|f| f(type_id)))
    }

    pub(crate) fn create_exception(&self, type_id: &str) -> Option<Box<dyn UserException>> {
        self.find_exception_factory(type_id).and_then(|f| f(type_id))
    }
}

impl fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut values: Vec<&String> = self.values.keys().collect();
        values.sort();
        let mut exceptions: Vec<&String> = self.exceptions.keys().collect();
        exceptions.sort();
        f.debug_struct("FactoryRegistry")
            .field("values", &values)
            .field("exceptions", &exceptions)
            .field("compact_ids", &self.compact_ids.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::UnknownSlicedValue;

    fn unknown(type_id: &str) -> Option<ValuePtr> {
        Some(new_value(UnknownSlicedValue::new(type_id)))
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = FactoryRegistry::new();
        registry.add_value_factory("::Test::A", unknown).unwrap();
        let err = registry.add_value_factory("::Test::A", unknown).unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered { .. }));
    }

    #[test]
    fn remove_unknown_factory_fails() {
        let mut registry = FactoryRegistry::new();
        let err = registry.remove_value_factory("::Test::A").unwrap_err();
        assert_eq!(err.ice_id(), "::Ice::NotRegisteredException");
        registry.add_value_factory("::Test::A", unknown).unwrap();
        registry.remove_value_factory("::Test::A").unwrap();
        assert!(registry.find_value_factory("::Test::A").is_none());
    }

    #[test]
    fn default_factory_is_the_fallback() {
        let mut registry = FactoryRegistry::new();
        assert!(registry.create_value("::Test::A").is_none());
        registry.add_value_factory("::Test::A", |_| None).unwrap();
        registry.add_value_factory("", unknown).unwrap();
        let v = registry.create_value("::Test::A").unwrap();
        assert_eq!(v.borrow().ice_id(), "::Test::A");
    }

    #[test]
    fn compact_ids() {
        let mut registry = FactoryRegistry::new();
        registry.add_compact_id(3, "::Test::C").unwrap();
        assert_eq!(registry.type_id_for_compact_id(3), Some("::Test::C"));
        assert_eq!(registry.type_id_for_compact_id(4), None);
        assert!(registry.add_compact_id(3, "::Test::D").is_err());
    }
}
