// SPDX-License-Identifier: GPL-3.0-only

//! Type registry
//!
//! Types are registered once at startup with their canonical name, declared
//! field schema and reconstruction factory. Export reads the schema to decide
//! which fields to persist and in which order; import resolves record type
//! names back to factories.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::rc::Rc;

use crate::error::{FieldError, GraphError, RegistryError};
use crate::value::{FieldMap, GraphObject, ObjectRef, Value};

/// Declared category of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// String, integer, float or boolean
    Scalar,
    /// Measurement value persisted in its canonical unit
    Size,
    /// Ordered sequence of any persistable values
    Sequence,
    /// String-keyed mapping of persistable values
    Mapping,
    /// Reference to another registered object
    Reference,
    /// Never persisted; always written as an unsupported marker
    Opaque,
}

impl FieldKind {
    /// Whether a live value may be persisted under this declared kind.
    /// Absent values are accepted for every kind.
    pub fn admits(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Absent) => true,
            (FieldKind::Scalar, Value::Str(_))
            | (FieldKind::Scalar, Value::Int(_))
            | (FieldKind::Scalar, Value::Float(_))
            | (FieldKind::Scalar, Value::Bool(_)) => true,
            (FieldKind::Size, Value::Size(_)) => true,
            (FieldKind::Sequence, Value::List(_)) => true,
            (FieldKind::Mapping, Value::Map(_)) => true,
            (FieldKind::Reference, Value::Object(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Where records of a type land when they are reached through a field rather
/// than passed in as primary entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Shared,
    Auxiliary,
}

/// Reconstruction contract for registered types.
///
/// `from_fields` is distinct from a type's ordinary constructor: it receives
/// the decoded field mapping verbatim, including values that normal
/// construction would derive.
pub trait Reconstruct: GraphObject + Sized {
    const TYPE_NAME: &'static str;
    const PLACEMENT: Placement = Placement::Auxiliary;
    const SCHEMA: &'static [FieldSpec];

    fn from_fields(fields: FieldMap) -> Result<Rc<Self>, FieldError>;
}

pub type Factory = fn(FieldMap) -> Result<ObjectRef, FieldError>;

fn build_erased<T: Reconstruct>(fields: FieldMap) -> Result<ObjectRef, FieldError> {
    let object: ObjectRef = T::from_fields(fields)?;
    Ok(object)
}

pub struct TypeDescriptor {
    pub name: &'static str,
    pub placement: Placement,
    pub schema: &'static [FieldSpec],
    factory: Factory,
}

impl TypeDescriptor {
    pub fn build(&self, fields: FieldMap) -> Result<ObjectRef, FieldError> {
        (self.factory)(fields)
    }

    pub fn field_spec(&self, name: &str) -> Option<&FieldSpec> {
        self.schema.iter().find(|spec| spec.name == name)
    }
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("placement", &self.placement)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct TypeRegistry {
    types: HashMap<&'static str, TypeDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Reconstruct>(&mut self) -> Result<(), RegistryError> {
        match self.types.entry(T::TYPE_NAME) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate(T::TYPE_NAME)),
            Entry::Vacant(slot) => {
                tracing::debug!(type_name = T::TYPE_NAME, "registered type");
                slot.insert(TypeDescriptor {
                    name: T::TYPE_NAME,
                    placement: T::PLACEMENT,
                    schema: T::SCHEMA,
                    factory: build_erased::<T>,
                });
                Ok(())
            }
        }
    }

    pub fn get(&self, type_name: &str) -> Option<&TypeDescriptor> {
        self.types.get(type_name)
    }

    pub fn resolve(&self, type_name: &str) -> Result<&TypeDescriptor, GraphError> {
        self.get(type_name)
            .ok_or_else(|| GraphError::TypeResolution {
                type_name: type_name.to_string(),
            })
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.types.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Per-import resolution cache: each type name is looked up at most once.
pub struct TypeResolver<'r> {
    registry: &'r TypeRegistry,
    cache: HashMap<String, Option<&'r TypeDescriptor>>,
    lookups: usize,
}

impl<'r> TypeResolver<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self {
            registry,
            cache: HashMap::new(),
            lookups: 0,
        }
    }

    pub fn resolve(&mut self, type_name: &str) -> Result<&'r TypeDescriptor, GraphError> {
        let cached = match self.cache.get(type_name) {
            Some(cached) => *cached,
            None => {
                self.lookups += 1;
                let found = self.registry.get(type_name);
                self.cache.insert(type_name.to_string(), found);
                found
            }
        };

        cached.ok_or_else(|| GraphError::TypeResolution {
            type_name: type_name.to_string(),
        })
    }

    /// Number of registry lookups performed so far
    pub fn lookups(&self) -> usize {
        self.lookups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{TestBlob, TestNode, test_registry};

    #[test]
    fn rejects_duplicate_registration() {
        let mut registry = test_registry();
        assert_eq!(
            registry.register::<TestNode>(),
            Err(RegistryError::Duplicate(TestNode::TYPE_NAME))
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn resolves_registered_names_only() {
        let registry = test_registry();
        let descriptor = registry.resolve(TestBlob::TYPE_NAME).unwrap();
        assert_eq!(descriptor.placement, Placement::Shared);
        assert!(matches!(
            registry.resolve("test.Missing"),
            Err(GraphError::TypeResolution { .. })
        ));
        assert_eq!(registry.names(), vec![TestBlob::TYPE_NAME, TestNode::TYPE_NAME]);
    }

    #[test]
    fn resolver_caches_hits_and_misses() {
        let registry = test_registry();
        let mut resolver = TypeResolver::new(&registry);

        for _ in 0..3 {
            assert!(resolver.resolve(TestNode::TYPE_NAME).is_ok());
            assert!(resolver.resolve("test.Missing").is_err());
        }
        assert_eq!(resolver.lookups(), 2);
    }

    #[test]
    fn kinds_admit_matching_values_and_absence() {
        assert!(FieldKind::Scalar.admits(&Value::Int(3)));
        assert!(FieldKind::Reference.admits(&Value::Absent));
        assert!(!FieldKind::Scalar.admits(&Value::List(Vec::new())));
        assert!(!FieldKind::Opaque.admits(&Value::Str("secret".into())));
    }
}
