// SPDX-License-Identifier: GPL-3.0-only

//! Live field values and the domain object contract

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use storage_types::Size;

use crate::error::FieldError;

/// Shared handle to a live, persistable object.
pub type ObjectRef = Rc<dyn GraphObject>;

/// A live object the engine can persist.
///
/// The engine never inspects objects reflectively: it asks for the fields its
/// registered schema declares, by name, in schema order.
pub trait GraphObject: Any {
    /// Canonical dotted type name, identical to the registered name.
    fn type_name(&self) -> &'static str;

    /// Current value of a declared field. Unknown names yield [`Value::Absent`].
    fn field(&self, name: &str) -> Value;

    /// Inject a field after construction. Import uses this to close reference
    /// cycles that could not be satisfied while the object was being built.
    fn restore_field(&self, name: &str, _value: Value) -> Result<(), FieldError> {
        Err(FieldError::NotRestorable(name.to_string()))
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

/// Downcast a shared object handle to its concrete type.
pub fn downcast<T: GraphObject>(object: &ObjectRef) -> Option<Rc<T>> {
    object.clone().into_any().downcast::<T>().ok()
}

/// A single field value.
#[derive(Clone)]
pub enum Value {
    /// Field not set; distinct from every empty value
    Absent,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Size(Size),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    Object(ObjectRef),
    /// Export side: an opaque value that must never be dumped, named by type
    Unsupported(String),
    /// Import side: the persisted value could not be reconstructed
    Unavailable(String),
}

impl Value {
    pub fn category(&self) -> &'static str {
        match self {
            Value::Absent => "absent",
            Value::Str(_) => "string",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Bool(_) => "boolean",
            Value::Size(_) => "size",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
            Value::Unsupported(_) => "unsupported",
            Value::Unavailable(_) => "unavailable",
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    pub fn object(object: ObjectRef) -> Self {
        Value::Object(object)
    }

    pub fn objects<I>(objects: I) -> Self
    where
        I: IntoIterator<Item = ObjectRef>,
    {
        Value::List(objects.into_iter().map(Value::Object).collect())
    }

    pub fn strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::List(items.into_iter().map(|item| Value::Str(item.into())).collect())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Size> for Value {
    fn from(value: Size) -> Self {
        Value::Size(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Absent, Into::into)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Absent => f.write_str("Absent"),
            Value::Str(value) => f.debug_tuple("Str").field(value).finish(),
            Value::Int(value) => f.debug_tuple("Int").field(value).finish(),
            Value::Float(value) => f.debug_tuple("Float").field(value).finish(),
            Value::Bool(value) => f.debug_tuple("Bool").field(value).finish(),
            Value::Size(value) => f.debug_tuple("Size").field(value).finish(),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
            Value::Object(object) => write!(f, "Object(<{}>)", object.type_name()),
            Value::Unsupported(name) => f.debug_tuple("Unsupported").field(name).finish(),
            Value::Unavailable(name) => f.debug_tuple("Unavailable").field(name).finish(),
        }
    }
}

/// Objects compare by identity, everything else by value.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Absent, Value::Absent) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits() || a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Size(a), Value::Size(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Unsupported(a), Value::Unsupported(b)) => a == b,
            (Value::Unavailable(a), Value::Unavailable(b)) => a == b,
            _ => false,
        }
    }
}

/// Decoded fields of one record, handed to a type's factory.
///
/// Fields that were absent from the document, deferred by a reference cycle,
/// or that failed to decode are simply missing; optional accessors treat them
/// like [`Value::Absent`].
pub struct FieldMap {
    type_name: String,
    values: IndexMap<String, Value>,
}

impl FieldMap {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            values: IndexMap::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The field decoded to an explicit "cannot be reconstructed" signal.
    pub fn is_unavailable(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(Value::Unavailable(_)))
    }

    /// Type name carried by an unavailable field, if the field decoded to one.
    pub fn opt_unavailable(&self, name: &str) -> Option<String> {
        match self.values.get(name) {
            Some(Value::Unavailable(type_name)) => Some(type_name.clone()),
            _ => None,
        }
    }

    fn present(&self, name: &str) -> Option<&Value> {
        match self.values.get(name) {
            None | Some(Value::Absent) | Some(Value::Unavailable(_)) => None,
            Some(value) => Some(value),
        }
    }

    fn mismatch(name: &str, expected: &'static str, found: &Value) -> FieldError {
        FieldError::Mismatch {
            field: name.to_string(),
            expected,
            found: found.category(),
        }
    }

    pub fn opt_string(&self, name: &str) -> Result<Option<String>, FieldError> {
        match self.present(name) {
            None => Ok(None),
            Some(Value::Str(value)) => Ok(Some(value.clone())),
            Some(other) => Err(Self::mismatch(name, "string", other)),
        }
    }

    pub fn string(&self, name: &str) -> Result<String, FieldError> {
        self.opt_string(name)?
            .ok_or_else(|| FieldError::Missing(name.to_string()))
    }

    pub fn opt_int(&self, name: &str) -> Result<Option<i64>, FieldError> {
        match self.present(name) {
            None => Ok(None),
            Some(Value::Int(value)) => Ok(Some(*value)),
            Some(other) => Err(Self::mismatch(name, "integer", other)),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64, FieldError> {
        self.opt_int(name)?
            .ok_or_else(|| FieldError::Missing(name.to_string()))
    }

    pub fn opt_float(&self, name: &str) -> Result<Option<f64>, FieldError> {
        match self.present(name) {
            None => Ok(None),
            Some(Value::Float(value)) => Ok(Some(*value)),
            Some(other) => Err(Self::mismatch(name, "float", other)),
        }
    }

    pub fn opt_bool(&self, name: &str) -> Result<Option<bool>, FieldError> {
        match self.present(name) {
            None => Ok(None),
            Some(Value::Bool(value)) => Ok(Some(*value)),
            Some(other) => Err(Self::mismatch(name, "boolean", other)),
        }
    }

    /// Boolean with a default for missing fields
    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool, FieldError> {
        Ok(self.opt_bool(name)?.unwrap_or(default))
    }

    pub fn opt_size(&self, name: &str) -> Result<Option<Size>, FieldError> {
        match self.present(name) {
            None => Ok(None),
            Some(Value::Size(value)) => Ok(Some(*value)),
            Some(other) => Err(Self::mismatch(name, "size", other)),
        }
    }

    pub fn size(&self, name: &str) -> Result<Size, FieldError> {
        self.opt_size(name)?
            .ok_or_else(|| FieldError::Missing(name.to_string()))
    }

    /// List of strings; missing fields yield an empty list
    pub fn strings(&self, name: &str) -> Result<Vec<String>, FieldError> {
        match self.present(name) {
            None => Ok(Vec::new()),
            Some(Value::List(items)) => items
                .iter()
                .map(|item| match item {
                    Value::Str(value) => Ok(value.clone()),
                    other => Err(Self::mismatch(name, "string", other)),
                })
                .collect(),
            Some(other) => Err(Self::mismatch(name, "list", other)),
        }
    }

    /// Map of strings; missing fields yield an empty map
    pub fn string_map(&self, name: &str) -> Result<IndexMap<String, String>, FieldError> {
        match self.present(name) {
            None => Ok(IndexMap::new()),
            Some(Value::Map(entries)) => entries
                .iter()
                .map(|(key, value)| match value {
                    Value::Str(value) => Ok((key.clone(), value.clone())),
                    other => Err(Self::mismatch(name, "string", other)),
                })
                .collect(),
            Some(other) => Err(Self::mismatch(name, "map", other)),
        }
    }

    pub fn opt_object(&self, name: &str) -> Result<Option<ObjectRef>, FieldError> {
        match self.present(name) {
            None => Ok(None),
            Some(Value::Object(object)) => Ok(Some(object.clone())),
            Some(other) => Err(Self::mismatch(name, "object", other)),
        }
    }

    /// Referenced object of a known concrete type
    pub fn opt_object_of<T: GraphObject>(
        &self,
        name: &str,
        expected: &'static str,
    ) -> Result<Option<Rc<T>>, FieldError> {
        let Some(object) = self.opt_object(name)? else {
            return Ok(None);
        };
        downcast::<T>(&object)
            .map(Some)
            .ok_or_else(|| FieldError::WrongObjectType {
                field: name.to_string(),
                expected,
                found: object.type_name(),
            })
    }

    /// List of referenced objects; missing fields yield an empty list
    pub fn objects(&self, name: &str) -> Result<Vec<ObjectRef>, FieldError> {
        match self.present(name) {
            None => Ok(Vec::new()),
            Some(Value::List(items)) => items
                .iter()
                .map(|item| match item {
                    Value::Object(object) => Ok(object.clone()),
                    other => Err(Self::mismatch(name, "object", other)),
                })
                .collect(),
            Some(other) => Err(Self::mismatch(name, "list", other)),
        }
    }

    /// List of referenced objects of one concrete type
    pub fn objects_of<T: GraphObject>(
        &self,
        name: &str,
        expected: &'static str,
    ) -> Result<Vec<Rc<T>>, FieldError> {
        self.objects(name)?
            .iter()
            .map(|object| {
                downcast::<T>(object).ok_or_else(|| FieldError::WrongObjectType {
                    field: name.to_string(),
                    expected,
                    found: object.type_name(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{TestBlob, TestNode};

    #[test]
    fn absent_and_empty_values_differ() {
        assert_ne!(Value::Absent, Value::List(Vec::new()));
        assert_ne!(Value::Absent, Value::Str(String::new()));
        assert_eq!(Value::from(None::<String>), Value::Absent);
    }

    #[test]
    fn objects_compare_by_identity() {
        let node: ObjectRef = TestNode::new("a");
        let twin: ObjectRef = TestNode::new("a");
        assert_eq!(Value::Object(node.clone()), Value::Object(node.clone()));
        assert_ne!(Value::Object(node), Value::Object(twin));
    }

    #[test]
    fn field_map_accessors_check_categories() {
        let mut fields = FieldMap::new("test.Node");
        fields.insert("name", Value::from("sda"));
        fields.insert("size", Value::Size(Size::gib(1)));
        fields.insert("handle", Value::Unavailable("native.Handle".into()));
        fields.insert("note", Value::Absent);

        assert_eq!(fields.string("name").unwrap(), "sda");
        assert_eq!(fields.size("size").unwrap(), Size::gib(1));
        assert!(fields.is_unavailable("handle"));
        assert_eq!(fields.opt_string("handle").unwrap(), None);
        assert_eq!(fields.opt_string("note").unwrap(), None);
        assert_eq!(
            fields.string("missing"),
            Err(FieldError::Missing("missing".into()))
        );
        assert!(matches!(
            fields.int("name"),
            Err(FieldError::Mismatch { found: "string", .. })
        ));
        assert!(fields.strings("missing").unwrap().is_empty());
    }

    #[test]
    fn typed_object_access_rejects_other_types() {
        let mut fields = FieldMap::new("test.Node");
        fields.insert("peer", Value::Object(TestBlob::new("x")));

        assert!(fields.opt_object_of::<TestBlob>("peer", "blob").unwrap().is_some());
        assert!(matches!(
            fields.opt_object_of::<TestNode>("peer", "node"),
            Err(FieldError::WrongObjectType { .. })
        ));
    }
}
