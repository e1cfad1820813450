// SPDX-License-Identifier: GPL-3.0-only

//! Value codec
//!
//! Turns live [`Value`]s into persisted [`Field`]s and back. Object values are
//! written as id references; the codec assigns ids through the export index
//! and reports newly seen objects, but placement is left to the walker.

use indexmap::IndexMap;
use storage_types::Size;

use crate::document::{DeclaredType, Field};
use crate::error::{GraphError, ReferenceFailure};
use crate::identity::{ExportIdentities, ObjectId};
use crate::registry::TypeRegistry;
use crate::value::{ObjectRef, Value};

/// Result of encoding one live value.
pub struct Encoded {
    pub field: Field,
    /// Objects that received an id while encoding, in encounter order
    pub discovered: Vec<(ObjectId, ObjectRef)>,
    /// Type names of opaque values written as unsupported markers
    pub unsupported: Vec<String>,
}

pub struct Encoder<'r> {
    registry: &'r TypeRegistry,
    ids: ExportIdentities,
}

impl<'r> Encoder<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self {
            registry,
            ids: ExportIdentities::new(),
        }
    }

    pub fn identify(&mut self, object: &ObjectRef) -> (ObjectId, bool) {
        self.ids.get_or_assign(object)
    }

    pub fn assigned(&self) -> usize {
        self.ids.len()
    }

    /// Encode a value. Fails without assigning any id when the value holds an
    /// object of an unregistered type.
    pub fn encode(&mut self, value: &Value) -> Result<Encoded, GraphError> {
        self.check(value)?;

        let mut encoded = Encoded {
            field: Field::new(DeclaredType::None),
            discovered: Vec::new(),
            unsupported: Vec::new(),
        };
        let field = self.encode_value(value, &mut encoded);
        encoded.field = field;
        Ok(encoded)
    }

    fn check(&self, value: &Value) -> Result<(), GraphError> {
        let mut stack = vec![value];
        while let Some(value) = stack.pop() {
            match value {
                Value::Object(object) if !self.registry.contains(object.type_name()) => {
                    return Err(GraphError::EncodingFailed(format!(
                        "object of unregistered type '{}'",
                        object.type_name()
                    )));
                }
                Value::List(items) => stack.extend(items),
                Value::Map(entries) => stack.extend(entries.values()),
                _ => {}
            }
        }
        Ok(())
    }

    fn encode_value(&mut self, value: &Value, encoded: &mut Encoded) -> Field {
        match value {
            Value::Absent => Field::new(DeclaredType::None),
            Value::Str(text) => Field::with_text(DeclaredType::Str, text.as_str()),
            Value::Int(number) => Field::with_text(DeclaredType::Int, number.to_string()),
            Value::Float(number) => Field::with_text(DeclaredType::Float, number.to_string()),
            Value::Bool(flag) => Field::with_text(DeclaredType::Bool, flag.to_string()),
            Value::Size(size) => size_field(*size),
            Value::List(items) => {
                let mut field = Field::new(DeclaredType::List);
                field.children = items
                    .iter()
                    .map(|item| self.encode_value(item, encoded))
                    .collect();
                field
            }
            Value::Map(entries) => {
                let mut field = Field::new(DeclaredType::Map);
                field.children = entries
                    .iter()
                    .map(|(key, item)| self.encode_value(item, encoded).keyed(key.as_str()))
                    .collect();
                field
            }
            Value::Object(object) => {
                let (id, is_new) = self.ids.get_or_assign(object);
                if is_new {
                    encoded.discovered.push((id, object.clone()));
                }
                Field::with_text(DeclaredType::Reference, id.to_string())
            }
            Value::Unsupported(type_name) | Value::Unavailable(type_name) => {
                encoded.unsupported.push(type_name.clone());
                unsupported_marker(type_name)
            }
        }
    }
}

fn size_field(size: Size) -> Field {
    let mut field = Field::with_text(DeclaredType::Size, size.bytes().to_string());
    field.display = Some(size.human());
    field
}

pub fn unsupported_marker(type_name: &str) -> Field {
    Field::with_text(DeclaredType::Unsupported, type_name)
}

pub fn failed_marker(reason: &str) -> Field {
    Field::with_text(DeclaredType::Failed, reason)
}

/// What a referenced id currently resolves to during import.
pub enum Resolution {
    Built(ObjectRef),
    /// Record is still under construction
    Pending,
    Failed,
    Missing,
}

/// Result of decoding one persisted field.
#[derive(Debug)]
pub enum Decoded {
    Value(Value),
    /// A reference targets a record under construction; retry after the pass
    Deferred(ObjectId),
    /// The field cannot be decoded and is omitted
    Broken(GraphError),
}

enum Halt {
    Deferred(ObjectId),
    Broken(GraphError),
}

pub fn decode<F>(field: &Field, resolve: F) -> Decoded
where
    F: Fn(ObjectId) -> Resolution,
{
    match decode_value(field, &resolve) {
        Ok(value) => Decoded::Value(value),
        Err(Halt::Deferred(id)) => Decoded::Deferred(id),
        Err(Halt::Broken(error)) => Decoded::Broken(error),
    }
}

fn malformed(declared: DeclaredType, text: &str) -> Halt {
    Halt::Broken(GraphError::MalformedValue {
        declared: declared.tag(),
        text: text.to_string(),
    })
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim() {
        "true" | "True" => Some(true),
        "false" | "False" => Some(false),
        _ => None,
    }
}

fn decode_value<F>(field: &Field, resolve: &F) -> Result<Value, Halt>
where
    F: Fn(ObjectId) -> Resolution,
{
    let declared = field.declared_type;
    let text = field.text();
    let value = match declared {
        DeclaredType::None => Value::Absent,
        DeclaredType::Str => Value::Str(text.to_string()),
        DeclaredType::Int => Value::Int(
            text.trim()
                .parse()
                .map_err(|_| malformed(declared, text))?,
        ),
        DeclaredType::Float => Value::Float(
            text.trim()
                .parse()
                .map_err(|_| malformed(declared, text))?,
        ),
        DeclaredType::Bool => {
            Value::Bool(parse_bool(text).ok_or_else(|| malformed(declared, text))?)
        }
        DeclaredType::Size => Value::Size(Size::from_bytes(
            text.trim()
                .parse()
                .map_err(|_| malformed(declared, text))?,
        )),
        DeclaredType::List => Value::List(
            field
                .children
                .iter()
                .map(|child| decode_value(child, resolve))
                .collect::<Result<_, _>>()?,
        ),
        DeclaredType::Map => {
            let mut entries = IndexMap::with_capacity(field.children.len());
            for child in &field.children {
                let key = child
                    .key
                    .clone()
                    .ok_or_else(|| malformed(declared, "<entry without key>"))?;
                entries.insert(key, decode_value(child, resolve)?);
            }
            Value::Map(entries)
        }
        DeclaredType::Reference => {
            let target: ObjectId = text.parse().map_err(|_| malformed(declared, text))?;
            match resolve(target) {
                Resolution::Built(object) => Value::Object(object),
                Resolution::Pending => return Err(Halt::Deferred(target)),
                Resolution::Failed => {
                    return Err(Halt::Broken(GraphError::ReferenceResolution {
                        target,
                        reason: ReferenceFailure::Failed,
                    }));
                }
                Resolution::Missing => {
                    return Err(Halt::Broken(GraphError::ReferenceResolution {
                        target,
                        reason: ReferenceFailure::Missing,
                    }));
                }
            }
        }
        DeclaredType::Unsupported | DeclaredType::Failed => Value::Unavailable(text.to_string()),
    };
    Ok(value)
}
