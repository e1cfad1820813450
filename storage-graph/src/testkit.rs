// SPDX-License-Identifier: GPL-3.0-only

//! Small registered types for exercising the engine in unit tests.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use storage_types::Size;

use crate::error::FieldError;
use crate::registry::{FieldKind, FieldSpec, Placement, Reconstruct, TypeRegistry};
use crate::value::{FieldMap, GraphObject, ObjectRef, Value};

pub(crate) fn test_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register::<TestNode>().expect("register node");
    registry.register::<TestBlob>().expect("register blob");
    registry
}

pub(crate) struct TestNode {
    pub(crate) name: String,
    pub(crate) size: Option<Size>,
    pub(crate) note: Value,
    pub(crate) labels: Option<Vec<String>>,
    pub(crate) tags: IndexMap<String, String>,
    pub(crate) blob: Option<Rc<TestBlob>>,
    pub(crate) children: Vec<ObjectRef>,
    pub(crate) peer: RefCell<Option<ObjectRef>>,
    pub(crate) handle: Option<String>,
}

impl TestNode {
    pub(crate) fn blank(name: &str) -> Self {
        Self {
            name: name.to_string(),
            size: None,
            note: Value::Absent,
            labels: None,
            tags: IndexMap::new(),
            blob: None,
            children: Vec::new(),
            peer: RefCell::new(None),
            handle: None,
        }
    }

    pub(crate) fn new(name: &str) -> Rc<Self> {
        Self::blank(name).shared()
    }

    pub(crate) fn shared(self) -> Rc<Self> {
        Rc::new(self)
    }

    pub(crate) fn with_size(mut self, size: Size) -> Self {
        self.size = Some(size);
        self
    }

    pub(crate) fn with_note(mut self, note: Value) -> Self {
        self.note = note;
        self
    }

    pub(crate) fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub(crate) fn with_blob(mut self, blob: Rc<TestBlob>) -> Self {
        self.blob = Some(blob);
        self
    }

    pub(crate) fn with_children(mut self, children: Vec<ObjectRef>) -> Self {
        self.children = children;
        self
    }

    pub(crate) fn with_handle(mut self, type_name: &str) -> Self {
        self.handle = Some(type_name.to_string());
        self
    }

    pub(crate) fn set_peer(&self, peer: ObjectRef) {
        *self.peer.borrow_mut() = Some(peer);
    }

    /// Break a strong cycle at the end of a test.
    pub(crate) fn clear_peer(&self) {
        self.peer.borrow_mut().take();
    }

    pub(crate) fn peer(&self) -> Option<ObjectRef> {
        self.peer.borrow().clone()
    }

    pub(crate) fn blob(&self) -> Option<Rc<TestBlob>> {
        self.blob.clone()
    }
}

impl GraphObject for TestNode {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn field(&self, name: &str) -> Value {
        match name {
            "name" => Value::from(self.name.as_str()),
            "size" => Value::from(self.size),
            "note" => self.note.clone(),
            "labels" => self
                .labels
                .as_ref()
                .map_or(Value::Absent, |labels| Value::strings(labels.iter().cloned())),
            "tags" => Value::Map(
                self.tags
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::from(value.as_str())))
                    .collect(),
            ),
            "blob" => self
                .blob
                .clone()
                .map_or(Value::Absent, |blob| Value::Object(blob)),
            "children" => Value::objects(self.children.iter().cloned()),
            "peer" => self.peer().map_or(Value::Absent, Value::Object),
            "handle" => self
                .handle
                .clone()
                .map_or(Value::Absent, Value::Unsupported),
            _ => Value::Absent,
        }
    }

    fn restore_field(&self, name: &str, value: Value) -> Result<(), FieldError> {
        match (name, value) {
            ("peer", Value::Object(peer)) => {
                self.set_peer(peer);
                Ok(())
            }
            _ => Err(FieldError::NotRestorable(name.to_string())),
        }
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl Reconstruct for TestNode {
    const TYPE_NAME: &'static str = "test.Node";
    const SCHEMA: &'static [FieldSpec] = &[
        FieldSpec::new("name", FieldKind::Scalar),
        FieldSpec::new("size", FieldKind::Size),
        FieldSpec::new("note", FieldKind::Scalar),
        FieldSpec::new("labels", FieldKind::Sequence),
        FieldSpec::new("tags", FieldKind::Mapping),
        FieldSpec::new("blob", FieldKind::Reference),
        FieldSpec::new("children", FieldKind::Sequence),
        FieldSpec::new("peer", FieldKind::Reference),
        FieldSpec::new("handle", FieldKind::Opaque),
    ];

    fn from_fields(fields: FieldMap) -> Result<Rc<Self>, FieldError> {
        let labels = match fields.get("labels") {
            Some(Value::List(_)) => Some(fields.strings("labels")?),
            _ => None,
        };
        let node = TestNode {
            name: fields.string("name")?,
            size: fields.opt_size("size")?,
            note: fields.get("note").cloned().unwrap_or(Value::Absent),
            labels,
            tags: fields.string_map("tags")?,
            blob: fields.opt_object_of::<TestBlob>("blob", TestBlob::TYPE_NAME)?,
            children: fields.objects("children")?,
            peer: RefCell::new(fields.opt_object("peer")?),
            handle: fields.opt_unavailable("handle"),
        };
        Ok(Rc::new(node))
    }
}

pub(crate) struct TestBlob {
    pub(crate) label: String,
}

impl TestBlob {
    pub(crate) fn new(label: &str) -> Rc<Self> {
        Rc::new(Self {
            label: label.to_string(),
        })
    }
}

impl GraphObject for TestBlob {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn field(&self, name: &str) -> Value {
        match name {
            "label" => Value::from(self.label.as_str()),
            _ => Value::Absent,
        }
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl Reconstruct for TestBlob {
    const TYPE_NAME: &'static str = "test.Blob";
    const PLACEMENT: Placement = Placement::Shared;
    const SCHEMA: &'static [FieldSpec] = &[FieldSpec::new("label", FieldKind::Scalar)];

    fn from_fields(fields: FieldMap) -> Result<Rc<Self>, FieldError> {
        Ok(TestBlob::new(&fields.string("label")?))
    }
}

/// Persistable-looking object whose type is never registered.
pub(crate) struct TestStray;

impl TestStray {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(TestStray)
    }
}

impl GraphObject for TestStray {
    fn type_name(&self) -> &'static str {
        "test.Stray"
    }

    fn field(&self, _name: &str) -> Value {
        Value::Absent
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}
