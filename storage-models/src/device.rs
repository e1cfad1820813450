// SPDX-License-Identifier: GPL-3.0-only

//! Block device model - attributes shared by every device kind
//!
//! Devices point up to their parents (a partition to its disk, a logical
//! volume to its volume group). Parent links are strong; the few downward
//! links kept for convenience are weak, so a device tree never leaks.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use storage_graph::{FieldError, FieldMap, ObjectRef, Value, downcast};
use storage_types::Size;

use crate::disk::Disk;
use crate::format::Format;
use crate::lvm::{LogicalVolume, VolumeGroup};
use crate::mdraid::MdArray;
use crate::partition::Partition;

/// Declared schema of a device type: the common fields followed by the
/// type's own fields.
macro_rules! device_schema {
    ($($name:literal => $kind:ident),* $(,)?) => {
        &[
            ::storage_graph::FieldSpec::new("name", ::storage_graph::FieldKind::Scalar),
            ::storage_graph::FieldSpec::new("path", ::storage_graph::FieldKind::Scalar),
            ::storage_graph::FieldSpec::new("size", ::storage_graph::FieldKind::Size),
            ::storage_graph::FieldSpec::new("exists", ::storage_graph::FieldKind::Scalar),
            ::storage_graph::FieldSpec::new("uuid", ::storage_graph::FieldKind::Scalar),
            ::storage_graph::FieldSpec::new("parents", ::storage_graph::FieldKind::Sequence),
            ::storage_graph::FieldSpec::new("format", ::storage_graph::FieldKind::Reference),
            $(::storage_graph::FieldSpec::new($name, ::storage_graph::FieldKind::$kind),)*
        ]
    };
}
pub(crate) use device_schema;

/// Any device in the tree.
#[derive(Clone)]
pub enum BlockDevice {
    Disk(Rc<Disk>),
    Partition(Rc<Partition>),
    VolumeGroup(Rc<VolumeGroup>),
    LogicalVolume(Rc<LogicalVolume>),
    MdArray(Rc<MdArray>),
}

impl BlockDevice {
    pub fn core(&self) -> &DeviceCore {
        match self {
            BlockDevice::Disk(device) => &device.core,
            BlockDevice::Partition(device) => &device.core,
            BlockDevice::VolumeGroup(device) => &device.core,
            BlockDevice::LogicalVolume(device) => &device.core,
            BlockDevice::MdArray(device) => &device.core,
        }
    }

    pub fn name(&self) -> &str {
        &self.core().name
    }

    pub fn object(&self) -> ObjectRef {
        match self {
            BlockDevice::Disk(device) => device.clone(),
            BlockDevice::Partition(device) => device.clone(),
            BlockDevice::VolumeGroup(device) => device.clone(),
            BlockDevice::LogicalVolume(device) => device.clone(),
            BlockDevice::MdArray(device) => device.clone(),
        }
    }

    /// Recover the typed device behind a reconstructed object.
    pub fn from_object(object: &ObjectRef) -> Option<Self> {
        if let Some(device) = downcast::<Disk>(object) {
            return Some(BlockDevice::Disk(device));
        }
        if let Some(device) = downcast::<Partition>(object) {
            return Some(BlockDevice::Partition(device));
        }
        if let Some(device) = downcast::<VolumeGroup>(object) {
            return Some(BlockDevice::VolumeGroup(device));
        }
        if let Some(device) = downcast::<LogicalVolume>(object) {
            return Some(BlockDevice::LogicalVolume(device));
        }
        downcast::<MdArray>(object).map(BlockDevice::MdArray)
    }

    pub fn type_name(&self) -> &'static str {
        self.object().type_name()
    }

    pub fn ptr_eq(&self, other: &BlockDevice) -> bool {
        std::ptr::addr_eq(self.core(), other.core())
    }

    /// Whether `ancestor` appears anywhere above this device.
    pub fn depends_on(&self, ancestor: &BlockDevice) -> bool {
        let mut stack = self.core().parents();
        while let Some(parent) = stack.pop() {
            if parent.ptr_eq(ancestor) {
                return true;
            }
            stack.extend(parent.core().parents());
        }
        false
    }
}

impl std::fmt::Debug for BlockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.type_name(), self.name())
    }
}

/// Attributes every device carries.
pub struct DeviceCore {
    /// Kernel name (e.g., "sda", "sda1", "vg0", "vg0-root", "md0")
    pub name: String,

    /// Device node (e.g., "/dev/sda1", "/dev/mapper/vg0-root")
    pub path: String,

    pub size: Size,

    /// Whether the device is present on the system or only planned
    pub exists: bool,

    pub uuid: Option<String>,

    /// Format on the device, if any
    pub format: Option<Format>,

    parents: RefCell<Vec<BlockDevice>>,
}

impl DeviceCore {
    pub fn new(name: impl Into<String>, path: impl Into<String>, size: Size) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            size,
            exists: true,
            uuid: None,
            format: None,
            parents: RefCell::new(Vec::new()),
        }
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_parents(self, parents: Vec<BlockDevice>) -> Self {
        *self.parents.borrow_mut() = parents;
        self
    }

    pub fn planned(mut self) -> Self {
        self.exists = false;
        self
    }

    pub fn parents(&self) -> Vec<BlockDevice> {
        self.parents.borrow().clone()
    }

    pub fn parents_ref(&self) -> Ref<'_, Vec<BlockDevice>> {
        self.parents.borrow()
    }

    pub fn add_parent(&self, parent: BlockDevice) {
        self.parents.borrow_mut().push(parent);
    }

    /// Common field values; `None` for names the core does not own
    pub(crate) fn field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "name" => Value::from(self.name.as_str()),
            "path" => Value::from(self.path.as_str()),
            "size" => Value::Size(self.size),
            "exists" => Value::Bool(self.exists),
            "uuid" => Value::from(self.uuid.clone()),
            "parents" => Value::objects(self.parents.borrow().iter().map(BlockDevice::object)),
            "format" => self
                .format
                .as_ref()
                .map_or(Value::Absent, |format| Value::Object(format.object())),
            _ => return None,
        };
        Some(value)
    }

    pub(crate) fn from_fields(fields: &FieldMap) -> Result<Self, FieldError> {
        let format = match fields.opt_object("format")? {
            Some(object) => Some(Format::from_object(&object).ok_or_else(|| {
                FieldError::WrongObjectType {
                    field: "format".to_string(),
                    expected: "format",
                    found: object.type_name(),
                }
            })?),
            None => None,
        };

        Ok(Self {
            name: fields.string("name")?,
            path: fields.string("path")?,
            size: fields.size("size")?,
            exists: fields.bool_or("exists", true)?,
            uuid: fields.opt_string("uuid")?,
            format,
            parents: RefCell::new(block_devices(fields, "parents")?),
        })
    }

    /// Restore a field that could not be set during construction.
    pub(crate) fn restore(&self, name: &str, value: Value) -> Result<(), FieldError> {
        match (name, value) {
            ("parents", Value::List(items)) => {
                let mut parents = Vec::with_capacity(items.len());
                for item in items {
                    let Value::Object(object) = item else {
                        return Err(FieldError::Mismatch {
                            field: name.to_string(),
                            expected: "object",
                            found: item.category(),
                        });
                    };
                    parents.push(block_device(name, &object)?);
                }
                *self.parents.borrow_mut() = parents;
                Ok(())
            }
            _ => Err(FieldError::NotRestorable(name.to_string())),
        }
    }
}

fn block_device(field: &str, object: &ObjectRef) -> Result<BlockDevice, FieldError> {
    BlockDevice::from_object(object).ok_or_else(|| FieldError::WrongObjectType {
        field: field.to_string(),
        expected: "block device",
        found: object.type_name(),
    })
}

/// Referenced block devices of a list field; missing fields yield none.
pub(crate) fn block_devices(fields: &FieldMap, name: &str) -> Result<Vec<BlockDevice>, FieldError> {
    fields
        .objects(name)?
        .iter()
        .map(|object| block_device(name, object))
        .collect()
}

/// Optional referenced block device.
pub(crate) fn opt_block_device(
    fields: &FieldMap,
    name: &str,
) -> Result<Option<BlockDevice>, FieldError> {
    fields
        .opt_object(name)?
        .map(|object| block_device(name, &object))
        .transpose()
}

/// Shared `GraphObject::field` fallthrough for device types.
pub(crate) fn common_field(core: &DeviceCore, name: &str) -> Value {
    core.field(name).unwrap_or(Value::Absent)
}
