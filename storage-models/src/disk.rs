// SPDX-License-Identifier: GPL-3.0-only

//! Disks and partition tables

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use storage_graph::{FieldError, FieldMap, GraphObject, Reconstruct, Value, downcast};
use storage_types::Size;

use crate::device::{DeviceCore, common_field, device_schema};
use crate::partition::Partition;

/// Type name reported for the native partition table handle, which is never
/// persisted.
pub const TABLE_HANDLE_TYPE: &str = "parted.Disk";

/// Partition table type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionTableType {
    /// GPT (GUID Partition Table)
    Gpt,

    /// MBR/DOS (Master Boot Record)
    #[serde(alias = "mbr")]
    Dos,
}

impl PartitionTableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Dos => "dos",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gpt" => Some(Self::Gpt),
            "dos" | "mbr" => Some(Self::Dos),
            _ => None,
        }
    }

    /// Maximum number of partitions the table can hold
    pub fn max_partitions(&self) -> u32 {
        match self {
            Self::Gpt => 128,
            Self::Dos => 4,
        }
    }
}

/// Whole disk
pub struct Disk {
    pub core: DeviceCore,

    pub model: Option<String>,

    pub serial: Option<String>,

    /// Logical sector size in bytes
    pub sector_size: u64,

    pub removable: bool,

    /// Partition table, if the disk is partitioned
    pub table_type: Option<PartitionTableType>,

    partitions: RefCell<Vec<Weak<Partition>>>,
}

impl Disk {
    pub fn new(core: DeviceCore) -> Rc<Self> {
        Self::builder(core).shared()
    }

    pub fn builder(core: DeviceCore) -> Self {
        Self {
            core,
            model: None,
            serial: None,
            sector_size: 512,
            removable: false,
            table_type: None,
            partitions: RefCell::new(Vec::new()),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn with_sector_size(mut self, sector_size: u64) -> Self {
        self.sector_size = sector_size;
        self
    }

    pub fn with_table(mut self, table_type: PartitionTableType) -> Self {
        self.table_type = Some(table_type);
        self
    }

    pub fn removable(mut self, removable: bool) -> Self {
        self.removable = removable;
        self
    }

    pub fn shared(self) -> Rc<Self> {
        Rc::new(self)
    }

    /// Record a partition living on this disk. The disk does not keep it alive.
    pub fn attach_partition(&self, partition: &Rc<Partition>) {
        self.partitions.borrow_mut().push(Rc::downgrade(partition));
    }

    /// Partitions still alive, in attachment order
    pub fn partitions(&self) -> Vec<Rc<Partition>> {
        self.partitions
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn is_partitioned(&self) -> bool {
        self.table_type.is_some()
    }
}

impl GraphObject for Disk {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn field(&self, name: &str) -> Value {
        match name {
            "model" => Value::from(self.model.clone()),
            "serial" => Value::from(self.serial.clone()),
            "sector_size" => Value::Size(Size::from_bytes(self.sector_size)),
            "removable" => Value::Bool(self.removable),
            "table_type" => Value::from(self.table_type.map(|table| table.as_str())),
            "partitions" => Value::objects(
                self.partitions()
                    .into_iter()
                    .map(|partition| partition as storage_graph::ObjectRef),
            ),
            "table_handle" => match self.table_type {
                Some(_) => Value::Unsupported(TABLE_HANDLE_TYPE.to_string()),
                None => Value::Absent,
            },
            _ => common_field(&self.core, name),
        }
    }

    fn restore_field(&self, name: &str, value: Value) -> Result<(), FieldError> {
        match (name, value) {
            ("partitions", Value::List(items)) => {
                let mut partitions = Vec::with_capacity(items.len());
                for item in items {
                    let Value::Object(object) = item else {
                        return Err(FieldError::Mismatch {
                            field: name.to_string(),
                            expected: "object",
                            found: item.category(),
                        });
                    };
                    let partition = downcast::<Partition>(&object).ok_or_else(|| {
                        FieldError::WrongObjectType {
                            field: name.to_string(),
                            expected: Partition::TYPE_NAME,
                            found: object.type_name(),
                        }
                    })?;
                    partitions.push(Rc::downgrade(&partition));
                }
                *self.partitions.borrow_mut() = partitions;
                Ok(())
            }
            (name, value) => self.core.restore(name, value),
        }
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl Reconstruct for Disk {
    const TYPE_NAME: &'static str = "storage.devices.Disk";
    const SCHEMA: &'static [storage_graph::FieldSpec] = device_schema![
        "model" => Scalar,
        "serial" => Scalar,
        "sector_size" => Size,
        "removable" => Scalar,
        "table_type" => Scalar,
        "partitions" => Sequence,
        "table_handle" => Opaque,
    ];

    fn from_fields(fields: FieldMap) -> Result<Rc<Self>, FieldError> {
        let table_type = match fields.opt_string("table_type")? {
            Some(raw) => Some(PartitionTableType::parse(&raw).ok_or_else(|| {
                FieldError::Invalid {
                    field: "table_type".to_string(),
                    reason: format!("unknown partition table type '{raw}'"),
                }
            })?),
            None => None,
        };
        let sector_size = fields
            .opt_size("sector_size")?
            .map_or(512, |size| size.bytes());

        let partitions = fields
            .objects_of::<Partition>("partitions", Partition::TYPE_NAME)?
            .iter()
            .map(Rc::downgrade)
            .collect();

        Ok(Rc::new(Self {
            core: DeviceCore::from_fields(&fields)?,
            model: fields.opt_string("model")?,
            serial: fields.opt_string("serial")?,
            sector_size,
            removable: fields.bool_or("removable", false)?,
            table_type,
            partitions: RefCell::new(partitions),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BlockDevice;

    #[test]
    fn table_types_parse_udisks_names() {
        assert_eq!(PartitionTableType::parse("mbr"), Some(PartitionTableType::Dos));
        assert_eq!(PartitionTableType::Gpt.as_str(), "gpt");
        assert_eq!(PartitionTableType::parse("aix"), None);
    }

    #[test]
    fn native_handle_is_reported_only_for_partitioned_disks() {
        let bare = Disk::new(DeviceCore::new("sda", "/dev/sda", Size::gib(1)));
        assert_eq!(bare.field("table_handle"), Value::Absent);

        let labelled = Disk::builder(DeviceCore::new("sdb", "/dev/sdb", Size::gib(1)))
            .with_table(PartitionTableType::Gpt)
            .shared();
        assert_eq!(
            labelled.field("table_handle"),
            Value::Unsupported(TABLE_HANDLE_TYPE.to_string())
        );
    }

    #[test]
    fn rejects_unknown_table_types() {
        let mut fields = FieldMap::new(Disk::TYPE_NAME);
        fields.insert("name", Value::from("sda"));
        fields.insert("path", Value::from("/dev/sda"));
        fields.insert("size", Value::Size(Size::gib(1)));
        fields.insert("table_type", Value::from("aix"));

        assert!(matches!(
            Disk::from_fields(fields),
            Err(FieldError::Invalid { .. })
        ));
    }

    #[test]
    fn partitions_can_be_restored_after_construction() {
        let disk = Disk::new(DeviceCore::new("sda", "/dev/sda", Size::gib(2)));
        let part = Partition::new(
            DeviceCore::new("sda1", "/dev/sda1", Size::gib(1))
                .with_parents(vec![BlockDevice::Disk(disk.clone())]),
            1,
        );
        assert!(disk.partitions().is_empty());

        disk.restore_field("partitions", Value::objects([part.clone() as storage_graph::ObjectRef]))
            .unwrap();
        assert!(Rc::ptr_eq(&disk.partitions()[0], &part));

        let stray = Disk::new(DeviceCore::new("sdb", "/dev/sdb", Size::gib(1)));
        assert!(matches!(
            disk.restore_field("partitions", Value::objects([stray as storage_graph::ObjectRef])),
            Err(FieldError::WrongObjectType { .. })
        ));
        assert!(matches!(
            disk.restore_field("model", Value::from("QEMU")),
            Err(FieldError::NotRestorable(_))
        ));
    }

    #[test]
    fn large_sector_sizes_survive_reconstruction() {
        let disk = Disk::builder(DeviceCore::new("sdz", "/dev/sdz", Size::gib(1)))
            .with_sector_size(u64::MAX)
            .shared();
        let value = disk.field("sector_size");
        assert_eq!(value, Value::Size(Size::from_bytes(u64::MAX)));

        let mut fields = FieldMap::new(Disk::TYPE_NAME);
        fields.insert("name", Value::from("sdz"));
        fields.insert("path", Value::from("/dev/sdz"));
        fields.insert("size", Value::Size(Size::gib(1)));
        fields.insert("sector_size", value);
        assert_eq!(Disk::from_fields(fields).unwrap().sector_size, u64::MAX);
    }
}
