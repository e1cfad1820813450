// SPDX-License-Identifier: GPL-3.0-only

//! Partitions
//!
//! A partition's parent is its disk. The disk also lists its partitions, which
//! makes disk and partition records reference each other; the partition side
//! of that link is restored after import.

use std::any::Any;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use storage_graph::{FieldError, FieldMap, GraphObject, Reconstruct, Value};
use storage_types::Size;

use crate::device::{BlockDevice, DeviceCore, common_field, device_schema};
use crate::disk::Disk;

/// MBR partition kind; GPT partitions are always primary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
    #[default]
    Primary,
    Extended,
    Logical,
}

impl PartitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Extended => "extended",
            Self::Logical => "logical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(Self::Primary),
            "extended" => Some(Self::Extended),
            "logical" => Some(Self::Logical),
            _ => None,
        }
    }
}

pub struct Partition {
    pub core: DeviceCore,

    /// Partition number (1-based)
    pub number: u32,

    /// Offset from start of disk
    pub start: Size,

    pub kind: PartitionKind,

    /// Partition name (GPT only)
    pub label: Option<String>,

    /// Flags set on the partition (e.g., "boot", "esp", "lvm", "raid")
    pub flags: Vec<String>,
}

impl Partition {
    pub fn new(core: DeviceCore, number: u32) -> Rc<Self> {
        Self::builder(core, number).shared()
    }

    pub fn builder(core: DeviceCore, number: u32) -> Self {
        Self {
            core,
            number,
            start: Size::ZERO,
            kind: PartitionKind::Primary,
            label: None,
            flags: Vec::new(),
        }
    }

    pub fn with_start(mut self, start: Size) -> Self {
        self.start = start;
        self
    }

    pub fn with_kind(mut self, kind: PartitionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.flags = flags;
        self
    }

    pub fn shared(self) -> Rc<Self> {
        Rc::new(self)
    }

    /// The disk this partition lives on
    pub fn disk(&self) -> Option<Rc<Disk>> {
        self.core
            .parents_ref()
            .iter()
            .find_map(|parent| match parent {
                BlockDevice::Disk(disk) => Some(disk.clone()),
                _ => None,
            })
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|set| set == flag)
    }

    /// Get a display name for this partition
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) if !label.is_empty() => label.clone(),
            _ => format!("Partition {}", self.number),
        }
    }
}

impl GraphObject for Partition {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn field(&self, name: &str) -> Value {
        match name {
            "number" => Value::Int(i64::from(self.number)),
            "start" => Value::Size(self.start),
            "kind" => Value::from(self.kind.as_str()),
            "label" => Value::from(self.label.clone()),
            "flags" => Value::strings(self.flags.iter().cloned()),
            _ => common_field(&self.core, name),
        }
    }

    fn restore_field(&self, name: &str, value: Value) -> Result<(), FieldError> {
        self.core.restore(name, value)
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl Reconstruct for Partition {
    const TYPE_NAME: &'static str = "storage.devices.Partition";
    const SCHEMA: &'static [storage_graph::FieldSpec] = device_schema![
        "number" => Scalar,
        "start" => Size,
        "kind" => Scalar,
        "label" => Scalar,
        "flags" => Sequence,
    ];

    fn from_fields(fields: FieldMap) -> Result<Rc<Self>, FieldError> {
        let number = fields.int("number")?;
        let number = u32::try_from(number).map_err(|_| FieldError::Invalid {
            field: "number".to_string(),
            reason: format!("partition number {number} out of range"),
        })?;

        let kind = match fields.opt_string("kind")? {
            Some(raw) => PartitionKind::parse(&raw).ok_or_else(|| FieldError::Invalid {
                field: "kind".to_string(),
                reason: format!("unknown partition kind '{raw}'"),
            })?,
            None => PartitionKind::default(),
        };

        Ok(Rc::new(Self {
            core: DeviceCore::from_fields(&fields)?,
            number,
            start: fields.opt_size("start")?.unwrap_or(Size::ZERO),
            kind,
            label: fields.opt_string("label")?,
            flags: fields.strings("flags")?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_label() {
        let core = DeviceCore::new("sda1", "/dev/sda1", Size::mib(512));
        let plain = Partition::builder(core, 1);
        assert_eq!(plain.display_name(), "Partition 1");

        let named = plain.with_label("EFI");
        assert_eq!(named.display_name(), "EFI");
    }

    #[test]
    fn parents_can_be_restored_after_construction() {
        let disk = Disk::new(DeviceCore::new("sda", "/dev/sda", Size::gib(2)));
        let part = Partition::new(DeviceCore::new("sda1", "/dev/sda1", Size::gib(1)), 1);
        assert!(part.disk().is_none());

        part.restore_field("parents", Value::objects([disk.clone() as storage_graph::ObjectRef]))
            .unwrap();
        assert!(Rc::ptr_eq(&part.disk().unwrap(), &disk));

        assert!(matches!(
            part.restore_field("number", Value::Int(2)),
            Err(FieldError::NotRestorable(_))
        ));
    }
}
