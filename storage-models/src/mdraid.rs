// SPDX-License-Identifier: GPL-3.0-only

//! MD RAID arrays

use std::any::Any;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use storage_graph::{FieldError, FieldMap, FieldSpec, GraphObject, Reconstruct, Value};

use crate::device::{BlockDevice, DeviceCore, common_field, device_schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaidLevel {
    Raid0,
    Raid1,
    Raid4,
    Raid5,
    Raid6,
    Raid10,
    Linear,
}

impl RaidLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raid0 => "raid0",
            Self::Raid1 => "raid1",
            Self::Raid4 => "raid4",
            Self::Raid5 => "raid5",
            Self::Raid6 => "raid6",
            Self::Raid10 => "raid10",
            Self::Linear => "linear",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let level = match s.to_lowercase().as_str() {
            "raid0" | "0" | "stripe" => Self::Raid0,
            "raid1" | "1" | "mirror" => Self::Raid1,
            "raid4" | "4" => Self::Raid4,
            "raid5" | "5" => Self::Raid5,
            "raid6" | "6" => Self::Raid6,
            "raid10" | "10" => Self::Raid10,
            "linear" => Self::Linear,
            _ => return None,
        };
        Some(level)
    }

    /// Smallest number of active members the level accepts
    pub fn min_members(&self) -> u32 {
        match self {
            Self::Linear | Self::Raid0 => 1,
            Self::Raid1 => 2,
            Self::Raid4 | Self::Raid5 => 3,
            Self::Raid6 | Self::Raid10 => 4,
        }
    }
}

pub struct MdArray {
    pub core: DeviceCore,
    pub level: RaidLevel,
    /// Active members, spares excluded
    pub member_count: u32,
    pub spares: u32,
    /// Superblock format (e.g., "1.2")
    pub metadata_version: Option<String>,
}

impl MdArray {
    pub fn new(core: DeviceCore, level: RaidLevel, member_count: u32) -> Self {
        Self {
            core,
            level,
            member_count,
            spares: 0,
            metadata_version: None,
        }
    }

    pub fn with_spares(mut self, spares: u32) -> Self {
        self.spares = spares;
        self
    }

    pub fn with_metadata_version(mut self, version: impl Into<String>) -> Self {
        self.metadata_version = Some(version.into());
        self
    }

    pub fn shared(self) -> Rc<Self> {
        Rc::new(self)
    }

    pub fn members(&self) -> Vec<BlockDevice> {
        self.core.parents()
    }

    pub fn is_degraded(&self) -> bool {
        let present = u32::try_from(self.core.parents_ref().len()).unwrap_or(u32::MAX);
        present < self.member_count.saturating_add(self.spares)
            || self.member_count < self.level.min_members()
    }
}

impl GraphObject for MdArray {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn field(&self, name: &str) -> Value {
        match name {
            "level" => Value::from(self.level.as_str()),
            "member_count" => Value::Int(i64::from(self.member_count)),
            "spares" => Value::Int(i64::from(self.spares)),
            "metadata_version" => Value::from(self.metadata_version.clone()),
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

fn count(fields: &FieldMap, name: &str, default: u32) -> Result<u32, FieldError> {
    let Some(raw) = fields.opt_int(name)? else {
        return Ok(default);
    };
    u32::try_from(raw).map_err(|_| FieldError::Invalid {
        field: name.to_string(),
        reason: format!("count {raw} out of range"),
    })
}

impl Reconstruct for MdArray {
    const TYPE_NAME: &'static str = "storage.devices.MdArray";
    const SCHEMA: &'static [FieldSpec] = device_schema![
        "level" => Scalar,
        "member_count" => Scalar,
        "spares" => Scalar,
        "metadata_version" => Scalar,
    ];

    fn from_fields(fields: FieldMap) -> Result<Rc<Self>, FieldError> {
        let raw_level = fields.string("level")?;
        let level = RaidLevel::parse(&raw_level).ok_or_else(|| FieldError::Invalid {
            field: "level".to_string(),
            reason: format!("unknown RAID level '{raw_level}'"),
        })?;

        Ok(Rc::new(Self {
            core: DeviceCore::from_fields(&fields)?,
            level,
            member_count: count(&fields, "member_count", 0)?,
            spares: count(&fields, "spares", 0)?,
            metadata_version: fields.opt_string("metadata_version")?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::Disk;
    use storage_types::Size;

    #[test]
    fn levels_parse_mdadm_aliases() {
        assert_eq!(RaidLevel::parse("mirror"), Some(RaidLevel::Raid1));
        assert_eq!(RaidLevel::parse("RAID10"), Some(RaidLevel::Raid10));
        assert_eq!(RaidLevel::parse("raid7"), None);
    }

    #[test]
    fn missing_members_mark_the_array_degraded() {
        let sda = Disk::new(DeviceCore::new("sda", "/dev/sda", Size::gib(1)));
        let core = DeviceCore::new("md0", "/dev/md0", Size::gib(1))
            .with_parents(vec![BlockDevice::Disk(sda)]);
        let md = MdArray::new(core, RaidLevel::Raid1, 2);
        assert!(md.is_degraded());
        assert_eq!(md.members().len(), 1);
    }

    #[test]
    fn huge_spare_counts_do_not_overflow() {
        let core = DeviceCore::new("md1", "/dev/md1", Size::gib(1));
        let md = MdArray::new(core, RaidLevel::Raid1, u32::MAX).with_spares(u32::MAX);
        assert!(md.is_degraded());
    }
}
