// SPDX-License-Identifier: GPL-3.0-only

//! LVM volume groups and logical volumes

use std::any::Any;
use std::rc::Rc;

use indexmap::IndexMap;
use storage_graph::{
    FieldError, FieldKind, FieldMap, FieldSpec, GraphObject, ObjectRef, Reconstruct, Value,
};
use storage_types::{LVM_PE_SIZE, Size, extent_count};

use crate::device::{BlockDevice, DeviceCore, common_field, device_schema, opt_block_device};
use crate::format::LvmPhysicalVolume;

/// Free space left on one physical volume of a volume group
pub struct PvFreeInfo {
    /// Device carrying the physical volume
    pub pv: Option<BlockDevice>,
    pub size: Size,
    pub free: Size,
}

impl PvFreeInfo {
    pub fn new(pv: BlockDevice, size: Size, free: Size) -> Rc<Self> {
        Rc::new(Self {
            pv: Some(pv),
            size,
            free,
        })
    }

    pub fn used(&self) -> Size {
        self.size.saturating_sub(self.free)
    }
}

impl GraphObject for PvFreeInfo {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn field(&self, name: &str) -> Value {
        match name {
            "pv" => self
                .pv
                .as_ref()
                .map_or(Value::Absent, |pv| Value::Object(pv.object())),
            "size" => Value::Size(self.size),
            "free" => Value::Size(self.free),
            _ => Value::Absent,
        }
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl Reconstruct for PvFreeInfo {
    const TYPE_NAME: &'static str = "storage.devices.PvFreeInfo";
    const SCHEMA: &'static [FieldSpec] = &[
        FieldSpec::new("pv", FieldKind::Reference),
        FieldSpec::new("size", FieldKind::Size),
        FieldSpec::new("free", FieldKind::Size),
    ];

    fn from_fields(fields: FieldMap) -> Result<Rc<Self>, FieldError> {
        Ok(Rc::new(Self {
            pv: opt_block_device(&fields, "pv")?,
            size: fields.size("size")?,
            free: fields.size("free")?,
        }))
    }
}

pub struct VolumeGroup {
    pub core: DeviceCore,

    /// Physical extent size
    pub pe_size: Size,

    /// Physical volume formats of the member devices
    pub members: Vec<Rc<LvmPhysicalVolume>>,

    /// Per-PV free space, as last reported by LVM
    pub pv_free: Vec<Rc<PvFreeInfo>>,
}

impl VolumeGroup {
    pub fn new(core: DeviceCore, members: Vec<Rc<LvmPhysicalVolume>>) -> Self {
        Self {
            core,
            pe_size: LVM_PE_SIZE,
            members,
            pv_free: Vec::new(),
        }
    }

    pub fn with_pe_size(mut self, pe_size: Size) -> Self {
        self.pe_size = pe_size;
        self
    }

    pub fn with_pv_free(mut self, pv_free: Vec<Rc<PvFreeInfo>>) -> Self {
        self.pv_free = pv_free;
        self
    }

    pub fn shared(self) -> Rc<Self> {
        Rc::new(self)
    }

    pub fn free_space(&self) -> Size {
        self.pv_free
            .iter()
            .fold(Size::ZERO, |total, info| total.saturating_add(info.free))
    }

    pub fn extents(&self) -> u64 {
        extent_count(self.core.size, self.pe_size)
    }

    pub fn free_extents(&self) -> u64 {
        extent_count(self.free_space(), self.pe_size)
    }
}

impl GraphObject for VolumeGroup {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn field(&self, name: &str) -> Value {
        match name {
            "pe_size" => Value::Size(self.pe_size),
            "members" => Value::objects(
                self.members
                    .iter()
                    .map(|member| member.clone() as ObjectRef),
            ),
            "pv_free" => Value::objects(self.pv_free.iter().map(|info| info.clone() as ObjectRef)),
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

impl Reconstruct for VolumeGroup {
    const TYPE_NAME: &'static str = "storage.devices.VolumeGroup";
    const SCHEMA: &'static [FieldSpec] = device_schema![
        "pe_size" => Size,
        "members" => Sequence,
        "pv_free" => Sequence,
    ];

    fn from_fields(fields: FieldMap) -> Result<Rc<Self>, FieldError> {
        Ok(Rc::new(Self {
            core: DeviceCore::from_fields(&fields)?,
            pe_size: fields.opt_size("pe_size")?.unwrap_or(LVM_PE_SIZE),
            members: fields
                .objects_of::<LvmPhysicalVolume>("members", LvmPhysicalVolume::TYPE_NAME)?,
            pv_free: fields.objects_of::<PvFreeInfo>("pv_free", PvFreeInfo::TYPE_NAME)?,
        }))
    }
}

pub struct LogicalVolume {
    pub core: DeviceCore,

    /// Segment type (e.g., "linear", "striped", "raid1", "thin-pool")
    pub seg_type: String,

    /// Number of data copies (1 for linear)
    pub copies: u32,

    pub tags: IndexMap<String, String>,
}

impl LogicalVolume {
    pub fn new(core: DeviceCore) -> Self {
        Self {
            core,
            seg_type: "linear".to_string(),
            copies: 1,
            tags: IndexMap::new(),
        }
    }

    pub fn with_seg_type(mut self, seg_type: impl Into<String>, copies: u32) -> Self {
        self.seg_type = seg_type.into();
        self.copies = copies;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn shared(self) -> Rc<Self> {
        Rc::new(self)
    }

    /// Volume group the LV is carved from
    pub fn vg(&self) -> Option<Rc<VolumeGroup>> {
        self.core
            .parents_ref()
            .iter()
            .find_map(|parent| match parent {
                BlockDevice::VolumeGroup(vg) => Some(vg.clone()),
                _ => None,
            })
    }

    /// Space consumed in the volume group, counting every copy
    pub fn vg_space_used(&self) -> Size {
        Size::from_bytes(self.core.size.bytes().saturating_mul(u64::from(self.copies)))
    }
}

impl GraphObject for LogicalVolume {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn field(&self, name: &str) -> Value {
        match name {
            "seg_type" => Value::from(self.seg_type.as_str()),
            "copies" => Value::Int(i64::from(self.copies)),
            "tags" => Value::Map(
                self.tags
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::from(value.as_str())))
                    .collect(),
            ),
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

impl Reconstruct for LogicalVolume {
    const TYPE_NAME: &'static str = "storage.devices.LogicalVolume";
    const SCHEMA: &'static [FieldSpec] = device_schema![
        "seg_type" => Scalar,
        "copies" => Scalar,
        "tags" => Mapping,
    ];

    fn from_fields(fields: FieldMap) -> Result<Rc<Self>, FieldError> {
        let copies = fields.opt_int("copies")?.unwrap_or(1);
        let copies = u32::try_from(copies)
            .ok()
            .filter(|copies| *copies > 0)
            .ok_or_else(|| FieldError::Invalid {
                field: "copies".to_string(),
                reason: format!("copy count {copies} out of range"),
            })?;

        Ok(Rc::new(Self {
            core: DeviceCore::from_fields(&fields)?,
            seg_type: fields
                .opt_string("seg_type")?
                .unwrap_or_else(|| "linear".to_string()),
            copies,
            tags: fields.string_map("tags")?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::Disk;

    #[test]
    fn free_space_sums_member_entries() {
        let sda = BlockDevice::Disk(Disk::new(DeviceCore::new("sda", "/dev/sda", Size::gib(1))));
        let sdb = BlockDevice::Disk(Disk::new(DeviceCore::new("sdb", "/dev/sdb", Size::gib(1))));
        let vg = VolumeGroup::new(
            DeviceCore::new("vg0", "/dev/vg0", Size::gib(2)),
            vec![LvmPhysicalVolume::new(Some("vg0")), LvmPhysicalVolume::new(Some("vg0"))],
        )
        .with_pv_free(vec![
            PvFreeInfo::new(sda, Size::gib(1), Size::mib(256)),
            PvFreeInfo::new(sdb, Size::gib(1), Size::mib(768)),
        ]);

        assert_eq!(vg.free_space(), Size::gib(1));
        assert_eq!(vg.free_extents(), 256);
        assert_eq!(vg.extents(), 512);
        assert_eq!(vg.pv_free[0].used(), Size::mib(768));
    }

    #[test]
    fn mirrored_volumes_use_space_per_copy() {
        let lv = LogicalVolume::new(DeviceCore::new("vg0-data", "/dev/mapper/vg0-data", Size::gib(3)))
            .with_seg_type("raid1", 2)
            .with_tag("role", "data");
        assert_eq!(lv.vg_space_used(), Size::gib(6));
        assert!(lv.vg().is_none());
        assert!(matches!(lv.field("tags"), Value::Map(ref tags) if tags.len() == 1));
    }

    #[test]
    fn zero_copies_are_rejected() {
        let mut fields = FieldMap::new(LogicalVolume::TYPE_NAME);
        fields.insert("name", Value::from("vg0-lv"));
        fields.insert("path", Value::from("/dev/mapper/vg0-lv"));
        fields.insert("size", Value::Size(Size::gib(1)));
        fields.insert("copies", Value::Int(0));
        assert!(matches!(
            LogicalVolume::from_fields(fields),
            Err(FieldError::Invalid { .. })
        ));
    }
}
