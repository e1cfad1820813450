// SPDX-License-Identifier: GPL-3.0-only

//! Formats - what a device holds
//!
//! Formats are stored in their own document segment and may be shared by
//! several records (a volume group lists the physical volume formats of its
//! member devices).

use std::any::Any;
use std::rc::Rc;

use storage_graph::{
    FieldError, FieldKind, FieldMap, FieldSpec, GraphObject, ObjectRef, Placement, Reconstruct,
    Value, downcast,
};
use storage_types::{LVM_PE_START, Size};

use crate::encryption::Luks;

#[derive(Clone)]
pub enum Format {
    Filesystem(Rc<Filesystem>),
    PhysicalVolume(Rc<LvmPhysicalVolume>),
    Luks(Rc<Luks>),
}

impl Format {
    pub fn object(&self) -> ObjectRef {
        match self {
            Format::Filesystem(format) => format.clone(),
            Format::PhysicalVolume(format) => format.clone(),
            Format::Luks(format) => format.clone(),
        }
    }

    pub fn from_object(object: &ObjectRef) -> Option<Self> {
        if let Some(format) = downcast::<Filesystem>(object) {
            return Some(Format::Filesystem(format));
        }
        if let Some(format) = downcast::<LvmPhysicalVolume>(object) {
            return Some(Format::PhysicalVolume(format));
        }
        downcast::<Luks>(object).map(Format::Luks)
    }

    /// Format identifier as blkid reports it (e.g., "ext4", "LVM2_member")
    pub fn id_type(&self) -> &str {
        match self {
            Format::Filesystem(format) => &format.fs_type,
            Format::PhysicalVolume(_) => "LVM2_member",
            Format::Luks(_) => "crypto_LUKS",
        }
    }
}

/// Checked UUID field; the persisted text must parse as a UUID.
pub(crate) fn opt_uuid(fields: &FieldMap, name: &str) -> Result<Option<String>, FieldError> {
    let Some(raw) = fields.opt_string(name)? else {
        return Ok(None);
    };
    uuid::Uuid::parse_str(&raw)
        .map(|parsed| Some(parsed.hyphenated().to_string()))
        .map_err(|error| FieldError::Invalid {
            field: name.to_string(),
            reason: error.to_string(),
        })
}

/// Mountable filesystem
pub struct Filesystem {
    /// Filesystem type (e.g., "ext4", "xfs", "vfat", "swap")
    pub fs_type: String,

    pub label: Option<String>,

    pub uuid: Option<String>,

    pub mountpoint: Option<String>,

    /// Mount options, `None` when defaults apply
    pub mount_options: Option<Vec<String>>,

    pub exists: bool,
}

impl Filesystem {
    pub fn new(fs_type: impl Into<String>) -> Rc<Self> {
        Self::builder(fs_type).shared()
    }

    pub fn builder(fs_type: impl Into<String>) -> Self {
        Self {
            fs_type: fs_type.into(),
            label: None,
            uuid: None,
            mountpoint: None,
            mount_options: None,
            exists: true,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_mountpoint(mut self, mountpoint: impl Into<String>) -> Self {
        self.mountpoint = Some(mountpoint.into());
        self
    }

    pub fn with_mount_options(mut self, options: Vec<String>) -> Self {
        self.mount_options = Some(options);
        self
    }

    pub fn shared(self) -> Rc<Self> {
        Rc::new(self)
    }

    pub fn is_swap(&self) -> bool {
        self.fs_type == "swap"
    }
}

impl GraphObject for Filesystem {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn field(&self, name: &str) -> Value {
        match name {
            "fs_type" => Value::from(self.fs_type.as_str()),
            "label" => Value::from(self.label.clone()),
            "uuid" => Value::from(self.uuid.clone()),
            "mountpoint" => Value::from(self.mountpoint.clone()),
            "mount_options" => self
                .mount_options
                .as_ref()
                .map_or(Value::Absent, |options| Value::strings(options.iter().cloned())),
            "exists" => Value::Bool(self.exists),
            _ => Value::Absent,
        }
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl Reconstruct for Filesystem {
    const TYPE_NAME: &'static str = "storage.formats.Filesystem";
    const PLACEMENT: Placement = Placement::Shared;
    const SCHEMA: &'static [FieldSpec] = &[
        FieldSpec::new("fs_type", FieldKind::Scalar),
        FieldSpec::new("label", FieldKind::Scalar),
        FieldSpec::new("uuid", FieldKind::Scalar),
        FieldSpec::new("mountpoint", FieldKind::Scalar),
        FieldSpec::new("mount_options", FieldKind::Sequence),
        FieldSpec::new("exists", FieldKind::Scalar),
    ];

    fn from_fields(fields: FieldMap) -> Result<Rc<Self>, FieldError> {
        let mount_options = match fields.get("mount_options") {
            Some(Value::List(_)) => Some(fields.strings("mount_options")?),
            _ => None,
        };

        Ok(Rc::new(Self {
            fs_type: fields.string("fs_type")?,
            label: fields.opt_string("label")?,
            uuid: opt_uuid(&fields, "uuid")?,
            mountpoint: fields.opt_string("mountpoint")?,
            mount_options,
            exists: fields.bool_or("exists", true)?,
        }))
    }
}

/// LVM physical volume metadata on a device
pub struct LvmPhysicalVolume {
    pub uuid: Option<String>,

    /// Volume group the PV belongs to, if any
    pub vg_name: Option<String>,

    pub vg_uuid: Option<String>,

    /// Offset of the first physical extent
    pub pe_start: Size,

    pub data_alignment: Size,

    pub exists: bool,
}

impl LvmPhysicalVolume {
    pub fn new(vg_name: Option<&str>) -> Rc<Self> {
        Self::builder(vg_name).shared()
    }

    pub fn builder(vg_name: Option<&str>) -> Self {
        Self {
            uuid: None,
            vg_name: vg_name.map(str::to_string),
            vg_uuid: None,
            pe_start: LVM_PE_START,
            data_alignment: Size::ZERO,
            exists: true,
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_vg_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.vg_uuid = Some(uuid.into());
        self
    }

    pub fn shared(self) -> Rc<Self> {
        Rc::new(self)
    }

    pub fn is_orphan(&self) -> bool {
        self.vg_name.is_none()
    }
}

impl GraphObject for LvmPhysicalVolume {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn field(&self, name: &str) -> Value {
        match name {
            "uuid" => Value::from(self.uuid.clone()),
            "vg_name" => Value::from(self.vg_name.clone()),
            "vg_uuid" => Value::from(self.vg_uuid.clone()),
            "pe_start" => Value::Size(self.pe_start),
            "data_alignment" => Value::Size(self.data_alignment),
            "exists" => Value::Bool(self.exists),
            _ => Value::Absent,
        }
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl Reconstruct for LvmPhysicalVolume {
    const TYPE_NAME: &'static str = "storage.formats.LvmPhysicalVolume";
    const PLACEMENT: Placement = Placement::Shared;
    const SCHEMA: &'static [FieldSpec] = &[
        FieldSpec::new("uuid", FieldKind::Scalar),
        FieldSpec::new("vg_name", FieldKind::Scalar),
        FieldSpec::new("vg_uuid", FieldKind::Scalar),
        FieldSpec::new("pe_start", FieldKind::Size),
        FieldSpec::new("data_alignment", FieldKind::Size),
        FieldSpec::new("exists", FieldKind::Scalar),
    ];

    fn from_fields(fields: FieldMap) -> Result<Rc<Self>, FieldError> {
        Ok(Rc::new(Self {
            uuid: opt_uuid(&fields, "uuid")?,
            vg_name: fields.opt_string("vg_name")?,
            vg_uuid: opt_uuid(&fields, "vg_uuid")?,
            pe_start: fields.opt_size("pe_start")?.unwrap_or(LVM_PE_START),
            data_alignment: fields.opt_size("data_alignment")?.unwrap_or(Size::ZERO),
            exists: fields.bool_or("exists", true)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_objects_round_trip_through_downcast() {
        let fs = Format::Filesystem(Filesystem::new("xfs"));
        let recovered = Format::from_object(&fs.object()).expect("filesystem");
        assert_eq!(recovered.id_type(), "xfs");

        let pv = Format::PhysicalVolume(LvmPhysicalVolume::new(Some("vg0")));
        assert_eq!(Format::from_object(&pv.object()).unwrap().id_type(), "LVM2_member");
    }

    #[test]
    fn absent_mount_options_differ_from_empty() {
        let defaults = Filesystem::new("ext4");
        assert_eq!(defaults.field("mount_options"), Value::Absent);

        let none = Filesystem::builder("ext4").with_mount_options(Vec::new()).shared();
        assert_eq!(none.field("mount_options"), Value::List(Vec::new()));
    }

    #[test]
    fn invalid_uuids_are_rejected() {
        let mut fields = FieldMap::new(LvmPhysicalVolume::TYPE_NAME);
        fields.insert("uuid", Value::from("not-a-uuid"));
        assert!(matches!(
            LvmPhysicalVolume::from_fields(fields),
            Err(FieldError::Invalid { .. })
        ));
    }
}
