//! Encryption types (LUKS)
//!
//! The passphrase of a LUKS format is held in memory only. It is deny-listed
//! for persistence: a dump records that a key existed, never the key itself.

use std::any::Any;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use storage_graph::{
    FieldError, FieldKind, FieldMap, FieldSpec, GraphObject, Placement, Reconstruct, Value,
};

use crate::format::opt_uuid;

/// Type name written in place of a withheld passphrase
pub const PASSPHRASE_TYPE: &str = "luks.Passphrase";

/// LUKS version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LuksVersion {
    /// LUKS version 1
    Luks1,

    /// LUKS version 2
    #[default]
    Luks2,
}

impl LuksVersion {
    /// Convert to cryptsetup string format
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Luks1 => "luks1",
            Self::Luks2 => "luks2",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "luks1" | "1" => Some(Self::Luks1),
            "luks2" | "2" => Some(Self::Luks2),
            _ => None,
        }
    }
}

/// LUKS encrypted container format
pub struct Luks {
    pub version: LuksVersion,

    /// Cipher algorithm (e.g., "aes-xts-plain64")
    pub cipher: String,

    /// Key size in bits
    pub key_size: u32,

    pub uuid: Option<String>,

    /// Mapper name (e.g. for /dev/mapper/name)
    pub map_name: Option<String>,

    passphrase: Option<String>,

    /// A passphrase existed when the format was dumped but was not persisted
    passphrase_withheld: bool,
}

impl Luks {
    pub fn new(cipher: impl Into<String>, key_size: u32) -> Self {
        Self {
            version: LuksVersion::default(),
            cipher: cipher.into(),
            key_size,
            uuid: None,
            map_name: None,
            passphrase: None,
            passphrase_withheld: false,
        }
    }

    pub fn with_version(mut self, version: LuksVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_map_name(mut self, map_name: impl Into<String>) -> Self {
        self.map_name = Some(map_name.into());
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn shared(self) -> Rc<Self> {
        Rc::new(self)
    }

    pub fn has_passphrase(&self) -> bool {
        self.passphrase.is_some()
    }

    /// The container had a key that must be supplied again before use
    pub fn needs_passphrase(&self) -> bool {
        self.passphrase.is_none() && self.passphrase_withheld
    }
}

impl GraphObject for Luks {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn field(&self, name: &str) -> Value {
        match name {
            "version" => Value::from(self.version.as_str()),
            "cipher" => Value::from(self.cipher.as_str()),
            "key_size" => Value::Int(i64::from(self.key_size)),
            "uuid" => Value::from(self.uuid.clone()),
            "map_name" => Value::from(self.map_name.clone()),
            "passphrase" if self.passphrase.is_some() || self.passphrase_withheld => {
                Value::Unsupported(PASSPHRASE_TYPE.to_string())
            }
            _ => Value::Absent,
        }
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl Reconstruct for Luks {
    const TYPE_NAME: &'static str = "storage.formats.Luks";
    const PLACEMENT: Placement = Placement::Shared;
    const SCHEMA: &'static [FieldSpec] = &[
        FieldSpec::new("version", FieldKind::Scalar),
        FieldSpec::new("cipher", FieldKind::Scalar),
        FieldSpec::new("key_size", FieldKind::Scalar),
        FieldSpec::new("uuid", FieldKind::Scalar),
        FieldSpec::new("map_name", FieldKind::Scalar),
        FieldSpec::new("passphrase", FieldKind::Opaque),
    ];

    fn from_fields(fields: FieldMap) -> Result<Rc<Self>, FieldError> {
        let version = match fields.opt_string("version")? {
            Some(raw) => LuksVersion::parse(&raw).ok_or_else(|| FieldError::Invalid {
                field: "version".to_string(),
                reason: format!("unknown LUKS version '{raw}'"),
            })?,
            None => LuksVersion::default(),
        };
        let key_size = fields.int("key_size")?;
        let key_size = u32::try_from(key_size).map_err(|_| FieldError::Invalid {
            field: "key_size".to_string(),
            reason: format!("key size {key_size} out of range"),
        })?;

        Ok(Rc::new(Self {
            version,
            cipher: fields.string("cipher")?,
            key_size,
            uuid: opt_uuid(&fields, "uuid")?,
            map_name: fields.opt_string("map_name")?,
            passphrase: None,
            passphrase_withheld: fields.is_unavailable("passphrase"),
        }))
    }
}
