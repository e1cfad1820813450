use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use storage_models::{LuksVersion, PartitionKind, PartitionTableType, RaidLevel};
use storage_types::Size;

use crate::errors::{Result, TestingError};

/// A storage layout described in TOML, built into a device tree by
/// [`crate::layout::build`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub disks: Vec<DiskSpec>,
    #[serde(default)]
    pub volume_groups: Vec<VolumeGroupSpec>,
    #[serde(default)]
    pub md_arrays: Vec<MdArraySpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskSpec {
    pub name: String,
    pub size: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub removable: bool,
    #[serde(default)]
    pub partition_table: Option<PartitionTableType>,
    #[serde(default)]
    pub partitions: Vec<PartitionSpec>,
    /// Format on the whole disk; only valid without a partition table
    #[serde(default)]
    pub format: Option<FormatSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub size: String,
    #[serde(default)]
    pub kind: PartitionKind,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub format: Option<FormatSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FormatSpec {
    Filesystem {
        fs_type: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        mountpoint: Option<String>,
        #[serde(default)]
        mount_options: Option<Vec<String>>,
    },
    Lvmpv {
        vg: String,
    },
    Luks {
        #[serde(default)]
        version: LuksVersion,
        #[serde(default = "default_cipher")]
        cipher: String,
        #[serde(default = "default_key_size")]
        key_size: u32,
        #[serde(default)]
        passphrase: Option<String>,
    },
}

fn default_cipher() -> String {
    "aes-xts-plain64".to_string()
}

fn default_key_size() -> u32 {
    512
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeGroupSpec {
    pub name: String,
    #[serde(default)]
    pub pe_size: Option<String>,
    /// Names of devices carrying an `lvmpv` format for this group
    pub members: Vec<String>,
    #[serde(default)]
    pub logical_volumes: Vec<LogicalVolumeSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalVolumeSpec {
    pub name: String,
    pub size: String,
    #[serde(default = "default_seg_type")]
    pub seg_type: String,
    #[serde(default = "default_copies")]
    pub copies: u32,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub format: Option<FormatSpec>,
}

fn default_seg_type() -> String {
    "linear".to_string()
}

fn default_copies() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdArraySpec {
    pub name: String,
    pub level: RaidLevel,
    pub members: Vec<String>,
    #[serde(default)]
    pub spares: u32,
    #[serde(default)]
    pub metadata_version: Option<String>,
    #[serde(default)]
    pub format: Option<FormatSpec>,
}

pub fn workspace_root() -> PathBuf {
    if let Ok(value) = std::env::var("STORAGE_TESTING_WORKSPACE_ROOT") {
        return PathBuf::from(value);
    }

    if let Ok(current_dir) = std::env::current_dir()
        && current_dir.join("resources/lab-specs").exists()
    {
        return current_dir;
    }

    let manifest_root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    if manifest_root.join("resources/lab-specs").exists() {
        return manifest_root;
    }

    PathBuf::from(".")
}

pub fn specs_root() -> PathBuf {
    workspace_root().join("resources/lab-specs")
}

pub fn spec_path_for_name(spec_name: &str) -> PathBuf {
    specs_root().join(format!("{}.toml", spec_name))
}

pub fn load_by_name(spec_name: &str) -> Result<LabSpec> {
    let path = spec_path_for_name(spec_name);
    if !path.exists() {
        return Err(TestingError::SpecNotFound {
            spec_name: spec_name.to_string(),
        });
    }
    load_path(&path)
}

/// Load a spec from an explicit file.
pub fn load_path(path: &Path) -> Result<LabSpec> {
    let spec_name = path.display().to_string();
    let raw = fs::read_to_string(path).map_err(|error| TestingError::SpecInvalid {
        spec_name: spec_name.clone(),
        reason: error.to_string(),
    })?;
    parse(&spec_name, &raw)
}

/// Load a spec given either a bundled name ("2disk") or a path to a TOML file.
pub fn load(name_or_path: &str) -> Result<LabSpec> {
    let path = Path::new(name_or_path);
    if path.extension().is_some_and(|ext| ext == "toml") || path.is_file() {
        return load_path(path);
    }
    load_by_name(name_or_path)
}

pub fn parse(spec_name: &str, raw: &str) -> Result<LabSpec> {
    let spec: LabSpec = toml::from_str(raw).map_err(|error| TestingError::SpecInvalid {
        spec_name: spec_name.to_string(),
        reason: error.to_string(),
    })?;

    validate(&spec)?;
    Ok(spec)
}

/// Parse a size field of a lab spec.
pub fn parse_size(spec: &LabSpec, field: &str, raw: &str) -> Result<Size> {
    raw.parse::<Size>().map_err(|error| TestingError::SpecInvalid {
        spec_name: spec.name.clone(),
        reason: format!("{field}: {error}"),
    })
}

fn claim(spec: &LabSpec, names: &mut HashSet<String>, name: &str) -> Result<()> {
    if !names.insert(name.to_string()) {
        return Err(invalid(spec, format!("device name '{name}' is used twice")));
    }
    Ok(())
}

fn note_pv(pv_devices: &mut Vec<(String, String)>, device: &str, format: &Option<FormatSpec>) {
    if let Some(FormatSpec::Lvmpv { vg }) = format {
        pv_devices.push((device.to_string(), vg.clone()));
    }
}

fn invalid(spec: &LabSpec, reason: impl Into<String>) -> TestingError {
    TestingError::SpecInvalid {
        spec_name: spec.name.clone(),
        reason: reason.into(),
    }
}

/// Names of partitions of `disk`, in table order
pub fn partition_names(disk: &DiskSpec) -> Vec<String> {
    let separator = if disk.name.ends_with(|c: char| c.is_ascii_digit()) {
        "p"
    } else {
        ""
    };
    (1..=disk.partitions.len())
        .map(|number| format!("{}{}{}", disk.name, separator, number))
        .collect()
}

pub fn validate(spec: &LabSpec) -> Result<()> {
    if spec.name.is_empty() {
        return Err(TestingError::SpecInvalid {
            spec_name: "<unknown>".to_string(),
            reason: "name must not be empty".to_string(),
        });
    }

    if spec.disks.is_empty() {
        return Err(invalid(spec, "disks must not be empty"));
    }

    let mut names = HashSet::new();
    // Devices carrying an lvmpv format, with the group they are for
    let mut pv_devices: Vec<(String, String)> = Vec::new();

    for disk in &spec.disks {
        claim(spec, &mut names, &disk.name)?;
        let size = parse_size(spec, &format!("disks.{}.size", disk.name), &disk.size)?;

        match disk.partition_table {
            Some(table) => {
                if disk.format.is_some() {
                    return Err(invalid(
                        spec,
                        format!("disk '{}' has both a partition table and a format", disk.name),
                    ));
                }
                if disk.partitions.len() as u32 > table.max_partitions() {
                    return Err(invalid(
                        spec,
                        format!(
                            "disk '{}' holds at most {} {} partitions",
                            disk.name,
                            table.max_partitions(),
                            table.as_str()
                        ),
                    ));
                }
            }
            None if !disk.partitions.is_empty() => {
                return Err(invalid(
                    spec,
                    format!("disk '{}' lists partitions but has no partition table", disk.name),
                ));
            }
            None => {}
        }

        let mut used = storage_types::LVM_PE_START;
        for (partition, name) in disk.partitions.iter().zip(partition_names(disk)) {
            claim(spec, &mut names, &name)?;
            let part_size = parse_size(spec, &format!("{name}.size"), &partition.size)?;
            used = used.saturating_add(part_size);
            note_pv(&mut pv_devices, &name, &partition.format);
        }
        if used > size {
            return Err(invalid(
                spec,
                format!("partitions of '{}' do not fit on the disk", disk.name),
            ));
        }
        note_pv(&mut pv_devices, &disk.name, &disk.format);
    }

    for md in &spec.md_arrays {
        claim(spec, &mut names, &md.name)?;
        if (md.members.len() as u32) < md.level.min_members() + md.spares {
            return Err(invalid(
                spec,
                format!(
                    "array '{}' needs {} members plus {} spares",
                    md.name,
                    md.level.min_members(),
                    md.spares
                ),
            ));
        }
        for member in &md.members {
            if !names.contains(member) {
                return Err(invalid(
                    spec,
                    format!("array '{}' member '{member}' is not defined before it", md.name),
                ));
            }
        }
        note_pv(&mut pv_devices, &md.name, &md.format);
    }

    for vg in &spec.volume_groups {
        claim(spec, &mut names, &vg.name)?;
        if vg.members.is_empty() {
            return Err(invalid(spec, format!("volume group '{}' has no members", vg.name)));
        }
        if let Some(pe_size) = &vg.pe_size {
            parse_size(spec, &format!("{}.pe_size", vg.name), pe_size)?;
        }
        for member in &vg.members {
            let belongs = pv_devices
                .iter()
                .any(|(device, group)| device == member && *group == vg.name);
            if !belongs {
                return Err(invalid(
                    spec,
                    format!(
                        "volume group '{}' member '{member}' has no lvmpv format for it",
                        vg.name
                    ),
                ));
            }
        }
        for lv in &vg.logical_volumes {
            claim(spec, &mut names, &format!("{}-{}", vg.name, lv.name))?;
            parse_size(spec, &format!("{}.size", lv.name), &lv.size)?;
            if lv.copies == 0 {
                return Err(invalid(spec, format!("logical volume '{}' has zero copies", lv.name)));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_spec_name_without_extension() {
        let spec = load_by_name("2disk").unwrap();
        assert_eq!(spec.name, "2disk");
    }

    #[test]
    fn missing_specs_are_reported_by_name() {
        assert!(matches!(
            load_by_name("no-such-layout"),
            Err(TestingError::SpecNotFound { spec_name }) if spec_name == "no-such-layout"
        ));
    }

    #[test]
    fn partition_names_follow_kernel_convention() {
        let disk = |name: &str| DiskSpec {
            name: name.to_string(),
            size: "1 GiB".to_string(),
            model: None,
            serial: None,
            removable: false,
            partition_table: Some(PartitionTableType::Gpt),
            partitions: vec![
                PartitionSpec {
                    size: "100 MiB".to_string(),
                    kind: PartitionKind::Primary,
                    label: None,
                    flags: Vec::new(),
                    format: None,
                };
                2
            ],
            format: None,
        };
        assert_eq!(partition_names(&disk("sda")), ["sda1", "sda2"]);
        assert_eq!(partition_names(&disk("nvme0n1")), ["nvme0n1p1", "nvme0n1p2"]);
    }

    #[test]
    fn rejects_members_without_pv_format() {
        let raw = r#"
            name = "broken"

            [[disks]]
            name = "sda"
            size = "1 GiB"
            format = { type = "filesystem", fs_type = "ext4" }

            [[volume_groups]]
            name = "vg0"
            members = ["sda"]
        "#;
        let error = parse("broken", raw).unwrap_err();
        assert!(error.to_string().contains("no lvmpv format"), "{error}");
    }

    #[test]
    fn rejects_partitions_that_overflow_the_disk() {
        let raw = r#"
            name = "overflow"

            [[disks]]
            name = "sda"
            size = "1 GiB"
            partition_table = "gpt"
            partitions = [{ size = "1 GiB" }]
        "#;
        assert!(matches!(
            parse("overflow", raw),
            Err(TestingError::SpecInvalid { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_device_names() {
        let raw = r#"
            name = "dup"

            [[disks]]
            name = "sda"
            size = "1 GiB"

            [[disks]]
            name = "sda"
            size = "1 GiB"
        "#;
        let error = parse("dup", raw).unwrap_err();
        assert!(error.to_string().contains("used twice"));
    }
}
