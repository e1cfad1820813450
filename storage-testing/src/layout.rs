//! Build device trees from lab specs
//!
//! Every generated UUID is derived from the spec name and the device it
//! belongs to, so building the same spec twice yields identical dumps.

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use storage_models::{
    BlockDevice, DeviceCore, DeviceTree, Disk, Filesystem, Format, LogicalVolume, Luks,
    LvmPhysicalVolume, MdArray, Partition, PvFreeInfo, RaidLevel, VolumeGroup,
};
use storage_types::{LVM_PE_SIZE, LVM_PE_START, Size, extent_count};
use uuid::Uuid;

use crate::errors::{Result, TestingError};
use crate::spec::{self, DiskSpec, FormatSpec, LabSpec, MdArraySpec, VolumeGroupSpec};

/// Deterministic UUID for `role` of `device` in `spec`
pub fn lab_uuid(spec: &LabSpec, device: &str, role: &str) -> String {
    let seed = format!("{}/{}/{}", spec.name, device, role);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes())
        .hyphenated()
        .to_string()
}

struct LayoutBuilder<'a> {
    spec: &'a LabSpec,
    tree: DeviceTree,
    by_name: HashMap<String, BlockDevice>,
    pvs: HashMap<String, Rc<LvmPhysicalVolume>>,
}

/// Build the device tree a spec describes, in canonical order.
pub fn build(spec: &LabSpec) -> Result<DeviceTree> {
    spec::validate(spec)?;

    let mut builder = LayoutBuilder {
        spec,
        tree: DeviceTree::new(),
        by_name: HashMap::new(),
        pvs: HashMap::new(),
    };

    for disk in &spec.disks {
        builder.disk(disk)?;
    }
    for md in &spec.md_arrays {
        builder.md_array(md)?;
    }
    for vg in &spec.volume_groups {
        builder.volume_group(vg)?;
    }

    let mut tree = builder.tree;
    tree.sort_canonical();
    tracing::debug!(spec = %spec.name, devices = tree.len(), "built lab layout");
    Ok(tree)
}

impl LayoutBuilder<'_> {
    fn invalid(&self, reason: String) -> TestingError {
        TestingError::SpecInvalid {
            spec_name: self.spec.name.clone(),
            reason,
        }
    }

    fn add(&mut self, device: BlockDevice) {
        self.by_name.insert(device.name().to_string(), device.clone());
        self.tree.add(device);
    }

    fn lookup(&self, owner: &str, name: &str) -> Result<BlockDevice> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| self.invalid(format!("'{owner}' refers to unknown device '{name}'")))
    }

    fn format(&mut self, device: &str, format: &FormatSpec) -> Format {
        let uuid = lab_uuid(self.spec, device, "format");
        match format {
            FormatSpec::Filesystem {
                fs_type,
                label,
                mountpoint,
                mount_options,
            } => {
                let mut fs = Filesystem::builder(fs_type.as_str()).with_uuid(uuid);
                if let Some(label) = label {
                    fs = fs.with_label(label.as_str());
                }
                if let Some(mountpoint) = mountpoint {
                    fs = fs.with_mountpoint(mountpoint.as_str());
                }
                if let Some(options) = mount_options {
                    fs = fs.with_mount_options(options.clone());
                }
                Format::Filesystem(fs.shared())
            }
            FormatSpec::Lvmpv { vg } => {
                let pv = LvmPhysicalVolume::builder(Some(vg.as_str()))
                    .with_uuid(uuid)
                    .with_vg_uuid(lab_uuid(self.spec, vg, "vg"))
                    .shared();
                self.pvs.insert(device.to_string(), pv.clone());
                Format::PhysicalVolume(pv)
            }
            FormatSpec::Luks {
                version,
                cipher,
                key_size,
                passphrase,
            } => {
                let mut luks = Luks::new(cipher.as_str(), *key_size)
                    .with_version(*version)
                    .with_map_name(format!("luks-{uuid}"))
                    .with_uuid(uuid);
                if let Some(passphrase) = passphrase {
                    luks = luks.with_passphrase(passphrase.as_str());
                }
                Format::Luks(luks.shared())
            }
        }
    }

    fn core(
        &mut self,
        name: &str,
        path: String,
        size: Size,
        format: Option<&FormatSpec>,
    ) -> DeviceCore {
        let mut core = DeviceCore::new(name, path, size);
        if let Some(format) = format {
            core = core.with_format(self.format(name, format));
        }
        core
    }

    fn disk(&mut self, spec: &DiskSpec) -> Result<()> {
        let size = spec::parse_size(self.spec, &spec.name, &spec.size)?;
        let core = self.core(
            &spec.name,
            format!("/dev/{}", spec.name),
            size,
            spec.format.as_ref(),
        );

        let mut disk = Disk::builder(core).removable(spec.removable);
        if let Some(model) = &spec.model {
            disk = disk.with_model(model.as_str());
        }
        if let Some(serial) = &spec.serial {
            disk = disk.with_serial(serial.as_str());
        }
        if let Some(table) = spec.partition_table {
            disk = disk.with_table(table);
        }
        let disk = disk.shared();
        self.add(BlockDevice::Disk(disk.clone()));

        let mut start = LVM_PE_START;
        for ((number, partition), name) in (1u32..)
            .zip(&spec.partitions)
            .zip(spec::partition_names(spec))
        {
            let part_size = spec::parse_size(self.spec, &name, &partition.size)?;
            let core = self
                .core(
                    &name,
                    format!("/dev/{name}"),
                    part_size,
                    partition.format.as_ref(),
                )
                .with_uuid(lab_uuid(self.spec, &name, "partition"))
                .with_parents(vec![BlockDevice::Disk(disk.clone())]);

            let mut part = Partition::builder(core, number)
                .with_start(start)
                .with_kind(partition.kind)
                .with_flags(partition.flags.clone());
            if let Some(label) = &partition.label {
                part = part.with_label(label.as_str());
            }
            let part = part.shared();
            disk.attach_partition(&part);
            self.add(BlockDevice::Partition(part));

            start = start.saturating_add(part_size);
        }

        Ok(())
    }

    fn md_array(&mut self, spec: &MdArraySpec) -> Result<()> {
        let members = spec
            .members
            .iter()
            .map(|member| self.lookup(&spec.name, member))
            .collect::<Result<Vec<_>>>()?;

        let active = members.len() as u32 - spec.spares;
        let smallest = members
            .iter()
            .map(|member| member.core().size.bytes())
            .min()
            .unwrap_or(0);
        let size = Size::from_bytes(array_capacity(spec.level, active, smallest));

        let core = self
            .core(
                &spec.name,
                format!("/dev/{}", spec.name),
                size,
                spec.format.as_ref(),
            )
            .with_uuid(lab_uuid(self.spec, &spec.name, "md"))
            .with_parents(members);

        let mut md = MdArray::new(core, spec.level, active).with_spares(spec.spares);
        if let Some(version) = &spec.metadata_version {
            md = md.with_metadata_version(version.as_str());
        }
        self.add(BlockDevice::MdArray(md.shared()));
        Ok(())
    }

    fn volume_group(&mut self, spec: &VolumeGroupSpec) -> Result<()> {
        let pe_size = match &spec.pe_size {
            Some(raw) => spec::parse_size(self.spec, &spec.name, raw)?,
            None => LVM_PE_SIZE,
        };

        let mut members = Vec::with_capacity(spec.members.len());
        let mut pvs = Vec::with_capacity(spec.members.len());
        let mut capacities = Vec::with_capacity(spec.members.len());
        for name in &spec.members {
            let device = self.lookup(&spec.name, name)?;
            let pv = self.pvs.get(name).cloned().ok_or_else(|| {
                self.invalid(format!("'{name}' carries no physical volume"))
            })?;
            let usable = device.core().size.saturating_sub(pv.pe_start);
            let extents = extent_count(usable, pe_size);
            capacities.push(Size::from_bytes(extents.saturating_mul(pe_size.bytes())));
            members.push(device);
            pvs.push(pv);
        }
        let total = capacities
            .iter()
            .fold(Size::ZERO, |total, capacity| total.saturating_add(*capacity));

        let mut lv_sizes = Vec::with_capacity(spec.logical_volumes.len());
        let mut demand = Size::ZERO;
        for lv in &spec.logical_volumes {
            let size = spec::parse_size(self.spec, &lv.name, &lv.size)?;
            demand = demand.saturating_add(Size::from_bytes(
                size.bytes().saturating_mul(u64::from(lv.copies)),
            ));
            lv_sizes.push(size);
        }
        if demand > total {
            return Err(self.invalid(format!(
                "logical volumes of '{}' need {} but the group holds {}",
                spec.name, demand, total
            )));
        }

        // Allocate from the first PV onwards
        let mut remaining = demand;
        let pv_free: Vec<_> = members
            .iter()
            .zip(&capacities)
            .map(|(device, capacity)| {
                let used = remaining.min(*capacity);
                remaining = remaining.saturating_sub(used);
                PvFreeInfo::new(device.clone(), *capacity, capacity.saturating_sub(used))
            })
            .collect();

        let core = DeviceCore::new(spec.name.as_str(), format!("/dev/{}", spec.name), total)
            .with_uuid(lab_uuid(self.spec, &spec.name, "vg"))
            .with_parents(members);
        let vg = VolumeGroup::new(core, pvs)
            .with_pe_size(pe_size)
            .with_pv_free(pv_free)
            .shared();
        self.add(BlockDevice::VolumeGroup(vg.clone()));

        for (lv, size) in spec.logical_volumes.iter().zip(lv_sizes) {
            let name = format!("{}-{}", spec.name, lv.name);
            let core = self
                .core(
                    &name,
                    format!("/dev/mapper/{name}"),
                    size,
                    lv.format.as_ref(),
                )
                .with_uuid(lab_uuid(self.spec, &name, "lv"))
                .with_parents(vec![BlockDevice::VolumeGroup(vg.clone())]);

            let mut volume =
                LogicalVolume::new(core).with_seg_type(lv.seg_type.as_str(), lv.copies);
            volume.tags = lv
                .tags
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<IndexMap<_, _>>();
            self.add(BlockDevice::LogicalVolume(volume.shared()));
        }

        Ok(())
    }
}

/// Usable size of an array with `active` members of `member` bytes each
fn array_capacity(level: RaidLevel, active: u32, member: u64) -> u64 {
    let active = u64::from(active);
    let data_members = match level {
        RaidLevel::Raid0 | RaidLevel::Linear => active,
        RaidLevel::Raid1 => 1,
        RaidLevel::Raid4 | RaidLevel::Raid5 => active.saturating_sub(1),
        RaidLevel::Raid6 => active.saturating_sub(2),
        RaidLevel::Raid10 => active / 2,
    };
    member.saturating_mul(data_members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::load_by_name;

    #[test]
    fn builds_partitions_onto_their_disk() {
        let spec = load_by_name("2disk").unwrap();
        let tree = build(&spec).unwrap();

        let Some(BlockDevice::Disk(sda)) = tree.get_by_name("sda") else {
            panic!("sda missing");
        };
        let partitions = sda.partitions();
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].core.name, "sda1");
        assert_eq!(partitions[0].start, LVM_PE_START);
        assert_eq!(
            partitions[1].start,
            LVM_PE_START.saturating_add(partitions[0].core.size)
        );
        assert!(Rc::ptr_eq(&partitions[1].disk().unwrap(), sda));
    }

    #[test]
    fn uuids_are_stable_across_builds() {
        let spec = load_by_name("lvm").unwrap();
        let first = build(&spec).unwrap();
        let second = build(&spec).unwrap();
        for (a, b) in first.devices().iter().zip(second.devices()) {
            assert_eq!(a.name(), b.name());
            assert_eq!(a.core().uuid, b.core().uuid);
        }
        assert_eq!(lab_uuid(&spec, "vg0", "vg"), lab_uuid(&spec, "vg0", "vg"));
        assert_ne!(lab_uuid(&spec, "vg0", "vg"), lab_uuid(&spec, "vg1", "vg"));
    }

    #[test]
    fn volume_group_tracks_free_space_per_pv() {
        let spec = load_by_name("lvm").unwrap();
        let tree = build(&spec).unwrap();

        let Some(BlockDevice::VolumeGroup(vg)) = tree.get_by_name("vg0") else {
            panic!("vg0 missing");
        };
        assert_eq!(vg.members.len(), 2);
        assert_eq!(vg.pv_free.len(), 2);
        let used: Size = vg
            .pv_free
            .iter()
            .fold(Size::ZERO, |total, info| total.saturating_add(info.used()));
        let lvs: Size = tree
            .children(&BlockDevice::VolumeGroup(vg.clone()))
            .iter()
            .filter_map(|device| match device {
                BlockDevice::LogicalVolume(lv) => Some(lv.vg_space_used()),
                _ => None,
            })
            .fold(Size::ZERO, |total, size| total.saturating_add(size));
        assert_eq!(used, lvs);
    }

    #[test]
    fn oversized_volume_groups_are_rejected() {
        let raw = r#"
            name = "tight"

            [[disks]]
            name = "vdb"
            size = "64 MiB"
            format = { type = "lvmpv", vg = "vg0" }

            [[volume_groups]]
            name = "vg0"
            members = ["vdb"]
            logical_volumes = [{ name = "big", size = "1 GiB" }]
        "#;
        let spec = spec::parse("tight", raw).unwrap();
        assert!(matches!(
            build(&spec),
            Err(TestingError::SpecInvalid { reason, .. }) if reason.contains("need")
        ));
    }

    #[test]
    fn raid_capacity_by_level() {
        assert_eq!(array_capacity(RaidLevel::Raid1, 2, 100), 100);
        assert_eq!(array_capacity(RaidLevel::Raid5, 4, 100), 300);
        assert_eq!(array_capacity(RaidLevel::Raid10, 4, 100), 200);
        assert_eq!(array_capacity(RaidLevel::Linear, 3, 100), 300);
    }
}
