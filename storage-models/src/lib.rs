// SPDX-License-Identifier: GPL-3.0-only

//! Storage device models
//!
//! Disks, partitions, LVM, MD RAID and the formats they carry, expressed as
//! persistable object-graph types. [`register_types`] makes all of them known
//! to a [`storage_graph::TypeRegistry`]; a [`DeviceTree`] collects the devices
//! an import produces.

pub mod device;
pub mod disk;
pub mod encryption;
pub mod format;
pub mod lvm;
pub mod mdraid;
pub mod partition;
pub mod tree;

pub use device::{BlockDevice, DeviceCore};
pub use disk::{Disk, PartitionTableType};
pub use encryption::{Luks, LuksVersion};
pub use format::{Filesystem, Format, LvmPhysicalVolume};
pub use lvm::{LogicalVolume, PvFreeInfo, VolumeGroup};
pub use mdraid::{MdArray, RaidLevel};
pub use partition::{Partition, PartitionKind};
pub use tree::{DeviceTree, dump_file_name};

use storage_graph::{RegistryError, TypeRegistry};

/// Register every device and format type.
pub fn register_types(registry: &mut TypeRegistry) -> Result<(), RegistryError> {
    registry.register::<Disk>()?;
    registry.register::<Partition>()?;
    registry.register::<VolumeGroup>()?;
    registry.register::<LogicalVolume>()?;
    registry.register::<MdArray>()?;
    registry.register::<PvFreeInfo>()?;
    registry.register::<Filesystem>()?;
    registry.register::<LvmPhysicalVolume>()?;
    registry.register::<Luks>()?;
    Ok(())
}

/// A registry holding exactly the storage model types.
pub fn registry() -> Result<TypeRegistry, RegistryError> {
    let mut registry = TypeRegistry::new();
    register_types(&mut registry)?;
    Ok(registry)
}
