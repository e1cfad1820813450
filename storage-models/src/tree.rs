// SPDX-License-Identifier: GPL-3.0-only

//! Device tree - the set of top-level devices a dump is made of

use storage_graph::{DeviceSink, ObjectRef};

use crate::device::BlockDevice;
use crate::format::Format;

#[derive(Default)]
pub struct DeviceTree {
    devices: Vec<BlockDevice>,
    /// Objects handed in by import that are not block devices
    rejected: usize,
    /// Imported objects only held weakly by the devices above
    retained: Vec<ObjectRef>,
}

impl DeviceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device. Devices are kept in insertion order, which is also the
    /// order they are dumped in.
    pub fn add(&mut self, device: BlockDevice) {
        tracing::debug!(name = device.name(), kind = device.type_name(), "adding device");
        self.devices.push(device);
    }

    pub fn devices(&self) -> &[BlockDevice] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }

    pub fn retained(&self) -> usize {
        self.retained.len()
    }

    pub fn get_by_name(&self, name: &str) -> Option<&BlockDevice> {
        self.devices.iter().find(|device| device.name() == name)
    }

    pub fn get_by_path(&self, path: &str) -> Option<&BlockDevice> {
        self.devices.iter().find(|device| device.core().path == path)
    }

    /// Devices that list `device` as a direct parent
    pub fn children(&self, device: &BlockDevice) -> Vec<BlockDevice> {
        self.devices
            .iter()
            .filter(|candidate| {
                candidate
                    .core()
                    .parents_ref()
                    .iter()
                    .any(|parent| parent.ptr_eq(device))
            })
            .cloned()
            .collect()
    }

    /// Every device stacked on `device`, in tree order
    pub fn descendants(&self, device: &BlockDevice) -> Vec<BlockDevice> {
        self.devices
            .iter()
            .filter(|candidate| candidate.depends_on(device))
            .cloned()
            .collect()
    }

    /// Devices with no parents (disks, usually)
    pub fn roots(&self) -> Vec<BlockDevice> {
        self.devices
            .iter()
            .filter(|device| device.core().parents_ref().is_empty())
            .cloned()
            .collect()
    }

    /// Formats of all devices, in tree order, without duplicates
    pub fn formats(&self) -> Vec<Format> {
        let mut formats: Vec<Format> = Vec::new();
        for format in self.devices.iter().filter_map(|device| device.core().format.clone()) {
            let object = format.object();
            if !formats
                .iter()
                .any(|seen| std::rc::Rc::ptr_eq(&seen.object(), &object))
            {
                formats.push(format);
            }
        }
        formats
    }

    /// Choose the devices to dump.
    ///
    /// Without `recursive`, every device whose name contains `pattern`. With
    /// `recursive`, the first such device followed by everything stacked on it.
    pub fn select(&self, pattern: &str, recursive: bool) -> Vec<BlockDevice> {
        if !recursive {
            return self
                .devices
                .iter()
                .filter(|device| device.name().contains(pattern))
                .cloned()
                .collect();
        }

        let Some(first) = self
            .devices
            .iter()
            .find(|device| device.name().contains(pattern))
        else {
            return Vec::new();
        };

        let mut selected = vec![first.clone()];
        selected.extend(self.descendants(first));
        selected
    }

    /// Reorder the tree so every device follows all of its ancestors, then by
    /// name. Import hands devices over in construction order; sorting gives a
    /// dump order that does not depend on how the tree was populated.
    pub fn sort_canonical(&mut self) {
        let mut keyed: Vec<(usize, BlockDevice)> = self
            .devices
            .drain(..)
            .map(|device| (stack_depth(&device), device))
            .collect();
        keyed.sort_by(|(a_depth, a), (b_depth, b)| {
            a_depth.cmp(b_depth).then_with(|| a.name().cmp(b.name()))
        });
        self.devices = keyed.into_iter().map(|(_, device)| device).collect();
    }

    /// Engine handles for a set of devices
    pub fn objects(devices: &[BlockDevice]) -> Vec<ObjectRef> {
        devices.iter().map(BlockDevice::object).collect()
    }

    /// Engine handles for the whole tree
    pub fn all_objects(&self) -> Vec<ObjectRef> {
        Self::objects(&self.devices)
    }
}

impl DeviceSink for DeviceTree {
    fn add_device(&mut self, device: ObjectRef) {
        match BlockDevice::from_object(&device) {
            Some(device) => self.add(device),
            None => {
                self.rejected += 1;
                tracing::warn!(
                    type_name = device.type_name(),
                    "ignoring primary object that is not a block device"
                );
            }
        }
    }

    fn retain(&mut self, object: ObjectRef) -> bool {
        tracing::debug!(type_name = object.type_name(), "retaining imported object");
        self.retained.push(object);
        true
    }
}

/// Length of the longest parent chain above `device`
fn stack_depth(device: &BlockDevice) -> usize {
    let mut deepest = 0;
    let mut stack = vec![(device.clone(), 0usize)];
    while let Some((current, depth)) = stack.pop() {
        deepest = deepest.max(depth);
        stack.extend(
            current
                .core()
                .parents()
                .into_iter()
                .map(|parent| (parent, depth + 1)),
        );
    }
    deepest
}

/// File name for a dump: `<base>[<device>][-recursive].xml`
pub fn dump_file_name(base: &str, device: Option<&str>, recursive: bool) -> String {
    let mut name = base.to_string();
    if let Some(device) = device {
        name.push_str(device);
    }
    if recursive {
        name.push_str("-recursive");
    }
    name.push_str(".xml");
    name
}
