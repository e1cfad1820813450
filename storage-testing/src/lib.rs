//! Lab layouts for exercising storage object-graph dumps
//!
//! A lab spec (`resources/lab-specs/*.toml`) describes disks, partitions,
//! MD arrays and LVM stacks. [`layout::build`] turns one into a device tree
//! and [`dump::Lab`] exports, reloads and compares the resulting documents.

pub mod dump;
pub mod errors;
pub mod layout;
pub mod spec;
