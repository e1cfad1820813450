// SPDX-License-Identifier: GPL-3.0-only

//! Shared value types for storage object-graph persistence
//!
//! These types are used throughout the stack:
//!
//! - **storage-graph**: Encodes `Size` as an exact measurement value
//! - **storage-models**: Describes device and format geometry with them
//! - **storage-testing**: Parses lab layouts into them

pub mod lvm;
pub mod size;

pub use lvm::{LVM_PE_SIZE, LVM_PE_START, extent_count};
pub use size::{Size, SizeUnit};
