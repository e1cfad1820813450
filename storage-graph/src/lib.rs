// SPDX-License-Identifier: GPL-3.0-only

//! Object-graph persistence for storage configurations
//!
//! A live graph of devices, formats and auxiliary records is written to a
//! three-segment XML [`Document`] and rebuilt from one, preserving identity:
//! shared objects are stored once, cycles are closed, and every failure is
//! isolated to the record or field it concerns and collected in a [`Report`].
//!
//! ```text
//! registry ──► Exporter ──► Document ──► XML file
//!                              ▲
//! DeviceSink ◄── Importer ◄────┘
//! ```

pub mod builder;
pub mod codec;
pub mod config;
pub mod document;
pub mod error;
pub mod identity;
pub mod registry;
pub mod report;
pub mod value;
pub mod walker;

mod xml;

#[cfg(test)]
pub(crate) mod testkit;

pub use builder::{DeviceSink, ImportOutcome, Importer};
pub use config::{GraphConfig, SegmentLayout};
pub use document::{DeclaredType, Document, FORMAT_VERSION, Field, Record, Segment};
pub use error::{ConfigError, DocumentError, FieldError, GraphError, ReferenceFailure, RegistryError, Result};
pub use identity::ObjectId;
pub use registry::{FieldKind, FieldSpec, Placement, Reconstruct, TypeRegistry, TypeResolver};
pub use report::{Issue, Report, Severity};
pub use value::{FieldMap, GraphObject, ObjectRef, Value, downcast};
pub use walker::{ExportOutcome, Exporter};

/// Export `primaries` and everything reachable from them.
pub fn export(registry: &TypeRegistry, config: &GraphConfig, primaries: &[ObjectRef]) -> ExportOutcome {
    Exporter::new(registry, config.clone()).export(primaries)
}

/// Rebuild a document, handing each primary object to `sink`.
pub fn import(
    registry: &TypeRegistry,
    config: &GraphConfig,
    document: &Document,
    sink: &mut dyn DeviceSink,
) -> ImportOutcome {
    Importer::new(registry, config.clone()).import(document, sink)
}
