// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

use crate::document::Segment;
use crate::identity::ObjectId;

/// Per-record and per-field failures raised while exporting or importing.
///
/// None of these abort a whole export or import; they are collected into a
/// [`crate::Report`] next to the partial result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("type '{type_name}' is not registered")]
    TypeResolution { type_name: String },

    #[error("reference to object {target} cannot be resolved: {reason}")]
    ReferenceResolution {
        target: ObjectId,
        reason: ReferenceFailure,
    },

    #[error("value of type '{type_name}' cannot be persisted")]
    EncodingUnsupported { type_name: String },

    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    #[error("cannot decode '{text}' as {declared}")]
    MalformedValue { declared: &'static str, text: String },

    #[error("object {target} is still under construction")]
    CyclicConstruction { target: ObjectId },

    #[error("object {target} has no owner after import and was dropped")]
    Unowned { target: ObjectId },

    #[error("construction of '{type_name}' failed: {source}")]
    Construction {
        type_name: String,
        #[source]
        source: FieldError,
    },

    #[error("{segment} segment declares {declared} records but holds {actual}")]
    CountMismatch {
        segment: Segment,
        declared: usize,
        actual: usize,
    },
}

/// Why a reference could not be turned into a live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceFailure {
    /// No record with that id exists in the document
    Missing,
    /// The record exists but its construction failed
    Failed,
}

impl std::fmt::Display for ReferenceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceFailure::Missing => f.write_str("no such record"),
            ReferenceFailure::Failed => f.write_str("target failed to build"),
        }
    }
}

/// Field access failures reported by type factories.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error("missing required field '{0}'")]
    Missing(String),

    #[error("field '{field}' expected {expected}, found {found}")]
    Mismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("field '{field}' references '{found}', expected '{expected}'")]
    WrongObjectType {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid value for field '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("field '{0}' cannot be restored after construction")]
    NotRestorable(String),
}

/// Fatal document-level failures. Only these abort a read or write.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed XML: {0}")]
    Xml(String),

    #[error("unexpected element <{found}>, expected {expected}")]
    UnexpectedElement { found: String, expected: String },

    #[error("element <{element}> is missing attribute '{attribute}'")]
    MissingAttribute { element: String, attribute: String },

    #[error("invalid value '{value}' for attribute '{attribute}'")]
    InvalidAttribute { attribute: String, value: String },

    #[error("object id {0} appears more than once")]
    DuplicateObjectId(ObjectId),

    #[error("unsupported document version {0}")]
    UnsupportedVersion(u32),
}

/// Failures loading a [`crate::GraphConfig`] file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read graph config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid graph config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("type '{0}' is already registered")]
    Duplicate(&'static str),
}

/// Result type alias for document operations
pub type Result<T> = std::result::Result<T, DocumentError>;
