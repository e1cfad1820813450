// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::document::Segment;
use crate::error::ConfigError;

pub const DEFAULT_INDENT: usize = 2;

/// How records reached through fields are distributed over segments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentLayout {
    /// Shared types go to `Formats`, everything else to `InternalDevices`
    #[default]
    ThreeSegment,
    /// Everything reached through fields goes to `Formats`
    TwoSegment,
}

impl SegmentLayout {
    pub fn fold(self, segment: Segment) -> Segment {
        match (self, segment) {
            (SegmentLayout::TwoSegment, Segment::Auxiliary) => Segment::Shared,
            (_, segment) => segment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub layout: SegmentLayout,
    pub indent: usize,
    pub validate_counts: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            layout: SegmentLayout::ThreeSegment,
            indent: DEFAULT_INDENT,
            validate_counts: true,
        }
    }
}

impl GraphConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}
