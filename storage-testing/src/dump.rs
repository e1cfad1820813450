//! Dump, reload and inspect device trees

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use storage_graph::{
    Document, ExportOutcome, GraphConfig, ImportOutcome, ObjectId, Report, Segment, TypeRegistry,
};
use storage_models::{BlockDevice, DeviceTree};

use crate::errors::{Result, TestingError};

/// Devices chosen for a partial dump
#[derive(Debug, Clone)]
pub struct Selection {
    pub pattern: String,
    pub recursive: bool,
}

impl Selection {
    pub fn new(pattern: impl Into<String>, recursive: bool) -> Self {
        Self {
            pattern: pattern.into(),
            recursive,
        }
    }
}

/// Load a graph config file, or the defaults when none is given.
pub fn load_config(path: Option<&Path>) -> Result<GraphConfig> {
    let Some(path) = path else {
        return Ok(GraphConfig::default());
    };
    Ok(GraphConfig::load(path)?)
}

/// A registry of the storage models paired with one graph config
pub struct Lab {
    registry: TypeRegistry,
    config: GraphConfig,
}

impl Lab {
    pub fn new(config: GraphConfig) -> Result<Self> {
        Ok(Self {
            registry: storage_models::registry()?,
            config,
        })
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn export(&self, devices: &[BlockDevice]) -> ExportOutcome {
        storage_graph::export(&self.registry, &self.config, &DeviceTree::objects(devices))
    }

    /// Export the whole tree, or only the selected devices.
    pub fn export_tree(
        &self,
        tree: &DeviceTree,
        selection: Option<&Selection>,
    ) -> Result<ExportOutcome> {
        let Some(selection) = selection else {
            return Ok(self.export(tree.devices()));
        };

        let devices = tree.select(&selection.pattern, selection.recursive);
        if devices.is_empty() {
            return Err(TestingError::NoDeviceSelected {
                pattern: selection.pattern.clone(),
            });
        }
        tracing::info!(
            pattern = %selection.pattern,
            recursive = selection.recursive,
            selected = devices.len(),
            "dumping selected devices"
        );
        Ok(self.export(&devices))
    }

    /// Rebuild a tree from a document, in canonical order.
    pub fn import(&self, document: &Document) -> (DeviceTree, ImportOutcome) {
        let mut tree = DeviceTree::new();
        let outcome = storage_graph::import(&self.registry, &self.config, document, &mut tree);
        tree.sort_canonical();
        (tree, outcome)
    }

    pub fn to_xml(&self, document: &Document) -> Result<String> {
        Ok(document.to_xml_string_with_indent(self.config.indent)?)
    }

    /// Export, serialize, parse, import and export again.
    pub fn round_trip(&self, tree: &DeviceTree) -> Result<RoundTrip> {
        self.round_trip_selected(tree, None)
    }

    /// Like [`Lab::round_trip`], starting from a selection of the tree. The
    /// second export covers every device the reload produced.
    pub fn round_trip_selected(
        &self,
        tree: &DeviceTree,
        selection: Option<&Selection>,
    ) -> Result<RoundTrip> {
        let first = self.export_tree(tree, selection)?;
        let first_xml = self.to_xml(&first.document)?;

        let reread = Document::from_xml_str(&first_xml)?;
        let (rebuilt, imported) = self.import(&reread);

        let second = self.export_tree(&rebuilt, None)?;
        let second_xml = self.to_xml(&second.document)?;

        Ok(RoundTrip {
            first_xml,
            second_xml,
            export_report: first.report,
            import_report: imported.report,
            reexport_report: second.report,
            devices: rebuilt.len(),
        })
    }
}

pub struct RoundTrip {
    pub first_xml: String,
    pub second_xml: String,
    pub export_report: Report,
    pub import_report: Report,
    pub reexport_report: Report,
    /// Devices in the rebuilt tree
    pub devices: usize,
}

impl RoundTrip {
    pub fn is_identical(&self) -> bool {
        self.first_xml == self.second_xml
    }

    /// First line where the two dumps differ, 1-based
    pub fn first_difference(&self) -> Option<(usize, &str, &str)> {
        let mut first = self.first_xml.lines();
        let mut second = self.second_xml.lines();
        let mut line = 1;
        loop {
            match (first.next(), second.next()) {
                (None, None) => return None,
                (a, b) if a == b => line += 1,
                (a, b) => return Some((line, a.unwrap_or(""), b.unwrap_or(""))),
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentSummary {
    pub name: &'static str,
    pub records: usize,
    pub declared: Option<usize>,
}

/// What a dump holds, without rebuilding it
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub version: u32,
    pub segments: Vec<SegmentSummary>,
    pub types: BTreeMap<String, usize>,
    pub references: usize,
    /// Referenced ids with no record
    pub dangling: Vec<u32>,
}

pub fn summarize(document: &Document) -> Summary {
    let segments = Segment::ALL
        .into_iter()
        .map(|segment| SegmentSummary {
            name: segment.element_name(),
            records: document.count(segment),
            declared: document.declared_count(segment),
        })
        .collect();

    let mut types = BTreeMap::new();
    let mut references = 0;
    let mut dangling: Vec<ObjectId> = Vec::new();
    for (_, record) in document.records() {
        *types.entry(record.type_name.clone()).or_insert(0) += 1;
        for target in record.references() {
            references += 1;
            if document.find(target).is_none() && !dangling.contains(&target) {
                dangling.push(target);
            }
        }
    }
    dangling.sort();

    Summary {
        version: document.version,
        segments,
        types,
        references,
        dangling: dangling.into_iter().map(ObjectId::get).collect(),
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "format version {}", self.version)?;
        for segment in &self.segments {
            match segment.declared {
                Some(declared) if declared != segment.records => writeln!(
                    f,
                    "{:<16}{:>5} records (declared {})",
                    segment.name, segment.records, declared
                )?,
                _ => writeln!(f, "{:<16}{:>5} records", segment.name, segment.records)?,
            }
        }
        for (type_name, count) in &self.types {
            writeln!(f, "  {type_name:<40}{count:>5}")?;
        }
        write!(f, "{} references", self.references)?;
        if !self.dangling.is_empty() {
            write!(f, ", dangling: {:?}", self.dangling)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout;
    use crate::spec::load_by_name;

    fn lab() -> Lab {
        Lab::new(GraphConfig::default()).unwrap()
    }

    #[test]
    fn selection_must_match_something() {
        let tree = layout::build(&load_by_name("2disk").unwrap()).unwrap();
        let missing = Selection::new("nvme", false);
        assert!(matches!(
            lab().export_tree(&tree, Some(&missing)),
            Err(TestingError::NoDeviceSelected { .. })
        ));

        let sda = Selection::new("sda", false);
        let outcome = lab().export_tree(&tree, Some(&sda)).unwrap();
        assert_eq!(outcome.document.count(Segment::Primary), 3);
    }

    #[test]
    fn summary_counts_types_and_segments() {
        let tree = layout::build(&load_by_name("2disk").unwrap()).unwrap();
        let outcome = lab().export_tree(&tree, None).unwrap();
        let summary = summarize(&outcome.document);

        assert_eq!(summary.segments[0].name, "Devices");
        assert_eq!(summary.segments[0].records, tree.len());
        assert_eq!(summary.types["storage.devices.Disk"], 2);
        assert!(summary.dangling.is_empty());
        assert!(summary.to_string().contains("storage.devices.Partition"));
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/lab-graph.toml"))).unwrap();
        assert_eq!(config, GraphConfig::default());
        assert_eq!(load_config(None).unwrap(), GraphConfig::default());
    }

    #[test]
    fn round_trip_reports_first_difference() {
        let trip = RoundTrip {
            first_xml: "a\nb\nc".to_string(),
            second_xml: "a\nx\nc".to_string(),
            export_report: Report::new(),
            import_report: Report::new(),
            reexport_report: Report::new(),
            devices: 0,
        };
        assert!(!trip.is_identical());
        assert_eq!(trip.first_difference(), Some((2, "b", "x")));
    }
}
