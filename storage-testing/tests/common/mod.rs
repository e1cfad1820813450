#![allow(dead_code)]

use storage_graph::{Document, Field, GraphConfig, GraphError, Issue, Record, Report, Segment, Severity};
use storage_models::DeviceTree;
use storage_testing::dump::Lab;
use storage_testing::{layout, spec};

pub const BUNDLED_SPECS: [&str; 3] = ["2disk", "lvm", "raid-luks"];

pub fn lab() -> Lab {
    lab_with(GraphConfig::default())
}

pub fn lab_with(config: GraphConfig) -> Lab {
    Lab::new(config).expect("storage model registry")
}

pub fn tree(spec_name: &str) -> DeviceTree {
    let spec = spec::load_by_name(spec_name).expect("bundled spec");
    layout::build(&spec).expect("bundled spec builds")
}

/// Primary record of the device called `name`
pub fn device_record<'d>(document: &'d Document, name: &str) -> &'d Record {
    document
        .segment(Segment::Primary)
        .iter()
        .find(|record| record.field("name").map(Field::text) == Some(name))
        .unwrap_or_else(|| panic!("no record for device '{name}'"))
}

/// Copy of `document` with every record passed through `edit`; records for
/// which `edit` returns false are dropped. Declared counts are not carried.
pub fn rewrite(document: &Document, mut edit: impl FnMut(&mut Record) -> bool) -> Document {
    let mut copy = Document::new();
    for (segment, record) in document.records() {
        let mut record = record.clone();
        if edit(&mut record) {
            copy.push(segment, record).expect("ids stay unique");
        }
    }
    copy
}

pub fn set_field_text(record: &mut Record, name: &str, text: &str) {
    let field = record
        .fields
        .iter_mut()
        .find(|field| field.name.as_deref() == Some(name))
        .unwrap_or_else(|| panic!("record {} has no field '{name}'", record.object_id));
    field.text = Some(text.to_string());
}

pub fn issues_where<'r>(
    report: &'r Report,
    severity: Severity,
    matches: impl Fn(&Issue) -> bool,
) -> Vec<&'r Issue> {
    report
        .issues()
        .iter()
        .filter(|issue| issue.severity == severity && matches(issue))
        .collect()
}

pub fn is_failed_reference(error: &GraphError) -> bool {
    matches!(
        error,
        GraphError::ReferenceResolution {
            reason: storage_graph::ReferenceFailure::Failed,
            ..
        }
    )
}
