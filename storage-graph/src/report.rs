// SPDX-License-Identifier: GPL-3.0-only

//! Aggregate diagnostics for one export or import call

use std::fmt;

use crate::error::GraphError;
use crate::identity::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Handled as designed, e.g. a reference cycle closed after construction
    Notice,
    /// Data deliberately not persisted or integrity metadata out of date
    Warning,
    /// Something was skipped or lost
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Notice => f.write_str("notice"),
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub severity: Severity,
    pub object_id: Option<ObjectId>,
    pub type_name: Option<String>,
    pub field: Option<String>,
    pub error: GraphError,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.severity)?;
        match (&self.type_name, self.object_id) {
            (Some(type_name), Some(id)) => write!(f, "{type_name}#{id}")?,
            (Some(type_name), None) => write!(f, "{type_name}")?,
            (None, Some(id)) => write!(f, "#{id}")?,
            (None, None) => f.write_str("document")?,
        }
        if let Some(field) = &self.field {
            write!(f, ".{field}")?;
        }
        write!(f, ": {}", self.error)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    issues: Vec<Issue>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, issue: Issue) {
        match issue.severity {
            Severity::Error | Severity::Warning => tracing::warn!("{issue}"),
            Severity::Notice => tracing::debug!("{issue}"),
        }
        self.issues.push(issue);
    }

    pub(crate) fn record(
        &mut self,
        severity: Severity,
        object_id: Option<ObjectId>,
        type_name: Option<&str>,
        field: Option<&str>,
        error: GraphError,
    ) {
        self.push(Issue {
            severity,
            object_id,
            type_name: type_name.map(str::to_string),
            field: field.map(str::to_string),
            error,
        });
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Error)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    /// No warnings and no errors; notices are allowed
    pub fn is_clean(&self) -> bool {
        self.issues
            .iter()
            .all(|issue| issue.severity == Severity::Notice)
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            return f.write_str("no issues");
        }
        for (index, issue) in self.issues.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_every_issue_with_its_location() {
        let mut report = Report::new();
        report.record(
            Severity::Warning,
            Some(ObjectId::new(3)),
            Some("storage.devices.DiskDevice"),
            Some("table_handle"),
            GraphError::EncodingUnsupported {
                type_name: "parted.Disk".into(),
            },
        );
        report.record(
            Severity::Error,
            None,
            Some("storage.devices.Ghost"),
            None,
            GraphError::TypeResolution {
                type_name: "storage.devices.Ghost".into(),
            },
        );

        let rendered = report.to_string();
        assert!(rendered.contains(
            "warning: storage.devices.DiskDevice#3.table_handle: value of type 'parted.Disk' cannot be persisted"
        ));
        assert!(rendered.contains("error: storage.devices.Ghost: type 'storage.devices.Ghost' is not registered"));
        assert!(report.has_errors());
        assert!(!report.is_clean());
    }

    #[test]
    fn notices_keep_a_report_clean() {
        let mut report = Report::new();
        report.record(
            Severity::Notice,
            Some(ObjectId::new(2)),
            None,
            Some("parents"),
            GraphError::CyclicConstruction {
                target: ObjectId::new(1),
            },
        );
        assert!(report.is_clean());
        assert!(!report.has_errors());
        assert_eq!(Report::new().to_string(), "no issues");
    }
}
