// SPDX-License-Identifier: GPL-3.0-only

//! Graph walker
//!
//! Export assigns ids to every primary object up front, then expands objects
//! from an explicit work stack. Each object is expanded exactly once; later
//! encounters only produce references, so cyclic graphs terminate.

use crate::codec::{self, Encoder};
use crate::config::GraphConfig;
use crate::document::{DeclaredType, Document, Field, Record, Segment};
use crate::error::GraphError;
use crate::identity::ObjectId;
use crate::registry::{FieldKind, FieldSpec, Placement, TypeDescriptor, TypeRegistry};
use crate::report::{Report, Severity};
use crate::value::{ObjectRef, Value};

pub struct ExportOutcome {
    pub document: Document,
    pub report: Report,
}

pub struct Exporter<'r> {
    registry: &'r TypeRegistry,
    config: GraphConfig,
}

struct Pending<'r> {
    id: ObjectId,
    object: ObjectRef,
    segment: Segment,
    descriptor: &'r TypeDescriptor,
}

impl<'r> Exporter<'r> {
    pub fn new(registry: &'r TypeRegistry, config: GraphConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    fn placement_segment(&self, placement: Placement) -> Segment {
        let segment = match placement {
            Placement::Shared => Segment::Shared,
            Placement::Auxiliary => Segment::Auxiliary,
        };
        self.config.layout.fold(segment)
    }

    pub fn export(&self, primaries: &[ObjectRef]) -> ExportOutcome {
        let mut encoder = Encoder::new(self.registry);
        let mut report = Report::new();
        let mut stack: Vec<Pending<'r>> = Vec::new();

        for object in primaries {
            let type_name = object.type_name();
            let descriptor = match self.registry.resolve(type_name) {
                Ok(descriptor) => descriptor,
                Err(error) => {
                    report.record(Severity::Error, None, Some(type_name), None, error);
                    continue;
                }
            };
            let (id, is_new) = encoder.identify(object);
            if !is_new {
                tracing::debug!(%id, "primary object listed more than once");
                continue;
            }
            stack.push(Pending {
                id,
                object: object.clone(),
                segment: Segment::Primary,
                descriptor,
            });
        }
        stack.reverse();

        let mut records: Vec<(Segment, Record)> = Vec::new();
        while let Some(pending) = stack.pop() {
            let (record, discovered) = self.expand(&pending, &mut encoder, &mut report);
            records.push((pending.segment, record));

            let mut next = Vec::with_capacity(discovered.len());
            for (id, object) in discovered {
                // Encoding only hands out ids to registered types.
                let Some(descriptor) = self.registry.get(object.type_name()) else {
                    continue;
                };
                next.push(Pending {
                    id,
                    segment: self.placement_segment(descriptor.placement),
                    object,
                    descriptor,
                });
            }
            stack.extend(next.into_iter().rev());
        }

        records.sort_by_key(|(_, record)| record.object_id);
        let mut document = Document::new();
        for (segment, record) in records {
            if let Err(error) = document.push(segment, record) {
                report.record(
                    Severity::Error,
                    None,
                    None,
                    None,
                    GraphError::EncodingFailed(error.to_string()),
                );
            }
        }
        for segment in Segment::ALL {
            document.set_declared_count(segment, document.count(segment));
        }

        tracing::info!(
            devices = document.count(Segment::Primary),
            formats = document.count(Segment::Shared),
            internal = document.count(Segment::Auxiliary),
            issues = report.len(),
            "export finished"
        );

        ExportOutcome { document, report }
    }

    fn expand(
        &self,
        pending: &Pending<'r>,
        encoder: &mut Encoder<'_>,
        report: &mut Report,
    ) -> (Record, Vec<(ObjectId, ObjectRef)>) {
        let type_name = pending.descriptor.name;
        let mut record = Record::new(type_name, pending.id);
        let mut discovered = Vec::new();

        for spec in pending.descriptor.schema {
            let value = pending.object.field(spec.name);
            let field = match self.encode_field(spec, &value, encoder) {
                Ok(encoded) => {
                    for opaque in encoded.unsupported {
                        report.record(
                            Severity::Warning,
                            Some(pending.id),
                            Some(type_name),
                            Some(spec.name),
                            GraphError::EncodingUnsupported { type_name: opaque },
                        );
                    }
                    discovered.extend(encoded.discovered);
                    encoded.field
                }
                Err(error) => {
                    let marker = codec::failed_marker(&error.to_string());
                    report.record(
                        Severity::Error,
                        Some(pending.id),
                        Some(type_name),
                        Some(spec.name),
                        error,
                    );
                    marker
                }
            };
            record.fields.push(field.named(spec.name));
        }

        tracing::debug!(id = %pending.id, type_name, segment = %pending.segment, "expanded record");
        (record, discovered)
    }

    fn encode_field(
        &self,
        spec: &FieldSpec,
        value: &Value,
        encoder: &mut Encoder<'_>,
    ) -> Result<codec::Encoded, GraphError> {
        if spec.kind == FieldKind::Opaque {
            return Ok(opaque(value));
        }

        let admitted = matches!(value, Value::Unsupported(_) | Value::Unavailable(_))
            || spec.kind.admits(value);
        if !admitted {
            return Err(GraphError::EncodingFailed(format!(
                "declared {:?} field holds a {} value",
                spec.kind,
                value.category()
            )));
        }

        encoder.encode(value)
    }
}

/// Deny-listed fields never persist their runtime value. Absent values are
/// written as `none`; anything else as an unsupported marker.
fn opaque(value: &Value) -> codec::Encoded {
    let (field, unsupported) = match value {
        Value::Absent => (Field::new(DeclaredType::None), Vec::new()),
        Value::Unsupported(type_name) | Value::Unavailable(type_name) => (
            codec::unsupported_marker(type_name),
            vec![type_name.clone()],
        ),
        other => (
            codec::unsupported_marker(other.category()),
            vec![other.category().to_string()],
        ),
    };
    codec::Encoded {
        field,
        discovered: Vec::new(),
        unsupported,
    }
}
