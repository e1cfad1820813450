// SPDX-License-Identifier: GPL-3.0-only

//! Graph builder
//!
//! Import walks primary records in document order and builds each one with an
//! explicit work stack: dependencies first, then the record itself through its
//! type's factory. References into a record that is still being built are
//! deferred and patched in once the whole pass is over.

use std::collections::HashMap;
use std::rc::Rc;

use crate::codec::{self, Decoded, Resolution};
use crate::config::GraphConfig;
use crate::document::{Document, Field, Record, Segment};
use crate::error::GraphError;
use crate::identity::{ImportIdentities, ObjectId, RecordState};
use crate::registry::{TypeRegistry, TypeResolver};
use crate::report::{Report, Severity};
use crate::value::{FieldMap, ObjectRef};

/// Receives every reconstructed primary object exactly once.
pub trait DeviceSink {
    fn add_device(&mut self, device: ObjectRef);

    /// Offered every non-primary object that nothing else holds once import
    /// is over. Returning `false` lets the object drop.
    fn retain(&mut self, object: ObjectRef) -> bool {
        let _ = object;
        false
    }
}

impl DeviceSink for Vec<ObjectRef> {
    fn add_device(&mut self, device: ObjectRef) {
        self.push(device);
    }
}

pub struct ImportOutcome {
    pub report: Report,
    /// Records successfully reconstructed, across all segments
    pub built: usize,
    /// Primary objects handed to the sink
    pub devices: usize,
}

pub struct Importer<'r> {
    registry: &'r TypeRegistry,
    config: GraphConfig,
}

impl<'r> Importer<'r> {
    pub fn new(registry: &'r TypeRegistry, config: GraphConfig) -> Self {
        Self { registry, config }
    }

    pub fn import(&self, document: &Document, sink: &mut dyn DeviceSink) -> ImportOutcome {
        let mut report = Report::new();

        if self.config.validate_counts {
            for (segment, declared, actual) in document.count_mismatches() {
                report.record(
                    Severity::Warning,
                    None,
                    None,
                    None,
                    GraphError::CountMismatch {
                        segment,
                        declared,
                        actual,
                    },
                );
            }
        }

        let index = document
            .records()
            .map(|(segment, record)| (record.object_id, (segment, record)))
            .collect();

        let mut pass = BuildPass {
            resolver: TypeResolver::new(self.registry),
            ids: ImportIdentities::new(),
            index,
            deferred: Vec::new(),
            report,
            sink,
            devices: 0,
        };

        for record in document.segment(Segment::Primary) {
            pass.ensure_built(record.object_id);
        }
        pass.apply_deferred();
        pass.keep_unowned();

        let built = pass.ids.built_count();
        tracing::info!(
            built,
            devices = pass.devices,
            records = document.len(),
            issues = pass.report.len(),
            "import finished"
        );

        ImportOutcome {
            report: pass.report,
            built,
            devices: pass.devices,
        }
    }
}

struct DeferredField<'d> {
    owner: ObjectId,
    type_name: &'d str,
    name: &'d str,
    field: &'d Field,
}

struct BuildPass<'d, 'r, 's> {
    resolver: TypeResolver<'r>,
    ids: ImportIdentities,
    index: HashMap<ObjectId, (Segment, &'d Record)>,
    deferred: Vec<DeferredField<'d>>,
    report: Report,
    sink: &'s mut dyn DeviceSink,
    devices: usize,
}

fn resolution(
    ids: &ImportIdentities,
    index: &HashMap<ObjectId, (Segment, &Record)>,
    target: ObjectId,
) -> Resolution {
    if !index.contains_key(&target) {
        return Resolution::Missing;
    }
    match ids.state(target) {
        RecordState::Built => ids
            .get_built(target)
            .map_or(Resolution::Failed, Resolution::Built),
        RecordState::Failed => Resolution::Failed,
        RecordState::InProgress | RecordState::Unseen => Resolution::Pending,
    }
}

impl<'d> BuildPass<'d, '_, '_> {
    fn ensure_built(&mut self, root: ObjectId) {
        let mut stack = vec![root];

        while let Some(&id) = stack.last() {
            match self.ids.state(id) {
                RecordState::Built | RecordState::Failed => {
                    stack.pop();
                }
                RecordState::InProgress => {
                    self.construct(id);
                    stack.pop();
                }
                RecordState::Unseen => {
                    let Some(&(_, record)) = self.index.get(&id) else {
                        stack.pop();
                        continue;
                    };

                    if let Err(error) = self.resolver.resolve(&record.type_name) {
                        self.ids.begin(id);
                        self.ids.mark_failed(id);
                        self.report.record(
                            Severity::Error,
                            Some(id),
                            Some(record.type_name.as_str()),
                            None,
                            error,
                        );
                        stack.pop();
                        continue;
                    }

                    self.ids.begin(id);
                    let before = stack.len();
                    for dependency in record.references().into_iter().rev() {
                        if self.index.contains_key(&dependency)
                            && self.ids.state(dependency) == RecordState::Unseen
                        {
                            stack.push(dependency);
                        }
                    }
                    if stack.len() == before {
                        self.construct(id);
                        stack.pop();
                    }
                }
            }
        }
    }

    fn construct(&mut self, id: ObjectId) {
        let Some(&(segment, record)) = self.index.get(&id) else {
            return;
        };
        let type_name = record.type_name.as_str();
        let descriptor = match self.resolver.resolve(type_name) {
            Ok(descriptor) => descriptor,
            Err(error) => {
                self.ids.mark_failed(id);
                self.report
                    .record(Severity::Error, Some(id), Some(type_name), None, error);
                return;
            }
        };

        let mut fields = FieldMap::new(type_name);
        for field in &record.fields {
            let Some(name) = field.name.as_deref() else {
                continue;
            };
            let decoded = codec::decode(field, |target| {
                resolution(&self.ids, &self.index, target)
            });
            match decoded {
                Decoded::Value(value) => fields.insert(name, value),
                Decoded::Deferred(target) => {
                    tracing::debug!(%id, field = name, %target, "deferring field until construction completes");
                    self.deferred.push(DeferredField {
                        owner: id,
                        type_name,
                        name,
                        field,
                    });
                }
                Decoded::Broken(error) => {
                    self.report
                        .record(Severity::Error, Some(id), Some(type_name), Some(name), error);
                }
            }
        }

        match descriptor.build(fields) {
            Ok(object) => {
                tracing::debug!(%id, type_name, "built record");
                self.ids.mark_built(id, object.clone());
                if segment == Segment::Primary {
                    self.sink.add_device(object);
                    self.devices += 1;
                }
            }
            Err(source) => {
                self.ids.mark_failed(id);
                self.report.record(
                    Severity::Error,
                    Some(id),
                    Some(type_name),
                    None,
                    GraphError::Construction {
                        type_name: type_name.to_string(),
                        source,
                    },
                );
            }
        }
    }

    /// Objects held only weakly by their owners would drop with the pass.
    fn keep_unowned(&mut self) {
        for (id, object) in self.ids.built() {
            // One count for the slot, one for the local clone
            if Rc::strong_count(&object) > 2 {
                continue;
            }
            let Some(&(segment, _)) = self.index.get(&id) else {
                continue;
            };
            if segment == Segment::Primary {
                continue;
            }
            let type_name = object.type_name();
            if self.sink.retain(object) {
                tracing::debug!(%id, type_name, "sink retained unowned object");
                continue;
            }
            self.report.record(
                Severity::Error,
                Some(id),
                Some(type_name),
                None,
                GraphError::Unowned { target: id },
            );
        }
    }

    fn apply_deferred(&mut self) {
        for deferred in std::mem::take(&mut self.deferred) {
            let DeferredField {
                owner,
                type_name,
                name,
                field,
            } = deferred;
            // Nothing to patch when the owner itself failed to build.
            let Some(object) = self.ids.get_built(owner) else {
                continue;
            };

            let decoded = codec::decode(field, |target| {
                resolution(&self.ids, &self.index, target)
            });
            let target = field.references().first().copied().unwrap_or(owner);
            match decoded {
                Decoded::Value(value) => match object.restore_field(name, value) {
                    Ok(()) => self.report.record(
                        Severity::Notice,
                        Some(owner),
                        Some(type_name),
                        Some(name),
                        GraphError::CyclicConstruction { target },
                    ),
                    Err(error) => {
                        tracing::debug!(%owner, field = name, %error, "field could not be restored");
                        self.report.record(
                            Severity::Error,
                            Some(owner),
                            Some(type_name),
                            Some(name),
                            GraphError::CyclicConstruction { target },
                        );
                    }
                },
                Decoded::Deferred(target) => self.report.record(
                    Severity::Error,
                    Some(owner),
                    Some(type_name),
                    Some(name),
                    GraphError::CyclicConstruction { target },
                ),
                Decoded::Broken(error) => {
                    self.report
                        .record(Severity::Error, Some(owner), Some(type_name), Some(name), error);
                }
            }
        }
    }
}
