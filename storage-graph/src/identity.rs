// SPDX-License-Identifier: GPL-3.0-only

//! Document-scoped object identities
//!
//! Export keys objects by pointer identity, never by value, so two equal but
//! distinct objects get two records. Import tracks the construction state of
//! every record so cycles are detected instead of recursed into.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use crate::value::ObjectRef;

/// Identity of a record, unique within one document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u32);

impl ObjectId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObjectId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(ObjectId)
    }
}

fn identity_key(object: &ObjectRef) -> usize {
    Rc::as_ptr(object).cast::<()>() as usize
}

/// Export-side identity assignment.
///
/// Every object that receives an id is kept alive until the index is dropped,
/// so an address can never be reused by a different object mid-export.
#[derive(Default)]
pub struct ExportIdentities {
    ids: HashMap<usize, ObjectId>,
    pinned: Vec<ObjectRef>,
}

impl ExportIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the object's id, assigning the next one if it has none yet.
    /// The flag is `true` when the id was assigned by this call.
    pub fn get_or_assign(&mut self, object: &ObjectRef) -> (ObjectId, bool) {
        let key = identity_key(object);
        if let Some(id) = self.ids.get(&key) {
            return (*id, false);
        }

        let id = ObjectId(self.pinned.len() as u32 + 1);
        self.ids.insert(key, id);
        self.pinned.push(object.clone());
        (id, true)
    }

    pub fn get(&self, object: &ObjectRef) -> Option<ObjectId> {
        self.ids.get(&identity_key(object)).copied()
    }

    pub fn len(&self) -> usize {
        self.pinned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pinned.is_empty()
    }
}

/// Construction state of one record during import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Unseen,
    InProgress,
    Built,
    Failed,
}

enum Slot {
    InProgress,
    Built(ObjectRef),
    Failed,
}

/// Import-side memo of reconstructed objects.
#[derive(Default)]
pub struct ImportIdentities {
    slots: HashMap<ObjectId, Slot>,
}

impl ImportIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, id: ObjectId) -> RecordState {
        match self.slots.get(&id) {
            None => RecordState::Unseen,
            Some(Slot::InProgress) => RecordState::InProgress,
            Some(Slot::Built(_)) => RecordState::Built,
            Some(Slot::Failed) => RecordState::Failed,
        }
    }

    pub fn get_built(&self, id: ObjectId) -> Option<ObjectRef> {
        match self.slots.get(&id) {
            Some(Slot::Built(object)) => Some(object.clone()),
            _ => None,
        }
    }

    pub fn is_in_progress(&self, id: ObjectId) -> bool {
        matches!(self.slots.get(&id), Some(Slot::InProgress))
    }

    /// `unseen -> in_progress`. Returns `false` if the record was already visited.
    pub fn begin(&mut self, id: ObjectId) -> bool {
        if self.slots.contains_key(&id) {
            return false;
        }
        self.slots.insert(id, Slot::InProgress);
        true
    }

    /// `in_progress -> built`
    pub fn mark_built(&mut self, id: ObjectId, object: ObjectRef) {
        debug_assert!(self.is_in_progress(id), "record {id} was not in progress");
        self.slots.insert(id, Slot::Built(object));
    }

    /// `in_progress -> failed`, terminal
    pub fn mark_failed(&mut self, id: ObjectId) {
        debug_assert!(self.is_in_progress(id), "record {id} was not in progress");
        self.slots.insert(id, Slot::Failed);
    }

    /// Built objects in id order
    pub fn built(&self) -> Vec<(ObjectId, ObjectRef)> {
        let mut built: Vec<_> = self
            .slots
            .iter()
            .filter_map(|(id, slot)| match slot {
                Slot::Built(object) => Some((*id, object.clone())),
                _ => None,
            })
            .collect();
        built.sort_by_key(|(id, _)| *id);
        built
    }

    pub fn built_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Built(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::TestNode;

    #[test]
    fn assigns_sequential_ids_by_identity() {
        let mut ids = ExportIdentities::new();
        let first: ObjectRef = TestNode::new("a");
        let second: ObjectRef = TestNode::new("a");

        assert_eq!(ids.get_or_assign(&first), (ObjectId::new(1), true));
        assert_eq!(ids.get_or_assign(&second), (ObjectId::new(2), true));
        assert_eq!(ids.get_or_assign(&first.clone()), (ObjectId::new(1), false));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn import_states_follow_the_build_lifecycle() {
        let mut ids = ImportIdentities::new();
        let id = ObjectId::new(7);

        assert_eq!(ids.state(id), RecordState::Unseen);
        assert!(ids.begin(id));
        assert!(ids.is_in_progress(id));
        assert!(!ids.begin(id));

        ids.mark_built(id, TestNode::new("x"));
        assert_eq!(ids.state(id), RecordState::Built);
        assert!(ids.get_built(id).is_some());

        let broken = ObjectId::new(8);
        assert!(ids.begin(broken));
        ids.mark_failed(broken);
        assert_eq!(ids.state(broken), RecordState::Failed);
        assert!(!ids.begin(broken));
        assert_eq!(ids.built_count(), 1);
    }
}
