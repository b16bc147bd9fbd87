//! Live per-student state for one monitored test.

use crate::protocol::StudentProctorSnapshot;
use std::collections::HashMap;

/// Outcome of [`RosterState::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// First snapshot for this student; appended at the end.
    Inserted,
    /// Replaced the previous snapshot in place.
    Replaced,
}

/// Latest snapshot per student, iterated in order of first appearance.
///
/// Entries are only ever replaced whole, keyed by the snapshot's own
/// `student` field. Nothing is persisted.
#[derive(Debug, Clone, Default)]
pub struct RosterState {
    order: Vec<String>,
    latest: HashMap<String, StudentProctorSnapshot>,
}

impl RosterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `snapshot` as the latest state of its student (last write wins).
    pub fn upsert(&mut self, snapshot: StudentProctorSnapshot) -> Upsert {
        let student = snapshot.student.clone();
        match self.latest.insert(student.clone(), snapshot) {
            Some(_) => Upsert::Replaced,
            None => {
                self.order.push(student);
                Upsert::Inserted
            }
        }
    }

    pub fn get(&self, student: &str) -> Option<&StudentProctorSnapshot> {
        self.latest.get(student)
    }

    /// Snapshots in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &StudentProctorSnapshot> {
        self.order.iter().filter_map(|student| self.latest.get(student))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.latest.clear();
    }
}
