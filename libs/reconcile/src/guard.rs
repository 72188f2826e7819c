//! Deletion guard predicates.
//!
//! A record is guarded by a marker that the store honours: a record whose
//! deletion was requested is only erased once the guard is removed.

/// Name of the deletion guard the operator places on its records.
pub const DELETION_GUARD: &str = "app.terraform.io/finalizer";

/// The two flags that decide creation and deletion candidacy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GuardState {
    pub guard_present: bool,
    pub deletion_requested: bool,
}

impl GuardState {
    pub fn new(guard_present: bool, deletion_requested: bool) -> Self {
        Self {
            guard_present,
            deletion_requested,
        }
    }

    /// The guard must be added before anything remote is provisioned.
    pub fn needs_guard(&self) -> bool {
        !self.deletion_requested && !self.guard_present
    }

    /// Marked for removal with the guard still in place: teardown must run.
    pub fn is_deletion_candidate(&self) -> bool {
        self.deletion_requested && self.guard_present
    }
}
