//! Vehicle and driver double-booking checks over trip assignments.

pub mod assignment;
pub mod conflict;

pub use assignment::{Assignment, AssignmentState, AssignmentStore, InMemoryAssignmentStore, ResourceRef};
pub use conflict::{AllConflicts, ConflictDetector, ConflictQuery, ConflictResult, ConflictingAssignment};
