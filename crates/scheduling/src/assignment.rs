//! Trip assignments and the store the conflict detector reads them from.

use chrono::{NaiveDate, NaiveDateTime};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shuttle_core::ShuttleResult;
use std::fmt;
use tracing::debug;

/// A schedulable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ResourceRef {
    Vehicle(u64),
    Driver(u64),
}

impl ResourceRef {
    pub fn id(&self) -> u64 {
        match self {
            ResourceRef::Vehicle(id) | ResourceRef::Driver(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResourceRef::Vehicle(_) => "vehicle",
            ResourceRef::Driver(_) => "driver",
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.kind(), self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentState {
    Draft,
    Planned,
    Ongoing,
    Done,
    Cancelled,
}

impl AssignmentState {
    /// Cancelled assignments no longer hold their resources.
    pub fn holds_resources(&self) -> bool {
        !matches!(self, AssignmentState::Cancelled)
    }
}

/// A trip's claim on a vehicle and/or driver for a time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: u64,
    pub name: String,
    pub vehicle: Option<u64>,
    pub driver: Option<u64>,
    pub date: NaiveDate,
    pub start: NaiveDateTime,
    /// Planned arrival; a default duration applies when absent.
    pub end: Option<NaiveDateTime>,
    pub state: AssignmentState,
    #[serde(default)]
    pub group_name: Option<String>,
}

impl Assignment {
    pub fn new(id: u64, name: impl Into<String>, start: NaiveDateTime, end: Option<NaiveDateTime>) -> Self {
        Self {
            id,
            name: name.into(),
            vehicle: None,
            driver: None,
            date: start.date(),
            start,
            end,
            state: AssignmentState::Planned,
            group_name: None,
        }
    }

    pub fn with_vehicle(mut self, vehicle: u64) -> Self {
        self.vehicle = Some(vehicle);
        self
    }

    pub fn with_driver(mut self, driver: u64) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn with_state(mut self, state: AssignmentState) -> Self {
        self.state = state;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group_name = Some(group.into());
        self
    }

    pub fn uses(&self, resource: ResourceRef) -> bool {
        match resource {
            ResourceRef::Vehicle(id) => self.vehicle == Some(id),
            ResourceRef::Driver(id) => self.driver == Some(id),
        }
    }
}

/// Read access to existing assignments.
///
/// Implementations backed by a database should run inside the caller's
/// transaction so a check and the write that follows see the same rows.
pub trait AssignmentStore: Send + Sync {
    /// Every assignment on `date` that uses `resource`, in any state.
    fn assignments_on(&self, resource: ResourceRef, date: NaiveDate) -> ShuttleResult<Vec<Assignment>>;
}

/// DashMap-backed store for embedded use and tests.
#[derive(Default)]
pub struct InMemoryAssignmentStore {
    assignments: DashMap<u64, Assignment>,
}

impl InMemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by id.
    pub fn upsert(&self, assignment: Assignment) {
        debug!(id = assignment.id, name = %assignment.name, "assignment stored");
        self.assignments.insert(assignment.id, assignment);
    }

    pub fn get(&self, id: u64) -> Option<Assignment> {
        self.assignments.get(&id).map(|r| r.value().clone())
    }

    pub fn remove(&self, id: u64) -> Option<Assignment> {
        self.assignments.remove(&id).map(|(_, a)| a)
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

impl AssignmentStore for InMemoryAssignmentStore {
    fn assignments_on(&self, resource: ResourceRef, date: NaiveDate) -> ShuttleResult<Vec<Assignment>> {
        let mut found: Vec<Assignment> = self
            .assignments
            .iter()
            .filter(|r| r.value().date == date && r.value().uses(resource))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));
        Ok(found)
    }
}
