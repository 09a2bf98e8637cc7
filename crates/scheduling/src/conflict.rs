//! Interval-overlap conflict detection for vehicles and drivers.
//!
//! Intervals are half-open: a trip ending at 10:00 and another starting at
//! 10:00 on the same resource do not conflict. The detector only reads from
//! its [`AssignmentStore`]; a caller that checks and then writes must hold
//! both steps in one transaction.

use crate::assignment::{Assignment, AssignmentStore, ResourceRef};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use shuttle_core::config::SchedulingSettings;
use shuttle_core::{ShuttleError, ShuttleResult};
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_TRIP_MINUTES: i64 = 120;

/// Proposed use of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictQuery {
    pub resource: ResourceRef,
    pub date: NaiveDate,
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
    /// Assignment being edited; never reported against itself.
    pub exclude_id: Option<u64>,
}

impl ConflictQuery {
    pub fn new(resource: ResourceRef, start: NaiveDateTime, end: Option<NaiveDateTime>) -> Self {
        Self {
            resource,
            date: start.date(),
            start,
            end,
            exclude_id: None,
        }
    }

    pub fn excluding(mut self, id: u64) -> Self {
        self.exclude_id = Some(id);
        self
    }
}

/// The assignment that already holds the resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictingAssignment {
    pub resource: ResourceRef,
    pub assignment_id: u64,
    pub assignment_name: String,
    pub start: NaiveDateTime,
    /// Effective end, with the default duration applied.
    pub end: NaiveDateTime,
    pub group_name: Option<String>,
}

impl From<ConflictingAssignment> for ShuttleError {
    fn from(c: ConflictingAssignment) -> Self {
        ShuttleError::ConflictDetected {
            resource: c.resource.to_string(),
            assignment_id: c.assignment_id,
            assignment_name: c.assignment_name,
            start: c.start,
            end: c.end,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictResult {
    conflict: Option<ConflictingAssignment>,
}

impl ConflictResult {
    pub fn clear() -> Self {
        Self { conflict: None }
    }

    pub fn found(conflict: ConflictingAssignment) -> Self {
        Self {
            conflict: Some(conflict),
        }
    }

    pub fn has_conflict(&self) -> bool {
        self.conflict.is_some()
    }

    pub fn conflicting(&self) -> Option<&ConflictingAssignment> {
        self.conflict.as_ref()
    }

    /// `ConflictDetected` when a conflict was found.
    pub fn into_result(self) -> ShuttleResult<()> {
        match self.conflict {
            Some(c) => Err(c.into()),
            None => Ok(()),
        }
    }
}

/// Vehicle and driver outcomes of one combined check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllConflicts {
    pub vehicle: ConflictResult,
    pub driver: ConflictResult,
}

impl AllConflicts {
    pub fn has_vehicle_conflict(&self) -> bool {
        self.vehicle.has_conflict()
    }

    pub fn has_driver_conflict(&self) -> bool {
        self.driver.has_conflict()
    }

    pub fn has_any(&self) -> bool {
        self.has_vehicle_conflict() || self.has_driver_conflict()
    }

    /// Fails with the vehicle conflict first, then the driver conflict.
    pub fn ensure_clear(self) -> ShuttleResult<()> {
        self.vehicle.into_result()?;
        self.driver.into_result()
    }
}

/// `[s1, e1)` and `[s2, e2)` share at least one instant.
pub fn intervals_overlap(
    s1: NaiveDateTime,
    e1: NaiveDateTime,
    s2: NaiveDateTime,
    e2: NaiveDateTime,
) -> bool {
    s1 < e2 && s2 < e1
}

pub struct ConflictDetector {
    store: Arc<dyn AssignmentStore>,
    default_duration: Duration,
}

impl ConflictDetector {
    pub fn new(store: Arc<dyn AssignmentStore>) -> Self {
        Self {
            store,
            default_duration: Duration::minutes(DEFAULT_TRIP_MINUTES),
        }
    }

    pub fn from_settings(store: Arc<dyn AssignmentStore>, settings: &SchedulingSettings) -> ShuttleResult<Self> {
        let default_duration = Duration::try_minutes(settings.default_trip_duration_minutes)
            .filter(|d| *d > Duration::zero())
            .ok_or_else(|| {
                ShuttleError::Config(format!(
                    "default trip duration must be positive, got {} minutes",
                    settings.default_trip_duration_minutes
                ))
            })?;
        Ok(Self {
            store,
            default_duration,
        })
    }

    pub fn default_duration(&self) -> Duration {
        self.default_duration
    }

    fn effective_end(&self, start: NaiveDateTime, end: Option<NaiveDateTime>) -> ShuttleResult<NaiveDateTime> {
        match end {
            Some(end) => Ok(end),
            None => start.checked_add_signed(self.default_duration).ok_or_else(|| {
                ShuttleError::Validation(format!(
                    "assignment starting {start} has no end and the default duration runs past the calendar"
                ))
            }),
        }
    }

    /// First active assignment on the same resource and date whose interval
    /// overlaps the query.
    pub fn check_conflict(&self, query: &ConflictQuery) -> ShuttleResult<ConflictResult> {
        let end = self.effective_end(query.start, query.end)?;
        if end <= query.start {
            return Err(ShuttleError::Validation(format!(
                "assignment end {end} must be after start {}",
                query.start
            )));
        }

        let candidates = self.store.assignments_on(query.resource, query.date)?;
        debug!(
            resource = %query.resource,
            date = %query.date,
            candidates = candidates.len(),
            "checking assignment conflicts"
        );

        for existing in candidates {
            if Some(existing.id) == query.exclude_id || !existing.state.holds_resources() {
                continue;
            }
            let existing_end = self.effective_end(existing.start, existing.end)?;
            if intervals_overlap(query.start, end, existing.start, existing_end) {
                warn!(
                    resource = %query.resource,
                    conflicting_id = existing.id,
                    conflicting_name = %existing.name,
                    "assignment conflict detected"
                );
                return Ok(ConflictResult::found(ConflictingAssignment {
                    resource: query.resource,
                    assignment_id: existing.id,
                    assignment_name: existing.name,
                    start: existing.start,
                    end: existing_end,
                    group_name: existing.group_name,
                }));
            }
        }
        Ok(ConflictResult::clear())
    }

    pub fn check_vehicle(
        &self,
        vehicle: u64,
        start: NaiveDateTime,
        end: Option<NaiveDateTime>,
        exclude_id: Option<u64>,
    ) -> ShuttleResult<ConflictResult> {
        self.check_conflict(&ConflictQuery {
            exclude_id,
            ..ConflictQuery::new(ResourceRef::Vehicle(vehicle), start, end)
        })
    }

    pub fn check_driver(
        &self,
        driver: u64,
        start: NaiveDateTime,
        end: Option<NaiveDateTime>,
        exclude_id: Option<u64>,
    ) -> ShuttleResult<ConflictResult> {
        self.check_conflict(&ConflictQuery {
            exclude_id,
            ..ConflictQuery::new(ResourceRef::Driver(driver), start, end)
        })
    }

    /// Check the vehicle and the driver in one call. A `None` resource is
    /// reported as clear.
    pub fn check_all_conflicts(
        &self,
        vehicle: Option<u64>,
        driver: Option<u64>,
        date: NaiveDate,
        start: NaiveDateTime,
        end: Option<NaiveDateTime>,
        exclude_id: Option<u64>,
    ) -> ShuttleResult<AllConflicts> {
        let check = |resource: ResourceRef| {
            self.check_conflict(&ConflictQuery {
                resource,
                date,
                start,
                end,
                exclude_id,
            })
        };

        let vehicle = match vehicle {
            Some(id) => check(ResourceRef::Vehicle(id))?,
            None => ConflictResult::clear(),
        };
        let driver = match driver {
            Some(id) => check(ResourceRef::Driver(id))?,
            None => ConflictResult::clear(),
        };
        Ok(AllConflicts { vehicle, driver })
    }

    /// Re-check an existing assignment against everything else on its date.
    /// Cancelled assignments always pass.
    pub fn validate_assignment(&self, assignment: &Assignment) -> ShuttleResult<()> {
        if !assignment.state.holds_resources() {
            return Ok(());
        }
        if assignment.vehicle.is_none() && assignment.driver.is_none() {
            return Ok(());
        }
        self.check_all_conflicts(
            assignment.vehicle,
            assignment.driver,
            assignment.date,
            assignment.start,
            assignment.end,
            Some(assignment.id),
        )?
        .ensure_clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::{AssignmentState, InMemoryAssignmentStore};

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 10)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    /// Assignment A: vehicle 7, driver 3, 09:00-10:00.
    fn setup() -> (Arc<InMemoryAssignmentStore>, ConflictDetector) {
        let store = Arc::new(InMemoryAssignmentStore::new());
        store.upsert(
            Assignment::new(1, "Morning pickup", at(9, 0), Some(at(10, 0)))
                .with_vehicle(7)
                .with_driver(3)
                .with_group("School A"),
        );
        let detector = ConflictDetector::new(store.clone());
        (store, detector)
    }

    #[test]
    fn test_touching_boundary_is_not_a_conflict() {
        let (_store, detector) = setup();
        let result = detector.check_vehicle(7, at(10, 0), Some(at(11, 0)), None).unwrap();
        assert!(!result.has_conflict());
        assert!(result.conflicting().is_none());

        let before = detector.check_vehicle(7, at(8, 0), Some(at(9, 0)), None).unwrap();
        assert!(!before.has_conflict());
    }

    #[test]
    fn test_overlap_returns_existing_assignment() {
        let (_store, detector) = setup();
        let result = detector.check_vehicle(7, at(9, 30), Some(at(10, 30)), None).unwrap();
        assert!(result.has_conflict());
        let conflict = result.conflicting().unwrap();
        assert_eq!(conflict.assignment_id, 1);
        assert_eq!(conflict.assignment_name, "Morning pickup");
        assert_eq!(conflict.end, at(10, 0));
        assert_eq!(conflict.group_name.as_deref(), Some("School A"));
    }

    #[test]
    fn test_exclude_id_skips_self() {
        let (_store, detector) = setup();
        let result = detector
            .check_vehicle(7, at(9, 0), Some(at(10, 0)), Some(1))
            .unwrap();
        assert!(!result.has_conflict());
    }

    #[test]
    fn test_other_resources_and_dates_ignored() {
        let (_store, detector) = setup();
        assert!(!detector.check_vehicle(8, at(9, 30), None, None).unwrap().has_conflict());
        let next_day = NaiveDate::from_ymd_opt(2025, 3, 11).unwrap().and_hms_opt(9, 30, 0).unwrap();
        assert!(!detector.check_vehicle(7, next_day, None, None).unwrap().has_conflict());
    }

    #[test]
    fn test_cancelled_assignments_hold_nothing() {
        let (store, detector) = setup();
        store.upsert(store.get(1).unwrap().with_state(AssignmentState::Cancelled));
        assert!(!detector.check_vehicle(7, at(9, 30), None, None).unwrap().has_conflict());
    }

    #[test]
    fn test_missing_end_uses_default_duration() {
        let (store, detector) = setup();
        store.upsert(Assignment::new(2, "Afternoon", at(13, 0), None).with_vehicle(7));

        // 13:00 + 2h covers 14:59 but not 15:00.
        assert!(detector.check_vehicle(7, at(14, 59), Some(at(15, 30)), None).unwrap().has_conflict());
        assert!(!detector.check_vehicle(7, at(15, 0), Some(at(15, 30)), None).unwrap().has_conflict());

        // Query without an end runs 11:30-13:30.
        let result = detector.check_vehicle(7, at(11, 30), None, None).unwrap();
        assert_eq!(result.conflicting().unwrap().assignment_id, 2);
    }

    #[test]
    fn test_configured_default_duration() {
        let store = Arc::new(InMemoryAssignmentStore::new());
        store.upsert(Assignment::new(1, "Short hop", at(9, 0), None).with_driver(3));
        let settings = SchedulingSettings {
            default_trip_duration_minutes: 30,
        };
        let detector = ConflictDetector::from_settings(store, &settings).unwrap();
        assert_eq!(detector.default_duration(), Duration::minutes(30));
        assert!(!detector.check_driver(3, at(9, 30), None, None).unwrap().has_conflict());

        let bad = SchedulingSettings {
            default_trip_duration_minutes: 0,
        };
        let store = Arc::new(InMemoryAssignmentStore::new());
        assert!(matches!(
            ConflictDetector::from_settings(store, &bad),
            Err(ShuttleError::Config(_))
        ));
    }

    #[test]
    fn test_default_end_past_calendar_rejected() {
        let (_store, detector) = setup();
        let last_evening = NaiveDate::MAX.and_hms_opt(23, 0, 0).unwrap();
        let err = detector.check_vehicle(7, last_evening, None, None).unwrap_err();
        assert!(matches!(err, ShuttleError::Validation(_)));

        let with_end = detector
            .check_vehicle(7, last_evening, Some(NaiveDate::MAX.and_hms_opt(23, 30, 0).unwrap()), None)
            .unwrap();
        assert!(!with_end.has_conflict());
    }

    #[test]
    fn test_empty_interval_rejected() {
        let (_store, detector) = setup();
        let err = detector.check_vehicle(7, at(10, 0), Some(at(9, 0)), None).unwrap_err();
        assert!(matches!(err, ShuttleError::Validation(_)));
    }

    #[test]
    fn test_check_all_sets_independent_flags() {
        let (store, detector) = setup();
        store.upsert(Assignment::new(2, "Other driver", at(9, 0), Some(at(10, 0))).with_driver(4));

        let all = detector
            .check_all_conflicts(Some(8), Some(4), at(0, 0).date(), at(9, 15), Some(at(9, 45)), None)
            .unwrap();
        assert!(!all.has_vehicle_conflict());
        assert!(all.has_driver_conflict());
        assert_eq!(all.driver.conflicting().unwrap().resource, ResourceRef::Driver(4));

        let both = detector
            .check_all_conflicts(Some(7), Some(3), at(0, 0).date(), at(9, 15), Some(at(9, 45)), None)
            .unwrap();
        assert!(both.has_vehicle_conflict() && both.has_driver_conflict());

        let none = detector
            .check_all_conflicts(None, None, at(0, 0).date(), at(9, 15), None, None)
            .unwrap();
        assert!(!none.has_any());
    }

    #[test]
    fn test_ensure_clear_reports_vehicle_first() {
        let (_store, detector) = setup();
        let all = detector
            .check_all_conflicts(Some(7), Some(3), at(0, 0).date(), at(9, 15), None, None)
            .unwrap();
        match all.ensure_clear() {
            Err(ShuttleError::ConflictDetected {
                resource,
                assignment_id,
                start,
                end,
                ..
            }) => {
                assert_eq!(resource, "vehicle #7");
                assert_eq!(assignment_id, 1);
                assert_eq!(start, at(9, 0));
                assert_eq!(end, at(10, 0));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_assignment() {
        let (store, detector) = setup();
        let existing = store.get(1).unwrap();
        detector.validate_assignment(&existing).unwrap();

        let clash = Assignment::new(2, "Double booked", at(9, 45), Some(at(10, 15))).with_driver(3);
        assert!(matches!(
            detector.validate_assignment(&clash),
            Err(ShuttleError::ConflictDetected { .. })
        ));

        let cancelled = clash.clone().with_state(AssignmentState::Cancelled);
        detector.validate_assignment(&cancelled).unwrap();
    }
}
