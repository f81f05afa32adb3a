use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::ledger::ActivityLedger;
use crate::reconcile::Correction;

/// A named ordered sequence of activities belonging to one child.
///
/// `total_activities` is a cached count that the persisted row also carries.
/// Every method that changes the sequence keeps it equal to the ledger length.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Routine {
    pub id: i64,
    pub child_id: i64,
    pub name: String,
    activities: ActivityLedger,
    pub schedule_time: Option<String>,
    total_activities: usize,
    pub updated_at: i64,
}

impl Routine {
    pub fn new<I, S>(child_id: i64, name: &str, activities: I, schedule_time: Option<String>, now: i64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let activities = ActivityLedger::from_names(activities);
        Self {
            id: 0,
            child_id,
            name: name.trim().to_string(),
            total_activities: activities.len(),
            activities,
            schedule_time,
            updated_at: now,
        }
    }

    /// Decode a persisted row. The cached count is re-derived from the ledger;
    /// compare with [`RoutineRecord::count_correction`] to see whether it drifted.
    pub fn from_record(record: &RoutineRecord) -> Result<Self, LedgerError> {
        let activities = ActivityLedger::parse(&record.activities_json)?;
        Ok(Self {
            id: record.id,
            child_id: record.child_id,
            name: record.name.clone(),
            total_activities: activities.len(),
            activities,
            schedule_time: record.schedule_time.clone(),
            updated_at: record.updated_at,
        })
    }

    pub fn to_record(&self) -> Result<RoutineRecord, LedgerError> {
        Ok(RoutineRecord {
            id: self.id,
            child_id: self.child_id,
            name: self.name.clone(),
            activities_json: self.activities.to_json()?,
            total_activities: self.total_activities as i64,
            schedule_time: self.schedule_time.clone(),
            updated_at: self.updated_at,
        })
    }

    pub fn activities(&self) -> &ActivityLedger {
        &self.activities
    }

    pub fn total_activities(&self) -> usize {
        self.total_activities
    }

    /// Append an activity to the end of the routine.
    pub fn add_activity(&mut self, name: &str, now: i64) -> Option<usize> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let position = self.activities.push(name);
        self.total_activities = self.activities.len();
        self.updated_at = now;
        Some(position)
    }

    /// Mark an activity complete; see [`ActivityLedger::mark_complete`].
    pub fn mark_complete(&mut self, index: usize, now: i64) -> Result<bool, LedgerError> {
        let changed = self.activities.mark_complete(index, now)?;
        if changed {
            self.updated_at = now;
        }
        Ok(changed)
    }

    /// Clear every completion flag ahead of a fresh session.
    pub fn reset_progress(&mut self, now: i64) {
        self.activities.reset();
        self.updated_at = now;
    }
}

/// The persisted shape of a routine row, as the storage collaborator sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineRecord {
    pub id: i64,
    pub child_id: i64,
    pub name: String,
    /// Ordered JSON list of `{name, completed}` pairs.
    pub activities_json: String,
    pub total_activities: i64,
    pub schedule_time: Option<String>,
    pub updated_at: i64,
}

impl RoutineRecord {
    /// Report a cached count that disagrees with the decoded ledger.
    pub fn count_correction(&self, routine: &Routine) -> Option<Correction> {
        let actual = routine.activities().len();
        if self.total_activities != actual as i64 {
            Some(Correction::TotalActivities {
                cached: self.total_activities,
                actual,
            })
        } else {
            None
        }
    }
}
