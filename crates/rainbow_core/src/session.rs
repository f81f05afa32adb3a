use serde::{Deserialize, Serialize};

use crate::routine::Routine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No session row exists yet.
    NotStarted,
    InProgress,
    /// Terminal. `completed_at` is stamped once on entry.
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "not_started",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(SessionStatus::NotStarted),
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed)
    }
}

/// One execution of a routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineSession {
    pub id: i64,
    pub routine_id: i64,
    pub child_id: i64,
    pub status: SessionStatus,
    /// Lowest-index incomplete activity, or the last index once all are done.
    pub current_activity: usize,
    /// Percentage 0.0-100.0.
    pub progress: f64,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

impl RoutineSession {
    /// A new, unsaved session for `routine`. A routine without activities
    /// has nothing to do, so its session is complete on creation.
    pub fn start(routine: &Routine, now: i64) -> Self {
        let empty = routine.activities().is_empty();
        Self {
            id: 0,
            routine_id: routine.id,
            child_id: routine.child_id,
            status: if empty { SessionStatus::Completed } else { SessionStatus::InProgress },
            current_activity: 0,
            progress: if empty { 100.0 } else { 0.0 },
            started_at: now,
            completed_at: if empty { Some(now) } else { None },
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            status: self.status,
            current_activity: self.current_activity,
            progress: self.progress,
            completed_at: self.completed_at,
        }
    }
}

/// What the engine hands back after every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: i64,
    pub status: SessionStatus,
    pub current_activity: usize,
    pub progress: f64,
    pub completed_at: Option<i64>,
}

/// Coarse progress tier, for callers that celebrate milestones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressMilestone {
    Starting,
    UnderWay,
    Halfway,
    AlmostDone,
    Finished,
}

impl ProgressMilestone {
    pub fn from_progress(progress: f64) -> Self {
        if progress >= 100.0 {
            ProgressMilestone::Finished
        } else if progress >= 75.0 {
            ProgressMilestone::AlmostDone
        } else if progress >= 50.0 {
            ProgressMilestone::Halfway
        } else if progress >= 25.0 {
            ProgressMilestone::UnderWay
        } else {
            ProgressMilestone::Starting
        }
    }
}

/// A snapshot joined with the routine details a reply needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub snapshot: SessionSnapshot,
    pub routine_id: i64,
    pub routine_name: String,
    /// `None` once the session is completed.
    pub current_activity_name: Option<String>,
    pub completed_count: usize,
    pub total_activities: usize,
    pub milestone: ProgressMilestone,
}

impl SessionView {
    pub fn new(session: &RoutineSession, routine: &Routine) -> Self {
        let current_activity_name = if session.status.is_terminal() {
            None
        } else {
            routine
                .activities()
                .get(session.current_activity)
                .map(|a| a.name.clone())
        };
        Self {
            snapshot: session.snapshot(),
            routine_id: routine.id,
            routine_name: routine.name.clone(),
            current_activity_name,
            completed_count: routine.activities().completed_count(),
            total_activities: routine.total_activities(),
            milestone: ProgressMilestone::from_progress(session.progress),
        }
    }
}
