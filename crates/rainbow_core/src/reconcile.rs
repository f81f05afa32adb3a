//! Progress Reconciler
//!
//! Re-derives a session's `status`, `progress` and `current_activity` from
//! the activity ledger's completion flags alone. The function is pure: the
//! caller decides whether the corrected session gets written back.
//!
//! Completed sessions are terminal: `status` and `completed_at` never change,
//! and their derived fields are pinned to `100%` on the last activity
//! without consulting the ledger, which a later start may have reset. That
//! also keeps an empty routine's `completed / 100%` session stable.

use serde::Serialize;

use crate::error::LedgerError;
use crate::ledger::ActivityLedger;
use crate::session::{RoutineSession, SessionStatus};

/// Progress values closer than this are considered equal.
pub const PROGRESS_EPSILON: f64 = 1e-6;

/// One field the reconciler had to change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum Correction {
    Status { from: SessionStatus, to: SessionStatus },
    Progress { from: f64, to: f64 },
    CurrentActivity { from: usize, to: usize },
    TotalActivities { cached: i64, actual: usize },
}

/// Counts derived from a ledger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerTally {
    pub total: usize,
    pub completed: usize,
    pub first_incomplete: Option<usize>,
}

impl LedgerTally {
    pub fn of(ledger: &ActivityLedger) -> Self {
        Self {
            total: ledger.len(),
            completed: ledger.completed_count(),
            first_incomplete: ledger.first_incomplete(),
        }
    }

    /// `completed / total * 100`, or 0 for an empty ledger.
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64 * 100.0
        }
    }

    pub fn current_activity(&self) -> usize {
        self.first_incomplete
            .unwrap_or_else(|| self.total.saturating_sub(1))
    }

    pub fn all_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// The session with derived fields restored.
    pub session: RoutineSession,
    pub corrections: Vec<Correction>,
    /// Set when the ledger could not be read; the session needs manual repair.
    pub ledger_error: Option<String>,
}

impl Reconciliation {
    pub fn changed(&self) -> bool {
        !self.corrections.is_empty()
    }

    pub fn needs_repair(&self) -> bool {
        self.ledger_error.is_some()
    }
}

/// Restore the derived fields of `session` from `ledger`.
pub fn reconcile(session: &RoutineSession, ledger: &ActivityLedger, now: i64) -> Reconciliation {
    let tally = LedgerTally::of(ledger);
    if session.status.is_terminal() {
        return derive(session, session.status, 100.0, tally.total.saturating_sub(1));
    }
    let status = if tally.all_complete() {
        SessionStatus::Completed
    } else {
        SessionStatus::InProgress
    };
    let mut fixed = derive(session, status, tally.progress(), tally.current_activity());
    if status.is_terminal() && fixed.session.completed_at.is_none() {
        fixed.session.completed_at = Some(now);
    }
    fixed
}

/// Reconcile against a ledger that failed to parse. Nothing is guessed:
/// the completed count is taken as zero and the session is flagged.
pub fn reconcile_unreadable(session: &RoutineSession, error: &LedgerError) -> Reconciliation {
    let reason = Some(error.to_string());
    if session.status.is_terminal() {
        return untouched(session, reason);
    }
    let mut fixed = derive(session, SessionStatus::InProgress, 0.0, 0);
    fixed.ledger_error = reason;
    fixed
}

fn untouched(session: &RoutineSession, ledger_error: Option<String>) -> Reconciliation {
    Reconciliation {
        session: session.clone(),
        corrections: Vec::new(),
        ledger_error,
    }
}

fn derive(session: &RoutineSession, status: SessionStatus, progress: f64, current: usize) -> Reconciliation {
    let mut corrections = Vec::new();
    let mut fixed = session.clone();

    if fixed.status != status {
        corrections.push(Correction::Status { from: fixed.status, to: status });
        fixed.status = status;
    }
    if (fixed.progress - progress).abs() > PROGRESS_EPSILON || !fixed.progress.is_finite() {
        corrections.push(Correction::Progress { from: fixed.progress, to: progress });
        fixed.progress = progress;
    }
    if fixed.current_activity != current {
        corrections.push(Correction::CurrentActivity {
            from: fixed.current_activity,
            to: current,
        });
        fixed.current_activity = current;
    }

    Reconciliation {
        session: fixed,
        corrections,
        ledger_error: None,
    }
}
