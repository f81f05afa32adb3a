//! Session State Machine
//!
//! `not_started → in_progress → completed`. These functions are the pure
//! transition rules; persistence wraps around them in the engine.

use serde::Serialize;

use crate::error::LedgerError;
use crate::reconcile::{reconcile, Correction};
use crate::routine::Routine;
use crate::session::RoutineSession;

/// How a request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// A new session was created.
    Started,
    /// An in-progress session already existed and was returned instead.
    Resumed,
    ActivityCompleted { activity_index: usize },
    /// The activity was already done; nothing changed.
    ActivityAlreadyComplete { activity_index: usize },
    /// The session is completed; mutations are no-ops.
    AlreadyTerminal,
    /// Standalone reconciliation found and fixed drift.
    Reconciled,
    /// Standalone reconciliation found nothing to fix.
    Consistent,
    /// The routine's ledger could not be read; the session needs repair.
    LedgerUnreadable,
}

/// Result of applying one completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub outcome: Outcome,
    pub session: RoutineSession,
    /// Drift found in the stored session before the transition was applied.
    pub repairs: Vec<Correction>,
    /// Whether the routine's ledger changed and must be written back.
    pub ledger_changed: bool,
}

/// Begin a fresh session: clear the ledger and create the session.
pub fn start(routine: &mut Routine, now: i64) -> RoutineSession {
    routine.reset_progress(now);
    RoutineSession::start(routine, now)
}

/// Complete `index` within `session`, then re-derive the session from the ledger.
///
/// Only an out-of-range index is an error. Completed sessions and
/// already-completed activities come back unchanged.
pub fn complete(
    routine: &mut Routine,
    session: &RoutineSession,
    index: usize,
    now: i64,
) -> Result<Step, LedgerError> {
    if session.status.is_terminal() {
        return Ok(Step {
            outcome: Outcome::AlreadyTerminal,
            session: session.clone(),
            repairs: Vec::new(),
            ledger_changed: false,
        });
    }

    let before = reconcile(session, routine.activities(), now);
    if before.session.status.is_terminal() {
        return Ok(Step {
            outcome: Outcome::AlreadyTerminal,
            session: before.session,
            repairs: before.corrections,
            ledger_changed: false,
        });
    }

    if !routine.mark_complete(index, now)? {
        return Ok(Step {
            outcome: Outcome::ActivityAlreadyComplete { activity_index: index },
            session: before.session,
            repairs: before.corrections,
            ledger_changed: false,
        });
    }

    let after = reconcile(&before.session, routine.activities(), now);
    Ok(Step {
        outcome: Outcome::ActivityCompleted { activity_index: index },
        session: after.session,
        repairs: before.corrections,
        ledger_changed: true,
    })
}
