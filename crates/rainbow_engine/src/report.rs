use serde::Serialize;

use rainbow_core::{Correction, Outcome, SessionSnapshot};
use rainbow_intent::Intent;

/// What a transition or reconciliation returns to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub snapshot: SessionSnapshot,
    pub outcome: Outcome,
    /// Drift that was found and corrected along the way.
    pub repairs: Vec<Correction>,
    /// Set when the routine's ledger could not be read. Nothing was persisted.
    pub ledger_error: Option<String>,
}

impl SessionReport {
    pub fn needs_repair(&self) -> bool {
        self.ledger_error.is_some()
    }
}

/// One chat turn: the classified intent and, when it was acted on, the result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub intent: Intent,
    pub report: Option<SessionReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub session_id: i64,
    pub error: String,
}

/// Summary of an offline repair pass over all in-progress sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub examined: usize,
    pub repaired: usize,
    pub unchanged: usize,
    /// Sessions whose routine ledger is unreadable.
    pub needs_repair: Vec<i64>,
    pub failed: Vec<BatchFailure>,
}
