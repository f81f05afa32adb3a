use rainbow_core::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("routine {0} not found")]
    RoutineNotFound(i64),

    #[error("session {0} not found")]
    SessionNotFound(i64),

    #[error("routine {routine_id} has an unreadable activity ledger: {source}")]
    Ledger {
        routine_id: i64,
        #[source]
        source: LedgerError,
    },

    #[error("activity {index} is out of range for routine {routine_id} ({len} activities)")]
    ActivityOutOfRange { routine_id: i64, index: usize, len: usize },

    #[error("invalid routine: {0}")]
    InvalidRoutine(String),

    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}
