pub mod config;
pub mod error;
pub mod ledger;
pub mod machine;
pub mod reconcile;
pub mod routine;
pub mod session;
pub mod store;

pub use config::{ClassifierConfig, RainbowConfig, StorageConfig, DEFAULT_MATCH_THRESHOLD};
pub use error::LedgerError;
pub use ledger::{normalize_name, Activity, ActivityLedger};
pub use machine::{Outcome, Step};
pub use reconcile::{reconcile, reconcile_unreadable, Correction, LedgerTally, Reconciliation};
pub use routine::{Routine, RoutineRecord};
pub use session::{ProgressMilestone, RoutineSession, SessionSnapshot, SessionStatus, SessionView};
pub use store::{CompletionEntry, MemoryStore, RoutineStore, WriteSet};

/// Current wall-clock time as unix seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
