use chrono::NaiveTime;
use std::sync::Arc;

use rainbow_core::machine::{self, Outcome};
use rainbow_core::{
    reconcile, reconcile_unreadable, unix_now, ClassifierConfig, CompletionEntry, Correction, LedgerError, Routine,
    RoutineRecord, RoutineSession, RoutineStore, SessionStatus, SessionView, WriteSet,
};
use rainbow_intent::{ChildContext, Intent, IntentClassifier};

use crate::error::EngineError;
use crate::report::{BatchFailure, BatchReport, SessionReport, Turn};

/// Drives routine sessions for every child behind one storage collaborator.
///
/// Transitions on the same session must be serialized by the caller; the
/// engine holds no locks of its own. Classification only reads.
pub struct RoutineEngine {
    store: Arc<dyn RoutineStore>,
    classifier: IntentClassifier,
}

impl RoutineEngine {
    pub fn new(store: Arc<dyn RoutineStore>, config: &ClassifierConfig) -> Self {
        Self::with_classifier(store, IntentClassifier::with_defaults(config))
    }

    pub fn with_classifier(store: Arc<dyn RoutineStore>, classifier: IntentClassifier) -> Self {
        Self { store, classifier }
    }

    // ========================================================================
    // Chat path
    // ========================================================================

    /// Everything the classifier may look at for `child_id`. Routines whose
    /// ledger cannot be read are left out.
    pub async fn child_context(&self, child_id: i64) -> Result<ChildContext, EngineError> {
        let mut routines = Vec::new();
        for record in self.store.routines_for_child(child_id).await? {
            match Routine::from_record(&record) {
                Ok(routine) => routines.push(routine),
                Err(e) => tracing::warn!("Skipping routine {} for classification: {}", record.id, e),
            }
        }
        let sessions = self
            .store
            .sessions_for_child(child_id, SessionStatus::InProgress)
            .await?;
        Ok(ChildContext { routines, sessions })
    }

    pub async fn classify(&self, utterance: &str, child_id: i64) -> Result<Intent, EngineError> {
        let context = self.child_context(child_id).await?;
        Ok(self.classifier.classify(utterance, &context))
    }

    /// Classify, then apply the transition the intent asks for. Create
    /// requests and unmatched starts are returned for the caller to follow up.
    pub async fn handle(&self, utterance: &str, child_id: i64) -> Result<Turn, EngineError> {
        let intent = self.classify(utterance, child_id).await?;
        let report = match &intent {
            Intent::CompleteActivity(target) => {
                Some(self.complete_activity(target.session_id, target.activity_index).await?)
            }
            Intent::StartRoutine { routine_id: Some(routine_id), .. } => {
                Some(self.start_session(*routine_id).await?)
            }
            Intent::StartRoutine { routine_id: None, .. }
            | Intent::CreateRoutine(_)
            | Intent::AchievementSharing
            | Intent::None => None,
        };
        Ok(Turn { intent, report })
    }

    // ========================================================================
    // Routines
    // ========================================================================

    /// Create and persist a routine. `schedule_time` must be `HH:MM`.
    pub async fn create_routine<S: AsRef<str>>(
        &self,
        child_id: i64,
        name: &str,
        activities: &[S],
        schedule_time: Option<&str>,
    ) -> Result<Routine, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::InvalidRoutine("routine name is empty".to_string()));
        }
        let schedule_time = schedule_time
            .map(|t| {
                NaiveTime::parse_from_str(t.trim(), "%H:%M")
                    .map(|parsed| parsed.format("%H:%M").to_string())
                    .map_err(|_| EngineError::InvalidRoutine(format!("schedule time '{}' is not HH:MM", t)))
            })
            .transpose()?;

        let mut routine = Routine::new(child_id, name, activities, schedule_time, unix_now());
        let record = routine
            .to_record()
            .map_err(|source| EngineError::Ledger { routine_id: 0, source })?;
        routine.id = self.store.save_routine(&record).await?;
        tracing::info!(
            "Created routine {} '{}' for child {} with {} activities",
            routine.id,
            routine.name,
            child_id,
            routine.total_activities()
        );
        Ok(routine)
    }

    /// Append an activity to `routine_id`. The child's open session, if any,
    /// is re-derived against the longer ledger in the same commit.
    pub async fn add_activity(&self, routine_id: i64, name: &str) -> Result<Routine, EngineError> {
        let record = self.load_routine(routine_id).await?;
        let mut routine =
            Routine::from_record(&record).map_err(|source| EngineError::Ledger { routine_id, source })?;
        let now = unix_now();
        let position = routine
            .add_activity(name, now)
            .ok_or_else(|| EngineError::InvalidRoutine("activity name is empty".to_string()))?;
        let updated = encode(&routine)?;

        match self.store.active_session(routine.child_id, routine_id).await? {
            Some(open) => {
                let fixed = reconcile(&open, routine.activities(), now);
                self.store
                    .commit(WriteSet {
                        routine: Some(&updated),
                        session: &fixed.session,
                        completion: None,
                    })
                    .await?;
                tracing::debug!("Session {} re-derived after append: {:?}", open.id, fixed.corrections);
            }
            None => {
                self.store.save_routine(&updated).await?;
            }
        }
        tracing::info!("Added activity {} '{}' to routine {}", position, name.trim(), routine_id);
        Ok(routine)
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Start `routine_id` for its child, or resume the child's open session.
    pub async fn start_session(&self, routine_id: i64) -> Result<SessionReport, EngineError> {
        let record = self.load_routine(routine_id).await?;
        let mut routine =
            Routine::from_record(&record).map_err(|source| EngineError::Ledger { routine_id, source })?;
        let mut repairs: Vec<Correction> = record.count_correction(&routine).into_iter().collect();
        let now = unix_now();

        if let Some(existing) = self.store.active_session(routine.child_id, routine_id).await? {
            let fixed = reconcile(&existing, routine.activities(), now);
            repairs.extend(fixed.corrections);
            if !repairs.is_empty() {
                let fixed_record = (!record_is_current(&record, &routine))
                    .then(|| encode(&routine))
                    .transpose()?;
                self.store
                    .commit(WriteSet {
                        routine: fixed_record.as_ref(),
                        session: &fixed.session,
                        completion: None,
                    })
                    .await?;
                tracing::warn!("Repaired session {} on resume: {:?}", existing.id, repairs);
            }
            tracing::info!("Resumed session {} of routine {}", existing.id, routine_id);
            return Ok(report(&fixed.session, Outcome::Resumed, repairs, None));
        }

        let mut session = machine::start(&mut routine, now);
        let fresh_record = encode(&routine)?;
        session.id = self
            .store
            .commit(WriteSet {
                routine: Some(&fresh_record),
                session: &session,
                completion: None,
            })
            .await?;
        tracing::info!(
            "Started session {} of routine {} for child {} ({})",
            session.id,
            routine_id,
            routine.child_id,
            session.status.as_str()
        );
        Ok(report(&session, Outcome::Started, repairs, None))
    }

    /// Mark `activity_index` complete within `session_id` and re-derive the session.
    pub async fn complete_activity(&self, session_id: i64, activity_index: usize) -> Result<SessionReport, EngineError> {
        let session = self.load_session(session_id).await?;
        if session.status.is_terminal() {
            tracing::debug!("Session {} is completed, ignoring activity {}", session_id, activity_index);
            return Ok(report(&session, Outcome::AlreadyTerminal, Vec::new(), None));
        }
        let record = self.load_routine(session.routine_id).await?;
        let mut routine = match Routine::from_record(&record) {
            Ok(routine) => routine,
            Err(e) => return Ok(self.unreadable(&session, &e)),
        };
        let mut repairs: Vec<Correction> = record.count_correction(&routine).into_iter().collect();
        let now = unix_now();

        let step = machine::complete(&mut routine, &session, activity_index, now).map_err(|e| match e {
            LedgerError::OutOfRange { index, len } => EngineError::ActivityOutOfRange {
                routine_id: routine.id,
                index,
                len,
            },
            source => EngineError::Ledger { routine_id: routine.id, source },
        })?;
        repairs.extend(step.repairs);

        if step.ledger_changed || step.session != session || !repairs.is_empty() {
            let routine_record = (step.ledger_changed || !record_is_current(&record, &routine))
                .then(|| encode(&routine))
                .transpose()?;
            let completion = match step.outcome {
                Outcome::ActivityCompleted { activity_index } => {
                    routine.activities().get(activity_index).map(|activity| CompletionEntry {
                        child_id: session.child_id,
                        routine_id: routine.id,
                        activity_name: activity.name.clone(),
                        completed_at: now,
                    })
                }
                _ => None,
            };
            self.store
                .commit(WriteSet {
                    routine: routine_record.as_ref(),
                    session: &step.session,
                    completion: completion.as_ref(),
                })
                .await?;
        }

        if !repairs.is_empty() {
            tracing::warn!("Session {} had drifted; repaired {:?}", session_id, repairs);
        }
        match step.outcome {
            Outcome::ActivityCompleted { activity_index } => tracing::info!(
                "Session {}: activity {} complete, progress {:.2}% ({})",
                session_id,
                activity_index,
                step.session.progress,
                step.session.status.as_str()
            ),
            other => tracing::debug!("Session {}: {:?}, nothing to apply", session_id, other),
        }
        Ok(report(&step.session, step.outcome, repairs, None))
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Re-derive one session from its ledger and persist any correction.
    pub async fn reconcile(&self, session_id: i64) -> Result<SessionReport, EngineError> {
        let session = self.load_session(session_id).await?;
        let record = self.load_routine(session.routine_id).await?;
        let routine = match Routine::from_record(&record) {
            Ok(routine) => routine,
            Err(e) => return Ok(self.unreadable(&session, &e)),
        };

        let mut repairs: Vec<Correction> = record.count_correction(&routine).into_iter().collect();
        let fixed = reconcile(&session, routine.activities(), unix_now());
        repairs.extend(fixed.corrections);

        if repairs.is_empty() {
            return Ok(report(&fixed.session, Outcome::Consistent, repairs, None));
        }
        let routine_record = (!record_is_current(&record, &routine))
            .then(|| encode(&routine))
            .transpose()?;
        self.store
            .commit(WriteSet {
                routine: routine_record.as_ref(),
                session: &fixed.session,
                completion: None,
            })
            .await?;
        tracing::warn!("Reconciled session {}: {:?}", session_id, repairs);
        Ok(report(&fixed.session, Outcome::Reconciled, repairs, None))
    }

    /// Reconcile every in-progress session. Each one is its own transaction;
    /// a failure is recorded and the pass moves on.
    pub async fn reconcile_all(&self) -> Result<BatchReport, EngineError> {
        let ids = self.store.session_ids_with_status(SessionStatus::InProgress).await?;
        let mut batch = BatchReport {
            examined: ids.len(),
            ..Default::default()
        };

        for session_id in ids {
            match self.reconcile(session_id).await {
                Ok(r) if r.needs_repair() => batch.needs_repair.push(session_id),
                Ok(r) if r.repairs.is_empty() => batch.unchanged += 1,
                Ok(_) => batch.repaired += 1,
                Err(e) => {
                    tracing::error!("Failed to reconcile session {}: {}", session_id, e);
                    batch.failed.push(BatchFailure {
                        session_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Batch reconcile: {} examined, {} repaired, {} unchanged, {} need repair, {} failed",
            batch.examined,
            batch.repaired,
            batch.unchanged,
            batch.needs_repair.len(),
            batch.failed.len()
        );
        Ok(batch)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn session_view(&self, session_id: i64) -> Result<SessionView, EngineError> {
        let session = self.load_session(session_id).await?;
        let record = self.load_routine(session.routine_id).await?;
        let routine = Routine::from_record(&record).map_err(|source| EngineError::Ledger {
            routine_id: record.id,
            source,
        })?;
        Ok(SessionView::new(&session, &routine))
    }

    pub async fn completion_log(&self, child_id: i64) -> Result<Vec<CompletionEntry>, EngineError> {
        Ok(self.store.completion_log(child_id).await?)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn load_routine(&self, routine_id: i64) -> Result<RoutineRecord, EngineError> {
        self.store
            .load_routine(routine_id)
            .await?
            .ok_or(EngineError::RoutineNotFound(routine_id))
    }

    async fn load_session(&self, session_id: i64) -> Result<RoutineSession, EngineError> {
        self.store
            .load_session(session_id)
            .await?
            .ok_or(EngineError::SessionNotFound(session_id))
    }

    /// Report a session whose ledger cannot be read. Nothing is persisted.
    fn unreadable(&self, session: &RoutineSession, error: &LedgerError) -> SessionReport {
        let flagged = reconcile_unreadable(session, error);
        tracing::warn!(
            "Session {} needs repair: routine {} ledger unreadable ({})",
            session.id,
            session.routine_id,
            error
        );
        report(&flagged.session, Outcome::LedgerUnreadable, flagged.corrections, flagged.ledger_error)
    }
}

fn report(
    session: &RoutineSession,
    outcome: Outcome,
    repairs: Vec<Correction>,
    ledger_error: Option<String>,
) -> SessionReport {
    SessionReport {
        snapshot: session.snapshot(),
        outcome,
        repairs,
        ledger_error,
    }
}

fn encode(routine: &Routine) -> Result<RoutineRecord, EngineError> {
    routine.to_record().map_err(|source| EngineError::Ledger {
        routine_id: routine.id,
        source,
    })
}

/// Whether the stored row already carries the routine's cached count.
fn record_is_current(record: &RoutineRecord, routine: &Routine) -> bool {
    record.count_correction(routine).is_none()
}
