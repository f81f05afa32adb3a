//! Storage collaborator contract, plus an in-memory implementation for tests
//! and embedding.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::routine::RoutineRecord;
use crate::session::{RoutineSession, SessionStatus};

/// One applied activity completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEntry {
    pub child_id: i64,
    pub routine_id: i64,
    pub activity_name: String,
    pub completed_at: i64,
}

/// Everything one transition writes. Applied atomically.
#[derive(Debug, Clone, Copy)]
pub struct WriteSet<'a> {
    pub routine: Option<&'a RoutineRecord>,
    /// Inserted when `id == 0`, replaced otherwise.
    pub session: &'a RoutineSession,
    pub completion: Option<&'a CompletionEntry>,
}

#[async_trait]
pub trait RoutineStore: Send + Sync {
    async fn load_routine(&self, routine_id: i64) -> Result<Option<RoutineRecord>>;
    async fn routines_for_child(&self, child_id: i64) -> Result<Vec<RoutineRecord>>;
    /// Insert (`id == 0`) or replace a routine. Returns its id.
    async fn save_routine(&self, record: &RoutineRecord) -> Result<i64>;

    async fn load_session(&self, session_id: i64) -> Result<Option<RoutineSession>>;
    /// Most recent in-progress session of `child_id` for `routine_id`.
    async fn active_session(&self, child_id: i64, routine_id: i64) -> Result<Option<RoutineSession>>;
    async fn sessions_for_child(&self, child_id: i64, status: SessionStatus) -> Result<Vec<RoutineSession>>;
    async fn session_ids_with_status(&self, status: SessionStatus) -> Result<Vec<i64>>;

    /// Apply a write set in one transaction. Returns the session id.
    async fn commit(&self, writes: WriteSet<'_>) -> Result<i64>;

    async fn completion_log(&self, child_id: i64) -> Result<Vec<CompletionEntry>>;
}

#[derive(Default)]
struct Tables {
    routines: BTreeMap<i64, RoutineRecord>,
    sessions: BTreeMap<i64, RoutineSession>,
    completions: Vec<CompletionEntry>,
    last_routine_id: i64,
    last_session_id: i64,
}

/// A `RoutineStore` kept entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a session row as-is, bypassing the engine.
    pub async fn put_session(&self, session: RoutineSession) {
        let mut tables = self.tables.write().await;
        tables.last_session_id = tables.last_session_id.max(session.id);
        tables.sessions.insert(session.id, session);
    }
}

#[async_trait]
impl RoutineStore for MemoryStore {
    async fn load_routine(&self, routine_id: i64) -> Result<Option<RoutineRecord>> {
        Ok(self.tables.read().await.routines.get(&routine_id).cloned())
    }

    async fn routines_for_child(&self, child_id: i64) -> Result<Vec<RoutineRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .routines
            .values()
            .filter(|r| r.child_id == child_id)
            .cloned()
            .collect())
    }

    async fn save_routine(&self, record: &RoutineRecord) -> Result<i64> {
        let mut tables = self.tables.write().await;
        let id = if record.id == 0 {
            tables.last_routine_id += 1;
            tables.last_routine_id
        } else {
            tables.last_routine_id = tables.last_routine_id.max(record.id);
            record.id
        };
        let mut stored = record.clone();
        stored.id = id;
        tables.routines.insert(id, stored);
        Ok(id)
    }

    async fn load_session(&self, session_id: i64) -> Result<Option<RoutineSession>> {
        Ok(self.tables.read().await.sessions.get(&session_id).cloned())
    }

    async fn active_session(&self, child_id: i64, routine_id: i64) -> Result<Option<RoutineSession>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| {
                s.child_id == child_id
                    && s.routine_id == routine_id
                    && s.status == SessionStatus::InProgress
            })
            .max_by_key(|s| (s.started_at, s.id))
            .cloned())
    }

    async fn sessions_for_child(&self, child_id: i64, status: SessionStatus) -> Result<Vec<RoutineSession>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| s.child_id == child_id && s.status == status)
            .cloned()
            .collect())
    }

    async fn session_ids_with_status(&self, status: SessionStatus) -> Result<Vec<i64>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| s.status == status)
            .map(|s| s.id)
            .collect())
    }

    async fn commit(&self, writes: WriteSet<'_>) -> Result<i64> {
        let mut tables = self.tables.write().await;
        if let Some(routine) = writes.routine {
            tables
                .routines
                .get(&routine.id)
                .with_context(|| format!("Routine {} does not exist", routine.id))?;
        }
        if writes.session.id != 0 && !tables.sessions.contains_key(&writes.session.id) {
            anyhow::bail!("Session {} does not exist", writes.session.id);
        }

        if let Some(routine) = writes.routine {
            tables.routines.insert(routine.id, routine.clone());
        }
        let mut session = writes.session.clone();
        if session.id == 0 {
            tables.last_session_id += 1;
            session.id = tables.last_session_id;
        }
        let id = session.id;
        tables.sessions.insert(id, session);
        if let Some(entry) = writes.completion {
            tables.completions.push(entry.clone());
        }
        Ok(id)
    }

    async fn completion_log(&self, child_id: i64) -> Result<Vec<CompletionEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .completions
            .iter()
            .filter(|c| c.child_id == child_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routine::Routine;

    #[tokio::test]
    async fn test_save_routine_assigns_ids() {
        let store = MemoryStore::new();
        let record = Routine::new(4, "Morning", ["a"], None, 0).to_record().unwrap();
        let first = store.save_routine(&record).await.unwrap();
        let second = store.save_routine(&record).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.routines_for_child(4).await.unwrap().len(), 2);
        assert!(store.routines_for_child(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_inserts_then_updates_session() {
        let store = MemoryStore::new();
        let mut routine = Routine::new(4, "Morning", ["a"], None, 0);
        routine.id = store.save_routine(&routine.to_record().unwrap()).await.unwrap();
        let mut session = RoutineSession::start(&routine, 10);

        let id = store
            .commit(WriteSet { routine: None, session: &session, completion: None })
            .await
            .unwrap();
        session.id = id;
        assert_eq!(store.active_session(4, routine.id).await.unwrap(), Some(session.clone()));

        session.status = SessionStatus::Completed;
        let entry = CompletionEntry {
            child_id: 4,
            routine_id: routine.id,
            activity_name: "a".into(),
            completed_at: 11,
        };
        store
            .commit(WriteSet { routine: None, session: &session, completion: Some(&entry) })
            .await
            .unwrap();
        assert!(store.active_session(4, routine.id).await.unwrap().is_none());
        assert_eq!(store.completion_log(4).await.unwrap(), vec![entry]);
    }

    #[tokio::test]
    async fn test_commit_rejects_unknown_rows_without_writing() {
        let store = MemoryStore::new();
        let mut routine = Routine::new(1, "Ghost", ["a"], None, 0);
        routine.id = 99;
        let record = routine.to_record().unwrap();
        let session = RoutineSession::start(&routine, 0);
        let result = store
            .commit(WriteSet { routine: Some(&record), session: &session, completion: None })
            .await;
        assert!(result.is_err());
        assert!(store.session_ids_with_status(SessionStatus::InProgress).await.unwrap().is_empty());
    }
}
