use anyhow::{Context, Result};
use async_trait::async_trait;
use rainbow_core::{CompletionEntry, RoutineRecord, RoutineSession, RoutineStore, SessionStatus, WriteSet};
use sqlx::{sqlite::SqlitePoolOptions, sqlite::SqliteRow, Pool, Row, Sqlite};
use std::path::Path;

#[derive(Clone)]
pub struct SqliteStore {
    pub(crate) pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .after_connect(|conn, _meta| Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(conn).await?;
                Ok(())
            }))
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS routines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                child_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                activities TEXT NOT NULL DEFAULT '[]',
                total_activities INTEGER NOT NULL DEFAULT 0,
                schedule_time TEXT,
                updated_at INTEGER NOT NULL
            );
            "#
        )
        .execute(&self.pool)
        .await
        .context("Failed to create routines table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_routines_child ON routines(child_id)")
            .execute(&self.pool)
            .await
            .context("Failed to create routines child index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS routine_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                routine_id INTEGER NOT NULL REFERENCES routines(id),
                child_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                current_activity INTEGER NOT NULL DEFAULT 0,
                progress REAL NOT NULL DEFAULT 0,
                started_at INTEGER NOT NULL,
                completed_at INTEGER
            );
            "#
        )
        .execute(&self.pool)
        .await
        .context("Failed to create routine_sessions table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_child_status ON routine_sessions(child_id, status)"
        )
        .execute(&self.pool)
        .await
        .context("Failed to create sessions child/status index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS activity_completions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                child_id INTEGER NOT NULL,
                routine_id INTEGER NOT NULL,
                activity_name TEXT NOT NULL,
                completed_at INTEGER NOT NULL
            );
            "#
        )
        .execute(&self.pool)
        .await
        .context("Failed to create activity_completions table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_completions_child ON activity_completions(child_id, completed_at)"
        )
        .execute(&self.pool)
        .await
        .context("Failed to create completions child index")?;

        Ok(())
    }
}

// =============================================================================
// Row mapping
// =============================================================================

const ROUTINE_COLUMNS: &str =
    "id, child_id, name, activities, total_activities, schedule_time, updated_at";
const SESSION_COLUMNS: &str =
    "id, routine_id, child_id, status, current_activity, progress, started_at, completed_at";

fn routine_from_row(row: &SqliteRow) -> RoutineRecord {
    RoutineRecord {
        id: row.get("id"),
        child_id: row.get("child_id"),
        name: row.get("name"),
        activities_json: row.get("activities"),
        total_activities: row.get("total_activities"),
        schedule_time: row.get("schedule_time"),
        updated_at: row.get("updated_at"),
    }
}

fn session_from_row(row: &SqliteRow) -> Result<RoutineSession> {
    let status: String = row.get("status");
    let status = SessionStatus::parse_str(&status)
        .with_context(|| format!("Unknown session status '{}'", status))?;
    // A negative pointer cannot be a position; surface it as out of range
    // so the reconciler repairs it.
    let current: i64 = row.get("current_activity");
    Ok(RoutineSession {
        id: row.get("id"),
        routine_id: row.get("routine_id"),
        child_id: row.get("child_id"),
        status,
        current_activity: usize::try_from(current).unwrap_or(usize::MAX),
        progress: row.get("progress"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    })
}

fn pointer(session: &RoutineSession) -> i64 {
    i64::try_from(session.current_activity).unwrap_or(i64::MAX)
}

// =============================================================================
// RoutineStore
// =============================================================================

#[async_trait]
impl RoutineStore for SqliteStore {
    async fn load_routine(&self, routine_id: i64) -> Result<Option<RoutineRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM routines WHERE id = ?", ROUTINE_COLUMNS))
            .bind(routine_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query routine")?;
        Ok(row.as_ref().map(routine_from_row))
    }

    async fn routines_for_child(&self, child_id: i64) -> Result<Vec<RoutineRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM routines WHERE child_id = ? ORDER BY id",
            ROUTINE_COLUMNS
        ))
        .bind(child_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query routines for child")?;
        Ok(rows.iter().map(routine_from_row).collect())
    }

    async fn save_routine(&self, record: &RoutineRecord) -> Result<i64> {
        if record.id == 0 {
            let result = sqlx::query(
                "INSERT INTO routines (child_id, name, activities, total_activities, schedule_time, updated_at) VALUES (?, ?, ?, ?, ?, ?)"
            )
            .bind(record.child_id)
            .bind(&record.name)
            .bind(&record.activities_json)
            .bind(record.total_activities)
            .bind(&record.schedule_time)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await
            .context("Failed to insert routine")?;
            return Ok(result.last_insert_rowid());
        }

        sqlx::query(
            "INSERT INTO routines (id, child_id, name, activities, total_activities, schedule_time, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET child_id = excluded.child_id, name = excluded.name, activities = excluded.activities,
             total_activities = excluded.total_activities, schedule_time = excluded.schedule_time, updated_at = excluded.updated_at"
        )
        .bind(record.id)
        .bind(record.child_id)
        .bind(&record.name)
        .bind(&record.activities_json)
        .bind(record.total_activities)
        .bind(&record.schedule_time)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to save routine")?;
        Ok(record.id)
    }

    async fn load_session(&self, session_id: i64) -> Result<Option<RoutineSession>> {
        let row = sqlx::query(&format!("SELECT {} FROM routine_sessions WHERE id = ?", SESSION_COLUMNS))
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query session")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn active_session(&self, child_id: i64, routine_id: i64) -> Result<Option<RoutineSession>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM routine_sessions WHERE child_id = ? AND routine_id = ? AND status = ?
             ORDER BY started_at DESC, id DESC LIMIT 1",
            SESSION_COLUMNS
        ))
        .bind(child_id)
        .bind(routine_id)
        .bind(SessionStatus::InProgress.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query active session")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn sessions_for_child(&self, child_id: i64, status: SessionStatus) -> Result<Vec<RoutineSession>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM routine_sessions WHERE child_id = ? AND status = ? ORDER BY id",
            SESSION_COLUMNS
        ))
        .bind(child_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to query sessions for child")?;
        rows.iter().map(session_from_row).collect()
    }

    async fn session_ids_with_status(&self, status: SessionStatus) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT id FROM routine_sessions WHERE status = ? ORDER BY id")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .context("Failed to query session ids")?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn commit(&self, writes: WriteSet<'_>) -> Result<i64> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        if let Some(routine) = writes.routine {
            let updated = sqlx::query(
                "UPDATE routines SET name = ?, activities = ?, total_activities = ?, schedule_time = ?, updated_at = ? WHERE id = ?"
            )
            .bind(&routine.name)
            .bind(&routine.activities_json)
            .bind(routine.total_activities)
            .bind(&routine.schedule_time)
            .bind(routine.updated_at)
            .bind(routine.id)
            .execute(&mut *tx)
            .await
            .context("Failed to update routine")?;
            if updated.rows_affected() == 0 {
                anyhow::bail!("Routine {} does not exist", routine.id);
            }
        }

        let session = writes.session;
        let session_id = if session.id == 0 {
            sqlx::query(
                "INSERT INTO routine_sessions (routine_id, child_id, status, current_activity, progress, started_at, completed_at) VALUES (?, ?, ?, ?, ?, ?, ?)"
            )
            .bind(session.routine_id)
            .bind(session.child_id)
            .bind(session.status.as_str())
            .bind(pointer(session))
            .bind(session.progress)
            .bind(session.started_at)
            .bind(session.completed_at)
            .execute(&mut *tx)
            .await
            .context("Failed to insert session")?
            .last_insert_rowid()
        } else {
            let updated = sqlx::query(
                "UPDATE routine_sessions SET status = ?, current_activity = ?, progress = ?, completed_at = ? WHERE id = ?"
            )
            .bind(session.status.as_str())
            .bind(pointer(session))
            .bind(session.progress)
            .bind(session.completed_at)
            .bind(session.id)
            .execute(&mut *tx)
            .await
            .context("Failed to update session")?;
            if updated.rows_affected() == 0 {
                anyhow::bail!("Session {} does not exist", session.id);
            }
            session.id
        };

        if let Some(entry) = writes.completion {
            sqlx::query(
                "INSERT INTO activity_completions (child_id, routine_id, activity_name, completed_at) VALUES (?, ?, ?, ?)"
            )
            .bind(entry.child_id)
            .bind(entry.routine_id)
            .bind(&entry.activity_name)
            .bind(entry.completed_at)
            .execute(&mut *tx)
            .await
            .context("Failed to record activity completion")?;
        }

        tx.commit().await.context("Failed to commit transaction")?;
        tracing::debug!("Committed session {}", session_id);
        Ok(session_id)
    }

    async fn completion_log(&self, child_id: i64) -> Result<Vec<CompletionEntry>> {
        let rows = sqlx::query(
            "SELECT child_id, routine_id, activity_name, completed_at FROM activity_completions
             WHERE child_id = ? ORDER BY completed_at, id"
        )
        .bind(child_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query completion log")?;
        Ok(rows
            .iter()
            .map(|r| CompletionEntry {
                child_id: r.get("child_id"),
                routine_id: r.get("routine_id"),
                activity_name: r.get("activity_name"),
                completed_at: r.get("completed_at"),
            })
            .collect())
    }
}
