//! Boot journal store.

use super::{db_err, schema};
use crate::pipeline::{TaskMetrics, TaskStatus};
use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use podboot_shared::errors::{PodbootError, PodbootResult};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// One recorded step execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: String,
    pub phase: u32,
    pub status: String,
    pub detail: Option<String>,
    pub duration_ms: u64,
}

/// Journal of boots and step runs.
///
/// Cloning shares the connection; writes from the pipeline observer and the
/// bootstrap are serialized by the mutex.
#[derive(Clone)]
pub struct JournalStore {
    conn: Arc<Mutex<Connection>>,
}

impl JournalStore {
    /// Open or create the journal at `path`.
    pub fn open(path: &Path) -> PodbootResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = db_err!(Connection::open(path))?;
        // A step row must be durable before the next step starts.
        db_err!(conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=FULL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;"
        ))?;
        schema::prepare(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    pub fn begin_boot(&self, boot_id: &str, status: &str) -> PodbootResult<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        db_err!(conn.execute(
            "INSERT INTO boots (boot_id, started_at, status, updated_at) VALUES (?1, ?2, ?3, ?2)",
            rusqlite::params![boot_id, now, status],
        ))?;
        Ok(())
    }

    pub fn set_boot_status(&self, boot_id: &str, status: &str) -> PodbootResult<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        let updated = db_err!(conn.execute(
            "UPDATE boots SET status = ?2, updated_at = ?3 WHERE boot_id = ?1",
            rusqlite::params![boot_id, status, now],
        ))?;
        if updated == 0 {
            return Err(PodbootError::NotFound(format!("boot {}", boot_id)));
        }
        Ok(())
    }

    pub fn record_step(&self, boot_id: &str, task: &TaskMetrics) -> PodbootResult<()> {
        let detail = match &task.status {
            TaskStatus::Failed { error, .. } => Some(error.clone()),
            TaskStatus::Completed {
                alternative: Some(i),
            } => Some(format!("alternative {}", i)),
            _ => None,
        };
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        db_err!(conn.execute(
            "INSERT INTO step_runs (boot_id, step, phase, status, detail, duration_ms, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                boot_id,
                task.name,
                task.phase.0,
                task.status.as_str(),
                detail,
                task.duration_ms as i64,
                now
            ],
        ))?;
        Ok(())
    }

    /// Steps that reached their end state in any recorded boot.
    pub fn completed_steps(&self) -> PodbootResult<HashSet<String>> {
        let conn = self.conn();
        let mut stmt = db_err!(conn.prepare(
            "SELECT DISTINCT step FROM step_runs WHERE status IN ('completed', 'satisfied', 'skipped')"
        ))?;
        let rows = db_err!(stmt.query_map([], |row| row.get::<_, String>(0)))?;
        let mut steps = HashSet::new();
        for row in rows {
            steps.insert(db_err!(row)?);
        }
        Ok(steps)
    }

    pub fn step_runs(&self, boot_id: &str) -> PodbootResult<Vec<StepRecord>> {
        let conn = self.conn();
        let mut stmt = db_err!(conn.prepare(
            "SELECT step, phase, status, detail, duration_ms FROM step_runs
             WHERE boot_id = ?1 ORDER BY id"
        ))?;
        let rows = db_err!(stmt.query_map([boot_id], |row| {
            Ok(StepRecord {
                step: row.get(0)?,
                phase: row.get(1)?,
                status: row.get(2)?,
                detail: row.get(3)?,
                duration_ms: row.get::<_, i64>(4)? as u64,
            })
        }))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(db_err!(row)?);
        }
        Ok(records)
    }

    pub fn boot_status(&self, boot_id: &str) -> PodbootResult<Option<String>> {
        let conn = self.conn();
        db_err!(
            conn.query_row(
                "SELECT status FROM boots WHERE boot_id = ?1",
                [boot_id],
                |row| row.get(0),
            )
            .optional()
        )
    }
}
