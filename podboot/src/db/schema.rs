//! Journal schema and migration.
//!
//! The version lives in SQLite's `user_version` header field. The journal
//! only caches step outcomes, so any version other than the current one is
//! handled by dropping the tables and starting empty; the next boot falls
//! back to evaluating every predicate.

use super::db_err;
use podboot_shared::errors::PodbootResult;
use rusqlite::Connection;

pub const SCHEMA_VERSION: i32 = 1;

const TABLES: &str = "
CREATE TABLE IF NOT EXISTS boots (
    boot_id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    status TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS step_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    boot_id TEXT NOT NULL REFERENCES boots(boot_id),
    step TEXT NOT NULL,
    phase INTEGER NOT NULL,
    status TEXT NOT NULL,
    detail TEXT,
    duration_ms INTEGER NOT NULL,
    finished_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_step_runs_step ON step_runs(step, status);
";

const DROP_TABLES: &str = "
DROP TABLE IF EXISTS step_runs;
DROP TABLE IF EXISTS boots;
";

/// Bring `conn` to [`SCHEMA_VERSION`], resetting a journal written by any other version.
pub fn prepare(conn: &Connection) -> PodbootResult<()> {
    let found: i32 = db_err!(conn.pragma_query_value(None, "user_version", |row| row.get(0)))?;

    if found != SCHEMA_VERSION {
        if found != 0 {
            tracing::warn!(
                found,
                expected = SCHEMA_VERSION,
                "Boot journal has a different schema version, starting a fresh journal"
            );
        }
        db_err!(conn.execute_batch(DROP_TABLES))?;
    }

    db_err!(conn.execute_batch(TABLES))?;
    db_err!(conn.pragma_update(None, "user_version", SCHEMA_VERSION))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(conn: &Connection) -> i32 {
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap()
    }

    fn boots(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM boots", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_fresh_database_gets_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        prepare(&conn).unwrap();
        assert_eq!(version(&conn), SCHEMA_VERSION);
        assert_eq!(boots(&conn), 0);
    }

    #[test]
    fn test_same_version_keeps_rows() {
        let conn = Connection::open_in_memory().unwrap();
        prepare(&conn).unwrap();
        conn.execute(
            "INSERT INTO boots VALUES ('b1', 'now', 'ready', 'now')",
            [],
        )
        .unwrap();

        prepare(&conn).unwrap();
        assert_eq!(boots(&conn), 1);
    }

    #[test]
    fn test_other_version_resets_journal() {
        let conn = Connection::open_in_memory().unwrap();
        prepare(&conn).unwrap();
        conn.execute(
            "INSERT INTO boots VALUES ('b1', 'now', 'ready', 'now')",
            [],
        )
        .unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();

        prepare(&conn).unwrap();
        assert_eq!(version(&conn), SCHEMA_VERSION);
        assert_eq!(boots(&conn), 0);
    }
}
