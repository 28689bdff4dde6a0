//! Local durability for completed work.
//!
//! Every result is recorded here before it is posted to the coordinator, so a
//! crash or a failed submission still leaves a copy that can be reconciled
//! later. Records are keyed by `(worker_id, job_uuid)`.

use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::protocol::WorkerId;

pub trait ResultStore: Send + Sync {
    /// Durably store one serialized result. Recording the same key twice
    /// replaces the earlier row.
    fn record(&self, worker_id: &WorkerId, job_uuid: &str, result: &str) -> Result<()>;
}

/// A stored result row.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRecord {
    pub worker_id: String,
    pub job_uuid: String,
    pub result: String,
    pub recorded_at: DateTime<Utc>,
}

/// SQLite-backed [`ResultStore`].
///
/// Several worker processes may share one database file: the connection runs
/// in WAL mode with a busy timeout, and rows never collide because every
/// worker writes under its own id.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // journal_mode returns the resulting mode as a row.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        Self::init_schema(&conn)?;
        tracing::debug!(path = %path.display(), "Opened result store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS scans (
                worker_id TEXT NOT NULL,
                job_uuid TEXT NOT NULL,
                result TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                PRIMARY KEY (worker_id, job_uuid)
            )",
            [],
        )?;
        Ok(())
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave the connection half-written.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, worker_id: &WorkerId, job_uuid: &str) -> Result<Option<ScanRecord>> {
        let conn = self.conn();
        let record = conn
            .query_row(
                "SELECT worker_id, job_uuid, result, recorded_at
                 FROM scans WHERE worker_id = ?1 AND job_uuid = ?2",
                params![worker_id.to_string(), job_uuid],
                |row| {
                    Ok(ScanRecord {
                        worker_id: row.get(0)?,
                        job_uuid: row.get(1)?,
                        result: row.get(2)?,
                        recorded_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM scans", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

impl ResultStore for SqliteStore {
    fn record(&self, worker_id: &WorkerId, job_uuid: &str, result: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO scans (worker_id, job_uuid, result, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![worker_id.to_string(), job_uuid, result, Utc::now()],
        )?;
        tracing::debug!(worker_id = %worker_id, job_uuid, "Recorded scan result");
        Ok(())
    }
}
