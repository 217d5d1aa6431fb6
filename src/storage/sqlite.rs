//! SQLite run ledger implementation

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{RunLedger, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus, RunSummary};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const RUN_COLUMNS: &str = "id, started_at, finished_at, config_hash, status, start_cursor, \
     end_cursor, records_written, failures_written, requests_made, throttle_wait_ms, error_message";

/// SQLite ledger backend
pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    /// Opens or creates the ledger database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory ledger (for testing)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Interrupted),
        start_cursor: row.get::<_, i64>(5)? as u64,
        end_cursor: row.get::<_, Option<i64>>(6)?.map(|c| c as u64),
        records_written: row.get::<_, i64>(7)? as u64,
        failures_written: row.get::<_, i64>(8)? as u64,
        requests_made: row.get::<_, i64>(9)? as u64,
        throttle_wait_ms: row.get::<_, i64>(10)? as u64,
        error_message: row.get(11)?,
    })
}

impl RunLedger for SqliteLedger {
    fn begin_run(&mut self, config_hash: &str, start_cursor: u64) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();

        let abandoned = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE status = ?3",
            params![
                RunStatus::Interrupted.to_db_string(),
                now,
                RunStatus::Running.to_db_string()
            ],
        )?;
        if abandoned > 0 {
            tracing::warn!("Marked {} abandoned run(s) as interrupted", abandoned);
        }

        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status, start_cursor) VALUES (?1, ?2, ?3, ?4)",
            params![
                now,
                config_hash,
                RunStatus::Running.to_db_string(),
                start_cursor as i64
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        summary: &RunSummary,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, end_cursor = ?3, records_written = ?4,
             failures_written = ?5, requests_made = ?6, throttle_wait_ms = ?7, error_message = ?8
             WHERE id = ?9",
            params![
                status.to_db_string(),
                now,
                summary.end_cursor as i64,
                summary.records_written as i64,
                summary.failures_written as i64,
                summary.requests_made as i64,
                summary.throttle_wait_ms as i64,
                summary.error_message,
                run_id
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS))?;

        stmt.query_row(params![run_id], run_from_row)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM runs ORDER BY id DESC LIMIT 1",
            RUN_COLUMNS
        ))?;

        Ok(stmt.query_row([], run_from_row).optional()?)
    }

    fn list_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM runs ORDER BY id DESC LIMIT ?1",
            RUN_COLUMNS
        ))?;

        let runs = stmt
            .query_map(params![limit as i64], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}
