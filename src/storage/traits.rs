//! Storage traits and error types
//!
//! This module defines the trait interface for the run ledger and the error
//! type shared by every durable write in the crate (checkpoint, batch units,
//! ledger).

use crate::storage::{RunRecord, RunStatus, RunSummary};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for run history backends
///
/// The ledger is bookkeeping for operators. It never decides where a crawl
/// resumes; that is the checkpoint's job.
pub trait RunLedger {
    /// Records the start of a run and returns its ID
    ///
    /// Any run still marked `running` belongs to a process that died without
    /// finishing and is marked `interrupted` first.
    fn begin_run(&mut self, config_hash: &str, start_cursor: u64) -> StorageResult<i64>;

    /// Records the outcome of a run
    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        summary: &RunSummary,
    ) -> StorageResult<()>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Lists runs, newest first
    fn list_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>>;
}
