//! Storage module for the run ledger
//!
//! This module handles:
//! - SQLite database initialization and schema management
//! - Recording the start and outcome of every crawl run
//! - Marking runs abandoned by a crashed process as interrupted

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteLedger;
pub use traits::{RunLedger, StorageError, StorageResult};

use serde::Serialize;
use std::path::Path;

/// Opens (creating if needed) the run ledger at `path`
pub fn open_ledger(path: &Path) -> StorageResult<SqliteLedger> {
    SqliteLedger::new(path)
}

/// Represents a crawl run
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub start_cursor: u64,
    pub end_cursor: Option<u64>,
    pub records_written: u64,
    pub failures_written: u64,
    pub requests_made: u64,
    pub throttle_wait_ms: u64,
    pub error_message: Option<String>,
}

/// Counters recorded when a run finishes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub end_cursor: u64,
    pub records_written: u64,
    pub failures_written: u64,
    pub requests_made: u64,
    pub throttle_wait_ms: u64,
    pub error_message: Option<String>,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Stopped,
    Failed,
    Interrupted,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "stopped" => Some(Self::Stopped),
            "failed" => Some(Self::Failed),
            "interrupted" => Some(Self::Interrupted),
            _ => None,
        }
    }
}
