//! Durable resume checkpoint
//!
//! The checkpoint file is the only source of truth for where the next run
//! resumes. It is overwritten in full after every processed page using a
//! write-to-temp, fsync, rename sequence so a reader never sees a partially
//! written file.

use crate::storage::StorageResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Resume position of a crawl
///
/// Serialized as `{"since": .., "totalFetched": ..}`. New fields must be
/// optional so files written by older and newer builds stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Highest entity id fully processed so far
    #[serde(rename = "since")]
    pub cursor: u64,

    /// Number of enriched records ever emitted
    #[serde(rename = "totalFetched")]
    pub total_fetched: u64,

    #[serde(
        rename = "updatedAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn new(cursor: u64, total_fetched: u64) -> Self {
        Self {
            cursor,
            total_fetched,
            updated_at: None,
        }
    }

    /// The resume position without the bookkeeping timestamp
    pub fn position(&self) -> (u64, u64) {
        (self.cursor, self.total_fetched)
    }
}

/// Persistence backend for the crawl checkpoint
pub trait CheckpointStore: Send {
    /// Returns the stored checkpoint, or the zero checkpoint if none exists
    fn load(&self) -> Checkpoint;

    /// Atomically replaces the stored checkpoint
    fn save(&mut self, checkpoint: &Checkpoint) -> StorageResult<()>;
}

/// Checkpoint stored as a JSON file on the local filesystem
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Checkpoint {
        read_checkpoint(&self.path)
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let stamped = Checkpoint {
            updated_at: Some(Utc::now()),
            ..*checkpoint
        };
        let bytes = serde_json::to_vec_pretty(&stamped)?;

        let tmp_path = self.temp_path();
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        tracing::debug!(
            "Checkpoint saved: since={}, totalFetched={}",
            checkpoint.cursor,
            checkpoint.total_fetched
        );
        Ok(())
    }
}

/// Reads a checkpoint file, falling back to the zero checkpoint
///
/// An unreadable or corrupt file is logged and treated as absent: the crawl
/// then re-enumerates from the beginning, which is wasteful but safe because
/// downstream consumers key records by id.
pub fn read_checkpoint(path: &Path) -> Checkpoint {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Checkpoint::default(),
        Err(e) => {
            tracing::warn!("Cannot read checkpoint {}: {}", path.display(), e);
            return Checkpoint::default();
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(checkpoint) => checkpoint,
        Err(e) => {
            tracing::warn!(
                "Checkpoint {} is corrupt ({}); starting from the beginning",
                path.display(),
                e
            );
            Checkpoint::default()
        }
    }
}
