//! Batch accumulation and flushing
//!
//! Successful records and failures accumulate in two separate in-memory
//! batches. A batch is written out in chunks of exactly its threshold; each
//! chunk becomes one immutable JSON file that is published by renaming a
//! fully written temporary file into place. Published files are never
//! rewritten.

use crate::config::OutputConfig;
use crate::output::records::{DetailOutcome, EnrichedRecord, FailureRecord};
use crate::storage::StorageResult;
use chrono::Utc;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name prefix of success units
pub const SUCCESS_PREFIX: &str = "records_";

/// File name prefix of failure units
pub const FAILURE_PREFIX: &str = "failures_";

/// Which stream a flushed unit belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Success,
    Failure,
}

/// A batch unit that has been durably written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedUnit {
    pub kind: UnitKind,
    /// File name of the unit, which doubles as its identifier
    pub name: String,
    pub path: PathBuf,
    pub count: usize,
}

/// Accumulates records and writes them out as immutable units
pub struct BatchWriter {
    data_dir: PathBuf,
    failure_dir: PathBuf,
    batch_threshold: usize,
    error_batch_threshold: usize,
    records: Vec<EnrichedRecord>,
    failures: Vec<FailureRecord>,
    /// Units published since they were last handed out
    written: Vec<FlushedUnit>,
    last_failure_label: i64,
}

impl BatchWriter {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            data_dir: PathBuf::from(&config.data_dir),
            failure_dir: config.failure_dir(),
            batch_threshold: config.batch_threshold.max(1),
            error_batch_threshold: config.error_batch_threshold.max(1),
            records: Vec::new(),
            failures: Vec::new(),
            written: Vec::new(),
            last_failure_label: 0,
        }
    }

    /// Appends an outcome to the matching batch
    pub fn add(&mut self, outcome: DetailOutcome) {
        match outcome {
            DetailOutcome::Enriched(record) => self.records.push(record),
            DetailOutcome::Failed(failure) => self.failures.push(failure),
        }
    }

    pub fn pending_records(&self) -> usize {
        self.records.len()
    }

    pub fn pending_failures(&self) -> usize {
        self.failures.len()
    }

    /// Writes every full chunk of either batch
    ///
    /// Success units are labeled with the running `totalFetched` value they
    /// end at (`sl` of their last record + 1); failure units with a
    /// millisecond timestamp that is strictly increasing within this writer.
    /// A chunk leaves memory only once its file is published. If a later
    /// chunk fails, the units already published stay with the writer and
    /// are returned by the next flush or by [`BatchWriter::take_written`].
    pub fn flush_if_full(&mut self) -> StorageResult<Vec<FlushedUnit>> {
        self.write_full_chunks()?;
        Ok(self.take_written())
    }

    /// Writes full chunks, then whatever partial batches remain
    pub fn flush_remaining(&mut self) -> StorageResult<Vec<FlushedUnit>> {
        self.write_full_chunks()?;

        if !self.records.is_empty() {
            let unit = write_success_unit(&self.data_dir, &self.records)?;
            self.written.push(unit);
            self.records.clear();
        }

        if !self.failures.is_empty() {
            let label = self.next_failure_label();
            let unit = write_failure_unit(&self.failure_dir, label, &self.failures)?;
            self.written.push(unit);
            self.failures.clear();
        }

        Ok(self.take_written())
    }

    /// Hands out units published by a flush that later failed
    pub fn take_written(&mut self) -> Vec<FlushedUnit> {
        std::mem::take(&mut self.written)
    }

    fn write_full_chunks(&mut self) -> StorageResult<()> {
        while self.records.len() >= self.batch_threshold {
            let n = self.batch_threshold;
            let unit = write_success_unit(&self.data_dir, &self.records[..n])?;
            self.written.push(unit);
            self.records.drain(..n);
        }

        while self.failures.len() >= self.error_batch_threshold {
            let n = self.error_batch_threshold;
            let label = self.next_failure_label();
            let unit = write_failure_unit(&self.failure_dir, label, &self.failures[..n])?;
            self.written.push(unit);
            self.failures.drain(..n);
        }

        Ok(())
    }

    fn next_failure_label(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis();
        self.last_failure_label = now.max(self.last_failure_label + 1);
        self.last_failure_label
    }
}

fn write_success_unit(dir: &Path, chunk: &[EnrichedRecord]) -> StorageResult<FlushedUnit> {
    let label = chunk.last().map(|r| r.sl + 1).unwrap_or(0);
    let stem = format!("{}{}", SUCCESS_PREFIX, label);
    let path = write_unit(dir, &stem, chunk)?;

    tracing::info!("Saved {} records to {}", chunk.len(), path.display());
    Ok(FlushedUnit {
        kind: UnitKind::Success,
        name: unit_name(&path),
        path,
        count: chunk.len(),
    })
}

fn write_failure_unit(
    dir: &Path,
    label: i64,
    chunk: &[FailureRecord],
) -> StorageResult<FlushedUnit> {
    let stem = format!("{}{}", FAILURE_PREFIX, label);
    let path = write_unit(dir, &stem, chunk)?;

    tracing::info!("Saved {} skipped entities to {}", chunk.len(), path.display());
    Ok(FlushedUnit {
        kind: UnitKind::Failure,
        name: unit_name(&path),
        path,
        count: chunk.len(),
    })
}

fn unit_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Writes `items` as a new unit named `{stem}.json` in `dir`
///
/// If that name is taken (a previous lineage of the crawl already produced
/// it), `{stem}-{n}.json` with the smallest free `n` is used instead.
fn write_unit<T: Serialize>(dir: &Path, stem: &str, items: &[T]) -> StorageResult<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let tmp_path = dir.join(format!(".{}.json.tmp", stem));
    {
        let mut file = File::create(&tmp_path)?;
        serde_json::to_writer_pretty(&mut file, items)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
    }

    let mut path = dir.join(format!("{}.json", stem));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}-{}.json", stem, n));
        n += 1;
    }

    std::fs::rename(&tmp_path, &path)?;
    Ok(path)
}
