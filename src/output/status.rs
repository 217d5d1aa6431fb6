//! Durable crawl status
//!
//! Status is assembled only from what is already on disk: the checkpoint
//! file, the published unit files and the run ledger. In-memory batches of a
//! running crawl are never visible here.

use crate::config::Config;
use crate::output::batch::{FAILURE_PREFIX, SUCCESS_PREFIX};
use crate::state::read_checkpoint;
use crate::storage::{open_ledger, RunLedger, RunRecord};
use crate::HarvestError;
use serde::Serialize;
use std::path::Path;

/// Snapshot of durable crawl progress
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlStatus {
    #[serde(rename = "since")]
    pub cursor: u64,
    pub total_fetched: u64,
    /// Success unit identifiers in flush order
    #[serde(rename = "batchFiles")]
    pub success_units: Vec<String>,
    /// Failure unit identifiers in flush order
    #[serde(rename = "failureFiles")]
    pub failure_units: Vec<String>,
    pub last_run: Option<RunRecord>,
}

/// Loads the durable status for the crawl described by `config`
///
/// Never creates the ledger: if no run has been recorded yet, `last_run`
/// is `None`.
pub fn load_status(config: &Config) -> Result<CrawlStatus, HarvestError> {
    let checkpoint = read_checkpoint(Path::new(&config.output.checkpoint_path));

    let success_units = list_units(Path::new(&config.output.data_dir), SUCCESS_PREFIX)?;
    let failure_units = list_units(&config.output.failure_dir(), FAILURE_PREFIX)?;

    let ledger_path = Path::new(&config.output.ledger_path);
    let last_run = if ledger_path.exists() {
        open_ledger(ledger_path)?.latest_run()?
    } else {
        None
    };

    Ok(CrawlStatus {
        cursor: checkpoint.cursor,
        total_fetched: checkpoint.total_fetched,
        success_units,
        failure_units,
        last_run,
    })
}

/// Lists published unit files in `dir` whose names start with `prefix`
///
/// Units are ordered by their numeric label, then by collision suffix.
pub fn list_units(dir: &Path, prefix: &str) -> Result<Vec<String>, HarvestError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut units = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(prefix) && name.ends_with(".json") {
            units.push(name);
        }
    }

    units.sort_by_key(|name| unit_sort_key(name, prefix));
    Ok(units)
}

fn unit_sort_key(name: &str, prefix: &str) -> (u64, u64) {
    let stem = name
        .strip_prefix(prefix)
        .and_then(|s| s.strip_suffix(".json"))
        .unwrap_or_default();
    let (label, suffix) = stem.split_once('-').unwrap_or((stem, "0"));
    (
        label.parse().unwrap_or(u64::MAX),
        suffix.parse().unwrap_or(u64::MAX),
    )
}

/// Prints a status snapshot to stdout in a formatted manner
pub fn print_status(status: &CrawlStatus) {
    println!("=== Crawl Status ===\n");

    println!("Progress:");
    println!("  Cursor (since): {}", status.cursor);
    println!("  Total fetched: {}", status.total_fetched);
    println!();

    println!("Success Units ({}):", status.success_units.len());
    for unit in &status.success_units {
        println!("  - {}", unit);
    }
    println!();

    if !status.failure_units.is_empty() {
        println!("Failure Units ({}):", status.failure_units.len());
        for unit in &status.failure_units {
            println!("  - {}", unit);
        }
        println!();
    }

    match &status.last_run {
        Some(run) => print_run(run),
        None => println!("No runs recorded yet"),
    }
}

/// Prints one ledger entry
pub fn print_run(run: &RunRecord) {
    println!("Run {} [{}]", run.id, run.status.to_db_string());
    println!("  Started: {}", run.started_at);
    if let Some(finished) = &run.finished_at {
        println!("  Finished: {}", finished);
    }
    match run.end_cursor {
        Some(end) => println!("  Cursor: {} -> {}", run.start_cursor, end),
        None => println!("  Cursor: {} -> ?", run.start_cursor),
    }
    println!(
        "  Records: {}, failures: {}, requests: {}, throttled: {:.1}s",
        run.records_written,
        run.failures_written,
        run.requests_made,
        run.throttle_wait_ms as f64 / 1000.0
    );
    if let Some(error) = &run.error_message {
        println!("  Error: {}", error);
    }
}
