//! Output module for persisted crawl results
//!
//! This module handles:
//! - The record types written to success and failure units
//! - Accumulating records and flushing them as immutable batch files
//! - Reporting durable crawl status

mod batch;
mod records;
mod status;

pub use batch::{BatchWriter, FlushedUnit, UnitKind, FAILURE_PREFIX, SUCCESS_PREFIX};
pub use records::{DetailOutcome, EnrichedRecord, FailureRecord};
pub use status::{list_units, load_status, print_run, print_status, CrawlStatus};
