//! Roster-Harvest: a resumable, quota-aware entity crawler
//!
//! This crate enumerates every entity exposed by a paginated, rate-limited
//! remote API (a GitHub-compatible `/users` listing), fetches one detail
//! record per entity, and persists the results in immutable batch files
//! with an exact resume checkpoint.

pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Roster-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] crawler::ProviderError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Cursor consistency fault: page max id {max_id} does not advance cursor {cursor}")]
    ConsistencyFault { cursor: u64, max_id: u64 },

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::CrawlState,
        to: state::CrawlState,
    },

    #[error("A crawl is already running")]
    AlreadyRunning,

    #[error("Gave up after {attempts} consecutive page failures: {source}")]
    RetriesExhausted {
        attempts: u32,
        source: crawler::ProviderError,
    },

    #[error("Crawl task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Roster-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlReport, CrawlService, Coordinator};
pub use output::{load_status, CrawlStatus, EnrichedRecord, FailureRecord};
pub use state::{Checkpoint, CrawlState};
