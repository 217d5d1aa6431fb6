use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Roster-Harvest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub crawler: CrawlerConfig,
    pub output: OutputConfig,
}

/// Remote provider connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the provider (e.g., "https://api.github.com")
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Static credential sent as `Authorization: token <credential>`
    pub credential: String,

    /// User-Agent header sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout", default = "default_request_timeout")]
    pub request_timeout: u64,
}

/// Crawl loop behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum number of stubs requested per enumeration page
    #[serde(rename = "per-page")]
    pub per_page: u32,

    /// Mandatory wait between pages (milliseconds)
    #[serde(rename = "pacing-delay", default = "default_pacing_delay")]
    pub pacing_delay: u64,

    /// Consecutive page-level failures tolerated before the crawl stops
    #[serde(rename = "max-page-retries", default = "default_max_page_retries")]
    pub max_page_retries: u32,
}

/// Durable output locations and flush thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Path to the JSON checkpoint file
    #[serde(rename = "checkpoint-path")]
    pub checkpoint_path: String,

    /// Directory receiving success units (failure units go to `failures/` below it)
    #[serde(rename = "data-dir")]
    pub data_dir: String,

    /// Path to the SQLite run ledger
    #[serde(rename = "ledger-path", default = "default_ledger_path")]
    pub ledger_path: String,

    /// Number of enriched records per success unit
    #[serde(rename = "batch-threshold")]
    pub batch_threshold: usize,

    /// Number of failure records per failure unit
    #[serde(rename = "error-batch-threshold")]
    pub error_batch_threshold: usize,
}

impl CrawlerConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_delay)
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

impl OutputConfig {
    pub fn failure_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("failures")
    }
}

fn default_user_agent() -> String {
    format!("roster-harvest/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout() -> u64 {
    30
}

fn default_pacing_delay() -> u64 {
    1000
}

fn default_max_page_retries() -> u32 {
    5
}

fn default_ledger_path() -> String {
    "userdata/runs.db".to_string()
}
