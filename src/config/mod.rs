//! Configuration module for Roster-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use roster_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Flushing every {} records", config.output.batch_threshold);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{ApiConfig, Config, CrawlerConfig, OutputConfig};

// Re-export parser functions
pub use parser::{
    compute_config_hash, load_config, load_config_with_credential, load_config_with_hash,
};
pub use validation::{validate, MAX_PER_PAGE};
