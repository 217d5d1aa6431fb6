use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use roster_harvest::config::load_config;
///
/// let config = load_config(Path::new("harvest.toml")).unwrap();
/// println!("Page size: {}", config.crawler.per_page);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    load_config_with_credential(path, None)
}

/// Loads a configuration file, replacing the credential before validation
///
/// The override lets operators keep the token out of the file (CLI flag or
/// environment). An empty override is ignored.
pub fn load_config_with_credential(
    path: &Path,
    credential: Option<String>,
) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    // Parse TOML
    let mut config: Config = toml::from_str(&content)?;

    if let Some(token) = credential.filter(|t| !t.trim().is_empty()) {
        config.api.credential = token;
    }

    validate(&config)?;

    Ok(config)
}

/// Computes a SHA-256 fingerprint of the effective configuration
///
/// The credential is redacted before hashing, so the fingerprint can be
/// logged and stored in the run ledger. It changes whenever any setting that
/// affects crawl output changes.
pub fn compute_config_hash(config: &Config) -> Result<String, ConfigError> {
    let mut redacted = config.clone();
    redacted.api.credential = String::new();
    let canonical = toml::to_string(&redacted)?;

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its fingerprint
pub fn load_config_with_hash(
    path: &Path,
    credential: Option<String>,
) -> Result<(Config, String), ConfigError> {
    let config = load_config_with_credential(path, credential)?;
    let hash = compute_config_hash(&config)?;
    Ok((config, hash))
}
