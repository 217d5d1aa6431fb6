use crate::config::types::{ApiConfig, Config, CrawlerConfig, OutputConfig};
use crate::ConfigError;
use url::{Host, Url};

/// Largest page size the provider honors
pub const MAX_PER_PAGE: u32 = 100;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_api_config(&config.api)?;
    validate_crawler_config(&config.crawler)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates provider connection settings
fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    match url.scheme() {
        "https" => {}
        "http" if is_loopback(&url) => {}
        _ => {
            return Err(ConfigError::Validation(format!(
                "base_url '{}' must use HTTPS (plain HTTP is only allowed for loopback hosts)",
                config.base_url
            )))
        }
    }

    if config.credential.trim().is_empty() {
        return Err(ConfigError::Validation(
            "credential cannot be empty".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.request_timeout < 1 {
        return Err(ConfigError::Validation(format!(
            "request_timeout must be >= 1s, got {}s",
            config.request_timeout
        )));
    }

    Ok(())
}

/// Validates crawl loop settings
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.per_page < 1 || config.per_page > MAX_PER_PAGE {
        return Err(ConfigError::Validation(format!(
            "per_page must be between 1 and {}, got {}",
            MAX_PER_PAGE, config.per_page
        )));
    }

    if config.pacing_delay < 1 {
        return Err(ConfigError::Validation(
            "pacing_delay must be >= 1ms".to_string(),
        ));
    }

    Ok(())
}

/// Validates output locations and thresholds
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.checkpoint_path.is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint_path cannot be empty".to_string(),
        ));
    }

    if config.data_dir.is_empty() {
        return Err(ConfigError::Validation(
            "data_dir cannot be empty".to_string(),
        ));
    }

    if config.ledger_path.is_empty() {
        return Err(ConfigError::Validation(
            "ledger_path cannot be empty".to_string(),
        ));
    }

    if config.batch_threshold < 1 {
        return Err(ConfigError::Validation(format!(
            "batch_threshold must be >= 1, got {}",
            config.batch_threshold
        )));
    }

    if config.error_batch_threshold < 1 {
        return Err(ConfigError::Validation(format!(
            "error_batch_threshold must be >= 1, got {}",
            config.error_batch_threshold
        )));
    }

    Ok(())
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain == "localhost",
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
