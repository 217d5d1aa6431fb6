//! HTTP client for the remote provider
//!
//! This module handles:
//! - Building the reqwest client with credential, Accept and User-Agent headers
//! - Resolving provider endpoints against the configured base URL
//! - Fetching and decoding JSON responses
//! - Classifying failures as retryable or not

use crate::config::ApiConfig;
use crate::ConfigError;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors returned by provider requests
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error for {url}: {source}")]
    Transport { url: String, source: reqwest::Error },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Malformed response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Cannot build endpoint from base URL {base}")]
    Endpoint { base: String },
}

impl ProviderError {
    /// Returns true if repeating the same request later may succeed
    ///
    /// | Condition | Retryable |
    /// |-----------|-----------|
    /// | Timeout, connection or body error | yes |
    /// | HTTP 5xx | yes |
    /// | HTTP 403 / 429 (secondary throttling) | yes |
    /// | Other HTTP 4xx | no |
    /// | Undecodable payload | no |
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { source, .. } => !source.is_builder(),
            Self::Status { status, .. } => {
                *status >= 500
                    || *status == StatusCode::FORBIDDEN.as_u16()
                    || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            Self::Decode { .. } | Self::Endpoint { .. } => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::NOT_FOUND.as_u16())
    }
}

/// Builds an HTTP client carrying the provider credential
///
/// # Arguments
///
/// * `config` - The provider connection settings
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(ConfigError)` - The credential is not a valid header value, or the client failed to build
pub fn build_http_client(config: &ApiConfig) -> Result<Client, ConfigError> {
    let mut headers = HeaderMap::new();

    let mut auth = HeaderValue::from_str(&format!("token {}", config.credential.trim()))
        .map_err(|_| ConfigError::Validation("credential contains invalid characters".into()))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/vnd.github+json"),
    );

    Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .timeout(config.timeout())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
        .map_err(|e| ConfigError::Validation(format!("cannot build HTTP client: {}", e)))
}

/// Thin JSON-over-HTTP handle to the provider
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ConfigError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;
        let client = build_http_client(config)?;
        Ok(Self { client, base_url })
    }

    /// Resolves path segments below the base URL
    ///
    /// Segments are percent-encoded, and any path prefix on the base URL
    /// (e.g. `/api/v3` for self-hosted installs) is preserved.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::Endpoint {
                base: self.base_url.to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sends a GET request and decodes a successful JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ProviderError> {
        let url_str = url.to_string();

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| ProviderError::Transport {
                url: url_str.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                url: url_str,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| ProviderError::Transport {
                url: url_str.clone(),
                source,
            })?;

        serde_json::from_slice(&body).map_err(|e| ProviderError::Decode {
            url: url_str,
            message: e.to_string(),
        })
    }
}
