//! Quota monitor
//!
//! Queries the provider's remaining request budget and reset time. The
//! orchestrator treats an exhausted budget as a hard gate: no budgeted
//! request is sent until the reset time has passed and a fresh query says
//! the budget is available again.

use crate::crawler::client::{ApiClient, ProviderError};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;

/// Budget at or below which the crawl must wait for a reset
pub const QUOTA_FLOOR: u64 = 1;

/// Shortest throttle wait, so a stale reset time cannot cause a polling loop
pub const MIN_THROTTLE_WAIT: Duration = Duration::from_secs(1);

/// Remaining request budget as last reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaState {
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

impl QuotaState {
    pub fn is_exhausted(&self) -> bool {
        self.remaining <= QUOTA_FLOOR
    }

    /// Accounts locally for one budgeted request
    pub fn consume(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    /// How long to wait from `now` until the budget resets
    pub fn wait_duration(&self, now: DateTime<Utc>) -> Duration {
        (self.reset_at - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .max(MIN_THROTTLE_WAIT)
    }
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: CoreQuota,
}

#[derive(Debug, Deserialize)]
struct CoreQuota {
    remaining: u64,
    /// Unix seconds
    reset: i64,
}

/// Queries the provider's rate-limit endpoint
#[derive(Debug, Clone)]
pub struct QuotaMonitor {
    client: ApiClient,
}

impl QuotaMonitor {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Fetches the current quota; the query itself is not budgeted
    pub async fn check(&self) -> Result<QuotaState, ProviderError> {
        let url = self.client.endpoint(&["rate_limit"])?;
        let url_str = url.to_string();

        let response: RateLimitResponse = self.client.get_json(url).await?;
        let core = response.resources.core;

        let reset_at = Utc
            .timestamp_opt(core.reset, 0)
            .single()
            .ok_or_else(|| ProviderError::Decode {
                url: url_str,
                message: format!("reset timestamp {} out of range", core.reset),
            })?;

        tracing::debug!(
            "Quota: {} remaining, resets at {}",
            core.remaining,
            reset_at
        );

        Ok(QuotaState {
            remaining: core.remaining,
            reset_at,
        })
    }
}
