//! Crawler module for quota-aware entity enumeration
//!
//! This module contains the core crawling logic, including:
//! - The provider HTTP client and error classification
//! - Quota queries, page enumeration and detail fetching
//! - The crawl state machine
//! - The background crawl service

mod client;
mod coordinator;
mod enumerator;
mod fetcher;
mod quota;
mod service;

pub use client::{build_http_client, ApiClient, ProviderError};
pub use coordinator::{run_crawl, Coordinator, CrawlReport, StopSignal};
pub use enumerator::{next_cursor, EntityStub, PageEnumerator};
pub use fetcher::{check_completeness, DetailFetcher, EntityDetail};
pub use quota::{QuotaMonitor, QuotaState, MIN_THROTTLE_WAIT, QUOTA_FLOOR};
pub use service::{CrawlHandle, CrawlService};
