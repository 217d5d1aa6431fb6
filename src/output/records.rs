//! Persisted record types
//!
//! Field names on the wire match the batch files downstream consumers already
//! read, so `handle` is written as `username`.

use serde::{Deserialize, Serialize};

/// Full detail payload for one entity, as written to a success unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    /// 0-based sequence number across the whole crawl
    pub sl: u64,

    /// Cursor in force when the record's page was fetched
    pub since: u64,

    pub id: u64,
    pub username: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub blog: Option<String>,
    pub company: Option<String>,
    pub public_repos: Option<u64>,
    pub followers: Option<u64>,
    pub following: Option<u64>,
    pub created_at: String,
}

/// An entity whose detail fetch failed, as written to a failure unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    #[serde(rename = "username")]
    pub handle: String,
    pub id: u64,
    pub reason: String,
}

/// Result of fetching one entity's detail record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailOutcome {
    Enriched(EnrichedRecord),
    Failed(FailureRecord),
}

impl DetailOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Enriched(_))
    }
}
