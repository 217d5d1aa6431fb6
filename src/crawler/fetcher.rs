//! Detail fetcher
//!
//! Fetches one detail record per stub. Every failure mode (transport error,
//! non-success status, undecodable body, incomplete payload) resolves to a
//! [`FailureRecord`] so one bad entity never aborts its page. Failed fetches
//! are not retried within a run; they are written out for offline
//! reprocessing.

use crate::crawler::client::{ApiClient, ProviderError};
use crate::crawler::enumerator::EntityStub;
use crate::output::{DetailOutcome, EnrichedRecord, FailureRecord};
use serde::Deserialize;

/// Detail payload as returned by the provider
///
/// Every field is optional here; [`check_completeness`] decides which ones
/// a usable record must carry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityDetail {
    pub id: Option<u64>,
    pub login: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub blog: Option<String>,
    pub company: Option<String>,
    pub public_repos: Option<u64>,
    pub followers: Option<u64>,
    pub following: Option<u64>,
    pub created_at: Option<String>,
}

/// Fetches enriched records for individual stubs
#[derive(Debug, Clone)]
pub struct DetailFetcher {
    client: ApiClient,
}

impl DetailFetcher {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Fetches the detail record for `stub`
    ///
    /// # Arguments
    ///
    /// * `stub` - The entity to enrich
    /// * `sl` - Sequence number assigned if the fetch succeeds
    /// * `since` - Cursor in force when the stub's page was fetched
    pub async fn fetch_detail(&self, stub: &EntityStub, sl: u64, since: u64) -> DetailOutcome {
        let detail = match self.request(stub).await {
            Ok(detail) => detail,
            Err(e) => return failed(stub, failure_reason(&e)),
        };

        match build_record(stub, detail, sl, since) {
            Ok(record) => {
                tracing::debug!("Fetched {}: {}", sl + 1, record.username);
                DetailOutcome::Enriched(record)
            }
            Err(reason) => failed(stub, reason),
        }
    }

    async fn request(&self, stub: &EntityStub) -> Result<EntityDetail, ProviderError> {
        let url = self.client.endpoint(&["users", &stub.handle])?;
        self.client.get_json(url).await
    }
}

fn failed(stub: &EntityStub, reason: String) -> DetailOutcome {
    tracing::warn!("Skipping {} (id {}): {}", stub.handle, stub.id, reason);
    DetailOutcome::Failed(FailureRecord {
        handle: stub.handle.clone(),
        id: stub.id,
        reason,
    })
}

fn failure_reason(error: &ProviderError) -> String {
    match error {
        e if e.is_not_found() => "not found".to_string(),
        ProviderError::Status { status, .. } => format!("http status {}", status),
        ProviderError::Transport { source, .. } => format!("transport error: {}", source),
        ProviderError::Decode { message, .. } => format!("malformed payload: {}", message),
        ProviderError::Endpoint { .. } => "invalid endpoint".to_string(),
    }
}

/// Checks that a detail payload describes `stub` and carries the fields a
/// record needs: a matching numeric `id`, a non-empty `login` and `created_at`
pub fn check_completeness(stub: &EntityStub, detail: &EntityDetail) -> Result<(), String> {
    match detail.id {
        None => return Err("incomplete payload: missing id".to_string()),
        Some(id) if id != stub.id => {
            return Err(format!(
                "identity mismatch: expected id {}, got {}",
                stub.id, id
            ))
        }
        Some(_) => {}
    }

    if detail.login.as_deref().map_or(true, |l| l.trim().is_empty()) {
        return Err("incomplete payload: missing login".to_string());
    }

    if detail.created_at.is_none() {
        return Err("incomplete payload: missing created_at".to_string());
    }

    Ok(())
}

fn build_record(
    stub: &EntityStub,
    detail: EntityDetail,
    sl: u64,
    since: u64,
) -> Result<EnrichedRecord, String> {
    check_completeness(stub, &detail)?;

    Ok(EnrichedRecord {
        sl,
        since,
        id: stub.id,
        username: detail.login.unwrap_or_default(),
        name: detail.name,
        email: detail.email,
        bio: detail.bio,
        location: detail.location,
        blog: detail.blog,
        company: detail.company,
        public_repos: detail.public_repos,
        followers: detail.followers,
        following: detail.following,
        created_at: detail.created_at.unwrap_or_default(),
    })
}
