//! Page enumerator
//!
//! Fetches successive pages of entity stubs using the `since` cursor. The
//! provider sorts by ascending id; the largest id on a page becomes the next
//! cursor. An empty page means the source is exhausted.

use crate::crawler::client::{ApiClient, ProviderError};
use crate::HarvestError;
use serde::Deserialize;

/// Minimal identifier returned by the listing endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EntityStub {
    pub id: u64,
    #[serde(rename = "login")]
    pub handle: String,
}

/// Fetches pages of stubs from the listing endpoint
#[derive(Debug, Clone)]
pub struct PageEnumerator {
    client: ApiClient,
    per_page: u32,
}

impl PageEnumerator {
    pub fn new(client: ApiClient, per_page: u32) -> Self {
        Self { client, per_page }
    }

    /// Fetches the page of stubs whose ids follow `cursor`
    pub async fn fetch_page(&self, cursor: u64) -> Result<Vec<EntityStub>, ProviderError> {
        let mut url = self.client.endpoint(&["users"])?;
        url.query_pairs_mut()
            .append_pair("since", &cursor.to_string())
            .append_pair("per_page", &self.per_page.to_string());

        let stubs: Vec<EntityStub> = self.client.get_json(url).await?;
        tracing::debug!("Fetched {} stubs after since={}", stubs.len(), cursor);
        Ok(stubs)
    }
}

/// Computes the cursor that follows a non-empty page
///
/// The new cursor is the page's largest id and must be strictly greater than
/// the current one; anything else means the provider's ordering cannot be
/// trusted and is reported as a consistency fault.
pub fn next_cursor(cursor: u64, stubs: &[EntityStub]) -> Result<u64, HarvestError> {
    let max_id = stubs.iter().map(|s| s.id).max().unwrap_or(cursor);
    if max_id <= cursor {
        return Err(HarvestError::ConsistencyFault { cursor, max_id });
    }
    Ok(max_id)
}
