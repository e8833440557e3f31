//! Listings search.
//!
//! Builds the composite query and issues it against the external listings
//! provider. Each provider implements `ListingSearchProvider`.

mod listings;
mod query;

pub use listings::{HttpListingsProvider, SearchConfig};
pub use query::QueryBuilder;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::models::Candidate;

/// One search request against the listings provider.
#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posted_within_days: Option<i64>,
    pub limit: usize,
}

/// What the provider returned: raw candidates plus the related-search
/// strings it suggests, which feed the self-healer's untried-searches signal.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default, alias = "results")]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub related_searches: Vec<String>,
}

/// Errors from the search stage.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("provider returned {0}")]
    Provider(String),
    #[error("failed to parse provider response: {0}")]
    Parse(String),
    #[error("search cancelled")]
    Cancelled,
}

/// A listings search backend.
#[async_trait]
pub trait ListingSearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse, SearchError>;
}

/// Issue a search with bounded retry and doubling backoff. Cancellation is
/// never retried; provider errors are retried up to `attempts` total tries.
pub async fn search_with_retry(
    provider: &Arc<dyn ListingSearchProvider>,
    request: &SearchRequest,
    cancel: &CancellationToken,
    attempts: usize,
    backoff: Duration,
) -> Result<SearchResponse, SearchError> {
    let attempts = attempts.max(1);
    let mut delay = backoff;
    let mut last_err = SearchError::Provider("no attempts made".to_string());

    for attempt in 1..=attempts {
        match provider.search(request, cancel).await {
            Ok(response) => return Ok(response),
            Err(SearchError::Cancelled) => return Err(SearchError::Cancelled),
            Err(err) => {
                warn!(
                    "Search attempt {}/{} against {} failed: {}",
                    attempt,
                    attempts,
                    provider.name(),
                    err
                );
                last_err = err;
            }
        }
        if attempt < attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(SearchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            delay *= 2;
        }
    }
    Err(last_err)
}
