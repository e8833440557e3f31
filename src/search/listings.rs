//! HTTP listings provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ListingSearchProvider, SearchError, SearchRequest, SearchResponse};

fn default_endpoint() -> String {
    "http://localhost:8091".to_string()
}

fn default_max_results() -> usize {
    25
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retry_attempts() -> usize {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

/// Configuration for the listings provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Provider base URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// API key sent as a bearer token when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Maximum candidates requested per search.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Total tries per run before the run is marked failed.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,
    /// Initial backoff between retries; doubles per attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            max_results: default_max_results(),
            timeout_secs: default_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl SearchConfig {
    /// Apply environment variable overrides.
    ///
    /// Supported: `SEARCH_ENDPOINT`, `SEARCH_API_KEY`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("SEARCH_ENDPOINT") {
            self.endpoint = val;
        }
        if let Ok(val) = std::env::var("SEARCH_API_KEY") {
            self.api_key = Some(val);
        }
        self
    }

    pub fn retry_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Listings provider speaking the JSON search API.
pub struct HttpListingsProvider {
    config: SearchConfig,
    client: reqwest::Client,
}

impl HttpListingsProvider {
    pub fn new(config: SearchConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("leadsource/0.4")
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self { config, client }
    }

    fn search_url(&self) -> String {
        format!("{}/v1/search", self.config.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl ListingSearchProvider for HttpListingsProvider {
    fn name(&self) -> &str {
        "listings-api"
    }

    async fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse, SearchError> {
        debug!("Searching listings provider for: {}", request.query);

        let mut builder = self.client.post(self.search_url()).json(request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(SearchError::Cancelled),
            result = builder.send() => {
                result.map_err(|e| SearchError::Connection(e.to_string()))?
            }
        };

        if !response.status().is_success() {
            return Err(SearchError::Provider(format!("HTTP {}", response.status())));
        }

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(SearchError::Cancelled),
            result = response.text() => {
                result.map_err(|e| SearchError::Connection(e.to_string()))?
            }
        };

        let mut parsed: SearchResponse =
            serde_json::from_str(&body).map_err(|e| SearchError::Parse(e.to_string()))?;

        // Candidates without a usable URL cannot be validated, deduplicated,
        // or proposed; drop them at the edge.
        parsed.candidates.retain(|c| !c.url.trim().is_empty());
        if parsed.candidates.len() > request.limit {
            parsed.candidates.truncate(request.limit);
        }

        debug!(
            "Provider returned {} candidates, {} related searches",
            parsed.candidates.len(),
            parsed.related_searches.len()
        );
        Ok(parsed)
    }
}
