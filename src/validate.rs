//! Link validation.
//!
//! Probes candidate URLs before they reach the model, dropping dead or
//! expired listings. Probe failures are not run errors; the candidate is
//! dropped silently.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::Candidate;

fn default_max_concurrent() -> usize {
    8
}

fn default_probe_timeout_secs() -> u64 {
    5
}

/// Configuration for link probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Concurrent probe bound, to avoid overwhelming target sites.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Per-probe timeout in seconds.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Concurrent existence prober for candidate URLs.
pub struct LinkValidator {
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
}

impl LinkValidator {
    pub fn new(config: &ValidationConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("leadsource/0.4")
            .timeout(Duration::from_secs(config.probe_timeout_secs.max(1)))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        }
    }

    /// Probe all candidates in parallel within the concurrency bound and
    /// keep the reachable ones, preserving input order.
    pub async fn filter_reachable(
        &self,
        candidates: Vec<Candidate>,
        cancel: &CancellationToken,
    ) -> Vec<Candidate> {
        let mut handles = Vec::with_capacity(candidates.len());

        for (index, candidate) in candidates.into_iter().enumerate() {
            let client = self.client.clone();
            let semaphore = self.semaphore.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                if cancel.is_cancelled() {
                    return None;
                }
                if probe(&client, &cancel, &candidate.url).await {
                    Some((index, candidate))
                } else {
                    None
                }
            }));
        }

        let mut reachable = Vec::new();
        for handle in handles {
            if let Ok(Some(entry)) = handle.await {
                reachable.push(entry);
            }
        }
        reachable.sort_by_key(|(index, _)| *index);
        reachable.into_iter().map(|(_, candidate)| candidate).collect()
    }
}

/// HEAD probe with a GET fallback for servers that reject HEAD.
async fn probe(client: &reqwest::Client, cancel: &CancellationToken, url: &str) -> bool {
    let head = tokio::select! {
        _ = cancel.cancelled() => return false,
        result = client.head(url).send() => result,
    };

    match head {
        Ok(response) if response.status().is_success() => true,
        Ok(response) if response.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED => {
            let get = tokio::select! {
                _ = cancel.cancelled() => return false,
                result = client.get(url).send() => result,
            };
            match get {
                Ok(response) => response.status().is_success(),
                Err(err) => {
                    debug!("GET probe failed for {}: {}", url, err);
                    false
                }
            }
        }
        Ok(response) => {
            debug!("Dropping {} (HTTP {})", url, response.status());
            false
        }
        Err(err) => {
            debug!("Probe failed for {}: {}", url, err);
            false
        }
    }
}
