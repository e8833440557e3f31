//! Candidate deduplication against everything the tenant already knows.
//!
//! The exclusion set unions three sources: accepted records, proposals still
//! in review, and prior rejections (human and model). The duplicate rate it
//! reports is the primary market-exhaustion signal: it distinguishes "the
//! query is bad" from "this market is saturated".

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use crate::models::{Candidate, ProposalStatus};
use crate::repository::{DbContext, Result};

/// Query parameters that vary per click, not per listing.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "ref",
    "refid",
];

/// Canonical form of a candidate URL: lowercased host, no fragment, no
/// tracking parameters, remaining query sorted, no trailing slash.
pub fn canonicalize_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let path = parsed.path().trim_end_matches('/');

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.to_lowercase().as_str()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    let mut canonical = format!("{}://{}{}", parsed.scheme(), host, path);
    if !params.is_empty() {
        let query: Vec<String> = params.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
        canonical.push('?');
        canonical.push_str(&query.join("&"));
    }
    Some(canonical)
}

/// Dedup key: SHA-256 of the canonical URL, hex-encoded. The uniqueness
/// boundary for proposals per tenant.
pub fn dedup_key(raw: &str) -> Option<String> {
    let canonical = canonicalize_url(raw)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Some(hex::encode(hasher.finalize()))
}

/// Result of filtering one batch of candidates.
#[derive(Debug)]
pub struct DedupOutcome {
    pub survivors: Vec<Candidate>,
    pub duplicates: i64,
}

/// Known dedup keys for a tenant.
pub struct ExclusionSet {
    keys: HashSet<String>,
}

impl ExclusionSet {
    /// Load the three exclusion sources for a tenant.
    pub fn load(ctx: &DbContext, tenant_id: &str) -> Result<Self> {
        let mut keys = HashSet::new();

        for url in ctx.records().urls(tenant_id)? {
            if let Some(key) = dedup_key(&url) {
                keys.insert(key);
            }
        }

        // Pending proposals block re-proposal; rejected ones were already
        // turned down by a human and must not come back either. Approved
        // proposals are covered by the record they became.
        for (key, status) in ctx.proposals().keys_with_status(tenant_id)? {
            if matches!(status, ProposalStatus::Pending | ProposalStatus::Rejected) {
                keys.insert(key);
            }
        }

        for key in ctx.proposals().rejection_keys(tenant_id)? {
            keys.insert(key);
        }

        debug!("Loaded {} exclusion keys for tenant {}", keys.len(), tenant_id);
        Ok(Self { keys })
    }

    #[cfg(test)]
    pub fn from_urls(urls: &[&str]) -> Self {
        Self {
            keys: urls.iter().filter_map(|u| dedup_key(u)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains_url(&self, url: &str) -> bool {
        dedup_key(url).map(|key| self.keys.contains(&key)).unwrap_or(false)
    }

    /// Drop candidates already known to the tenant, counting them. Also
    /// catches the same listing appearing twice within one batch. Candidates
    /// whose URL cannot be canonicalized are dropped without counting as
    /// duplicates.
    pub fn filter(&mut self, candidates: Vec<Candidate>) -> DedupOutcome {
        let mut survivors = Vec::new();
        let mut duplicates = 0;

        for candidate in candidates {
            match dedup_key(&candidate.url) {
                Some(key) => {
                    if self.keys.insert(key) {
                        survivors.push(candidate);
                    } else {
                        duplicates += 1;
                    }
                }
                None => {
                    debug!("Dropping candidate with unparseable URL: {}", candidate.url);
                }
            }
        }

        DedupOutcome {
            survivors,
            duplicates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_strips_tracking_and_fragment() {
        let canonical = canonicalize_url(
            "https://Jobs.Example.com/listing/42/?utm_source=feed&b=2&a=1#apply",
        )
        .unwrap();
        assert_eq!(canonical, "https://jobs.example.com/listing/42?a=1&b=2");
    }

    #[test]
    fn equivalent_urls_share_a_dedup_key() {
        let a = dedup_key("https://jobs.example.com/listing/42?utm_campaign=x").unwrap();
        let b = dedup_key("https://JOBS.example.com/listing/42/").unwrap();
        assert_eq!(a, b);

        let c = dedup_key("https://jobs.example.com/listing/43").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn unparseable_url_yields_no_key() {
        assert!(dedup_key("not a url").is_none());
    }

    #[test]
    fn filter_counts_known_and_intra_batch_duplicates() {
        let mut set = ExclusionSet::from_urls(&[
            "https://jobs.example.com/listing/1",
            "https://jobs.example.com/listing/2",
        ]);

        let candidates = vec![
            Candidate::new("One", "A", "https://jobs.example.com/listing/1"),
            Candidate::new("Two", "B", "https://jobs.example.com/listing/2?utm_source=x"),
            Candidate::new("Three", "C", "https://jobs.example.com/listing/3"),
            Candidate::new("Three again", "C", "https://jobs.example.com/listing/3/"),
            Candidate::new("Four", "D", "https://jobs.example.com/listing/4"),
        ];

        let outcome = set.filter(candidates);
        assert_eq!(outcome.duplicates, 3);
        assert_eq!(outcome.survivors.len(), 2);
        assert_eq!(outcome.survivors[0].title, "Three");
        assert_eq!(outcome.survivors[1].title, "Four");
    }
}
