//! Per-user automation configuration.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One sourcing automation per (tenant, user).
///
/// Mutated by the scheduler (run bookkeeping) and by the operator (manual
/// edits, suggestion acceptance). `suggested_query` is advisory data from the
/// self-healer; it never becomes the active `query` without an explicit
/// acceptance action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    pub id: String,
    pub tenant_id: String,
    pub user_id: String,
    /// Whether the scheduler considers this config at all.
    pub enabled: bool,
    /// Minutes between scheduled runs.
    pub interval_minutes: i64,
    /// When the target is reached: true = disable (manual re-enable required),
    /// false = pause (skip runs until review drops the live total below target).
    pub disable_on_target: bool,
    /// Desired count of pending + approved proposals.
    pub target_count: i64,
    /// Active search query.
    pub query: String,
    /// Evaluation criteria handed to the model verbatim.
    pub criteria: String,
    /// Pending replacement query drafted by the self-healer.
    pub suggested_query: Option<String>,
    /// Location filter passed to the listings provider.
    pub location: Option<String>,
    /// Only consider listings posted within this many days.
    pub posted_within_days: Option<i64>,
    /// CRM record the query is personalized around. Runs fail fast if this
    /// points at a record that no longer exists.
    pub target_record_id: Option<String>,
    /// Terms derived from the user's documents (resume etc.) by the document
    /// pipeline; appended to the query by the search executor.
    pub profile_terms: Vec<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutomationConfig {
    /// Create a new enabled config with default pacing.
    pub fn new(tenant_id: &str, user_id: &str, query: &str, criteria: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            enabled: true,
            interval_minutes: 60,
            disable_on_target: false,
            target_count: 25,
            query: query.to_string(),
            criteria: criteria.to_string(),
            suggested_query: None,
            location: None,
            posted_within_days: None,
            target_record_id: None,
            profile_terms: Vec::new(),
            next_run_at: Some(now),
            last_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_interval_minutes(mut self, minutes: i64) -> Self {
        self.interval_minutes = minutes.max(1);
        self
    }

    pub fn with_target(mut self, count: i64, disable_on_target: bool) -> Self {
        self.target_count = count.max(1);
        self.disable_on_target = disable_on_target;
        self
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn with_profile_terms(mut self, terms: Vec<String>) -> Self {
        self.profile_terms = terms;
        self
    }

    /// Scheduling interval as a duration.
    pub fn interval(&self) -> Duration {
        Duration::minutes(self.interval_minutes.max(1))
    }

    /// Time-based due check. A config with no `next_run_at` has never been
    /// scheduled and is due immediately. Target/pause semantics are applied
    /// by the scheduler on top of this.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at.map(|at| at <= now).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_config_is_due_immediately() {
        let config = AutomationConfig::new("t1", "u1", "site reliability engineer", "senior only");
        assert!(config.enabled);
        assert!(config.is_due(Utc::now()));
    }

    #[test]
    fn due_respects_next_run_at() {
        let mut config = AutomationConfig::new("t1", "u1", "q", "c");
        let now = Utc::now();
        config.next_run_at = Some(now + Duration::minutes(10));
        assert!(!config.is_due(now));
        assert!(config.is_due(now + Duration::minutes(11)));
    }

    #[test]
    fn disabled_config_never_due() {
        let mut config = AutomationConfig::new("t1", "u1", "q", "c");
        config.enabled = false;
        config.next_run_at = None;
        assert!(!config.is_due(Utc::now()));
    }
}
