//! Append-only run lifecycle records.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::AutomationConfig;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// One execution attempt. Inserted at run start, finalized exactly once at
/// run end, never mutated afterwards. This is the substrate the analytics
/// engine reads.
#[derive(Debug, Clone)]
pub struct RunLog {
    pub id: String,
    pub config_id: String,
    pub tenant_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// Query text actually executed.
    pub query: String,
    /// Raw candidates returned by the provider, pre-filter.
    pub prospects_found: i64,
    pub proposals_created: i64,
    /// Candidates dropped because they were already known.
    pub duplicates: i64,
    /// Related-search suggestions the provider offered alongside results.
    pub related_searches: Vec<String>,
    pub error: Option<String>,
}

impl RunLog {
    /// New log in the `running` state for a dispatched config.
    pub fn started(config: &AutomationConfig, query: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            config_id: config.id.clone(),
            tenant_id: config.tenant_id.clone(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            query: query.to_string(),
            prospects_found: 0,
            proposals_created: 0,
            duplicates: 0,
            related_searches: Vec::new(),
            error: None,
        }
    }

    /// Proposals per raw prospect, 0.0 when nothing was found.
    pub fn conversion_rate(&self) -> f64 {
        if self.prospects_found == 0 {
            0.0
        } else {
            self.proposals_created as f64 / self.prospects_found as f64
        }
    }

    /// Duplicates over raw prospects, the market-exhaustion input.
    pub fn duplicate_rate(&self) -> f64 {
        if self.prospects_found == 0 {
            0.0
        } else {
            self.duplicates as f64 / self.prospects_found as f64
        }
    }
}

/// Terminal metrics handed to the repository when a run finishes.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub prospects_found: i64,
    pub proposals_created: i64,
    pub duplicates: i64,
    pub related_searches: Vec<String>,
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn completed(
        prospects_found: i64,
        proposals_created: i64,
        duplicates: i64,
        related_searches: Vec<String>,
    ) -> Self {
        Self {
            status: RunStatus::Completed,
            prospects_found,
            proposals_created,
            duplicates,
            related_searches,
            error: None,
        }
    }

    pub fn failed(error: &str) -> Self {
        Self {
            status: RunStatus::Failed,
            prospects_found: 0,
            proposals_created: 0,
            duplicates: 0,
            related_searches: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}
