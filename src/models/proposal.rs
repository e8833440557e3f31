//! Review proposals and persisted model rejections.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Review state of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ProposalStatus::Pending),
            "approved" => Some(ProposalStatus::Approved),
            "rejected" => Some(ProposalStatus::Rejected),
            _ => None,
        }
    }
}

/// CRM entity a proposal targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Lead,
    Contact,
    Deal,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Lead => "lead",
            EntityType::Contact => "contact",
            EntityType::Deal => "deal",
        }
    }
}

/// Payload for a proposed record creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDraft {
    pub title: String,
    #[serde(default)]
    pub organization: String,
    pub source_url: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub posted_date: Option<NaiveDate>,
    /// Model's stated reason for approving this candidate.
    #[serde(default)]
    pub evaluation_reason: String,
}

/// What a proposal asks the reviewer to do, as a tagged variant rather than
/// dispatch on type strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum ProposalBody {
    CreateRecord {
        entity_type: EntityType,
        payload: RecordDraft,
    },
    UpdateRecord {
        entity_type: EntityType,
        record_id: String,
        payload: serde_json::Value,
    },
}

/// A candidate awaiting human review.
///
/// `dedup_key` is derived from the candidate's canonical URL and is unique
/// per tenant; the database constraint, not caller logic, enforces that no
/// candidate is proposed twice.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub id: String,
    pub tenant_id: String,
    pub config_id: String,
    pub dedup_key: String,
    pub source_url: String,
    pub title: String,
    pub status: ProposalStatus,
    pub body: ProposalBody,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl Proposal {
    /// Build a pending create-record proposal from an approved draft.
    pub fn create_record(
        tenant_id: &str,
        config_id: &str,
        dedup_key: &str,
        draft: RecordDraft,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            config_id: config_id.to_string(),
            dedup_key: dedup_key.to_string(),
            source_url: draft.source_url.clone(),
            title: draft.title.clone(),
            status: ProposalStatus::Pending,
            body: ProposalBody::CreateRecord {
                entity_type: EntityType::Lead,
                payload: draft,
            },
            created_at: Utc::now(),
            reviewed_at: None,
        }
    }
}

/// A candidate the evaluation model turned down. Persisted so future runs
/// exclude it and so analytics can contrast approved and rejected titles.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub tenant_id: String,
    pub dedup_key: String,
    pub source_url: String,
    pub title: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl Rejection {
    pub fn new(tenant_id: &str, dedup_key: &str, url: &str, title: &str, reason: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            dedup_key: dedup_key.to_string(),
            source_url: url.to_string(),
            title: title.to_string(),
            reason: reason.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposal_body_serializes_with_operation_tag() {
        let body = ProposalBody::CreateRecord {
            entity_type: EntityType::Lead,
            payload: RecordDraft {
                title: "Staff Engineer".to_string(),
                organization: "Acme".to_string(),
                source_url: "https://a.example/1".to_string(),
                snippet: String::new(),
                posted_date: None,
                evaluation_reason: "strong match".to_string(),
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["operation"], "create_record");
        assert_eq!(json["entity_type"], "lead");
        assert_eq!(json["payload"]["title"], "Staff Engineer");
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ProposalStatus::Pending,
            ProposalStatus::Approved,
            ProposalStatus::Rejected,
        ] {
            assert_eq!(ProposalStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(ProposalStatus::from_str("bogus"), None);
    }
}
