//! Accepted lead records.
//!
//! The CRM's record store proper is an external collaborator; this is the
//! minimal slice the engine needs for exclusion sets, target-entity checks,
//! and materializing approved proposals.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::RecordDraft;

/// An accepted record in the tenant's CRM.
#[derive(Debug, Clone)]
pub struct LeadRecord {
    pub id: String,
    pub tenant_id: String,
    pub title: String,
    pub organization: String,
    pub source_url: String,
    pub created_at: DateTime<Utc>,
}

impl LeadRecord {
    /// Materialize a record from an approved proposal draft.
    pub fn from_draft(tenant_id: &str, draft: &RecordDraft) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            title: draft.title.clone(),
            organization: draft.organization.clone(),
            source_url: draft.source_url.clone(),
            created_at: Utc::now(),
        }
    }
}
