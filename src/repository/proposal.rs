//! Proposal and rejection repository.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, Row};

use super::{connect, is_unique_violation, parse_datetime, parse_datetime_opt, Result, StoreError};
use crate::models::{Proposal, ProposalStatus, Rejection};

/// SQLite-backed repository for review proposals and model rejections.
pub struct ProposalRepository {
    db_path: PathBuf,
}

impl ProposalRepository {
    pub const SCHEMA: &'static str = r#"
        CREATE TABLE IF NOT EXISTS proposals (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            config_id TEXT NOT NULL,
            dedup_key TEXT NOT NULL,
            source_url TEXT NOT NULL,
            title TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            body TEXT NOT NULL,
            created_at TEXT NOT NULL,
            reviewed_at TEXT,

            UNIQUE(tenant_id, dedup_key)
        );

        CREATE INDEX IF NOT EXISTS idx_proposals_tenant_status
            ON proposals(tenant_id, status);

        -- Candidates the evaluation model turned down.
        CREATE TABLE IF NOT EXISTS rejections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id TEXT NOT NULL,
            dedup_key TEXT NOT NULL,
            source_url TEXT NOT NULL,
            title TEXT NOT NULL,
            reason TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,

            UNIQUE(tenant_id, dedup_key)
        );
    "#;

    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection> {
        connect(&self.db_path)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Proposal> {
        let status: String = row.get("status")?;
        let body: String = row.get("body")?;
        let created_at: String = row.get("created_at")?;
        let reviewed_at: Option<String> = row.get("reviewed_at")?;
        let body = serde_json::from_str(&body).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Proposal {
            id: row.get("id")?,
            tenant_id: row.get("tenant_id")?,
            config_id: row.get("config_id")?,
            dedup_key: row.get("dedup_key")?,
            source_url: row.get("source_url")?,
            title: row.get("title")?,
            status: ProposalStatus::from_str(&status).unwrap_or(ProposalStatus::Pending),
            body,
            created_at: parse_datetime(&created_at),
            reviewed_at: parse_datetime_opt(reviewed_at),
        })
    }

    /// Insert a proposal. Returns false when the (tenant, dedup_key)
    /// constraint already holds: a concurrent run got there first, which
    /// is success from the caller's point of view.
    pub fn create(&self, proposal: &Proposal) -> Result<bool> {
        let conn = self.connect()?;
        let result = conn.execute(
            r#"INSERT INTO proposals
               (id, tenant_id, config_id, dedup_key, source_url, title, status, body, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                proposal.id,
                proposal.tenant_id,
                proposal.config_id,
                proposal.dedup_key,
                proposal.source_url,
                proposal.title,
                proposal.status.as_str(),
                serde_json::to_string(&proposal.body)?,
                proposal.created_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => Ok(true),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Persist a model rejection; duplicate keys are benign here too.
    pub fn record_rejection(&self, rejection: &Rejection) -> Result<bool> {
        let conn = self.connect()?;
        let result = conn.execute(
            r#"INSERT INTO rejections
               (tenant_id, dedup_key, source_url, title, reason, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                rejection.tenant_id,
                rejection.dedup_key,
                rejection.source_url,
                rejection.title,
                rejection.reason,
                rejection.created_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => Ok(true),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Count of proposals still counting toward the compilation target.
    pub fn count_active(&self, tenant_id: &str) -> Result<i64> {
        let conn = self.connect()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM proposals
             WHERE tenant_id = ?1 AND status IN ('pending', 'approved')",
            params![tenant_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// All proposal dedup keys with their review status.
    pub fn keys_with_status(&self, tenant_id: &str) -> Result<Vec<(String, ProposalStatus)>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT dedup_key, status FROM proposals WHERE tenant_id = ?1")?;
        let rows = stmt.query_map(params![tenant_id], |row| {
            let key: String = row.get(0)?;
            let status: String = row.get(1)?;
            Ok((key, status))
        })?;
        let mut keys = Vec::new();
        for row in rows {
            let (key, status) = row?;
            keys.push((
                key,
                ProposalStatus::from_str(&status).unwrap_or(ProposalStatus::Pending),
            ));
        }
        Ok(keys)
    }

    /// Dedup keys of model rejections.
    pub fn rejection_keys(&self, tenant_id: &str) -> Result<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT dedup_key FROM rejections WHERE tenant_id = ?1")?;
        let rows = stmt.query_map(params![tenant_id], |row| row.get(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    /// Titles with review status, for keyword analytics.
    pub fn titles_with_status(&self, tenant_id: &str) -> Result<Vec<(String, ProposalStatus)>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT title, status FROM proposals WHERE tenant_id = ?1")?;
        let rows = stmt.query_map(params![tenant_id], |row| {
            let title: String = row.get(0)?;
            let status: String = row.get(1)?;
            Ok((title, status))
        })?;
        let mut titles = Vec::new();
        for row in rows {
            let (title, status) = row?;
            titles.push((
                title,
                ProposalStatus::from_str(&status).unwrap_or(ProposalStatus::Pending),
            ));
        }
        Ok(titles)
    }

    /// Titles of model-rejected candidates.
    pub fn rejection_titles(&self, tenant_id: &str) -> Result<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT title FROM rejections WHERE tenant_id = ?1")?;
        let rows = stmt.query_map(params![tenant_id], |row| row.get(0))?;
        let mut titles = Vec::new();
        for row in rows {
            titles.push(row?);
        }
        Ok(titles)
    }

    pub fn get(&self, id: &str) -> Result<Option<Proposal>> {
        use rusqlite::OptionalExtension;
        let conn = self.connect()?;
        let proposal = conn
            .query_row(
                "SELECT * FROM proposals WHERE id = ?1",
                params![id],
                Self::from_row,
            )
            .optional()?;
        Ok(proposal)
    }

    pub fn list_pending(&self, tenant_id: &str) -> Result<Vec<Proposal>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM proposals
             WHERE tenant_id = ?1 AND status = 'pending'
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![tenant_id], Self::from_row)?;
        let mut proposals = Vec::new();
        for row in rows {
            proposals.push(row?);
        }
        Ok(proposals)
    }

    /// Review decision; errors if the proposal does not exist.
    pub fn set_status(&self, id: &str, status: ProposalStatus) -> Result<()> {
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE proposals SET status = ?2, reviewed_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), Utc::now().to_rfc3339()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("proposal {id}")));
        }
        Ok(())
    }
}
