//! Automation config repository.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::{connect, parse_datetime, parse_datetime_opt, Result, StoreError};
use crate::models::AutomationConfig;

/// SQLite-backed repository for automation configs.
pub struct AutomationRepository {
    db_path: PathBuf,
}

impl AutomationRepository {
    pub const SCHEMA: &'static str = r#"
        CREATE TABLE IF NOT EXISTS automation_configs (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            interval_minutes INTEGER NOT NULL DEFAULT 60,
            disable_on_target INTEGER NOT NULL DEFAULT 0,
            target_count INTEGER NOT NULL DEFAULT 25,
            query TEXT NOT NULL,
            criteria TEXT NOT NULL,
            suggested_query TEXT,
            location TEXT,
            posted_within_days INTEGER,
            target_record_id TEXT,
            profile_terms TEXT NOT NULL DEFAULT '[]',
            next_run_at TEXT,
            last_run_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,

            UNIQUE(tenant_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_automation_due
            ON automation_configs(next_run_at) WHERE enabled = 1;
    "#;

    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection> {
        connect(&self.db_path)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<AutomationConfig> {
        let profile_terms: String = row.get("profile_terms")?;
        let next_run_at: Option<String> = row.get("next_run_at")?;
        let last_run_at: Option<String> = row.get("last_run_at")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        Ok(AutomationConfig {
            id: row.get("id")?,
            tenant_id: row.get("tenant_id")?,
            user_id: row.get("user_id")?,
            enabled: row.get::<_, i64>("enabled")? != 0,
            interval_minutes: row.get("interval_minutes")?,
            disable_on_target: row.get::<_, i64>("disable_on_target")? != 0,
            target_count: row.get("target_count")?,
            query: row.get("query")?,
            criteria: row.get("criteria")?,
            suggested_query: row.get("suggested_query")?,
            location: row.get("location")?,
            posted_within_days: row.get("posted_within_days")?,
            target_record_id: row.get("target_record_id")?,
            profile_terms: serde_json::from_str(&profile_terms).unwrap_or_default(),
            next_run_at: parse_datetime_opt(next_run_at),
            last_run_at: parse_datetime_opt(last_run_at),
            created_at: parse_datetime(&created_at),
            updated_at: parse_datetime(&updated_at),
        })
    }

    /// Insert or fully replace a config.
    pub fn save(&self, config: &AutomationConfig) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"INSERT OR REPLACE INTO automation_configs
               (id, tenant_id, user_id, enabled, interval_minutes, disable_on_target,
                target_count, query, criteria, suggested_query, location,
                posted_within_days, target_record_id, profile_terms,
                next_run_at, last_run_at, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"#,
            params![
                config.id,
                config.tenant_id,
                config.user_id,
                config.enabled as i64,
                config.interval_minutes,
                config.disable_on_target as i64,
                config.target_count,
                config.query,
                config.criteria,
                config.suggested_query,
                config.location,
                config.posted_within_days,
                config.target_record_id,
                serde_json::to_string(&config.profile_terms)?,
                config.next_run_at.map(|t| t.to_rfc3339()),
                config.last_run_at.map(|t| t.to_rfc3339()),
                config.created_at.to_rfc3339(),
                config.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<AutomationConfig>> {
        use rusqlite::OptionalExtension;
        let conn = self.connect()?;
        let config = conn
            .query_row(
                "SELECT * FROM automation_configs WHERE id = ?1",
                params![id],
                Self::from_row,
            )
            .optional()?;
        Ok(config)
    }

    pub fn require(&self, id: &str) -> Result<AutomationConfig> {
        self.get(id)?
            .ok_or_else(|| StoreError::NotFound(format!("automation config {id}")))
    }

    pub fn list(&self, tenant_id: Option<&str>) -> Result<Vec<AutomationConfig>> {
        let conn = self.connect()?;
        let mut configs = Vec::new();
        match tenant_id {
            Some(tenant) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM automation_configs WHERE tenant_id = ?1 ORDER BY created_at",
                )?;
                let rows = stmt.query_map(params![tenant], Self::from_row)?;
                for row in rows {
                    configs.push(row?);
                }
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT * FROM automation_configs ORDER BY created_at")?;
                let rows = stmt.query_map([], Self::from_row)?;
                for row in rows {
                    configs.push(row?);
                }
            }
        }
        Ok(configs)
    }

    /// Enabled configs whose next run time has passed (or was never set).
    pub fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<AutomationConfig>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM automation_configs
             WHERE enabled = 1 AND (next_run_at IS NULL OR next_run_at <= ?1)
             ORDER BY next_run_at",
        )?;
        let rows = stmt.query_map(params![now.to_rfc3339()], Self::from_row)?;
        let mut configs = Vec::new();
        for row in rows {
            configs.push(row?);
        }
        Ok(configs)
    }

    /// Run bookkeeping: advance the schedule regardless of run outcome.
    pub fn reschedule(
        &self,
        id: &str,
        next_run_at: DateTime<Utc>,
        last_run_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE automation_configs
             SET next_run_at = ?2, last_run_at = ?3, updated_at = ?4
             WHERE id = ?1",
            params![
                id,
                next_run_at.to_rfc3339(),
                last_run_at.to_rfc3339(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE automation_configs SET enabled = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, enabled as i64, Utc::now().to_rfc3339()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("automation config {id}")));
        }
        Ok(())
    }

    /// Compare-and-set for self-healer output: the suggestion is stored only
    /// if none is already pending, so concurrent runs cannot both store one.
    pub fn store_suggestion_if_absent(&self, id: &str, suggestion: &str) -> Result<bool> {
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE automation_configs
             SET suggested_query = ?2, updated_at = ?3
             WHERE id = ?1 AND suggested_query IS NULL",
            params![id, suggestion, Utc::now().to_rfc3339()],
        )?;
        Ok(updated == 1)
    }

    /// Explicit human acceptance: promote the pending suggestion to the
    /// active query. The only code path that writes `query` from a
    /// suggestion.
    pub fn accept_suggestion(&self, id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE automation_configs
             SET query = suggested_query, suggested_query = NULL, updated_at = ?2
             WHERE id = ?1 AND suggested_query IS NOT NULL",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(updated == 1)
    }

    /// Discard the pending suggestion without touching the active query.
    pub fn reject_suggestion(&self, id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE automation_configs
             SET suggested_query = NULL, updated_at = ?2
             WHERE id = ?1 AND suggested_query IS NOT NULL",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(updated == 1)
    }
}
