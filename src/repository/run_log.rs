//! Run log repository.
//!
//! Logs are append-only: inserted in the `running` state when a run is
//! dispatched and finalized exactly once when it terminates.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, Row};

use super::{connect, parse_datetime, parse_datetime_opt, Result, StoreError};
use crate::models::{RunLog, RunOutcome, RunStatus};

/// Disable-on-target policy applied atomically with run finalization.
#[derive(Debug, Clone)]
pub struct CompletionPolicy {
    pub config_id: String,
    pub tenant_id: String,
}

/// SQLite-backed repository for run logs.
pub struct RunLogRepository {
    db_path: PathBuf,
}

impl RunLogRepository {
    pub const SCHEMA: &'static str = r#"
        CREATE TABLE IF NOT EXISTS run_logs (
            id TEXT PRIMARY KEY,
            config_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            status TEXT NOT NULL DEFAULT 'running',
            query TEXT NOT NULL,
            prospects_found INTEGER NOT NULL DEFAULT 0,
            proposals_created INTEGER NOT NULL DEFAULT 0,
            duplicates INTEGER NOT NULL DEFAULT 0,
            related_searches TEXT NOT NULL DEFAULT '[]',
            error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_run_logs_config
            ON run_logs(config_id, started_at);
    "#;

    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection> {
        connect(&self.db_path)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<RunLog> {
        let started_at: String = row.get("started_at")?;
        let finished_at: Option<String> = row.get("finished_at")?;
        let status: String = row.get("status")?;
        let related: String = row.get("related_searches")?;
        Ok(RunLog {
            id: row.get("id")?,
            config_id: row.get("config_id")?,
            tenant_id: row.get("tenant_id")?,
            started_at: parse_datetime(&started_at),
            finished_at: parse_datetime_opt(finished_at),
            status: RunStatus::from_str(&status).unwrap_or(RunStatus::Failed),
            query: row.get("query")?,
            prospects_found: row.get("prospects_found")?,
            proposals_created: row.get("proposals_created")?,
            duplicates: row.get("duplicates")?,
            related_searches: serde_json::from_str(&related).unwrap_or_default(),
            error: row.get("error")?,
        })
    }

    /// Record a dispatched run. Only called once the run is actually
    /// starting; configs that fail validation never reach this point.
    pub fn insert_started(&self, log: &RunLog) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"INSERT INTO run_logs
               (id, config_id, tenant_id, started_at, status, query)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                log.id,
                log.config_id,
                log.tenant_id,
                log.started_at.to_rfc3339(),
                RunStatus::Running.as_str(),
                log.query,
            ],
        )?;
        Ok(())
    }

    /// Finalize a run exactly once. A second finalization attempt is an
    /// error, not an overwrite. When a completion policy is supplied, the
    /// disable-on-target flip happens in the same transaction.
    pub fn finalize(
        &self,
        id: &str,
        outcome: &RunOutcome,
        policy: Option<&CompletionPolicy>,
    ) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            r#"UPDATE run_logs
               SET finished_at = ?2, status = ?3, prospects_found = ?4,
                   proposals_created = ?5, duplicates = ?6,
                   related_searches = ?7, error = ?8
               WHERE id = ?1 AND finished_at IS NULL"#,
            params![
                id,
                Utc::now().to_rfc3339(),
                outcome.status.as_str(),
                outcome.prospects_found,
                outcome.proposals_created,
                outcome.duplicates,
                serde_json::to_string(&outcome.related_searches)?,
                outcome.error,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::AlreadyFinalized(id.to_string()));
        }

        if let Some(policy) = policy {
            tx.execute(
                r#"UPDATE automation_configs
                   SET enabled = 0, updated_at = ?3
                   WHERE id = ?1 AND disable_on_target = 1
                     AND target_count <= (
                         SELECT COUNT(*) FROM proposals
                         WHERE tenant_id = ?2 AND status IN ('pending', 'approved')
                     )"#,
                params![policy.config_id, policy.tenant_id, Utc::now().to_rfc3339()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<RunLog>> {
        use rusqlite::OptionalExtension;
        let conn = self.connect()?;
        let log = conn
            .query_row(
                "SELECT * FROM run_logs WHERE id = ?1",
                params![id],
                Self::from_row,
            )
            .optional()?;
        Ok(log)
    }

    /// Most recent runs for one config, newest first.
    pub fn recent_for_config(&self, config_id: &str, limit: usize) -> Result<Vec<RunLog>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM run_logs WHERE config_id = ?1
             ORDER BY started_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![config_id, limit as i64], Self::from_row)?;
        let mut logs = Vec::new();
        for row in rows {
            logs.push(row?);
        }
        Ok(logs)
    }

    /// Most recent runs across a tenant, newest first.
    pub fn recent_for_tenant(&self, tenant_id: &str, limit: usize) -> Result<Vec<RunLog>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM run_logs WHERE tenant_id = ?1
             ORDER BY started_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![tenant_id, limit as i64], Self::from_row)?;
        let mut logs = Vec::new();
        for row in rows {
            logs.push(row?);
        }
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AutomationConfig;
    use crate::repository::DbContext;

    fn test_ctx() -> (tempfile::TempDir, DbContext) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("test.db"));
        ctx.init_schema().unwrap();
        (dir, ctx)
    }

    #[test]
    fn finalize_is_exactly_once() {
        let (_dir, ctx) = test_ctx();
        let repo = ctx.run_logs();
        let config = AutomationConfig::new("t1", "u1", "q", "c");
        let log = RunLog::started(&config, "q");
        repo.insert_started(&log).unwrap();

        let outcome = RunOutcome::completed(5, 1, 2, vec!["related".to_string()]);
        repo.finalize(&log.id, &outcome, None).unwrap();

        let loaded = repo.get(&log.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert_eq!(loaded.prospects_found, 5);
        assert_eq!(loaded.proposals_created, 1);
        assert_eq!(loaded.duplicates, 2);
        assert!(loaded.finished_at.is_some());

        let again = repo.finalize(&log.id, &RunOutcome::failed("late"), None);
        assert!(matches!(again, Err(StoreError::AlreadyFinalized(_))));
        // First finalization stands.
        let loaded = repo.get(&log.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
    }

    #[test]
    fn recent_for_config_is_newest_first() {
        let (_dir, ctx) = test_ctx();
        let repo = ctx.run_logs();
        let config = AutomationConfig::new("t1", "u1", "q", "c");

        for i in 0..3 {
            let mut log = RunLog::started(&config, &format!("query {i}"));
            log.started_at = Utc::now() + chrono::Duration::seconds(i);
            repo.insert_started(&log).unwrap();
        }

        let logs = repo.recent_for_config(&config.id, 2).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].query, "query 2");
        assert_eq!(logs[1].query, "query 1");
    }
}
