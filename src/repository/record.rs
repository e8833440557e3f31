//! Lead record repository.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, Row};

use super::{connect, parse_datetime, Result};
use crate::models::LeadRecord;

/// SQLite-backed repository for accepted lead records.
pub struct RecordRepository {
    db_path: PathBuf,
}

impl RecordRepository {
    pub const SCHEMA: &'static str = r#"
        CREATE TABLE IF NOT EXISTS lead_records (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            title TEXT NOT NULL,
            organization TEXT NOT NULL DEFAULT '',
            source_url TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_lead_records_tenant
            ON lead_records(tenant_id);
    "#;

    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection> {
        connect(&self.db_path)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<LeadRecord> {
        let created_at: String = row.get("created_at")?;
        Ok(LeadRecord {
            id: row.get("id")?,
            tenant_id: row.get("tenant_id")?,
            title: row.get("title")?,
            organization: row.get("organization")?,
            source_url: row.get("source_url")?,
            created_at: parse_datetime(&created_at),
        })
    }

    pub fn insert(&self, record: &LeadRecord) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"INSERT INTO lead_records
               (id, tenant_id, title, organization, source_url, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                record.id,
                record.tenant_id,
                record.title,
                record.organization,
                record.source_url,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<LeadRecord>> {
        use rusqlite::OptionalExtension;
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT * FROM lead_records WHERE id = ?1",
                params![id],
                Self::from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM lead_records WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Source URLs of every accepted record for a tenant.
    pub fn urls(&self, tenant_id: &str) -> Result<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT source_url FROM lead_records WHERE tenant_id = ?1")?;
        let rows = stmt.query_map(params![tenant_id], |row| row.get(0))?;
        let mut urls = Vec::new();
        for row in rows {
            urls.push(row?);
        }
        Ok(urls)
    }

    pub fn count(&self, tenant_id: &str) -> Result<i64> {
        let conn = self.connect()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM lead_records WHERE tenant_id = ?1",
            params![tenant_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
