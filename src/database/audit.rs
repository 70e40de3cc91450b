// ABOUTME: Ingest audit log database operations
// ABOUTME: Records terminal saved/discarded outcomes for observability

use super::Database;
use anyhow::Result;
use sqlx::Row;

/// One audit entry for a terminal processing outcome
#[derive(Debug, Clone)]
pub struct AuditEntry {
    /// Event that produced the outcome
    pub event_uid: String,
    /// Provider slug
    pub provider: String,
    /// External activity id
    pub external_id: i64,
    /// `saved` or `discarded`
    pub outcome: String,
    /// Reason or supplementary detail
    pub detail: Option<String>,
}

impl Database {
    /// Create the audit log table
    pub(super) async fn migrate_audit(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS ingest_audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_uid TEXT NOT NULL,
                provider TEXT NOT NULL,
                external_id INTEGER NOT NULL,
                outcome TEXT NOT NULL CHECK (outcome IN ('saved', 'discarded')),
                detail TEXT,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_ingest_audit_event ON ingest_audit_log(event_uid)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append a terminal outcome to the audit log
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn record_audit_outcome(
        &self,
        event_uid: &str,
        provider: &str,
        external_id: i64,
        outcome: &str,
        detail: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO ingest_audit_log (event_uid, provider, external_id, outcome, detail)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(event_uid)
        .bind(provider)
        .bind(external_id)
        .bind(outcome)
        .bind(detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Audit entries for an event, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_audit_entries(&self, event_uid: &str) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM ingest_audit_log WHERE event_uid = $1 ORDER BY id ASC",
        )
        .bind(event_uid)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| AuditEntry {
                event_uid: row.get("event_uid"),
                provider: row.get("provider"),
                external_id: row.get("external_id"),
                outcome: row.get("outcome"),
                detail: row.get("detail"),
            })
            .collect())
    }
}
