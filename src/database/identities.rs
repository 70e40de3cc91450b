// ABOUTME: External identity store mapping provider account ids to internal athletes
// ABOUTME: Handles eager stub creation and linkage transitions

use super::Database;
use crate::models::{ExternalIdentity, IdentityStatus};
use anyhow::Result;
use sqlx::Row;
use uuid::Uuid;

impl Database {
    /// Create the external identity table
    pub(super) async fn migrate_identities(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS external_identities (
                provider TEXT NOT NULL,
                external_user_id INTEGER NOT NULL,
                athlete_id TEXT,
                status TEXT NOT NULL DEFAULT 'unlinked'
                    CHECK (status IN ('unlinked', 'linked')),
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(provider, external_user_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Eagerly record that an external owner id was seen, so no event
    /// is silently lost while linkage is pending. No-op if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn upsert_identity_stub(&self, provider: &str, external_user_id: i64) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO external_identities (provider, external_user_id, status)
            VALUES ($1, $2, 'unlinked')
            ON CONFLICT(provider, external_user_id) DO NOTHING
            ",
        )
        .bind(provider)
        .bind(external_user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Look up an identity mapping
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_identity(
        &self,
        provider: &str,
        external_user_id: i64,
    ) -> Result<Option<ExternalIdentity>> {
        let row = sqlx::query(
            "SELECT * FROM external_identities WHERE provider = $1 AND external_user_id = $2",
        )
        .bind(provider)
        .bind(external_user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let status: String = row.get("status");
            let athlete_id: Option<String> = row.get("athlete_id");
            Ok(ExternalIdentity {
                provider: row.get("provider"),
                external_user_id: row.get("external_user_id"),
                athlete_id: athlete_id.as_deref().map(Uuid::parse_str).transpose()?,
                status: status.parse()?,
                created_at: row.get("created_at"),
            })
        })
        .transpose()
    }

    /// Link an external identity to an internal athlete
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn link_identity(
        &self,
        provider: &str,
        external_user_id: i64,
        athlete_id: Uuid,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO external_identities (provider, external_user_id, athlete_id, status)
            VALUES ($1, $2, $3, 'linked')
            ON CONFLICT(provider, external_user_id) DO UPDATE SET
                athlete_id = excluded.athlete_id,
                status = 'linked'
            ",
        )
        .bind(provider)
        .bind(external_user_id)
        .bind(athlete_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Resolve the linked athlete for an external owner, if any
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn resolve_athlete(
        &self,
        provider: &str,
        external_user_id: i64,
    ) -> Result<Option<Uuid>> {
        Ok(self
            .get_identity(provider, external_user_id)
            .await?
            .filter(|identity| identity.status == IdentityStatus::Linked)
            .and_then(|identity| identity.athlete_id))
    }
}
