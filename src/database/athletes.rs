// ABOUTME: Athlete record database operations
// ABOUTME: Handles athlete creation and upstream credential storage

use super::Database;
use crate::models::Athlete;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

impl Database {
    /// Create the athletes table
    pub(super) async fn migrate_athletes(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS athletes (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                display_name TEXT,
                strava_access_token TEXT,
                strava_refresh_token TEXT,
                strava_expires_at INTEGER,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create an athlete
    ///
    /// # Errors
    ///
    /// Returns an error if the email is already in use or the insert fails.
    pub async fn create_athlete(&self, athlete: &Athlete) -> Result<Uuid> {
        sqlx::query(
            r"
            INSERT INTO athletes (
                id, email, display_name,
                strava_access_token, strava_refresh_token, strava_expires_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(athlete.id.to_string())
        .bind(&athlete.email)
        .bind(&athlete.display_name)
        .bind(&athlete.strava_access_token)
        .bind(&athlete.strava_refresh_token)
        .bind(athlete.strava_expires_at.map(|t| t.timestamp()))
        .bind(athlete.created_at)
        .execute(&self.pool)
        .await?;

        Ok(athlete.id)
    }

    /// Get an athlete by id
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_athlete(&self, athlete_id: Uuid) -> Result<Option<Athlete>> {
        let row = sqlx::query("SELECT * FROM athletes WHERE id = $1")
            .bind(athlete_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let id: String = row.get("id");
            let expires_at: Option<i64> = row.get("strava_expires_at");
            Ok(Athlete {
                id: Uuid::parse_str(&id)?,
                email: row.get("email"),
                display_name: row.get("display_name"),
                strava_access_token: row.get("strava_access_token"),
                strava_refresh_token: row.get("strava_refresh_token"),
                strava_expires_at: expires_at.and_then(|ts| DateTime::from_timestamp(ts, 0)),
                created_at: row.get("created_at"),
            })
        })
        .transpose()
    }

    /// Get an athlete by id, erroring when missing
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the athlete does not exist.
    pub async fn get_athlete_required(&self, athlete_id: Uuid) -> Result<Athlete> {
        self.get_athlete(athlete_id)
            .await?
            .ok_or_else(|| anyhow!("Athlete not found: {athlete_id}"))
    }

    /// Store upstream credentials for an athlete
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn update_strava_credentials(
        &self,
        athlete_id: Uuid,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE athletes
            SET strava_access_token = $2, strava_refresh_token = $3, strava_expires_at = $4
            WHERE id = $1
            ",
        )
        .bind(athlete_id.to_string())
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
