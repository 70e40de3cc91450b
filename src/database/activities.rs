// ABOUTME: Idempotent activity upsert writer keyed by (source, source_object_id)
// ABOUTME: Handles race-safe fallback paths for concurrent create and update deliveries

use super::{is_unique_violation, violates_column, Database};
use crate::models::{Activity, ActivityWrite};
use anyhow::{anyhow, Result};
use sqlx::Row;
use uuid::Uuid;

/// Bounded retry budget for the upsert conflict loop.
pub const UPSERT_MAX_ATTEMPTS: usize = 3;

impl Database {
    /// Create the activities table.
    ///
    /// `legacy_uid` keeps the alternate unique key enforced for rows
    /// imported before the natural key existed.
    pub(super) async fn migrate_activities(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS activities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                athlete_id TEXT NOT NULL,
                source TEXT NOT NULL,
                source_object_id INTEGER NOT NULL,
                legacy_uid TEXT NOT NULL,
                name TEXT NOT NULL,
                sport_type TEXT NOT NULL,
                distance_meters REAL NOT NULL DEFAULT 0,
                duration_seconds INTEGER NOT NULL DEFAULT 0,
                elevation_gain REAL NOT NULL DEFAULT 0,
                start_time DATETIME NOT NULL,
                validity TEXT NOT NULL DEFAULT 'valid'
                    CHECK (validity IN ('valid', 'discarded')),
                invalid_reason TEXT,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(source, source_object_id),
                UNIQUE(legacy_uid)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_activities_athlete ON activities(athlete_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Atomic update-or-create by the natural key, with race-safe
    /// fallbacks. After this returns success exactly one row exists for
    /// `(source, source_object_id)`, reflecting the latest write.
    ///
    /// Conflict handling:
    /// - update by natural key first, insert only when nothing matched
    /// - insert violating the `legacy_uid` constraint re-resolves the
    ///   existing row by that alternate key and applies the update
    /// - insert violating the natural key (a concurrent writer won)
    ///   loops back to the update path, bounded to
    ///   [`UPSERT_MAX_ATTEMPTS`] attempts
    ///
    /// # Errors
    ///
    /// Returns an error if the database fails or the retry budget is
    /// exhausted without converging.
    pub async fn upsert_activity(&self, write: &ActivityWrite) -> Result<Activity> {
        let legacy_uid = write.legacy_uid();

        for _ in 0..UPSERT_MAX_ATTEMPTS {
            if self.update_activity_by_natural_key(write).await? {
                return self
                    .get_activity_by_source(&write.source, write.source_object_id)
                    .await?
                    .ok_or_else(|| anyhow!("Activity vanished after update"));
            }

            match self.insert_activity(write, &legacy_uid).await {
                Ok(()) => {
                    return self
                        .get_activity_by_source(&write.source, write.source_object_id)
                        .await?
                        .ok_or_else(|| anyhow!("Activity vanished after insert"));
                }
                Err(e) if violates_column(&e, "legacy_uid") => {
                    // Row predates the natural key; resolve by the
                    // alternate key and apply the update there.
                    self.update_activity_by_legacy_uid(write, &legacy_uid)
                        .await?;
                    return self
                        .get_activity_by_legacy_uid(&legacy_uid)
                        .await?
                        .ok_or_else(|| anyhow!("Activity vanished after legacy-key update"));
                }
                Err(e) if is_unique_violation(&e) => {
                    // Concurrent writer created the row between our
                    // update and insert; loop and update it.
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(anyhow!(
            "Activity upsert did not converge for {}:{} after {UPSERT_MAX_ATTEMPTS} attempts",
            write.source,
            write.source_object_id
        ))
    }

    async fn update_activity_by_natural_key(&self, write: &ActivityWrite) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE activities SET
                athlete_id = $3, name = $4, sport_type = $5, distance_meters = $6,
                duration_seconds = $7, elevation_gain = $8, start_time = $9,
                validity = 'valid', invalid_reason = NULL, updated_at = CURRENT_TIMESTAMP
            WHERE source = $1 AND source_object_id = $2
            ",
        )
        .bind(&write.source)
        .bind(write.source_object_id)
        .bind(write.athlete_id.to_string())
        .bind(&write.name)
        .bind(write.sport_type.as_str())
        .bind(write.distance_meters)
        .bind(write.duration_seconds)
        .bind(write.elevation_gain)
        .bind(write.start_time)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_activity_by_legacy_uid(
        &self,
        write: &ActivityWrite,
        legacy_uid: &str,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE activities SET
                athlete_id = $2, source = $3, source_object_id = $4, name = $5,
                sport_type = $6, distance_meters = $7, duration_seconds = $8,
                elevation_gain = $9, start_time = $10,
                validity = 'valid', invalid_reason = NULL, updated_at = CURRENT_TIMESTAMP
            WHERE legacy_uid = $1
            ",
        )
        .bind(legacy_uid)
        .bind(write.athlete_id.to_string())
        .bind(&write.source)
        .bind(write.source_object_id)
        .bind(&write.name)
        .bind(write.sport_type.as_str())
        .bind(write.distance_meters)
        .bind(write.duration_seconds)
        .bind(write.elevation_gain)
        .bind(write.start_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_activity(
        &self,
        write: &ActivityWrite,
        legacy_uid: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            INSERT INTO activities (
                athlete_id, source, source_object_id, legacy_uid, name, sport_type,
                distance_meters, duration_seconds, elevation_gain, start_time, validity
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'valid')
            ",
        )
        .bind(write.athlete_id.to_string())
        .bind(&write.source)
        .bind(write.source_object_id)
        .bind(legacy_uid)
        .bind(&write.name)
        .bind(write.sport_type.as_str())
        .bind(write.distance_meters)
        .bind(write.duration_seconds)
        .bind(write.elevation_gain)
        .bind(write.start_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get an activity by its natural key
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_activity_by_source(
        &self,
        source: &str,
        source_object_id: i64,
    ) -> Result<Option<Activity>> {
        let row =
            sqlx::query("SELECT * FROM activities WHERE source = $1 AND source_object_id = $2")
                .bind(source)
                .bind(source_object_id)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(Self::row_to_activity).transpose()
    }

    /// Get an activity by the legacy alternate key
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_activity_by_legacy_uid(&self, legacy_uid: &str) -> Result<Option<Activity>> {
        let row = sqlx::query("SELECT * FROM activities WHERE legacy_uid = $1")
            .bind(legacy_uid)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_activity).transpose()
    }

    /// Total stored activity rows (test and health reporting)
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count_activities(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM activities")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Convert a database row to an `Activity`
    fn row_to_activity(row: &sqlx::sqlite::SqliteRow) -> Result<Activity> {
        let athlete_id: String = row.get("athlete_id");
        let sport_type: String = row.get("sport_type");
        let validity: String = row.get("validity");
        Ok(Activity {
            id: row.get("id"),
            athlete_id: Uuid::parse_str(&athlete_id)?,
            source: row.get("source"),
            source_object_id: row.get("source_object_id"),
            legacy_uid: row.get("legacy_uid"),
            name: row.get("name"),
            sport_type: sport_type.parse()?,
            distance_meters: row.get("distance_meters"),
            duration_seconds: row.get("duration_seconds"),
            elevation_gain: row.get("elevation_gain"),
            start_time: row.get("start_time"),
            validity: validity.parse()?,
            invalid_reason: row.get("invalid_reason"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}
