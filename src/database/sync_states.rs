// ABOUTME: Activity sync lock store providing per-resource mutual exclusion
// ABOUTME: Handles atomic lock acquisition, release, and deferral transitions

use super::Database;
use crate::models::{ActivitySyncState, SyncStatus};
use anyhow::Result;
use sqlx::Row;

/// Outcome of a lock acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAcquire {
    /// This event now owns processing for the activity
    Acquired,
    /// Another event holds the lock; this delivery should yield
    Busy {
        /// Event uid currently owning the lock
        holder: String,
    },
}

impl Database {
    /// Create the sync state table
    pub(super) async fn migrate_sync_states(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS activity_sync_states (
                provider TEXT NOT NULL,
                external_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'idle'
                    CHECK (status IN ('idle', 'running', 'done', 'blocked')),
                locked_by_event_uid TEXT,
                discard_reason TEXT,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(provider, external_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Atomically claim the sync lock for (provider, external id).
    ///
    /// A single upsert statement performs the claim: the conflict
    /// branch only fires when the row is not `running`, or when it is
    /// already held by this same event (re-acquisition across a retry).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn try_acquire_sync_lock(
        &self,
        provider: &str,
        external_id: i64,
        event_uid: &str,
    ) -> Result<LockAcquire> {
        let result = sqlx::query(
            r"
            INSERT INTO activity_sync_states (provider, external_id, status, locked_by_event_uid)
            VALUES ($1, $2, 'running', $3)
            ON CONFLICT(provider, external_id) DO UPDATE SET
                status = 'running',
                locked_by_event_uid = excluded.locked_by_event_uid,
                discard_reason = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE activity_sync_states.status != 'running'
               OR activity_sync_states.locked_by_event_uid = excluded.locked_by_event_uid
            ",
        )
        .bind(provider)
        .bind(external_id)
        .bind(event_uid)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(LockAcquire::Acquired);
        }

        let holder: Option<String> = sqlx::query_scalar(
            r"
            SELECT locked_by_event_uid FROM activity_sync_states
            WHERE provider = $1 AND external_id = $2
            ",
        )
        .bind(provider)
        .bind(external_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(LockAcquire::Busy {
            holder: holder.unwrap_or_default(),
        })
    }

    /// Release a held lock to a terminal status. Guarded by the owning
    /// event uid so a stale worker cannot release someone else's lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn release_sync_lock(
        &self,
        provider: &str,
        external_id: i64,
        event_uid: &str,
        status: SyncStatus,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE activity_sync_states
            SET status = $4, locked_by_event_uid = NULL, updated_at = CURRENT_TIMESTAMP
            WHERE provider = $1 AND external_id = $2 AND locked_by_event_uid = $3
            ",
        )
        .bind(provider)
        .bind(external_id)
        .bind(event_uid)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark the sync state `blocked` with a reason. A pause, not a
    /// failure: a later retry re-acquires from this state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn block_sync_state(
        &self,
        provider: &str,
        external_id: i64,
        reason: &str,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO activity_sync_states
                (provider, external_id, status, locked_by_event_uid, discard_reason)
            VALUES ($1, $2, 'blocked', NULL, $3)
            ON CONFLICT(provider, external_id) DO UPDATE SET
                status = 'blocked',
                locked_by_event_uid = NULL,
                discard_reason = excluded.discard_reason,
                updated_at = CURRENT_TIMESTAMP
            WHERE activity_sync_states.status != 'running'
            ",
        )
        .bind(provider)
        .bind(external_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get the sync state for (provider, external id)
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_sync_state(
        &self,
        provider: &str,
        external_id: i64,
    ) -> Result<Option<ActivitySyncState>> {
        let row = sqlx::query(
            "SELECT * FROM activity_sync_states WHERE provider = $1 AND external_id = $2",
        )
        .bind(provider)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let status: String = row.get("status");
            Ok(ActivitySyncState {
                provider: row.get("provider"),
                external_id: row.get("external_id"),
                status: status.parse()?,
                locked_by_event_uid: row.get("locked_by_event_uid"),
                discard_reason: row.get("discard_reason"),
                updated_at: row.get("updated_at"),
            })
        })
        .transpose()
    }
}
