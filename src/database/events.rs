// ABOUTME: Webhook event store operations over the durable event log
// ABOUTME: Handles idempotent creation, duplicate accounting, and status transitions

use super::{is_unique_violation, Database};
use crate::models::{EventStatus, WebhookEvent};
use anyhow::{anyhow, Result};
use sqlx::Row;
use uuid::Uuid;

/// Failure messages stored on event rows are bounded to this length.
const MAX_ERROR_LEN: usize = 500;

/// Envelope fields needed to create an event row
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    /// Deterministic idempotency key
    pub event_uid: String,
    /// Envelope `object_type`
    pub object_type: String,
    /// Envelope `aspect_type`
    pub aspect_type: String,
    /// External object id
    pub object_id: i64,
    /// External owner id
    pub owner_id: i64,
    /// Subscription the event arrived under
    pub subscription_id: i64,
    /// Provider event timestamp (unix seconds)
    pub event_time: i64,
    /// Full envelope for audit/replay
    pub payload_raw: String,
}

impl Database {
    /// Create the webhook event table
    pub(super) async fn migrate_events(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS webhook_events (
                event_uid TEXT PRIMARY KEY,
                object_type TEXT NOT NULL,
                aspect_type TEXT NOT NULL,
                object_id INTEGER NOT NULL,
                owner_id INTEGER NOT NULL,
                subscription_id INTEGER NOT NULL,
                event_time INTEGER NOT NULL,
                payload_raw TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'received'
                    CHECK (status IN ('received', 'queued', 'processing', 'saved',
                                      'discarded', 'failed', 'link_required')),
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                discard_reason TEXT,
                duplicate_count INTEGER NOT NULL DEFAULT 0,
                correlation_id TEXT NOT NULL,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_webhook_events_status ON webhook_events(status)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_webhook_events_owner ON webhook_events(owner_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Idempotent get-or-create by `event_uid`. Returns the row and
    /// whether this call created it. On a uniqueness race the row is
    /// re-read instead of erroring.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_or_create_event(
        &self,
        new_event: &NewWebhookEvent,
    ) -> Result<(WebhookEvent, bool)> {
        if let Some(existing) = self.get_event(&new_event.event_uid).await? {
            return Ok((existing, false));
        }

        let insert = sqlx::query(
            r"
            INSERT INTO webhook_events (
                event_uid, object_type, aspect_type, object_id, owner_id,
                subscription_id, event_time, payload_raw, status, correlation_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'received', $9)
            ",
        )
        .bind(&new_event.event_uid)
        .bind(&new_event.object_type)
        .bind(&new_event.aspect_type)
        .bind(new_event.object_id)
        .bind(new_event.owner_id)
        .bind(new_event.subscription_id)
        .bind(new_event.event_time)
        .bind(&new_event.payload_raw)
        .bind(Uuid::new_v4().to_string())
        .execute(&self.pool)
        .await;

        match insert {
            Ok(_) => {
                let event = self.get_event_required(&new_event.event_uid).await?;
                Ok((event, true))
            }
            Err(e) if is_unique_violation(&e) => {
                // Concurrent delivery won the insert
                let event = self.get_event_required(&new_event.event_uid).await?;
                Ok((event, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get an event by uid
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_event(&self, event_uid: &str) -> Result<Option<WebhookEvent>> {
        let row = sqlx::query("SELECT * FROM webhook_events WHERE event_uid = $1")
            .bind(event_uid)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_event).transpose()
    }

    /// Get an event by uid, erroring when missing
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the event does not exist.
    pub async fn get_event_required(&self, event_uid: &str) -> Result<WebhookEvent> {
        self.get_event(event_uid)
            .await?
            .ok_or_else(|| anyhow!("Webhook event not found: {event_uid}"))
    }

    /// Record a duplicate delivery; returns the new duplicate count
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn record_duplicate_delivery(&self, event_uid: &str) -> Result<i64> {
        sqlx::query(
            r"
            UPDATE webhook_events
            SET duplicate_count = duplicate_count + 1, updated_at = CURRENT_TIMESTAMP
            WHERE event_uid = $1
            ",
        )
        .bind(event_uid)
        .execute(&self.pool)
        .await?;

        let count = sqlx::query_scalar(
            "SELECT duplicate_count FROM webhook_events WHERE event_uid = $1",
        )
        .bind(event_uid)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Transition an event to `queued`, clearing any prior failure state
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn mark_event_queued(&self, event_uid: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE webhook_events
            SET status = 'queued', last_error = NULL, discard_reason = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE event_uid = $1
            ",
        )
        .bind(event_uid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Claim a queued event for processing. Returns false when the
    /// event is not in `queued` (another worker claimed it, or it is
    /// already terminal), which the caller treats as benign.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn mark_event_processing(&self, event_uid: &str) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE webhook_events
            SET status = 'processing', updated_at = CURRENT_TIMESTAMP
            WHERE event_uid = $1 AND status = 'queued'
            ",
        )
        .bind(event_uid)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Re-queue an event for a task-level retry; returns the attempt
    /// count after incrementing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn requeue_event_for_retry(&self, event_uid: &str) -> Result<i64> {
        sqlx::query(
            r"
            UPDATE webhook_events
            SET status = 'queued', attempts = attempts + 1, updated_at = CURRENT_TIMESTAMP
            WHERE event_uid = $1
            ",
        )
        .bind(event_uid)
        .execute(&self.pool)
        .await?;

        let attempts = sqlx::query_scalar("SELECT attempts FROM webhook_events WHERE event_uid = $1")
            .bind(event_uid)
            .fetch_one(&self.pool)
            .await?;

        Ok(attempts)
    }

    /// Transition an event to `saved`
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn mark_event_saved(&self, event_uid: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE webhook_events
            SET status = 'saved', updated_at = CURRENT_TIMESTAMP
            WHERE event_uid = $1
            ",
        )
        .bind(event_uid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Transition an event to `discarded` with a machine-readable reason
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn mark_event_discarded(&self, event_uid: &str, reason: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE webhook_events
            SET status = 'discarded', discard_reason = $2, updated_at = CURRENT_TIMESTAMP
            WHERE event_uid = $1
            ",
        )
        .bind(event_uid)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Transition an event to terminal `failed` with a truncated message
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn mark_event_failed(
        &self,
        event_uid: &str,
        reason: &str,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE webhook_events
            SET status = 'failed', discard_reason = $2, last_error = $3,
                updated_at = CURRENT_TIMESTAMP
            WHERE event_uid = $1
            ",
        )
        .bind(event_uid)
        .bind(reason)
        .bind(truncate_error(error))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Park an event pending identity linkage
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn mark_event_link_required(&self, event_uid: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE webhook_events
            SET status = 'link_required', discard_reason = 'link_required',
                updated_at = CURRENT_TIMESTAMP
            WHERE event_uid = $1
            ",
        )
        .bind(event_uid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Events parked as `link_required` for an owner, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_link_required_events(&self, owner_id: i64) -> Result<Vec<WebhookEvent>> {
        let rows = sqlx::query(
            r"
            SELECT * FROM webhook_events
            WHERE owner_id = $1 AND status = 'link_required'
            ORDER BY created_at ASC
            ",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_event).collect()
    }

    /// Count events currently in a given status (health reporting)
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count_events_by_status(&self, status: EventStatus) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM webhook_events WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Convert a database row to a `WebhookEvent`
    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<WebhookEvent> {
        let status: String = row.get("status");
        Ok(WebhookEvent {
            event_uid: row.get("event_uid"),
            object_type: row.get("object_type"),
            aspect_type: row.get("aspect_type"),
            object_id: row.get("object_id"),
            owner_id: row.get("owner_id"),
            subscription_id: row.get("subscription_id"),
            event_time: row.get("event_time"),
            payload_raw: row.get("payload_raw"),
            status: status.parse()?,
            attempts: row.get("attempts"),
            last_error: row.get("last_error"),
            discard_reason: row.get("discard_reason"),
            duplicate_count: row.get("duplicate_count"),
            correlation_id: row.get("correlation_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

/// Bound a failure message before persisting it on the event row
fn truncate_error(error: &str) -> String {
    if error.len() <= MAX_ERROR_LEN {
        error.to_owned()
    } else {
        let mut end = MAX_ERROR_LEN;
        while !error.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &error[..end])
    }
}
