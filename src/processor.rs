// ABOUTME: Asynchronous event processor orchestrating the ingestion pipeline steps
// ABOUTME: Identity resolution, sync locking, upstream fetch, normalization, and upsert
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Event processor: consumes queued events and drives each through
//! identity resolution → sync lock → upstream fetch → normalization →
//! idempotent upsert, with explicit failure classification at every
//! step. Only the upstream fetch is network-bound; it is the sole
//! point where retry/backoff applies.

use crate::database::{Database, LockAcquire};
use crate::models::{ActivityWrite, SyncStatus, WebhookEvent};
use crate::normalizer::{self, NormalizeOutcome};
use crate::notifications::ActivityNotifier;
use crate::providers::{CredentialProvider, FetchError, STRAVA};
use crate::queue::EventQueue;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Discard reason recorded for the missing-credential terminal failure
const REASON_MISSING_AUTH: &str = "missing_strava_auth";
/// Reason recorded when identity linkage is pending
const REASON_LINK_REQUIRED: &str = "link_required";

/// Event processor worker logic
pub struct EventProcessor {
    database: Arc<Database>,
    credentials: Arc<dyn CredentialProvider>,
    notifier: Arc<dyn ActivityNotifier>,
    queue: EventQueue,
    retry_max: i64,
    retry_delay: Duration,
}

impl EventProcessor {
    /// Create a processor bound to its collaborators and retry policy
    #[must_use]
    pub fn new(
        database: Arc<Database>,
        credentials: Arc<dyn CredentialProvider>,
        notifier: Arc<dyn ActivityNotifier>,
        queue: EventQueue,
        retry_max: i64,
        retry_delay: Duration,
    ) -> Self {
        Self {
            database,
            credentials,
            notifier,
            queue,
            retry_max,
            retry_delay,
        }
    }

    /// Process one queued event to a terminal or deferred state.
    ///
    /// # Errors
    ///
    /// Returns an error only on persistence failure; pipeline failures
    /// are recorded on the event row, never propagated.
    pub async fn process_event(&self, event_uid: &str) -> Result<()> {
        let Some(event) = self.database.get_event(event_uid).await? else {
            warn!(event_uid = %event_uid, "Queued event no longer exists");
            return Ok(());
        };

        if !self.database.mark_event_processing(event_uid).await? {
            // Not in `queued`: another worker claimed it or it already
            // reached a terminal state. Benign.
            info!(event_uid = %event_uid, status = %event.status, "Skipping non-queued event");
            return Ok(());
        }

        // Step 1: resolve identity. Unlinked is a pause, not a failure;
        // it consumes no retry budget.
        let Some(athlete_id) = self.database.resolve_athlete(STRAVA, event.owner_id).await?
        else {
            info!(
                event_uid = %event_uid,
                owner_id = event.owner_id,
                "Owner identity not linked; parking event"
            );
            self.database.mark_event_link_required(event_uid).await?;
            self.database
                .block_sync_state(STRAVA, event.object_id, REASON_LINK_REQUIRED)
                .await?;
            return Ok(());
        };

        // Step 2: per-resource mutual exclusion
        match self
            .database
            .try_acquire_sync_lock(STRAVA, event.object_id, event_uid)
            .await?
        {
            LockAcquire::Acquired => {}
            LockAcquire::Busy { holder } => {
                // Duplicate-in-flight: yield and retry after the holder
                // finishes rather than racing ahead.
                info!(
                    event_uid = %event_uid,
                    holder = %holder,
                    object_id = event.object_id,
                    "Sync lock busy; yielding to in-flight delivery"
                );
                self.schedule_retry(&event, self.retry_delay, "sync lock busy")
                    .await?;
                return Ok(());
            }
        }

        // Step 3: fetch full detail upstream
        let raw = match self.fetch_detail(&event, athlete_id).await {
            Ok(raw) => raw,
            Err(FetchError::MissingAuth) => {
                self.database
                    .mark_event_failed(event_uid, REASON_MISSING_AUTH, "No upstream credential")
                    .await?;
                self.database
                    .release_sync_lock(STRAVA, event.object_id, event_uid, SyncStatus::Idle)
                    .await?;
                return Ok(());
            }
            Err(FetchError::RateLimited { retry_after }) => {
                // Lock stays RUNNING under this event so later
                // duplicates keep waiting instead of racing ahead.
                let delay = retry_after.unwrap_or(self.retry_delay);
                self.handle_rate_limit(&event, delay).await?;
                return Ok(());
            }
            Err(e @ (FetchError::NotFound | FetchError::Transient(_))) => {
                self.database
                    .mark_event_failed(event_uid, "fetch_failed", &e.to_string())
                    .await?;
                self.database
                    .release_sync_lock(STRAVA, event.object_id, event_uid, SyncStatus::Idle)
                    .await?;
                return Ok(());
            }
        };

        // Step 4: normalize and decide validity
        let normalized = match normalizer::normalize(&raw) {
            NormalizeOutcome::Accepted(normalized) => normalized,
            NormalizeOutcome::Rejected { reason } => {
                info!(event_uid = %event_uid, reason = %reason, "Activity rejected by product rules");
                self.database.mark_event_discarded(event_uid, &reason).await?;
                // Rejection is a completed outcome, not a pause
                self.database
                    .release_sync_lock(STRAVA, event.object_id, event_uid, SyncStatus::Done)
                    .await?;
                self.database
                    .record_audit_outcome(
                        event_uid,
                        STRAVA,
                        event.object_id,
                        "discarded",
                        Some(&reason),
                    )
                    .await?;
                return Ok(());
            }
        };

        // Step 5: idempotent upsert
        let write = ActivityWrite {
            athlete_id,
            source: STRAVA.to_owned(),
            source_object_id: event.object_id,
            name: normalized.name,
            sport_type: normalized.sport_type,
            distance_meters: normalized.distance_meters,
            duration_seconds: normalized.duration_seconds,
            elevation_gain: normalized.elevation_gain,
            start_time: normalized.start_time,
        };

        let activity = match self.database.upsert_activity(&write).await {
            Ok(activity) => activity,
            Err(e) => {
                self.database
                    .mark_event_failed(event_uid, "upsert_failed", &e.to_string())
                    .await?;
                self.database
                    .release_sync_lock(STRAVA, event.object_id, event_uid, SyncStatus::Idle)
                    .await?;
                return Ok(());
            }
        };

        self.database.mark_event_saved(event_uid).await?;
        self.database
            .release_sync_lock(STRAVA, event.object_id, event_uid, SyncStatus::Done)
            .await?;
        self.database
            .record_audit_outcome(event_uid, STRAVA, event.object_id, "saved", None)
            .await?;

        info!(
            event_uid = %event_uid,
            activity_id = activity.id,
            object_id = event.object_id,
            "Event processed; activity saved"
        );

        // Fire-and-forget: notifier failure never rolls back the
        // already-persisted activity.
        if let Err(e) = self
            .notifier
            .activity_saved(&activity, &event.aspect_type)
            .await
        {
            warn!(event_uid = %event_uid, error = %e, "Downstream notifier failed");
        }

        Ok(())
    }

    async fn fetch_detail(
        &self,
        event: &WebhookEvent,
        athlete_id: uuid::Uuid,
    ) -> Result<crate::providers::RawActivity, FetchError> {
        let fetcher = self.credentials.fetcher_for(athlete_id).await?;
        fetcher.fetch_activity(event.object_id).await
    }

    async fn handle_rate_limit(&self, event: &WebhookEvent, delay: Duration) -> Result<()> {
        let attempts = self
            .database
            .requeue_event_for_retry(&event.event_uid)
            .await?;

        if attempts > self.retry_max {
            warn!(
                event_uid = %event.event_uid,
                attempts,
                "Rate-limit retry budget exhausted"
            );
            self.database
                .mark_event_failed(
                    &event.event_uid,
                    "rate_limit_retries_exhausted",
                    &format!("Gave up after {attempts} rate-limited attempts"),
                )
                .await?;
            self.database
                .release_sync_lock(STRAVA, event.object_id, &event.event_uid, SyncStatus::Idle)
                .await?;
            return Ok(());
        }

        info!(
            event_uid = %event.event_uid,
            attempts,
            delay_secs = delay.as_secs_f64(),
            "Upstream rate limited; scheduling retry"
        );

        let queue = self.queue.clone();
        let event_uid = event.event_uid.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(&event_uid);
        });

        Ok(())
    }

    /// Re-queue an event after a delay without consuming the rate-limit
    /// retry path's terminal transition. Used when the sync lock is
    /// held by another in-flight delivery.
    async fn schedule_retry(
        &self,
        event: &WebhookEvent,
        delay: Duration,
        cause: &str,
    ) -> Result<()> {
        let attempts = self
            .database
            .requeue_event_for_retry(&event.event_uid)
            .await?;

        if attempts > self.retry_max {
            self.database
                .mark_event_failed(
                    &event.event_uid,
                    "retries_exhausted",
                    &format!("Gave up after {attempts} attempts ({cause})"),
                )
                .await?;
            return Ok(());
        }

        let queue = self.queue.clone();
        let event_uid = event.event_uid.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(&event_uid);
        });

        Ok(())
    }
}
