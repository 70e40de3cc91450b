// ABOUTME: Webhook receiver service handling handshake verification and event delivery
// ABOUTME: Charset-tolerant parsing, idempotent persistence, classification, and enqueueing
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Webhook receiver: the synchronous half of the pipeline.
//!
//! The receiver must return quickly — persist, classify, enqueue —
//! and never calls upstream on the request path. Every outcome maps to
//! a response contract the provider's retry policy understands: 200
//! acknowledges (including duplicates and discards), 403 rejects a
//! foreign subscription, 400 rejects malformed envelopes, and 500 is
//! reserved for persistence failures so the provider redelivers.

use crate::config::StravaConfig;
use crate::database::{Database, NewWebhookEvent};
use crate::providers::STRAVA;
use crate::queue::EventQueue;
use anyhow::Result;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Aspect types the provider sends
const ASPECT_DELETE: &str = "delete";
/// Object type carrying activity notifications
const OBJECT_ACTIVITY: &str = "activity";

/// Inbound event envelope. Fields are optional so presence validation
/// produces field-level errors instead of a parse failure.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    /// `activity` or `athlete`
    pub object_type: Option<String>,
    /// `create`, `update`, or `delete`
    pub aspect_type: Option<String>,
    /// External object id
    pub object_id: Option<i64>,
    /// External account id of the owner
    pub owner_id: Option<i64>,
    /// Subscription the event was delivered under
    pub subscription_id: Option<i64>,
    /// Provider event timestamp (unix seconds)
    pub event_time: Option<i64>,
}

/// Handshake verification outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Token matched; echo the challenge
    Verified {
        /// Challenge value to echo back
        challenge: String,
    },
    /// Token mismatch
    Forbidden,
    /// No verify token configured; fail closed
    Unconfigured,
    /// Required parameters missing
    MissingParams,
}

/// Event delivery outcome, mapped to the HTTP response contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Event persisted and queued (or re-queued)
    Accepted {
        /// Idempotency key of the stored event
        event_uid: String,
        /// Whether this delivery was a duplicate of a stored event
        duplicate: bool,
    },
    /// Event persisted but classified away (non-activity, delete)
    Discarded {
        /// Idempotency key of the stored event
        event_uid: String,
        /// Machine-readable classification reason
        reason: String,
    },
    /// Acknowledged without persisting: no expected subscription id is
    /// configured. Deliberate anti-retry-storm behavior.
    AcknowledgedUnconfigured,
    /// Envelope carried a foreign subscription id
    SubscriptionMismatch,
    /// Body could not be decoded or required fields are missing
    Malformed(String),
}

/// Webhook receiver service
pub struct WebhookReceiver {
    database: Arc<Database>,
    config: StravaConfig,
    queue: EventQueue,
}

impl WebhookReceiver {
    /// Create a receiver bound to its stores, config, and queue
    #[must_use]
    pub fn new(database: Arc<Database>, config: StravaConfig, queue: EventQueue) -> Self {
        Self {
            database,
            config,
            queue,
        }
    }

    /// Verify a subscription handshake request
    #[must_use]
    pub fn verify_handshake(
        &self,
        mode: Option<&str>,
        verify_token: Option<&str>,
        challenge: Option<&str>,
    ) -> HandshakeOutcome {
        let (Some(mode), Some(token), Some(challenge)) = (mode, verify_token, challenge) else {
            return HandshakeOutcome::MissingParams;
        };

        if mode != "subscribe" {
            return HandshakeOutcome::MissingParams;
        }

        match self.config.verify_token.as_deref() {
            None => {
                error!("Webhook handshake received but STRAVA_VERIFY_TOKEN is not configured");
                HandshakeOutcome::Unconfigured
            }
            Some(expected) if expected == token => HandshakeOutcome::Verified {
                challenge: challenge.to_owned(),
            },
            Some(_) => {
                warn!("Webhook handshake verify token mismatch");
                HandshakeOutcome::Forbidden
            }
        }
    }

    /// Handle one event delivery body.
    ///
    /// # Errors
    ///
    /// Returns an error only on persistence failure; the HTTP layer
    /// maps that to a 500 so the provider's retry policy redelivers.
    pub async fn handle_delivery(&self, body: &[u8]) -> Result<DeliveryOutcome> {
        let text = match decode_body(body) {
            Ok(text) => text,
            Err(reason) => return Ok(DeliveryOutcome::Malformed(reason)),
        };

        let envelope: WebhookEnvelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) => return Ok(DeliveryOutcome::Malformed(format!("Invalid JSON body: {e}"))),
        };

        let Some(object_type) = envelope.object_type.clone() else {
            return Ok(DeliveryOutcome::Malformed("object_type missing".into()));
        };
        let Some(aspect_type) = envelope.aspect_type.clone() else {
            return Ok(DeliveryOutcome::Malformed("aspect_type missing".into()));
        };
        let Some(object_id) = envelope.object_id else {
            return Ok(DeliveryOutcome::Malformed("object_id missing".into()));
        };
        let Some(owner_id) = envelope.owner_id else {
            return Ok(DeliveryOutcome::Malformed("owner_id missing".into()));
        };
        let subscription_id = envelope.subscription_id.unwrap_or_default();
        let event_time = envelope.event_time.unwrap_or_default();

        // Subscription gate runs before any persistence so a foreign
        // subscription never creates state.
        match self.config.subscription_id {
            None => {
                error!(
                    subscription_id,
                    object_id,
                    "STRAVA_SUBSCRIPTION_ID not configured; acknowledging without recording"
                );
                return Ok(DeliveryOutcome::AcknowledgedUnconfigured);
            }
            Some(expected) if expected != subscription_id => {
                warn!(
                    subscription_id,
                    expected, "Rejecting delivery for foreign subscription"
                );
                return Ok(DeliveryOutcome::SubscriptionMismatch);
            }
            Some(_) => {}
        }

        // Eager identity stub so no event is lost while linkage pends
        self.database.upsert_identity_stub(STRAVA, owner_id).await?;

        let event_uid = compute_event_uid(
            subscription_id,
            owner_id,
            &object_type,
            object_id,
            &aspect_type,
            event_time,
        );

        let new_event = NewWebhookEvent {
            event_uid: event_uid.clone(),
            object_type: object_type.clone(),
            aspect_type: aspect_type.clone(),
            object_id,
            owner_id,
            subscription_id,
            event_time,
            payload_raw: text,
        };

        let (event, created) = self.database.get_or_create_event(&new_event).await?;

        if created {
            return self
                .classify_event(&event_uid, &object_type, &aspect_type, false)
                .await;
        }

        let duplicates = self.database.record_duplicate_delivery(&event_uid).await?;
        if event.status.allows_requeue() {
            info!(
                event_uid = %event_uid,
                prior_status = %event.status,
                "Duplicate delivery re-triggers classification"
            );
            // Re-run classification, not a blind requeue: a `received`
            // row may predate its own classification (crash between
            // insert and classify) and must never reach the processor
            // if it would have been discarded.
            return self
                .classify_event(&event_uid, &object_type, &aspect_type, true)
                .await;
        }

        info!(
            event_uid = %event_uid,
            duplicate_count = duplicates,
            status = %event.status,
            "Duplicate delivery acknowledged without reprocessing"
        );

        Ok(DeliveryOutcome::Accepted {
            event_uid,
            duplicate: true,
        })
    }

    async fn classify_event(
        &self,
        event_uid: &str,
        object_type: &str,
        aspect_type: &str,
        duplicate: bool,
    ) -> Result<DeliveryOutcome> {
        if object_type != OBJECT_ACTIVITY {
            let reason = "non_activity_event";
            self.database.mark_event_discarded(event_uid, reason).await?;
            return Ok(DeliveryOutcome::Discarded {
                event_uid: event_uid.to_owned(),
                reason: reason.to_owned(),
            });
        }

        if aspect_type == ASPECT_DELETE {
            let reason = "delete_event_ignored";
            self.database.mark_event_discarded(event_uid, reason).await?;
            return Ok(DeliveryOutcome::Discarded {
                event_uid: event_uid.to_owned(),
                reason: reason.to_owned(),
            });
        }

        self.database.mark_event_queued(event_uid).await?;
        self.queue.enqueue(event_uid);
        info!(event_uid = %event_uid, aspect_type = %aspect_type, "Webhook event queued");

        Ok(DeliveryOutcome::Accepted {
            event_uid: event_uid.to_owned(),
            duplicate,
        })
    }

    /// Resubmit all events parked as `link_required` for an owner.
    /// Called when the owner's identity becomes linked; the original
    /// notifications do not need to be redelivered.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn resubmit_link_required(&self, owner_id: i64) -> Result<usize> {
        let events = self.database.list_link_required_events(owner_id).await?;
        for event in &events {
            self.database.mark_event_queued(&event.event_uid).await?;
            self.queue.enqueue(&event.event_uid);
        }
        if !events.is_empty() {
            info!(
                owner_id,
                count = events.len(),
                "Resubmitted link_required events after identity linkage"
            );
        }
        Ok(events.len())
    }
}

/// Compute the deterministic idempotency key over the canonical
/// envelope subset
#[must_use]
pub fn compute_event_uid(
    subscription_id: i64,
    owner_id: i64,
    object_type: &str,
    object_id: i64,
    aspect_type: &str,
    event_time: i64,
) -> String {
    let canonical = format!(
        "{subscription_id}|{owner_id}|{object_type}|{object_id}|{aspect_type}|{event_time}"
    );
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

/// Decode a request body, tolerating transport charset variation.
///
/// Tries strict UTF-8 first, then UTF-16 (by BOM), then Windows-1252
/// before declaring the body malformed. Heterogeneous senders and dev
/// tooling make this an operational necessity.
pub fn decode_body(body: &[u8]) -> Result<String, String> {
    if let Ok(text) = std::str::from_utf8(body) {
        return Ok(text.to_owned());
    }

    // encoding_rs BOM-sniffs, so one call covers both UTF-16 endiannesses
    if body.starts_with(b"\xff\xfe") || body.starts_with(b"\xfe\xff") {
        let (text, _, had_errors) = encoding_rs::UTF_16LE.decode(body);
        if !had_errors {
            return Ok(text.into_owned());
        }
    }

    let (text, _, had_errors) = encoding_rs::WINDOWS_1252.decode(body);
    if had_errors {
        return Err("Body is not decodable as UTF-8, UTF-16, or Windows-1252".into());
    }
    Ok(text.into_owned())
}
