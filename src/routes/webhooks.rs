// ABOUTME: Webhook HTTP route handlers for handshake verification and event delivery
// ABOUTME: Maps receiver service outcomes onto the provider-facing response contract
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Webhook routes.
//!
//! Response contract: 200 for accepted/duplicate/discarded, 403 for
//! subscription or token mismatch, 400 for malformed envelopes, 500
//! only for unexpected persistence failure (which deliberately
//! triggers the provider's retry policy).

use crate::context::IngestResources;
use crate::errors::AppError;
use crate::receiver::{DeliveryOutcome, HandshakeOutcome};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

/// Handshake query parameters. The provider sends `hub.`-prefixed
/// names; the bare aliases keep dev tooling usable.
#[derive(Debug, Deserialize)]
pub struct HandshakeParams {
    /// Subscription mode, expected `subscribe`
    #[serde(rename = "hub.mode", alias = "mode")]
    pub mode: Option<String>,
    /// Token that must match the configured secret
    #[serde(rename = "hub.verify_token", alias = "verify_token")]
    pub verify_token: Option<String>,
    /// Opaque value echoed back on success
    #[serde(rename = "hub.challenge", alias = "challenge")]
    pub challenge: Option<String>,
}

/// Webhook route handlers
pub struct WebhookRoutes;

impl WebhookRoutes {
    /// Create the webhook routes
    pub fn routes(resources: Arc<IngestResources>) -> Router {
        Router::new()
            .route("/webhooks/strava", get(Self::handle_handshake))
            .route("/webhooks/strava", post(Self::handle_delivery))
            .with_state(resources)
    }

    /// Handle the provider's subscription verification request
    async fn handle_handshake(
        State(resources): State<Arc<IngestResources>>,
        Query(params): Query<HandshakeParams>,
    ) -> Response {
        let outcome = resources.receiver.verify_handshake(
            params.mode.as_deref(),
            params.verify_token.as_deref(),
            params.challenge.as_deref(),
        );

        match outcome {
            HandshakeOutcome::Verified { challenge } => {
                (StatusCode::OK, Json(json!({ "hub.challenge": challenge }))).into_response()
            }
            HandshakeOutcome::Forbidden => {
                AppError::permission_denied("Verify token mismatch").into_response()
            }
            HandshakeOutcome::Unconfigured => {
                AppError::config_missing("Webhook verify token is not configured").into_response()
            }
            HandshakeOutcome::MissingParams => {
                AppError::missing_field("hub.mode/hub.verify_token/hub.challenge").into_response()
            }
        }
    }

    /// Handle an event delivery
    async fn handle_delivery(
        State(resources): State<Arc<IngestResources>>,
        body: Bytes,
    ) -> Response {
        let outcome = match resources.receiver.handle_delivery(&body).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Webhook persistence failed; requesting redelivery");
                return AppError::database("Failed to record webhook event").into_response();
            }
        };

        match outcome {
            DeliveryOutcome::Accepted {
                event_uid,
                duplicate,
            } => (
                StatusCode::OK,
                Json(json!({ "status": "accepted", "event_uid": event_uid, "duplicate": duplicate })),
            )
                .into_response(),
            DeliveryOutcome::Discarded { event_uid, reason } => (
                StatusCode::OK,
                Json(json!({ "status": "discarded", "event_uid": event_uid, "reason": reason })),
            )
                .into_response(),
            DeliveryOutcome::AcknowledgedUnconfigured => {
                (StatusCode::OK, Json(json!({ "status": "accepted" }))).into_response()
            }
            DeliveryOutcome::SubscriptionMismatch => {
                AppError::permission_denied("Unknown subscription_id").into_response()
            }
            DeliveryOutcome::Malformed(detail) => AppError::invalid_input(detail).into_response(),
        }
    }
}
