// ABOUTME: Health check route handlers for service monitoring and status endpoints
// ABOUTME: Reports pipeline health derived from event log status counts
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Health check routes. Pipeline health is derived from the event log:
//! failed or stuck-processing events degrade the reported status.

use crate::context::IngestResources;
use crate::models::EventStatus;
use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;

/// Health routes implementation
pub struct HealthRoutes;

impl HealthRoutes {
    /// Create all health check routes
    pub fn routes(resources: Arc<IngestResources>) -> Router {
        Router::new()
            .route("/health", get(Self::handle_health))
            .with_state(resources)
    }

    async fn handle_health(
        State(resources): State<Arc<IngestResources>>,
    ) -> Json<serde_json::Value> {
        let failed = resources
            .database
            .count_events_by_status(EventStatus::Failed)
            .await
            .unwrap_or(-1);
        let processing = resources
            .database
            .count_events_by_status(EventStatus::Processing)
            .await
            .unwrap_or(-1);
        let queued = resources
            .database
            .count_events_by_status(EventStatus::Queued)
            .await
            .unwrap_or(-1);

        Json(json!({
            "status": derive_status(failed, processing),
            "events": {
                "failed": failed,
                "processing": processing,
                "queued": queued,
            },
            "timestamp": chrono::Utc::now().to_rfc3339()
        }))
    }
}

/// Negative counts mean the event log is unreadable. Failed events and
/// stuck `processing` rows (a crashed or wedged worker) both degrade.
fn derive_status(failed: i64, processing: i64) -> &'static str {
    if failed < 0 || processing < 0 {
        "unhealthy"
    } else if failed > 0 || processing > 0 {
        "degraded"
    } else {
        "healthy"
    }
}
