// ABOUTME: Downstream notification interface invoked after successful activity upserts
// ABOUTME: Explicit collaborator replacing implicit on-save hooks, visible and testable
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Downstream notifier: signals "activity created/updated" so derived
//! metrics recomputation and comparison/alerting can run elsewhere.
//! Invoked by the processor after a successful upsert; failures are
//! logged, never rolled back.

use crate::models::Activity;
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Receiver of activity saved/updated signals
#[async_trait]
pub trait ActivityNotifier: Send + Sync {
    /// Called once per successful upsert with the persisted activity
    ///
    /// # Errors
    ///
    /// May fail; the caller logs and continues.
    async fn activity_saved(&self, activity: &Activity, aspect_type: &str) -> Result<()>;
}

/// Default notifier that records the signal in the log stream
pub struct LoggingNotifier;

#[async_trait]
impl ActivityNotifier for LoggingNotifier {
    async fn activity_saved(&self, activity: &Activity, aspect_type: &str) -> Result<()> {
        info!(
            activity_id = activity.id,
            source = %activity.source,
            source_object_id = activity.source_object_id,
            aspect_type = %aspect_type,
            "Activity persisted; downstream recompute triggered"
        );
        Ok(())
    }
}
