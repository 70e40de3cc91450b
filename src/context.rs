// ABOUTME: Dependency wiring for the ingestion pipeline
// ABOUTME: Builds the queue, processor, receiver, and worker pool from one config struct
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Shared resources injected into route handlers and workers.

use crate::config::ServerConfig;
use crate::database::Database;
use crate::notifications::ActivityNotifier;
use crate::processor::EventProcessor;
use crate::providers::CredentialProvider;
use crate::queue::{event_queue, spawn_workers, EventQueue};
use crate::receiver::WebhookReceiver;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Everything the HTTP layer and workers share
pub struct IngestResources {
    /// Persistence stores
    pub database: Arc<Database>,
    /// Webhook receiver service
    pub receiver: Arc<WebhookReceiver>,
    /// Event processor (exposed for resubmission triggers and tests)
    pub processor: Arc<EventProcessor>,
    /// Enqueue handle
    pub queue: EventQueue,
    /// Server configuration
    pub config: ServerConfig,
    /// Worker pool handles, held for the lifetime of the server
    pub workers: Vec<JoinHandle<()>>,
}

impl IngestResources {
    /// Wire the pipeline: queue, processor, receiver, and workers.
    pub fn new(
        config: ServerConfig,
        database: Arc<Database>,
        credentials: Arc<dyn CredentialProvider>,
        notifier: Arc<dyn ActivityNotifier>,
    ) -> Self {
        let (queue, queue_receiver) = event_queue();

        let processor = Arc::new(EventProcessor::new(
            Arc::clone(&database),
            credentials,
            notifier,
            queue.clone(),
            config.processing.fetch_retry_max,
            config.processing.fetch_retry_delay,
        ));

        let receiver = Arc::new(WebhookReceiver::new(
            Arc::clone(&database),
            config.strava.clone(),
            queue.clone(),
        ));

        let workers = spawn_workers(
            config.processing.worker_count,
            queue_receiver,
            Arc::clone(&processor),
        );

        Self {
            database,
            receiver,
            processor,
            queue,
            config,
            workers,
        }
    }
}
