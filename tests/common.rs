// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Provides database, pipeline wiring, and collaborator test doubles
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org
#![allow(
    dead_code,
    missing_docs,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
//! Shared test utilities for `pierre_webhook_ingest`
//!
//! This module provides common setup functions and programmable
//! collaborator doubles to reduce duplication across integration tests.
//! Tests drain the event queue and invoke the processor directly so
//! every scenario runs deterministically without the worker pool.

use anyhow::Result;
use async_trait::async_trait;
use pierre_webhook_ingest::{
    config::StravaConfig,
    database::Database,
    models::{Activity, Athlete},
    notifications::ActivityNotifier,
    processor::EventProcessor,
    providers::{ActivityFetcher, CredentialProvider, FetchError, RawActivity},
    queue::{event_queue, EventQueue, ProcessTask},
    receiver::WebhookReceiver,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// Standard test database setup
pub async fn create_test_database() -> Result<Arc<Database>> {
    init_test_logging();
    let database = Arc::new(Database::new("sqlite::memory:").await?);
    Ok(database)
}

/// Create an athlete with live upstream credentials and link the
/// external owner id to it
pub async fn create_linked_athlete(database: &Database, owner_id: i64) -> Result<Uuid> {
    let mut athlete = Athlete::new(format!("athlete{owner_id}@example.com"), None);
    athlete.strava_access_token = Some("test-access-token".into());
    athlete.strava_expires_at = Some(chrono::Utc::now() + chrono::Duration::hours(6));
    let athlete_id = database.create_athlete(&athlete).await?;
    database.link_identity("strava", owner_id, athlete_id).await?;
    Ok(athlete_id)
}

/// Strava configuration used by receiver tests: token `test-verify`,
/// subscription id 1
pub fn test_strava_config() -> StravaConfig {
    StravaConfig {
        verify_token: Some("test-verify".into()),
        subscription_id: Some(1),
        api_base: "http://localhost:9".into(),
    }
}

/// Build a JSON delivery body for subscription 1
pub fn envelope(object_type: &str, aspect_type: &str, object_id: i64, owner_id: i64) -> Vec<u8> {
    envelope_at(object_type, aspect_type, object_id, owner_id, 1_700_000_000)
}

/// Build a JSON delivery body with an explicit event time
pub fn envelope_at(
    object_type: &str,
    aspect_type: &str,
    object_id: i64,
    owner_id: i64,
    event_time: i64,
) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "object_type": object_type,
        "aspect_type": aspect_type,
        "object_id": object_id,
        "owner_id": owner_id,
        "subscription_id": 1,
        "event_time": event_time,
    }))
    .unwrap()
}

/// Build a raw upstream activity payload
pub fn raw_run(id: i64, name: &str, distance: f64) -> RawActivity {
    serde_json::from_value(json!({
        "id": id,
        "name": name,
        "sport_type": "Run",
        "distance": distance,
        "moving_time": 2545,
        "total_elevation_gain": 120.0,
        "start_date": "2025-06-01T07:00:00Z"
    }))
    .unwrap()
}

/// Fetcher double that pops a programmed response per call
pub struct MockFetcher {
    responses: Mutex<VecDeque<Result<RawActivity, FetchError>>>,
}

impl MockFetcher {
    pub fn new(responses: Vec<Result<RawActivity, FetchError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
        })
    }

    pub fn returning(raw: RawActivity) -> Arc<Self> {
        Self::new(vec![Ok(raw)])
    }

    /// Responses left unconsumed by the scenario
    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl ActivityFetcher for MockFetcher {
    async fn fetch_activity(&self, _external_id: i64) -> Result<RawActivity, FetchError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Transient("mock responses exhausted".into())))
    }
}

/// Credential provider double that always hands out the same fetcher
pub struct StaticCredentialProvider {
    fetcher: Arc<dyn ActivityFetcher>,
}

impl StaticCredentialProvider {
    pub fn new(fetcher: Arc<dyn ActivityFetcher>) -> Arc<Self> {
        Arc::new(Self { fetcher })
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn fetcher_for(&self, _athlete_id: Uuid) -> Result<Arc<dyn ActivityFetcher>, FetchError> {
        Ok(Arc::clone(&self.fetcher))
    }
}

/// Credential provider double that always reports missing auth
pub struct NoAuthCredentialProvider;

#[async_trait]
impl CredentialProvider for NoAuthCredentialProvider {
    async fn fetcher_for(&self, _athlete_id: Uuid) -> Result<Arc<dyn ActivityFetcher>, FetchError> {
        Err(FetchError::MissingAuth)
    }
}

/// Notifier double recording every saved signal
#[derive(Default)]
pub struct RecordingNotifier {
    saved: Mutex<Vec<(i64, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// (`source_object_id`, `aspect_type`) pairs observed so far
    pub fn saved(&self) -> Vec<(i64, String)> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActivityNotifier for RecordingNotifier {
    async fn activity_saved(&self, activity: &Activity, aspect_type: &str) -> Result<()> {
        self.saved
            .lock()
            .unwrap()
            .push((activity.source_object_id, aspect_type.to_owned()));
        Ok(())
    }
}

/// A fully wired pipeline with the queue receiver held by the test
/// instead of a worker pool
pub struct TestPipeline {
    pub database: Arc<Database>,
    pub receiver: WebhookReceiver,
    pub processor: EventProcessor,
    pub queue: EventQueue,
    pub tasks: UnboundedReceiver<ProcessTask>,
}

impl TestPipeline {
    /// Wire a pipeline with short retry delays suitable for tests
    pub async fn new(
        credentials: Arc<dyn CredentialProvider>,
        notifier: Arc<dyn ActivityNotifier>,
        retry_max: i64,
    ) -> Result<Self> {
        let database = create_test_database().await?;
        let (queue, tasks) = event_queue();

        let processor = EventProcessor::new(
            Arc::clone(&database),
            credentials,
            notifier,
            queue.clone(),
            retry_max,
            Duration::from_millis(10),
        );

        let receiver = WebhookReceiver::new(
            Arc::clone(&database),
            test_strava_config(),
            queue.clone(),
        );

        Ok(Self {
            database,
            receiver,
            processor,
            queue,
            tasks,
        })
    }

    /// Drain every task currently queued and process each to completion.
    /// Returns the number of tasks processed.
    pub async fn drain_and_process(&mut self) -> Result<usize> {
        let mut processed = 0;
        while let Ok(task) = self.tasks.try_recv() {
            self.processor.process_event(&task.event_uid).await?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Number of tasks sitting in the queue without consuming them all
    pub fn pending_tasks(&mut self) -> usize {
        let mut drained = Vec::new();
        while let Ok(task) = self.tasks.try_recv() {
            drained.push(task);
        }
        let count = drained.len();
        for task in drained {
            self.queue.enqueue(&task.event_uid);
        }
        count
    }
}
