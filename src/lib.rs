// ABOUTME: Main library entry point for the Pierre webhook ingestion pipeline
// ABOUTME: Receives provider webhook events and drives them to persisted activities
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![deny(unsafe_code)]

//! # Pierre Webhook Ingest
//!
//! Exactly-once ingestion pipeline for fitness provider webhook events.
//! Strava posts small event notifications; this service persists them
//! durably, acknowledges fast, and asynchronously drives each event
//! through identity resolution, per-resource locking, upstream detail
//! fetch, normalization, and idempotent upsert into the activity store.
//!
//! ## Pipeline
//!
//! 1. **Receiver** (`receiver`, `routes::webhooks`): handshake
//!    verification and charset-tolerant event delivery. Every delivery
//!    is recorded under a deterministic `event_uid` before the 200 goes
//!    back, so redeliveries converge instead of duplicating work.
//! 2. **Queue + workers** (`queue`): in-process task queue feeding a
//!    fixed worker pool.
//! 3. **Processor** (`processor`): resolves the owner's identity,
//!    claims the per-activity sync lock, fetches full detail upstream,
//!    normalizes, and upserts. Failures are classified and recorded on
//!    the event row; only rate limiting is retried.
//! 4. **Notifier** (`notifications`): downstream signal after each
//!    successful save.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pierre_webhook_ingest::config::ServerConfig;
//! use anyhow::Result;
//!
//! fn main() -> Result<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("Webhook ingest configured on port {}", config.http_port);
//!     Ok(())
//! }
//! ```

/// Runtime configuration loaded from environment variables
pub mod config;

/// Shared resources wiring the pipeline together
pub mod context;

/// `SQLite` persistence stores for events, locks, identities, and activities
pub mod database;

/// Application error types and HTTP error mapping
pub mod errors;

/// Structured logging initialization
pub mod logging;

/// Domain models and status enums
pub mod models;

/// Activity normalization and product validity rules
pub mod normalizer;

/// Downstream notification interface
pub mod notifications;

/// Event processor driving queued events to terminal states
pub mod processor;

/// Upstream provider clients and credential resolution
pub mod providers;

/// In-process event queue and worker pool
pub mod queue;

/// Webhook receiver service
pub mod receiver;

/// HTTP route handlers
pub mod routes;
