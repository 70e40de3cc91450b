// ABOUTME: Core provider abstractions for upstream activity fetching
// ABOUTME: Classified fetch errors, the fetch client trait, and credential resolution
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Upstream collaborator traits.
//!
//! The processor never talks to Strava directly; it goes through
//! [`CredentialProvider`] to obtain a ready-to-use [`ActivityFetcher`],
//! and every upstream failure arrives pre-classified as a
//! [`FetchError`] so retry policy stays out of the transport code.

use crate::database::Database;
use crate::models::Athlete;
use crate::providers::strava::StravaFetchClient;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Classified upstream fetch failure
#[derive(Debug, Error)]
pub enum FetchError {
    /// No usable credential for the athlete; cannot self-heal
    #[error("No upstream credential available")]
    MissingAuth,
    /// Provider signaled backoff; retryable at the task level
    #[error("Upstream rate limited")]
    RateLimited {
        /// Provider-suggested backoff, when sent
        retry_after: Option<Duration>,
    },
    /// The external object does not exist upstream
    #[error("Upstream object not found")]
    NotFound,
    /// Any other transport or protocol failure
    #[error("Upstream fetch failed: {0}")]
    Transient(String),
}

impl FetchError {
    /// Whether the scheduler should retry this failure with backoff
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Raw upstream activity payload.
///
/// Numeric fields are kept as raw JSON values because upstream payload
/// shape is not fully controlled; the normalizer coerces them.
#[derive(Debug, Clone, Deserialize)]
pub struct RawActivity {
    /// External activity id
    pub id: i64,
    /// Activity name
    #[serde(default)]
    pub name: Option<String>,
    /// Upstream sport/activity type string
    #[serde(default, alias = "type")]
    pub sport_type: Option<String>,
    /// Distance in meters; plain number or unit-wrapped object
    #[serde(default)]
    pub distance: serde_json::Value,
    /// Moving time in seconds; number, object, or duration string
    #[serde(default)]
    pub moving_time: serde_json::Value,
    /// Elapsed time in seconds; used when moving time is absent
    #[serde(default)]
    pub elapsed_time: serde_json::Value,
    /// Elevation gain in meters
    #[serde(default)]
    pub total_elevation_gain: serde_json::Value,
    /// RFC 3339 start timestamp
    #[serde(default)]
    pub start_date: Option<String>,
}

/// Upstream fetch client: full activity detail by external id
#[async_trait]
pub trait ActivityFetcher: Send + Sync {
    /// Fetch full detail for one external activity
    ///
    /// # Errors
    ///
    /// Returns a classified [`FetchError`].
    async fn fetch_activity(&self, external_id: i64) -> Result<RawActivity, FetchError>;
}

/// Resolves a ready-to-use fetch client for an athlete.
///
/// This core never performs token exchange; a valid upstream credential
/// must already exist.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Build a fetch client for the athlete's stored credential
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::MissingAuth`] when no usable credential
    /// exists, [`FetchError::Transient`] on storage failure.
    async fn fetcher_for(&self, athlete_id: Uuid) -> Result<Arc<dyn ActivityFetcher>, FetchError>;
}

/// Credential provider backed by the athlete token columns
pub struct DatabaseCredentialProvider {
    database: Arc<Database>,
    api_base: String,
}

impl DatabaseCredentialProvider {
    /// Create a provider reading credentials from the database
    #[must_use]
    pub fn new(database: Arc<Database>, api_base: String) -> Self {
        Self { database, api_base }
    }

    fn usable_token(athlete: &Athlete) -> Option<&str> {
        let token = athlete.strava_access_token.as_deref()?;
        match athlete.strava_expires_at {
            Some(expires_at) if expires_at <= Utc::now() => None,
            _ => Some(token),
        }
    }
}

#[async_trait]
impl CredentialProvider for DatabaseCredentialProvider {
    async fn fetcher_for(&self, athlete_id: Uuid) -> Result<Arc<dyn ActivityFetcher>, FetchError> {
        let athlete = self
            .database
            .get_athlete(athlete_id)
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?
            .ok_or(FetchError::MissingAuth)?;

        let token = Self::usable_token(&athlete).ok_or(FetchError::MissingAuth)?;

        Ok(Arc::new(StravaFetchClient::new(
            self.api_base.clone(),
            token.to_owned(),
        )))
    }
}
