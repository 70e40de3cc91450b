// ABOUTME: Common data models for the webhook ingestion pipeline
// ABOUTME: Defines webhook events, sync locks, external identities, athletes, and activities
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Data models shared across the ingestion pipeline.
//!
//! Every status enum here mirrors a `CHECK` constraint in the database
//! layer; `as_str()` is the canonical persisted form.

use anyhow::{anyhow, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle states of a stored webhook event.
///
/// `Received` is the pre-classification state; `Queued` and `Processing`
/// are in-flight; the remaining four are terminal (with `LinkRequired`
/// being a resumable pause rather than a failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Persisted but not yet classified
    Received,
    /// Classified and waiting for a worker
    Queued,
    /// Claimed by a worker
    Processing,
    /// Activity persisted successfully
    Saved,
    /// Rejected with an explicit reason, never retried
    Discarded,
    /// Terminal failure, never retried automatically
    Failed,
    /// Parked until the owner identity is linked
    LinkRequired,
}

impl EventStatus {
    /// Canonical database representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Saved => "saved",
            Self::Discarded => "discarded",
            Self::Failed => "failed",
            Self::LinkRequired => "link_required",
        }
    }

    /// Whether a duplicate delivery may legitimately re-trigger processing
    #[must_use]
    pub fn allows_requeue(&self) -> bool {
        matches!(self, Self::Received | Self::Failed)
    }
}

impl FromStr for EventStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "received" => Ok(Self::Received),
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "saved" => Ok(Self::Saved),
            "discarded" => Ok(Self::Discarded),
            "failed" => Ok(Self::Failed),
            "link_required" => Ok(Self::LinkRequired),
            _ => Err(anyhow!("Unknown event status: {s}")),
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of the per-activity mutual exclusion record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// No processing attempt in flight
    Idle,
    /// An event currently owns processing for this activity
    Running,
    /// Last processing attempt completed (saved or rejected)
    Done,
    /// Deferred pending an external precondition (identity linkage)
    Blocked,
}

impl SyncStatus {
    /// Canonical database representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Done => "done",
            Self::Blocked => "blocked",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "blocked" => Ok(Self::Blocked),
            _ => Err(anyhow!("Unknown sync status: {s}")),
        }
    }
}

/// Linkage status of an external identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStatus {
    /// Owner id seen on the wire, no matching athlete yet
    Unlinked,
    /// Mapped to an internal athlete
    Linked,
}

impl IdentityStatus {
    /// Canonical database representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unlinked => "unlinked",
            Self::Linked => "linked",
        }
    }
}

impl FromStr for IdentityStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unlinked" => Ok(Self::Unlinked),
            "linked" => Ok(Self::Linked),
            _ => Err(anyhow!("Unknown identity status: {s}")),
        }
    }
}

/// Validity of a persisted domain activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityValidity {
    /// Accepted by product rules
    Valid,
    /// Rejected; `invalid_reason` names the violated rule
    Discarded,
}

impl ActivityValidity {
    /// Canonical database representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Discarded => "discarded",
        }
    }
}

impl FromStr for ActivityValidity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "valid" => Ok(Self::Valid),
            "discarded" => Ok(Self::Discarded),
            _ => Err(anyhow!("Unknown activity validity: {s}")),
        }
    }
}

/// Canonical sport classification produced by the normalizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SportType {
    /// Road or track running
    Run,
    /// Trail running
    TrailRun,
    /// All ride-family activities
    Bike,
    /// Walking and hiking
    Walk,
    /// Strength work and gym sessions (duration-based)
    Strength,
    /// Anything unmapped; carries the upstream type string
    Other(String),
}

impl SportType {
    /// Canonical database representation
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Run => "RUN",
            Self::TrailRun => "TRAIL_RUN",
            Self::Bike => "BIKE",
            Self::Walk => "WALK",
            Self::Strength => "STRENGTH",
            Self::Other(raw) => raw,
        }
    }

    /// Whether this sport is in the supported set at all
    #[must_use]
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    /// Supported sports that are measured by duration rather than distance
    #[must_use]
    pub fn is_duration_based(&self) -> bool {
        matches!(self, Self::Strength)
    }
}

impl FromStr for SportType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "RUN" => Self::Run,
            "TRAIL_RUN" => Self::TrailRun,
            "BIKE" => Self::Bike,
            "WALK" => Self::Walk,
            "STRENGTH" => Self::Strength,
            other => Self::Other(other.to_owned()),
        })
    }
}

impl fmt::Display for SportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row per distinct inbound notification; the durable event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Deterministic idempotency key (sha256 over the canonical envelope subset)
    pub event_uid: String,
    /// Envelope `object_type` as received
    pub object_type: String,
    /// Envelope `aspect_type` as received
    pub aspect_type: String,
    /// External activity (or athlete) id
    pub object_id: i64,
    /// External account id of the activity owner
    pub owner_id: i64,
    /// Provider subscription the event was delivered under
    pub subscription_id: i64,
    /// Provider-side event timestamp (unix seconds)
    pub event_time: i64,
    /// Full envelope retained for audit/replay
    pub payload_raw: String,
    /// Current lifecycle state
    pub status: EventStatus,
    /// Processing attempts consumed by task-level retries
    pub attempts: i64,
    /// Truncated message from the last failure, if any
    pub last_error: Option<String>,
    /// Machine-readable reason when discarded or parked
    pub discard_reason: Option<String>,
    /// Redeliveries observed for this `event_uid`
    pub duplicate_count: i64,
    /// Correlation id assigned at ingestion for log stitching
    pub correlation_id: String,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

/// Per (provider, external activity id) mutual-exclusion record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySyncState {
    /// Provider slug (currently always `strava`)
    pub provider: String,
    /// External activity id the lock covers
    pub external_id: i64,
    /// Lock status
    pub status: SyncStatus,
    /// Event currently owning processing, when `Running`
    pub locked_by_event_uid: Option<String>,
    /// Reason recorded when `Blocked`
    pub discard_reason: Option<String>,
    /// Last transition time
    pub updated_at: DateTime<Utc>,
}

/// Mapping from (provider, external user id) to an internal athlete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalIdentity {
    /// Provider slug
    pub provider: String,
    /// External account id
    pub external_user_id: i64,
    /// Internal athlete, once linked
    pub athlete_id: Option<Uuid>,
    /// Linkage status
    pub status: IdentityStatus,
    /// Row creation time
    pub created_at: DateTime<Utc>,
}

/// Internal athlete record with upstream credential columns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Athlete {
    /// Internal id
    pub id: Uuid,
    /// Unique email
    pub email: String,
    /// Optional display name
    pub display_name: Option<String>,
    /// Strava access token, when the athlete has authorized
    pub strava_access_token: Option<String>,
    /// Strava refresh token
    pub strava_refresh_token: Option<String>,
    /// Access token expiry
    pub strava_expires_at: Option<DateTime<Utc>>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
}

impl Athlete {
    /// Create a new athlete without upstream credentials
    #[must_use]
    pub fn new(email: String, display_name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            display_name,
            strava_access_token: None,
            strava_refresh_token: None,
            strava_expires_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Canonical domain activity produced by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    /// Storage id
    pub id: i64,
    /// Owning athlete
    pub athlete_id: Uuid,
    /// Provider slug, half of the natural key
    pub source: String,
    /// External object id, other half of the natural key
    pub source_object_id: i64,
    /// Legacy alternate unique key, kept for backward compatibility
    pub legacy_uid: String,
    /// Activity name as fetched
    pub name: String,
    /// Canonical sport classification
    pub sport_type: SportType,
    /// Distance in meters (0 for duration-based sports)
    pub distance_meters: f64,
    /// Duration in seconds
    pub duration_seconds: i64,
    /// Elevation gain in meters
    pub elevation_gain: f64,
    /// Activity start time
    pub start_time: DateTime<Utc>,
    /// Whether product rules accepted the activity
    pub validity: ActivityValidity,
    /// Violated rule when discarded
    pub invalid_reason: Option<String>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last write time
    pub updated_at: DateTime<Utc>,
}

/// Field-set applied by the idempotent upsert writer
#[derive(Debug, Clone)]
pub struct ActivityWrite {
    /// Owning athlete
    pub athlete_id: Uuid,
    /// Provider slug
    pub source: String,
    /// External object id
    pub source_object_id: i64,
    /// Activity name
    pub name: String,
    /// Canonical sport classification
    pub sport_type: SportType,
    /// Distance in meters
    pub distance_meters: f64,
    /// Duration in seconds
    pub duration_seconds: i64,
    /// Elevation gain in meters
    pub elevation_gain: f64,
    /// Activity start time
    pub start_time: DateTime<Utc>,
}

impl ActivityWrite {
    /// Legacy alternate key value, retained for backward compatibility
    /// with rows imported before the natural key existed.
    #[must_use]
    pub fn legacy_uid(&self) -> String {
        format!("{}:{}", self.source, self.source_object_id)
    }
}
