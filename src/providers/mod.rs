// ABOUTME: Fitness provider abstractions and implementations for upstream fetches
// ABOUTME: Defines the fetch client trait, classified errors, and the Strava client
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// Core provider traits and classified errors
pub mod core;
/// Strava fetch client implementation
pub mod strava;

pub use core::{
    ActivityFetcher, CredentialProvider, DatabaseCredentialProvider, FetchError, RawActivity,
};
pub use strava::StravaFetchClient;

/// Provider slug for Strava, the only provider currently ingested
pub const STRAVA: &str = "strava";
