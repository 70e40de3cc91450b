// ABOUTME: Strava API fetch client with classified error handling
// ABOUTME: Fetches full activity detail and maps HTTP failures to the fetch error taxonomy
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::core::{ActivityFetcher, FetchError, RawActivity};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Fetch client for the Strava v3 API.
///
/// Holds a ready-to-use access token; token acquisition and refresh
/// happen elsewhere.
pub struct StravaFetchClient {
    client: Client,
    api_base: String,
    access_token: String,
}

impl StravaFetchClient {
    /// Create a client for a given API base and access token
    #[must_use]
    pub fn new(api_base: String, access_token: String) -> Self {
        Self {
            client: Client::new(),
            api_base,
            access_token,
        }
    }

    fn retry_after(response: &reqwest::Response) -> Option<Duration> {
        response
            .headers()
            .get("Retry-After")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .map(Duration::from_secs)
    }
}

#[async_trait]
impl ActivityFetcher for StravaFetchClient {
    async fn fetch_activity(&self, external_id: i64) -> Result<RawActivity, FetchError> {
        let url = format!("{}/activities/{external_id}", self.api_base);
        debug!(external_id, "Fetching activity detail from Strava");

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(FetchError::MissingAuth),
            StatusCode::TOO_MANY_REQUESTS => Err(FetchError::RateLimited {
                retry_after: Self::retry_after(&response),
            }),
            StatusCode::NOT_FOUND => Err(FetchError::NotFound),
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| FetchError::Transient(format!("Invalid activity payload: {e}"))),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(FetchError::Transient(format!(
                    "Strava API returned {status}: {body}"
                )))
            }
        }
    }
}
