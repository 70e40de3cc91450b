// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Handles environment variables and runtime configuration parsing
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Environment-based configuration management for production deployment
//!
//! Collects every setting the receiver and processor consult (verify
//! token, expected subscription id, retry policy) into one explicit
//! struct injected at construction, instead of ad hoc reads from
//! process-wide state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Strava webhook and API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StravaConfig {
    /// Secret echoed back during subscription handshake validation.
    /// `None` means the handshake fails closed with a server error.
    pub verify_token: Option<String>,
    /// Subscription id deliveries must carry. `None` means deliveries
    /// are acknowledged without being recorded (anti-retry-storm).
    pub subscription_id: Option<i64>,
    /// Base URL for the Strava v3 API
    pub api_base: String,
}

/// Worker pool and retry policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Parallel event processor workers
    pub worker_count: usize,
    /// Maximum task-level retries for rate-limited fetches
    pub fetch_retry_max: i64,
    /// Fixed delay between rate-limit retries
    pub fetch_retry_delay: Duration,
}

/// Server configuration loaded from environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP API port
    pub http_port: u16,
    /// Database connection string
    pub database_url: String,
    /// Strava settings
    pub strava: StravaConfig,
    /// Processing settings
    pub processing: ProcessingConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a set variable fails to parse into its
    /// expected type.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            http_port: env_var_or("HTTP_PORT", "8081")?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./data/webhook_ingest.db".into()),
            strava: StravaConfig {
                verify_token: env::var("STRAVA_VERIFY_TOKEN").ok(),
                subscription_id: env::var("STRAVA_SUBSCRIPTION_ID")
                    .ok()
                    .map(|raw| {
                        raw.parse()
                            .with_context(|| format!("Invalid STRAVA_SUBSCRIPTION_ID: {raw}"))
                    })
                    .transpose()?,
                api_base: env::var("STRAVA_API_BASE")
                    .unwrap_or_else(|_| "https://www.strava.com/api/v3".into()),
            },
            processing: ProcessingConfig {
                worker_count: env_var_or("WEBHOOK_WORKER_COUNT", "4")?,
                fetch_retry_max: env_var_or("FETCH_RETRY_MAX", "5")?,
                fetch_retry_delay: Duration::from_secs(env_var_or("FETCH_RETRY_DELAY_SECS", "60")?),
            },
        })
    }

    /// Human-readable configuration summary for startup logging.
    /// Secrets are reported by presence only.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Pierre Webhook Ingest Configuration:\n\
             - HTTP Port: {}\n\
             - Database: {}\n\
             - Strava Verify Token: {}\n\
             - Strava Subscription: {}\n\
             - Workers: {}\n\
             - Fetch Retries: {} (delay {}s)",
            self.http_port,
            self.database_url,
            if self.strava.verify_token.is_some() {
                "configured"
            } else {
                "NOT CONFIGURED"
            },
            self.strava
                .subscription_id
                .map_or_else(|| "NOT CONFIGURED".to_owned(), |id| id.to_string()),
            self.processing.worker_count,
            self.processing.fetch_retry_max,
            self.processing.fetch_retry_delay.as_secs(),
        )
    }
}

/// Parse an environment variable with a default fallback
fn env_var_or<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = env::var(name).unwrap_or_else(|_| default.to_owned());
    raw.parse()
        .map_err(|e| anyhow::anyhow!("Invalid value for {name} ({raw}): {e}"))
}
