// ABOUTME: Configuration module for the webhook ingestion service
// ABOUTME: Collects all runtime settings into one struct injected at construction
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// Environment-based configuration loading
pub mod environment;

pub use environment::{ProcessingConfig, ServerConfig, StravaConfig};
