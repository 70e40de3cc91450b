// ABOUTME: Route module organization for webhook ingestion HTTP endpoints
// ABOUTME: Thin handlers delegating to the receiver service layer
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Route modules, organized by domain. Handlers are thin and delegate
//! to the receiver service; response-code mapping lives here.

/// Health check and system status routes
pub mod health;
/// Webhook handshake and event delivery routes
pub mod webhooks;

/// Health check route handlers
pub use health::HealthRoutes;
/// Webhook route handlers
pub use webhooks::WebhookRoutes;
