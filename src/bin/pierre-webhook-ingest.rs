// ABOUTME: Server binary for the webhook ingestion pipeline
// ABOUTME: Wires config, database, providers, and workers, then serves HTTP
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Pierre Webhook Ingest Server Binary
//!
//! Starts the webhook ingestion HTTP server with durable event logging
//! and the background processing worker pool.

use anyhow::Result;
use axum::Router;
use clap::Parser;
use pierre_webhook_ingest::{
    config::ServerConfig,
    context::IngestResources,
    database::Database,
    logging,
    notifications::LoggingNotifier,
    providers::DatabaseCredentialProvider,
    routes::{HealthRoutes, WebhookRoutes},
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "pierre-webhook-ingest")]
#[command(about = "Pierre Fitness webhook ingestion - Strava activity event pipeline")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle container environments where clap may not work properly
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Argument parsing failed: {e}");
            eprintln!("Using default configuration");
            Args { http_port: None }
        }
    };

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }

    logging::init_from_env()?;

    info!("Starting Pierre Webhook Ingest");
    info!("{}", config.summary());

    let database = Arc::new(Database::new(&config.database_url).await?);
    info!("Database initialized: {}", config.database_url);

    let credentials = Arc::new(DatabaseCredentialProvider::new(
        Arc::clone(&database),
        config.strava.api_base.clone(),
    ));
    let notifier = Arc::new(LoggingNotifier);

    let resources = Arc::new(IngestResources::new(config, database, credentials, notifier));
    info!(
        workers = resources.config.processing.worker_count,
        "Event processing workers started"
    );

    let app = Router::new()
        .merge(WebhookRoutes::routes(Arc::clone(&resources)))
        .merge(HealthRoutes::routes(Arc::clone(&resources)))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", resources.config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Webhook ingest server listening on {addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
