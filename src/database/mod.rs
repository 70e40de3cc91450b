// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Database Management
//!
//! Persistence for the webhook ingestion pipeline: the durable event
//! log, the per-activity sync locks, external identity mappings,
//! athlete records, the canonical activity store, and the ingest audit
//! log. All mutations are single-row keyed updates; there are no
//! cross-row transactions spanning multiple events.

mod activities;
mod athletes;
mod audit;
mod events;
mod identities;
mod sync_states;

pub use activities::UPSERT_MAX_ATTEMPTS;
pub use audit::AuditEntry;
pub use events::NewWebhookEvent;
pub use sync_states::LockAcquire;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};

/// Database manager for the ingestion pipeline stores
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Create a new database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a migration fails.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Ensure SQLite creates the database file if it doesn't exist
        let connection_options = if database_url.starts_with("sqlite:")
            && !database_url.contains(":memory:")
            && !database_url.contains('?')
        {
            format!("{database_url}?mode=rwc")
        } else {
            database_url.to_owned()
        };

        // In-memory SQLite gives every pooled connection its own
        // database; a single connection keeps state coherent in tests.
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&connection_options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;

        Ok(db)
    }

    /// Get a reference to the database pool for advanced operations
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Run database migrations
    ///
    /// # Errors
    ///
    /// Returns an error if any table or index creation fails.
    pub async fn migrate(&self) -> Result<()> {
        self.migrate_events().await?;
        self.migrate_sync_states().await?;
        self.migrate_identities().await?;
        self.migrate_athletes().await?;
        self.migrate_activities().await?;
        self.migrate_audit().await?;
        Ok(())
    }
}

/// Check whether a sqlx error is a unique-constraint violation
pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_err) => db_err.message().contains("UNIQUE constraint failed"),
        _ => false,
    }
}

/// Check whether a unique violation names the given column
pub(crate) fn violates_column(error: &sqlx::Error, column: &str) -> bool {
    match error {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message();
            message.contains("UNIQUE constraint failed") && message.contains(column)
        }
        _ => false,
    }
}
