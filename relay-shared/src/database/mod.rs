//! Database pool construction and the shared sqlx migrator.

pub mod migrator;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::{RelayError, RelayResult};

pub async fn connect(config: &DatabaseConfig) -> RelayResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
        .connect(&config.url)
        .await
        .map_err(|e| RelayError::fatal(format!("failed to connect to database: {e}")))
}
