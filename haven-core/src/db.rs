use crate::config::DatabaseConfig;
use crate::error::HavenError;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

const SCHEMA: &str = include_str!("../migrations/0001_incidents.sql");

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

/// Pool that connects on first use. Lets the HTTP surface start (and be
/// tested) without a reachable database.
pub fn create_lazy_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_lazy(&config.url)
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Apply the embedded schema. Every statement is idempotent.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), HavenError> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    tracing::info!("Database schema ensured");
    Ok(())
}
