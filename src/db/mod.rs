//! PostgreSQL access for job sources and the raw scrape archive.

pub mod queries;

use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::{postgres::PgPoolOptions, PgPool};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Open a pool sized for the process. Workers only write archive rows, so a
/// handful of connections is enough.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await
}

/// Create or upgrade the `job_source` and `job_raw_scrape` tables.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}
