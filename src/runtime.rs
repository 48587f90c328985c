//! Startup wiring shared by the API server and the worker binary.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::db;
use crate::services::memory::{InMemoryBroker, InMemoryResultStore};
use crate::services::queue::{Broker, QueueError, RedisBroker};
use crate::services::result_store::{RedisResultStore, ResultStore, StoreError};
use crate::services::retry::BackoffPolicy;
use crate::services::scraper::{ScrapeError, ScraperSet, ScraperSettings};
use crate::services::worker::WorkerDeps;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Broker setup failed: {0}")]
    Queue(#[from] QueueError),

    #[error("Result store setup failed: {0}")]
    Store(#[from] StoreError),

    #[error("Scraper setup failed: {0}")]
    Scraper(#[from] ScrapeError),

    #[error("Database setup failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Slack on top of the task time limit before a claim counts as abandoned.
const CLAIM_GRACE: Duration = Duration::from_secs(60);

/// Structured JSON logs filtered by `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
}

/// The broker and result store selected by configuration.
#[derive(Clone)]
pub struct Backends {
    pub broker: Arc<dyn Broker>,
    pub store: Arc<dyn ResultStore>,
}

impl Backends {
    pub fn in_memory(result_ttl: Duration) -> Self {
        Self {
            broker: Arc::new(InMemoryBroker::new()),
            store: Arc::new(InMemoryResultStore::new(result_ttl)),
        }
    }

    pub fn connect(config: &AppConfig) -> Result<Self, StartupError> {
        if config.uses_memory_backend() {
            tracing::warn!("Using in-process broker and result store; nothing survives a restart");
            return Ok(Self::in_memory(config.result_ttl()));
        }

        tracing::info!("Connecting to Redis broker and result backend");
        Ok(Self {
            broker: Arc::new(
                RedisBroker::new(&config.broker_url)?
                    .with_visibility_timeout(config.task_time_limit() + CLAIM_GRACE),
            ),
            store: Arc::new(RedisResultStore::new(
                config.result_backend_url(),
                config.result_ttl(),
            )?),
        })
    }
}

/// Connect and migrate the job-source database when one is configured.
pub async fn connect_database(config: &AppConfig) -> Result<Option<PgPool>, StartupError> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::info!("No database configured; job sources and scrape archive disabled");
        return Ok(None);
    };

    tracing::info!("Connecting to PostgreSQL database");
    let pool = db::init_pool(url, config.database_max_connections).await?;

    tracing::info!("Running database migrations");
    db::run_migrations(&pool).await?;
    Ok(Some(pool))
}

/// Build worker dependencies with the production scraper strategies.
pub fn worker_deps(
    config: &AppConfig,
    backends: &Backends,
    archive: Option<PgPool>,
) -> Result<WorkerDeps, StartupError> {
    let scraper = ScraperSet::new(&ScraperSettings {
        user_agent: config.user_agent.clone(),
        request_timeout: config.request_timeout(),
    })?;

    Ok(WorkerDeps {
        broker: backends.broker.clone(),
        store: backends.store.clone(),
        scraper: Arc::new(scraper),
        backoff: BackoffPolicy::from_millis(config.retry_base_delay_ms, config.retry_max_delay_ms),
        task_time_limit: config.task_time_limit(),
        poll_interval: config.poll_interval(),
        revocation_check: config.revocation_check(),
        archive,
    })
}

/// Resolves on ctrl-c.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
