use std::time::Duration;

use serde::Deserialize;

/// Broker URL scheme that selects the in-process backends.
pub const MEMORY_BACKEND: &str = "memory://";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000"). Unused by worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the task broker, or `memory://`.
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    /// Redis connection string for job results. Defaults to the broker.
    #[serde(default)]
    pub result_backend_url: Option<String>,

    /// PostgreSQL connection string for job sources and the raw scrape archive.
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// HS256 secret used to validate bearer tokens. Auth is off when unset.
    #[serde(default)]
    pub jwt_secret: Option<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout for fetches and browser navigation.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Hard deadline for one scrape attempt.
    #[serde(default = "default_task_time_limit_secs")]
    pub task_time_limit_secs: u64,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Number of concurrent workers in a worker process.
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// How long one dequeue waits for a task before returning empty.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How often an in-flight job checks for revocation.
    #[serde(default = "default_revocation_check_ms")]
    pub revocation_check_ms: u64,

    /// Lifetime of status records in the result store.
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,

    /// Workers to run inside the API process.
    #[serde(default)]
    pub embedded_workers: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_broker_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (compatible; ScrapeDispatch/0.1)".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_task_time_limit_secs() -> u64 {
    300
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    300_000
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_revocation_check_ms() -> u64 {
    500
}

fn default_result_ttl_secs() -> u64 {
    86_400
}

impl AppConfig {
    /// Load from `SCRAPER_*` environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed("SCRAPER_").from_env()
    }

    pub fn uses_memory_backend(&self) -> bool {
        self.broker_url.starts_with(MEMORY_BACKEND)
    }

    pub fn result_backend_url(&self) -> &str {
        self.result_backend_url.as_deref().unwrap_or(&self.broker_url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn task_time_limit(&self) -> Duration {
        Duration::from_secs(self.task_time_limit_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn revocation_check(&self) -> Duration {
        Duration::from_millis(self.revocation_check_ms)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    /// Workers the API process runs itself. The in-memory broker is only
    /// reachable from inside the process, so it always gets some.
    pub fn embedded_worker_count(&self) -> usize {
        if self.embedded_workers == 0 && self.uses_memory_backend() {
            self.worker_concurrency
        } else {
            self.embedded_workers
        }
    }
}
