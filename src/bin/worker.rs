use tokio::sync::watch;

use scrape_dispatch::config::AppConfig;
use scrape_dispatch::runtime::{self, Backends};
use scrape_dispatch::services::worker::WorkerPool;

#[tokio::main]
async fn main() {
    runtime::init_tracing();

    tracing::info!("Starting scrape worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    assert!(
        !config.uses_memory_backend(),
        "The in-memory broker only works inside the API process; set SCRAPER_BROKER_URL to a Redis URL"
    );

    let db = runtime::connect_database(&config)
        .await
        .expect("Failed to initialize database");

    let backends = Backends::connect(&config).expect("Failed to initialize broker and result store");
    backends
        .broker
        .health_check()
        .await
        .expect("Broker is not reachable");

    let deps = runtime::worker_deps(&config, &backends, db)
        .expect("Failed to initialize scraper strategies");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool = WorkerPool::spawn(config.worker_concurrency, deps, shutdown_rx);

    tracing::info!(workers = pool.len(), "Worker ready, starting job processing loop");

    runtime::shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    pool.join().await;

    tracing::info!("Worker stopped");
}
