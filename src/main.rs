use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::sync::watch;

use scrape_dispatch::app_state::AppState;
use scrape_dispatch::config::AppConfig;
use scrape_dispatch::routes;
use scrape_dispatch::runtime::{self, Backends};
use scrape_dispatch::services::worker::WorkerPool;

#[tokio::main]
async fn main() {
    runtime::init_tracing();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing scrape-dispatch server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    let db = runtime::connect_database(&config)
        .await
        .expect("Failed to initialize database");

    let backends = Backends::connect(&config).expect("Failed to initialize broker and result store");

    let state = AppState::new(
        backends.broker.clone(),
        backends.store.clone(),
        db.clone(),
        config.jwt_secret.as_deref(),
    );
    if state.auth.is_none() {
        tracing::warn!("SCRAPER_JWT_SECRET not set; mutating endpoints are unauthenticated");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = match config.embedded_worker_count() {
        0 => None,
        count => {
            let deps = runtime::worker_deps(&config, &backends, db)
                .expect("Failed to initialize scraper strategies");
            Some(WorkerPool::spawn(count, deps, shutdown_rx))
        }
    };

    let app = routes::build_router(state, prometheus_handle);

    tracing::info!("Starting scrape-dispatch on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(runtime::shutdown_signal())
        .await
        .expect("Server error");

    if let Some(pool) = workers {
        tracing::info!(workers = pool.len(), "Waiting for embedded workers to finish");
        let _ = shutdown_tx.send(true);
        pool.join().await;
    }
    tracing::info!("Server stopped");
}
