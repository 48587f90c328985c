pub mod error;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod raw_scrapes;
pub mod scrape;
pub mod sources;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Largest accepted request body. Bulk submissions are the biggest payloads.
const BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

async fn service_banner() -> Json<Value> {
    Json(json!({
        "message": "Scrape dispatch API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

/// Build the HTTP API with all endpoints and middleware.
pub fn build_router(state: AppState, prometheus: Arc<PrometheusHandle>) -> Router {
    Router::new()
        .route("/", get(service_banner))
        .route("/health", get(health::health_check))
        .route("/api/scrape", post(scrape::submit_scrape))
        .route("/api/scrape/bulk", post(scrape::submit_bulk))
        .route(
            "/api/jobs/{job_id}",
            get(jobs::get_job_status).delete(jobs::cancel_job),
        )
        .route(
            "/api/job-sources",
            get(sources::list_sources).post(sources::create_source),
        )
        .route("/api/job-sources/dispatch", post(sources::dispatch_sources))
        .route("/api/job-sources/{source_id}", get(sources::get_source))
        .route("/api/raw-scrapes", post(raw_scrapes::create_raw_scrape))
        .route("/api/raw-scrapes/latest", get(raw_scrapes::latest_raw_scrape))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(prometheus),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
}
