use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for every metric the service emits.
pub fn describe_metrics() {
    metrics::describe_counter!("scrape_jobs_submitted_total", "Scrape jobs accepted and enqueued");
    metrics::describe_counter!("scrape_jobs_completed_total", "Scrape jobs that completed");
    metrics::describe_counter!("scrape_jobs_failed_total", "Scrape jobs that failed permanently");
    metrics::describe_counter!("scrape_jobs_retried_total", "Scrape attempts rescheduled after a transient failure");
    metrics::describe_counter!("scrape_jobs_cancelled_total", "Scrape jobs cancelled by request");
    metrics::describe_histogram!("scrape_duration_seconds", "Wall time of a single scrape attempt");
    metrics::describe_gauge!("scrape_queue_depth", "Tasks waiting in the broker, ready plus delayed");
}

/// Prometheus metrics scrape endpoint.
/// Returns metrics in Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
