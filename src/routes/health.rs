use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::time::Instant;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub queue_depth: Option<u64>,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub broker: ComponentHealth,
    pub result_store: ComponentHealth,
    pub database: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn from_check<E: std::fmt::Display>(component: &str, started: Instant, result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self {
                status: "ok".to_string(),
                latency_ms: Some(started.elapsed().as_millis() as u64),
            },
            Err(e) => {
                tracing::warn!(component, error = %e, "Health check failed");
                Self {
                    status: "error".to_string(),
                    latency_ms: None,
                }
            }
        }
    }

    fn disabled() -> Self {
        Self {
            status: "disabled".to_string(),
            latency_ms: None,
        }
    }

    fn is_healthy(&self) -> bool {
        self.status != "error"
    }
}

/// GET /health: dependency status plus current queue depth.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let started = Instant::now();
    let broker = ComponentHealth::from_check("broker", started, state.broker.health_check().await);

    let started = Instant::now();
    let result_store =
        ComponentHealth::from_check("result_store", started, state.store.health_check().await);

    let database = match &state.db {
        Some(pool) => {
            let started = Instant::now();
            let result = sqlx::query("SELECT 1").execute(pool).await.map(|_| ());
            ComponentHealth::from_check("database", started, result)
        }
        None => ComponentHealth::disabled(),
    };

    let queue_depth = state.broker.depth().await.ok();
    if let Some(depth) = queue_depth {
        metrics::gauge!("scrape_queue_depth").set(depth as f64);
    }

    let all_healthy = broker.is_healthy() && result_store.is_healthy() && database.is_healthy();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        queue_depth,
        checks: HealthChecks {
            broker,
            result_store,
            database,
        },
    };

    (status_code, Json(response))
}
