use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::scrape::{CancelResponse, JobStatusResponse};
use crate::routes::error::ApiError;
use crate::services::auth::AuthenticatedUser;

/// A malformed id names no job, so it gets the same 404 as an unknown one.
fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(format!("Job {raw} not found")))
}

/// GET /api/jobs/{job_id}: Check a scrape job's status.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let status = state.gateway.get_status(job_id).await?;
    Ok(Json(status.into()))
}

/// DELETE /api/jobs/{job_id}: Cancel a pending or running job.
pub async fn cancel_job(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(job_id): Path<String>,
) -> Result<(StatusCode, Json<CancelResponse>), ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let cancelled = state.gateway.cancel(job_id).await?;
    tracing::debug!(job_id = %job_id, cancelled, subject = ?user.subject, "Cancel requested");

    let (status, message) = if cancelled {
        (StatusCode::OK, "Job cancelled successfully")
    } else {
        (StatusCode::BAD_REQUEST, "Job already finished and cannot be cancelled")
    };

    Ok((
        status,
        Json(CancelResponse {
            job_id,
            cancelled,
            message: message.to_string(),
        }),
    ))
}
