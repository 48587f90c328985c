use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use chrono::Utc;

use crate::app_state::AppState;
use crate::models::job::JobState;
use crate::models::scrape::{BulkScrapeRequest, BulkScrapeResponse, ScrapeRequest, ScrapeResponse};
use crate::routes::error::ApiError;
use crate::services::auth::AuthenticatedUser;

/// POST /api/scrape: Submit a single URL for scraping.
pub async fn submit_scrape(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Result<Json<ScrapeResponse>, ApiError> {
    let Json(request) = payload?;
    let job = state.gateway.submit(request).await?;

    tracing::debug!(job_id = %job.job_id, subject = ?user.subject, "Accepted scrape request");

    Ok(Json(ScrapeResponse {
        job_id: job.job_id,
        status: JobState::Pending,
        message: "Job submitted successfully".to_string(),
        created_at: job.created_at,
    }))
}

/// POST /api/scrape/bulk: Submit many URLs sharing one configuration.
pub async fn submit_bulk(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Result<Json<BulkScrapeRequest>, JsonRejection>,
) -> Result<Json<BulkScrapeResponse>, ApiError> {
    let Json(request) = payload?;
    let submission = state.gateway.submit_bulk(request).await?;

    tracing::debug!(
        submitted = submission.job_ids.len(),
        subject = ?user.subject,
        "Accepted bulk scrape request"
    );

    let total_jobs = submission.job_ids.len();
    Ok(Json(BulkScrapeResponse {
        job_ids: submission.job_ids,
        total_jobs,
        status: JobState::Pending,
        message: format!("Submitted {total_jobs} jobs"),
        created_at: Utc::now(),
        rejected: submission.rejected,
    }))
}
