use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use garde::Validate;
use sqlx::PgPool;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::job::JobState;
use crate::models::scrape::BulkScrapeResponse;
use crate::models::source::{DispatchSourcesRequest, JobSource, NewJobSource, SourceListQuery};
use crate::routes::error::ApiError;
use crate::services::auth::AuthenticatedUser;

pub(crate) fn database(state: &AppState) -> Result<&PgPool, ApiError> {
    state
        .db
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("Job sources require a configured database".to_string()))
}

/// GET /api/job-sources: List job sources, enabled ones unless asked otherwise.
pub async fn list_sources(
    State(state): State<AppState>,
    Query(query): Query<SourceListQuery>,
) -> Result<Json<Vec<JobSource>>, ApiError> {
    let sources = queries::list_sources(database(&state)?, !query.include_disabled).await?;
    Ok(Json(sources))
}

/// POST /api/job-sources: Register a new source.
pub async fn create_source(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Result<Json<NewJobSource>, JsonRejection>,
) -> Result<(StatusCode, Json<JobSource>), ApiError> {
    let Json(source) = payload?;
    source.validate()?;

    let created = queries::insert_source(database(&state)?, &source)
        .await?
        .ok_or_else(|| {
            ApiError::Conflict(format!(
                "A job source named '{}' already exists",
                source.source_name.trim()
            ))
        })?;

    tracing::info!(
        source_id = created.id,
        source_name = %created.source_name,
        subject = ?user.subject,
        "Registered job source"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/job-sources/{source_id}
pub async fn get_source(
    State(state): State<AppState>,
    Path(source_id): Path<i64>,
) -> Result<Json<JobSource>, ApiError> {
    queries::find_source(database(&state)?, source_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job source {source_id} not found")))
}

/// POST /api/job-sources/dispatch: Create one scrape job per enabled source.
pub async fn dispatch_sources(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Result<Json<DispatchSourcesRequest>, JsonRejection>,
) -> Result<Json<BulkScrapeResponse>, ApiError> {
    let Json(request) = payload?;
    let pool = database(&state)?;

    let sources = match &request.source_ids {
        None => queries::list_sources(pool, true).await?,
        Some(ids) => {
            let mut sources = Vec::with_capacity(ids.len());
            for &id in ids {
                let source = queries::find_source(pool, id)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("Job source {id} not found")))?;
                sources.push(source);
            }
            sources
        }
    };

    let submission = state
        .gateway
        .dispatch_sources(&sources, &request.config)
        .await?;

    tracing::info!(
        sources = sources.len(),
        dispatched = submission.job_ids.len(),
        subject = ?user.subject,
        "Dispatched job sources"
    );

    let total_jobs = submission.job_ids.len();
    Ok(Json(BulkScrapeResponse {
        job_ids: submission.job_ids,
        total_jobs,
        status: JobState::Pending,
        message: format!("Dispatched {total_jobs} jobs from {} sources", sources.len()),
        created_at: Utc::now(),
        rejected: submission.rejected,
    }))
}
