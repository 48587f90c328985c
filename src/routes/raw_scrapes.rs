use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::source::{NewRawScrape, RawScrape, RawScrapeQuery};
use crate::routes::error::ApiError;
use crate::routes::sources::database;
use crate::services::auth::AuthenticatedUser;

/// POST /api/raw-scrapes: Archive a scrape captured outside the workers.
pub async fn create_raw_scrape(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Result<Json<NewRawScrape>, JsonRejection>,
) -> Result<(StatusCode, Json<RawScrape>), ApiError> {
    let Json(scrape) = payload?;
    scrape.validate()?;
    let pool = database(&state)?;

    if queries::find_source(pool, scrape.source_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Job source {} not found", scrape.source_id)));
    }
    let stored = queries::insert_raw_scrape(pool, &scrape).await?;

    tracing::debug!(id = stored.id, source_id = stored.source_id, subject = ?user.subject, "Stored raw scrape");
    Ok((StatusCode::CREATED, Json(stored)))
}

/// GET /api/raw-scrapes/latest?job_url=: Newest archived scrape of a URL.
pub async fn latest_raw_scrape(
    State(state): State<AppState>,
    query: Result<Query<RawScrapeQuery>, QueryRejection>,
) -> Result<Json<RawScrape>, ApiError> {
    let Query(query) = query?;
    query.validate()?;

    queries::latest_raw_scrape(database(&state)?, &query.job_url, query.only_successful)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No scrape found for {}", query.job_url)))
}
