use std::collections::HashMap;

use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{JobState, JobStatus, ScrapeConfig};

/// Page content returned by a scraper strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapeOutput {
    pub url: String,

    /// HTTP status of the fetch. Browser navigation does not expose one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    pub title: Option<String>,
    pub html: String,

    /// Text matched per selector key; present only when selectors were given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<HashMap<String, Vec<String>>>,
}

/// POST /api/scrape body.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ScrapeRequest {
    #[garde(length(min = 1, max = 2000))]
    pub url: String,

    #[serde(flatten)]
    #[garde(dive)]
    pub config: ScrapeConfig,
}

/// POST /api/scrape/bulk body.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BulkScrapeRequest {
    #[garde(length(min = 1))]
    pub urls: Vec<String>,

    /// Upper bound on concurrent enqueues while submitting.
    #[serde(default = "default_batch_size")]
    #[garde(range(min = 1, max = 100))]
    pub batch_size: usize,

    #[serde(flatten)]
    #[garde(dive)]
    pub config: ScrapeConfig,
}

fn default_batch_size() -> usize {
    5
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScrapeResponse {
    pub job_id: Uuid,
    pub status: JobState,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// A bulk entry that was not turned into a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedUrl {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkScrapeResponse {
    pub job_ids: Vec<Uuid>,
    pub total_jobs: usize,
    pub status: JobState,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedUrl>,
}

/// GET /api/jobs/{job_id} response.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobState,
    pub result: Option<ScrapeOutput>,
    pub error: Option<String>,
    pub attempts: u32,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<JobStatus> for JobStatusResponse {
    fn from(status: JobStatus) -> Self {
        Self {
            job_id: status.job_id,
            status: status.state,
            result: status.result,
            error: status.error,
            attempts: status.attempts,
            created_at: Some(status.created_at),
            completed_at: status.completed_at,
        }
    }
}

/// DELETE /api/jobs/{job_id} response.
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: Uuid,
    pub cancelled: bool,
    pub message: String,
}
