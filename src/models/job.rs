use std::collections::HashMap;

use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::scrape::ScrapeOutput;

/// Scraper type as accepted on the HTTP surface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScraperType {
    #[default]
    Requests,
    Selenium,
    Playwright,
    Scrapy,
}

/// Execution strategy a job is dispatched to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScraperKind {
    Static,
    Browser,
}

impl ScraperType {
    /// Map a requested scraper type onto an execution strategy.
    ///
    /// Returns `None` for types that have no strategy (`scrapy`).
    pub fn kind(self, javascript_enabled: bool) -> Option<ScraperKind> {
        match self {
            ScraperType::Requests if javascript_enabled => Some(ScraperKind::Browser),
            ScraperType::Requests => Some(ScraperKind::Static),
            ScraperType::Selenium | ScraperType::Playwright => Some(ScraperKind::Browser),
            ScraperType::Scrapy => None,
        }
    }
}

/// Lifecycle state of a scrape job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub const NON_TERMINAL: [JobState; 2] = [JobState::Pending, JobState::InProgress];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Terminal states are absorbing; everything else may move anywhere.
    pub fn can_transition_to(self, _next: JobState) -> bool {
        !self.is_terminal()
    }
}

/// Per-job scraper configuration, shared verbatim by bulk submissions.
///
/// Structural checks live on `ScrapeRequest`'s validation; ranges are enforced here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct ScrapeConfig {
    #[serde(default)]
    #[garde(skip)]
    pub scraper_type: ScraperType,

    #[serde(default)]
    #[garde(skip)]
    pub selectors: Option<HashMap<String, String>>,

    #[serde(default)]
    #[garde(skip)]
    pub headers: Option<HashMap<String, String>>,

    #[serde(default)]
    #[garde(skip)]
    pub cookies: Option<HashMap<String, String>>,

    #[serde(default)]
    #[garde(skip)]
    pub proxy: Option<String>,

    #[serde(default)]
    #[garde(skip)]
    pub javascript_enabled: bool,

    /// Seconds to wait after navigation (browser strategy only).
    #[serde(default)]
    #[garde(range(max = 120))]
    pub wait_time: u32,

    #[serde(default = "default_max_retries")]
    #[garde(range(max = 10))]
    pub max_retries: u32,

    /// 1 (lowest) to 10 (highest).
    #[serde(default = "default_priority")]
    #[garde(range(min = 1, max = 10))]
    pub priority: u8,

    #[serde(default)]
    #[garde(skip)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_priority() -> u8 {
    5
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            scraper_type: ScraperType::default(),
            selectors: None,
            headers: None,
            cookies: None,
            proxy: None,
            javascript_enabled: false,
            wait_time: 0,
            max_retries: default_max_retries(),
            priority: default_priority(),
            metadata: None,
        }
    }
}

/// A single URL-scrape job. Immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapeJob {
    pub job_id: Uuid,
    pub url: String,
    pub config: ScrapeConfig,
    /// Job source this job was dispatched for. Only source dispatch sets it;
    /// request metadata never does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl ScrapeJob {
    pub fn new(url: impl Into<String>, config: ScrapeConfig) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            url: url.into(),
            config,
            source_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn for_source(url: impl Into<String>, config: ScrapeConfig, source_id: i64) -> Self {
        Self {
            source_id: Some(source_id),
            ..Self::new(url, config)
        }
    }

    pub fn kind(&self) -> Option<ScraperKind> {
        self.config
            .scraper_type
            .kind(self.config.javascript_enabled)
    }
}

/// Status record held in the result store, keyed by job id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatus {
    pub job_id: Uuid,
    pub state: JobState,
    pub result: Option<ScrapeOutput>,
    pub error: Option<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    pub fn pending(job: &ScrapeJob) -> Self {
        Self {
            job_id: job.job_id,
            state: JobState::Pending,
            result: None,
            error: None,
            attempts: 0,
            created_at: job.created_at,
            started_at: None,
            completed_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn in_progress(job: &ScrapeJob, attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            state: JobState::InProgress,
            attempts,
            started_at: Some(now),
            updated_at: now,
            ..Self::pending(job)
        }
    }

    /// Back to pending while a retry is scheduled.
    pub fn retrying(job: &ScrapeJob, attempts: u32, error: &str) -> Self {
        Self {
            attempts,
            error: Some(error.to_string()),
            ..Self::pending(job)
        }
    }

    pub fn completed(job: &ScrapeJob, attempts: u32, result: ScrapeOutput) -> Self {
        let now = Utc::now();
        Self {
            state: JobState::Completed,
            result: Some(result),
            attempts,
            completed_at: Some(now),
            updated_at: now,
            ..Self::pending(job)
        }
    }

    pub fn failed(job: &ScrapeJob, attempts: u32, error: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            state: JobState::Failed,
            error: Some(error.into()),
            attempts,
            completed_at: Some(now),
            updated_at: now,
            ..Self::pending(job)
        }
    }

    /// Cancel a status record, keeping its history.
    pub fn cancelled(mut self) -> Self {
        let now = Utc::now();
        self.state = JobState::Cancelled;
        self.completed_at = Some(now);
        self.updated_at = now;
        self
    }
}
