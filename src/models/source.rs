use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::job::{ScrapeConfig, ScraperType};
use crate::services::validation::validate_url;

/// A configured job board the dispatcher can create scrape jobs for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSource {
    pub id: i64,
    pub source_name: String,
    pub source_url: Option<String>,
    pub enabled_for_scrapping: bool,
    pub scrape_type: Option<ScraperType>,
    pub scraping_schedule: Option<ScrapingSchedule>,
    pub created_at: DateTime<Utc>,
}

/// POST /api/job-sources body. Names are unique across sources.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewJobSource {
    #[garde(length(min = 1, max = 255))]
    pub source_name: String,

    #[serde(default)]
    #[garde(length(max = 2000), custom(optional_http_url))]
    pub source_url: Option<String>,

    #[serde(default = "default_enabled")]
    #[garde(skip)]
    pub enabled_for_scrapping: bool,

    #[serde(default)]
    #[garde(skip)]
    pub scrape_type: Option<ScraperType>,

    #[serde(default)]
    #[garde(skip)]
    pub scraping_schedule: Option<ScrapingSchedule>,
}

fn default_enabled() -> bool {
    true
}

fn optional_http_url(value: &Option<String>, _ctx: &()) -> garde::Result {
    match value {
        Some(url) => validate_url(url)
            .map(|_| ())
            .map_err(|e| garde::Error::new(e.to_string())),
        None => Ok(()),
    }
}

/// An archived scrape outcome, as stored by workers or posted by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawScrape {
    pub id: i64,
    pub source_id: i64,
    /// Set for rows written by workers; absent for posted rows.
    pub job_id: Option<Uuid>,
    pub job_url: String,
    pub status_code: i64,
    /// `None` when the stored code is not a known status.
    pub status: Option<RawScrapeStatus>,
    pub raw_content: Option<String>,
    pub error: Option<String>,
    pub logged_in_time: DateTime<Utc>,
}

/// POST /api/raw-scrapes body.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewRawScrape {
    #[garde(range(min = 1))]
    pub source_id: i64,

    #[garde(length(min = 5, max = 2000))]
    pub job_url: String,

    #[serde(default)]
    #[garde(skip)]
    pub raw_content: Option<String>,

    #[serde(default)]
    #[garde(skip)]
    pub status: RawScrapeStatus,

    #[serde(default)]
    #[garde(length(max = 5000))]
    pub error: Option<String>,
}

/// GET /api/raw-scrapes/latest query.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RawScrapeQuery {
    #[garde(length(min = 5))]
    pub job_url: String,

    #[serde(default = "default_only_successful")]
    #[garde(skip)]
    pub only_successful: bool,
}

fn default_only_successful() -> bool {
    true
}

/// GET /api/job-sources query.
#[derive(Debug, Default, Deserialize)]
pub struct SourceListQuery {
    #[serde(default)]
    pub include_disabled: bool,
}

/// POST /api/job-sources/dispatch body.
///
/// Without `source_ids` every enabled source is dispatched. The remaining
/// fields are the scrape configuration shared by all created jobs.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSourcesRequest {
    #[serde(default)]
    pub source_ids: Option<Vec<i64>>,

    #[serde(flatten)]
    pub config: ScrapeConfig,
}

/// How often a source should be scraped. Stored as its numeric code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScrapingSchedule {
    Daily,
    Weekly,
    Monthly,
}

impl ScrapingSchedule {
    pub fn code(self) -> i64 {
        match self {
            Self::Daily => 1000,
            Self::Weekly => 1001,
            Self::Monthly => 1002,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1000 => Some(Self::Daily),
            1001 => Some(Self::Weekly),
            1002 => Some(Self::Monthly),
            _ => None,
        }
    }
}

/// Outcome code stored with archived raw scrapes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RawScrapeStatus {
    #[default]
    Success,
    Error,
}

impl RawScrapeStatus {
    pub fn code(self) -> i64 {
        match self {
            RawScrapeStatus::Success => 1000,
            RawScrapeStatus::Error => 1001,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1000 => Some(Self::Success),
            1001 => Some(Self::Error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_codes() {
        assert_eq!(ScrapingSchedule::from_code(1000), Some(ScrapingSchedule::Daily));
        assert_eq!(ScrapingSchedule::from_code(1002), Some(ScrapingSchedule::Monthly));
        assert_eq!(ScrapingSchedule::from_code(7), None);
    }

    #[test]
    fn test_dispatch_request_defaults() {
        let request: DispatchSourcesRequest =
            serde_json::from_value(serde_json::json!({ "priority": 8 })).unwrap();
        assert!(request.source_ids.is_none());
        assert_eq!(request.config.priority, 8);
        assert_eq!(request.config.max_retries, 3);
    }

    #[test]
    fn test_raw_scrape_status_codes() {
        assert_eq!(RawScrapeStatus::Success.code(), 1000);
        assert_eq!(RawScrapeStatus::Error.code(), 1001);
        assert_eq!(RawScrapeStatus::from_code(1001), Some(RawScrapeStatus::Error));
        assert_eq!(RawScrapeStatus::from_code(5), None);
    }

    #[test]
    fn test_schedule_code_round_trip() {
        for schedule in [ScrapingSchedule::Daily, ScrapingSchedule::Weekly, ScrapingSchedule::Monthly] {
            assert_eq!(ScrapingSchedule::from_code(schedule.code()), Some(schedule));
        }
    }

    #[test]
    fn test_new_source_defaults_and_validation() {
        let source: NewJobSource = serde_json::from_value(serde_json::json!({
            "source_name": "acme",
            "source_url": "https://acme.example.com/careers",
            "scrape_type": "selenium",
            "scraping_schedule": "weekly"
        }))
        .unwrap();
        assert!(source.enabled_for_scrapping);
        assert_eq!(source.scraping_schedule, Some(ScrapingSchedule::Weekly));
        assert!(source.validate().is_ok());

        let unnamed = NewJobSource {
            source_name: String::new(),
            ..source.clone()
        };
        assert!(unnamed.validate().is_err());

        let bad_url = NewJobSource {
            source_url: Some("ftp://acme.example.com".to_string()),
            ..source.clone()
        };
        assert!(bad_url.validate().is_err());

        let no_url = NewJobSource {
            source_url: None,
            ..source
        };
        assert!(no_url.validate().is_ok());
    }

    #[test]
    fn test_new_raw_scrape_validation() {
        let scrape: NewRawScrape = serde_json::from_value(serde_json::json!({
            "source_id": 3,
            "job_url": "https://acme.example.com/jobs/1"
        }))
        .unwrap();
        assert_eq!(scrape.status, RawScrapeStatus::Success);
        assert!(scrape.validate().is_ok());

        let orphan = NewRawScrape {
            source_id: 0,
            ..scrape.clone()
        };
        assert!(orphan.validate().is_err());

        let short = NewRawScrape {
            job_url: "a/b".to_string(),
            ..scrape
        };
        assert!(short.validate().is_err());
    }

    #[test]
    fn test_latest_query_defaults_to_successful() {
        let query: RawScrapeQuery =
            serde_json::from_value(serde_json::json!({ "job_url": "https://acme.example.com" })).unwrap();
        assert!(query.only_successful);
        assert!(query.validate().is_ok());
    }
}
