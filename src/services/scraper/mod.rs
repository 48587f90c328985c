//! Scraper strategies.
//!
//! Every strategy implements [`Scraper`]. [`ScraperSet`] owns one instance of
//! each and routes a job to the strategy its [`ScraperKind`] names.

pub mod browser;
pub mod extract;
pub mod static_fetch;

use std::time::Duration;

use async_trait::async_trait;

use crate::models::job::{ScrapeJob, ScraperKind, ScraperType};
use crate::models::scrape::ScrapeOutput;

pub use browser::BrowserScraper;
pub use static_fetch::StaticScraper;

/// Fetch a job's URL and extract its configured selectors.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape(&self, job: &ScrapeJob) -> Result<ScrapeOutput, ScrapeError>;
}

/// Settings shared by every strategy.
#[derive(Debug, Clone)]
pub struct ScraperSettings {
    pub user_agent: String,
    pub request_timeout: Duration,
}

/// Routes jobs to the static or browser strategy.
pub struct ScraperSet {
    static_fetch: StaticScraper,
    browser: BrowserScraper,
}

impl ScraperSet {
    pub fn new(settings: &ScraperSettings) -> Result<Self, ScrapeError> {
        Ok(Self {
            static_fetch: StaticScraper::new(settings)?,
            browser: BrowserScraper::new(settings),
        })
    }

    pub fn strategy(&self, kind: ScraperKind) -> &dyn Scraper {
        match kind {
            ScraperKind::Static => &self.static_fetch,
            ScraperKind::Browser => &self.browser,
        }
    }
}

#[async_trait]
impl Scraper for ScraperSet {
    async fn scrape(&self, job: &ScrapeJob) -> Result<ScrapeOutput, ScrapeError> {
        let kind = job
            .kind()
            .ok_or(ScrapeError::Unsupported(job.config.scraper_type))?;
        tracing::debug!(job_id = %job.job_id, kind = %kind, "Dispatching scrape");
        self.strategy(kind).scrape(job).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned HTTP {0}")]
    Status(u16),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Browser automation failed: {0}")]
    Browser(String),

    #[error("Invalid selector for '{key}': {message}")]
    InvalidSelector { key: String, message: String },

    #[error("Invalid proxy '{0}'")]
    InvalidProxy(String),

    #[error("Invalid header '{0}'")]
    InvalidHeader(String),

    #[error("Unsupported scraper type: {0}")]
    Unsupported(ScraperType),
}

impl ScrapeError {
    /// Transient failures are retried; everything else fails the job at once.
    pub fn is_transient(&self) -> bool {
        match self {
            ScrapeError::Http(e) => !e.is_builder() && !e.is_redirect(),
            ScrapeError::Status(code) => *code == 408 || *code == 429 || *code >= 500,
            ScrapeError::Timeout(_) | ScrapeError::Browser(_) => true,
            ScrapeError::InvalidSelector { .. }
            | ScrapeError::InvalidProxy(_)
            | ScrapeError::InvalidHeader(_)
            | ScrapeError::Unsupported(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::ScrapeConfig;

    #[test]
    fn test_transient_classification() {
        assert!(ScrapeError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(ScrapeError::Status(503).is_transient());
        assert!(ScrapeError::Status(429).is_transient());
        assert!(ScrapeError::Browser("crashed".into()).is_transient());

        assert!(!ScrapeError::Status(404).is_transient());
        assert!(!ScrapeError::Unsupported(ScraperType::Scrapy).is_transient());
        assert!(!ScrapeError::InvalidSelector {
            key: "title".into(),
            message: "bad".into()
        }
        .is_transient());
    }

    #[tokio::test]
    async fn test_unsupported_type_is_rejected_before_fetch() {
        let set = ScraperSet::new(&ScraperSettings {
            user_agent: "test".into(),
            request_timeout: Duration::from_secs(1),
        })
        .unwrap();
        let job = ScrapeJob::new(
            "http://127.0.0.1:9/unreachable",
            ScrapeConfig {
                scraper_type: ScraperType::Scrapy,
                ..ScrapeConfig::default()
            },
        );

        let err = set.scrape(&job).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Unsupported(ScraperType::Scrapy)));
        assert!(!err.is_transient());
    }
}
