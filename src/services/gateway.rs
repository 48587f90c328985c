//! Job submission gateway.
//!
//! Validates submissions, writes the PENDING record, then hands the task to the
//! broker. Also answers status lookups and cancellations.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use garde::Validate;
use uuid::Uuid;

use crate::models::job::{JobStatus, ScrapeConfig, ScrapeJob};
use crate::models::scrape::{BulkScrapeRequest, RejectedUrl, ScrapeRequest};
use crate::models::source::JobSource;
use crate::services::queue::{Broker, QueueError, QueuedScrape};
use crate::services::result_store::{ResultStore, StoreError, Transition};
use crate::services::validation::{validate_config, validate_url, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(#[source] QueueError),

    #[error("Result store error: {0}")]
    Store(#[from] StoreError),
}

impl From<garde::Report> for GatewayError {
    fn from(report: garde::Report) -> Self {
        GatewayError::Validation(report.into())
    }
}

/// Outcome of a multi-URL submission.
#[derive(Debug, Default)]
pub struct BulkSubmission {
    pub job_ids: Vec<Uuid>,
    pub rejected: Vec<RejectedUrl>,
}

#[derive(Clone)]
pub struct JobGateway {
    broker: Arc<dyn Broker>,
    store: Arc<dyn ResultStore>,
}

impl JobGateway {
    pub fn new(broker: Arc<dyn Broker>, store: Arc<dyn ResultStore>) -> Self {
        Self { broker, store }
    }

    /// Validate and enqueue a single scrape.
    pub async fn submit(&self, request: ScrapeRequest) -> Result<ScrapeJob, GatewayError> {
        request.validate()?;
        validate_url(&request.url)?;
        validate_config(&request.config)?;
        self.enqueue_job(ScrapeJob::new(request.url, request.config))
            .await
    }

    /// Submit every URL with the shared configuration.
    ///
    /// The configuration is checked once up front. Each URL then succeeds or
    /// fails on its own; at most `batch_size` enqueues run at a time.
    pub async fn submit_bulk(
        &self,
        request: BulkScrapeRequest,
    ) -> Result<BulkSubmission, GatewayError> {
        request.validate()?;
        validate_config(&request.config)?;

        let config = request.config;
        let outcomes: Vec<(String, Result<ScrapeJob, GatewayError>)> =
            stream::iter(request.urls)
                .map(|url| {
                    let config = config.clone();
                    async move {
                        let outcome = match validate_url(&url) {
                            Ok(_) => self.enqueue_job(ScrapeJob::new(url.clone(), config)).await,
                            Err(e) => Err(e.into()),
                        };
                        (url, outcome)
                    }
                })
                .buffered(request.batch_size)
                .collect()
                .await;

        let mut submission = BulkSubmission::default();
        for (url, outcome) in outcomes {
            match outcome {
                Ok(job) => submission.job_ids.push(job.job_id),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Bulk entry rejected");
                    submission.rejected.push(RejectedUrl {
                        url,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            submitted = submission.job_ids.len(),
            rejected = submission.rejected.len(),
            "Bulk submission processed"
        );
        Ok(submission)
    }

    /// Create one job per enabled source that has a URL, tagged with its id.
    pub async fn dispatch_sources(
        &self,
        sources: &[JobSource],
        base: &ScrapeConfig,
    ) -> Result<BulkSubmission, GatewayError> {
        validate_config(base)?;

        let mut submission = BulkSubmission::default();
        for source in sources.iter().filter(|s| s.enabled_for_scrapping) {
            let Some(url) = source.source_url.clone() else {
                tracing::debug!(source_id = source.id, "Source has no URL, skipping");
                continue;
            };

            let mut config = base.clone();
            if let Some(scrape_type) = source.scrape_type {
                config.scraper_type = scrape_type;
            }
            let metadata = config.metadata.get_or_insert_with(Default::default);
            metadata.insert("source_id".to_string(), source.id.into());
            metadata.insert("source_name".to_string(), source.source_name.clone().into());

            let outcome = match validate_url(&url) {
                Ok(_) => {
                    self.enqueue_job(ScrapeJob::for_source(url.clone(), config, source.id))
                        .await
                }
                Err(e) => Err(e.into()),
            };
            match outcome {
                Ok(job) => submission.job_ids.push(job.job_id),
                Err(e) => {
                    tracing::warn!(source_id = source.id, url = %url, error = %e, "Source dispatch failed");
                    submission.rejected.push(RejectedUrl {
                        url,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            dispatched = submission.job_ids.len(),
            rejected = submission.rejected.len(),
            "Job sources dispatched"
        );
        Ok(submission)
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<JobStatus, GatewayError> {
        self.store
            .get(job_id)
            .await?
            .ok_or(GatewayError::NotFound(job_id))
    }

    /// Cancel a job. Returns `false` when it had already finished.
    pub async fn cancel(&self, job_id: Uuid) -> Result<bool, GatewayError> {
        let current = self.get_status(job_id).await?;
        if current.state.is_terminal() {
            return Ok(false);
        }

        match self.store.transition(&current.cancelled()).await? {
            Transition::Applied => {}
            Transition::Rejected(state) => {
                tracing::debug!(job_id = %job_id, state = %state, "Job finished before cancellation");
                return Ok(false);
            }
            Transition::Missing => return Err(GatewayError::NotFound(job_id)),
        }

        // Not fatal: the CANCELLED record already blocks later terminal writes.
        if let Err(e) = self.broker.revoke(job_id).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to revoke cancelled job");
        }

        metrics::counter!("scrape_jobs_cancelled_total").increment(1);
        tracing::info!(job_id = %job_id, "Job cancelled");
        Ok(true)
    }

    async fn enqueue_job(&self, job: ScrapeJob) -> Result<ScrapeJob, GatewayError> {
        self.store.put(&JobStatus::pending(&job)).await?;

        if let Err(e) = self.broker.enqueue(&QueuedScrape::new(job.clone())).await {
            tracing::error!(job_id = %job.job_id, error = %e, "Enqueue failed, rolling back");
            if let Err(rollback) = self.store.remove(job.job_id).await {
                tracing::error!(job_id = %job.job_id, error = %rollback, "Failed to remove orphaned record");
            }
            return Err(GatewayError::BrokerUnavailable(e));
        }

        metrics::counter!("scrape_jobs_submitted_total").increment(1);
        tracing::info!(
            job_id = %job.job_id,
            url = %job.url,
            scraper_type = %job.config.scraper_type,
            priority = job.config.priority,
            "Scrape job submitted"
        );
        Ok(job)
    }
}
