//! Worker loop: claim a task, run its scrape, record the outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use crate::db::queries;
use crate::models::job::{JobStatus, ScrapeJob};
use crate::models::scrape::ScrapeOutput;
use crate::models::source::RawScrapeStatus;
use crate::services::queue::{Broker, QueueError, QueuedScrape};
use crate::services::result_store::{ResultStore, StoreError, Transition};
use crate::services::retry::BackoffPolicy;
use crate::services::scraper::{ScrapeError, Scraper};

/// Everything a worker needs, built once at startup.
#[derive(Clone)]
pub struct WorkerDeps {
    pub broker: Arc<dyn Broker>,
    pub store: Arc<dyn ResultStore>,
    pub scraper: Arc<dyn Scraper>,
    pub backoff: BackoffPolicy,
    /// Hard deadline for one attempt.
    pub task_time_limit: Duration,
    /// Longest a single dequeue waits for work.
    pub poll_interval: Duration,
    pub revocation_check: Duration,
    /// Raw scrape archive for source-tagged jobs.
    pub archive: Option<PgPool>,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Broker error: {0}")]
    Queue(#[from] QueueError),

    #[error("Result store error: {0}")]
    Store(#[from] StoreError),
}

enum Outcome {
    Succeeded(ScrapeOutput),
    Failed(ScrapeError),
    Revoked,
}

pub struct Worker {
    id: usize,
    deps: WorkerDeps,
}

impl Worker {
    pub fn new(id: usize, deps: WorkerDeps) -> Self {
        Self { id, deps }
    }

    /// Process the next task from the broker.
    /// Returns Ok(true) if a task was handled, Ok(false) if none arrived in time.
    ///
    /// A task whose handling fails is handed back to the broker and delivered
    /// again after a backoff delay.
    pub async fn process_next(&self) -> Result<bool, WorkerError> {
        let Some(task) = self.deps.broker.dequeue(self.deps.poll_interval).await? else {
            return Ok(false);
        };

        if let Err(e) = self.handle(&task).await {
            let delay = self.deps.backoff.delay_for_attempt(task.attempt());
            tracing::warn!(
                job_id = %task.job_id(),
                error = %e,
                delay_ms = delay.as_millis() as u64,
                "Task handling failed, returning it to the broker"
            );
            if let Err(nack_error) = self.deps.broker.nack(&task, delay).await {
                tracing::error!(
                    job_id = %task.job_id(),
                    error = %nack_error,
                    "Could not return task; it is redelivered once its claim expires"
                );
            }
            return Err(e);
        }

        self.deps.broker.ack(&task).await?;
        Ok(true)
    }

    /// Run until `shutdown` flips to true. The current task always finishes first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker = self.id, "Worker started");
        while !*shutdown.borrow_and_update() {
            match self.process_next().await {
                Ok(true) => tracing::debug!(worker = self.id, "Task handled"),
                Ok(false) => tracing::trace!(worker = self.id, "No tasks available"),
                Err(e) => {
                    tracing::error!(worker = self.id, error = %e, "Error processing task, backing off");
                    tokio::select! {
                        _ = sleep(self.deps.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        tracing::info!(worker = self.id, "Worker stopped");
    }

    async fn handle(&self, task: &QueuedScrape) -> Result<(), WorkerError> {
        let job = &task.job;
        let attempt = task.attempt();

        if self.deps.broker.is_revoked(job.job_id).await? {
            tracing::info!(job_id = %job.job_id, "Skipping revoked job");
            return Ok(());
        }
        match self.deps.store.get(job.job_id).await? {
            Some(status) if status.state.is_terminal() => {
                tracing::info!(job_id = %job.job_id, state = %status.state, "Skipping finished job");
                return Ok(());
            }
            Some(_) => {}
            None => {
                tracing::warn!(job_id = %job.job_id, "No status record for task, dropping it");
                return Ok(());
            }
        }

        match self
            .deps
            .store
            .transition(&JobStatus::in_progress(job, attempt))
            .await
        {
            Ok(Transition::Applied) => {}
            Ok(Transition::Rejected(state)) => {
                tracing::info!(job_id = %job.job_id, state = %state, "Job finished before start");
                return Ok(());
            }
            Ok(Transition::Missing) => return Ok(()),
            Err(e) => {
                tracing::warn!(job_id = %job.job_id, error = %e, "Could not mark job in progress");
            }
        }

        tracing::info!(
            worker = self.id,
            job_id = %job.job_id,
            url = %job.url,
            attempt,
            max_retries = job.config.max_retries,
            "Processing scrape job"
        );

        let started = Instant::now();
        let outcome = self.execute(job).await;
        metrics::histogram!("scrape_duration_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            Outcome::Succeeded(output) => self.complete(job, attempt, output).await,
            Outcome::Failed(error) => self.fail(task, error).await,
            Outcome::Revoked => {
                tracing::info!(job_id = %job.job_id, attempt, "Job revoked mid-flight, aborted");
                Ok(())
            }
        }
    }

    /// Run the scrape under the time limit, racing it against revocation.
    async fn execute(&self, job: &ScrapeJob) -> Outcome {
        let limit = self.deps.task_time_limit;
        tokio::select! {
            result = timeout(limit, self.deps.scraper.scrape(job)) => match result {
                Ok(Ok(output)) => Outcome::Succeeded(output),
                Ok(Err(e)) => Outcome::Failed(e),
                Err(_) => Outcome::Failed(ScrapeError::Timeout(limit)),
            },
            _ = self.watch_revocation(job.job_id) => Outcome::Revoked,
        }
    }

    /// Resolves once the job is revoked or its record turns terminal, so a
    /// cancel whose revoke never reached the broker still stops the scrape.
    async fn watch_revocation(&self, job_id: Uuid) {
        loop {
            sleep(self.deps.revocation_check).await;
            match self.deps.broker.is_revoked(job_id).await {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => tracing::debug!(job_id = %job_id, error = %e, "Revocation check failed"),
            }
            match self.deps.store.get(job_id).await {
                Ok(Some(status)) if status.state.is_terminal() => return,
                Ok(_) => {}
                Err(e) => tracing::debug!(job_id = %job_id, error = %e, "Status check failed"),
            }
        }
    }

    async fn complete(
        &self,
        job: &ScrapeJob,
        attempt: u32,
        output: ScrapeOutput,
    ) -> Result<(), WorkerError> {
        let html = output.html.clone();
        let status_code = output.status_code;
        match self
            .deps
            .store
            .transition(&JobStatus::completed(job, attempt, output))
            .await?
        {
            Transition::Applied => {
                metrics::counter!("scrape_jobs_completed_total").increment(1);
                tracing::info!(
                    job_id = %job.job_id,
                    attempt,
                    status_code = ?status_code,
                    "Scrape job completed"
                );
                self.archive(job, Some(&html), None, RawScrapeStatus::Success)
                    .await;
            }
            Transition::Rejected(state) => {
                tracing::info!(job_id = %job.job_id, state = %state, "Discarding result of finished job");
            }
            Transition::Missing => {
                tracing::warn!(job_id = %job.job_id, "Status record vanished before completion");
            }
        }
        Ok(())
    }

    async fn fail(&self, task: &QueuedScrape, error: ScrapeError) -> Result<(), WorkerError> {
        let job = &task.job;
        let attempt = task.attempt();
        let message = error.to_string();

        if error.is_transient() && BackoffPolicy::should_retry(task.retries, job.config.max_retries) {
            let delay = self.deps.backoff.delay_for_attempt(attempt);
            let retrying = JobStatus::retrying(job, attempt, &message);
            if !self.deps.store.transition(&retrying).await?.is_applied() {
                tracing::info!(job_id = %job.job_id, "Job finished during attempt, not retrying");
                return Ok(());
            }

            match self.deps.broker.schedule(&task.retry(), delay).await {
                Ok(()) => {
                    metrics::counter!("scrape_jobs_retried_total").increment(1);
                    tracing::warn!(
                        job_id = %job.job_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Scrape attempt failed, retry scheduled"
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(job_id = %job.job_id, error = %e, "Could not schedule retry");
                    return self
                        .mark_failed(job, attempt, format!("{message} (retry not scheduled: {e})"))
                        .await;
                }
            }
        }

        tracing::warn!(
            job_id = %job.job_id,
            attempt,
            transient = error.is_transient(),
            error = %message,
            "Scrape job failed"
        );
        self.mark_failed(job, attempt, message).await
    }

    async fn mark_failed(
        &self,
        job: &ScrapeJob,
        attempt: u32,
        message: String,
    ) -> Result<(), WorkerError> {
        let status = JobStatus::failed(job, attempt, message.clone());
        if self.deps.store.transition(&status).await?.is_applied() {
            metrics::counter!("scrape_jobs_failed_total").increment(1);
            self.archive(job, None, Some(&message), RawScrapeStatus::Error)
                .await;
        }
        Ok(())
    }

    /// Best-effort archive write for jobs dispatched from a job source.
    async fn archive(
        &self,
        job: &ScrapeJob,
        raw_content: Option<&str>,
        error: Option<&str>,
        status: RawScrapeStatus,
    ) {
        let (Some(pool), Some(source_id)) = (&self.deps.archive, job.source_id) else {
            return;
        };
        if let Err(e) =
            queries::record_raw_scrape(pool, source_id, Some(job.job_id), &job.url, raw_content, error, status)
                .await
        {
            tracing::warn!(job_id = %job.job_id, source_id, error = %e, "Failed to archive raw scrape");
        }
    }
}

/// A fixed set of workers sharing one set of dependencies.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(concurrency: usize, deps: WorkerDeps, shutdown: watch::Receiver<bool>) -> Self {
        let handles = (0..concurrency.max(1))
            .map(|id| tokio::spawn(Worker::new(id, deps.clone()).run(shutdown.clone())))
            .collect();
        tracing::info!(concurrency, "Worker pool started");
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to finish its current task and exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
    }
}
