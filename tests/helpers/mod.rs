//! Shared harness for driving the gateway and worker pool in-process

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use scrape_dispatch::models::job::{JobStatus, ScrapeConfig, ScrapeJob};
use scrape_dispatch::models::scrape::{ScrapeOutput, ScrapeRequest};
use scrape_dispatch::services::gateway::JobGateway;
use scrape_dispatch::services::memory::{InMemoryBroker, InMemoryResultStore};
use scrape_dispatch::services::result_store::ResultStore;
use scrape_dispatch::services::retry::BackoffPolicy;
use scrape_dispatch::services::scraper::{ScrapeError, Scraper};
use scrape_dispatch::services::worker::{WorkerDeps, WorkerPool};

/// Longest any test waits for a job to reach a state.
const WAIT_LIMIT: Duration = Duration::from_secs(10);

pub fn ok_output(job: &ScrapeJob) -> ScrapeOutput {
    ScrapeOutput {
        url: job.url.clone(),
        status_code: Some(200),
        title: Some("ok".to_string()),
        html: "<html><title>ok</title></html>".to_string(),
        extracted_data: None,
    }
}

/// Fails its first `failures` calls with `error`, then succeeds with HTTP 200.
pub struct ScriptedScraper {
    failures: u32,
    error: fn() -> ScrapeError,
    calls: AtomicU32,
    seen: Mutex<Vec<String>>,
}

impl ScriptedScraper {
    pub fn failing_times(failures: u32) -> Arc<Self> {
        Self::with_error(failures, || ScrapeError::Status(503))
    }

    pub fn succeeding() -> Arc<Self> {
        Self::failing_times(0)
    }

    pub fn always_failing(error: fn() -> ScrapeError) -> Arc<Self> {
        Self::with_error(u32::MAX, error)
    }

    fn with_error(failures: u32, error: fn() -> ScrapeError) -> Arc<Self> {
        Arc::new(Self {
            failures,
            error,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// URLs in the order they were scraped.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Scraper for ScriptedScraper {
    async fn scrape(&self, job: &ScrapeJob) -> Result<ScrapeOutput, ScrapeError> {
        self.seen.lock().unwrap().push(job.url.clone());
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err((self.error)());
        }
        Ok(ok_output(job))
    }
}

/// Fails fatally for URLs containing "broken", succeeds otherwise.
pub struct UrlScriptedScraper;

#[async_trait]
impl Scraper for UrlScriptedScraper {
    async fn scrape(&self, job: &ScrapeJob) -> Result<ScrapeOutput, ScrapeError> {
        if job.url.contains("broken") {
            return Err(ScrapeError::Status(404));
        }
        Ok(ok_output(job))
    }
}

/// Never finishes. Records when a scrape starts and when its future is dropped.
#[derive(Default)]
pub struct HangingScraper {
    pub started: AtomicBool,
    pub aborted: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Scraper for HangingScraper {
    async fn scrape(&self, _job: &ScrapeJob) -> Result<ScrapeOutput, ScrapeError> {
        let _flag = DropFlag(self.aborted.clone());
        self.started.store(true, Ordering::SeqCst);
        loop {
            sleep(Duration::from_secs(3600)).await;
        }
    }
}

/// Gateway, in-memory backends and worker dependencies wired together.
pub struct Harness {
    pub gateway: JobGateway,
    pub broker: Arc<InMemoryBroker>,
    pub store: Arc<InMemoryResultStore>,
    pub deps: WorkerDeps,
    shutdown: watch::Sender<bool>,
    pool: Option<WorkerPool>,
}

impl Harness {
    pub fn new(scraper: Arc<dyn Scraper>) -> Self {
        let broker = Arc::new(InMemoryBroker::new());
        let store = Arc::new(InMemoryResultStore::default());
        let deps = WorkerDeps {
            broker: broker.clone(),
            store: store.clone(),
            scraper,
            backoff: BackoffPolicy::from_millis(1, 20),
            task_time_limit: Duration::from_secs(5),
            poll_interval: Duration::from_millis(20),
            revocation_check: Duration::from_millis(10),
            archive: None,
        };
        let (shutdown, _) = watch::channel(false);
        Self {
            gateway: JobGateway::new(broker.clone(), store.clone()),
            broker,
            store,
            deps,
            shutdown,
            pool: None,
        }
    }

    pub fn start_workers(&mut self, count: usize) {
        self.pool = Some(WorkerPool::spawn(
            count,
            self.deps.clone(),
            self.shutdown.subscribe(),
        ));
    }

    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(pool) = self.pool.take() {
            pool.join().await;
        }
    }

    pub async fn status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.store.get(job_id).await.unwrap()
    }

    /// Poll the store until `done` holds for the job's record.
    pub async fn wait_for(&self, job_id: Uuid, done: impl Fn(&JobStatus) -> bool) -> JobStatus {
        let deadline = Instant::now() + WAIT_LIMIT;
        loop {
            if let Some(status) = self.status(job_id).await {
                if done(&status) {
                    return status;
                }
            }
            assert!(Instant::now() < deadline, "job {job_id} did not reach the expected state");
            sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn wait_terminal(&self, job_id: Uuid) -> JobStatus {
        self.wait_for(job_id, |s| s.state.is_terminal()).await
    }
}

pub fn request(url: &str) -> ScrapeRequest {
    request_with(url, ScrapeConfig::default())
}

pub fn request_with(url: &str, config: ScrapeConfig) -> ScrapeRequest {
    ScrapeRequest {
        url: url.to_string(),
        config,
    }
}

/// Wait until `flag` is set, failing the test after the usual limit.
pub async fn wait_flag(flag: &AtomicBool) {
    let deadline = Instant::now() + WAIT_LIMIT;
    while !flag.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "flag was never set");
        sleep(Duration::from_millis(5)).await;
    }
}
