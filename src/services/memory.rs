//! In-process broker and result store.
//!
//! Selected with `SCRAPER_BROKER_URL=memory://`, where the API process runs
//! its own workers. Nothing survives a restart.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

use crate::models::job::JobStatus;
use crate::services::queue::{Broker, QueueError, QueuedScrape, MAX_PRIORITY, REVOCATION_TTL};
use crate::services::result_store::{ResultStore, StoreError, Transition};

struct ReadyEntry {
    band: u8,
    seq: u64,
    task: QueuedScrape,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        (self.band, self.seq) == (other.band, other.seq)
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.band, self.seq).cmp(&(other.band, other.seq))
    }
}

#[derive(Default)]
struct BrokerInner {
    ready: BinaryHeap<Reverse<ReadyEntry>>,
    delayed: Vec<(Instant, QueuedScrape)>,
    in_flight: HashMap<Uuid, QueuedScrape>,
    /// Revoked job ids and when the marker lapses.
    revoked: HashMap<Uuid, Instant>,
    seq: u64,
}

impl BrokerInner {
    fn push_ready(&mut self, task: QueuedScrape) {
        self.seq += 1;
        let band = MAX_PRIORITY.saturating_sub(task.priority().min(MAX_PRIORITY));
        self.ready.push(Reverse(ReadyEntry {
            band,
            seq: self.seq,
            task,
        }));
    }

    fn promote_due(&mut self, now: Instant) {
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.delayed)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        self.delayed = waiting;
        for (_, task) in due {
            self.push_ready(task);
        }
    }

    fn claim(&mut self) -> Option<QueuedScrape> {
        let Reverse(entry) = self.ready.pop()?;
        self.in_flight.insert(entry.task.job_id(), entry.task.clone());
        Some(entry.task)
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.iter().map(|(at, _)| *at).min()
    }
}

/// Priority queue with delayed delivery, guarded by a mutex.
#[derive(Default)]
pub struct InMemoryBroker {
    inner: Mutex<BrokerInner>,
    notify: Notify,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, BrokerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Tasks claimed but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.inner().in_flight.len()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn enqueue(&self, task: &QueuedScrape) -> Result<(), QueueError> {
        self.inner().push_ready(task.clone());
        self.notify.notify_waiters();
        Ok(())
    }

    async fn schedule(&self, task: &QueuedScrape, delay: Duration) -> Result<(), QueueError> {
        self.inner()
            .delayed
            .push((Instant::now() + delay, task.clone()));
        // Waiters recompute their wake-up time against the new due date.
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<QueuedScrape>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            let next_due = {
                let mut inner = self.inner();
                inner.promote_due(Instant::now());
                if let Some(task) = inner.claim() {
                    return Ok(Some(task));
                }
                inner.next_due()
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }
            let wake_at = next_due.map_or(deadline, |due| due.min(deadline));
            tokio::select! {
                _ = notified => {}
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, task: &QueuedScrape) -> Result<(), QueueError> {
        self.inner().in_flight.remove(&task.job_id());
        Ok(())
    }

    async fn nack(&self, task: &QueuedScrape, delay: Duration) -> Result<(), QueueError> {
        {
            let mut inner = self.inner();
            inner.in_flight.remove(&task.job_id());
            inner.delayed.push((Instant::now() + delay, task.clone()));
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn revoke(&self, job_id: Uuid) -> Result<(), QueueError> {
        let now = Instant::now();
        let mut inner = self.inner();
        inner.revoked.retain(|_, expires_at| *expires_at > now);
        inner.revoked.insert(job_id, now + REVOCATION_TTL);
        Ok(())
    }

    async fn is_revoked(&self, job_id: Uuid) -> Result<bool, QueueError> {
        let now = Instant::now();
        Ok(self
            .inner()
            .revoked
            .get(&job_id)
            .is_some_and(|expires_at| *expires_at > now))
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let inner = self.inner();
        Ok((inner.ready.len() + inner.delayed.len()) as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

/// Result lifetime used by [`InMemoryResultStore::default`].
const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(24 * 3600);

struct StoredStatus {
    status: JobStatus,
    expires_at: Instant,
}

impl StoredStatus {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Status records in a map behind a read-write lock. Every write restarts
/// the record's lifetime; expired records are invisible and pruned on writes.
pub struct InMemoryResultStore {
    records: RwLock<HashMap<Uuid, StoredStatus>>,
    ttl: Duration,
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new(DEFAULT_RESULT_TTL)
    }
}

impl InMemoryResultStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn records(&self) -> RwLockReadGuard<'_, HashMap<Uuid, StoredStatus>> {
        self.records.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write access with expired records already dropped.
    fn records_mut(&self, now: Instant) -> RwLockWriteGuard<'_, HashMap<Uuid, StoredStatus>> {
        let mut records = self.records.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        records.retain(|_, stored| stored.is_live(now));
        records
    }

    fn stored(&self, status: &JobStatus, now: Instant) -> StoredStatus {
        StoredStatus {
            status: status.clone(),
            expires_at: now + self.ttl,
        }
    }

    /// Live records.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.records().values().filter(|stored| stored.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn put(&self, status: &JobStatus) -> Result<(), StoreError> {
        let now = Instant::now();
        let stored = self.stored(status, now);
        self.records_mut(now).insert(status.job_id, stored);
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobStatus>, StoreError> {
        let now = Instant::now();
        Ok(self
            .records()
            .get(&job_id)
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.status.clone()))
    }

    async fn transition(&self, status: &JobStatus) -> Result<Transition, StoreError> {
        let now = Instant::now();
        let stored = self.stored(status, now);
        let mut records = self.records_mut(now);
        match records.get_mut(&status.job_id) {
            None => Ok(Transition::Missing),
            Some(current) if !current.status.state.can_transition_to(status.state) => {
                Ok(Transition::Rejected(current.status.state))
            }
            Some(current) => {
                *current = stored;
                Ok(Transition::Applied)
            }
        }
    }

    async fn remove(&self, job_id: Uuid) -> Result<(), StoreError> {
        self.records_mut(Instant::now()).remove(&job_id);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use crate::models::job::{JobState, ScrapeConfig, ScrapeJob};

    fn task_with_priority(priority: u8) -> QueuedScrape {
        QueuedScrape::new(ScrapeJob::new(
            "http://example.com",
            ScrapeConfig {
                priority,
                ..ScrapeConfig::default()
            },
        ))
    }

    #[tokio::test]
    async fn test_dequeue_prefers_higher_priority() {
        let broker = InMemoryBroker::new();
        let low = task_with_priority(2);
        let high = task_with_priority(9);
        broker.enqueue(&low).await.unwrap();
        broker.enqueue(&high).await.unwrap();

        let first = broker.dequeue(Duration::ZERO).await.unwrap().unwrap();
        let second = broker.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.job_id(), high.job_id());
        assert_eq!(second.job_id(), low.job_id());
        assert!(broker.dequeue(Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_each_task_claimed_once() {
        let broker = std::sync::Arc::new(InMemoryBroker::new());
        for _ in 0..20 {
            broker.enqueue(&task_with_priority(5)).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(task) = broker.dequeue(Duration::ZERO).await.unwrap() {
                    claimed.push(task.job_id());
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 20);
        assert_eq!(unique.len(), 20);
        assert_eq!(broker.in_flight(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_task_waits_for_delay() {
        let broker = InMemoryBroker::new();
        let task = task_with_priority(5);
        broker.schedule(&task, Duration::from_secs(4)).await.unwrap();

        assert!(broker.dequeue(Duration::from_secs(1)).await.unwrap().is_none());
        assert_eq!(broker.depth().await.unwrap(), 1);

        let claimed = broker.dequeue(Duration::from_secs(10)).await.unwrap();
        assert_eq!(claimed.unwrap().job_id(), task.job_id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_dequeue_wakes_on_enqueue() {
        let broker = std::sync::Arc::new(InMemoryBroker::new());
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.dequeue(Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;

        let task = task_with_priority(5);
        broker.enqueue(&task).await.unwrap();
        let claimed = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(claimed.job_id(), task.job_id());
    }

    #[tokio::test]
    async fn test_ack_clears_in_flight() {
        let broker = InMemoryBroker::new();
        broker.enqueue(&task_with_priority(5)).await.unwrap();
        let task = broker.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(broker.in_flight(), 1);
        broker.ack(&task).await.unwrap();
        assert_eq!(broker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_store_refuses_to_leave_terminal_state() {
        let store = InMemoryResultStore::default();
        let job = ScrapeJob::new("http://example.com", ScrapeConfig::default());
        store.put(&JobStatus::pending(&job)).await.unwrap();

        let cancelled = JobStatus::pending(&job).cancelled();
        assert_eq!(store.transition(&cancelled).await.unwrap(), Transition::Applied);

        let failed = JobStatus::failed(&job, 1, "late failure");
        assert_eq!(
            store.transition(&failed).await.unwrap(),
            Transition::Rejected(JobState::Cancelled)
        );
        let stored = store.get(job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn test_store_transition_on_unknown_job() {
        let store = InMemoryResultStore::default();
        let job = ScrapeJob::new("http://example.com", ScrapeConfig::default());
        let outcome = store.transition(&JobStatus::in_progress(&job, 1)).await.unwrap();
        assert_eq!(outcome, Transition::Missing);
        assert!(store.get(job.job_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nack_redelivers_after_delay() {
        let broker = InMemoryBroker::new();
        let task = task_with_priority(5);
        broker.enqueue(&task).await.unwrap();
        let claimed = broker.dequeue(Duration::ZERO).await.unwrap().unwrap();

        broker.nack(&claimed, Duration::from_millis(20)).await.unwrap();
        assert_eq!(broker.in_flight(), 0);
        assert_eq!(broker.depth().await.unwrap(), 1);

        let again = broker.dequeue(Duration::from_secs(2)).await.unwrap().unwrap();
        assert_eq!(again.job_id(), task.job_id());
        assert_eq!(again.attempt(), claimed.attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn test_revocation_marker_lapses() {
        let broker = InMemoryBroker::new();
        let task = task_with_priority(5);
        broker.revoke(task.job_id()).await.unwrap();
        assert!(broker.is_revoked(task.job_id()).await.unwrap());

        tokio::time::advance(REVOCATION_TTL + Duration::from_secs(1)).await;
        assert!(!broker.is_revoked(task.job_id()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_records_expire_after_ttl() {
        let store = InMemoryResultStore::new(Duration::from_secs(60));
        let job = ScrapeJob::new("http://example.com", ScrapeConfig::default());
        store.put(&JobStatus::pending(&job)).await.unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        // A write restarts the lifetime.
        let running = JobStatus::in_progress(&job, 1);
        assert!(store.transition(&running).await.unwrap().is_applied());

        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(store.get(job.job_id).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(store.get(job.job_id).await.unwrap().is_none());
        assert!(store.is_empty());
        assert_eq!(
            store.transition(&JobStatus::failed(&job, 1, "late")).await.unwrap(),
            Transition::Missing
        );
    }
}
