use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::models::job::ScrapeJob;

const READY_KEY: &str = "scrape_dispatch:ready";
const DELAYED_KEY: &str = "scrape_dispatch:delayed";
const PROCESSING_KEY: &str = "scrape_dispatch:processing";
const CLAIMED_KEY: &str = "scrape_dispatch:claimed";
const REVOKED_PREFIX: &str = "scrape_dispatch:revoked:";

/// Revocation markers outlive any job that could still be queued.
pub const REVOCATION_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Claims older than this are handed out again. Override with
/// [`RedisBroker::with_visibility_timeout`].
const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(360);

/// Pause between empty polls while a dequeue is waiting.
const DEQUEUE_POLL_STEP: Duration = Duration::from_millis(200);

/// Highest accepted job priority; scores are ordered so it pops first.
pub const MAX_PRIORITY: u8 = 10;

/// Return stale claims to the ready set, promote due delayed tasks, then
/// atomically claim the best ready task.
///
/// KEYS: ready, delayed, processing, claimed.
/// ARGV: now (ms), stale-claim cutoff (ms).
const DEQUEUE_SCRIPT: &str = r#"
local stale = redis.call('ZRANGEBYSCORE', KEYS[4], '-inf', ARGV[2], 'LIMIT', 0, 100)
for _, job_id in ipairs(stale) do
    redis.call('ZREM', KEYS[4], job_id)
    local claim = redis.call('HGET', KEYS[3], job_id)
    redis.call('HDEL', KEYS[3], job_id)
    if claim then
        local envelope = cjson.decode(claim)
        redis.call('ZADD', KEYS[1], envelope['score'], envelope['payload'])
    end
end
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1], 'LIMIT', 0, 100)
for _, entry in ipairs(due) do
    redis.call('ZREM', KEYS[2], entry)
    local envelope = cjson.decode(entry)
    redis.call('ZADD', KEYS[1], envelope['score'], envelope['payload'])
end
local popped = redis.call('ZPOPMIN', KEYS[1])
if #popped == 0 then
    return false
end
local payload = popped[1]
local job_id = cjson.decode(payload)['job']['job_id']
redis.call('HSET', KEYS[3], job_id, cjson.encode({score = popped[2], payload = payload}))
redis.call('ZADD', KEYS[4], ARGV[1], job_id)
return payload
"#;

/// Task payload serialized into the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedScrape {
    pub job: ScrapeJob,
    /// Retries already scheduled for this job.
    pub retries: u32,
}

impl QueuedScrape {
    pub fn new(job: ScrapeJob) -> Self {
        Self { job, retries: 0 }
    }

    pub fn job_id(&self) -> Uuid {
        self.job.job_id
    }

    /// 1-based number of the attempt this delivery represents.
    pub fn attempt(&self) -> u32 {
        self.retries + 1
    }

    pub fn retry(&self) -> Self {
        Self {
            job: self.job.clone(),
            retries: self.retries + 1,
        }
    }

    pub fn priority(&self) -> u8 {
        self.job.config.priority
    }
}

/// Ready-queue ordering: higher priority first, then earlier enqueue time.
pub fn priority_score(priority: u8, at_millis: i64) -> f64 {
    let band = f64::from(MAX_PRIORITY.saturating_sub(priority.min(MAX_PRIORITY)));
    band * 1e13 + at_millis as f64
}

/// Message broker holding pending scrape tasks.
///
/// Implementations must hand each delivered task to exactly one consumer.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Make a task available immediately at its priority.
    async fn enqueue(&self, task: &QueuedScrape) -> Result<(), QueueError>;

    /// Make a task available once `delay` has elapsed.
    async fn schedule(&self, task: &QueuedScrape, delay: Duration) -> Result<(), QueueError>;

    /// Claim the next task, waiting up to `wait` for one to arrive.
    async fn dequeue(&self, wait: Duration) -> Result<Option<QueuedScrape>, QueueError>;

    /// Drop a claimed task from the in-flight set.
    async fn ack(&self, task: &QueuedScrape) -> Result<(), QueueError>;

    /// Give a claimed task back unprocessed; it is delivered again after `delay`.
    async fn nack(&self, task: &QueuedScrape, delay: Duration) -> Result<(), QueueError>;

    /// Mark a job as revoked; workers skip or abort it.
    async fn revoke(&self, job_id: Uuid) -> Result<(), QueueError>;

    async fn is_revoked(&self, job_id: Uuid) -> Result<bool, QueueError>;

    /// Pending tasks, ready plus delayed.
    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis-backed broker: a priority sorted set, a delayed sorted set and an
/// in-flight hash.
///
/// A claimed task that is neither acked nor nacked within the visibility
/// timeout (worker crash, lost connection) goes back to the ready set on the
/// next dequeue.
pub struct RedisBroker {
    client: redis::Client,
    conn: OnceCell<MultiplexedConnection>,
    dequeue_script: redis::Script,
    visibility_timeout: Duration,
}

#[derive(Serialize)]
struct DelayedEnvelope<'a> {
    /// Ready-queue score, as a string so Lua does not round it.
    score: String,
    payload: &'a str,
}

/// Delayed-set member and its due time for `task` after `delay`.
fn delayed_entry(task: &QueuedScrape, delay: Duration) -> Result<(String, i64), QueueError> {
    let payload = serde_json::to_string(task).map_err(QueueError::Serialize)?;
    let due_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
    let envelope = serde_json::to_string(&DelayedEnvelope {
        score: priority_score(task.priority(), due_at).to_string(),
        payload: &payload,
    })
    .map_err(QueueError::Serialize)?;
    Ok((envelope, due_at))
}

impl RedisBroker {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            dequeue_script: redis::Script::new(DEQUEUE_SCRIPT),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        })
    }

    /// Keep it above the task time limit, or running jobs get delivered twice.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    async fn conn(&self) -> Result<MultiplexedConnection, QueueError> {
        let conn = self
            .conn
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await
            .map_err(QueueError::Redis)?;
        Ok(conn.clone())
    }

    fn revoked_key(job_id: Uuid) -> String {
        format!("{REVOKED_PREFIX}{job_id}")
    }

    async fn try_claim(&self) -> Result<Option<QueuedScrape>, QueueError> {
        let mut conn = self.conn().await?;
        let now = Utc::now().timestamp_millis();
        let stale_before = now - self.visibility_timeout.as_millis() as i64;
        let payload: Option<String> = self
            .dequeue_script
            .key(READY_KEY)
            .key(DELAYED_KEY)
            .key(PROCESSING_KEY)
            .key(CLAIMED_KEY)
            .arg(now)
            .arg(stale_before)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        match payload {
            Some(payload) => {
                let task: QueuedScrape =
                    serde_json::from_str(&payload).map_err(QueueError::Serialize)?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn enqueue(&self, task: &QueuedScrape) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(task).map_err(QueueError::Serialize)?;
        let score = priority_score(task.priority(), Utc::now().timestamp_millis());
        conn.zadd::<_, _, _, ()>(READY_KEY, &payload, score)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn schedule(&self, task: &QueuedScrape, delay: Duration) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let (envelope, due_at) = delayed_entry(task, delay)?;
        conn.zadd::<_, _, _, ()>(DELAYED_KEY, &envelope, due_at)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<QueuedScrape>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(task) = self.try_claim().await? {
                return Ok(Some(task));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(DEQUEUE_POLL_STEP.min(deadline - now)).await;
        }
    }

    async fn ack(&self, task: &QueuedScrape) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let job_id = task.job_id().to_string();
        redis::pipe()
            .atomic()
            .hdel(PROCESSING_KEY, &job_id)
            .zrem(CLAIMED_KEY, &job_id)
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn nack(&self, task: &QueuedScrape, delay: Duration) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let job_id = task.job_id().to_string();
        let (envelope, due_at) = delayed_entry(task, delay)?;
        redis::pipe()
            .atomic()
            .hdel(PROCESSING_KEY, &job_id)
            .zrem(CLAIMED_KEY, &job_id)
            .zadd(DELAYED_KEY, envelope, due_at)
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn revoke(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(Self::revoked_key(job_id), 1, REVOCATION_TTL.as_secs())
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn is_revoked(&self, job_id: Uuid) -> Result<bool, QueueError> {
        let mut conn = self.conn().await?;
        let revoked: bool = conn
            .exists(Self::revoked_key(job_id))
            .await
            .map_err(QueueError::Redis)?;
        Ok(revoked)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        let ready: u64 = conn.zcard(READY_KEY).await.map_err(QueueError::Redis)?;
        let delayed: u64 = conn.zcard(DELAYED_KEY).await.map_err(QueueError::Redis)?;
        Ok(ready + delayed)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::ScrapeConfig;

    #[test]
    fn test_higher_priority_scores_lower() {
        let now = Utc::now().timestamp_millis();
        assert!(priority_score(10, now) < priority_score(5, now));
        assert!(priority_score(5, now) < priority_score(1, now));
        // A later high-priority task still beats an earlier low-priority one.
        assert!(priority_score(9, now + 60_000) < priority_score(8, now));
    }

    #[test]
    fn test_same_priority_orders_by_time() {
        assert!(priority_score(5, 1_000) < priority_score(5, 2_000));
    }

    #[test]
    fn test_retry_increments_attempt() {
        let task = QueuedScrape::new(ScrapeJob::new("http://example.com", ScrapeConfig::default()));
        assert_eq!(task.attempt(), 1);

        let retried = task.retry().retry();
        assert_eq!(retried.retries, 2);
        assert_eq!(retried.attempt(), 3);
        assert_eq!(retried.job_id(), task.job_id());
    }

    #[test]
    fn test_task_payload_exposes_job_id_for_claim_script() {
        let task = QueuedScrape::new(ScrapeJob::new("http://example.com", ScrapeConfig::default()));
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(
            value["job"]["job_id"].as_str().unwrap(),
            task.job_id().to_string()
        );
    }
}
