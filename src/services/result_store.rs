use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::models::job::{JobState, JobStatus};

const RESULT_PREFIX: &str = "scrape_dispatch:result:";

/// Replace the record only while its current state is one of ARGV[3..].
const TRANSITION_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return 'missing'
end
local state = cjson.decode(current)['state']
for i = 3, #ARGV do
    if ARGV[i] == state then
        redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
        return 'applied'
    end
end
return state
"#;

/// Outcome of a guarded status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The stored record was already in this (terminal) state.
    Rejected(JobState),
    Missing,
}

impl Transition {
    pub fn is_applied(self) -> bool {
        matches!(self, Transition::Applied)
    }
}

/// Key-value store of job status records.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Unconditional write. Used for the initial PENDING record.
    async fn put(&self, status: &JobStatus) -> Result<(), StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<JobStatus>, StoreError>;

    /// Atomically replace the record unless it is already terminal.
    async fn transition(&self, status: &JobStatus) -> Result<Transition, StoreError>;

    async fn remove(&self, job_id: Uuid) -> Result<(), StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Redis result backend storing one JSON document per job with a TTL.
pub struct RedisResultStore {
    client: redis::Client,
    conn: OnceCell<MultiplexedConnection>,
    ttl: Duration,
    transition_script: redis::Script,
}

impl RedisResultStore {
    pub fn new(redis_url: &str, ttl: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(StoreError::Redis)?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            ttl,
            transition_script: redis::Script::new(TRANSITION_SCRIPT),
        })
    }

    async fn conn(&self) -> Result<MultiplexedConnection, StoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await
            .map_err(StoreError::Redis)?;
        Ok(conn.clone())
    }

    fn key(job_id: Uuid) -> String {
        format!("{RESULT_PREFIX}{job_id}")
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    async fn put(&self, status: &JobStatus) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(status).map_err(StoreError::Serialize)?;
        conn.set_ex::<_, _, ()>(Self::key(status.job_id), payload, self.ttl_secs())
            .await
            .map_err(StoreError::Redis)?;
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobStatus>, StoreError> {
        let mut conn = self.conn().await?;
        let payload: Option<String> = conn.get(Self::key(job_id)).await.map_err(StoreError::Redis)?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(StoreError::Serialize))
            .transpose()
    }

    async fn transition(&self, status: &JobStatus) -> Result<Transition, StoreError> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(status).map_err(StoreError::Serialize)?;

        let mut invocation = self.transition_script.key(Self::key(status.job_id));
        invocation.arg(payload).arg(self.ttl_secs());
        for state in JobState::NON_TERMINAL {
            invocation.arg(state.to_string());
        }

        let outcome: String = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(StoreError::Redis)?;

        match outcome.as_str() {
            "applied" => Ok(Transition::Applied),
            "missing" => Ok(Transition::Missing),
            other => other
                .parse::<JobState>()
                .map(Transition::Rejected)
                .map_err(|_| StoreError::Corrupt(format!("unknown stored state '{other}'"))),
        }
    }

    async fn remove(&self, job_id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(Self::key(job_id))
            .await
            .map_err(StoreError::Redis)?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(StoreError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt status record: {0}")]
    Corrupt(String),
}
