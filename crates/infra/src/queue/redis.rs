//! Redis-backed job queue (durable, at-least-once delivery).
//!
//! ## Layout
//!
//! - `{prefix}:ready`   list of envelopes, LPOP from the head
//! - `{prefix}:delayed` sorted set of envelopes scored by due time (ms)
//! - `{prefix}:leased`  hash lease id -> envelope
//! - `{prefix}:leased_at` sorted set lease id scored by lease time (ms)
//!
//! Promotion of due delayed entries and the lease itself run in one Lua script, so
//! two consumers can never lease the same envelope.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{JobQueue, Lease, QueueError, QueuedJob};

const DEFAULT_PREFIX: &str = "auditflow:jobs";

const LEASE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', now)
for _, item in ipairs(due) do
  redis.call('RPUSH', KEYS[1], item)
  redis.call('ZREM', KEYS[2], item)
end
local item = redis.call('LPOP', KEYS[1])
if not item then
  return false
end
redis.call('HSET', KEYS[3], ARGV[2], item)
redis.call('ZADD', KEYS[4], now, ARGV[2])
return item
"#;

const RECLAIM_SCRIPT: &str = r#"
local cutoff = tonumber(ARGV[1])
local ids = redis.call('ZRANGEBYSCORE', KEYS[4], '-inf', cutoff)
local n = 0
for _, id in ipairs(ids) do
  local item = redis.call('HGET', KEYS[3], id)
  if item then
    redis.call('RPUSH', KEYS[1], item)
    redis.call('HDEL', KEYS[3], id)
    n = n + 1
  end
  redis.call('ZREM', KEYS[4], id)
end
return n
"#;

/// What is stored in Redis for one queued job.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    /// Keeps sorted-set members unique when the same job is queued twice.
    nonce: Uuid,
    job: QueuedJob,
    attempts: u32,
}

#[derive(Clone)]
pub struct RedisJobQueue {
    conn: MultiplexedConnection,
    ready_key: String,
    delayed_key: String,
    leased_key: String,
    leased_at_key: String,
    ping_timeout: Duration,
}

impl std::fmt::Debug for RedisJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJobQueue")
            .field("ready_key", &self.ready_key)
            .finish_non_exhaustive()
    }
}

impl RedisJobQueue {
    /// Connect to `redis_url`; keys are namespaced under `prefix` (default `auditflow:jobs`).
    pub async fn connect(redis_url: &str, prefix: Option<&str>) -> Result<Self, QueueError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        let prefix = prefix.unwrap_or(DEFAULT_PREFIX);
        Ok(Self {
            conn,
            ready_key: format!("{prefix}:ready"),
            delayed_key: format!("{prefix}:delayed"),
            leased_key: format!("{prefix}:leased"),
            leased_at_key: format!("{prefix}:leased_at"),
            ping_timeout: Duration::from_millis(500),
        })
    }

    fn encode(job: QueuedJob, attempts: u32) -> Result<String, QueueError> {
        serde_json::to_string(&Envelope {
            nonce: Uuid::now_v7(),
            job,
            attempts,
        })
        .map_err(|e| QueueError::Serialization(e.to_string()))
    }

    /// Move a lease back to the delayed set with the given attempt count.
    async fn release(&self, lease: Lease, delay: Duration, attempts: u32) -> Result<(), QueueError> {
        let due = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let item = Self::encode(lease.job, attempts)?;
        let mut conn = self.conn.clone();

        let removed: (i64, i64, i64) = redis::pipe()
            .atomic()
            .hdel(&self.leased_key, &lease.id)
            .zrem(&self.leased_at_key, &lease.id)
            .zadd(&self.delayed_key, &item, due)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        if removed.0 == 0 {
            // Reclaimed by a sweep while this consumer still held it; the job is
            // now queued twice, which at-least-once consumers tolerate.
            warn!(lease_id = %lease.id, "released a lease that was no longer held");
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    #[instrument(skip(self, job), fields(campaign_id = %job.campaign_id, job_index = job.job_index), err)]
    async fn enqueue(&self, job: QueuedJob) -> Result<(), QueueError> {
        let item = Self::encode(job, 0)?;
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .rpush(&self.ready_key, item)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn lease(&self) -> Result<Option<Lease>, QueueError> {
        let id = Uuid::now_v7().to_string();
        let mut conn = self.conn.clone();
        let item: Option<String> = redis::Script::new(LEASE_SCRIPT)
            .key(&self.ready_key)
            .key(&self.delayed_key)
            .key(&self.leased_key)
            .key(&self.leased_at_key)
            .arg(Utc::now().timestamp_millis())
            .arg(&id)
            .invoke_async(&mut conn)
            .await
            .map_err(command_error)?;

        let Some(item) = item else {
            return Ok(None);
        };
        let envelope: Envelope =
            serde_json::from_str(&item).map_err(|e| QueueError::Serialization(e.to_string()))?;
        Ok(Some(Lease {
            id,
            job: envelope.job,
            attempts: envelope.attempts,
        }))
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .hdel(&self.leased_key, &lease.id)
            .zrem(&self.leased_at_key, &lease.id)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        if removed == 0 {
            return Err(QueueError::UnknownLease(lease.id.clone()));
        }
        Ok(())
    }

    #[instrument(skip(self, lease), fields(lease_id = %lease.id, attempts = lease.attempts), err)]
    async fn requeue(&self, lease: Lease, delay: Duration) -> Result<(), QueueError> {
        let attempts = lease.attempts + 1;
        self.release(lease, delay, attempts).await
    }

    async fn defer(&self, lease: Lease, delay: Duration) -> Result<(), QueueError> {
        let attempts = lease.attempts;
        self.release(lease, delay, attempts).await
    }

    async fn is_available(&self) -> bool {
        let mut conn = self.conn.clone();
        let ping = redis::cmd("PING").query_async::<_, String>(&mut conn);
        matches!(tokio::time::timeout(self.ping_timeout, ping).await, Ok(Ok(_)))
    }

    #[instrument(skip(self), err)]
    async fn reclaim_expired(&self, older_than: Duration) -> Result<usize, QueueError> {
        let cutoff = Utc::now().timestamp_millis() - older_than.as_millis() as i64;
        let mut conn = self.conn.clone();
        let n: i64 = redis::Script::new(RECLAIM_SCRIPT)
            .key(&self.ready_key)
            .key(&self.delayed_key)
            .key(&self.leased_key)
            .key(&self.leased_at_key)
            .arg(cutoff)
            .invoke_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(n.max(0) as usize)
    }
}

fn command_error(e: redis::RedisError) -> QueueError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        QueueError::Unavailable(e.to_string())
    } else {
        QueueError::Command(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditflow_core::{CampaignId, ParameterSetId, TenantId};

    #[test]
    fn envelopes_are_unique_per_enqueue() {
        let job = QueuedJob {
            campaign_id: CampaignId::new(),
            tenant_id: TenantId::new(),
            job_index: 3,
            audio_url: "https://cdn.example.com/a.mp3".to_string(),
            agent_name: Some("Dana".to_string()),
            call_id: None,
            parameter_set_id: ParameterSetId::new(),
        };
        let a = RedisJobQueue::encode(job.clone(), 0).unwrap();
        let b = RedisJobQueue::encode(job.clone(), 0).unwrap();
        assert_ne!(a, b);

        let decoded: Envelope = serde_json::from_str(&a).unwrap();
        assert_eq!(decoded.job, job);
        assert_eq!(decoded.attempts, 0);
    }
}
