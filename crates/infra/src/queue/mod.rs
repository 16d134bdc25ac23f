//! At-least-once job queue.
//!
//! ## Semantics
//!
//! - `enqueue`: durable once it returns `Ok`
//! - `lease`: hands the next ready job to exactly one consumer, removing it from
//!   the ready set until it is acknowledged or returned
//! - `ack`: the lease reached a terminal outcome and is forgotten
//! - `requeue`: return after a delay with `attempts + 1` (failed attempt)
//! - `defer`: return after a delay with `attempts` unchanged (not started)
//! - `reclaim_expired`: return leases held longer than a timeout (crashed consumer)
//!
//! Ordering is best-effort FIFO; delayed jobs may overtake or fall behind fresh ones.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use auditflow_campaigns::Campaign;
use auditflow_core::{CampaignId, DomainResult, ParameterSetId, TenantId};

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::InMemoryJobQueue;
#[cfg(feature = "redis")]
pub use redis::RedisJobQueue;

/// Payload carried by the queue for one campaign job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    pub campaign_id: CampaignId,
    pub tenant_id: TenantId,
    pub job_index: usize,
    pub audio_url: String,
    pub agent_name: Option<String>,
    pub call_id: Option<String>,
    pub parameter_set_id: ParameterSetId,
}

impl QueuedJob {
    pub fn from_campaign(campaign: &Campaign, job_index: usize) -> DomainResult<Self> {
        let job = campaign.job(job_index)?;
        Ok(Self {
            campaign_id: campaign.id,
            tenant_id: campaign.tenant_id,
            job_index,
            audio_url: job.audio_url.clone(),
            agent_name: job.agent_name.clone(),
            call_id: job.call_id.clone(),
            parameter_set_id: campaign.parameter_set_id,
        })
    }
}

/// A job claimed by one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub id: String,
    pub job: QueuedJob,
    /// Failed attempts before this one (0 on first delivery).
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue broker unavailable: {0}")]
    Unavailable(String),

    #[error("queue command failed: {0}")]
    Command(String),

    #[error("queue payload error: {0}")]
    Serialization(String),

    #[error("unknown lease: {0}")]
    UnknownLease(String),
}

#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    async fn enqueue(&self, job: QueuedJob) -> Result<(), QueueError>;

    /// Next ready job, or `None` if nothing is ready.
    async fn lease(&self) -> Result<Option<Lease>, QueueError>;

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError>;

    async fn requeue(&self, lease: Lease, delay: Duration) -> Result<(), QueueError>;

    async fn defer(&self, lease: Lease, delay: Duration) -> Result<(), QueueError>;

    /// Whether the broker is reachable right now.
    async fn is_available(&self) -> bool;

    /// Return leases older than `older_than` to the ready set. Returns how many.
    async fn reclaim_expired(&self, older_than: Duration) -> Result<usize, QueueError> {
        let _ = older_than;
        Ok(0)
    }
}
