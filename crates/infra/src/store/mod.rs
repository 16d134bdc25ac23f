//! Persistence for campaigns, audit results and parameter sets.
//!
//! ## Write path
//!
//! Campaign mutations never go through read-modify-write in callers. Instead a
//! [`CampaignCommand`] is handed to [`CampaignStore::apply`], which takes exclusive
//! access to the one campaign (mutex in memory, `SELECT ... FOR UPDATE` in Postgres),
//! runs the transition, and persists the result. A command that fails leaves the
//! stored campaign untouched.

use async_trait::async_trait;
use thiserror::Error;

use auditflow_ai::ParameterSet;
use auditflow_campaigns::{AuditRecord, Campaign, CampaignCommand, CampaignFilter, CommandOutcome};
use auditflow_core::{AuditId, CampaignId, DomainError, Page, PageRequest, ParameterSetId};

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryAuditResultStore, InMemoryCampaignStore, InMemoryParameterSetStore};
pub use postgres::{PostgresAuditResultStore, PostgresCampaignStore, PostgresParameterSetStore, migrate};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("campaign not found: {0}")]
    NotFound(CampaignId),

    /// The command was rejected by the campaign state machine.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Result of [`CampaignStore::apply`]: the campaign after the command, plus what it did.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub campaign: Campaign,
    pub outcome: CommandOutcome,
}

#[async_trait]
pub trait CampaignStore: Send + Sync + 'static {
    async fn insert(&self, campaign: Campaign) -> Result<(), StoreError>;

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>, StoreError>;

    /// Newest first.
    async fn list(&self, filter: &CampaignFilter, page: PageRequest)
    -> Result<Page<Campaign>, StoreError>;

    /// Returns false if nothing was deleted.
    async fn delete(&self, id: CampaignId) -> Result<bool, StoreError>;

    /// `pending` / `processing` campaigns that still hold jobs never handed to the queue.
    async fn list_with_unqueued_jobs(&self, limit: usize) -> Result<Vec<Campaign>, StoreError>;

    /// Atomically run one command against one campaign.
    async fn apply(&self, id: CampaignId, command: CampaignCommand) -> Result<Applied, StoreError>;
}

/// Scoring results, keyed by `(campaign_id, job_index)`.
#[async_trait]
pub trait AuditResultStore: Send + Sync + 'static {
    /// Insert or replace the record for the record's job.
    ///
    /// Returns the id under which the result is stored; on replace this is the
    /// id of the existing record, so a job's `audit_id` stays stable across redelivery.
    async fn upsert(&self, record: AuditRecord) -> Result<AuditId, StoreError>;

    async fn get(&self, id: AuditId) -> Result<Option<AuditRecord>, StoreError>;

    async fn list_for_campaign(&self, campaign_id: CampaignId) -> Result<Vec<AuditRecord>, StoreError>;
}

#[async_trait]
pub trait ParameterSetStore: Send + Sync + 'static {
    async fn get(&self, id: ParameterSetId) -> Result<Option<ParameterSet>, StoreError>;

    async fn insert(&self, parameter_set: ParameterSet) -> Result<(), StoreError>;
}
