//! Operator-facing campaign operations.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use auditflow_campaigns::{
    Campaign, CampaignCommand, CampaignConfig, CampaignFilter, CampaignStatus, CommandOutcome, NewCampaign, NewJob,
};
use auditflow_core::{CampaignId, DomainError, Page, PageRequest, TenantId};

use crate::queue::{JobQueue, QueueError, QueuedJob};
use crate::store::{CampaignStore, ParameterSetStore, StoreError};

/// Errors surfaced to callers of [`CampaignManager`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CampaignError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl From<StoreError> for CampaignError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => CampaignError::NotFound(format!("campaign {id}")),
            StoreError::Domain(DomainError::Validation(msg) | DomainError::InvalidId(msg)) => {
                CampaignError::Validation(msg)
            }
            StoreError::Domain(DomainError::NotFound(msg)) => CampaignError::NotFound(msg),
            StoreError::Domain(DomainError::InvalidState(msg)) => CampaignError::InvalidState(msg),
            other => CampaignError::Store(other),
        }
    }
}

impl From<DomainError> for CampaignError {
    fn from(e: DomainError) -> Self {
        StoreError::Domain(e).into()
    }
}

pub type CampaignResult<T> = Result<T, CampaignError>;

/// Creates campaigns and applies operator actions.
///
/// Every status or counter change is a [`CampaignCommand`] applied through the
/// store; the manager never writes a campaign it read earlier.
#[derive(Clone)]
pub struct CampaignManager {
    campaigns: Arc<dyn CampaignStore>,
    parameter_sets: Arc<dyn ParameterSetStore>,
    queue: Arc<dyn JobQueue>,
    max_batch_size: usize,
}

impl CampaignManager {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        parameter_sets: Arc<dyn ParameterSetStore>,
        queue: Arc<dyn JobQueue>,
        max_batch_size: usize,
    ) -> Self {
        Self {
            campaigns,
            parameter_sets,
            queue,
            max_batch_size,
        }
    }

    /// Persist a campaign and hand its jobs to the queue.
    ///
    /// With the broker down the campaign stays `pending` and the reconciler
    /// enqueues it later.
    pub async fn create(&self, tenant_id: TenantId, new: NewCampaign) -> CampaignResult<Campaign> {
        new.validate(self.max_batch_size)?;

        match self.parameter_sets.get(new.parameter_set_id).await? {
            Some(ps) if ps.tenant_id == tenant_id => {}
            _ => {
                return Err(CampaignError::Validation(format!(
                    "parameter set {} not found",
                    new.parameter_set_id
                )));
            }
        }

        let campaign = Campaign::new(tenant_id, new);
        let campaign_id = campaign.id;
        self.campaigns.insert(campaign.clone()).await?;
        info!(%campaign_id, %tenant_id, total_jobs = campaign.total_jobs, "campaign created");

        let (campaign, _) = self.dispatch(campaign).await?;
        Ok(campaign)
    }

    /// Append one job and enqueue it. Reopens a finished campaign.
    pub async fn add_job(&self, id: CampaignId, job: NewJob) -> CampaignResult<Campaign> {
        let applied = self.campaigns.apply(id, CampaignCommand::AppendJob { job }).await?;
        if let CommandOutcome::Appended(index) = applied.outcome {
            debug!(campaign_id = %id, job_index = index, "job appended");
        }
        let (campaign, _) = self.dispatch(applied.campaign).await?;
        Ok(campaign)
    }

    pub async fn find_by_id(&self, id: CampaignId) -> CampaignResult<Campaign> {
        self.campaigns
            .get(id)
            .await?
            .ok_or_else(|| CampaignError::NotFound(format!("campaign {id}")))
    }

    pub async fn find_all(&self, filter: &CampaignFilter, page: PageRequest) -> CampaignResult<Page<Campaign>> {
        Ok(self.campaigns.list(filter, page).await?)
    }

    /// Unconditional. Leased jobs of a cancelled campaign are dropped by the worker.
    pub async fn cancel(&self, id: CampaignId) -> CampaignResult<Campaign> {
        let applied = self.campaigns.apply(id, CampaignCommand::Cancel).await?;
        info!(campaign_id = %id, "campaign cancelled");
        Ok(applied.campaign)
    }

    pub async fn pause(&self, id: CampaignId) -> CampaignResult<Campaign> {
        let applied = self.campaigns.apply(id, CampaignCommand::Pause).await?;
        info!(campaign_id = %id, "campaign paused");
        Ok(applied.campaign)
    }

    pub async fn resume(&self, id: CampaignId) -> CampaignResult<Campaign> {
        let applied = self.campaigns.apply(id, CampaignCommand::Resume).await?;
        info!(campaign_id = %id, "campaign resumed");
        let (campaign, _) = self.dispatch(applied.campaign).await?;
        Ok(campaign)
    }

    /// Reset and re-enqueue every failed job. No failed jobs is a no-op.
    pub async fn retry(&self, id: CampaignId) -> CampaignResult<Campaign> {
        let applied = self.campaigns.apply(id, CampaignCommand::ResetFailedJobs).await?;
        match &applied.outcome {
            CommandOutcome::Reset(indices) if !indices.is_empty() => {
                info!(campaign_id = %id, retried = indices.len(), "retrying failed jobs");
            }
            _ => {
                debug!(campaign_id = %id, "no failed jobs to retry");
                return Ok(applied.campaign);
            }
        }
        let (campaign, _) = self.dispatch(applied.campaign).await?;
        Ok(campaign)
    }

    /// Reset and re-enqueue one failed job.
    pub async fn retry_job(&self, id: CampaignId, index: usize) -> CampaignResult<Campaign> {
        let applied = self
            .campaigns
            .apply(id, CampaignCommand::ResetFailedJob { index })
            .await?;
        info!(campaign_id = %id, job_index = index, "retrying failed job");
        let (campaign, _) = self.dispatch(applied.campaign).await?;
        Ok(campaign)
    }

    /// Takes effect on the next lease; running jobs are unaffected.
    pub async fn update_config(&self, id: CampaignId, config: CampaignConfig) -> CampaignResult<Campaign> {
        let applied = self
            .campaigns
            .apply(id, CampaignCommand::UpdateConfig { config })
            .await?;
        info!(
            campaign_id = %id,
            rpm = config.rpm,
            failure_threshold = config.failure_threshold,
            "campaign config updated"
        );
        Ok(applied.campaign)
    }

    /// Hard delete. Jobs still in the queue are acknowledged as no-ops when leased.
    pub async fn delete(&self, id: CampaignId) -> CampaignResult<()> {
        if !self.campaigns.delete(id).await? {
            return Err(CampaignError::NotFound(format!("campaign {id}")));
        }
        info!(campaign_id = %id, "campaign deleted");
        Ok(())
    }

    /// Enqueue jobs left behind while the broker was down. Returns how many were enqueued.
    pub async fn reconcile_unqueued(&self, limit: usize) -> CampaignResult<usize> {
        let mut enqueued = 0;
        for campaign in self.campaigns.list_with_unqueued_jobs(limit).await? {
            let campaign_id = campaign.id;
            match self.dispatch(campaign).await {
                Ok((_, n)) => enqueued += n,
                Err(CampaignError::NotFound(_)) => {}
                Err(e) => warn!(%campaign_id, error = %e, "reconcile failed for campaign"),
            }
        }
        if enqueued > 0 {
            info!(enqueued, "reconciled unqueued jobs");
        }
        Ok(enqueued)
    }

    /// Hand every unqueued job of `campaign` to the queue.
    ///
    /// A `pending` campaign is flipped to `processing` before the first enqueue so a
    /// fast worker cannot finalize it first. Jobs whose enqueue fails stay unqueued.
    async fn dispatch(&self, campaign: Campaign) -> CampaignResult<(Campaign, usize)> {
        let campaign_id = campaign.id;
        let unqueued = campaign.unqueued_jobs();
        if unqueued.is_empty() || campaign.status == CampaignStatus::Cancelled {
            return Ok((campaign, 0));
        }

        if !self.queue.is_available().await {
            warn!(
                %campaign_id,
                unqueued = unqueued.len(),
                "job queue unavailable, jobs left pending for reconciliation"
            );
            return Ok((campaign, 0));
        }

        let mut campaign = campaign;
        if campaign.status == CampaignStatus::Pending {
            campaign = self
                .campaigns
                .apply(
                    campaign_id,
                    CampaignCommand::SetStatus {
                        status: CampaignStatus::Processing,
                    },
                )
                .await?
                .campaign;
        }

        let mut queued = Vec::with_capacity(unqueued.len());
        for index in unqueued {
            let job = QueuedJob::from_campaign(&campaign, index)?;
            match self.queue.enqueue(job).await {
                Ok(()) => queued.push(index),
                Err(e) => {
                    warn!(%campaign_id, job_index = index, error = %e, "enqueue failed, job left pending");
                    break;
                }
            }
        }

        if queued.is_empty() {
            return Ok((campaign, 0));
        }
        let count = queued.len();
        let applied = self
            .campaigns
            .apply(campaign_id, CampaignCommand::MarkQueued { indices: queued })
            .await?;
        debug!(%campaign_id, enqueued = count, "jobs enqueued");
        Ok((applied.campaign, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditflow_ai::{AuditParameter, ParameterSet};
    use auditflow_campaigns::JobStatus;

    use crate::queue::InMemoryJobQueue;
    use crate::store::{InMemoryCampaignStore, InMemoryParameterSetStore};

    struct Fixture {
        manager: CampaignManager,
        campaigns: Arc<InMemoryCampaignStore>,
        queue: Arc<InMemoryJobQueue>,
        tenant: TenantId,
        rubric: ParameterSet,
    }

    async fn fixture() -> Fixture {
        let campaigns = Arc::new(InMemoryCampaignStore::new());
        let parameter_sets = Arc::new(InMemoryParameterSetStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let tenant = TenantId::new();
        let rubric = ParameterSet::new(tenant, "support", vec![AuditParameter::new("greeting", "Greeting", 1)]);
        parameter_sets.insert(rubric.clone()).await.unwrap();

        let manager = CampaignManager::new(campaigns.clone(), parameter_sets, queue.clone(), 3);
        Fixture {
            manager,
            campaigns,
            queue,
            tenant,
            rubric,
        }
    }

    fn jobs(n: usize) -> Vec<NewJob> {
        (0..n).map(|i| NewJob::new(format!("file:///calls/{i}.wav"))).collect()
    }

    #[tokio::test]
    async fn create_enqueues_every_job_and_starts_processing() {
        let f = fixture().await;
        let campaign = f
            .manager
            .create(f.tenant, NewCampaign::new("march", f.rubric.id, jobs(2)))
            .await
            .unwrap();

        assert_eq!(campaign.status, CampaignStatus::Processing);
        assert!(campaign.started_at.is_some());
        assert!(campaign.unqueued_jobs().is_empty());
        assert_eq!(f.queue.len(), 2);
    }

    #[tokio::test]
    async fn create_with_queue_down_stays_pending() {
        let f = fixture().await;
        f.queue.set_available(false);

        let campaign = f
            .manager
            .create(f.tenant, NewCampaign::new("march", f.rubric.id, jobs(2)))
            .await
            .unwrap();

        assert_eq!(campaign.status, CampaignStatus::Pending);
        assert_eq!(campaign.total_jobs, 2);
        assert_eq!(campaign.completed_jobs, 0);
        assert_eq!(campaign.unqueued_jobs(), vec![0, 1]);
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected_without_persisting() {
        let f = fixture().await;
        let err = f
            .manager
            .create(f.tenant, NewCampaign::new("big", f.rubric.id, jobs(4)))
            .await
            .unwrap_err();

        assert!(matches!(err, CampaignError::Validation(_)));
        let page = f
            .manager
            .find_all(&CampaignFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn unknown_or_foreign_parameter_set_is_rejected() {
        let f = fixture().await;
        let err = f
            .manager
            .create(f.tenant, NewCampaign::new("x", auditflow_core::ParameterSetId::new(), jobs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::Validation(_)));

        let err = f
            .manager
            .create(TenantId::new(), NewCampaign::new("x", f.rubric.id, jobs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::Validation(_)));
    }

    #[tokio::test]
    async fn pause_resume_and_cancel() {
        let f = fixture().await;
        let c = f
            .manager
            .create(f.tenant, NewCampaign::new("c", f.rubric.id, jobs(1)))
            .await
            .unwrap();

        assert_eq!(f.manager.pause(c.id).await.unwrap().status, CampaignStatus::Paused);
        assert!(matches!(
            f.manager.pause(c.id).await,
            Err(CampaignError::InvalidState(_))
        ));
        assert_eq!(f.manager.resume(c.id).await.unwrap().status, CampaignStatus::Processing);
        assert_eq!(f.manager.cancel(c.id).await.unwrap().status, CampaignStatus::Cancelled);
        assert_eq!(f.manager.cancel(c.id).await.unwrap().status, CampaignStatus::Cancelled);
        assert!(matches!(
            f.manager.resume(c.id).await,
            Err(CampaignError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn add_job_reopens_finished_campaign() {
        let f = fixture().await;
        let c = f
            .manager
            .create(f.tenant, NewCampaign::new("c", f.rubric.id, jobs(1)))
            .await
            .unwrap();
        f.campaigns
            .apply(c.id, CampaignCommand::StartJob { index: 0 })
            .await
            .unwrap();
        f.campaigns
            .apply(
                c.id,
                CampaignCommand::CompleteJob {
                    index: 0,
                    audit_id: auditflow_core::AuditId::new(),
                },
            )
            .await
            .unwrap();
        f.campaigns
            .apply(
                c.id,
                CampaignCommand::Finalize {
                    stats: Default::default(),
                },
            )
            .await
            .unwrap();
        assert_eq!(f.manager.find_by_id(c.id).await.unwrap().status, CampaignStatus::Completed);

        let reopened = f
            .manager
            .add_job(c.id, NewJob::new("file:///calls/late.wav"))
            .await
            .unwrap();
        assert_eq!(reopened.status, CampaignStatus::Processing);
        assert_eq!(reopened.total_jobs, 2);
        assert!(reopened.completed_at.is_none());
        assert_eq!(f.queue.len(), 2);
    }

    #[tokio::test]
    async fn retry_resets_failed_jobs_and_requeues() {
        let f = fixture().await;
        let c = f
            .manager
            .create(f.tenant, NewCampaign::new("c", f.rubric.id, jobs(2)))
            .await
            .unwrap();
        for index in 0..2 {
            f.campaigns
                .apply(c.id, CampaignCommand::StartJob { index })
                .await
                .unwrap();
            f.campaigns
                .apply(
                    c.id,
                    CampaignCommand::FailJob {
                        index,
                        error: "boom".into(),
                    },
                )
                .await
                .unwrap();
        }
        f.campaigns
            .apply(
                c.id,
                CampaignCommand::Finalize {
                    stats: Default::default(),
                },
            )
            .await
            .unwrap();

        let retried = f.manager.retry(c.id).await.unwrap();
        assert_eq!(retried.status, CampaignStatus::Processing);
        assert_eq!(retried.failed_jobs, 0);
        assert!(retried.jobs.iter().all(|j| j.status == JobStatus::Pending && j.error.is_none()));
        assert_eq!(f.queue.len(), 4);

        // Nothing failed any more: a second retry changes nothing.
        let again = f.manager.retry(c.id).await.unwrap();
        assert_eq!(again, retried);
    }

    #[tokio::test]
    async fn retry_job_checks_index_and_status() {
        let f = fixture().await;
        let c = f
            .manager
            .create(f.tenant, NewCampaign::new("c", f.rubric.id, jobs(1)))
            .await
            .unwrap();

        assert!(matches!(
            f.manager.retry_job(c.id, 0).await,
            Err(CampaignError::InvalidState(_))
        ));
        assert!(matches!(
            f.manager.retry_job(c.id, 7).await,
            Err(CampaignError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_config_validates_threshold() {
        let f = fixture().await;
        let c = f
            .manager
            .create(f.tenant, NewCampaign::new("c", f.rubric.id, jobs(1)))
            .await
            .unwrap();

        let updated = f
            .manager
            .update_config(
                c.id,
                CampaignConfig {
                    rpm: 30,
                    failure_threshold: 50,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.config.rpm, 30);

        let err = f
            .manager
            .update_config(
                c.id,
                CampaignConfig {
                    rpm: 0,
                    failure_threshold: 0,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::Validation(_)));
    }

    #[tokio::test]
    async fn delete_and_lookup_of_unknown_campaign() {
        let f = fixture().await;
        let c = f
            .manager
            .create(f.tenant, NewCampaign::new("c", f.rubric.id, jobs(1)))
            .await
            .unwrap();

        f.manager.delete(c.id).await.unwrap();
        assert!(matches!(f.manager.find_by_id(c.id).await, Err(CampaignError::NotFound(_))));
        assert!(matches!(f.manager.delete(c.id).await, Err(CampaignError::NotFound(_))));
    }

    #[tokio::test]
    async fn reconcile_enqueues_after_queue_recovers() {
        let f = fixture().await;
        f.queue.set_available(false);
        let c = f
            .manager
            .create(f.tenant, NewCampaign::new("c", f.rubric.id, jobs(2)))
            .await
            .unwrap();

        f.queue.set_available(true);
        assert_eq!(f.manager.reconcile_unqueued(10).await.unwrap(), 2);
        assert_eq!(f.manager.reconcile_unqueued(10).await.unwrap(), 0);

        let c = f.manager.find_by_id(c.id).await.unwrap();
        assert_eq!(c.status, CampaignStatus::Processing);
        assert!(c.started_at.is_some());
        assert_eq!(f.queue.len(), 2);
    }
}
