//! Per-job pipeline: admission, transcribe, score, persist, complete, and the
//! failure/retry path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use auditflow_ai::{AiError, CallAuditor, Transcriber};
use auditflow_campaigns::{
    AuditRecord, CampaignCommand, CampaignStatus, CommandOutcome, Transition,
};
use auditflow_core::{AuditId, CampaignId, DomainError, ParameterSetId};

use crate::external::{AudioStorage, AuditUsage, UsageReporter};
use crate::queue::{JobQueue, Lease};
use crate::store::{AuditResultStore, CampaignStore, ParameterSetStore, StoreError};

use super::retry::RetryPolicy;

/// Why a job attempt failed.
#[derive(Debug, Error)]
pub enum JobError {
    /// The campaign's rubric is gone; retrying cannot help.
    #[error("parameter set {0} not found")]
    ParameterSetMissing(ParameterSetId),

    #[error("transcription failed: {0}")]
    Transcription(AiError),

    #[error("scoring failed: {0}")]
    Scoring(AiError),

    #[error("{stage} timed out after {ms} ms")]
    Timeout { stage: &'static str, ms: u64 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl JobError {
    /// Permanent errors skip the retry path.
    pub fn is_permanent(&self) -> bool {
        matches!(self, JobError::ParameterSetMissing(_))
    }
}

/// Why a lease was acknowledged without running the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    CampaignMissing,
    CampaignCancelled,
    JobMissing,
    /// Redelivery of a job that already reached `completed` / `failed`.
    AlreadyFinal,
}

/// What happened to one lease.
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseOutcome {
    Succeeded { audit_id: AuditId },
    Retried { delay: Duration },
    Failed { error: String },
    Deferred { delay: Duration },
    Skipped(SkipReason),
}

/// Collaborators the pipeline talks to.
#[derive(Clone)]
pub struct PipelineDeps {
    pub campaigns: Arc<dyn CampaignStore>,
    pub results: Arc<dyn AuditResultStore>,
    pub parameter_sets: Arc<dyn ParameterSetStore>,
    pub queue: Arc<dyn JobQueue>,
    pub transcriber: Arc<dyn Transcriber>,
    pub auditor: Arc<dyn CallAuditor>,
    pub usage: Arc<dyn UsageReporter>,
    pub audio: Arc<dyn AudioStorage>,
}

enum Admission {
    Start,
    Skip(SkipReason),
    Defer(Duration),
}

/// Result of a successful attempt, before acknowledgement.
struct Scored {
    audit_id: AuditId,
    transition: Transition,
    usage: AuditUsage,
}

pub struct JobPipeline {
    deps: PipelineDeps,
    retry: RetryPolicy,
    call_timeout: Duration,
    /// How long a lease for a paused campaign is parked before it is looked at again.
    pause_delay: Duration,
}

impl JobPipeline {
    pub fn new(deps: PipelineDeps, retry: RetryPolicy, call_timeout: Duration, pause_delay: Duration) -> Self {
        Self {
            deps,
            retry,
            call_timeout,
            pause_delay,
        }
    }

    pub fn deps(&self) -> &PipelineDeps {
        &self.deps
    }

    /// Drive one lease to an outcome. Never panics on collaborator errors.
    pub async fn run(&self, lease: Lease) -> LeaseOutcome {
        let campaign_id = lease.job.campaign_id;
        let job_index = lease.job.job_index;

        let admission = match self.admit(&lease).await {
            Ok(a) => a,
            Err(e) => {
                // Store unreachable: hand the lease back without spending an attempt.
                warn!(%campaign_id, job_index, error = %e, "could not admit job, deferring");
                Admission::Defer(self.pause_delay)
            }
        };

        match admission {
            Admission::Start => {}
            Admission::Skip(reason) => {
                debug!(%campaign_id, job_index, ?reason, "skipping lease");
                self.ack(&lease).await;
                return LeaseOutcome::Skipped(reason);
            }
            Admission::Defer(delay) => {
                debug!(%campaign_id, job_index, delay_ms = delay.as_millis() as u64, "deferring lease");
                if let Err(e) = self.deps.queue.defer(lease, delay).await {
                    error!(%campaign_id, job_index, error = %e, "failed to defer lease");
                }
                return LeaseOutcome::Deferred { delay };
            }
        }

        match self.execute(&lease).await {
            Ok(scored) => self.on_success(lease, scored).await,
            Err(e) => self.on_failure(lease, e).await,
        }
    }

    /// Lease-time checks, rate limiting and the `pending -> processing` transition.
    async fn admit(&self, lease: &Lease) -> Result<Admission, StoreError> {
        let campaign_id = lease.job.campaign_id;
        let index = lease.job.job_index;

        let Some(campaign) = self.deps.campaigns.get(campaign_id).await? else {
            return Ok(Admission::Skip(SkipReason::CampaignMissing));
        };
        match campaign.status {
            CampaignStatus::Cancelled => return Ok(Admission::Skip(SkipReason::CampaignCancelled)),
            CampaignStatus::Paused => return Ok(Admission::Defer(self.pause_delay)),
            _ => {}
        }
        match campaign.job(index) {
            Err(_) => return Ok(Admission::Skip(SkipReason::JobMissing)),
            Ok(job) if job.status.is_final() => return Ok(Admission::Skip(SkipReason::AlreadyFinal)),
            Ok(_) => {}
        }

        if campaign.config.rpm > 0 {
            let applied = self
                .deps
                .campaigns
                .apply(campaign_id, CampaignCommand::ReserveStartSlot)
                .await;
            match applied {
                Ok(a) => {
                    if let CommandOutcome::StartSlot(Some(wait)) = a.outcome {
                        return Ok(Admission::Defer(wait));
                    }
                }
                Err(StoreError::NotFound(_)) => return Ok(Admission::Skip(SkipReason::CampaignMissing)),
                Err(e) => return Err(e),
            }
        }

        match self
            .deps
            .campaigns
            .apply(campaign_id, CampaignCommand::StartJob { index })
            .await
        {
            Ok(_) => Ok(Admission::Start),
            Err(StoreError::NotFound(_)) => Ok(Admission::Skip(SkipReason::CampaignMissing)),
            Err(StoreError::Domain(DomainError::InvalidState(_))) => {
                Ok(Admission::Skip(SkipReason::AlreadyFinal))
            }
            Err(StoreError::Domain(DomainError::NotFound(_))) => Ok(Admission::Skip(SkipReason::JobMissing)),
            Err(e) => Err(e),
        }
    }

    async fn execute(&self, lease: &Lease) -> Result<Scored, JobError> {
        let started = Instant::now();
        let job = &lease.job;

        let parameters = self
            .deps
            .parameter_sets
            .get(job.parameter_set_id)
            .await?
            .ok_or(JobError::ParameterSetMissing(job.parameter_set_id))?;

        let transcript = self
            .bounded("transcription", self.deps.transcriber.transcribe(&job.audio_url))
            .await?
            .map_err(JobError::Transcription)?;

        let audit = self
            .bounded(
                "scoring",
                self.deps
                    .auditor
                    .audit_call(&transcript.transcript, &parameters, &transcript.language),
            )
            .await?
            .map_err(JobError::Scoring)?;
        audit.validate().map_err(JobError::Scoring)?;

        let Some(campaign) = self.deps.campaigns.get(job.campaign_id).await? else {
            return Err(JobError::Store(StoreError::NotFound(job.campaign_id)));
        };
        let embedded = campaign.job(job.job_index).map_err(StoreError::from)?;

        let duration_ms = started.elapsed().as_millis() as u64;
        let token_usage = audit.token_usage;
        let record = AuditRecord::from_audit(
            campaign.tenant_id,
            campaign.id,
            job.job_index,
            campaign.parameter_set_id,
            embedded,
            transcript.language.clone(),
            audit,
            duration_ms,
        );
        let audit_id = self.deps.results.upsert(record).await?;

        let applied = self
            .deps
            .campaigns
            .apply(
                job.campaign_id,
                CampaignCommand::CompleteJob {
                    index: job.job_index,
                    audit_id,
                },
            )
            .await?;
        let transition = match applied.outcome {
            CommandOutcome::Job(t) => t,
            _ => Transition::Unchanged,
        };

        Ok(Scored {
            audit_id,
            transition,
            usage: AuditUsage {
                tenant_id: campaign.tenant_id,
                campaign_id: campaign.id,
                audit_id,
                job_index: job.job_index,
                duration_ms,
                token_usage,
            },
        })
    }

    async fn bounded<T>(
        &self,
        stage: &'static str,
        fut: impl std::future::Future<Output = T>,
    ) -> Result<T, JobError> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| JobError::Timeout {
                stage,
                ms: self.call_timeout.as_millis() as u64,
            })
    }

    async fn on_success(&self, lease: Lease, scored: Scored) -> LeaseOutcome {
        let campaign_id = lease.job.campaign_id;
        let job_index = lease.job.job_index;
        self.ack(&lease).await;

        if scored.transition == Transition::Applied {
            info!(%campaign_id, job_index, audit_id = %scored.audit_id, "job completed");

            let usage = self.deps.usage.clone();
            let report = scored.usage;
            tokio::spawn(async move {
                if let Err(e) = usage.report_audit(report).await {
                    warn!(%campaign_id, job_index, error = %e, "usage report failed");
                }
            });
        } else {
            debug!(%campaign_id, job_index, "job was already completed");
        }

        self.cleanup_audio(&lease).await;
        self.check_completion(campaign_id).await;
        LeaseOutcome::Succeeded {
            audit_id: scored.audit_id,
        }
    }

    async fn on_failure(&self, lease: Lease, err: JobError) -> LeaseOutcome {
        let campaign_id = lease.job.campaign_id;
        let job_index = lease.job.job_index;
        let attempts = lease.attempts;

        if let JobError::Store(StoreError::NotFound(_)) = err {
            debug!(%campaign_id, job_index, "campaign deleted mid-flight");
            self.ack(&lease).await;
            return LeaseOutcome::Skipped(SkipReason::CampaignMissing);
        }

        if !err.is_permanent() && self.retry.should_retry(attempts) {
            let delay = self.retry.delay_for_attempt(attempts);
            warn!(
                %campaign_id,
                job_index,
                attempt = attempts + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "job attempt failed, retrying"
            );
            if let Err(e) = self.deps.queue.requeue(lease, delay).await {
                error!(%campaign_id, job_index, error = %e, "failed to requeue job");
            }
            return LeaseOutcome::Retried { delay };
        }

        let message = err.to_string();
        warn!(%campaign_id, job_index, attempt = attempts + 1, error = %message, "job failed permanently");

        let applied = self
            .deps
            .campaigns
            .apply(
                campaign_id,
                CampaignCommand::FailJob {
                    index: job_index,
                    error: message.clone(),
                },
            )
            .await;
        self.ack(&lease).await;

        match applied {
            Ok(applied) => {
                let c = &applied.campaign;
                if c.status == CampaignStatus::Processing && !c.is_settled() && c.exceeds_failure_threshold() {
                    self.auto_pause(campaign_id, c.failed_jobs, c.total_jobs).await;
                }
            }
            Err(StoreError::NotFound(_)) => return LeaseOutcome::Skipped(SkipReason::CampaignMissing),
            Err(StoreError::Domain(DomainError::InvalidState(reason))) => {
                // Another delivery of this job completed it first.
                debug!(%campaign_id, job_index, %reason, "job already final, failure dropped");
                self.check_completion(campaign_id).await;
                return LeaseOutcome::Skipped(SkipReason::AlreadyFinal);
            }
            Err(e) => error!(%campaign_id, job_index, error = %e, "failed to record job failure"),
        }

        self.cleanup_audio(&lease).await;
        self.check_completion(campaign_id).await;
        LeaseOutcome::Failed { error: message }
    }

    async fn auto_pause(&self, campaign_id: CampaignId, failed: u32, total: u32) {
        match self.deps.campaigns.apply(campaign_id, CampaignCommand::Pause).await {
            Ok(_) => warn!(%campaign_id, failed, total, "failure threshold reached, campaign paused"),
            Err(e) => debug!(%campaign_id, error = %e, "auto-pause not applied"),
        }
    }

    /// Finalize the campaign once every job settled.
    ///
    /// Stats come from the persisted records of jobs that completed, so redelivered
    /// jobs are never counted twice and records of failed jobs not at all. Safe to
    /// call repeatedly and concurrently.
    pub async fn check_completion(&self, campaign_id: CampaignId) {
        let campaign = match self.deps.campaigns.get(campaign_id).await {
            Ok(Some(c)) => c,
            Ok(None) => return,
            Err(e) => {
                error!(%campaign_id, error = %e, "completion check could not load campaign");
                return;
            }
        };
        if campaign.status.is_terminal() || !campaign.is_settled() {
            return;
        }

        let records = match self.deps.results.list_for_campaign(campaign_id).await {
            Ok(r) => r,
            Err(e) => {
                error!(%campaign_id, error = %e, "completion check could not load results");
                return;
            }
        };
        let stats = campaign.stats_from(&records);

        match self
            .deps
            .campaigns
            .apply(campaign_id, CampaignCommand::Finalize { stats })
            .await
        {
            Ok(applied) => {
                if let CommandOutcome::Finalized(Some(status)) = applied.outcome {
                    let c = &applied.campaign;
                    info!(
                        %campaign_id,
                        %status,
                        completed = c.completed_jobs,
                        failed = c.failed_jobs,
                        "campaign finished"
                    );
                }
            }
            Err(e) => error!(%campaign_id, error = %e, "failed to finalize campaign"),
        }
    }

    async fn cleanup_audio(&self, lease: &Lease) {
        if let Err(e) = self.deps.audio.delete(&lease.job.audio_url).await {
            warn!(
                campaign_id = %lease.job.campaign_id,
                job_index = lease.job.job_index,
                error = %e,
                "audio cleanup failed"
            );
        }
    }

    async fn ack(&self, lease: &Lease) {
        if let Err(e) = self.deps.queue.ack(lease).await {
            warn!(lease_id = %lease.id, error = %e, "failed to ack lease");
        }
    }
}
