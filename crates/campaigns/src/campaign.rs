use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use auditflow_core::{CampaignId, DomainError, DomainResult, ParameterSetId, TenantId};

use crate::job::{AuditJob, NewJob};
use crate::record::{AuditRecord, CampaignStats};
use crate::status::{CampaignStatus, JobStatus};

/// Rate limit and auto-pause configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignConfig {
    /// Maximum job starts per minute for this campaign; 0 = unlimited.
    pub rpm: u32,
    /// Auto-pause once this percentage of jobs failed permanently (1-100, 100 = never).
    pub failure_threshold: u8,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            rpm: 0,
            failure_threshold: 100,
        }
    }
}

impl CampaignConfig {
    pub fn validate(&self) -> DomainResult<()> {
        if !(1..=100).contains(&self.failure_threshold) {
            return Err(DomainError::validation(format!(
                "failureThreshold must be within 1..=100, got {}",
                self.failure_threshold
            )));
        }
        Ok(())
    }

    /// Minimum spacing between two job starts, if rate limited.
    pub fn min_start_interval(&self) -> Option<chrono::Duration> {
        if self.rpm == 0 {
            return None;
        }
        Some(chrono::Duration::milliseconds(60_000 / i64::from(self.rpm)))
    }
}

/// Transient bookkeeping used by the rate limiter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignUsage {
    pub last_job_started_at: Option<DateTime<Utc>>,
}

/// Request to create a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCampaign {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub parameter_set_id: ParameterSetId,
    pub jobs: Vec<NewJob>,
    #[serde(default)]
    pub config: Option<CampaignConfig>,
}

impl NewCampaign {
    pub fn new(name: impl Into<String>, parameter_set_id: ParameterSetId, jobs: Vec<NewJob>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameter_set_id,
            jobs,
            config: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_config(mut self, config: CampaignConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Reject the whole batch up front; nothing is truncated.
    pub fn validate(&self, max_jobs: usize) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("campaign name must not be empty"));
        }
        if self.jobs.is_empty() {
            return Err(DomainError::validation("campaign must contain at least one job"));
        }
        if self.jobs.len() > max_jobs {
            return Err(DomainError::validation(format!(
                "batch of {} jobs exceeds the maximum of {}",
                self.jobs.len(),
                max_jobs
            )));
        }
        for (i, job) in self.jobs.iter().enumerate() {
            job.validate()
                .map_err(|e| DomainError::validation(format!("job {i}: {e}")))?;
        }
        if let Some(cfg) = &self.config {
            cfg.validate()?;
        }
        Ok(())
    }
}

/// Result of a compare-and-set job transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State and counters changed.
    Applied,
    /// Job was already in the target state; counters untouched.
    Unchanged,
}

/// A bulk audit campaign with its embedded jobs.
///
/// Counter fields are only adjusted through the transition methods below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: CampaignId,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub parameter_set_id: ParameterSetId,
    pub status: CampaignStatus,
    pub total_jobs: u32,
    pub completed_jobs: u32,
    pub failed_jobs: u32,
    pub processing_jobs: u32,
    pub jobs: Vec<AuditJob>,
    pub config: CampaignConfig,
    pub usage: CampaignUsage,
    pub stats: Option<CampaignStats>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Build a `pending` campaign with every job `pending`.
    pub fn new(tenant_id: TenantId, new: NewCampaign) -> Self {
        let now = Utc::now();
        let jobs: Vec<AuditJob> = new.jobs.into_iter().map(AuditJob::pending).collect();
        Self {
            id: CampaignId::new(),
            tenant_id,
            name: new.name,
            description: new.description,
            parameter_set_id: new.parameter_set_id,
            status: CampaignStatus::Pending,
            total_jobs: jobs.len() as u32,
            completed_jobs: 0,
            failed_jobs: 0,
            processing_jobs: 0,
            jobs,
            config: new.config.unwrap_or_default(),
            usage: CampaignUsage::default(),
            stats: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn job(&self, index: usize) -> DomainResult<&AuditJob> {
        self.jobs
            .get(index)
            .ok_or_else(|| DomainError::not_found(format!("job {index} in campaign {}", self.id)))
    }

    fn job_mut(&mut self, index: usize) -> DomainResult<&mut AuditJob> {
        let id = self.id;
        self.jobs
            .get_mut(index)
            .ok_or_else(|| DomainError::not_found(format!("job {index} in campaign {id}")))
    }

    /// Every job reached `completed` or `failed`.
    pub fn is_settled(&self) -> bool {
        self.completed_jobs + self.failed_jobs >= self.total_jobs
    }

    pub fn unqueued_jobs(&self) -> Vec<usize> {
        self.jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.is_unqueued())
            .map(|(i, _)| i)
            .collect()
    }

    /// Move the campaign to `to`, stamping `started_at` / `completed_at`.
    pub fn set_status(&mut self, to: CampaignStatus, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status == to {
            return Ok(());
        }
        if !self.status.can_transition_to(to) {
            return Err(DomainError::invalid_state(format!(
                "campaign {} cannot move from {} to {}",
                self.id, self.status, to
            )));
        }

        if to == CampaignStatus::Processing {
            if self.started_at.is_none() {
                self.started_at = Some(now);
            }
            if self.status.is_finished() {
                self.completed_at = None;
                self.stats = None;
            }
        }
        if to.is_terminal() {
            self.completed_at = Some(now);
        }

        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Operator cancel: unconditional and idempotent.
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        if self.status != CampaignStatus::Cancelled {
            self.status = CampaignStatus::Cancelled;
            self.completed_at = Some(now);
        }
        self.updated_at = now;
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != CampaignStatus::Processing {
            return Err(DomainError::invalid_state(format!(
                "only a processing campaign can be paused (status: {})",
                self.status
            )));
        }
        self.set_status(CampaignStatus::Paused, now)
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != CampaignStatus::Paused {
            return Err(DomainError::invalid_state(format!(
                "only a paused campaign can be resumed (status: {})",
                self.status
            )));
        }
        self.set_status(CampaignStatus::Processing, now)
    }

    /// Append one job; reopens a finished campaign.
    pub fn append_job(&mut self, new: NewJob, now: DateTime<Utc>) -> DomainResult<usize> {
        new.validate()?;
        if self.status == CampaignStatus::Cancelled {
            return Err(DomainError::invalid_state(format!(
                "campaign {} is cancelled",
                self.id
            )));
        }

        if self.status.is_finished() {
            self.set_status(CampaignStatus::Processing, now)?;
        }

        self.jobs.push(AuditJob::pending(new));
        self.total_jobs += 1;
        self.updated_at = now;
        Ok(self.jobs.len() - 1)
    }

    pub fn mark_queued(&mut self, indices: &[usize], now: DateTime<Utc>) {
        for &i in indices {
            if let Some(job) = self.jobs.get_mut(i) {
                if job.status == JobStatus::Pending {
                    job.queued_at = Some(now);
                }
            }
        }
        self.updated_at = now;
    }

    /// `pending -> processing`. A job already `processing` is a retry attempt.
    pub fn start_job(&mut self, index: usize, now: DateTime<Utc>) -> DomainResult<Transition> {
        let job = self.job_mut(index)?;
        match job.status {
            JobStatus::Pending => {
                job.status = JobStatus::Processing;
                job.started_at = Some(now);
                self.processing_jobs += 1;
                self.updated_at = now;
                Ok(Transition::Applied)
            }
            JobStatus::Processing => Ok(Transition::Unchanged),
            status => Err(DomainError::invalid_state(format!(
                "job {index} is already {status}"
            ))),
        }
    }

    /// `processing -> completed`. Replaying a completed job is a no-op.
    pub fn complete_job(
        &mut self,
        index: usize,
        audit_id: auditflow_core::AuditId,
        now: DateTime<Utc>,
    ) -> DomainResult<Transition> {
        let job = self.job_mut(index)?;
        let was = job.status;
        match was {
            JobStatus::Completed => return Ok(Transition::Unchanged),
            JobStatus::Failed => {
                return Err(DomainError::invalid_state(format!(
                    "job {index} already failed permanently"
                )));
            }
            JobStatus::Pending | JobStatus::Processing => {}
        }

        job.status = JobStatus::Completed;
        job.audit_id = Some(audit_id);
        job.error = None;
        job.finished_at = Some(now);

        if was == JobStatus::Processing {
            self.processing_jobs = self.processing_jobs.saturating_sub(1);
        }
        self.completed_jobs += 1;
        self.updated_at = now;
        Ok(Transition::Applied)
    }

    /// `processing -> failed` (permanent). Replaying a failed job is a no-op.
    pub fn fail_job(
        &mut self,
        index: usize,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Transition> {
        let job = self.job_mut(index)?;
        let was = job.status;
        match was {
            JobStatus::Failed => return Ok(Transition::Unchanged),
            JobStatus::Completed => {
                return Err(DomainError::invalid_state(format!(
                    "job {index} already completed"
                )));
            }
            JobStatus::Pending | JobStatus::Processing => {}
        }

        job.status = JobStatus::Failed;
        job.error = Some(error.into());
        job.finished_at = Some(now);

        if was == JobStatus::Processing {
            self.processing_jobs = self.processing_jobs.saturating_sub(1);
        }
        self.failed_jobs += 1;
        self.updated_at = now;
        Ok(Transition::Applied)
    }

    /// Reset every failed job to `pending` and reopen the campaign.
    ///
    /// Returns the indices that were reset (empty = nothing to retry, no change).
    pub fn reset_failed_jobs(&mut self, now: DateTime<Utc>) -> DomainResult<Vec<usize>> {
        let failed: Vec<usize> = self
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.status == JobStatus::Failed)
            .map(|(i, _)| i)
            .collect();

        if failed.is_empty() {
            return Ok(failed);
        }
        self.reopen_for_retry(now)?;
        for &i in &failed {
            self.reset_job(i);
        }
        self.updated_at = now;
        Ok(failed)
    }

    /// Reset one failed job to `pending` and reopen the campaign.
    pub fn reset_failed_job(&mut self, index: usize, now: DateTime<Utc>) -> DomainResult<()> {
        let status = self.job(index)?.status;
        if status != JobStatus::Failed {
            return Err(DomainError::invalid_state(format!(
                "job {index} is {status}, only failed jobs can be retried"
            )));
        }
        self.reopen_for_retry(now)?;
        self.reset_job(index);
        self.updated_at = now;
        Ok(())
    }

    fn reopen_for_retry(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status == CampaignStatus::Cancelled {
            return Err(DomainError::invalid_state(format!(
                "campaign {} is cancelled",
                self.id
            )));
        }
        // A paused campaign stays paused; everything else goes back to processing.
        if self.status != CampaignStatus::Paused {
            self.set_status(CampaignStatus::Processing, now)?;
        }
        Ok(())
    }

    fn reset_job(&mut self, index: usize) {
        if let Some(job) = self.jobs.get_mut(index) {
            job.status = JobStatus::Pending;
            job.error = None;
            job.audit_id = None;
            job.queued_at = None;
            job.started_at = None;
            job.finished_at = None;
            self.failed_jobs = self.failed_jobs.saturating_sub(1);
        }
    }

    /// Completion check.
    ///
    /// Once every job settled, writes `stats`, stamps `completed_at`, and moves the
    /// campaign to `failed` if every job failed, otherwise `completed`.
    /// Returns the final status, or `None` if nothing changed.
    pub fn finalize(&mut self, stats: CampaignStats, now: DateTime<Utc>) -> Option<CampaignStatus> {
        if self.status.is_terminal() || !self.is_settled() {
            return None;
        }

        let outcome = if self.total_jobs > 0 && self.failed_jobs >= self.total_jobs {
            CampaignStatus::Failed
        } else {
            CampaignStatus::Completed
        };

        self.set_status(outcome, now).ok()?;
        self.stats = Some(stats);
        Some(outcome)
    }

    /// Stats over the records of jobs that actually completed.
    ///
    /// A record is counted only if its job is `completed` and points at it through
    /// `audit_id`. Records left behind by a job that later failed permanently, or
    /// by another campaign, are ignored.
    pub fn stats_from(&self, records: &[AuditRecord]) -> CampaignStats {
        let counted: Vec<AuditRecord> = records
            .iter()
            .filter(|r| r.campaign_id == self.id)
            .filter(|r| {
                self.jobs
                    .get(r.job_index)
                    .is_some_and(|j| j.status == JobStatus::Completed && j.audit_id == Some(r.id))
            })
            .cloned()
            .collect();
        CampaignStats::from_records(&counted)
    }

    /// Reserve a start slot under `config.rpm`.
    ///
    /// Returns `None` when the job may start now (and records the start), or the
    /// remaining wait otherwise.
    pub fn reserve_start_slot(&mut self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        if let (Some(interval), Some(last)) =
            (self.config.min_start_interval(), self.usage.last_job_started_at)
        {
            let next = last + interval;
            if next > now {
                let wait = (next - now).to_std().unwrap_or_default();
                return Some(wait);
            }
        }
        self.usage.last_job_started_at = Some(now);
        None
    }

    /// Permanent failures reached `config.failure_threshold` percent of all jobs.
    pub fn exceeds_failure_threshold(&self) -> bool {
        let threshold = u32::from(self.config.failure_threshold);
        if threshold >= 100 || self.total_jobs == 0 {
            return false;
        }
        self.failed_jobs * 100 >= threshold * self.total_jobs
    }

    /// Check counters against the embedded jobs.
    pub fn check_invariants(&self) -> DomainResult<()> {
        let count = |s: JobStatus| self.jobs.iter().filter(|j| j.status == s).count() as u32;

        if self.total_jobs as usize != self.jobs.len() {
            return Err(DomainError::invariant(format!(
                "totalJobs {} != {} embedded jobs",
                self.total_jobs,
                self.jobs.len()
            )));
        }
        if self.completed_jobs + self.failed_jobs + self.processing_jobs > self.total_jobs {
            return Err(DomainError::invariant(
                "completed + failed + processing exceeds totalJobs",
            ));
        }
        for (status, counter) in [
            (JobStatus::Completed, self.completed_jobs),
            (JobStatus::Failed, self.failed_jobs),
            (JobStatus::Processing, self.processing_jobs),
        ] {
            if count(status) != counter {
                return Err(DomainError::invariant(format!(
                    "{status} counter {counter} != {} jobs",
                    count(status)
                )));
            }
        }
        if self.status.is_finished() && self.completed_jobs + self.failed_jobs != self.total_jobs {
            return Err(DomainError::invariant(
                "finished campaign with unsettled jobs",
            ));
        }
        Ok(())
    }
}

/// Filter for campaign listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignFilter {
    pub tenant_id: Option<TenantId>,
    pub status: Option<CampaignStatus>,
    pub parameter_set_id: Option<ParameterSetId>,
    /// Case-insensitive substring match on the name.
    pub search: Option<String>,
}

impl CampaignFilter {
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: CampaignStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, c: &Campaign) -> bool {
        self.tenant_id.is_none_or(|t| c.tenant_id == t)
            && self.status.is_none_or(|s| c.status == s)
            && self.parameter_set_id.is_none_or(|p| c.parameter_set_id == p)
            && self.search.as_ref().is_none_or(|q| {
                c.name.to_lowercase().contains(&q.to_lowercase())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditflow_core::AuditId;
    use proptest::prelude::*;

    fn campaign(jobs: usize) -> Campaign {
        let jobs = (0..jobs)
            .map(|i| NewJob::new(format!("https://cdn.example.com/calls/{i}.mp3")))
            .collect();
        Campaign::new(
            TenantId::new(),
            NewCampaign::new("Q3 inbound", ParameterSetId::new(), jobs),
        )
    }

    fn processing(jobs: usize) -> Campaign {
        let mut c = campaign(jobs);
        c.set_status(CampaignStatus::Processing, Utc::now()).unwrap();
        c
    }

    #[test]
    fn new_campaign_is_pending_with_pending_jobs() {
        let c = campaign(2);
        assert_eq!(c.status, CampaignStatus::Pending);
        assert_eq!(c.total_jobs, 2);
        assert_eq!(c.completed_jobs, 0);
        assert!(c.jobs.iter().all(|j| j.status == JobStatus::Pending));
        assert!(c.started_at.is_none());
        c.check_invariants().unwrap();
    }

    #[test]
    fn validate_rejects_oversized_batch() {
        let jobs = (0..4).map(|i| NewJob::new(format!("a{i}.wav"))).collect();
        let new = NewCampaign::new("big", ParameterSetId::new(), jobs);
        assert!(new.validate(4).is_ok());
        assert!(matches!(new.validate(3), Err(DomainError::Validation(_))));
    }

    #[test]
    fn validate_rejects_blank_audio_url_and_bad_threshold() {
        let new = NewCampaign::new("x", ParameterSetId::new(), vec![NewJob::new("  ")]);
        assert!(matches!(new.validate(10), Err(DomainError::Validation(_))));

        let new = NewCampaign::new("x", ParameterSetId::new(), vec![NewJob::new("a.wav")])
            .with_config(CampaignConfig {
                rpm: 10,
                failure_threshold: 0,
            });
        assert!(matches!(new.validate(10), Err(DomainError::Validation(_))));
    }

    #[test]
    fn processing_stamps_started_at_once() {
        let mut c = campaign(1);
        let t0 = Utc::now();
        c.set_status(CampaignStatus::Processing, t0).unwrap();
        c.pause(t0 + chrono::Duration::seconds(1)).unwrap();
        c.resume(t0 + chrono::Duration::seconds(2)).unwrap();
        assert_eq!(c.started_at, Some(t0));
    }

    #[test]
    fn job_lifecycle_adjusts_counters() {
        let mut c = processing(2);
        let now = Utc::now();

        assert_eq!(c.start_job(0, now).unwrap(), Transition::Applied);
        assert_eq!(c.processing_jobs, 1);
        // Retry attempt of the same job does not double count.
        assert_eq!(c.start_job(0, now).unwrap(), Transition::Unchanged);
        assert_eq!(c.processing_jobs, 1);

        assert_eq!(c.complete_job(0, AuditId::new(), now).unwrap(), Transition::Applied);
        assert_eq!((c.processing_jobs, c.completed_jobs), (0, 1));
        assert!(c.jobs[0].audit_id.is_some());

        c.start_job(1, now).unwrap();
        c.fail_job(1, "transcription timed out", now).unwrap();
        assert_eq!((c.processing_jobs, c.failed_jobs), (0, 1));
        assert_eq!(c.jobs[1].error.as_deref(), Some("transcription timed out"));
        c.check_invariants().unwrap();
    }

    #[test]
    fn replayed_completion_is_a_no_op() {
        let mut c = processing(1);
        let now = Utc::now();
        c.start_job(0, now).unwrap();
        let first = AuditId::new();
        c.complete_job(0, first, now).unwrap();

        assert_eq!(c.complete_job(0, AuditId::new(), now).unwrap(), Transition::Unchanged);
        assert_eq!(c.completed_jobs, 1);
        assert_eq!(c.jobs[0].audit_id, Some(first));
        assert!(c.start_job(0, now).is_err());
    }

    #[test]
    fn unknown_job_index_is_not_found() {
        let mut c = processing(1);
        assert!(matches!(c.start_job(7, Utc::now()), Err(DomainError::NotFound(_))));
        assert!(matches!(c.reset_failed_job(7, Utc::now()), Err(DomainError::NotFound(_))));
    }

    #[test]
    fn partial_success_completes() {
        let mut c = processing(5);
        let now = Utc::now();
        for i in 0..3 {
            c.start_job(i, now).unwrap();
            c.complete_job(i, AuditId::new(), now).unwrap();
        }
        c.start_job(3, now).unwrap();
        c.fail_job(3, "boom", now).unwrap();
        assert_eq!(c.finalize(CampaignStats::default(), now), None);

        c.start_job(4, now).unwrap();
        c.fail_job(4, "boom", now).unwrap();
        assert_eq!(c.finalize(CampaignStats::default(), now), Some(CampaignStatus::Completed));
        assert!(c.completed_at.is_some());
        assert!(c.stats.is_some());
        c.check_invariants().unwrap();
    }

    #[test]
    fn all_failed_fails() {
        let mut c = processing(5);
        let now = Utc::now();
        for i in 0..5 {
            c.start_job(i, now).unwrap();
            c.fail_job(i, "boom", now).unwrap();
        }
        assert_eq!(c.finalize(CampaignStats::default(), now), Some(CampaignStatus::Failed));
    }

    #[test]
    fn cancelled_campaign_is_never_finalized() {
        let mut c = processing(1);
        let now = Utc::now();
        c.start_job(0, now).unwrap();
        c.cancel(now);
        c.complete_job(0, AuditId::new(), now).unwrap();
        assert_eq!(c.finalize(CampaignStats::default(), now), None);
        assert_eq!(c.status, CampaignStatus::Cancelled);
    }

    #[test]
    fn stats_ignore_records_of_failed_jobs() {
        let now = Utc::now();
        let mut c = processing(2);
        let record = |c: &Campaign, index: usize, score: f64| {
            AuditRecord::from_audit(
                c.tenant_id,
                c.id,
                index,
                c.parameter_set_id,
                &c.jobs[index],
                "en",
                auditflow_ai::CallAudit {
                    overall_score: score,
                    audit_results: vec![],
                    sentiment: auditflow_ai::Sentiment::Neutral,
                    token_usage: auditflow_ai::TokenUsage::new(100, 0),
                    call_summary: None,
                },
                1000,
            )
        };

        let kept = record(&c, 0, 92.0);
        c.start_job(0, now).unwrap();
        c.complete_job(0, kept.id, now).unwrap();

        // Scored and persisted, but the job ended up failing.
        let orphan = record(&c, 1, 10.0);
        c.start_job(1, now).unwrap();
        c.fail_job(1, "store unavailable", now).unwrap();

        let stats = c.stats_from(&[kept, orphan]);
        assert_eq!(stats.audited_calls, c.completed_jobs);
        assert_eq!(stats.avg_score, 92.0);
        assert_eq!(stats.total_tokens, 100);
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut c = processing(1);
        let now = Utc::now();
        c.start_job(0, now).unwrap();
        c.complete_job(0, AuditId::new(), now).unwrap();
        assert!(c.finalize(CampaignStats::default(), now).is_some());
        assert_eq!(c.finalize(CampaignStats::default(), now), None);
    }

    #[test]
    fn retry_resets_failed_jobs_and_reopens() {
        let mut c = processing(3);
        let now = Utc::now();
        c.start_job(0, now).unwrap();
        c.complete_job(0, AuditId::new(), now).unwrap();
        for i in 1..3 {
            c.start_job(i, now).unwrap();
            c.fail_job(i, "boom", now).unwrap();
        }
        c.finalize(CampaignStats::default(), now).unwrap();

        let reset = c.reset_failed_jobs(now).unwrap();
        assert_eq!(reset, vec![1, 2]);
        assert_eq!(c.status, CampaignStatus::Processing);
        assert_eq!(c.failed_jobs, 0);
        assert!(c.completed_at.is_none());
        assert!(c.stats.is_none());
        assert!(c.jobs[1].error.is_none());
        c.check_invariants().unwrap();
    }

    #[test]
    fn retry_with_nothing_failed_changes_nothing() {
        let mut c = processing(1);
        let now = Utc::now();
        c.start_job(0, now).unwrap();
        c.complete_job(0, AuditId::new(), now).unwrap();
        c.finalize(CampaignStats::default(), now).unwrap();

        assert!(c.reset_failed_jobs(now).unwrap().is_empty());
        assert_eq!(c.status, CampaignStatus::Completed);
    }

    #[test]
    fn retry_single_job_requires_failed_state() {
        let mut c = processing(2);
        let now = Utc::now();
        assert!(matches!(c.reset_failed_job(0, now), Err(DomainError::InvalidState(_))));

        c.start_job(1, now).unwrap();
        c.fail_job(1, "boom", now).unwrap();
        c.reset_failed_job(1, now).unwrap();
        assert_eq!(c.jobs[1].status, JobStatus::Pending);
        assert_eq!(c.failed_jobs, 0);
    }

    #[test]
    fn append_job_reopens_finished_campaign() {
        let mut c = processing(1);
        let now = Utc::now();
        c.start_job(0, now).unwrap();
        c.complete_job(0, AuditId::new(), now).unwrap();
        c.finalize(CampaignStats::default(), now).unwrap();

        let idx = c.append_job(NewJob::new("late.wav").with_agent("Dana"), now).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(c.total_jobs, 2);
        assert_eq!(c.status, CampaignStatus::Processing);
        assert!(c.completed_at.is_none());
        c.check_invariants().unwrap();
    }

    #[test]
    fn append_job_to_cancelled_campaign_is_rejected() {
        let mut c = processing(1);
        c.cancel(Utc::now());
        assert!(matches!(
            c.append_job(NewJob::new("late.wav"), Utc::now()),
            Err(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn rate_limit_spaces_job_starts() {
        let mut c = processing(3);
        c.config.rpm = 30; // one start every 2s
        let t0 = Utc::now();

        assert_eq!(c.reserve_start_slot(t0), None);
        let wait = c.reserve_start_slot(t0 + chrono::Duration::milliseconds(500)).unwrap();
        assert_eq!(wait, std::time::Duration::from_millis(1500));
        assert_eq!(c.reserve_start_slot(t0 + chrono::Duration::seconds(2)), None);
    }

    #[test]
    fn unlimited_rpm_never_waits() {
        let mut c = processing(1);
        let now = Utc::now();
        assert_eq!(c.reserve_start_slot(now), None);
        assert_eq!(c.reserve_start_slot(now), None);
    }

    #[test]
    fn failure_threshold() {
        let mut c = processing(10);
        c.config.failure_threshold = 20;
        let now = Utc::now();
        c.start_job(0, now).unwrap();
        c.fail_job(0, "boom", now).unwrap();
        assert!(!c.exceeds_failure_threshold());
        c.start_job(1, now).unwrap();
        c.fail_job(1, "boom", now).unwrap();
        assert!(c.exceeds_failure_threshold());

        c.config.failure_threshold = 100;
        assert!(!c.exceeds_failure_threshold());
    }

    #[test]
    fn filter_matches_tenant_status_and_name() {
        let c = processing(1);
        assert!(CampaignFilter::for_tenant(c.tenant_id).matches(&c));
        assert!(!CampaignFilter::for_tenant(TenantId::new()).matches(&c));
        assert!(CampaignFilter::default().with_status(CampaignStatus::Processing).matches(&c));
        let search = CampaignFilter {
            search: Some("INBOUND".to_string()),
            ..Default::default()
        };
        assert!(search.matches(&c));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Start(usize),
        Complete(usize),
        Fail(usize),
        RetryAll,
        RetryOne(usize),
        Append,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..8).prop_map(Op::Start),
            (0usize..8).prop_map(Op::Complete),
            (0usize..8).prop_map(Op::Fail),
            Just(Op::RetryAll),
            (0usize..8).prop_map(Op::RetryOne),
            Just(Op::Append),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever sequence of job transitions is applied (including
        /// redeliveries and illegal ones), counters always match the embedded jobs
        /// and a finished campaign has every job settled.
        #[test]
        fn counters_always_match_jobs(ops in prop::collection::vec(op(), 1..60)) {
            let mut c = processing(4);
            let now = Utc::now();

            for op in ops {
                let _ = match op {
                    Op::Start(i) => c.start_job(i, now).map(|_| ()),
                    Op::Complete(i) => c.complete_job(i, AuditId::new(), now).map(|_| ()),
                    Op::Fail(i) => c.fail_job(i, "boom", now).map(|_| ()),
                    Op::RetryAll => c.reset_failed_jobs(now).map(|_| ()),
                    Op::RetryOne(i) => c.reset_failed_job(i, now),
                    Op::Append => c.append_job(NewJob::new("extra.wav"), now).map(|_| ()),
                };
                c.finalize(CampaignStats::default(), now);

                prop_assert!(c.check_invariants().is_ok(), "{:?}", c.check_invariants());
                prop_assert!(c.completed_jobs + c.failed_jobs + c.processing_jobs <= c.total_jobs);
            }
        }
    }
}
