//! Campaign mutations as data.
//!
//! Stores receive a [`CampaignCommand`], take exclusive access to one campaign
//! (a mutex for the in-memory store, a row lock for Postgres), run
//! [`Campaign::execute`], and persist the result. This is the only write path for
//! counters and status, so concurrent workers cannot lose updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use auditflow_core::{AuditId, DomainResult};

use crate::campaign::{Campaign, CampaignConfig, Transition};
use crate::job::NewJob;
use crate::record::CampaignStats;
use crate::status::CampaignStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CampaignCommand {
    SetStatus { status: CampaignStatus },
    Cancel,
    Pause,
    Resume,
    UpdateConfig { config: CampaignConfig },
    AppendJob { job: NewJob },
    MarkQueued { indices: Vec<usize> },
    StartJob { index: usize },
    CompleteJob { index: usize, audit_id: AuditId },
    FailJob { index: usize, error: String },
    ResetFailedJobs,
    ResetFailedJob { index: usize },
    ReserveStartSlot,
    Finalize { stats: CampaignStats },
}

impl CampaignCommand {
    pub fn name(&self) -> &'static str {
        match self {
            CampaignCommand::SetStatus { .. } => "set_status",
            CampaignCommand::Cancel => "cancel",
            CampaignCommand::Pause => "pause",
            CampaignCommand::Resume => "resume",
            CampaignCommand::UpdateConfig { .. } => "update_config",
            CampaignCommand::AppendJob { .. } => "append_job",
            CampaignCommand::MarkQueued { .. } => "mark_queued",
            CampaignCommand::StartJob { .. } => "start_job",
            CampaignCommand::CompleteJob { .. } => "complete_job",
            CampaignCommand::FailJob { .. } => "fail_job",
            CampaignCommand::ResetFailedJobs => "reset_failed_jobs",
            CampaignCommand::ResetFailedJob { .. } => "reset_failed_job",
            CampaignCommand::ReserveStartSlot => "reserve_start_slot",
            CampaignCommand::Finalize { .. } => "finalize",
        }
    }
}

/// What a command did, beyond the updated campaign itself.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Done,
    Job(Transition),
    Appended(usize),
    Reset(Vec<usize>),
    /// `Some(wait)` when the rate limiter refused the start slot.
    StartSlot(Option<std::time::Duration>),
    Finalized(Option<CampaignStatus>),
}

impl Campaign {
    pub fn execute(
        &mut self,
        command: CampaignCommand,
        now: DateTime<Utc>,
    ) -> DomainResult<CommandOutcome> {
        match command {
            CampaignCommand::SetStatus { status } => {
                self.set_status(status, now).map(|_| CommandOutcome::Done)
            }
            CampaignCommand::Cancel => {
                self.cancel(now);
                Ok(CommandOutcome::Done)
            }
            CampaignCommand::Pause => self.pause(now).map(|_| CommandOutcome::Done),
            CampaignCommand::Resume => self.resume(now).map(|_| CommandOutcome::Done),
            CampaignCommand::UpdateConfig { config } => {
                config.validate()?;
                self.config = config;
                self.updated_at = now;
                Ok(CommandOutcome::Done)
            }
            CampaignCommand::AppendJob { job } => {
                self.append_job(job, now).map(CommandOutcome::Appended)
            }
            CampaignCommand::MarkQueued { indices } => {
                self.mark_queued(&indices, now);
                Ok(CommandOutcome::Done)
            }
            CampaignCommand::StartJob { index } => self.start_job(index, now).map(CommandOutcome::Job),
            CampaignCommand::CompleteJob { index, audit_id } => {
                self.complete_job(index, audit_id, now).map(CommandOutcome::Job)
            }
            CampaignCommand::FailJob { index, error } => {
                self.fail_job(index, error, now).map(CommandOutcome::Job)
            }
            CampaignCommand::ResetFailedJobs => self.reset_failed_jobs(now).map(CommandOutcome::Reset),
            CampaignCommand::ResetFailedJob { index } => self
                .reset_failed_job(index, now)
                .map(|_| CommandOutcome::Reset(vec![index])),
            CampaignCommand::ReserveStartSlot => {
                Ok(CommandOutcome::StartSlot(self.reserve_start_slot(now)))
            }
            CampaignCommand::Finalize { stats } => {
                Ok(CommandOutcome::Finalized(self.finalize(stats, now)))
            }
        }
    }
}
