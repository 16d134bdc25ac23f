use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use auditflow_core::{AuditId, DomainError, DomainResult};

use crate::status::JobStatus;

/// Submission of one call recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub audio_url: String,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
}

impl NewJob {
    pub fn new(audio_url: impl Into<String>) -> Self {
        Self {
            audio_url: audio_url.into(),
            agent_name: None,
            call_id: None,
        }
    }

    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.audio_url.trim().is_empty() {
            return Err(DomainError::validation("audioUrl must not be empty"));
        }
        Ok(())
    }
}

/// One audio file's unit of work, embedded in a campaign.
///
/// Identified by its index in `Campaign::jobs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditJob {
    pub audio_url: String,
    pub agent_name: Option<String>,
    pub call_id: Option<String>,
    pub status: JobStatus,
    /// Last failure reason; cleared on retry.
    pub error: Option<String>,
    /// Persisted scoring result, set only when `completed`.
    pub audit_id: Option<AuditId>,
    /// When the job was last handed to the queue (unset while the broker is down).
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AuditJob {
    pub fn pending(new: NewJob) -> Self {
        Self {
            audio_url: new.audio_url,
            agent_name: new.agent_name,
            call_id: new.call_id,
            status: JobStatus::Pending,
            error: None,
            audit_id: None,
            queued_at: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_unqueued(&self) -> bool {
        self.status == JobStatus::Pending && self.queued_at.is_none()
    }
}
