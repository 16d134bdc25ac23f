//! Side-effect collaborators of the job pipeline.
//!
//! Usage reporting and audio cleanup are best-effort: the pipeline logs their
//! failures and never lets them change a job's outcome.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use auditflow_ai::TokenUsage;
use auditflow_core::{AuditId, CampaignId, TenantId};

pub mod http;
pub mod storage;

pub use http::{HttpCallAuditor, HttpTranscriber, HttpUsageReporter};
pub use storage::LocalAudioStorage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("collaborator returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("io error: {0}")]
    Io(String),

    #[error("refusing to touch '{0}'")]
    Rejected(String),
}

/// Billing metrics for one completed audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditUsage {
    pub tenant_id: TenantId,
    pub campaign_id: CampaignId,
    pub audit_id: AuditId,
    pub job_index: usize,
    pub duration_ms: u64,
    pub token_usage: TokenUsage,
}

#[async_trait]
pub trait UsageReporter: Send + Sync + 'static {
    async fn report_audit(&self, usage: AuditUsage) -> Result<(), ExternalError>;
}

/// Transient storage holding uploaded recordings until they are processed.
#[async_trait]
pub trait AudioStorage: Send + Sync + 'static {
    async fn delete(&self, audio_url: &str) -> Result<(), ExternalError>;
}

/// Records reports in memory.
#[derive(Debug, Default)]
pub struct InMemoryUsageReporter {
    reports: Mutex<Vec<AuditUsage>>,
}

impl InMemoryUsageReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<AuditUsage> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl UsageReporter for InMemoryUsageReporter {
    async fn report_audit(&self, usage: AuditUsage) -> Result<(), ExternalError> {
        self.reports
            .lock()
            .map_err(|_| ExternalError::Io("usage log poisoned".to_string()))?
            .push(usage);
        Ok(())
    }
}

/// Records deletions without touching anything.
#[derive(Debug, Default)]
pub struct InMemoryAudioStorage {
    deleted: Mutex<Vec<String>>,
}

impl InMemoryAudioStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AudioStorage for InMemoryAudioStorage {
    async fn delete(&self, audio_url: &str) -> Result<(), ExternalError> {
        self.deleted
            .lock()
            .map_err(|_| ExternalError::Io("deletion log poisoned".to_string()))?
            .push(audio_url.to_string());
        Ok(())
    }
}
