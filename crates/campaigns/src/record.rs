use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use auditflow_ai::{CallAudit, CriterionScore, Sentiment, TokenUsage};
use auditflow_core::{AuditId, CampaignId, ParameterSetId, TenantId};

/// Persisted scoring result for one campaign job.
///
/// Keyed by `(campaign_id, job_index)`: persisting the same job twice replaces
/// the earlier record instead of adding a second one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: AuditId,
    pub tenant_id: TenantId,
    pub campaign_id: CampaignId,
    pub job_index: usize,
    pub parameter_set_id: ParameterSetId,
    pub audio_url: String,
    pub agent_name: Option<String>,
    pub call_id: Option<String>,
    pub language: String,
    pub overall_score: f64,
    pub audit_results: Vec<CriterionScore>,
    pub sentiment: Sentiment,
    pub token_usage: TokenUsage,
    pub call_summary: Option<String>,
    /// Wall-clock time spent transcribing and scoring.
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn from_audit(
        tenant_id: TenantId,
        campaign_id: CampaignId,
        job_index: usize,
        parameter_set_id: ParameterSetId,
        job: &crate::job::AuditJob,
        language: impl Into<String>,
        audit: CallAudit,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: AuditId::new(),
            tenant_id,
            campaign_id,
            job_index,
            parameter_set_id,
            audio_url: job.audio_url.clone(),
            agent_name: job.agent_name.clone(),
            call_id: job.call_id.clone(),
            language: language.into(),
            overall_score: audit.overall_score,
            audit_results: audit.audit_results,
            sentiment: audit.sentiment,
            token_usage: audit.token_usage,
            call_summary: audit.call_summary,
            duration_ms,
            created_at: Utc::now(),
        }
    }
}

/// Aggregate statistics written once a campaign settles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStats {
    /// Number of audit records the averages were computed from.
    pub audited_calls: u32,
    /// Arithmetic mean of `overall_score`; 0 when nothing completed.
    pub avg_score: f64,
    pub total_tokens: u64,
    /// Arithmetic mean of `duration_ms`; 0 when nothing completed.
    pub avg_duration_ms: f64,
}

impl CampaignStats {
    /// Compute stats from the final list of persisted records.
    ///
    /// Records are deduplicated by job index so a redelivered job that was
    /// persisted twice is only counted once.
    pub fn from_records(records: &[AuditRecord]) -> Self {
        let mut latest: std::collections::BTreeMap<usize, &AuditRecord> = Default::default();
        for r in records {
            match latest.get(&r.job_index) {
                Some(prev) if prev.created_at > r.created_at => {}
                _ => {
                    latest.insert(r.job_index, r);
                }
            }
        }

        if latest.is_empty() {
            return Self::default();
        }

        let n = latest.len() as f64;
        let score_sum: f64 = latest.values().map(|r| r.overall_score).sum();
        let duration_sum: f64 = latest.values().map(|r| r.duration_ms as f64).sum();
        let total_tokens = latest.values().map(|r| r.token_usage.total_tokens).sum();

        Self {
            audited_calls: latest.len() as u32,
            avg_score: score_sum / n,
            total_tokens,
            avg_duration_ms: duration_sum / n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{AuditJob, NewJob};

    fn record(job_index: usize, score: f64, tokens: u64, duration_ms: u64) -> AuditRecord {
        let job = AuditJob::pending(NewJob::new(format!("s3://calls/{job_index}.wav")));
        AuditRecord::from_audit(
            TenantId::new(),
            CampaignId::new(),
            job_index,
            ParameterSetId::new(),
            &job,
            "en",
            CallAudit {
                overall_score: score,
                audit_results: vec![],
                sentiment: Sentiment::Neutral,
                token_usage: TokenUsage::new(tokens, 0),
                call_summary: None,
            },
            duration_ms,
        )
    }

    #[test]
    fn empty_records_give_zero_stats() {
        assert_eq!(CampaignStats::from_records(&[]), CampaignStats::default());
    }

    #[test]
    fn averages_over_completed_jobs() {
        let stats = CampaignStats::from_records(&[
            record(0, 80.0, 1000, 2000),
            record(1, 60.0, 500, 4000),
        ]);
        assert_eq!(stats.audited_calls, 2);
        assert_eq!(stats.avg_score, 70.0);
        assert_eq!(stats.total_tokens, 1500);
        assert_eq!(stats.avg_duration_ms, 3000.0);
    }

    #[test]
    fn duplicate_job_records_count_once() {
        let first = record(0, 80.0, 1000, 2000);
        let mut replay = first.clone();
        replay.id = AuditId::new();

        let stats = CampaignStats::from_records(&[first, replay, record(1, 40.0, 10, 10)]);
        assert_eq!(stats.audited_calls, 2);
        assert_eq!(stats.avg_score, 60.0);
        assert_eq!(stats.total_tokens, 1010);
    }
}
