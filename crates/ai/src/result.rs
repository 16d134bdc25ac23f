use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Score awarded for a single rubric criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionScore {
    pub parameter_id: String,
    pub parameter_name: String,
    /// Score in \[0, 100\].
    pub score: f64,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Overall caller sentiment detected by the scoring model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

/// Tokens consumed by one scoring call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Result of scoring one call transcript against a parameter set.
///
/// This is an insight, not campaign state: the worker persists it as an audit
/// record and only then moves the job to `completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAudit {
    /// Weighted overall score in \[0, 100\].
    pub overall_score: f64,
    pub audit_results: Vec<CriterionScore>,
    pub sentiment: Sentiment,
    pub token_usage: TokenUsage,
    #[serde(default)]
    pub call_summary: Option<String>,
}

impl CallAudit {
    /// Reject payloads that decoded but are not usable scores.
    pub fn validate(&self) -> Result<(), AiError> {
        if !is_score(self.overall_score) {
            return Err(AiError::MalformedResponse(format!(
                "overallScore {} is outside 0..=100",
                self.overall_score
            )));
        }

        if self.audit_results.is_empty() {
            return Err(AiError::MalformedResponse(
                "auditResults must not be empty".to_string(),
            ));
        }

        for r in &self.audit_results {
            if !is_score(r.score) {
                return Err(AiError::MalformedResponse(format!(
                    "score {} for parameter '{}' is outside 0..=100",
                    r.score, r.parameter_id
                )));
            }
        }

        Ok(())
    }
}

fn is_score(v: f64) -> bool {
    v.is_finite() && (0.0..=100.0).contains(&v)
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audit(score: f64) -> CallAudit {
        CallAudit {
            overall_score: score,
            audit_results: vec![CriterionScore {
                parameter_id: "greeting".to_string(),
                parameter_name: "Greeting".to_string(),
                score,
                comment: None,
            }],
            sentiment: Sentiment::Neutral,
            token_usage: TokenUsage::new(100, 20),
            call_summary: None,
        }
    }

    #[test]
    fn valid_audit_passes() {
        assert!(audit(87.5).validate().is_ok());
    }

    #[test]
    fn out_of_range_score_is_rejected() {
        assert!(matches!(audit(140.0).validate(), Err(AiError::MalformedResponse(_))));
        assert!(matches!(audit(f64::NAN).validate(), Err(AiError::MalformedResponse(_))));
    }

    #[test]
    fn empty_breakdown_is_rejected() {
        let mut a = audit(50.0);
        a.audit_results.clear();
        assert!(matches!(a.validate(), Err(AiError::MalformedResponse(_))));
    }

    #[test]
    fn decodes_camel_case_payload() {
        let payload = serde_json::json!({
            "overallScore": 72.0,
            "auditResults": [
                {"parameterId": "empathy", "parameterName": "Empathy", "score": 72.0}
            ],
            "sentiment": "positive",
            "tokenUsage": {"promptTokens": 900, "completionTokens": 100, "totalTokens": 1000},
            "callSummary": "Customer asked about a refund."
        });

        let audit: CallAudit = serde_json::from_value(payload).unwrap();
        assert_eq!(audit.sentiment, Sentiment::Positive);
        assert_eq!(audit.token_usage.total_tokens, 1000);
        assert!(audit.validate().is_ok());
    }

    #[test]
    fn missing_required_field_fails_to_decode() {
        let payload = serde_json::json!({
            "overallScore": 72.0,
            "sentiment": "positive",
            "tokenUsage": {"promptTokens": 1, "completionTokens": 1, "totalTokens": 2}
        });
        assert!(serde_json::from_value::<CallAudit>(payload).is_err());
    }
}
