//! JSON-over-HTTP clients for the transcription, scoring and usage services.

use async_trait::async_trait;
use serde::Serialize;

use auditflow_ai::{AiError, CallAudit, CallAuditor, ParameterSet, Transcriber, Transcript};

use super::{AuditUsage, ExternalError, UsageReporter};

/// `POST {base_url}/transcriptions` with `{ "audioUrl": ... }`.
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTranscriber {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: trim_base(base_url.into()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TranscriptionRequest<'a> {
    audio_url: &'a str,
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio_url: &str) -> Result<Transcript, AiError> {
        let url = format!("{}/transcriptions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&TranscriptionRequest { audio_url })
            .send()
            .await
            .map_err(|e| AiError::TranscriptionFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AiError::TranscriptionFailed(format!("{status}: {body}")));
        }

        let transcript: Transcript = resp
            .json()
            .await
            .map_err(|e| AiError::MalformedResponse(e.to_string()))?;
        if transcript.transcript.trim().is_empty() {
            return Err(AiError::MalformedResponse("empty transcript".to_string()));
        }
        Ok(transcript)
    }
}

/// `POST {base_url}/audits` with the transcript, rubric and language.
#[derive(Debug, Clone)]
pub struct HttpCallAuditor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCallAuditor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: trim_base(base_url.into()),
        }
    }
}

#[derive(Serialize)]
struct AuditRequest<'a> {
    transcript: &'a str,
    parameters: &'a ParameterSet,
    language: &'a str,
}

#[async_trait]
impl CallAuditor for HttpCallAuditor {
    async fn audit_call(
        &self,
        transcript: &str,
        parameters: &ParameterSet,
        language: &str,
    ) -> Result<CallAudit, AiError> {
        if parameters.parameters.is_empty() {
            return Err(AiError::InvalidInput(format!(
                "parameter set {} has no parameters",
                parameters.id
            )));
        }

        let url = format!("{}/audits", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&AuditRequest {
                transcript,
                parameters,
                language,
            })
            .send()
            .await
            .map_err(|e| AiError::InferenceFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AiError::InferenceFailed(format!("{status}: {body}")));
        }

        let audit: CallAudit = resp
            .json()
            .await
            .map_err(|e| AiError::MalformedResponse(e.to_string()))?;
        audit.validate()?;
        Ok(audit)
    }
}

/// `POST {base_url}/usage/audits` with [`AuditUsage`].
#[derive(Debug, Clone)]
pub struct HttpUsageReporter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUsageReporter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: trim_base(base_url.into()),
        }
    }
}

#[async_trait]
impl UsageReporter for HttpUsageReporter {
    async fn report_audit(&self, usage: AuditUsage) -> Result<(), ExternalError> {
        let url = format!("{}/usage/audits", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&usage)
            .send()
            .await
            .map_err(|e| ExternalError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ExternalError::Status {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

fn trim_base(mut base: String) -> String {
    while base.ends_with('/') {
        base.pop();
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditflow_core::TenantId;

    #[test]
    fn base_url_trailing_slashes_are_trimmed() {
        assert_eq!(trim_base("http://scoring:8080//".to_string()), "http://scoring:8080");
        assert_eq!(trim_base("http://scoring:8080".to_string()), "http://scoring:8080");
    }

    #[tokio::test]
    async fn empty_rubric_is_rejected_before_any_request() {
        let auditor = HttpCallAuditor::new("http://127.0.0.1:9");
        let empty = ParameterSet::new(TenantId::new(), "empty", vec![]);
        let err = auditor.audit_call("hello", &empty, "en").await.unwrap_err();
        assert!(matches!(err, AiError::InvalidInput(_)));
    }

    #[test]
    fn requests_use_wire_field_names() {
        let json = serde_json::to_value(TranscriptionRequest {
            audio_url: "https://cdn.example.com/a.mp3",
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"audioUrl": "https://cdn.example.com/a.mp3"}));
    }
}
