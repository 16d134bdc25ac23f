use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::parameter_set::ParameterSet;
use crate::result::{AiError, CallAudit};

/// Transcript of one call recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub transcript: String,
    /// BCP-47 language tag detected by the transcription service (e.g. "en").
    pub language: String,
}

/// Speech-to-text collaborator.
///
/// Implementations may block on network I/O; callers bound them with a timeout.
#[async_trait]
pub trait Transcriber: Send + Sync + 'static {
    async fn transcribe(&self, audio_url: &str) -> Result<Transcript, AiError>;
}

/// AI scoring collaborator.
///
/// Must not mutate campaign state: it only returns a score breakdown.
#[async_trait]
pub trait CallAuditor: Send + Sync + 'static {
    async fn audit_call(
        &self,
        transcript: &str,
        parameters: &ParameterSet,
        language: &str,
    ) -> Result<CallAudit, AiError>;
}

#[async_trait]
impl<T: Transcriber + ?Sized> Transcriber for std::sync::Arc<T> {
    async fn transcribe(&self, audio_url: &str) -> Result<Transcript, AiError> {
        (**self).transcribe(audio_url).await
    }
}

#[async_trait]
impl<A: CallAuditor + ?Sized> CallAuditor for std::sync::Arc<A> {
    async fn audit_call(
        &self,
        transcript: &str,
        parameters: &ParameterSet,
        language: &str,
    ) -> Result<CallAudit, AiError> {
        (**self).audit_call(transcript, parameters, language).await
    }
}
