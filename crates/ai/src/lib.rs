//! `auditflow-ai`
//!
//! **Responsibility:** boundary to the AI collaborators used by the audit pipeline.
//!
//! - Transcription: audio URL in, transcript + language out.
//! - Scoring: transcript + parameter set in, typed score breakdown out.
//!
//! Responses are decoded into explicit structs and validated here, so malformed
//! collaborator payloads are rejected before they reach campaign state.

pub mod parameter_set;
pub mod result;
pub mod service;

pub use parameter_set::{AuditParameter, ParameterSet};
pub use result::{AiError, CallAudit, CriterionScore, Sentiment, TokenUsage};
pub use service::{CallAuditor, Transcriber, Transcript};
