//! Errors raised by the campaign domain model.

use thiserror::Error;

/// Result of a domain operation.
pub type DomainResult<T> = Result<T, DomainError>;

/// A rejected campaign operation.
///
/// Raised before any state changes, so the caller can surface it as-is. Storage
/// and broker failures have their own error types in `auditflow-infra`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Bad input: oversized batch, empty audio URL, threshold out of range.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Counters disagree with the embedded jobs.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An id string that is not a UUID.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Job index out of range.
    #[error("not found: {0}")]
    NotFound(String),

    /// Status does not allow the operation (e.g. retrying a job that has not failed).
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}
