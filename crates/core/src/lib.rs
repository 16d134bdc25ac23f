//! `auditflow-core`: shared identifiers, error model and paging primitives.
//!
//! This crate contains **pure** building blocks (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod page;

pub use error::{DomainError, DomainResult};
pub use id::{AuditId, CampaignId, ParameterSetId, TenantId};
pub use page::{Page, PageRequest};
