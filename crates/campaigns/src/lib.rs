//! `auditflow-campaigns`: bulk audit campaign domain model.
//!
//! A campaign is a batch of call recordings scored against one parameter set.
//! All counter and status changes go through [`Campaign::execute`], which keeps
//! `completed + failed + processing <= total` and applies the campaign state machine.

pub mod campaign;
pub mod command;
pub mod job;
pub mod record;
pub mod status;

pub use campaign::{Campaign, CampaignConfig, CampaignFilter, CampaignUsage, NewCampaign, Transition};
pub use command::{CampaignCommand, CommandOutcome};
pub use job::{AuditJob, NewJob};
pub use record::{AuditRecord, CampaignStats};
pub use status::{CampaignStatus, JobStatus};
