//! Infrastructure layer for the audit campaign pipeline.
//!
//! - [`store`]: campaign, audit result and parameter set persistence (in-memory and Postgres)
//! - [`queue`]: at-least-once job queue with leases and delayed requeue (in-memory and Redis)
//! - [`worker`]: bounded-concurrency worker pool and the per-job pipeline
//! - [`manager`]: operator-facing campaign operations
//! - [`reconcile`]: sweep that re-enqueues jobs left behind while the broker was down
//! - [`external`]: HTTP collaborators, usage reporting and audio cleanup
//! - [`config`]: environment-driven configuration

pub mod config;
pub mod external;
pub mod manager;
pub mod queue;
pub mod reconcile;
pub mod store;
pub mod worker;

pub use config::{ConfigError, PipelineConfig};
pub use manager::{CampaignError, CampaignManager};
pub use reconcile::{Reconciler, ReconcilerHandle};
pub use worker::{
    JobError, JobPipeline, LeaseOutcome, PipelineDeps, RetryPolicy, WorkerPool, WorkerPoolConfig, WorkerPoolHandle,
    WorkerPoolStats,
};
