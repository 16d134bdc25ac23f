//! Background job processing: retry policy, per-job pipeline and the pool.

pub mod pipeline;
pub mod pool;
pub mod retry;

pub use pipeline::{JobError, JobPipeline, LeaseOutcome, PipelineDeps, SkipReason};
pub use pool::{WorkerPool, WorkerPoolConfig, WorkerPoolHandle, WorkerPoolStats};
pub use retry::RetryPolicy;
