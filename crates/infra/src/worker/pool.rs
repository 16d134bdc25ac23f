//! Bounded-concurrency worker pool.
//!
//! One supervisor task polls the queue and keeps at most `concurrency` pipeline
//! runs in flight. Shutdown stops leasing and waits for in-flight jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::pipeline::{JobPipeline, LeaseOutcome};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Maximum jobs processed at the same time.
    pub concurrency: usize,
    /// How often to poll the queue when idle.
    pub poll_interval: Duration,
    /// Name for logging.
    pub name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            poll_interval: Duration::from_millis(1000),
            name: "audit-worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerPoolStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub deferred: u64,
    pub skipped: u64,
    /// Runs that panicked before producing an outcome.
    pub panicked: u64,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    deferred: AtomicU64,
    skipped: AtomicU64,
    panicked: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Counters {
    fn started(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    /// `None` means the run panicked.
    fn finished(&self, outcome: Option<&LeaseOutcome>) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Some(LeaseOutcome::Succeeded { .. }) => &self.succeeded,
            Some(LeaseOutcome::Failed { .. }) => &self.failed,
            Some(LeaseOutcome::Retried { .. }) => &self.retried,
            Some(LeaseOutcome::Deferred { .. }) => &self.deferred,
            Some(LeaseOutcome::Skipped(_)) => &self.skipped,
            None => &self.panicked,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

/// Holds one in-flight slot for a pipeline run and releases it on drop, so a
/// panicking run still frees its slot.
struct InFlight {
    counters: Arc<Counters>,
    outcome: Option<LeaseOutcome>,
}

impl InFlight {
    fn start(counters: Arc<Counters>) -> Self {
        counters.started();
        Self {
            counters,
            outcome: None,
        }
    }

    fn finish(mut self, outcome: LeaseOutcome) {
        self.outcome = Some(outcome);
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.counters.finished(self.outcome.as_ref());
    }
}

/// Handle to control a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl WorkerPoolHandle {
    /// Stop leasing new jobs and wait for in-flight ones to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.join.await {
            error!(error = %e, "worker pool supervisor panicked");
        }
    }

    pub fn stats(&self) -> WorkerPoolStats {
        self.counters.snapshot()
    }
}

pub struct WorkerPool {
    pipeline: Arc<JobPipeline>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(pipeline: JobPipeline, config: WorkerPoolConfig) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            config,
        }
    }

    /// Spawn the supervisor on the current runtime.
    pub fn spawn(self) -> WorkerPoolHandle {
        let shutdown = Arc::new(Notify::new());
        let counters = Arc::new(Counters::default());

        let join = tokio::spawn(supervise(
            self.pipeline,
            self.config,
            shutdown.clone(),
            counters.clone(),
        ));

        WorkerPoolHandle {
            shutdown,
            join,
            counters,
        }
    }
}

async fn supervise(
    pipeline: Arc<JobPipeline>,
    config: WorkerPoolConfig,
    shutdown: Arc<Notify>,
    counters: Arc<Counters>,
) {
    let concurrency = config.concurrency.max(1);
    info!(
        name = %config.name,
        concurrency,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "worker pool started"
    );

    let mut tasks: JoinSet<()> = JoinSet::new();
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "job task panicked");
                }
                // A slot freed up: try to fill it right away.
                fill(&pipeline, &mut tasks, concurrency, &counters).await;
            }
            _ = ticker.tick() => {
                fill(&pipeline, &mut tasks, concurrency, &counters).await;
            }
        }
    }

    if !tasks.is_empty() {
        info!(name = %config.name, in_flight = tasks.len(), "worker pool draining");
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "job task panicked");
        }
    }
    info!(name = %config.name, "worker pool stopped");
}

/// Lease jobs until the pool is full or the queue is empty.
async fn fill(pipeline: &Arc<JobPipeline>, tasks: &mut JoinSet<()>, concurrency: usize, counters: &Arc<Counters>) {
    while tasks.len() < concurrency {
        let lease = match pipeline.deps().queue.lease().await {
            Ok(Some(lease)) => lease,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "lease failed");
                return;
            }
        };
        debug!(
            campaign_id = %lease.job.campaign_id,
            job_index = lease.job.job_index,
            attempts = lease.attempts,
            "leased job"
        );

        let slot = InFlight::start(counters.clone());
        let pipeline = pipeline.clone();
        tasks.spawn(async move {
            let outcome = pipeline.run(lease).await;
            slot.finish(outcome);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_is_at_least_one() {
        let config = WorkerPoolConfig::default().with_concurrency(0);
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn counters_track_peak_in_flight() {
        let counters = Counters::default();
        counters.started();
        counters.started();
        counters.finished(Some(&LeaseOutcome::Retried {
            delay: Duration::from_secs(1),
        }));
        counters.started();

        let stats = counters.snapshot();
        assert_eq!(stats.in_flight, 2);
        assert_eq!(stats.peak_in_flight, 2);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.retried, 1);
    }

    #[tokio::test]
    async fn panicking_run_releases_its_slot() {
        let counters = Arc::new(Counters::default());
        let mut tasks: JoinSet<()> = JoinSet::new();

        let slot = InFlight::start(counters.clone());
        tasks.spawn(async move {
            let _slot = slot;
            panic!("transcriber client blew up");
        });
        let slot = InFlight::start(counters.clone());
        tasks.spawn(async move {
            slot.finish(LeaseOutcome::Deferred {
                delay: Duration::from_secs(1),
            });
        });

        let mut panics = 0;
        while let Some(joined) = tasks.join_next().await {
            if joined.is_err() {
                panics += 1;
            }
        }
        assert_eq!(panics, 1);

        let stats = counters.snapshot();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.peak_in_flight, 2);
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.deferred, 1);
    }
}
