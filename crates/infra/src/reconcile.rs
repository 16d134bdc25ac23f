//! Periodic sweep that recovers work lost to broker outages or crashed workers.
//!
//! Each tick, while the queue is reachable:
//! 1. leases held longer than `lease_timeout` are returned to the ready set;
//! 2. jobs that never reached the queue are enqueued through
//!    [`CampaignManager::reconcile_unqueued`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::manager::CampaignManager;
use crate::queue::JobQueue;

/// Campaigns examined per sweep.
const SWEEP_BATCH: usize = 100;

pub struct Reconciler {
    manager: CampaignManager,
    queue: Arc<dyn JobQueue>,
    interval: Duration,
    lease_timeout: Duration,
}

/// Handle to control a running reconciler.
#[derive(Debug)]
pub struct ReconcilerHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl ReconcilerHandle {
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.join.await {
            error!(error = %e, "reconciler panicked");
        }
    }
}

impl Reconciler {
    pub fn new(manager: CampaignManager, queue: Arc<dyn JobQueue>, interval: Duration, lease_timeout: Duration) -> Self {
        Self {
            manager,
            queue,
            interval,
            lease_timeout,
        }
    }

    /// One sweep. Returns the number of jobs enqueued.
    pub async fn run_once(&self) -> usize {
        if !self.queue.is_available().await {
            debug!("queue unavailable, skipping reconciliation");
            return 0;
        }

        match self.queue.reclaim_expired(self.lease_timeout).await {
            Ok(0) => {}
            Ok(n) => warn!(reclaimed = n, "returned expired leases to the queue"),
            Err(e) => warn!(error = %e, "lease reclaim failed"),
        }

        match self.manager.reconcile_unqueued(SWEEP_BATCH).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "reconciliation sweep failed");
                0
            }
        }
    }

    pub fn spawn(self) -> ReconcilerHandle {
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();

        let join = tokio::spawn(async move {
            info!(interval_ms = self.interval.as_millis() as u64, "reconciler started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = signal.notified() => break,
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
            info!("reconciler stopped");
        });

        ReconcilerHandle { shutdown, join }
    }
}
