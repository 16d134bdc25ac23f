//! In-memory job queue for tests/dev.
//!
//! Uses `tokio::time::Instant`, so tests running with a paused clock see delays
//! elapse deterministically.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{JobQueue, Lease, QueueError, QueuedJob};

#[derive(Debug, Clone)]
struct Entry {
    job: QueuedJob,
    attempts: u32,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Entry>,
    delayed: Vec<(Instant, Entry)>,
    leased: HashMap<String, (Instant, Entry)>,
    requeue_delays: Vec<Duration>,
}

impl State {
    fn promote_due(&mut self, now: Instant) {
        if self.delayed.is_empty() {
            return;
        }
        self.delayed.sort_by_key(|(due, _)| *due);
        let split = self.delayed.partition_point(|(due, _)| *due <= now);
        for (_, entry) in self.delayed.drain(..split) {
            self.ready.push_back(entry);
        }
    }
}

#[derive(Debug)]
pub struct InMemoryJobQueue {
    state: Mutex<State>,
    available: AtomicBool,
    next_lease: AtomicU64,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
            next_lease: AtomicU64::new(1),
        }
    }

    /// Simulate the broker going down or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Jobs waiting (ready or delayed), excluding leased ones.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.ready.len() + s.delayed.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn leased_count(&self) -> usize {
        self.state.lock().map(|s| s.leased.len()).unwrap_or(0)
    }

    /// Every delay passed to `requeue`, in call order.
    pub fn requeue_delays(&self) -> Vec<Duration> {
        self.state
            .lock()
            .map(|s| s.requeue_delays.clone())
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::Unavailable("in-memory broker switched off".to_string()))
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Command("queue lock poisoned".to_string()))
    }

    fn release(&self, lease: Lease, delay: Duration, attempts: u32, record: bool) -> Result<(), QueueError> {
        self.check_available()?;
        let mut state = self.lock()?;
        let (_, mut entry) = state
            .leased
            .remove(&lease.id)
            .ok_or_else(|| QueueError::UnknownLease(lease.id.clone()))?;
        entry.attempts = attempts;
        if record {
            state.requeue_delays.push(delay);
        }
        if delay.is_zero() {
            state.ready.push_back(entry);
        } else {
            state.delayed.push((Instant::now() + delay, entry));
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: QueuedJob) -> Result<(), QueueError> {
        self.check_available()?;
        self.lock()?.ready.push_back(Entry { job, attempts: 0 });
        Ok(())
    }

    async fn lease(&self) -> Result<Option<Lease>, QueueError> {
        self.check_available()?;
        let now = Instant::now();
        let mut state = self.lock()?;
        state.promote_due(now);

        let Some(entry) = state.ready.pop_front() else {
            return Ok(None);
        };
        let id = format!("lease-{}", self.next_lease.fetch_add(1, Ordering::SeqCst));
        let lease = Lease {
            id: id.clone(),
            job: entry.job.clone(),
            attempts: entry.attempts,
        };
        state.leased.insert(id, (now, entry));
        Ok(Some(lease))
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        self.check_available()?;
        self.lock()?
            .leased
            .remove(&lease.id)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownLease(lease.id.clone()))
    }

    async fn requeue(&self, lease: Lease, delay: Duration) -> Result<(), QueueError> {
        let attempts = lease.attempts + 1;
        self.release(lease, delay, attempts, true)
    }

    async fn defer(&self, lease: Lease, delay: Duration) -> Result<(), QueueError> {
        let attempts = lease.attempts;
        self.release(lease, delay, attempts, false)
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn reclaim_expired(&self, older_than: Duration) -> Result<usize, QueueError> {
        self.check_available()?;
        let now = Instant::now();
        let mut state = self.lock()?;
        let expired: Vec<String> = state
            .leased
            .iter()
            .filter(|(_, (leased_at, _))| now.duration_since(*leased_at) >= older_than)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            if let Some((_, entry)) = state.leased.remove(id) {
                state.ready.push_back(entry);
            }
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditflow_core::{CampaignId, ParameterSetId, TenantId};

    fn job(index: usize) -> QueuedJob {
        QueuedJob {
            campaign_id: CampaignId::new(),
            tenant_id: TenantId::new(),
            job_index: index,
            audio_url: format!("file:///calls/{index}.wav"),
            agent_name: None,
            call_id: None,
            parameter_set_id: ParameterSetId::new(),
        }
    }

    #[tokio::test]
    async fn lease_is_fifo_and_exclusive() {
        let q = InMemoryJobQueue::new();
        q.enqueue(job(0)).await.unwrap();
        q.enqueue(job(1)).await.unwrap();

        let a = q.lease().await.unwrap().unwrap();
        let b = q.lease().await.unwrap().unwrap();
        assert_eq!(a.job.job_index, 0);
        assert_eq!(b.job.job_index, 1);
        assert_ne!(a.id, b.id);
        assert!(q.lease().await.unwrap().is_none());
        assert_eq!(q.leased_count(), 2);

        q.ack(&a).await.unwrap();
        assert_eq!(q.leased_count(), 1);
        assert!(matches!(q.ack(&a).await, Err(QueueError::UnknownLease(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn requeue_waits_and_counts_attempts() {
        let q = InMemoryJobQueue::new();
        q.enqueue(job(0)).await.unwrap();

        let lease = q.lease().await.unwrap().unwrap();
        assert_eq!(lease.attempts, 0);
        q.requeue(lease, Duration::from_millis(1000)).await.unwrap();

        assert!(q.lease().await.unwrap().is_none());
        tokio::time::advance(Duration::from_millis(1000)).await;

        let lease = q.lease().await.unwrap().unwrap();
        assert_eq!(lease.attempts, 1);
        assert_eq!(q.requeue_delays(), vec![Duration::from_millis(1000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn defer_keeps_attempts() {
        let q = InMemoryJobQueue::new();
        q.enqueue(job(0)).await.unwrap();

        let lease = q.lease().await.unwrap().unwrap();
        q.defer(lease, Duration::from_millis(50)).await.unwrap();
        tokio::time::advance(Duration::from_millis(50)).await;

        let lease = q.lease().await.unwrap().unwrap();
        assert_eq!(lease.attempts, 0);
        assert!(q.requeue_delays().is_empty());
    }

    #[tokio::test]
    async fn unavailable_broker_rejects_everything() {
        let q = InMemoryJobQueue::new();
        q.set_available(false);
        assert!(!q.is_available().await);
        assert!(matches!(q.enqueue(job(0)).await, Err(QueueError::Unavailable(_))));
        assert!(matches!(q.lease().await, Err(QueueError::Unavailable(_))));

        q.set_available(true);
        q.enqueue(job(0)).await.unwrap();
        assert_eq!(q.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_leases_are_reclaimed() {
        let q = InMemoryJobQueue::new();
        q.enqueue(job(0)).await.unwrap();
        let _abandoned = q.lease().await.unwrap().unwrap();

        assert_eq!(q.reclaim_expired(Duration::from_secs(60)).await.unwrap(), 0);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(q.reclaim_expired(Duration::from_secs(60)).await.unwrap(), 1);

        let again = q.lease().await.unwrap().unwrap();
        assert_eq!(again.job.job_index, 0);
        assert_eq!(again.attempts, 0);
    }
}
