//! In-memory job store using DashMap.
//!
//! Jobs are lost on restart. Used for development and tests, and as the
//! fallback when no Redis pool is available.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::backend::{JobStore, QueueError};
use super::job::{Job, JobCounts, JobState, QueueName};

/// Orders waiting jobs: higher priority first, then lower sequence.
type WaitingKey = (Reverse<u8>, u64, String);

#[derive(Default)]
struct QueueState {
    jobs: HashMap<String, Job>,
    waiting: BTreeSet<WaitingKey>,
    /// (run_at millis, seq, id)
    delayed: BTreeSet<(i64, u64, String)>,
    /// id -> lease deadline
    active: HashMap<String, DateTime<Utc>>,
    /// Most recent first
    completed: VecDeque<String>,
    failed: VecDeque<String>,
}

impl QueueState {
    fn insert_pending(&mut self, job: Job, now: DateTime<Utc>) {
        if job.is_eligible(now) {
            self.waiting
                .insert((Reverse(job.priority), job.seq, job.id.clone()));
        } else {
            self.delayed
                .insert((job.run_at.timestamp_millis(), job.seq, job.id.clone()));
        }
        self.jobs.insert(job.id.clone(), job);
    }

    fn promote_due(&mut self, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        while let Some(first) = self.delayed.first().cloned() {
            if first.0 > now_ms {
                break;
            }
            self.delayed.remove(&first);
            if let Some(job) = self.jobs.get_mut(&first.2) {
                job.state = JobState::Waiting;
                self.waiting.insert((Reverse(job.priority), job.seq, job.id.clone()));
            }
        }
    }

    fn remove_pending(&mut self, job: &Job) {
        self.waiting
            .remove(&(Reverse(job.priority), job.seq, job.id.clone()));
        self.delayed.retain(|(_, _, id)| id != &job.id);
    }

    /// Push to a history list and drop the overflow from the job table.
    fn push_history(&mut self, job: &Job, keep: usize, failed: bool) {
        let list = if failed {
            &mut self.failed
        } else {
            &mut self.completed
        };
        list.retain(|id| id != &job.id);
        list.push_front(job.id.clone());

        let mut evicted = Vec::new();
        while list.len() > keep {
            if let Some(id) = list.pop_back() {
                evicted.push(id);
            }
        }

        self.jobs.insert(job.id.clone(), job.clone());
        for id in evicted {
            self.jobs.remove(&id);
        }
    }

    fn history(&self, failed: bool, limit: usize) -> Vec<Job> {
        let list = if failed { &self.failed } else { &self.completed };
        list.iter()
            .take(limit)
            .filter_map(|id| self.jobs.get(id).cloned())
            .collect()
    }
}

/// In-memory job store.
pub struct MemoryJobStore {
    queues: DashMap<QueueName, QueueState>,
    next_seq: AtomicU64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
            next_seq: AtomicU64::new(1),
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn add(&self, mut job: Job) -> Result<Job, QueueError> {
        job.seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let mut state = self.queues.entry(job.queue_name).or_default();
        state.insert_pending(job.clone(), Utc::now());
        Ok(job)
    }

    async fn claim(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<Job>, QueueError> {
        let Some(mut state) = self.queues.get_mut(&queue) else {
            return Ok(None);
        };

        state.promote_due(now);

        let Some(key) = state.waiting.pop_first() else {
            return Ok(None);
        };

        let deadline = now + chrono::Duration::from_std(lease).unwrap_or_default();
        state.active.insert(key.2.clone(), deadline);

        let claimed = state.jobs.get_mut(&key.2).map(|job| {
            job.state = JobState::Active;
            job.attempts += 1;
            job.started_at = Some(now);
            job.clone()
        });

        Ok(claimed)
    }

    async fn renew_lease(
        &self,
        queue: QueueName,
        job_id: &str,
        lease: Duration,
    ) -> Result<bool, QueueError> {
        let Some(mut state) = self.queues.get_mut(&queue) else {
            return Ok(false);
        };

        let deadline = Utc::now() + chrono::Duration::from_std(lease).unwrap_or_default();
        match state.active.get_mut(job_id) {
            Some(current) => {
                *current = deadline;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn requeue(&self, job: &Job) -> Result<(), QueueError> {
        let mut state = self.queues.entry(job.queue_name).or_default();
        state.active.remove(&job.id);
        state.remove_pending(job);
        state.insert_pending(job.clone(), Utc::now());
        Ok(())
    }

    async fn complete(&self, job: &Job, keep: usize) -> Result<(), QueueError> {
        let mut state = self.queues.entry(job.queue_name).or_default();
        state.active.remove(&job.id);
        state.push_history(job, keep, false);
        Ok(())
    }

    async fn fail(&self, job: &Job, keep: usize) -> Result<(), QueueError> {
        let mut state = self.queues.entry(job.queue_name).or_default();
        state.active.remove(&job.id);
        state.push_history(job, keep, true);
        Ok(())
    }

    async fn take_stalled(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, QueueError> {
        let Some(mut state) = self.queues.get_mut(&queue) else {
            return Ok(Vec::new());
        };

        let expired: Vec<String> = state
            .active
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut stalled = Vec::with_capacity(expired.len());
        for id in expired {
            state.active.remove(&id);
            if let Some(job) = state.jobs.get(&id) {
                stalled.push(job.clone());
            }
        }

        Ok(stalled)
    }

    async fn take_failed(&self, queue: QueueName) -> Result<Vec<Job>, QueueError> {
        let Some(mut state) = self.queues.get_mut(&queue) else {
            return Ok(Vec::new());
        };

        let ids: Vec<String> = state.failed.drain(..).collect();
        Ok(ids
            .iter()
            .filter_map(|id| state.jobs.remove(id))
            .collect())
    }

    async fn get(&self, queue: QueueName, job_id: &str) -> Result<Option<Job>, QueueError> {
        Ok(self
            .queues
            .get(&queue)
            .and_then(|state| state.jobs.get(job_id).cloned()))
    }

    async fn failed(&self, queue: QueueName, limit: usize) -> Result<Vec<Job>, QueueError> {
        Ok(self
            .queues
            .get(&queue)
            .map(|state| state.history(true, limit))
            .unwrap_or_default())
    }

    async fn completed(&self, queue: QueueName, limit: usize) -> Result<Vec<Job>, QueueError> {
        Ok(self
            .queues
            .get(&queue)
            .map(|state| state.history(false, limit))
            .unwrap_or_default())
    }

    async fn counts(&self, queue: QueueName) -> Result<JobCounts, QueueError> {
        Ok(self
            .queues
            .get(&queue)
            .map(|state| JobCounts {
                waiting: state.waiting.len(),
                delayed: state.delayed.len(),
                active: state.active.len(),
                completed: state.completed.len(),
                failed: state.failed.len(),
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::BackoffPolicy;
    use serde_json::json;

    const LEASE: Duration = Duration::from_secs(30);

    fn job(priority: u8, delay_ms: u64) -> Job {
        Job::new(
            QueueName::Email,
            "test-email",
            json!({"to": "a@b.com"}),
            priority,
            delay_ms,
            3,
            BackoffPolicy::Fixed { delay_ms: 10 },
        )
    }

    #[tokio::test]
    async fn test_claim_empty_queue() {
        let store = MemoryJobStore::new();
        let claimed = store.claim(QueueName::Email, Utc::now(), LEASE).await.unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn test_priority_then_fifo_order() {
        let store = MemoryJobStore::new();
        let low = store.add(job(1, 0)).await.unwrap();
        let high_a = store.add(job(9, 0)).await.unwrap();
        let high_b = store.add(job(9, 0)).await.unwrap();

        let mut order = Vec::new();
        while let Some(j) = store.claim(QueueName::Email, Utc::now(), LEASE).await.unwrap() {
            order.push(j.id);
        }

        assert_eq!(order, vec![high_a.id, high_b.id, low.id]);
    }

    #[tokio::test]
    async fn test_claim_marks_active_and_counts_attempt() {
        let store = MemoryJobStore::new();
        let added = store.add(job(5, 0)).await.unwrap();

        let claimed = store
            .claim(QueueName::Email, Utc::now(), LEASE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, added.id);
        assert_eq!(claimed.state, JobState::Active);
        assert_eq!(claimed.attempts, 1);

        let counts = store.counts(QueueName::Email).await.unwrap();
        assert_eq!(counts.active, 1);
        assert_eq!(counts.waiting, 0);
    }

    #[tokio::test]
    async fn test_delayed_job_not_claimed_early() {
        let store = MemoryJobStore::new();
        store.add(job(5, 60_000)).await.unwrap();

        assert!(store
            .claim(QueueName::Email, Utc::now(), LEASE)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.counts(QueueName::Email).await.unwrap().delayed, 1);

        let later = Utc::now() + chrono::Duration::seconds(61);
        let claimed = store.claim(QueueName::Email, later, LEASE).await.unwrap();
        assert!(claimed.is_some());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let store = MemoryJobStore::new();
        for _ in 0..5 {
            store.add(job(5, 0)).await.unwrap();
        }

        while let Some(mut j) = store.claim(QueueName::Email, Utc::now(), LEASE).await.unwrap() {
            j.state = JobState::Completed;
            store.complete(&j, 2).await.unwrap();
        }

        let counts = store.counts(QueueName::Email).await.unwrap();
        assert_eq!(counts.completed, 2);
        assert_eq!(store.completed(QueueName::Email, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_take_stalled_returns_expired_leases() {
        let store = MemoryJobStore::new();
        store.add(job(5, 0)).await.unwrap();
        let claimed = store
            .claim(QueueName::Email, Utc::now(), Duration::from_millis(1))
            .await
            .unwrap()
            .unwrap();

        let later = Utc::now() + chrono::Duration::seconds(1);
        let stalled = store.take_stalled(QueueName::Email, later).await.unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].id, claimed.id);
        assert_eq!(store.counts(QueueName::Email).await.unwrap().active, 0);
    }

    #[tokio::test]
    async fn test_renew_lease_unknown_job() {
        let store = MemoryJobStore::new();
        store.add(job(5, 0)).await.unwrap();
        let renewed = store
            .renew_lease(QueueName::Email, "missing", LEASE)
            .await
            .unwrap();
        assert!(!renewed);
    }

    #[tokio::test]
    async fn test_take_failed_empties_history() {
        let store = MemoryJobStore::new();
        store.add(job(5, 0)).await.unwrap();
        let mut j = store
            .claim(QueueName::Email, Utc::now(), LEASE)
            .await
            .unwrap()
            .unwrap();
        j.state = JobState::Failed;
        store.fail(&j, 20).await.unwrap();

        let taken = store.take_failed(QueueName::Email).await.unwrap();
        assert_eq!(taken.len(), 1);
        assert_eq!(store.counts(QueueName::Email).await.unwrap().failed, 0);
    }
}
