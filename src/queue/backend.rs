//! Storage abstraction for job queues.
//!
//! The runtime owns the state machine; a backend only moves jobs between
//! the waiting, delayed, active, completed and failed collections of a queue.
//! Every method must be safe to call concurrently from all worker slots.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::redis::PoolError;

use super::job::{Job, JobCounts, QueueName};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Priority {priority} outside allowed range {min}..={max}")]
    InvalidPriority { priority: u8, min: u8, max: u8 },

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// Queue is closing or closed and no longer accepts jobs
    #[error("Queue {0} is closed")]
    Closed(QueueName),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend is temporarily unavailable (e.g., circuit breaker open)
    #[error("Queue backend unavailable: {0}")]
    Unavailable(String),
}

impl From<PoolError> for QueueError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Redis(e) => QueueError::Redis(e),
            other => QueueError::Unavailable(other.to_string()),
        }
    }
}

/// Backend trait for job storage.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Backend type identifier ("memory", "redis")
    fn backend_type(&self) -> &'static str;

    /// Store a new job, assigning its submission sequence.
    ///
    /// The job lands in the delayed set when `run_at` is in the future,
    /// otherwise in the waiting set.
    async fn add(&self, job: Job) -> Result<Job, QueueError>;

    /// Claim the next eligible job.
    ///
    /// Due delayed jobs are promoted first. The highest-priority waiting job
    /// (lowest sequence among equals) becomes active with a lease expiring
    /// after `lease`; its attempt counter is incremented.
    async fn claim(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<Job>, QueueError>;

    /// Extend the lease of an active job. Returns false if it is no longer active.
    async fn renew_lease(
        &self,
        queue: QueueName,
        job_id: &str,
        lease: Duration,
    ) -> Result<bool, QueueError>;

    /// Put a job back into the waiting or delayed set according to its `run_at`.
    async fn requeue(&self, job: &Job) -> Result<(), QueueError>;

    /// Record a completed job, keeping at most `keep` completed jobs.
    async fn complete(&self, job: &Job, keep: usize) -> Result<(), QueueError>;

    /// Record a terminally failed job, keeping at most `keep` failed jobs.
    async fn fail(&self, job: &Job, keep: usize) -> Result<(), QueueError>;

    /// Remove and return active jobs whose lease expired before `now`.
    async fn take_stalled(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, QueueError>;

    /// Remove and return every job in the failed history.
    async fn take_failed(&self, queue: QueueName) -> Result<Vec<Job>, QueueError>;

    async fn get(&self, queue: QueueName, job_id: &str) -> Result<Option<Job>, QueueError>;

    /// Failed history, most recent first.
    async fn failed(&self, queue: QueueName, limit: usize) -> Result<Vec<Job>, QueueError>;

    /// Completed history, most recent first.
    async fn completed(&self, queue: QueueName, limit: usize) -> Result<Vec<Job>, QueueError>;

    async fn counts(&self, queue: QueueName) -> Result<JobCounts, QueueError>;
}
