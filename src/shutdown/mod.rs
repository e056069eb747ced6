//! Graceful shutdown of the dispatch pipeline.
//!
//! The HTTP server stops accepting requests first; afterwards both queues are
//! closed, which rejects new submissions and lets in-flight jobs finish
//! within the configured drain timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;

use crate::queue::{JobCounts, JobQueue};

/// Closes the queues in parallel and reports what was left behind.
pub struct GracefulShutdown {
    queues: Vec<Arc<JobQueue>>,
}

impl GracefulShutdown {
    pub fn new(queues: Vec<Arc<JobQueue>>) -> Self {
        Self { queues }
    }

    #[tracing::instrument(name = "graceful_shutdown", skip(self), fields(queues = self.queues.len()))]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = Instant::now();
        tracing::info!(reason = %reason, "Starting graceful shutdown, closing queues");

        join_all(self.queues.iter().map(|queue| queue.close())).await;

        let mut result = ShutdownResult {
            queues_closed: self.queues.iter().filter(|q| q.is_closed()).count(),
            ..Default::default()
        };

        for queue in &self.queues {
            match queue.counts().await {
                Ok(counts) => {
                    if counts.active > 0 || counts.waiting > 0 || counts.delayed > 0 {
                        tracing::warn!(
                            queue = %queue.name(),
                            waiting = counts.waiting,
                            delayed = counts.delayed,
                            active = counts.active,
                            "Jobs left in queue at shutdown"
                        );
                    }
                    result.remaining.add(&counts);
                }
                Err(e) => tracing::warn!(queue = %queue.name(), error = %e, "Could not read queue counts"),
            }
        }

        result.duration = start.elapsed();
        result.success = result.queues_closed == self.queues.len();

        tracing::info!(
            queues_closed = result.queues_closed,
            remaining_active = result.remaining.active,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }
}

/// Jobs still pending across all queues after close.
#[derive(Debug, Default, Clone, Copy)]
pub struct RemainingJobs {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
}

impl RemainingJobs {
    fn add(&mut self, counts: &JobCounts) {
        self.waiting += counts.waiting;
        self.delayed += counts.delayed;
        self.active += counts.active;
    }
}

#[derive(Debug, Default)]
pub struct ShutdownResult {
    pub success: bool,
    pub queues_closed: usize,
    pub remaining: RemainingJobs,
    pub duration: Duration,
}
