//! Queue runtime: submission, worker slots, retries and stalled-job recovery.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::metrics::JobMetrics;

use super::backend::{JobStore, QueueError};
use super::handler::{JobError, JobHandler};
use super::job::{Job, JobCounts, JobOptions, JobState, QueueName};
use super::policy::{QueuePolicy, RuntimeOptions};

/// Snapshot returned by the admin statistics endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub name: QueueName,
    pub paused: bool,
    pub concurrency: usize,
    #[serde(flatten)]
    pub counts: JobCounts,
}

/// A named job queue with a fixed pool of worker slots.
///
/// Jobs are handed to at most `concurrency` handler invocations at a time.
/// Each active job holds a lease that its worker renews; when a worker dies
/// the lease runs out and the stalled sweeper puts the job back.
pub struct JobQueue {
    name: QueueName,
    policy: QueuePolicy,
    options: RuntimeOptions,
    store: Arc<dyn JobStore>,
    paused: AtomicBool,
    closed: AtomicBool,
    wakeup: Notify,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueue {
    pub fn new(
        name: QueueName,
        policy: QueuePolicy,
        options: RuntimeOptions,
        store: Arc<dyn JobStore>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            name,
            policy,
            options,
            store,
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            wakeup: Notify::new(),
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> QueueName {
        self.name
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Add a job. The queue default priority applies when none is given.
    pub async fn submit(
        &self,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<Job, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed(self.name));
        }

        let priority = options
            .priority
            .unwrap_or_else(|| self.options.default_priority());
        if !self.options.priority_range.contains(&priority) {
            return Err(QueueError::InvalidPriority {
                priority,
                min: *self.options.priority_range.start(),
                max: *self.options.priority_range.end(),
            });
        }

        let job = Job::new(
            self.name,
            job_type,
            payload,
            priority,
            options.delay_ms,
            self.policy.max_attempts,
            self.policy.backoff,
        );
        let job = self.store.add(job).await?;

        JobMetrics::record_submitted(self.name, &job.job_type);
        tracing::debug!(
            queue = %self.name,
            job_id = %job.id,
            job_type = %job.job_type,
            priority = job.priority,
            delay_ms = job.delay_ms,
            "Job submitted"
        );

        self.wakeup.notify_one();
        Ok(job)
    }

    /// Spawn the worker slots and the stalled-job sweeper.
    pub async fn start(self: &Arc<Self>, handler: Arc<dyn JobHandler>) {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            tracing::warn!(queue = %self.name, "Queue workers already running");
            return;
        }

        for slot in 0..self.policy.concurrency {
            let queue = Arc::clone(self);
            let handler = Arc::clone(&handler);
            let shutdown = self.shutdown_tx.subscribe();
            workers.push(tokio::spawn(async move {
                queue.worker_loop(slot, handler, shutdown).await;
            }));
        }

        let queue = Arc::clone(self);
        let shutdown = self.shutdown_tx.subscribe();
        workers.push(tokio::spawn(async move {
            queue.stalled_sweeper(shutdown).await;
        }));

        tracing::info!(
            queue = %self.name,
            concurrency = self.policy.concurrency,
            max_attempts = self.policy.max_attempts,
            backend = self.store.backend_type(),
            "Queue workers started"
        );
    }

    async fn worker_loop(
        self: Arc<Self>,
        slot: usize,
        handler: Arc<dyn JobHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::debug!(queue = %self.name, slot, "Worker slot started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if self.is_paused() {
                self.idle(&mut shutdown).await;
                continue;
            }

            match self
                .store
                .claim(self.name, Utc::now(), self.options.lease_duration)
                .await
            {
                Ok(Some(job)) => self.process(job, handler.as_ref()).await,
                Ok(None) => self.idle(&mut shutdown).await,
                Err(e) => {
                    tracing::warn!(queue = %self.name, error = %e, "Failed to claim job");
                    self.idle(&mut shutdown).await;
                }
            }
        }

        tracing::debug!(queue = %self.name, slot, "Worker slot stopped");
    }

    /// Sleep until a submission, the poll interval or shutdown, whichever comes first.
    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = self.wakeup.notified() => {}
            _ = tokio::time::sleep(self.options.poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }

    async fn process(&self, mut job: Job, handler: &dyn JobHandler) {
        let started = Instant::now();
        let heartbeat = self.spawn_lease_renewal(job.id.clone());

        let outcome = AssertUnwindSafe(handler.handle(&job)).catch_unwind().await;
        heartbeat.abort();

        let outcome = match outcome {
            Ok(result) => result,
            Err(panic) => Err(JobError::Panicked(panic_message(panic))),
        };

        match outcome {
            Ok(value) => {
                job.state = JobState::Completed;
                job.finished_at = Some(Utc::now());
                job.failed_reason = None;
                job.return_value = Some(value);

                if let Err(e) = self.store.complete(&job, self.policy.keep_completed).await {
                    tracing::error!(queue = %self.name, job_id = %job.id, error = %e, "Failed to record completed job");
                }

                JobMetrics::record_completed(self.name, started.elapsed());
                tracing::info!(
                    queue = %self.name,
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
            }
            Err(err) => self.handle_failure(job, err, started.elapsed()).await,
        }
    }

    async fn handle_failure(&self, mut job: Job, err: JobError, elapsed: Duration) {
        job.failed_reason = Some(err.to_string());

        if err.is_retryable() && !job.attempts_exhausted() {
            let delay = job.backoff.delay_for(job.attempts);
            job.state = JobState::Delayed;
            job.run_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();

            if let Err(e) = self.store.requeue(&job).await {
                tracing::error!(queue = %self.name, job_id = %job.id, error = %e, "Failed to schedule retry");
                return;
            }

            JobMetrics::record_retry(self.name, elapsed);
            tracing::warn!(
                queue = %self.name,
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %err,
                "Job attempt failed, retry scheduled"
            );
            return;
        }

        job.state = JobState::Failed;
        job.finished_at = Some(Utc::now());

        if let Err(e) = self.store.fail(&job, self.policy.keep_failed).await {
            tracing::error!(queue = %self.name, job_id = %job.id, error = %e, "Failed to record failed job");
        }

        JobMetrics::record_failed(self.name);
        tracing::error!(
            queue = %self.name,
            job_id = %job.id,
            job_type = %job.job_type,
            attempts = job.attempts,
            error = %err,
            "Job failed permanently"
        );
    }

    fn spawn_lease_renewal(&self, job_id: String) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let name = self.name;
        let lease = self.options.lease_duration;
        let period = (lease / 3).max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.renew_lease(name, &job_id, lease).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        tracing::warn!(queue = %name, job_id = %job_id, error = %e, "Failed to renew job lease");
                    }
                }
            }
        })
    }

    async fn stalled_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.options.stalled_check_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.recover_stalled().await {
                        tracing::warn!(queue = %self.name, error = %e, "Stalled job check failed");
                    }
                }
            }
        }
    }

    /// Return jobs whose lease expired to the waiting set, or fail them when
    /// their attempts are used up. Returns the number of stalled jobs found.
    pub async fn recover_stalled(&self) -> Result<usize, QueueError> {
        let stalled = self.store.take_stalled(self.name, Utc::now()).await?;
        if stalled.is_empty() {
            return Ok(0);
        }

        for mut job in stalled.iter().cloned() {
            job.stalled_count += 1;

            if job.attempts_exhausted() {
                job.state = JobState::Failed;
                job.finished_at = Some(Utc::now());
                job.failed_reason = Some(format!(
                    "Job stalled after {} of {} attempts",
                    job.attempts, job.max_attempts
                ));
                self.store.fail(&job, self.policy.keep_failed).await?;
                JobMetrics::record_failed(self.name);
            } else {
                job.state = JobState::Waiting;
                job.run_at = Utc::now();
                self.store.requeue(&job).await?;
            }
        }

        JobMetrics::record_stalled(self.name, stalled.len());
        tracing::warn!(queue = %self.name, count = stalled.len(), "Recovered stalled jobs");
        self.wakeup.notify_waiters();

        Ok(stalled.len())
    }

    /// Stop handing out jobs. Active jobs run to completion and submissions are still accepted.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!(queue = %self.name, "Queue paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.wakeup.notify_waiters();
        tracing::info!(queue = %self.name, "Queue resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting jobs and wait for the worker slots to finish their current job.
    ///
    /// Slots still running after the shutdown timeout are aborted; their jobs
    /// are picked up again by the stalled sweeper once their lease expires.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown_tx.send(true);
        self.wakeup.notify_waiters();

        let mut workers = std::mem::take(&mut *self.workers.lock().await);
        let wait = futures::future::join_all(workers.iter_mut());

        let result = timeout(self.options.shutdown_timeout, wait).await;
        match result {
            Ok(_) => tracing::info!(queue = %self.name, "Queue closed"),
            Err(_) => {
                for worker in &workers {
                    worker.abort();
                }
                tracing::warn!(
                    queue = %self.name,
                    timeout_secs = self.options.shutdown_timeout.as_secs(),
                    "Queue workers did not stop in time, aborted"
                );
            }
        }
    }

    pub async fn counts(&self) -> Result<JobCounts, QueueError> {
        self.store.counts(self.name).await
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(QueueStats {
            name: self.name,
            paused: self.is_paused(),
            concurrency: self.policy.concurrency,
            counts: self.counts().await?,
        })
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        self.store.get(self.name, job_id).await
    }

    pub async fn failed_jobs(&self, limit: usize) -> Result<Vec<Job>, QueueError> {
        self.store.failed(self.name, limit).await
    }

    pub async fn completed_jobs(&self, limit: usize) -> Result<Vec<Job>, QueueError> {
        self.store.completed(self.name, limit).await
    }

    /// Re-submit every failed job with its attempt counter reset.
    pub async fn retry_failed(&self) -> Result<usize, QueueError> {
        let failed = self.store.take_failed(self.name).await?;
        let now = Utc::now();

        for mut job in failed.iter().cloned() {
            job.reset_for_retry(now);
            self.store.requeue(&job).await?;
        }

        if !failed.is_empty() {
            self.wakeup.notify_waiters();
        }
        tracing::info!(queue = %self.name, count = failed.len(), "Failed jobs re-submitted");

        Ok(failed.len())
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{BackoffPolicy, MemoryJobStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    /// Fails the first `failures` attempts, then succeeds.
    struct FlakyHandler {
        failures: u32,
        calls: AtomicU32,
        retryable: bool,
    }

    impl FlakyHandler {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
                retryable: true,
            })
        }
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, _job: &Job) -> Result<serde_json::Value, JobError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                if self.retryable {
                    return Err(JobError::Delivery(format!("attempt {} failed", call)));
                }
                return Err(JobError::InvalidPayload("bad".into()));
            }
            Ok(json!({"call": call}))
        }
    }

    struct PanicHandler;

    #[async_trait]
    impl JobHandler for PanicHandler {
        async fn handle(&self, _job: &Job) -> Result<serde_json::Value, JobError> {
            panic!("handler exploded");
        }
    }

    /// Records the job types in processing order.
    #[derive(Default)]
    struct RecordingHandler {
        seen: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobHandler for RecordingHandler {
        async fn handle(&self, job: &Job) -> Result<serde_json::Value, JobError> {
            self.seen.lock().unwrap().push(job.job_type.clone());
            Ok(serde_json::Value::Null)
        }
    }

    fn fast_options() -> RuntimeOptions {
        RuntimeOptions {
            poll_interval: Duration::from_millis(10),
            lease_duration: Duration::from_secs(5),
            stalled_check_interval: Duration::from_secs(60),
            priority_range: 1..=10,
            shutdown_timeout: Duration::from_secs(2),
        }
    }

    fn policy(max_attempts: u32, concurrency: usize) -> QueuePolicy {
        QueuePolicy {
            concurrency,
            max_attempts,
            backoff: BackoffPolicy::Fixed { delay_ms: 10 },
            keep_completed: 50,
            keep_failed: 20,
        }
    }

    fn queue(max_attempts: u32, concurrency: usize) -> Arc<JobQueue> {
        JobQueue::new(
            QueueName::Email,
            policy(max_attempts, concurrency),
            fast_options(),
            Arc::new(MemoryJobStore::new()),
        )
    }

    async fn wait_for(queue: &JobQueue, condition: impl Fn(&JobCounts) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition(&queue.counts().await.unwrap()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue did not reach expected counts in time");
    }

    #[tokio::test]
    async fn test_submit_rejects_out_of_range_priority() {
        let q = queue(3, 1);
        let err = q
            .submit("welcome-email", json!({}), JobOptions::priority(11))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidPriority { priority: 11, .. }));
        assert_eq!(q.counts().await.unwrap(), JobCounts::default());
    }

    #[tokio::test]
    async fn test_submit_uses_default_priority() {
        let q = queue(3, 1);
        let job = q
            .submit("welcome-email", json!({}), JobOptions::default())
            .await
            .unwrap();
        assert_eq!(job.priority, 5);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(q.counts().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_job_completes() {
        let q = queue(3, 2);
        q.start(FlakyHandler::new(0)).await;

        let job = q
            .submit("welcome-email", json!({"to": "a@b.com"}), JobOptions::default())
            .await
            .unwrap();

        wait_for(&q, |c| c.completed == 1).await;

        let done = q.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.attempts, 1);
        assert_eq!(done.return_value, Some(json!({"call": 1})));
        q.close().await;
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let q = queue(3, 1);
        let handler = FlakyHandler::new(1);
        q.start(handler.clone()).await;

        let job = q
            .submit("welcome-email", json!({}), JobOptions::default())
            .await
            .unwrap();

        wait_for(&q, |c| c.completed == 1).await;

        let done = q.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(done.attempts, 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(q.counts().await.unwrap().failed, 0);
        q.close().await;
    }

    #[tokio::test]
    async fn test_exhausted_job_fails_and_can_be_retried() {
        let q = queue(2, 1);
        let handler = FlakyHandler::new(2);
        q.start(handler.clone()).await;

        let job = q
            .submit("welcome-email", json!({}), JobOptions::default())
            .await
            .unwrap();

        wait_for(&q, |c| c.failed == 1).await;

        let failed = q.failed_jobs(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, job.id);
        assert_eq!(failed[0].attempts, 2);
        assert_eq!(failed[0].failed_reason.as_deref(), Some("Delivery failed: attempt 2 failed"));

        assert_eq!(q.retry_failed().await.unwrap(), 1);
        wait_for(&q, |c| c.completed == 1).await;

        let done = q.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(done.attempts, 1);
        assert_eq!(q.counts().await.unwrap().failed, 0);
        q.close().await;
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let q = queue(3, 1);
        let handler = Arc::new(FlakyHandler {
            failures: 5,
            calls: AtomicU32::new(0),
            retryable: false,
        });
        q.start(handler.clone()).await;

        q.submit("welcome-email", json!({}), JobOptions::default())
            .await
            .unwrap();

        wait_for(&q, |c| c.failed == 1).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        q.close().await;
    }

    #[tokio::test]
    async fn test_panicking_handler_is_a_failed_attempt() {
        let q = queue(1, 1);
        q.start(Arc::new(PanicHandler)).await;

        q.submit("welcome-email", json!({}), JobOptions::default())
            .await
            .unwrap();

        wait_for(&q, |c| c.failed == 1).await;
        let failed = q.failed_jobs(1).await.unwrap();
        assert!(failed[0]
            .failed_reason
            .as_deref()
            .unwrap_or_default()
            .contains("handler exploded"));
        q.close().await;
    }

    #[tokio::test]
    async fn test_priority_order_after_resume() {
        let q = queue(1, 1);
        let handler = Arc::new(RecordingHandler::default());
        q.pause();
        q.start(handler.clone()).await;

        q.submit("low", json!({}), JobOptions::priority(1)).await.unwrap();
        q.submit("high", json!({}), JobOptions::priority(9)).await.unwrap();
        q.submit("mid", json!({}), JobOptions::priority(5)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(q.counts().await.unwrap().waiting, 3);

        q.resume();
        wait_for(&q, |c| c.completed == 3).await;

        let seen = handler.seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["high", "mid", "low"]);
        q.close().await;
    }

    #[tokio::test]
    async fn test_recover_stalled_requeues_job() {
        let store = Arc::new(MemoryJobStore::new());
        let q = JobQueue::new(QueueName::Email, policy(3, 1), fast_options(), store.clone());

        let job = q
            .submit("welcome-email", json!({}), JobOptions::default())
            .await
            .unwrap();
        store
            .claim(QueueName::Email, Utc::now(), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(q.recover_stalled().await.unwrap(), 1);

        let recovered = q.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(recovered.state, JobState::Waiting);
        assert_eq!(recovered.stalled_count, 1);
        assert_eq!(q.counts().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_submissions() {
        let q = queue(3, 1);
        q.start(FlakyHandler::new(0)).await;
        q.close().await;

        let err = q
            .submit("welcome-email", json!({}), JobOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Closed(QueueName::Email)));
    }

    #[tokio::test]
    async fn test_stats_report_pause_state() {
        let q = queue(3, 4);
        q.pause();
        let stats = q.stats().await.unwrap();
        assert!(stats.paused);
        assert_eq!(stats.concurrency, 4);

        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["name"], "email");
        assert_eq!(value["waiting"], 0);
    }
}
