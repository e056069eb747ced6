//! Job data model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::policy::{BackoffPolicy, RuntimeOptions};

/// The two independently configured queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Email,
    InApp,
}

impl QueueName {
    pub const ALL: [QueueName; 2] = [QueueName::Email, QueueName::InApp];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Email => "email",
            QueueName::InApp => "in_app",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "email" => Ok(QueueName::Email),
            "in_app" | "inapp" => Ok(QueueName::InApp),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Eligible, waiting for a worker slot
    Waiting,
    /// Not eligible before `run_at` (initial delay or retry backoff)
    Delayed,
    Active,
    Completed,
    /// Attempts exhausted; kept in the failed history until retried or trimmed
    Failed,
}

/// Per-submission options.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    /// Queue default priority is used when unset
    pub priority: Option<u8>,
    #[serde(default)]
    pub delay_ms: u64,
}

impl JobOptions {
    pub fn priority(priority: u8) -> Self {
        Self {
            priority: Some(priority),
            delay_ms: 0,
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

/// A job the router wants submitted; turned into a [`Job`] by the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSubmission {
    pub queue: QueueName,
    pub job_type: String,
    pub payload: serde_json::Value,
    /// Level on the 1..=10 notification scale, mapped onto the queue's range at submit
    pub priority: u8,
    pub delay_ms: u64,
}

impl JobSubmission {
    pub fn options(&self, runtime: &RuntimeOptions) -> JobOptions {
        JobOptions::priority(runtime.scale_priority(self.priority)).with_delay(self.delay_ms)
    }
}

/// A unit of work owned by the queue runtime for its whole lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub queue_name: QueueName,
    pub job_type: String,
    pub payload: serde_json::Value,
    /// Higher runs first
    pub priority: u8,
    pub delay_ms: u64,
    /// Attempts started so far; incremented when the job turns active
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub state: JobState,
    /// Submission order, used as the FIFO tie-break between equal priorities
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    /// Earliest time the job may be dequeued
    pub run_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stalled_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<serde_json::Value>,
}

impl Job {
    pub fn new(
        queue_name: QueueName,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        priority: u8,
        delay_ms: u64,
        max_attempts: u32,
        backoff: BackoffPolicy,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            queue_name,
            job_type: job_type.into(),
            payload,
            priority,
            delay_ms,
            attempts: 0,
            max_attempts,
            backoff,
            state: if delay_ms > 0 {
                JobState::Delayed
            } else {
                JobState::Waiting
            },
            seq: 0,
            created_at: now,
            run_at: now + chrono::Duration::milliseconds(delay_ms as i64),
            started_at: None,
            finished_at: None,
            stalled_count: 0,
            failed_reason: None,
            return_value: None,
        }
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.run_at <= now
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Reset for administrative re-submission of a failed job.
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) {
        self.attempts = 0;
        self.state = JobState::Waiting;
        self.run_at = now;
        self.started_at = None;
        self.finished_at = None;
        self.failed_reason = None;
        self.return_value = None;
        self.stalled_count = 0;
    }
}

/// Aggregate counts per queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(delay_ms: u64) -> Job {
        Job::new(
            QueueName::Email,
            "welcome-email",
            serde_json::json!({"to": "a@b.com"}),
            5,
            delay_ms,
            3,
            BackoffPolicy::Fixed { delay_ms: 10 },
        )
    }

    #[test]
    fn test_new_job_state_follows_delay() {
        assert_eq!(job(0).state, JobState::Waiting);
        let delayed = job(60_000);
        assert_eq!(delayed.state, JobState::Delayed);
        assert!(!delayed.is_eligible(Utc::now()));
    }

    #[test]
    fn test_reset_for_retry() {
        let mut j = job(0);
        j.attempts = 3;
        j.state = JobState::Failed;
        j.failed_reason = Some("smtp down".into());

        j.reset_for_retry(Utc::now());
        assert_eq!(j.attempts, 0);
        assert_eq!(j.state, JobState::Waiting);
        assert!(j.failed_reason.is_none());
    }

    #[test]
    fn test_queue_name_parsing() {
        assert_eq!("email".parse::<QueueName>().unwrap(), QueueName::Email);
        assert_eq!("in-app".parse::<QueueName>().unwrap(), QueueName::InApp);
        assert_eq!("IN_APP".parse::<QueueName>().unwrap(), QueueName::InApp);
        assert!("sms".parse::<QueueName>().is_err());
    }

    #[test]
    fn test_job_serializes_camel_case() {
        let value = serde_json::to_value(job(0)).unwrap();
        assert_eq!(value["queueName"], "email");
        assert_eq!(value["jobType"], "welcome-email");
        assert_eq!(value["maxAttempts"], 3);
        assert!(value.get("failedReason").is_none());
    }
}
