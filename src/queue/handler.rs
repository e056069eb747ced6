//! Job handler seam between the queue runtime and the workers

use async_trait::async_trait;
use thiserror::Error;

use super::job::Job;

/// Outcome of a failed attempt.
#[derive(Debug, Error)]
pub enum JobError {
    /// Payload cannot be processed no matter how often it is retried
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Storage failed: {0}")]
    Storage(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, JobError::InvalidPayload(_))
    }
}

/// Processes the jobs of one queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one attempt. The returned value is stored as the job's return value.
    async fn handle(&self, job: &Job) -> Result<serde_json::Value, JobError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(!JobError::InvalidPayload("missing to".into()).is_retryable());
        assert!(JobError::Delivery("smtp".into()).is_retryable());
        assert!(JobError::Timeout(5000).is_retryable());
        assert!(JobError::Panicked("boom".into()).is_retryable());
    }
}
