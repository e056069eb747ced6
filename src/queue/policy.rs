//! Retry, retention and runtime policies

use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{BackoffKind, QueuePolicyConfig, QueueSettings};

/// Delay before a failed attempt becomes eligible again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackoffPolicy {
    /// `delay_ms * 2^(attempt - 1)`: 5s, 10s, 20s for a 5s base
    Exponential {
        #[serde(rename = "delayMs")]
        delay_ms: u64,
    },
    Fixed {
        #[serde(rename = "delayMs")]
        delay_ms: u64,
    },
}

impl BackoffPolicy {
    /// Delay after the `attempt`-th failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            BackoffPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            BackoffPolicy::Exponential { delay_ms } => {
                let exponent = attempt.saturating_sub(1).min(32);
                Duration::from_millis(delay_ms.saturating_mul(1u64 << exponent))
            }
        }
    }
}

/// Per-queue retry and retention policy.
#[derive(Debug, Clone)]
pub struct QueuePolicy {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Completed jobs kept for inspection
    pub keep_completed: usize,
    /// Terminally failed jobs kept for inspection and bulk retry
    pub keep_failed: usize,
}

impl QueuePolicy {
    pub fn email() -> Self {
        Self::from(&QueuePolicyConfig::email_defaults())
    }

    pub fn in_app() -> Self {
        Self::from(&QueuePolicyConfig::in_app_defaults())
    }
}

impl From<&QueuePolicyConfig> for QueuePolicy {
    fn from(config: &QueuePolicyConfig) -> Self {
        let backoff = match config.backoff {
            BackoffKind::Exponential => BackoffPolicy::Exponential {
                delay_ms: config.backoff_delay_ms,
            },
            BackoffKind::Fixed => BackoffPolicy::Fixed {
                delay_ms: config.backoff_delay_ms,
            },
        };

        Self {
            concurrency: config.concurrency.max(1),
            max_attempts: config.max_attempts.max(1),
            backoff,
            keep_completed: config.keep_completed,
            keep_failed: config.keep_failed,
        }
    }
}

/// Timing knobs shared by both queues.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub poll_interval: Duration,
    pub lease_duration: Duration,
    pub stalled_check_interval: Duration,
    pub priority_range: RangeInclusive<u8>,
    pub shutdown_timeout: Duration,
}

impl RuntimeOptions {
    /// Priority used when a submission does not carry one.
    pub fn default_priority(&self) -> u8 {
        let (lo, hi) = (*self.priority_range.start(), *self.priority_range.end());
        lo + (hi - lo) / 2
    }

    /// Map a level on the 1..=10 notification scale onto `priority_range`.
    /// Order between levels is kept; narrow ranges may merge neighbours.
    pub fn scale_priority(&self, level: u8) -> u8 {
        let (lo, hi) = (
            *self.priority_range.start() as u32,
            *self.priority_range.end() as u32,
        );
        let step = (level.clamp(1, 10) - 1) as u32;
        let span = hi.saturating_sub(lo);
        (lo + (step * span + 4) / 9) as u8
    }
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self::from(&QueueSettings::default())
    }
}

impl From<&QueueSettings> for RuntimeOptions {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            lease_duration: Duration::from_millis(settings.lease_duration_ms.max(1)),
            stalled_check_interval: Duration::from_millis(settings.stalled_check_interval_ms.max(1)),
            priority_range: settings.min_priority..=settings.max_priority,
            shutdown_timeout: Duration::from_secs(settings.shutdown_timeout_seconds),
        }
    }
}
