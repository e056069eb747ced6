//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use crate::queue::{JobCounts, QueueName};

use super::{
    EVENTS_RECEIVED_TOTAL, EVENTS_REJECTED_TOTAL, JOBS_COMPLETED_TOTAL, JOBS_FAILED_TOTAL,
    JOBS_RETRIED_TOTAL, JOBS_STALLED_TOTAL, JOBS_SUBMITTED_TOTAL, JOB_DURATION, QUEUE_JOBS,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

pub struct EventMetrics;

impl EventMetrics {
    pub fn record_received(event_type: &str) {
        EVENTS_RECEIVED_TOTAL.with_label_values(&[event_type]).inc();
    }

    pub fn record_rejected(reason: &str) {
        EVENTS_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }
}

/// Per-queue job lifecycle counters
pub struct JobMetrics;

impl JobMetrics {
    pub fn record_submitted(queue: QueueName, job_type: &str) {
        JOBS_SUBMITTED_TOTAL
            .with_label_values(&[queue.as_str(), job_type])
            .inc();
    }

    pub fn record_completed(queue: QueueName, elapsed: Duration) {
        JOBS_COMPLETED_TOTAL.with_label_values(&[queue.as_str()]).inc();
        JOB_DURATION
            .with_label_values(&[queue.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_retry(queue: QueueName, elapsed: Duration) {
        JOBS_RETRIED_TOTAL.with_label_values(&[queue.as_str()]).inc();
        JOB_DURATION
            .with_label_values(&[queue.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_failed(queue: QueueName) {
        JOBS_FAILED_TOTAL.with_label_values(&[queue.as_str()]).inc();
    }

    pub fn record_stalled(queue: QueueName, count: usize) {
        JOBS_STALLED_TOTAL
            .with_label_values(&[queue.as_str()])
            .inc_by(count as u64);
    }
}

pub struct QueueGauges;

impl QueueGauges {
    pub fn update(queue: QueueName, counts: &JobCounts) {
        let name = queue.as_str();
        for (state, value) in [
            ("waiting", counts.waiting),
            ("delayed", counts.delayed),
            ("active", counts.active),
            ("completed", counts.completed),
            ("failed", counts.failed),
        ] {
            QUEUE_JOBS
                .with_label_values(&[name, state])
                .set(value as i64);
        }
    }
}
