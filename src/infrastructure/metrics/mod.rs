//! Prometheus metrics for the dispatch service.
//!
//! - Event metrics (received, rejected, jobs produced)
//! - Job metrics per queue (submitted, completed, failed, retried, stalled, duration)
//! - Queue gauges (waiting, active, delayed, completed, failed)
//! - Delivery metrics (emails sent, notifications stored)
//! - Template metrics (fallback renders)
//! - Redis health metrics

mod helpers;

pub use helpers::{encode_metrics, EventMetrics, JobMetrics, QueueGauges};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "dispatch";

lazy_static! {
    // ============================================================================
    // Event Metrics
    // ============================================================================

    /// Events accepted by the router, by event type
    pub static ref EVENTS_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_events_received_total", METRIC_PREFIX),
        "Total domain events accepted for routing",
        &["event_type"]
    ).unwrap();

    /// Events rejected during validation, by reason
    pub static ref EVENTS_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_events_rejected_total", METRIC_PREFIX),
        "Total domain events rejected before routing",
        &["reason"]
    ).unwrap();

    // ============================================================================
    // Job Metrics
    // ============================================================================

    pub static ref JOBS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_jobs_submitted_total", METRIC_PREFIX),
        "Total jobs submitted",
        &["queue", "job_type"]
    ).unwrap();

    pub static ref JOBS_COMPLETED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_jobs_completed_total", METRIC_PREFIX),
        "Total jobs completed",
        &["queue"]
    ).unwrap();

    /// Terminal failures only; retryable failures are counted as retries
    pub static ref JOBS_FAILED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_jobs_failed_total", METRIC_PREFIX),
        "Total jobs that exhausted their attempts",
        &["queue"]
    ).unwrap();

    pub static ref JOBS_RETRIED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_jobs_retried_total", METRIC_PREFIX),
        "Total job attempts scheduled for retry after a failure",
        &["queue"]
    ).unwrap();

    pub static ref JOBS_STALLED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_jobs_stalled_total", METRIC_PREFIX),
        "Total active jobs recovered after their lease expired",
        &["queue"]
    ).unwrap();

    pub static ref JOB_DURATION: HistogramVec = register_histogram_vec!(
        format!("{}_job_duration_seconds", METRIC_PREFIX),
        "Job handler execution time in seconds",
        &["queue"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    // ============================================================================
    // Queue Gauges
    // ============================================================================

    pub static ref QUEUE_JOBS: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_queue_jobs", METRIC_PREFIX),
        "Jobs per queue and state",
        &["queue", "state"]
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    pub static ref EMAILS_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_emails_sent_total", METRIC_PREFIX),
        "Total emails accepted by the mail transport"
    ).unwrap();

    pub static ref NOTIFICATIONS_STORED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_stored_total", METRIC_PREFIX),
        "Total in-app notifications appended to user feeds"
    ).unwrap();

    /// Renders that used a built-in, passthrough or diagnostic body
    pub static ref TEMPLATE_FALLBACK_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_template_fallback_total", METRIC_PREFIX),
        "Total template renders that fell back",
        &["kind"]
    ).unwrap();

    // ============================================================================
    // Redis Metrics
    // ============================================================================

    /// Redis connection status (1 = connected, 0 = disconnected)
    pub static ref REDIS_CONNECTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_redis_connection_status", METRIC_PREFIX),
        "Redis connection status (1=connected, 0=disconnected)"
    ).unwrap();

    /// Redis circuit breaker state (0=closed, 1=open, 2=half-open)
    pub static ref REDIS_CIRCUIT_BREAKER_STATE: IntGauge = register_int_gauge!(
        format!("{}_redis_circuit_breaker_state", METRIC_PREFIX),
        "Redis circuit breaker state (0=closed, 1=open, 2=half-open)"
    ).unwrap();

    pub static ref REDIS_COMMAND_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_redis_command_errors_total", METRIC_PREFIX),
        "Total Redis commands that failed or timed out"
    ).unwrap();
}
