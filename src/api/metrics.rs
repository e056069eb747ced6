//! Prometheus metrics endpoint.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::metrics::{self, QueueGauges};
use crate::redis::CircuitState;
use crate::server::AppState;

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    update_metrics_from_state(&state).await;

    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Refresh gauges that are sampled rather than counted.
async fn update_metrics_from_state(state: &AppState) {
    for queue in state.queues() {
        match queue.counts().await {
            Ok(counts) => QueueGauges::update(queue.name(), &counts),
            Err(e) => tracing::debug!(queue = %queue.name(), error = %e, "Skipping queue gauges"),
        }
    }

    if let Some(pool) = &state.redis_pool {
        metrics::REDIS_CONNECTION_STATUS.set(if pool.is_healthy() { 1 } else { 0 });
        let cb_state = match pool.circuit_state() {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        };
        metrics::REDIS_CIRCUIT_BREAKER_STATE.set(cb_state);
    }
}
