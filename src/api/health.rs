//! Health check endpoint.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::queue::QueueStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthResponse>,
    pub store: &'static str,
    pub queues: Vec<QueueStats>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisHealthResponse {
    pub status: &'static str,
    pub connected: bool,
    pub circuit_breaker: &'static str,
}

/// GET /health
///
/// 200 while everything answers, 503 when Redis or a queue backend does not.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let redis = state.redis_pool.as_ref().map(|pool| RedisHealthResponse {
        status: pool.health().status().as_str(),
        connected: pool.is_healthy(),
        circuit_breaker: pool.circuit_state().as_str(),
    });
    let redis_ok = redis.as_ref().map(|r| r.connected).unwrap_or(true);

    let mut queues = Vec::with_capacity(2);
    let mut queues_ok = true;
    for queue in state.queues() {
        match queue.stats().await {
            Ok(stats) => queues.push(stats),
            Err(e) => {
                tracing::warn!(queue = %queue.name(), error = %e, "Queue stats unavailable");
                queues_ok = false;
            }
        }
    }

    let healthy = redis_ok && queues_ok;
    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            uptime_seconds: state.start_time.elapsed().as_secs(),
            redis,
            store: state.store.backend_type(),
            queues,
        }),
    )
}
