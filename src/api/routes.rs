use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use crate::server::middleware::api_key_auth;
use crate::server::AppState;

use super::admin::{
    failed_jobs, invalidate_templates, pause_queue, queue_stats, resume_queue, retry_failed,
};
use super::events::{ingest_event, list_event_types};
use super::health::health;
use super::metrics::prometheus_metrics;
use super::notifications::{
    delete_notification, mark_all_read, mark_read, send_notification, user_feed,
};

pub fn api_routes(state: AppState) -> Router<AppState> {
    let admin = Router::new()
        .route("/queue/stats", get(queue_stats))
        .route("/queue/retry", post(retry_failed))
        .route("/queue/{queue_type}/failed", get(failed_jobs))
        .route("/queue/{queue_type}/pause", post(pause_queue))
        .route("/queue/{queue_type}/resume", post(resume_queue))
        .route("/templates/invalidate", post(invalidate_templates))
        .route_layer(middleware::from_fn_with_state(state, api_key_auth));

    Router::new()
        // Health & Metrics
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        // Event ingestion
        .route("/events", post(ingest_event))
        .route("/events/types", get(list_event_types))
        // Notifications
        .route("/notifications/send", post(send_notification))
        .route("/notifications/user/{user_id}", get(user_feed))
        .route("/notifications/user/{user_id}/read-all", put(mark_all_read))
        .route("/notifications/{id}/read", put(mark_read))
        .route("/notifications/{id}", delete(delete_notification))
        .nest("/notifications/admin", admin)
}
