//! API layer - HTTP endpoint handlers organized by concern.

mod admin;
mod events;
mod health;
mod metrics;
mod notifications;
mod routes;

pub use admin::{
    failed_jobs, invalidate_templates, pause_queue, queue_stats, resume_queue, retry_failed,
};
pub use events::{ingest_event, list_event_types, EventRequest, EventResponse};
pub use health::health;
pub use metrics::prometheus_metrics;
pub use notifications::{
    delete_notification, mark_all_read, mark_read, send_notification, user_feed, Channel,
    SendNotificationRequest,
};
pub use routes::api_routes;
