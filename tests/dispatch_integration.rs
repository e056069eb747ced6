//! End-to-end tests of the dispatch pipeline.
//!
//! Every test runs against the in-memory backends: events go in through the
//! HTTP router, workers run on the real queue runtime, and results are read
//! back through the API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tokio_test::assert_ok;
use tower::ServiceExt;

use notification_dispatch_service::config::{BackoffKind, Settings};
use notification_dispatch_service::notification::{
    MemoryNotificationStore, Notification, NotificationStore,
};
use notification_dispatch_service::queue::{JobCounts, JobQueue, JobState};
use notification_dispatch_service::server::{create_app, AppState};
use notification_dispatch_service::template::{HelperContext, TemplateRenderer};
use notification_dispatch_service::workers::{
    DeliveryReceipt, MailError, MailMessage, MailTransport,
};

/// Records sent mail and fails while `failures` is above zero.
#[derive(Default)]
struct TestTransport {
    sent: Mutex<Vec<MailMessage>>,
    failures: AtomicUsize,
}

impl TestTransport {
    fn failing(times: usize) -> Self {
        Self {
            failures: AtomicUsize::new(times),
            ..Default::default()
        }
    }

    fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for TestTransport {
    fn name(&self) -> &'static str {
        "test"
    }

    async fn send(&self, message: &MailMessage) -> Result<DeliveryReceipt, MailError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(MailError::Unavailable("relay down".to_string()));
        }

        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        Ok(DeliveryReceipt {
            message_id: format!("m-{}", sent.len()),
        })
    }
}

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.queue.poll_interval_ms = 10;
    settings.queue.shutdown_timeout_seconds = 1;
    settings.queue.email.backoff = BackoffKind::Fixed;
    settings.queue.email.backoff_delay_ms = 20;
    settings.queue.in_app.backoff_delay_ms = 20;
    settings
}

async fn setup(settings: Settings, transport: Arc<TestTransport>) -> (AppState, Router) {
    let state = AppState::with_transport(settings, None, transport);
    state.start_workers().await;
    let app = create_app(state.clone());
    (state, app)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn wait_for(queue: &JobQueue, condition: impl Fn(&JobCounts) -> bool) {
    for _ in 0..300 {
        if condition(&queue.counts().await.unwrap()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue {} never reached expected state", queue.name());
}

#[tokio::test]
async fn test_user_registered_end_to_end() {
    let transport = Arc::new(TestTransport::default());
    let (state, app) = setup(test_settings(), transport.clone()).await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/events",
        Some(json!({
            "eventType": "user.registered",
            "data": {"user": {"id": "u1", "email": "a@b.com", "firstName": "Ann"}},
        })),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["processedNotifications"], 2);
    let types: Vec<&str> = body["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["type"].as_str().unwrap())
        .collect();
    assert_eq!(types, vec!["welcome-email", "welcome-notification"]);

    wait_for(&state.in_app_queue, |c| c.completed == 1).await;
    wait_for(&state.email_queue, |c| c.completed == 1).await;

    let (status, feed) = call(&app, Method::GET, "/notifications/user/u1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(feed["notifications"].as_array().unwrap().len(), 1);
    assert_eq!(feed["notifications"][0]["status"], "unread");
    assert_eq!(feed["notifications"][0]["category"], "account");
    assert_eq!(feed["unreadCount"], 1);
    assert_eq!(feed["hasMore"], false);

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "a@b.com");
    assert!(sent[0].html.as_deref().unwrap().contains("Welcome, Ann!"));
}

#[tokio::test]
async fn test_order_shipped_scenario() {
    let transport = Arc::new(TestTransport::default());
    let state = AppState::with_transport(test_settings(), None, transport);
    let app = create_app(state.clone());

    let (status, body) = call(
        &app,
        Method::POST,
        "/events",
        Some(json!({
            "eventType": "order.shipped",
            "data": {"order": {"id": "o1"}, "user": {"id": "u1", "email": "a@b.com"}, "trackingNumber": "T1"},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let email_id = body["jobs"][0]["jobId"].as_str().unwrap();
    let email_job = state.email_queue.get_job(email_id).await.unwrap().unwrap();
    assert_eq!(email_job.payload["template"], "order-shipped");
    assert_eq!(email_job.payload["templateData"]["trackingNumber"], "T1");

    state.start_workers().await;
    wait_for(&state.in_app_queue, |c| c.completed == 1).await;

    let feed = state.store.read("u1", 10).await.unwrap();
    assert!(feed[0].message.contains("T1"));
}

#[tokio::test]
async fn test_invalid_events_submit_nothing() {
    let (state, app) = setup(test_settings(), Arc::new(TestTransport::default())).await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/events",
        Some(json!({"eventType": "user.exploded", "data": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = call(&app, Method::POST, "/events", Some(json!({"data": {}}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &app,
        Method::POST,
        "/events",
        Some(json!({"eventType": "order.created", "data": {"order": {"id": "o1"}}})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "UNPROCESSABLE_ENTITY");

    for queue in state.queues() {
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.waiting + counts.delayed + counts.active + counts.completed, 0);
    }
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let (state, app) = setup(test_settings(), Arc::new(TestTransport::default())).await;

    let padding = "x".repeat(2 * 1024 * 1024);
    let body = json!({
        "eventType": "user.registered",
        "data": {"user": {"id": "u1", "email": "a@b.com"}, "padding": padding},
    });
    let request = Request::builder()
        .method(Method::POST)
        .uri("/events")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(state.email_queue.counts().await.unwrap().waiting, 0);
}

#[tokio::test]
async fn test_narrow_priority_range_accepts_every_level() {
    let mut settings = test_settings();
    settings.queue.min_priority = 1;
    settings.queue.max_priority = 5;
    assert_ok!(settings.validate());
    let (state, app) = setup(settings, Arc::new(TestTransport::default())).await;
    state.email_queue.pause();

    let (status, body) = call(
        &app,
        Method::POST,
        "/events",
        Some(json!({
            "eventType": "user.registered",
            "data": {"user": {"id": "u1", "email": "a@b.com"}},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let welcome_id = body["jobs"][0]["jobId"].as_str().unwrap().to_string();

    for level in ["LOW", "MEDIUM", "HIGH", "URGENT"] {
        let (status, _) = call(
            &app,
            Method::POST,
            "/notifications/send",
            Some(json!({
                "type": "EMAIL",
                "recipient": "a@b.com",
                "title": "Hi",
                "message": "x",
                "priority": level,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED, "priority {}", level);
    }

    let welcome = state.email_queue.get_job(&welcome_id).await.unwrap().unwrap();
    assert_eq!(welcome.priority, 4);
}

#[tokio::test]
async fn test_event_types_listing() {
    let (_, app) = setup(test_settings(), Arc::new(TestTransport::default())).await;

    let (status, body) = call(&app, Method::GET, "/events/types", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 8);
    assert_eq!(body["eventTypes"][0]["eventType"], "user.registered");
    assert_eq!(body["eventTypes"][0]["requiredFields"], json!(["user.id", "user.email"]));
}

#[tokio::test]
async fn test_email_retries_until_delivered() {
    let transport = Arc::new(TestTransport::failing(2));
    let (state, app) = setup(test_settings(), transport.clone()).await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/notifications/send",
        Some(json!({
            "type": "EMAIL",
            "recipient": "a@b.com",
            "title": "Hello",
            "message": "Just checking in",
            "priority": "HIGH",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["type"], "EMAIL");
    assert_eq!(body["status"], "waiting");

    wait_for(&state.email_queue, |c| c.completed == 1).await;

    let job = state
        .email_queue
        .get_job(body["jobId"].as_str().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 3);
    assert_eq!(job.return_value.unwrap()["recipient"], "a@b.com");
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn test_exhausted_job_fails_and_bulk_retry_resubmits() {
    let transport = Arc::new(TestTransport::failing(3));
    let (state, app) = setup(test_settings(), transport.clone()).await;

    let (_, body) = call(
        &app,
        Method::POST,
        "/notifications/send",
        Some(json!({"type": "EMAIL", "recipient": "a@b.com", "title": "Hi", "message": "x"})),
    )
    .await;
    let job_id = body["jobId"].as_str().unwrap().to_string();

    wait_for(&state.email_queue, |c| c.failed == 1).await;

    let (status, failed) = call(&app, Method::GET, "/notifications/admin/queue/email/failed", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(failed["jobs"][0]["id"], job_id.as_str());
    assert_eq!(failed["jobs"][0]["attempts"], 3);

    let (status, retried) = call(
        &app,
        Method::POST,
        "/notifications/admin/queue/retry",
        Some(json!({"queueType": "email"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(retried["retried"], 1);

    wait_for(&state.email_queue, |c| c.completed == 1 && c.failed == 0).await;
    let job = assert_ok!(state.email_queue.get_job(&job_id).await).unwrap();
    assert_eq!(job.attempts, 1);
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn test_feed_read_state_and_delete() {
    let (state, app) = setup(test_settings(), Arc::new(TestTransport::default())).await;

    let first = Notification::new("u1", "First", "one");
    let second = Notification::new("u1", "Second", "two");
    assert_ok!(state.store.append(&first).await);
    assert_ok!(state.store.append(&second).await);

    let uri = format!("/notifications/{}/read", first.id);
    let (status, body) = call(&app, Method::PUT, &uri, Some(json!({"userId": "u1"}))).await;
    assert_eq!(status, StatusCode::OK);
    let read_at = body["notification"]["readAt"].clone();
    assert!(read_at.is_string());

    let (status, again) = call(&app, Method::PUT, &uri, Some(json!({"userId": "u1"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["notification"]["status"], "read");
    assert_eq!(again["notification"]["readAt"], read_at);

    let (status, _) = call(&app, Method::PUT, "/notifications/missing/read", Some(json!({"userId": "u1"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, Method::PUT, &uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, feed) = call(&app, Method::GET, "/notifications/user/u1?unreadOnly=true", None).await;
    assert_eq!(feed["notifications"].as_array().unwrap().len(), 1);
    assert_eq!(feed["unreadCount"], 1);

    let (status, body) = call(
        &app,
        Method::DELETE,
        &format!("/notifications/{}", second.id),
        Some(json!({"userId": "u1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    let (_, feed) = call(&app, Method::GET, "/notifications/user/u1", None).await;
    let ids: Vec<&str> = feed["notifications"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![first.id.as_str()]);
    assert_eq!(feed["unreadCount"], 0);
}

#[tokio::test]
async fn test_mark_all_read() {
    let (state, app) = setup(test_settings(), Arc::new(TestTransport::default())).await;
    for i in 0..3 {
        assert_ok!(state.store.append(&Notification::new("u2", format!("n{}", i), "m")).await);
    }

    let (status, body) = call(&app, Method::PUT, "/notifications/user/u2/read-all", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], 3);
    assert_eq!(state.store.unread_count("u2").await.unwrap(), 0);
}

#[tokio::test]
async fn test_feed_has_more() {
    let (state, app) = setup(test_settings(), Arc::new(TestTransport::default())).await;
    for i in 0..3 {
        assert_ok!(state.store.append(&Notification::new("u3", format!("n{}", i), "m")).await);
    }

    let (_, feed) = call(&app, Method::GET, "/notifications/user/u3?limit=2", None).await;
    assert_eq!(feed["notifications"].as_array().unwrap().len(), 2);
    assert_eq!(feed["hasMore"], true);
}

#[tokio::test]
async fn test_admin_routes_require_api_key() {
    let mut settings = test_settings();
    settings.api.key = Some("secret".to_string());
    let (_, app) = setup(settings, Arc::new(TestTransport::default())).await;

    let (status, body) = call(&app, Method::GET, "/notifications/admin/queue/stats", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let request = Request::builder()
        .uri("/notifications/admin/queue/stats")
        .header("X-API-Key", "secret")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let stats: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(stats["email"]["name"], "email");
    assert_eq!(stats["inApp"]["paused"], false);
}

#[tokio::test]
async fn test_pause_and_resume_queue() {
    let (state, app) = setup(test_settings(), Arc::new(TestTransport::default())).await;

    let (status, _) = call(&app, Method::POST, "/notifications/admin/queue/in_app/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.in_app_queue.is_paused());

    call(
        &app,
        Method::POST,
        "/notifications/send",
        Some(json!({"type": "IN_APP", "recipient": "u4", "title": "Hi", "message": "x"})),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.in_app_queue.counts().await.unwrap().waiting, 1);

    let (status, _) = call(&app, Method::POST, "/notifications/admin/queue/in-app/resume", None).await;
    assert_eq!(status, StatusCode::OK);
    wait_for(&state.in_app_queue, |c| c.completed == 1).await;

    let (status, _) = call(&app, Method::POST, "/notifications/admin/queue/sms/pause", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_template_invalidation_endpoint() {
    let (state, app) = setup(test_settings(), Arc::new(TestTransport::default())).await;
    state.renderer.render("welcome", &json!({})).await;
    state.renderer.render("admin-alert", &json!({})).await;

    let (_, body) = call(
        &app,
        Method::POST,
        "/notifications/admin/templates/invalidate",
        Some(json!({"name": "welcome"})),
    )
    .await;
    assert_eq!(body["invalidated"], 1);

    let (status, body) = call(&app, Method::POST, "/notifications/admin/templates/invalidate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["invalidated"], 1);
    assert_eq!(state.renderer.cached(), 0);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let (_, app) = setup(test_settings(), Arc::new(TestTransport::default())).await;

    let (status, body) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "memory");

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()).unwrap();
    assert!(text.contains("dispatch_queue_jobs"));
}

#[tokio::test]
async fn test_unknown_template_renders_passthrough() {
    let renderer = TemplateRenderer::new(None, HelperContext::default());
    let html = renderer
        .render("nonexistent-template", &json!({"title": "Hi", "count": 3}))
        .await;

    assert!(!html.is_empty());
    assert!(html.contains("Hi"));
}

#[tokio::test]
async fn test_zero_ttl_records_are_absent() {
    let store = MemoryNotificationStore::new(Duration::ZERO, 10);
    let notification = Notification::new("u1", "Gone", "soon");
    assert_ok!(store.append(&notification).await);

    assert!(store.read("u1", 10).await.unwrap().is_empty());
    assert!(store.get("u1", &notification.id).await.unwrap().is_none());
}
