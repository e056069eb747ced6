//! Event routing: turns a validated event into job submissions.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::EventsConfig;
use crate::metrics::EventMetrics;
use crate::notification::{Category, Priority};
use crate::queue::{JobQueue, JobSubmission, QueueName};

use super::types::{text_at, value_at, DomainEvent, EventError, EventType};

/// Settings the routing functions depend on.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub admin_email: String,
    pub notify_admin_actions: bool,
}

impl From<&EventsConfig> for RouterConfig {
    fn from(config: &EventsConfig) -> Self {
        Self {
            admin_email: config.admin_email.clone(),
            notify_admin_actions: config.notify_admin_actions,
        }
    }
}

/// Jobs to submit for `event`. Pure: the same event always yields the same set.
pub fn route(event: &DomainEvent, config: &RouterConfig) -> Vec<JobSubmission> {
    let data = &event.data;
    match event.event_type {
        EventType::UserRegistered => user_registered(data),
        EventType::OrderCreated => order_created(data),
        EventType::OrderConfirmed => order_confirmed(data),
        EventType::OrderShipped => order_shipped(data),
        EventType::OrderDelivered => order_delivered(data),
        EventType::OrderCancelled => order_cancelled(data),
        EventType::ProductLowStock => product_low_stock(data, config),
        EventType::AdminAction => admin_action(data, config),
    }
}

fn email_job(
    job_type: &str,
    priority: Priority,
    to: String,
    subject: String,
    template: &str,
    template_data: Value,
) -> JobSubmission {
    JobSubmission {
        queue: QueueName::Email,
        job_type: job_type.to_string(),
        payload: json!({
            "to": to,
            "subject": subject,
            "template": template,
            "templateData": template_data,
        }),
        priority: priority.job_priority(),
        delay_ms: 0,
    }
}

struct InAppContent {
    title: String,
    message: String,
    category: Category,
    priority: Priority,
    data: Value,
    action_url: Option<String>,
}

fn in_app_job(job_type: &str, user_id: String, content: InAppContent) -> JobSubmission {
    JobSubmission {
        queue: QueueName::InApp,
        job_type: job_type.to_string(),
        payload: json!({
            "userId": user_id,
            "title": content.title,
            "message": content.message,
            "category": content.category,
            "priority": content.priority,
            "data": content.data,
            "actionUrl": content.action_url,
        }),
        priority: content.priority.job_priority(),
        delay_ms: 0,
    }
}

fn order_notification(
    data: &Value,
    job_type: &str,
    title: &str,
    message: String,
    extra: Value,
) -> JobSubmission {
    let order_id = text_at(data, "order.id");
    let mut payload = json!({ "orderId": order_id });
    if let (Some(target), Value::Object(extra)) = (payload.as_object_mut(), extra) {
        target.extend(extra);
    }

    in_app_job(
        job_type,
        text_at(data, "user.id"),
        InAppContent {
            title: title.to_string(),
            message,
            category: Category::Order,
            priority: Priority::Medium,
            data: payload,
            action_url: Some(format!("/orders/{}", order_id)),
        },
    )
}

fn user_registered(data: &Value) -> Vec<JobSubmission> {
    let first_name = text_at(data, "user.firstName");
    let greeting = if first_name.is_empty() {
        "Welcome!".to_string()
    } else {
        format!("Welcome, {}!", first_name)
    };

    vec![
        email_job(
            "welcome-email",
            Priority::High,
            text_at(data, "user.email"),
            "Welcome to our store!".to_string(),
            "welcome",
            data.clone(),
        ),
        in_app_job(
            "welcome-notification",
            text_at(data, "user.id"),
            InAppContent {
                title: greeting,
                message: "Your account is ready. Start exploring our products.".to_string(),
                category: Category::Account,
                priority: Priority::Medium,
                data: json!({}),
                action_url: Some("/products".to_string()),
            },
        ),
    ]
}

fn order_created(data: &Value) -> Vec<JobSubmission> {
    let order_id = text_at(data, "order.id");
    let total = value_at(data, "order.total").cloned().unwrap_or(Value::Null);

    vec![
        email_job(
            "order-confirmation-email",
            Priority::High,
            text_at(data, "user.email"),
            format!("Order confirmation #{}", order_id),
            "order-confirmation",
            data.clone(),
        ),
        order_notification(
            data,
            "order-created-notification",
            "Order placed",
            format!("Your order #{} has been placed.", order_id),
            json!({ "total": total }),
        ),
    ]
}

fn order_confirmed(data: &Value) -> Vec<JobSubmission> {
    let order_id = text_at(data, "order.id");
    vec![order_notification(
        data,
        "order-confirmed-notification",
        "Order confirmed",
        format!("Your order #{} has been confirmed and is being prepared.", order_id),
        json!({}),
    )]
}

fn order_shipped(data: &Value) -> Vec<JobSubmission> {
    let order_id = text_at(data, "order.id");
    let tracking = text_at(data, "trackingNumber");
    let message = if tracking.is_empty() {
        format!("Your order #{} has shipped.", order_id)
    } else {
        format!("Your order #{} has shipped. Tracking number: {}", order_id, tracking)
    };

    let mut notification = order_notification(
        data,
        "order-shipped-notification",
        "Order shipped",
        message,
        json!({ "trackingNumber": value_at(data, "trackingNumber") }),
    );
    notification.payload["category"] = json!(Category::Shipping);

    vec![
        email_job(
            "order-shipped-email",
            Priority::Medium,
            text_at(data, "user.email"),
            format!("Your order #{} has shipped", order_id),
            "order-shipped",
            data.clone(),
        ),
        notification,
    ]
}

fn order_delivered(data: &Value) -> Vec<JobSubmission> {
    let order_id = text_at(data, "order.id");
    vec![order_notification(
        data,
        "order-delivered-notification",
        "Order delivered",
        format!("Your order #{} has been delivered. Enjoy!", order_id),
        json!({}),
    )]
}

fn order_cancelled(data: &Value) -> Vec<JobSubmission> {
    let order_id = text_at(data, "order.id");
    let reason = text_at(data, "reason");
    let message = if reason.is_empty() {
        format!("Your order #{} has been cancelled.", order_id)
    } else {
        format!("Your order #{} has been cancelled. Reason: {}", order_id, reason)
    };

    let mut notification = order_notification(
        data,
        "order-cancelled-notification",
        "Order cancelled",
        message,
        json!({ "reason": value_at(data, "reason") }),
    );
    notification.priority = Priority::High.job_priority();
    notification.payload["priority"] = json!(Priority::High);

    vec![notification]
}

fn product_low_stock(data: &Value, config: &RouterConfig) -> Vec<JobSubmission> {
    let name = text_at(data, "product.name");
    let stock = value_at(data, "product.stock")
        .or_else(|| value_at(data, "stock"))
        .cloned()
        .unwrap_or(Value::Null);
    let severity = if stock.as_i64() == Some(0) { "critical" } else { "warning" };

    vec![email_job(
        "admin-alert-email",
        Priority::High,
        config.admin_email.clone(),
        format!("Low stock: {}", name),
        "admin-alert",
        json!({
            "title": format!("Low stock: {}", name),
            "alertType": "low_stock",
            "severity": severity,
            "message": format!("{} is running low on stock.", name),
            "details": {
                "productId": value_at(data, "product.id"),
                "productName": name,
                "stock": stock,
                "threshold": value_at(data, "threshold"),
            },
            "timestamp": Utc::now().to_rfc3339(),
        }),
    )]
}

fn admin_action(data: &Value, config: &RouterConfig) -> Vec<JobSubmission> {
    if !config.notify_admin_actions {
        return Vec::new();
    }

    let action = text_at(data, "action");
    vec![email_job(
        "admin-alert-email",
        Priority::Medium,
        config.admin_email.clone(),
        format!("Admin action: {}", action),
        "admin-alert",
        json!({
            "title": format!("Admin action: {}", action),
            "alertType": "admin_action",
            "severity": "info",
            "message": format!("An administrator performed '{}'.", action),
            "details": data,
            "timestamp": Utc::now().to_rfc3339(),
        }),
    )]
}

/// One submitted job, as reported back to the event producer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchedJob {
    #[serde(rename = "type")]
    pub job_type: String,
    pub job_id: String,
    pub action: &'static str,
}

fn action_for(queue: QueueName) -> &'static str {
    match queue {
        QueueName::Email => "email_queued",
        QueueName::InApp => "notification_queued",
    }
}

/// Validates events and submits the routed jobs to the two queues.
pub struct EventRouter {
    email_queue: Arc<JobQueue>,
    in_app_queue: Arc<JobQueue>,
    config: RouterConfig,
}

impl EventRouter {
    pub fn new(email_queue: Arc<JobQueue>, in_app_queue: Arc<JobQueue>, config: RouterConfig) -> Self {
        Self {
            email_queue,
            in_app_queue,
            config,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    fn queue(&self, name: QueueName) -> &JobQueue {
        match name {
            QueueName::Email => &self.email_queue,
            QueueName::InApp => &self.in_app_queue,
        }
    }

    /// Validate, route and submit. A rejected event submits nothing.
    ///
    /// Submission errors are returned as-is; jobs submitted before the
    /// failing one stay queued.
    pub async fn dispatch(&self, event_type: &str, data: Value) -> Result<Vec<DispatchedJob>, EventError> {
        let event = DomainEvent::parse(event_type, data).inspect_err(|e| {
            EventMetrics::record_rejected(e.reason());
            tracing::warn!(event_type = %event_type, error = %e, "Event rejected");
        })?;
        EventMetrics::record_received(event.event_type.as_str());

        let submissions = route(&event, &self.config);
        let mut dispatched = Vec::with_capacity(submissions.len());

        for submission in submissions {
            let queue = self.queue(submission.queue);
            let options = submission.options(queue.options());
            let job = queue
                .submit(submission.job_type, submission.payload, options)
                .await?;

            dispatched.push(DispatchedJob {
                action: action_for(job.queue_name),
                job_type: job.job_type,
                job_id: job.id,
            });
        }

        tracing::info!(
            event_type = %event.event_type,
            jobs = dispatched.len(),
            "Event dispatched"
        );

        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MemoryJobStore, QueuePolicy, RuntimeOptions};

    fn config() -> RouterConfig {
        RouterConfig {
            admin_email: "ops@example.com".to_string(),
            notify_admin_actions: false,
        }
    }

    fn routed(event_type: &str, data: Value) -> Vec<JobSubmission> {
        route(&DomainEvent::parse(event_type, data).unwrap(), &config())
    }

    fn job_types(jobs: &[JobSubmission]) -> Vec<(QueueName, &str)> {
        jobs.iter().map(|j| (j.queue, j.job_type.as_str())).collect()
    }

    #[test]
    fn test_routing_table() {
        let user = json!({"id": "u1", "email": "a@b.com"});
        let order = json!({"id": "o1", "total": 42.5});
        let cases = vec![
            ("user.registered", json!({"user": user}), vec![(QueueName::Email, "welcome-email"), (QueueName::InApp, "welcome-notification")]),
            ("order.created", json!({"order": order, "user": user}), vec![(QueueName::Email, "order-confirmation-email"), (QueueName::InApp, "order-created-notification")]),
            ("order.confirmed", json!({"order": order, "user": user}), vec![(QueueName::InApp, "order-confirmed-notification")]),
            ("order.shipped", json!({"order": order, "user": user}), vec![(QueueName::Email, "order-shipped-email"), (QueueName::InApp, "order-shipped-notification")]),
            ("order.delivered", json!({"order": order, "user": user}), vec![(QueueName::InApp, "order-delivered-notification")]),
            ("order.cancelled", json!({"order": order, "user": user}), vec![(QueueName::InApp, "order-cancelled-notification")]),
            ("product.low_stock", json!({"product": {"id": "p1", "name": "Mug"}}), vec![(QueueName::Email, "admin-alert-email")]),
            ("admin.action", json!({"action": "reindex"}), vec![]),
        ];

        for (event_type, data, expected) in cases {
            let jobs = routed(event_type, data);
            assert_eq!(job_types(&jobs), expected, "routing for {}", event_type);
        }
    }

    #[test]
    fn test_welcome_jobs() {
        let jobs = routed(
            "user.registered",
            json!({"user": {"id": "u1", "email": "a@b.com", "firstName": "Ann"}}),
        );

        let email = &jobs[0];
        assert_eq!(email.priority, Priority::High.job_priority());
        assert_eq!(email.payload["to"], "a@b.com");
        assert_eq!(email.payload["template"], "welcome");
        assert_eq!(email.payload["templateData"]["user"]["firstName"], "Ann");

        let notification = &jobs[1];
        assert_eq!(notification.payload["userId"], "u1");
        assert_eq!(notification.payload["category"], "account");
        assert_eq!(notification.payload["title"], "Welcome, Ann!");
    }

    #[test]
    fn test_order_created_carries_total() {
        let jobs = routed(
            "order.created",
            json!({"order": {"id": "o1", "total": 42.5}, "user": {"id": "u1", "email": "a@b.com"}}),
        );
        assert_eq!(jobs[1].payload["data"], json!({"orderId": "o1", "total": 42.5}));
        assert_eq!(jobs[1].payload["actionUrl"], "/orders/o1");
    }

    #[test]
    fn test_order_shipped_tracking_number() {
        let jobs = routed(
            "order.shipped",
            json!({"order": {"id": "o1"}, "user": {"id": "u1", "email": "a@b.com"}, "trackingNumber": "T1"}),
        );

        assert_eq!(jobs[0].payload["template"], "order-shipped");
        assert_eq!(jobs[0].payload["templateData"]["trackingNumber"], "T1");
        assert!(jobs[1].payload["message"].as_str().unwrap().contains("T1"));
        assert_eq!(jobs[1].payload["category"], "shipping");
    }

    #[test]
    fn test_order_cancelled_reason() {
        let jobs = routed(
            "order.cancelled",
            json!({"order": {"id": "o1"}, "user": {"id": "u1"}, "reason": "out of stock"}),
        );
        assert!(jobs[0].payload["message"].as_str().unwrap().contains("out of stock"));
        assert_eq!(jobs[0].payload["priority"], "HIGH");
    }

    #[test]
    fn test_low_stock_goes_to_admin() {
        let jobs = routed("product.low_stock", json!({"product": {"id": "p1", "name": "Mug", "stock": 0}}));
        assert_eq!(jobs[0].payload["to"], "ops@example.com");
        assert_eq!(jobs[0].payload["templateData"]["severity"], "critical");
    }

    #[test]
    fn test_admin_action_when_enabled() {
        let cfg = RouterConfig {
            notify_admin_actions: true,
            ..config()
        };
        let event = DomainEvent::parse("admin.action", json!({"action": "reindex"})).unwrap();
        let jobs = route(&event, &cfg);
        assert_eq!(job_types(&jobs), vec![(QueueName::Email, "admin-alert-email")]);
    }

    fn router_with(options: RuntimeOptions) -> EventRouter {
        let store = Arc::new(MemoryJobStore::new());
        let email = JobQueue::new(QueueName::Email, QueuePolicy::email(), options.clone(), store.clone());
        let in_app = JobQueue::new(QueueName::InApp, QueuePolicy::in_app(), options, store);
        EventRouter::new(email, in_app, config())
    }

    fn router() -> EventRouter {
        router_with(RuntimeOptions::default())
    }

    #[tokio::test]
    async fn test_dispatch_submits_jobs() {
        let router = router();
        let jobs = router
            .dispatch("user.registered", json!({"user": {"id": "u1", "email": "a@b.com"}}))
            .await
            .unwrap();

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].action, "email_queued");
        assert_eq!(router.email_queue.counts().await.unwrap().waiting, 1);
        assert_eq!(router.in_app_queue.counts().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_rejected_event_submits_nothing() {
        let router = router();
        assert!(router.dispatch("user.exploded", json!({})).await.is_err());
        assert!(router
            .dispatch("order.created", json!({"order": {"id": "o1"}}))
            .await
            .is_err());

        assert_eq!(router.email_queue.counts().await.unwrap().waiting, 0);
        assert_eq!(router.in_app_queue.counts().await.unwrap().waiting, 0);
    }

    #[tokio::test]
    async fn test_dispatch_fits_narrow_priority_range() {
        let router = router_with(RuntimeOptions {
            priority_range: 1..=5,
            ..RuntimeOptions::default()
        });

        let jobs = router
            .dispatch("user.registered", json!({"user": {"id": "u1", "email": "a@b.com"}}))
            .await
            .unwrap();

        let email = router.email_queue.get_job(&jobs[0].job_id).await.unwrap().unwrap();
        let in_app = router.in_app_queue.get_job(&jobs[1].job_id).await.unwrap().unwrap();
        assert_eq!(email.priority, 4);
        assert!((1..=5).contains(&in_app.priority));
    }
}
