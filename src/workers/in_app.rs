//! In-app queue worker: writes notifications into the user's feed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::timeout;

use crate::metrics::NOTIFICATIONS_STORED_TOTAL;
use crate::notification::{Category, Notification, NotificationStore, Priority};
use crate::queue::{Job, JobError, JobHandler};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InAppPayload {
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub action_url: Option<String>,
}

impl InAppPayload {
    /// A fresh notification; every attempt gets a new id.
    pub fn into_notification(self) -> Notification {
        let mut notification = Notification::new(self.user_id, self.title, self.message)
            .with_category(self.category.unwrap_or_default())
            .with_priority(self.priority.unwrap_or_default());

        if let Some(data) = self.data.filter(|d| !d.is_null()) {
            notification = notification.with_data(data);
        }
        if let Some(url) = self.action_url {
            notification = notification.with_action_url(url);
        }
        notification
    }
}

pub struct InAppWorker {
    store: Arc<dyn NotificationStore>,
    store_timeout: Duration,
}

impl InAppWorker {
    pub fn new(store: Arc<dyn NotificationStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }
}

#[async_trait]
impl JobHandler for InAppWorker {
    async fn handle(&self, job: &Job) -> Result<Value, JobError> {
        let payload: InAppPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::InvalidPayload(e.to_string()))?;
        if payload.user_id.trim().is_empty() {
            return Err(JobError::InvalidPayload("missing userId".to_string()));
        }

        let notification = payload.into_notification();
        let timeout_ms = self.store_timeout.as_millis() as u64;

        timeout(self.store_timeout, self.store.append(&notification))
            .await
            .map_err(|_| JobError::Timeout(timeout_ms))?
            .map_err(|e| JobError::Storage(e.to_string()))?;

        NOTIFICATIONS_STORED_TOTAL.inc();
        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            user_id = %notification.user_id,
            notification_id = %notification.id,
            "Notification stored"
        );

        Ok(json!({ "notificationId": notification.id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{MemoryNotificationStore, NotificationStatus};
    use crate::queue::{BackoffPolicy, QueueName};

    fn store() -> Arc<MemoryNotificationStore> {
        Arc::new(MemoryNotificationStore::new(Duration::from_secs(60), 100))
    }

    fn job(payload: Value) -> Job {
        Job::new(QueueName::InApp, "welcome-notification", payload, 5, 0, 2, BackoffPolicy::Fixed { delay_ms: 2_000 })
    }

    #[tokio::test]
    async fn test_stores_notification_with_defaults() {
        let store = store();
        let worker = InAppWorker::new(store.clone(), Duration::from_secs(1));

        let result = worker
            .handle(&job(json!({"userId": "u1", "title": "Hi", "message": "Hello"})))
            .await
            .unwrap();

        let feed = store.read("u1", 10).await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(result["notificationId"], feed[0].id.as_str());
        assert_eq!(feed[0].category, Category::System);
        assert_eq!(feed[0].priority, Priority::Medium);
        assert_eq!(feed[0].status, NotificationStatus::Unread);
    }

    #[tokio::test]
    async fn test_keeps_payload_fields() {
        let store = store();
        let worker = InAppWorker::new(store.clone(), Duration::from_secs(1));

        worker
            .handle(&job(json!({
                "userId": "u1",
                "title": "Order shipped",
                "message": "Tracking number: T1",
                "category": "shipping",
                "priority": "HIGH",
                "data": {"orderId": "o1"},
                "actionUrl": "/orders/o1",
            })))
            .await
            .unwrap();

        let n = &store.read("u1", 10).await.unwrap()[0];
        assert_eq!(n.category, Category::Shipping);
        assert_eq!(n.priority, Priority::High);
        assert_eq!(n.data, Some(json!({"orderId": "o1"})));
        assert_eq!(n.action_url.as_deref(), Some("/orders/o1"));
    }

    #[tokio::test]
    async fn test_retries_create_new_ids() {
        let store = store();
        let worker = InAppWorker::new(store.clone(), Duration::from_secs(1));
        let job = job(json!({"userId": "u1", "title": "Hi", "message": "Hello"}));

        let first = worker.handle(&job).await.unwrap();
        let second = worker.handle(&job).await.unwrap();

        assert_ne!(first["notificationId"], second["notificationId"]);
        assert_eq!(store.read("u1", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_payload() {
        let worker = InAppWorker::new(store(), Duration::from_secs(1));
        let err = worker.handle(&job(json!({"title": "Hi"}))).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidPayload(_)));
    }
}
