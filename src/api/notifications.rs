//! Direct submission and per-user feed endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::notification::{Category, Notification, Priority};
use crate::queue::{JobOptions, JobState};
use crate::server::AppState;

const DEFAULT_FEED_LIMIT: usize = 20;
const MAX_FEED_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Email,
    InApp,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationRequest {
    #[serde(rename = "type")]
    pub channel: Channel,
    pub recipient: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub priority: Priority,
    pub template: Option<String>,
    pub template_data: Option<Value>,
    pub action_url: Option<String>,
    pub category: Option<Category>,
    pub data: Option<Value>,
    /// Milliseconds before the job becomes eligible
    #[serde(default)]
    pub delay: u64,
}

impl SendNotificationRequest {
    fn validate(&self) -> Result<()> {
        if self.recipient.trim().is_empty() {
            return Err(AppError::Validation("recipient is required".to_string()));
        }
        if self.title.trim().is_empty() {
            return Err(AppError::Validation("title is required".to_string()));
        }
        if self.channel == Channel::Email && !self.recipient.contains('@') {
            return Err(AppError::Validation(format!(
                "recipient '{}' is not an email address",
                self.recipient
            )));
        }
        Ok(())
    }

    /// Job type and payload for the selected channel.
    fn into_job(self) -> (&'static str, Value) {
        match self.channel {
            Channel::Email => {
                let template_data = self.template_data.unwrap_or_else(|| {
                    json!({
                        "title": self.title,
                        "message": self.message,
                        "actionUrl": self.action_url,
                    })
                });
                (
                    "direct-email",
                    json!({
                        "to": self.recipient,
                        "subject": self.title,
                        "template": self.template,
                        "templateData": template_data,
                    }),
                )
            }
            Channel::InApp => (
                "direct-notification",
                json!({
                    "userId": self.recipient,
                    "title": self.title,
                    "message": self.message,
                    "category": self.category.unwrap_or_default(),
                    "priority": self.priority,
                    "data": self.data,
                    "actionUrl": self.action_url,
                }),
            ),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationResponse {
    pub job_id: String,
    #[serde(rename = "type")]
    pub channel: Channel,
    pub status: JobState,
}

/// POST /notifications/send - Queue a single email or in-app notification
#[tracing::instrument(name = "http.send_notification", skip(state, payload))]
pub async fn send_notification(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SendNotificationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SendNotificationResponse>)> {
    let Json(request) = payload?;
    request.validate()?;

    let channel = request.channel;
    let queue = match channel {
        Channel::Email => &state.email_queue,
        Channel::InApp => &state.in_app_queue,
    };
    let priority = queue.options().scale_priority(request.priority.job_priority());
    let options = JobOptions::priority(priority).with_delay(request.delay);

    let (job_type, job_payload) = request.into_job();
    let job = queue.submit(job_type, job_payload, options).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SendNotificationResponse {
            job_id: job.id,
            channel,
            status: job.state,
        }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedQuery {
    pub limit: Option<usize>,
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedResponse {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
    pub has_more: bool,
}

/// GET /notifications/user/:user_id - A user's feed, newest first
#[tracing::instrument(name = "http.user_feed", skip(state))]
pub async fn user_feed(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<FeedResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_FEED_LIMIT).clamp(1, MAX_FEED_LIMIT);

    let mut notifications = if query.unread_only {
        let feed = state.store.read(&user_id, state.settings.store.max_feed_size).await?;
        feed.into_iter().filter(|n| n.is_unread()).collect()
    } else {
        state.store.read(&user_id, limit + 1).await?
    };

    let has_more = notifications.len() > limit;
    notifications.truncate(limit);
    let unread_count = state.store.unread_count(&user_id).await?;

    Ok(Json(FeedResponse {
        notifications,
        unread_count,
        has_more,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRequest {
    pub user_id: String,
}

fn user_id_from(payload: std::result::Result<Json<UserRequest>, JsonRejection>) -> Result<String> {
    let Json(request) = payload?;
    if request.user_id.trim().is_empty() {
        return Err(AppError::Validation("userId is required".to_string()));
    }
    Ok(request.user_id)
}

/// PUT /notifications/:id/read - Mark one notification read
#[tracing::instrument(name = "http.mark_read", skip(state, payload))]
pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<UserRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let user_id = user_id_from(payload)?;
    let notification = state.store.mark_read(&user_id, &id).await?;

    Ok(Json(json!({
        "success": true,
        "notification": notification,
    })))
}

/// PUT /notifications/user/:user_id/read-all - Mark the whole feed read
#[tracing::instrument(name = "http.mark_all_read", skip(state))]
pub async fn mark_all_read(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>> {
    let updated = state.store.mark_all_read(&user_id).await?;

    Ok(Json(json!({
        "success": true,
        "updated": updated,
    })))
}

/// DELETE /notifications/:id - Remove a notification from the feed
#[tracing::instrument(name = "http.delete_notification", skip(state, payload))]
pub async fn delete_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<UserRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let user_id = user_id_from(payload)?;
    let deleted = state.store.delete(&user_id, &id).await?;

    Ok(Json(json!({
        "success": true,
        "deleted": deleted,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(channel: Channel, recipient: &str) -> SendNotificationRequest {
        SendNotificationRequest {
            channel,
            recipient: recipient.to_string(),
            title: "Sale".to_string(),
            message: "Everything is 10% off".to_string(),
            priority: Priority::Low,
            template: None,
            template_data: None,
            action_url: Some("/sale".to_string()),
            category: Some(Category::Promotion),
            data: None,
            delay: 0,
        }
    }

    #[test]
    fn test_channel_wire_names() {
        assert_eq!(serde_json::to_value(Channel::InApp).unwrap(), "IN_APP");
        let parsed: Channel = serde_json::from_value(json!("EMAIL")).unwrap();
        assert_eq!(parsed, Channel::Email);
    }

    #[test]
    fn test_email_recipient_must_be_address() {
        assert!(request(Channel::Email, "u1").validate().is_err());
        assert!(request(Channel::InApp, "u1").validate().is_ok());
        assert!(request(Channel::InApp, " ").validate().is_err());
    }

    #[test]
    fn test_email_job_payload() {
        let (job_type, payload) = request(Channel::Email, "a@b.com").into_job();
        assert_eq!(job_type, "direct-email");
        assert_eq!(payload["to"], "a@b.com");
        assert_eq!(payload["subject"], "Sale");
        assert_eq!(payload["templateData"]["message"], "Everything is 10% off");
    }

    #[test]
    fn test_in_app_job_payload() {
        let (job_type, payload) = request(Channel::InApp, "u1").into_job();
        assert_eq!(job_type, "direct-notification");
        assert_eq!(payload["userId"], "u1");
        assert_eq!(payload["category"], "promotion");
        assert_eq!(payload["priority"], "LOW");
    }
}
