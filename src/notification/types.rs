//! In-app notification types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority levels for notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    /// Normal priority (default)
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// Level on the 1..=10 scale; queues map it onto their configured range.
    pub fn job_priority(&self) -> u8 {
        match self {
            Priority::Low => 2,
            Priority::Medium => 5,
            Priority::High => 8,
            Priority::Urgent => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Account,
    Order,
    Shipping,
    Promotion,
    #[default]
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    #[default]
    Unread,
    Read,
}

/// A feed entry in a user's in-app notification list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    #[serde(default)]
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Create an unread notification with a fresh id.
    pub fn new(user_id: impl Into<String>, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            title: title.into(),
            message: message.into(),
            category: Category::default(),
            priority: Priority::default(),
            data: None,
            action_url: None,
            status: NotificationStatus::Unread,
            created_at: Utc::now(),
            read_at: None,
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }

    pub fn is_unread(&self) -> bool {
        self.status == NotificationStatus::Unread
    }

    /// Mark read. The first read time is kept on repeat calls.
    pub fn mark_read(&mut self, now: DateTime<Utc>) {
        self.status = NotificationStatus::Read;
        if self.read_at.is_none() {
            self.read_at = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let n = Notification::new("u1", "Hi", "Hello");
        assert_eq!(n.category, Category::System);
        assert_eq!(n.priority, Priority::Medium);
        assert!(n.is_unread());
        assert!(n.read_at.is_none());
    }

    #[test]
    fn test_mark_read_keeps_first_timestamp() {
        let mut n = Notification::new("u1", "Hi", "Hello");
        let first = Utc::now();
        n.mark_read(first);
        n.mark_read(first + chrono::Duration::seconds(10));
        assert_eq!(n.status, NotificationStatus::Read);
        assert_eq!(n.read_at, Some(first));
    }

    #[test]
    fn test_serialization_shape() {
        let n = Notification::new("u1", "Hi", "Hello")
            .with_category(Category::Account)
            .with_priority(Priority::High);
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["category"], "account");
        assert_eq!(value["priority"], "HIGH");
        assert_eq!(value["status"], "unread");
        assert!(value.get("readAt").is_none());
    }

    #[test]
    fn test_job_priority_scale() {
        assert!(Priority::High.job_priority() > Priority::Medium.job_priority());
        assert_eq!(Priority::Urgent.job_priority(), 10);
    }
}
