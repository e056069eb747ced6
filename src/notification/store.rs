//! Notification store trait definition.
//!
//! A feed is an id list (most recent first) plus one detail record per id.
//! Both expire on the same TTL window, refreshed on every append.

use async_trait::async_trait;
use thiserror::Error;

use crate::redis::PoolError;

use super::types::Notification;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Notification {id} not found for user {user_id}")]
    NotFound { user_id: String, id: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Redis(e) => StoreError::Redis(e),
            PoolError::Timeout(ms) => StoreError::Timeout(ms),
            PoolError::CircuitOpen => StoreError::Unavailable(err.to_string()),
        }
    }
}

/// Backend trait for per-user notification feeds.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Backend type identifier ("memory", "redis")
    fn backend_type(&self) -> &'static str;

    /// Push to the feed head, write the detail, refresh the TTL and trim the feed.
    async fn append(&self, notification: &Notification) -> Result<(), StoreError>;

    /// Up to `limit` notifications, newest first. Ids whose detail expired are skipped.
    async fn read(&self, user_id: &str, limit: usize) -> Result<Vec<Notification>, StoreError>;

    async fn get(&self, user_id: &str, id: &str) -> Result<Option<Notification>, StoreError>;

    /// Mark one notification read, keeping its remaining TTL.
    async fn mark_read(&self, user_id: &str, id: &str) -> Result<Notification, StoreError>;

    /// Mark every unread notification in the feed read. Returns how many changed.
    async fn mark_all_read(&self, user_id: &str) -> Result<usize, StoreError>;

    /// Remove the detail and every occurrence of the id in the feed.
    async fn delete(&self, user_id: &str, id: &str) -> Result<bool, StoreError>;

    /// Unread notifications across the whole feed.
    async fn unread_count(&self, user_id: &str) -> Result<usize, StoreError>;
}

/// Newest first; ties keep feed order.
pub(crate) fn sort_newest_first(notifications: &mut [Notification]) {
    notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
