//! Per-user in-app notification feeds.
//!
//! # Store Architecture
//!
//! The feed store uses a backend abstraction:
//!
//! - `MemoryNotificationStore`: In-memory storage using DashMap (default)
//! - `RedisNotificationStore`: Persistent storage using a List + one String per notification
//!
//! Use `create_notification_store()` to create the appropriate backend based on configuration.

pub mod memory_backend;
pub mod redis_backend;
mod store;
mod types;

use std::sync::Arc;
use std::time::Duration;

use crate::config::StoreConfig;
use crate::redis::RedisPool;

pub use memory_backend::MemoryNotificationStore;
pub use redis_backend::RedisNotificationStore;
pub use store::{NotificationStore, StoreError};
pub use types::{Category, Notification, NotificationStatus, Priority};

/// Create a notification store based on configuration.
///
/// - `"redis"`: a `RedisNotificationStore` if a Redis pool is provided
/// - `"memory"` (default): a `MemoryNotificationStore`
pub fn create_notification_store(
    settings: &StoreConfig,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn NotificationStore> {
    let ttl = Duration::from_secs(settings.ttl_seconds);

    match settings.backend.as_str() {
        "redis" => {
            if let Some(pool) = redis_pool {
                tracing::info!(
                    backend = "redis",
                    ttl_seconds = settings.ttl_seconds,
                    max_feed_size = settings.max_feed_size,
                    "Creating Redis notification store"
                );
                Arc::new(RedisNotificationStore::new(pool, ttl, settings.max_feed_size))
            } else {
                tracing::warn!(
                    "Redis notification store requested but no pool provided, falling back to memory"
                );
                Arc::new(MemoryNotificationStore::new(ttl, settings.max_feed_size))
            }
        }
        _ => {
            tracing::info!(
                backend = "memory",
                ttl_seconds = settings.ttl_seconds,
                "Creating in-memory notification store"
            );
            Arc::new(MemoryNotificationStore::new(ttl, settings.max_feed_size))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_memory_store() {
        let store = create_notification_store(&StoreConfig::default(), None);
        assert_eq!(store.backend_type(), "memory");
    }

    #[test]
    fn test_redis_without_pool_falls_back() {
        let settings = StoreConfig {
            backend: "redis".to_string(),
            ..Default::default()
        };
        assert_eq!(create_notification_store(&settings, None).backend_type(), "memory");
    }
}
