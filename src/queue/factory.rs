//! Job store factory

use std::sync::Arc;

use crate::config::QueueSettings;
use crate::redis::RedisPool;

use super::backend::JobStore;
use super::memory_backend::MemoryJobStore;
use super::redis_backend::RedisJobStore;

/// Create a job store based on configuration.
///
/// - `"redis"`: a `RedisJobStore` if a Redis pool is provided
/// - `"memory"` (default): a `MemoryJobStore`
///
/// Both queues share one store; keys are namespaced per queue.
pub fn create_job_store(
    settings: &QueueSettings,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn JobStore> {
    match settings.backend.as_str() {
        "redis" => {
            if let Some(pool) = redis_pool {
                tracing::info!(
                    backend = "redis",
                    prefix = %settings.redis_prefix,
                    "Creating Redis job store"
                );
                Arc::new(RedisJobStore::new(pool, settings.redis_prefix.clone()))
            } else {
                tracing::warn!("Redis job store requested but no pool provided, falling back to memory");
                Arc::new(MemoryJobStore::new())
            }
        }
        "memory" => {
            tracing::info!(backend = "memory", "Creating in-memory job store");
            Arc::new(MemoryJobStore::new())
        }
        other => {
            tracing::warn!(backend = %other, "Unknown job store backend, falling back to memory");
            Arc::new(MemoryJobStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_memory() {
        let store = create_job_store(&QueueSettings::default(), None);
        assert_eq!(store.backend_type(), "memory");
    }

    #[test]
    fn test_redis_without_pool_falls_back() {
        let settings = QueueSettings {
            backend: "redis".to_string(),
            ..Default::default()
        };
        let store = create_job_store(&settings, None);
        assert_eq!(store.backend_type(), "memory");
    }

    #[test]
    fn test_unknown_backend_falls_back() {
        let settings = QueueSettings {
            backend: "kafka".to_string(),
            ..Default::default()
        };
        assert_eq!(create_job_store(&settings, None).backend_type(), "memory");
    }
}
