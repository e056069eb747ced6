//! Redis-based notification store.
//!
//! Key structure:
//! - `notifications:{user_id}`: id list, most recent first
//! - `notification:{user_id}:{id}`: notification JSON
//!
//! Append writes both keys, refreshes both TTLs and drops the details of
//! trimmed ids in one Lua script. Rewrites only touch records that still exist.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, Script};

use crate::redis::RedisPool;

use super::store::{sort_newest_first, NotificationStore, StoreError};
use super::types::Notification;

/// KEYS: list, detail. ARGV: id, json, ttl seconds, max feed size, detail key prefix.
const APPEND_SCRIPT: &str = r#"
redis.call('LPUSH', KEYS[1], ARGV[1])
local max = tonumber(ARGV[4])
local trimmed = redis.call('LRANGE', KEYS[1], max, -1)
for _, old in ipairs(trimmed) do
  redis.call('DEL', ARGV[5] .. old)
end
redis.call('LTRIM', KEYS[1], 0, max - 1)
redis.call('SET', KEYS[2], ARGV[2])
redis.call('EXPIRE', KEYS[2], ARGV[3])
redis.call('EXPIRE', KEYS[1], ARGV[3])
return #trimmed
"#;

fn list_key(user_id: &str) -> String {
    format!("notifications:{}", user_id)
}

fn detail_prefix(user_id: &str) -> String {
    format!("notification:{}:", user_id)
}

fn detail_key(user_id: &str, id: &str) -> String {
    format!("{}{}", detail_prefix(user_id), id)
}

/// Redis-based notification store.
pub struct RedisNotificationStore {
    pool: Arc<RedisPool>,
    ttl_seconds: i64,
    max_feed_size: usize,
    append_script: Script,
}

impl RedisNotificationStore {
    pub fn new(pool: Arc<RedisPool>, ttl: Duration, max_feed_size: usize) -> Self {
        Self {
            pool,
            ttl_seconds: ttl.as_secs() as i64,
            max_feed_size: max_feed_size.max(1),
            append_script: Script::new(APPEND_SCRIPT),
        }
    }

    /// Load the details for up to `limit` feed entries, skipping expired ones.
    async fn load_feed(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Notification>, StoreError> {
        let list = list_key(user_id);
        let user = user_id.to_string();
        let stop = limit.map(|l| l as isize - 1).unwrap_or(-1);
        if stop < -1 || limit == Some(0) {
            return Ok(Vec::new());
        }

        let raw: Vec<Option<String>> = self
            .pool
            .execute(|mut conn| async move {
                let ids: Vec<String> = conn.lrange(&list, 0, stop).await?;
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                let keys: Vec<String> = ids.iter().map(|id| detail_key(&user, id)).collect();
                redis::cmd("MGET").arg(keys).query_async(&mut conn).await
            })
            .await?;

        raw.into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .collect()
    }

    /// Overwrite existing detail records without touching their TTL.
    /// Records that expired meanwhile are not recreated. Returns how many were written.
    async fn rewrite(&self, notifications: &[Notification]) -> Result<usize, StoreError> {
        if notifications.is_empty() {
            return Ok(0);
        }

        let mut pipe = redis::pipe();
        for n in notifications {
            pipe.cmd("SET")
                .arg(detail_key(&n.user_id, &n.id))
                .arg(serde_json::to_string(n)?)
                .arg("XX")
                .arg("KEEPTTL");
        }

        let replies: Vec<Option<String>> = self
            .pool
            .execute(|mut conn| async move { pipe.query_async(&mut conn).await })
            .await?;

        Ok(replies.iter().filter(|reply| reply.is_some()).count())
    }
}

#[async_trait]
impl NotificationStore for RedisNotificationStore {
    fn backend_type(&self) -> &'static str {
        "redis"
    }

    async fn append(&self, notification: &Notification) -> Result<(), StoreError> {
        let list = list_key(&notification.user_id);
        let detail = detail_key(&notification.user_id, &notification.id);
        let prefix = detail_prefix(&notification.user_id);
        let json = serde_json::to_string(notification)?;
        let id = notification.id.clone();
        let ttl = self.ttl_seconds;
        let max = self.max_feed_size;
        let script = self.append_script.clone();

        let trimmed: usize = self
            .pool
            .execute(|mut conn| async move {
                script
                    .key(&list)
                    .key(&detail)
                    .arg(&id)
                    .arg(json)
                    .arg(ttl)
                    .arg(max)
                    .arg(&prefix)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        tracing::debug!(
            user_id = %notification.user_id,
            notification_id = %notification.id,
            trimmed,
            "Notification appended to Redis feed"
        );

        Ok(())
    }

    async fn read(&self, user_id: &str, limit: usize) -> Result<Vec<Notification>, StoreError> {
        let mut notifications = self.load_feed(user_id, Some(limit)).await?;
        sort_newest_first(&mut notifications);
        Ok(notifications)
    }

    async fn get(&self, user_id: &str, id: &str) -> Result<Option<Notification>, StoreError> {
        let key = detail_key(user_id, id);
        let raw: Option<String> = self
            .pool
            .execute(|mut conn| async move { conn.get(key).await })
            .await?;

        raw.map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    async fn mark_read(&self, user_id: &str, id: &str) -> Result<Notification, StoreError> {
        let mut notification = self
            .get(user_id, id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                user_id: user_id.to_string(),
                id: id.to_string(),
            })?;

        notification.mark_read(Utc::now());
        if self.rewrite(std::slice::from_ref(&notification)).await? == 0 {
            return Err(StoreError::NotFound {
                user_id: user_id.to_string(),
                id: id.to_string(),
            });
        }

        Ok(notification)
    }

    async fn mark_all_read(&self, user_id: &str) -> Result<usize, StoreError> {
        let now = Utc::now();
        let changed: Vec<Notification> = self
            .load_feed(user_id, None)
            .await?
            .into_iter()
            .filter(|n| n.is_unread())
            .map(|mut n| {
                n.mark_read(now);
                n
            })
            .collect();

        self.rewrite(&changed).await
    }

    async fn delete(&self, user_id: &str, id: &str) -> Result<bool, StoreError> {
        let list = list_key(user_id);
        let detail = detail_key(user_id, id);
        let id = id.to_string();

        let (deleted, removed): (i64, i64) = self
            .pool
            .execute(|mut conn| async move {
                redis::pipe()
                    .atomic()
                    .del(&detail)
                    .lrem(&list, 0, &id)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        Ok(deleted > 0 || removed > 0)
    }

    async fn unread_count(&self, user_id: &str) -> Result<usize, StoreError> {
        Ok(self
            .load_feed(user_id, None)
            .await?
            .iter()
            .filter(|n| n.is_unread())
            .count())
    }
}
