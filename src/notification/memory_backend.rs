//! In-memory notification store using DashMap.
//!
//! Each user's feed lives under one map entry, so list and detail updates
//! happen under the same shard lock. TTL expiry is checked lazily on access.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::store::{sort_newest_first, NotificationStore, StoreError};
use super::types::Notification;

struct StoredDetail {
    notification: Notification,
    expires_at: DateTime<Utc>,
}

struct Feed {
    ids: VecDeque<String>,
    expires_at: DateTime<Utc>,
    details: HashMap<String, StoredDetail>,
}

impl Feed {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            ids: VecDeque::new(),
            expires_at: now,
            details: HashMap::new(),
        }
    }

    /// Drop everything whose TTL ran out. Returns true when the whole feed expired.
    fn purge_expired(&mut self, now: DateTime<Utc>) -> bool {
        self.details.retain(|_, d| d.expires_at > now);
        self.expires_at <= now && self.details.is_empty()
    }

    fn live_ids(&self, now: DateTime<Utc>) -> impl Iterator<Item = &String> {
        let alive = self.expires_at > now;
        self.ids.iter().filter(move |_| alive)
    }
}

/// In-memory notification store.
pub struct MemoryNotificationStore {
    feeds: DashMap<String, Feed>,
    ttl: chrono::Duration,
    max_feed_size: usize,
}

impl MemoryNotificationStore {
    pub fn new(ttl: Duration, max_feed_size: usize) -> Self {
        Self {
            feeds: DashMap::new(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500)),
            max_feed_size: max_feed_size.max(1),
        }
    }

    /// Apply `f` to the user's feed after purging expired records.
    fn with_feed<T>(&self, user_id: &str, f: impl FnOnce(&mut Feed, DateTime<Utc>) -> T) -> Option<T> {
        let now = Utc::now();
        let mut feed = self.feeds.get_mut(user_id)?;
        if feed.purge_expired(now) {
            drop(feed);
            self.feeds.remove(user_id);
            return None;
        }
        Some(f(&mut feed, now))
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn append(&self, notification: &Notification) -> Result<(), StoreError> {
        let now = Utc::now();
        let expires_at = now + self.ttl;

        let mut feed = self
            .feeds
            .entry(notification.user_id.clone())
            .or_insert_with(|| Feed::new(now));
        if feed.expires_at <= now {
            feed.ids.clear();
        }

        feed.ids.push_front(notification.id.clone());
        if feed.ids.len() > self.max_feed_size {
            let trimmed = feed.ids.split_off(self.max_feed_size);
            for id in trimmed {
                feed.details.remove(&id);
            }
        }
        feed.expires_at = expires_at;
        feed.details.insert(
            notification.id.clone(),
            StoredDetail {
                notification: notification.clone(),
                expires_at,
            },
        );

        Ok(())
    }

    async fn read(&self, user_id: &str, limit: usize) -> Result<Vec<Notification>, StoreError> {
        let mut notifications = self
            .with_feed(user_id, |feed, now| {
                feed.live_ids(now)
                    .take(limit)
                    .filter_map(|id| feed.details.get(id))
                    .map(|d| d.notification.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        sort_newest_first(&mut notifications);
        Ok(notifications)
    }

    async fn get(&self, user_id: &str, id: &str) -> Result<Option<Notification>, StoreError> {
        Ok(self
            .with_feed(user_id, |feed, _| {
                feed.details.get(id).map(|d| d.notification.clone())
            })
            .flatten())
    }

    async fn mark_read(&self, user_id: &str, id: &str) -> Result<Notification, StoreError> {
        self.with_feed(user_id, |feed, now| {
            feed.details.get_mut(id).map(|d| {
                d.notification.mark_read(now);
                d.notification.clone()
            })
        })
        .flatten()
        .ok_or_else(|| StoreError::NotFound {
            user_id: user_id.to_string(),
            id: id.to_string(),
        })
    }

    async fn mark_all_read(&self, user_id: &str) -> Result<usize, StoreError> {
        Ok(self
            .with_feed(user_id, |feed, now| {
                let live: Vec<String> = feed.live_ids(now).cloned().collect();
                let mut changed = 0;
                for id in live {
                    if let Some(d) = feed.details.get_mut(&id) {
                        if d.notification.is_unread() {
                            d.notification.mark_read(now);
                            changed += 1;
                        }
                    }
                }
                changed
            })
            .unwrap_or(0))
    }

    async fn delete(&self, user_id: &str, id: &str) -> Result<bool, StoreError> {
        Ok(self
            .with_feed(user_id, |feed, _| {
                let before = feed.ids.len();
                feed.ids.retain(|existing| existing != id);
                let removed_detail = feed.details.remove(id).is_some();
                removed_detail || feed.ids.len() != before
            })
            .unwrap_or(false))
    }

    async fn unread_count(&self, user_id: &str) -> Result<usize, StoreError> {
        Ok(self
            .with_feed(user_id, |feed, now| {
                feed.live_ids(now)
                    .filter_map(|id| feed.details.get(id))
                    .filter(|d| d.notification.is_unread())
                    .count()
            })
            .unwrap_or(0))
    }
}
