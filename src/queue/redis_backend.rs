//! Redis-based job store.
//!
//! Jobs survive service restarts. Per queue the layout is:
//!
//! - `{prefix}:{queue}:seq`: submission counter
//! - `{prefix}:{queue}:job:{id}`: job JSON
//! - `{prefix}:{queue}:waiting`: ZSET ordered by priority, then sequence
//! - `{prefix}:{queue}:delayed`: ZSET scored by `run_at` millis
//! - `{prefix}:{queue}:active`: ZSET scored by lease deadline millis
//! - `{prefix}:{queue}:completed` / `failed`: LIST of ids, most recent first

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Script};

use crate::redis::RedisPool;

use super::backend::{JobStore, QueueError};
use super::job::{Job, JobCounts, JobState, QueueName};

/// Promotes due delayed jobs, then pops the best waiting job into the active set.
///
/// KEYS: waiting, delayed, active. ARGV: now millis, lease deadline millis, job key prefix.
const CLAIM_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[2], id)
  local raw = redis.call('GET', ARGV[3] .. id)
  if raw then
    local job = cjson.decode(raw)
    redis.call('ZADD', KEYS[1], (255 - job.priority) * 1099511627776 + job.seq, id)
  end
end
local popped = redis.call('ZPOPMIN', KEYS[1])
if #popped == 0 then
  return false
end
local id = popped[1]
local raw = redis.call('GET', ARGV[3] .. id)
if not raw then
  return false
end
redis.call('ZADD', KEYS[3], ARGV[2], id)
return raw
"#;

/// KEYS: active. ARGV: deadline millis, job id.
const RENEW_SCRIPT: &str = r#"
if redis.call('ZSCORE', KEYS[1], ARGV[2]) then
  redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
  return 1
end
return 0
"#;

/// Score that sorts higher priority first and FIFO among equals.
fn waiting_score(priority: u8, seq: u64) -> f64 {
    (255 - priority as u64) as f64 * (1u64 << 40) as f64 + seq as f64
}

fn deadline_ms(now: DateTime<Utc>, lease: Duration) -> i64 {
    now.timestamp_millis() + lease.as_millis() as i64
}

struct QueueKeys {
    seq: String,
    job_prefix: String,
    waiting: String,
    delayed: String,
    active: String,
    completed: String,
    failed: String,
}

impl QueueKeys {
    fn new(prefix: &str, queue: QueueName) -> Self {
        let base = format!("{}:{}", prefix, queue.as_str());
        Self {
            seq: format!("{}:seq", base),
            job_prefix: format!("{}:job:", base),
            waiting: format!("{}:waiting", base),
            delayed: format!("{}:delayed", base),
            active: format!("{}:active", base),
            completed: format!("{}:completed", base),
            failed: format!("{}:failed", base),
        }
    }

    fn job(&self, id: &str) -> String {
        format!("{}{}", self.job_prefix, id)
    }
}

/// Redis-based job store.
pub struct RedisJobStore {
    pool: Arc<RedisPool>,
    prefix: String,
    claim_script: Script,
    renew_script: Script,
}

impl RedisJobStore {
    pub fn new(pool: Arc<RedisPool>, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            claim_script: Script::new(CLAIM_SCRIPT),
            renew_script: Script::new(RENEW_SCRIPT),
        }
    }

    fn keys(&self, queue: QueueName) -> QueueKeys {
        QueueKeys::new(&self.prefix, queue)
    }

    /// Write the job and place it in waiting or delayed, removing it from every other set.
    async fn place_pending(&self, job: &Job) -> Result<(), QueueError> {
        let keys = self.keys(job.queue_name);
        let job_key = keys.job(&job.id);
        let json = serde_json::to_string(job)?;
        let id = job.id.clone();
        let eligible = job.is_eligible(Utc::now());
        let score = if eligible {
            waiting_score(job.priority, job.seq)
        } else {
            job.run_at.timestamp_millis() as f64
        };

        self.pool
            .execute(|mut conn| async move {
                let target = if eligible { &keys.waiting } else { &keys.delayed };
                let mut pipe = redis::pipe();
                pipe.atomic()
                    .zrem(&keys.active, &id)
                    .ignore()
                    .zrem(&keys.waiting, &id)
                    .ignore()
                    .zrem(&keys.delayed, &id)
                    .ignore()
                    .set(&job_key, json)
                    .ignore()
                    .zadd(target, &id, score)
                    .ignore();
                let _: () = pipe.query_async(&mut conn).await?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    /// Record a finished job in a bounded history list.
    async fn push_history(&self, job: &Job, failed: bool, keep: usize) -> Result<(), QueueError> {
        let keys = self.keys(job.queue_name);
        let json = serde_json::to_string(job)?;
        let id = job.id.clone();

        self.pool
            .execute(|mut conn| async move {
                let list = if failed { &keys.failed } else { &keys.completed };
                let mut pipe = redis::pipe();
                pipe.atomic()
                    .zrem(&keys.active, &id)
                    .ignore()
                    .set(keys.job(&id), json)
                    .ignore()
                    .lrem(list, 0, &id)
                    .ignore()
                    .lpush(list, &id)
                    .ignore();
                let _: () = pipe.query_async(&mut conn).await?;

                let evicted: Vec<String> = conn.lrange(list, keep as isize, -1).await?;
                if !evicted.is_empty() {
                    let job_keys: Vec<String> = evicted.iter().map(|e| keys.job(e)).collect();
                    let mut pipe = redis::pipe();
                    pipe.del(job_keys).ignore();
                    if keep == 0 {
                        pipe.del(list).ignore();
                    } else {
                        pipe.ltrim(list, 0, keep as isize - 1).ignore();
                    }
                    let _: () = pipe.query_async(&mut conn).await?;
                }
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn history(
        &self,
        queue: QueueName,
        failed: bool,
        limit: usize,
    ) -> Result<Vec<Job>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let keys = self.keys(queue);

        let raw: Vec<Option<String>> = self
            .pool
            .execute(|mut conn| async move {
                let list = if failed { &keys.failed } else { &keys.completed };
                let ids: Vec<String> = conn.lrange(list, 0, limit as isize - 1).await?;
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                let job_keys: Vec<String> = ids.iter().map(|id| keys.job(id)).collect();
                redis::cmd("MGET").arg(job_keys).query_async(&mut conn).await
            })
            .await?;

        decode_all(raw)
    }
}

fn decode_all(raw: Vec<Option<String>>) -> Result<Vec<Job>, QueueError> {
    raw.into_iter()
        .flatten()
        .map(|json| serde_json::from_str(&json).map_err(QueueError::from))
        .collect()
}

#[async_trait]
impl JobStore for RedisJobStore {
    fn backend_type(&self) -> &'static str {
        "redis"
    }

    async fn add(&self, mut job: Job) -> Result<Job, QueueError> {
        let seq_key = self.keys(job.queue_name).seq;
        let seq: u64 = self
            .pool
            .execute(|mut conn| async move { conn.incr(seq_key, 1u64).await })
            .await?;

        job.seq = seq;
        self.place_pending(&job).await?;

        tracing::debug!(
            queue = %job.queue_name,
            job_id = %job.id,
            job_type = %job.job_type,
            "Job stored in Redis"
        );

        Ok(job)
    }

    async fn claim(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<Job>, QueueError> {
        let keys = self.keys(queue);
        let script = self.claim_script.clone();
        let deadline = deadline_ms(now, lease);

        let raw: Option<String> = self
            .pool
            .execute(|mut conn| async move {
                script
                    .key(&keys.waiting)
                    .key(&keys.delayed)
                    .key(&keys.active)
                    .arg(now.timestamp_millis())
                    .arg(deadline)
                    .arg(&keys.job_prefix)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        // The id was popped atomically, so this worker owns the job record now
        let mut job: Job = serde_json::from_str(&raw)?;
        job.state = JobState::Active;
        job.attempts += 1;
        job.started_at = Some(now);

        let job_key = self.keys(queue).job(&job.id);
        let json = serde_json::to_string(&job)?;
        self.pool
            .execute(|mut conn| async move { conn.set::<_, _, ()>(job_key, json).await })
            .await?;

        Ok(Some(job))
    }

    async fn renew_lease(
        &self,
        queue: QueueName,
        job_id: &str,
        lease: Duration,
    ) -> Result<bool, QueueError> {
        let active = self.keys(queue).active;
        let script = self.renew_script.clone();
        let deadline = deadline_ms(Utc::now(), lease);
        let id = job_id.to_string();

        let renewed: i64 = self
            .pool
            .execute(|mut conn| async move {
                script
                    .key(active)
                    .arg(deadline)
                    .arg(id)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        Ok(renewed == 1)
    }

    async fn requeue(&self, job: &Job) -> Result<(), QueueError> {
        self.place_pending(job).await
    }

    async fn complete(&self, job: &Job, keep: usize) -> Result<(), QueueError> {
        self.push_history(job, false, keep).await
    }

    async fn fail(&self, job: &Job, keep: usize) -> Result<(), QueueError> {
        self.push_history(job, true, keep).await
    }

    async fn take_stalled(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, QueueError> {
        let keys = self.keys(queue);
        let now_ms = now.timestamp_millis();

        let raw: Vec<Option<String>> = self
            .pool
            .execute(|mut conn| async move {
                let expired: Vec<String> = conn.zrangebyscore(&keys.active, "-inf", now_ms).await?;
                let mut raw = Vec::with_capacity(expired.len());
                for id in expired {
                    // Only the caller whose ZREM succeeds recovers the job
                    let removed: i64 = conn.zrem(&keys.active, &id).await?;
                    if removed == 1 {
                        raw.push(conn.get(keys.job(&id)).await?);
                    }
                }
                Ok(raw)
            })
            .await?;

        decode_all(raw)
    }

    async fn take_failed(&self, queue: QueueName) -> Result<Vec<Job>, QueueError> {
        let keys = self.keys(queue);

        let raw: Vec<Option<String>> = self
            .pool
            .execute(|mut conn| async move {
                let (ids,): (Vec<String>,) = redis::pipe()
                    .atomic()
                    .lrange(&keys.failed, 0, -1)
                    .del(&keys.failed)
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                let job_keys: Vec<String> = ids.iter().map(|id| keys.job(id)).collect();
                redis::cmd("MGET").arg(job_keys).query_async(&mut conn).await
            })
            .await?;

        decode_all(raw)
    }

    async fn get(&self, queue: QueueName, job_id: &str) -> Result<Option<Job>, QueueError> {
        let job_key = self.keys(queue).job(job_id);
        let raw: Option<String> = self
            .pool
            .execute(|mut conn| async move { conn.get(job_key).await })
            .await?;

        raw.map(|json| serde_json::from_str(&json).map_err(QueueError::from))
            .transpose()
    }

    async fn failed(&self, queue: QueueName, limit: usize) -> Result<Vec<Job>, QueueError> {
        self.history(queue, true, limit).await
    }

    async fn completed(&self, queue: QueueName, limit: usize) -> Result<Vec<Job>, QueueError> {
        self.history(queue, false, limit).await
    }

    async fn counts(&self, queue: QueueName) -> Result<JobCounts, QueueError> {
        let keys = self.keys(queue);
        let (waiting, delayed, active, completed, failed): (usize, usize, usize, usize, usize) =
            self.pool
                .execute(|mut conn| async move {
                    redis::pipe()
                        .zcard(&keys.waiting)
                        .zcard(&keys.delayed)
                        .zcard(&keys.active)
                        .llen(&keys.completed)
                        .llen(&keys.failed)
                        .query_async(&mut conn)
                        .await
                })
                .await?;

        Ok(JobCounts {
            waiting,
            delayed,
            active,
            completed,
            failed,
        })
    }
}
