//! Priority job queues with retries, delays and pluggable storage.
//!
//! Two queues exist, `email` and `in_app`, each with its own concurrency,
//! retry and retention policy. Storage is abstracted behind [`JobStore`]:
//!
//! - `memory`: process-local, used for development and tests
//! - `redis`: persistent, shared across restarts
//!
//! [`JobQueue`] owns the lifecycle: waiting → active → completed, or
//! active → delayed (retry backoff) → ... → failed once attempts run out.

pub mod backend;
pub mod factory;
pub mod handler;
pub mod job;
pub mod memory_backend;
pub mod policy;
pub mod redis_backend;
pub mod runtime;

pub use backend::{JobStore, QueueError};
pub use factory::create_job_store;
pub use handler::{JobError, JobHandler};
pub use job::{Job, JobCounts, JobOptions, JobState, JobSubmission, QueueName};
pub use memory_backend::MemoryJobStore;
pub use policy::{BackoffPolicy, QueuePolicy, RuntimeOptions};
pub use redis_backend::RedisJobStore;
pub use runtime::{JobQueue, QueueStats};
