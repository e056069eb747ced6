//! Infrastructure layer modules
//!
//! Shared components used by every domain module:
//! - `config`: Application configuration and settings
//! - `error`: HTTP-facing error type
//! - `metrics`: Prometheus metrics
//! - `redis`: Redis connection pool, circuit breaker, and health checks

pub mod config;
pub mod error;
pub mod metrics;
pub mod redis;
