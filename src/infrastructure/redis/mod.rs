//! Redis connectivity shared by the queue and notification store backends.
//!
//! - `RedisPool`: multiplexed connection with circuit breaker and command timeout
//! - `CircuitBreaker`: fails fast while Redis is unreachable
//! - `ExponentialBackoff`: startup connection retries
//! - `RedisHealth`: connection status for health checks and metrics

mod backoff;
mod circuit_breaker;
mod health;
pub mod pool;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use health::{RedisHealth, RedisHealthStats, RedisHealthStatus};
pub use pool::{PoolError, RedisPool};

/// Get current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
