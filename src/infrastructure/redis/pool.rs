//! Shared Redis connection for the persistence backends.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, RedisResult};
use tokio::sync::RwLock;

use crate::config::RedisConfig;
use crate::metrics::REDIS_COMMAND_ERRORS_TOTAL;

use super::{BackoffConfig, CircuitBreaker, CircuitState, ExponentialBackoff, RedisHealth};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("Redis command timed out after {0}ms")]
    Timeout(u64),
}

/// A single multiplexed connection shared by every worker slot.
///
/// Commands go through [`RedisPool::execute`], which checks the circuit
/// breaker, bounds the command with the configured timeout and drops the
/// connection on I/O errors so the next command reconnects.
pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    circuit_breaker: Arc<CircuitBreaker>,
    health: Arc<RedisHealth>,
    config: RedisConfig,
}

impl RedisPool {
    pub fn new(
        config: RedisConfig,
        circuit_breaker: Arc<CircuitBreaker>,
        health: Arc<RedisHealth>,
    ) -> Result<Self, PoolError> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            circuit_breaker,
            health,
            config,
        })
    }

    async fn get_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        if !self.circuit_breaker.allow_request() {
            self.health.set_circuit_open();
            return Err(PoolError::CircuitOpen);
        }

        if let Some(conn) = self.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }

        let mut guard = self.connection.write().await;
        // Another task may have connected while we waited for the lock
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        self.health.set_reconnecting();
        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                *guard = Some(conn.clone());
                self.circuit_breaker.record_success();
                self.health.set_connected();
                tracing::info!(url = %self.config.url, "Redis connection established");
                Ok(conn)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                tracing::error!(error = %e, "Failed to connect to Redis");
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Run a command against the shared connection.
    pub async fn execute<F, T, Fut>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;
        let timeout_ms = self.config.command_timeout_ms;

        match tokio::time::timeout(Duration::from_millis(timeout_ms), f(conn)).await {
            Ok(Ok(result)) => {
                self.circuit_breaker.record_success();
                Ok(result)
            }
            Ok(Err(e)) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    *self.connection.write().await = None;
                    self.health.set_reconnecting();
                }
                self.circuit_breaker.record_failure();
                REDIS_COMMAND_ERRORS_TOTAL.inc();
                Err(PoolError::Redis(e))
            }
            Err(_) => {
                self.circuit_breaker.record_failure();
                REDIS_COMMAND_ERRORS_TOTAL.inc();
                Err(PoolError::Timeout(timeout_ms))
            }
        }
    }

    pub async fn ping(&self) -> Result<(), PoolError> {
        self.execute(|mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    /// Ping until Redis answers, backing off between attempts.
    ///
    /// Used at startup: job submission assumes a verified store connection.
    pub async fn wait_until_ready(&self) -> Result<(), PoolError> {
        let attempts = self.config.connect_attempts.max(1);
        let mut backoff = ExponentialBackoff::new(BackoffConfig::from(&self.config));

        loop {
            match self.ping().await {
                Ok(()) => return Ok(()),
                Err(e) if backoff.attempt() + 1 < attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        attempt = backoff.attempt(),
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Redis not ready, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy() && self.circuit_breaker.state() == CircuitState::Closed
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    pub fn health(&self) -> &RedisHealth {
        &self.health
    }
}
