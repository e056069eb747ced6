//! Redis connection health tracking

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

use serde::Serialize;

use super::current_time_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedisHealthStatus {
    Healthy,
    Reconnecting,
    CircuitOpen,
}

impl RedisHealthStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RedisHealthStatus::Healthy,
            2 => RedisHealthStatus::CircuitOpen,
            _ => RedisHealthStatus::Reconnecting,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RedisHealthStatus::Healthy => "healthy",
            RedisHealthStatus::Reconnecting => "reconnecting",
            RedisHealthStatus::CircuitOpen => "circuit_open",
        }
    }
}

/// Shared health tracker updated by the pool on every (re)connect.
pub struct RedisHealth {
    status: AtomicU8,
    last_connected_ms: AtomicI64,
    reconnections: AtomicU32,
}

impl RedisHealth {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(1),
            last_connected_ms: AtomicI64::new(0),
            reconnections: AtomicU32::new(0),
        }
    }

    pub fn set_connected(&self) {
        let previous = self.status.swap(0, Ordering::AcqRel);
        self.last_connected_ms
            .store(current_time_ms(), Ordering::Release);
        if previous != 0 {
            self.reconnections.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn set_reconnecting(&self) {
        self.status.store(1, Ordering::Release);
    }

    pub fn set_circuit_open(&self) {
        self.status.store(2, Ordering::Release);
    }

    pub fn status(&self) -> RedisHealthStatus {
        RedisHealthStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == RedisHealthStatus::Healthy
    }

    pub fn stats(&self) -> RedisHealthStats {
        RedisHealthStats {
            status: self.status(),
            last_connected_ms: self.last_connected_ms.load(Ordering::Acquire),
            reconnections: self.reconnections.load(Ordering::Acquire),
        }
    }
}

impl Default for RedisHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RedisHealthStats {
    pub status: RedisHealthStatus,
    pub last_connected_ms: i64,
    pub reconnections: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let health = RedisHealth::new();
        assert_eq!(health.status(), RedisHealthStatus::Reconnecting);

        health.set_connected();
        assert!(health.is_healthy());

        health.set_circuit_open();
        assert_eq!(health.status(), RedisHealthStatus::CircuitOpen);
    }

    #[test]
    fn test_reconnections_counted() {
        let health = RedisHealth::new();
        health.set_connected();
        health.set_connected();
        health.set_reconnecting();
        health.set_connected();

        // First connect plus one recovery; repeated set_connected is a no-op
        assert_eq!(health.stats().reconnections, 2);
    }
}
