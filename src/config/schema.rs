//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Graceful shutdown budgets.
    pub shutdown: ShutdownConfig,

    /// Shared cache (Redis or in-memory).
    pub cache: CacheConfig,

    /// Relational database pool.
    pub database: DatabaseConfig,

    /// Background task queue.
    pub queue: QueueConfig,

    /// Periodic job scheduling.
    pub scheduler: SchedulerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Shutdown budgets, all in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Global deadline for the whole teardown sequence.
    pub timeout_ms: u64,

    /// Budget for draining background queues.
    pub queue_drain_timeout_ms: u64,

    /// Budget for closing realtime connections.
    pub websocket_close_timeout_ms: u64,
}

impl ShutdownConfig {
    /// Global deadline for the whole sequence.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Queue drain budget, capped at the global deadline.
    pub fn queue_drain_timeout(&self) -> Duration {
        self.capped("queue_drain_timeout_ms", self.queue_drain_timeout_ms)
    }

    /// Realtime close budget, capped at the global deadline.
    pub fn websocket_close_timeout(&self) -> Duration {
        self.capped("websocket_close_timeout_ms", self.websocket_close_timeout_ms)
    }

    fn capped(&self, field: &'static str, ms: u64) -> Duration {
        if ms > self.timeout_ms {
            tracing::warn!(
                field,
                configured_ms = ms,
                timeout_ms = self.timeout_ms,
                "Shutdown budget exceeds the global deadline, clamping"
            );
        }
        Duration::from_millis(ms.min(self.timeout_ms))
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            queue_drain_timeout_ms: 20_000,
            websocket_close_timeout_ms: 5_000,
        }
    }
}

/// Which cache backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Redis,
}

/// Shared cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,

    /// Redis URL (e.g., redis://localhost:6379).
    pub url: String,

    /// Connection pool size.
    pub pool_size: usize,

    /// Key prefix for namespacing.
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            key_prefix: "backend".to_string(),
        }
    }
}

/// Database pool configuration. No URL means no database.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: 16,
        }
    }
}

/// Background queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of worker tasks.
    pub workers: usize,

    /// Maximum number of buffered jobs.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity: 1024,
        }
    }
}

/// Periodic job configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Register the built-in maintenance jobs.
    pub enabled: bool,

    /// Identifier written into lock records. Random when empty.
    pub instance_id: String,

    /// Cron expression (with seconds) for the system health check.
    pub health_check_cron: String,

    /// Cron expression (with seconds) for the statistics log.
    pub stats_cron: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            instance_id: String::new(),
            health_check_cron: "0 */5 * * * *".to_string(),
            stats_cron: "0 */30 * * * *".to_string(),
        }
    }
}

/// Timeout configuration for HTTP requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}
