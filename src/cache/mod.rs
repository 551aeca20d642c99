//! Shared key-value cache.
//!
//! # Data Flow
//! ```text
//! lock (distributed lock records)      ─┐
//! scheduler tasks (health probe keys)   ├─→ SharedCache ─→ memory.rs (single instance, tests)
//! health probes (ping)                 ─┘              └─→ redis.rs  (shared by all instances)
//! ```
//!
//! # Design Decisions
//! - Values are strings; callers encode what they store
//! - Conditional write and compare-and-delete are part of the contract so
//!   the lock never relies on a racy get-then-set
//! - `disconnect` is owned by the shutdown coordinator; nothing else calls it

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{CacheBackend, CacheConfig};

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

/// Errors returned by cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache was disconnected during shutdown.
    #[error("cache connection is closed")]
    Closed,

    /// The backend rejected or failed a command.
    #[error("cache backend error: {0}")]
    Backend(String),

    /// No connection could be checked out of the pool.
    #[error("cache pool error: {0}")]
    Pool(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Operations every shared cache backend provides.
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Read a value; absent and expired keys both return `None`.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Write a value unconditionally with an expiry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Write a value only if the key is absent. Returns true if written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Remove a key only if it still holds `value`. Returns true if removed.
    async fn delete_if_equals(&self, key: &str, value: &str) -> CacheResult<bool>;

    /// Round-trip health check.
    async fn ping(&self) -> CacheResult<()>;

    /// Close the underlying connections.
    async fn disconnect(&self) -> CacheResult<()>;

    /// Backend name for logs and health payloads.
    fn backend(&self) -> &'static str;
}

/// Build the configured cache backend.
pub async fn connect(config: &CacheConfig) -> CacheResult<Arc<dyn SharedCache>> {
    match config.backend {
        CacheBackend::Memory => {
            tracing::info!("Using in-memory cache");
            Ok(Arc::new(MemoryCache::new()))
        }
        CacheBackend::Redis => Ok(Arc::new(RedisCache::connect(config).await?)),
    }
}
