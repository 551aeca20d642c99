//! Named mutual-exclusion tokens stored in the shared cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cache::{CacheError, SharedCache};

/// Prefix applied to every lock key.
pub const LOCK_PREFIX: &str = "lock:";

/// Errors talking to the lock store.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock store unavailable for {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: CacheError,
    },
}

/// Build the namespaced cache key for a job.
pub fn lock_key(job: &str) -> String {
    format!("{LOCK_PREFIX}{job}")
}

/// Acquires and releases named locks for this instance.
///
/// Acquisition is a single conditional write, never a read followed by a
/// write, so two instances racing on the same key cannot both win while the
/// backend honours `set_if_absent` atomically.
#[derive(Clone)]
pub struct DistributedLock {
    cache: Arc<dyn SharedCache>,
    instance_id: Arc<str>,
    nonce: Arc<AtomicU64>,
}

impl DistributedLock {
    /// Create a lock client that identifies itself as `instance_id`.
    pub fn new(cache: Arc<dyn SharedCache>, instance_id: impl Into<String>) -> Self {
        let instance_id: String = instance_id.into();
        Self {
            cache,
            instance_id: instance_id.into(),
            nonce: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Identity written into every lock this instance takes.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Try to take the lock for `job` for at most `ttl`.
    ///
    /// Returns `None` when another holder owns a live lock.
    pub async fn try_acquire(&self, job: &str, ttl: Duration) -> Result<Option<LockGuard>, LockError> {
        let key = lock_key(job);
        let token = format!(
            "{}:{}:{}",
            self.instance_id,
            chrono::Utc::now().timestamp_millis(),
            self.nonce.fetch_add(1, Ordering::Relaxed)
        );

        let acquired = self
            .cache
            .set_if_absent(&key, &token, ttl)
            .await
            .map_err(|source| LockError::Store {
                key: key.clone(),
                source,
            })?;

        if !acquired {
            return Ok(None);
        }

        tracing::debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Lock acquired");
        Ok(Some(LockGuard {
            cache: self.cache.clone(),
            key,
            token,
            released: false,
        }))
    }

    /// Current holder token for `job`, if any.
    pub async fn holder(&self, job: &str) -> Result<Option<String>, LockError> {
        let key = lock_key(job);
        self.cache
            .get(&key)
            .await
            .map_err(|source| LockError::Store { key, source })
    }
}

/// A held lock.
///
/// Call [`LockGuard::release`] on every exit path. A guard dropped without
/// release (a panicking job body, a cancelled future) schedules the release
/// on the current runtime instead; if none is available the TTL reclaims it.
pub struct LockGuard {
    cache: Arc<dyn SharedCache>,
    key: String,
    token: String,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("released", &self.released)
            .finish()
    }
}

impl LockGuard {
    /// Cache key the guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The value written into the lock record.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Delete the lock record if this guard still owns it.
    ///
    /// Returns false when the record had already expired or been taken over,
    /// in which case nothing is deleted.
    pub async fn release(mut self) -> Result<bool, LockError> {
        self.released = true;
        let removed = self
            .cache
            .delete_if_equals(&self.key, &self.token)
            .await
            .map_err(|source| LockError::Store {
                key: self.key.clone(),
                source,
            })?;

        if removed {
            tracing::debug!(key = %self.key, "Lock released");
        } else {
            tracing::warn!(key = %self.key, "Lock expired before release");
        }
        Ok(removed)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let cache = self.cache.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = cache.delete_if_equals(&key, &token).await {
                        tracing::warn!(key = %key, error = %e, "Deferred lock release failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(key = %key, "No runtime to release lock, leaving it to expire");
            }
        }
    }
}
