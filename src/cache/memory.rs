//! In-process cache backed by a concurrent map.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{CacheError, CacheResult, SharedCache};

/// Writes between two sweeps of expired slots.
const SWEEP_EVERY: u64 = 256;

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    expires_at: Instant,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// A TTL-aware cache living inside the process.
///
/// Conditional operations run under the map's per-shard entry lock, so they
/// are atomic with respect to every other caller in this process. Expiry is
/// measured with `tokio::time::Instant` so paused-time tests can advance it.
///
/// Expired slots are dropped when read, and every [`SWEEP_EVERY`] writes the
/// whole map is swept so keys that are never read again do not accumulate.
#[derive(Clone, Default)]
pub struct MemoryCache {
    inner: Arc<DashMap<String, Slot>>,
    closed: Arc<AtomicBool>,
    writes: Arc<AtomicU64>,
}

impl MemoryCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner.iter().filter(|r| r.value().is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired slot. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.len();
        self.inner.retain(|_, slot| slot.is_live(now));
        let removed = before.saturating_sub(self.inner.len());
        if removed > 0 {
            tracing::debug!(removed, "Purged expired cache entries");
        }
        removed
    }

    /// Count a write and sweep when the interval is reached. Must not be
    /// called while holding an entry guard.
    fn note_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY == 0 {
            self.purge_expired();
        }
    }

    fn ensure_open(&self) -> CacheResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SharedCache for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.ensure_open()?;
        let now = Instant::now();
        // Expired slots are dropped lazily on read.
        match self.inner.entry(key.to_string()) {
            Entry::Occupied(slot) if slot.get().is_live(now) => Ok(Some(slot.get().value.clone())),
            Entry::Occupied(slot) => {
                slot.remove();
                Ok(None)
            }
            Entry::Vacant(_) => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.ensure_open()?;
        self.note_write();
        self.inner.insert(
            key.to_string(),
            Slot {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        self.ensure_open()?;
        self.note_write();
        let now = Instant::now();
        let slot = Slot {
            value: value.to_string(),
            expires_at: now + ttl,
        };
        match self.inner.entry(key.to_string()) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_live(now) {
                    Ok(false)
                } else {
                    existing.insert(slot);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.ensure_open()?;
        self.inner.remove(key);
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> CacheResult<bool> {
        self.ensure_open()?;
        let now = Instant::now();
        Ok(self
            .inner
            .remove_if(key, |_, slot| slot.is_live(now) && slot.value == value)
            .is_some())
    }

    async fn ping(&self) -> CacheResult<()> {
        self.ensure_open()
    }

    async fn disconnect(&self) -> CacheResult<()> {
        self.closed.store(true, Ordering::Release);
        self.inner.clear();
        tracing::info!("In-memory cache closed");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
