//! Process-wide TTL cache shared by every adapter.
//!
//! Values are stored type-erased so that one store can hold series snapshots,
//! group names and circuit counters side by side. Each entry carries its own
//! TTL. A failed or empty computation is never stored.

use moka::Expiry;
use moka::future::Cache;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

type Erased = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
struct Entry {
    value: Erased,
    ttl: Duration,
}

/// Expires every entry after its own TTL, counted from the last write.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Shared key-value store with per-entry expiry.
///
/// Lives for the whole process and is handed around as `Arc<CacheLayer>`.
/// Concurrent misses on the same key may run the computation more than once.
#[derive(Clone)]
pub struct CacheLayer {
    inner: Cache<String, Entry>,
}

impl CacheLayer {
    /// Creates an empty cache holding at most `max_capacity` entries.
    pub fn new(max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();

        Self { inner }
    }

    /// Builds the key for an operation prefix and identifier.
    pub fn key(prefix: &str, id: &str) -> String {
        format!("{}_{}", prefix, id)
    }

    /// Returns the stored value, or `None` when absent, expired or of another type.
    pub async fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let entry = self.inner.get(key).await?;
        entry.value.downcast::<T>().ok()
    }

    /// Stores `value` under `key` for `ttl`, replacing any previous entry.
    pub async fn set<T>(&self, key: &str, value: T, ttl: Duration) -> Arc<T>
    where
        T: Send + Sync + 'static,
    {
        let value = Arc::new(value);
        self.inner
            .insert(
                key.to_string(),
                Entry {
                    value: value.clone(),
                    ttl,
                },
            )
            .await;
        value
    }

    /// Returns the cached value or runs `compute` and memoizes a present result.
    ///
    /// `Ok(None)` and `Err(_)` are handed back to the caller without being
    /// stored, so the next call recomputes.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Option<Arc<T>>, E>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        if let Some(hit) = self.get::<T>(key).await {
            debug!(key, "cache hit");
            return Ok(Some(hit));
        }

        debug!(key, "cache miss");
        match compute().await? {
            Some(value) => Ok(Some(self.set(key, value, ttl).await)),
            None => Ok(None),
        }
    }
}
