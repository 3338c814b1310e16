use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::CacheError;
use crate::store::Store;

/// Configuration for MokaStore.
#[derive(Debug, Clone)]
pub struct MokaStoreConfig {
    /// Maximum number of entries the cache can hold.
    pub max_capacity: u64,

    /// Time to idle: entries are expired if not accessed within this duration.
    /// `None` means entries don't expire based on idle time.
    pub time_to_idle: Option<Duration>,
}

impl Default for MokaStoreConfig {
    fn default() -> Self {
        MokaStoreConfig {
            max_capacity: 10_000,
            time_to_idle: None,
        }
    }
}

/// Ttls past this many seconds (about 1000 years) are kept without expiry.
const MAX_ENTRY_TTL: u64 = 1000 * 365 * 24 * 3600;

fn entry_ttl(ttl: u64) -> Option<Duration> {
    (ttl > 0 && ttl <= MAX_ENTRY_TTL).then(|| Duration::from_secs(ttl))
}

#[derive(Clone)]
struct MokaEntry {
    payload: Arc<[u8]>,
    ttl: Option<Duration>,
}

/// Per-entry expiry taken from the ttl passed to `set`.
struct EntryTtl;

impl Expiry<String, MokaEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &MokaEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &MokaEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// High-performance concurrent cache store using Moka.
///
/// MokaStore provides:
/// - Lock-free concurrent access for reads and writes
/// - Automatic background eviction with configurable policies
/// - Per-entry expiry driven by the ttl of each `set`
///
/// Expiry is native, so `prune` only flushes Moka's pending maintenance and
/// reports 0.
pub struct MokaStore {
    cache: Cache<String, MokaEntry>,
}

impl MokaStore {
    /// Create a new MokaStore with the given configuration.
    ///
    /// # Example
    /// ```ignore
    /// let config = MokaStoreConfig {
    ///     max_capacity: 10_000,
    ///     time_to_idle: Some(Duration::from_secs(60)),
    /// };
    /// let store = MokaStore::new(config);
    /// ```
    pub fn new(config: MokaStoreConfig) -> Self {
        let mut builder = Cache::builder()
            .max_capacity(config.max_capacity)
            .expire_after(EntryTtl);

        if let Some(tti) = config.time_to_idle {
            builder = builder.time_to_idle(tti);
        }

        MokaStore {
            cache: builder.build(),
        }
    }

    /// Get cache statistics (for monitoring/debugging).
    pub fn stats(&self) -> (u64, u64) {
        let entry_count = self.cache.entry_count();
        let weighted_size = self.cache.weighted_size();
        (entry_count, weighted_size)
    }
}

impl Default for MokaStore {
    fn default() -> Self {
        MokaStore::new(MokaStoreConfig::default())
    }
}

#[async_trait]
impl Store for MokaStore {
    fn name(&self) -> &'static str {
        "moka"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self
            .cache
            .get(key)
            .await
            .map(|entry| entry.payload.to_vec()))
    }

    async fn set(&self, key: &str, payload: &[u8], ttl: u64) -> Result<(), CacheError> {
        let entry = MokaEntry {
            payload: Arc::from(payload),
            ttl: entry_ttl(ttl),
        };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.cache.contains_key(key))
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn prune(&self) -> Result<u64, CacheError> {
        self.cache.run_pending_tasks().await;
        Ok(0)
    }
}
