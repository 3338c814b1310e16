use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::CacheError;
use crate::store::Store;
use crate::utils::{now_secs, rand_simple};

/// Configuration for eviction on set operations.
#[derive(Debug, Clone)]
pub struct EvictOnSetConfig {
    /// Provide a number between 0 and 1 to calculate whether eviction should run on each set.
    ///
    /// - `1.0` -> run eviction on every `set`
    /// - `0.5` -> run eviction on every 2nd `set` (on average)
    /// - `0.0` -> disable eviction
    pub frequency: f64,

    /// Remove items until the number of items in the map is lower than `max_items`.
    pub max_items: usize,
}

/// Configuration for HashMapStore.
#[derive(Debug, Clone, Default)]
pub struct HashMapStoreConfig {
    /// Remove expired entries on every `set` operation.
    pub evict_on_set: Option<EvictOnSetConfig>,
}

/// Internal stored entry with expiration time.
#[derive(Clone)]
struct StoredEntry {
    /// Unix seconds, 0 for never.
    expires: u64,
    payload: Vec<u8>,
}

impl StoredEntry {
    fn is_expired(&self, now: u64) -> bool {
        self.expires != 0 && self.expires < now
    }
}

/// Drop `key` only if the entry held now is still expired. A `set` may have
/// replaced it since the caller looked.
fn remove_if_expired(state: &mut HashMap<String, StoredEntry>, key: &str, now: u64) -> bool {
    if state.get(key).is_some_and(|stored| stored.is_expired(now)) {
        state.remove(key);
        return true;
    }
    false
}

/// Thread-safe in-memory cache store using HashMap with RwLock.
///
/// This is a simple, zero-dependency store suitable for:
/// - Low to moderate concurrency (<8 threads)
/// - Small to medium cache sizes (<1000 items)
/// - Applications prioritizing simplicity over performance
///
/// For high-concurrency scenarios, consider using `MokaStore` instead.
pub struct HashMapStore {
    state: RwLock<HashMap<String, StoredEntry>>,
    evict_on_set: Option<EvictOnSetConfig>,
}

impl HashMapStore {
    /// Create a new HashMapStore with the given configuration.
    pub fn new(config: HashMapStoreConfig) -> Self {
        HashMapStore {
            state: RwLock::new(HashMap::new()),
            evict_on_set: config.evict_on_set,
        }
    }

    /// Number of entries currently held, expired or not.
    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run eviction if configured and random check passes.
    async fn maybe_evict(&self) {
        let Some(ref config) = self.evict_on_set else {
            return;
        };

        // Check frequency
        if config.frequency <= 0.0 {
            return;
        }

        let should_evict = if config.frequency >= 1.0 {
            true
        } else {
            rand_simple() < config.frequency
        };

        if !should_evict {
            return;
        }

        let mut state = self.state.write().await;
        let now = now_secs();

        // First delete all expired entries
        state.retain(|_, v| !v.is_expired(now));

        // If still over max_items, remove the entries closest to expiry.
        // Immortal entries go last.
        if state.len() > config.max_items {
            let mut entries: Vec<_> = state
                .iter()
                .map(|(k, v)| (k.clone(), if v.expires == 0 { u64::MAX } else { v.expires }))
                .collect();
            entries.sort_by_key(|(_, expires)| *expires);

            let to_remove = state.len() - config.max_items;
            for (key, _) in entries.into_iter().take(to_remove) {
                state.remove(&key);
            }
        }
    }
}

impl Default for HashMapStore {
    fn default() -> Self {
        HashMapStore::new(HashMapStoreConfig::default())
    }
}

#[async_trait]
impl Store for HashMapStore {
    fn name(&self) -> &'static str {
        "hashmap"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let state = self.state.read().await;

        let Some(stored) = state.get(key) else {
            return Ok(None);
        };

        let now = now_secs();
        if stored.is_expired(now) {
            drop(state);
            remove_if_expired(&mut *self.state.write().await, key, now);
            return Ok(None);
        }

        Ok(Some(stored.payload.clone()))
    }

    async fn set(&self, key: &str, payload: &[u8], ttl: u64) -> Result<(), CacheError> {
        let expires = if ttl == 0 { 0 } else { now_secs().saturating_add(ttl) };

        {
            let mut state = self.state.write().await;
            state.insert(
                key.to_string(),
                StoredEntry {
                    expires,
                    payload: payload.to_vec(),
                },
            );
        }

        self.maybe_evict().await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.state.write().await.remove(key);
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let state = self.state.read().await;
        Ok(state
            .get(key)
            .is_some_and(|stored| !stored.is_expired(now_secs())))
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.state.write().await.clear();
        Ok(())
    }

    async fn prune(&self) -> Result<u64, CacheError> {
        let mut state = self.state.write().await;
        let now = now_secs();
        let before = state.len();
        state.retain(|_, v| !v.is_expired(now));
        Ok((before - state.len()) as u64)
    }
}
