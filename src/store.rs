use async_trait::async_trait;

use crate::error::CacheError;

/// A store is one storage tier: a byte-oriented key-value backend.
///
/// Stores never see typed values; they hold the encoded record envelope. Keys
/// are validated cache keys, and any namespacing, hashing or sharding is up to
/// the store.
///
/// An `Err` from any method is a tier-level failure. The tiered orchestrator
/// logs it and carries on with the remaining tiers.
#[async_trait]
pub trait Store: Send + Sync {
    /// A name for metrics/tracing.
    ///
    /// # Example
    /// - "hashmap"
    /// - "redis"
    /// - "file"
    fn name(&self) -> &'static str;

    /// Return the stored bytes.
    ///
    /// The response must be `None` for cache misses.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store the bytes for `ttl` seconds. A `ttl` of 0 means no expiry.
    async fn set(&self, key: &str, payload: &[u8], ttl: u64) -> Result<(), CacheError>;

    /// Removes the key from the store.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Whether the store currently holds bytes for the key.
    async fn has(&self, key: &str) -> Result<bool, CacheError>;

    /// Removes every key owned by this store.
    async fn clear(&self) -> Result<(), CacheError>;

    /// Purge expired entries and return how many were removed.
    ///
    /// Backends that expire entries natively return 0.
    async fn prune(&self) -> Result<u64, CacheError>;
}
