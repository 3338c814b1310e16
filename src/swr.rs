use futures::future::{BoxFuture, join_all};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::serializer::{Serializer, SerializerKind};
use crate::error::{BoxError, CacheError};
use crate::key::validate_key;
use crate::lock::LockProvider;
use crate::record::Lifetime;
use crate::tiered::TieredStore;
use crate::utils::now_secs;

/// Lifetime requested for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// The cache's configured default TTL.
    #[default]
    Default,
    /// Never expires.
    Never,
    /// Expires this many seconds from now.
    Seconds(u64),
}

impl From<u64> for Ttl {
    fn from(secs: u64) -> Self {
        Ttl::Seconds(secs)
    }
}

/// Rounds up to whole seconds, so a sub-second duration never becomes
/// `Seconds(0)` (which deletes on `set`).
impl From<Duration> for Ttl {
    fn from(duration: Duration) -> Self {
        let secs = duration.as_secs();
        if duration.subsec_nanos() > 0 {
            Ttl::Seconds(secs.saturating_add(1))
        } else {
            Ttl::Seconds(secs)
        }
    }
}

/// Where a stale-hit revalidation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevalidateMode {
    /// Inline, before `get_or_set_swr` returns.
    #[default]
    Sync,
    /// Handed to the configured [`DeferHook`]. Inline when there is none.
    Defer,
}

/// Options for [`SwrCache::get_or_set_swr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwrOptions {
    /// Freshness of a produced value.
    pub ttl: Ttl,
    /// Seconds past expiry during which the stale value is served while a
    /// refresh runs.
    pub swr: u64,
    /// Seconds past expiry during which the stale value is served when a
    /// refresh fails or cannot run.
    pub stale_if_error: u64,
    pub mode: RevalidateMode,
}

impl SwrOptions {
    pub fn new(ttl: Ttl, swr: u64, stale_if_error: u64) -> Self {
        SwrOptions {
            ttl,
            swr,
            stale_if_error,
            mode: RevalidateMode::Sync,
        }
    }

    /// Revalidate through the defer hook.
    pub fn deferred(mut self) -> Self {
        self.mode = RevalidateMode::Defer;
        self
    }
}

/// Host hook that runs work after the current response is delivered.
pub trait DeferHook: Send + Sync {
    fn defer(&self, task: BoxFuture<'static, ()>);
}

/// Defers by spawning onto the current tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDefer;

impl DeferHook for TokioDefer {
    fn defer(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }
}

struct Inner<S> {
    tiers: TieredStore<S>,
    locks: Arc<dyn LockProvider>,
    defer: Option<Arc<dyn DeferHook>>,
    default_ttl: u64,
}

/// Multi-tier cache with stale-while-revalidate reads.
///
/// Plain operations (`get`, `set`, `delete`, `has`, batch variants) never
/// serve stale data and downgrade storage failures to a miss or `false`.
/// Only invalid keys, encoding failures and producer failures reach the
/// caller as errors.
///
/// `get_or_set_swr` adds the staleness windows: a fresh value is returned
/// directly, a stale one inside a window is returned while a single
/// revalidation refreshes it, and a miss computes the value under a per-key
/// lock so concurrent callers share one producer run.
pub struct SwrCache<S = SerializerKind> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for SwrCache<S> {
    fn clone(&self) -> Self {
        SwrCache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Serializer> SwrCache<S> {
    /// Create a cache over `tiers`.
    ///
    /// `default_ttl` is in seconds, 0 meaning records never expire.
    pub fn new(
        tiers: TieredStore<S>,
        locks: Arc<dyn LockProvider>,
        defer: Option<Arc<dyn DeferHook>>,
        default_ttl: u64,
    ) -> Self {
        SwrCache {
            inner: Arc::new(Inner {
                tiers,
                locks,
                defer,
                default_ttl,
            }),
        }
    }

    pub fn tiers(&self) -> &TieredStore<S> {
        &self.inner.tiers
    }

    pub fn default_ttl(&self) -> u64 {
        self.inner.default_ttl
    }

    /// Return the cached value. Expired records are a miss.
    pub async fn get<V>(&self, key: &str) -> Result<Option<V>, CacheError>
    where
        V: DeserializeOwned,
    {
        validate_key(key)?;
        Ok(self.read(key).await)
    }

    /// Return the cached value or `default` on a miss.
    pub async fn get_or<V>(&self, key: &str, default: V) -> Result<V, CacheError>
    where
        V: DeserializeOwned,
    {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    /// Write `value` to every tier.
    ///
    /// `Ttl::Seconds(0)` deletes the key. Returns whether every tier
    /// accepted the write.
    pub async fn set<V>(&self, key: &str, value: &V, ttl: Ttl) -> Result<bool, CacheError>
    where
        V: Serialize + ?Sized,
    {
        validate_key(key)?;
        self.write(key, value, ttl).await
    }

    /// Remove `key` from every tier.
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        validate_key(key)?;
        Ok(self.inner.tiers.delete(key).await)
    }

    /// Whether an unexpired record exists for `key`.
    pub async fn has(&self, key: &str) -> Result<bool, CacheError> {
        validate_key(key)?;
        Ok(self.inner.tiers.has(key, now_secs()).await)
    }

    /// Remove every entry from every tier.
    pub async fn clear(&self) -> bool {
        self.inner.tiers.clear().await
    }

    /// Purge expired entries, returning how many were removed.
    pub async fn prune(&self) -> u64 {
        self.inner.tiers.prune().await
    }

    /// Get several keys at once. Every key is validated before any lookup.
    pub async fn get_many<V, K>(&self, keys: &[K]) -> Result<HashMap<String, Option<V>>, CacheError>
    where
        V: DeserializeOwned,
        K: AsRef<str>,
    {
        for key in keys {
            validate_key(key.as_ref())?;
        }

        let lookups = keys.iter().map(|key| async move {
            let key = key.as_ref();
            (key.to_string(), self.read(key).await)
        });
        Ok(join_all(lookups).await.into_iter().collect())
    }

    /// Set several entries with one TTL. True only if every write succeeded.
    pub async fn set_many<V, K>(&self, entries: &[(K, V)], ttl: Ttl) -> Result<bool, CacheError>
    where
        V: Serialize,
        K: AsRef<str>,
    {
        for (key, _) in entries {
            validate_key(key.as_ref())?;
        }

        let mut ok = true;
        for (key, value) in entries {
            ok &= self.write(key.as_ref(), value, ttl).await?;
        }
        Ok(ok)
    }

    /// Delete several keys. True only if every delete succeeded everywhere.
    pub async fn delete_many<K>(&self, keys: &[K]) -> Result<bool, CacheError>
    where
        K: AsRef<str>,
    {
        for key in keys {
            validate_key(key.as_ref())?;
        }

        let deletes = keys
            .iter()
            .map(|key| self.inner.tiers.delete(key.as_ref()));
        Ok(join_all(deletes).await.into_iter().all(|ok| ok))
    }

    async fn read<V>(&self, key: &str) -> Option<V>
    where
        V: DeserializeOwned,
    {
        self.inner
            .tiers
            .read_through(key, now_secs(), false, true)
            .await
            .map(|hit| hit.value)
    }

    async fn write<V>(&self, key: &str, value: &V, ttl: Ttl) -> Result<bool, CacheError>
    where
        V: Serialize + ?Sized,
    {
        let now = now_secs();
        let lifetime = match ttl {
            Ttl::Seconds(0) => return Ok(self.inner.tiers.delete(key).await),
            Ttl::Seconds(secs) => Lifetime::expiring(now, secs, 0, 0),
            Ttl::Never => Lifetime::immortal(),
            Ttl::Default => self.lifetime(now, self.inner.default_ttl, 0, 0),
        };

        let payload = self.inner.tiers.codec().encode(value, lifetime)?;
        Ok(self
            .inner
            .tiers
            .write_all_tiers(key, &payload, lifetime.visible_ttl(now))
            .await)
    }

    fn lifetime(&self, now: u64, ttl: u64, swr: u64, stale_if_error: u64) -> Lifetime {
        if ttl == 0 {
            Lifetime::immortal()
        } else {
            Lifetime::expiring(now, ttl, swr, stale_if_error)
        }
    }

    /// Encode a freshly produced value with the windows of `options`.
    fn encode_fresh<V>(&self, value: &V, options: &SwrOptions) -> Result<(Vec<u8>, u64), CacheError>
    where
        V: Serialize,
    {
        let now = now_secs();
        let lifetime = match options.ttl {
            Ttl::Never => Lifetime::immortal(),
            Ttl::Seconds(secs) if secs > 0 => {
                Lifetime::expiring(now, secs, options.swr, options.stale_if_error)
            }
            _ => self.lifetime(
                now,
                self.inner.default_ttl,
                options.swr,
                options.stale_if_error,
            ),
        };

        let payload = self.inner.tiers.codec().encode(value, lifetime)?;
        Ok((payload, lifetime.visible_ttl(now)))
    }

    /// Stale-while-revalidate: return the cached value or compute it.
    ///
    /// - A fresh value is returned immediately.
    /// - An expired value still inside its SWR or stale-if-error window is
    ///   returned after scheduling one revalidation. If another caller is
    ///   already revalidating the key, nothing is scheduled.
    /// - Otherwise the per-key lock is taken, the cache is checked again and
    ///   the producer runs only if the value is still missing. If the lock
    ///   cannot be taken the producer runs uncoordinated.
    ///
    /// Producer failures on a miss are returned as [`CacheError::Producer`];
    /// during revalidation they are logged and the stale value stands.
    ///
    /// # Example
    /// ```ignore
    /// let report: Report = cache
    ///     .get_or_set_swr("report.daily", &SwrOptions::new(Ttl::Seconds(60), 300, 3600), || async {
    ///         build_report().await
    ///     })
    ///     .await?;
    /// ```
    pub async fn get_or_set_swr<V, F, Fut, E>(
        &self,
        key: &str,
        options: &SwrOptions,
        producer: F,
    ) -> Result<V, CacheError>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        validate_key(key)?;

        if let Some(hit) = self
            .inner
            .tiers
            .read_through::<V>(key, now_secs(), true, true)
            .await
        {
            if hit.staleness.expired {
                tracing::debug!(
                    key = %key,
                    within_swr = hit.staleness.within_swr,
                    within_stale_if_error = hit.staleness.within_stale_if_error,
                    "Serving stale value"
                );
                self.schedule_revalidation(key, options, producer).await;
            }
            return Ok(hit.value);
        }

        let mut lock = self.inner.locks.lock_for(key);
        if !lock.acquire(true).await {
            tracing::warn!(key = %key, "Lock unavailable, computing without coordination");
            return self.produce(key, options, producer).await;
        }

        // Another holder may have filled the key while we waited. Anything
        // servable counts, stale included.
        if let Some(hit) = self
            .inner
            .tiers
            .read_through::<V>(key, now_secs(), true, true)
            .await
        {
            lock.release();
            return Ok(hit.value);
        }

        let result = self.produce(key, options, producer).await;
        lock.release();
        result
    }

    async fn produce<V, F, Fut, E>(
        &self,
        key: &str,
        options: &SwrOptions,
        producer: F,
    ) -> Result<V, CacheError>
    where
        V: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Into<BoxError>,
    {
        let value = match producer().await {
            Ok(value) => value,
            Err(e) => {
                let err = CacheError::producer(e);
                tracing::error!(key = %key, error = %err, "Producer failed");
                return Err(err);
            }
        };

        let (payload, ttl) = self.encode_fresh(&value, options)?;
        if !self.inner.tiers.write_all_tiers(key, &payload, ttl).await {
            tracing::warn!(key = %key, "Produced value not stored on every tier");
        }
        Ok(value)
    }

    async fn schedule_revalidation<V, F, Fut, E>(&self, key: &str, options: &SwrOptions, producer: F)
    where
        V: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let cache = self.clone();
        let key = key.to_string();
        let options = *options;
        let task = async move { cache.revalidate(&key, &options, producer).await };

        match (options.mode, &self.inner.defer) {
            (RevalidateMode::Defer, Some(hook)) => hook.defer(Box::pin(task)),
            _ => task.await,
        }
    }

    async fn revalidate<V, F, Fut, E>(&self, key: &str, options: &SwrOptions, producer: F)
    where
        V: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Into<BoxError>,
    {
        let mut lock = self.inner.locks.lock_for(key);
        if !lock.acquire(false).await {
            tracing::debug!(key = %key, "Revalidation already in progress, skipping");
            return;
        }

        match producer().await {
            Ok(value) => match self.encode_fresh(&value, options) {
                Ok((payload, ttl)) => {
                    let stored = self.inner.tiers.write_all_tiers(key, &payload, ttl).await;
                    tracing::debug!(key = %key, stored, "Revalidated");
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Revalidated value could not be encoded");
                }
            },
            Err(e) => {
                let e: BoxError = e.into();
                tracing::warn!(key = %key, error = %e, "Revalidation failed, stale value stands");
            }
        }

        lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RecordCodec;
    use crate::lock::{KeyLock, MemoryLockProvider};
    use crate::store::Store;
    use crate::stores::memory::HashMapStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("origin down")]
    struct OriginDown;

    /// Locks that can never be taken.
    struct BrokenLocks;

    struct BrokenLock;

    #[async_trait]
    impl KeyLock for BrokenLock {
        async fn acquire(&mut self, _blocking: bool) -> bool {
            false
        }

        fn release(&mut self) {}

        fn is_held(&self) -> bool {
            false
        }
    }

    impl LockProvider for BrokenLocks {
        fn lock_for(&self, _key: &str) -> Box<dyn KeyLock> {
            Box::new(BrokenLock)
        }
    }

    /// Queues deferred work until the test runs it.
    #[derive(Default)]
    struct QueueDefer {
        tasks: Mutex<Vec<BoxFuture<'static, ()>>>,
    }

    impl QueueDefer {
        async fn run_all(&self) {
            let tasks = std::mem::take(&mut *self.tasks.lock());
            for task in tasks {
                task.await;
            }
        }
    }

    impl DeferHook for QueueDefer {
        fn defer(&self, task: BoxFuture<'static, ()>) {
            self.tasks.lock().push(task);
        }
    }

    struct Fixture {
        cache: SwrCache,
        store: Arc<HashMapStore>,
        locks: MemoryLockProvider,
    }

    fn fixture_with(defer: Option<Arc<dyn DeferHook>>) -> Fixture {
        let store = Arc::new(HashMapStore::default());
        let locks = MemoryLockProvider::new();
        let tiers = TieredStore::new(
            vec![store.clone() as Arc<dyn Store>],
            Arc::new(RecordCodec::uncompressed(SerializerKind::Json)),
        )
        .unwrap();
        let cache = SwrCache::new(tiers, Arc::new(locks.clone()), defer, 3600);
        Fixture {
            cache,
            store,
            locks,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(None)
    }

    /// Store a record that expired `ago` seconds ago with the given windows.
    async fn seed_expired(cache: &SwrCache, key: &str, value: &str, ago: u64, swr: u64, sei: u64) {
        let lifetime = Lifetime::expiring(now_secs() - ago - 10, 10, swr, sei);
        let payload = cache.tiers().codec().encode(value, lifetime).unwrap();
        assert!(cache.tiers().write_all_tiers(key, &payload, 0).await);
    }

    fn counting_producer(
        calls: &Arc<AtomicUsize>,
        value: &str,
    ) -> impl FnOnce() -> futures::future::Ready<Result<String, OriginDown>> + Send + 'static {
        let calls = calls.clone();
        let value = value.to_string();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(value))
        }
    }

    #[tokio::test]
    async fn test_get_set_delete_has() {
        let Fixture { cache, .. } = fixture();

        assert_eq!(cache.get::<String>("user.1").await.unwrap(), None);
        assert!(!cache.has("user.1").await.unwrap());

        assert!(cache.set("user.1", "alice", Ttl::Default).await.unwrap());
        assert_eq!(
            cache.get::<String>("user.1").await.unwrap(),
            Some("alice".to_string())
        );
        assert!(cache.has("user.1").await.unwrap());

        assert!(cache.delete("user.1").await.unwrap());
        assert!(!cache.has("user.1").await.unwrap());
        assert_eq!(cache.get_or("user.1", 5u32).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_zero_ttl_deletes() {
        let Fixture { cache, store, .. } = fixture();

        cache.set("k", &1u32, Ttl::Never).await.unwrap();
        assert!(cache.set("k", &2u32, Ttl::Seconds(0)).await.unwrap());
        assert!(store.is_empty().await);
        assert_eq!(cache.get::<u32>("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_lifetimes() {
        let Fixture { cache, store, .. } = fixture();
        let now = now_secs();

        cache.set("never", &1u8, Ttl::Never).await.unwrap();
        cache.set("short", &1u8, Ttl::Seconds(30)).await.unwrap();
        cache.set("default", &1u8, Ttl::Default).await.unwrap();

        let codec = cache.tiers().codec();
        let lifetime = |bytes: Vec<u8>| codec.decode_raw(&bytes).unwrap().lifetime;

        assert!(lifetime(store.get("never").await.unwrap().unwrap()).is_immortal());
        let short = lifetime(store.get("short").await.unwrap().unwrap()).expires_at;
        assert!((now + 30..=now + 31).contains(&short));
        let default = lifetime(store.get("default").await.unwrap().unwrap()).expires_at;
        assert!((now + 3600..=now + 3601).contains(&default));
    }

    #[tokio::test]
    async fn test_value_served_through_its_expiry_second() {
        let Fixture { cache, store, .. } = fixture();
        cache.set("k", &1u8, Ttl::Seconds(1)).await.unwrap();

        let bytes = store.get("k").await.unwrap().unwrap();
        let expires_at = cache.tiers().codec().decode_raw(&bytes).unwrap().lifetime.expires_at;
        while now_secs() < expires_at {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(!Lifetime { expires_at, ..Lifetime::default() }.classify(expires_at).expired);
        assert_eq!(cache.get::<u8>("k").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_invalid_key_is_rejected_before_io() {
        let Fixture { cache, store, .. } = fixture();

        assert!(matches!(
            cache.set("a/b", &1u8, Ttl::Never).await,
            Err(CacheError::InvalidKey(_))
        ));
        assert!(matches!(
            cache.get::<u8>("").await,
            Err(CacheError::InvalidKey(_))
        ));
        assert!(matches!(cache.has("a:b").await, Err(CacheError::InvalidKey(_))));
        assert!(matches!(
            cache.delete(&"x".repeat(65)).await,
            Err(CacheError::InvalidKey(_))
        ));

        let result = cache
            .get_or_set_swr("bad key", &SwrOptions::default(), || async {
                Ok::<_, OriginDown>(1u8)
            })
            .await;
        assert!(matches!(result, Err(CacheError::InvalidKey(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_batch_operations() {
        let Fixture { cache, .. } = fixture();

        let entries = [("a", 1u32), ("b", 2u32)];
        assert!(cache.set_many(&entries, Ttl::Default).await.unwrap());

        let values: HashMap<String, Option<u32>> =
            cache.get_many(&["a", "b", "c"]).await.unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values["a"], Some(1));
        assert_eq!(values["b"], Some(2));
        assert_eq!(values["c"], None);

        assert!(cache.delete_many(&["a", "b"]).await.unwrap());
        assert!(!cache.has("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_validates_every_key_first() {
        let Fixture { cache, store, .. } = fixture();

        let entries = [("good", 1u32), ("bad{}", 2u32)];
        assert!(matches!(
            cache.set_many(&entries, Ttl::Default).await,
            Err(CacheError::InvalidKey(_))
        ));
        assert!(store.is_empty().await);

        assert!(matches!(
            cache.get_many::<u32, _>(&["good", "(bad)"]).await,
            Err(CacheError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_swr_miss_produces_once_and_caches() {
        let Fixture { cache, .. } = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = SwrOptions::new(Ttl::Seconds(60), 30, 0);

        let value: String = cache
            .get_or_set_swr("k", &options, counting_producer(&calls, "v1"))
            .await
            .unwrap();
        assert_eq!(value, "v1");

        let value: String = cache
            .get_or_set_swr("k", &options, counting_producer(&calls, "v2"))
            .await
            .unwrap();
        assert_eq!(value, "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get::<String>("k").await.unwrap(), Some("v1".to_string()));
    }

    #[tokio::test]
    async fn test_swr_stale_hit_serves_stale_and_refreshes_inline() {
        let Fixture { cache, .. } = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        seed_expired(&cache, "k", "stale", 5, 60, 0).await;

        let value: String = cache
            .get_or_set_swr("k", &SwrOptions::new(Ttl::Seconds(60), 60, 0), counting_producer(&calls, "fresh"))
            .await
            .unwrap();

        assert_eq!(value, "stale");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get::<String>("k").await.unwrap(), Some("fresh".to_string()));
    }

    #[tokio::test]
    async fn test_stale_if_error_window_also_revalidates() {
        let Fixture { cache, .. } = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        seed_expired(&cache, "k", "stale", 5, 0, 60).await;

        let value: String = cache
            .get_or_set_swr("k", &SwrOptions::new(Ttl::Seconds(60), 0, 60), counting_producer(&calls, "fresh"))
            .await
            .unwrap();

        assert_eq!(value, "stale");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_revalidation_failure_keeps_stale_value() {
        let Fixture { cache, .. } = fixture();
        seed_expired(&cache, "k", "stale", 5, 60, 0).await;

        let value: String = cache
            .get_or_set_swr("k", &SwrOptions::new(Ttl::Seconds(60), 60, 0), || async {
                Err::<String, _>(OriginDown)
            })
            .await
            .unwrap();
        assert_eq!(value, "stale");

        // Still served stale on the next call.
        let calls = Arc::new(AtomicUsize::new(0));
        let value: String = cache
            .get_or_set_swr("k", &SwrOptions::new(Ttl::Seconds(60), 60, 0), counting_producer(&calls, "fresh"))
            .await
            .unwrap();
        assert_eq!(value, "stale");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_revalidation_skipped_while_locked() {
        let Fixture { cache, locks, .. } = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        seed_expired(&cache, "k", "stale", 5, 60, 0).await;

        let mut holder = locks.lock_for("k");
        assert!(holder.acquire(false).await);

        let value: String = cache
            .get_or_set_swr("k", &SwrOptions::new(Ttl::Seconds(60), 60, 0), counting_producer(&calls, "fresh"))
            .await
            .unwrap();

        assert_eq!(value, "stale");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deferred_revalidation_runs_on_hook() {
        let hook = Arc::new(QueueDefer::default());
        let Fixture { cache, .. } = fixture_with(Some(hook.clone()));
        let calls = Arc::new(AtomicUsize::new(0));
        seed_expired(&cache, "k", "stale", 5, 60, 0).await;

        let options = SwrOptions::new(Ttl::Seconds(60), 60, 0).deferred();
        let value: String = cache
            .get_or_set_swr("k", &options, counting_producer(&calls, "fresh"))
            .await
            .unwrap();

        assert_eq!(value, "stale");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        hook.run_all().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get::<String>("k").await.unwrap(), Some("fresh".to_string()));
    }

    #[tokio::test]
    async fn test_defer_without_hook_runs_inline() {
        let Fixture { cache, .. } = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        seed_expired(&cache, "k", "stale", 5, 60, 0).await;

        let options = SwrOptions::new(Ttl::Seconds(60), 60, 0).deferred();
        let _: String = cache
            .get_or_set_swr("k", &options, counting_producer(&calls, "fresh"))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tokio_defer_refreshes_in_background() {
        let Fixture { cache, .. } = fixture_with(Some(Arc::new(TokioDefer)));
        let calls = Arc::new(AtomicUsize::new(0));
        seed_expired(&cache, "k", "stale", 5, 60, 0).await;

        let options = SwrOptions::new(Ttl::Seconds(60), 60, 0).deferred();
        let value: String = cache
            .get_or_set_swr("k", &options, counting_producer(&calls, "fresh"))
            .await
            .unwrap();
        assert_eq!(value, "stale");

        for _ in 0..100 {
            if cache.get::<String>("k").await.unwrap().as_deref() == Some("fresh") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("background revalidation never stored the fresh value");
    }

    #[tokio::test]
    async fn test_expired_past_windows_recomputes() {
        let Fixture { cache, .. } = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        seed_expired(&cache, "k", "ancient", 100, 10, 20).await;

        let value: String = cache
            .get_or_set_swr("k", &SwrOptions::new(Ttl::Seconds(60), 10, 20), counting_producer(&calls, "fresh"))
            .await
            .unwrap();
        assert_eq!(value, "fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_producer_error_on_miss_is_returned() {
        let Fixture { cache, store, locks } = fixture();

        let err = cache
            .get_or_set_swr("k", &SwrOptions::default(), || async {
                Err::<String, _>(OriginDown)
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Producer(_)));
        assert!(err.producer_error().unwrap().downcast_ref::<OriginDown>().is_some());
        assert!(store.is_empty().await);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_lock_failure_falls_back_to_uncoordinated_compute() {
        let store = Arc::new(HashMapStore::default());
        let tiers = TieredStore::new(
            vec![store.clone() as Arc<dyn Store>],
            Arc::new(RecordCodec::uncompressed(SerializerKind::Json)),
        )
        .unwrap();
        let cache = SwrCache::new(tiers, Arc::new(BrokenLocks), None, 60);
        let calls = Arc::new(AtomicUsize::new(0));

        let value: String = cache
            .get_or_set_swr("k", &SwrOptions::default(), counting_producer(&calls, "v"))
            .await
            .unwrap();
        assert_eq!(value, "v");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get::<String>("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_waiter_rechecks_cache_after_lock() {
        let Fixture { cache, locks, .. } = fixture();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut holder = locks.lock_for("k");
        assert!(holder.acquire(false).await);

        let waiter = {
            let cache = cache.clone();
            let producer = counting_producer(&calls, "from.waiter");
            tokio::spawn(async move {
                cache
                    .get_or_set_swr::<String, _, _, _>("k", &SwrOptions::default(), producer)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.set("k", "from.holder", Ttl::Default).await.unwrap();
        holder.release();

        assert_eq!(waiter.await.unwrap().unwrap(), "from.holder");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_waiter_accepts_stale_record_written_while_waiting() {
        let Fixture { cache, locks, .. } = fixture();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut holder = locks.lock_for("k");
        assert!(holder.acquire(false).await);

        let waiter = {
            let cache = cache.clone();
            let producer = counting_producer(&calls, "from.waiter");
            tokio::spawn(async move {
                cache
                    .get_or_set_swr::<String, _, _, _>("k", &SwrOptions::default(), producer)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        seed_expired(&cache, "k", "stale.from.holder", 2, 60, 0).await;
        holder.release();

        assert_eq!(waiter.await.unwrap().unwrap(), "stale.from.holder");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_set_with_sub_second_duration_keeps_value() {
        let Fixture { cache, .. } = fixture();

        assert!(cache.set("k", &7u8, Duration::from_millis(300).into()).await.unwrap());
        assert_eq!(cache.get::<u8>("k").await.unwrap(), Some(7));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_single_flight() {
        let Fixture { cache, .. } = fixture();
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_set_swr("k", &SwrOptions::new(Ttl::Seconds(60), 0, 0), move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, OriginDown>(42u64)
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ttl_conversions() {
        assert_eq!(Ttl::from(5u64), Ttl::Seconds(5));
        assert_eq!(Ttl::from(Duration::from_millis(2500)), Ttl::Seconds(3));
        assert_eq!(Ttl::from(Duration::from_secs(4)), Ttl::Seconds(4));
        assert_eq!(Ttl::from(Duration::from_millis(1)), Ttl::Seconds(1));
        assert_eq!(Ttl::from(Duration::ZERO), Ttl::Seconds(0));
        assert_eq!(Ttl::default(), Ttl::Default);

        let options = SwrOptions::new(Ttl::Never, 1, 2).deferred();
        assert_eq!(options.ttl, Ttl::Never);
        assert_eq!(options.mode, RevalidateMode::Defer);
    }
}
