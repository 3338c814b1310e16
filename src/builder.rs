//! Builder API for assembling an [`SwrCache`].
//!
//! Either wire the parts by hand or derive them from a [`CacheConfig`].

use std::sync::Arc;
use std::time::Duration;

use crate::codec::RecordCodec;
use crate::codec::compressor::{CompressionKind, Compressor, NoneCompressor};
use crate::codec::serializer::{Serializer, SerializerKind};
use crate::config::{CacheConfig, Driver};
use crate::error::CacheError;
use crate::lock::{FileLockProvider, LockProvider, MemoryLockProvider};
use crate::store::Store;
use crate::stores::file::{FileStore, FileStoreConfig};
use crate::stores::memory::{EvictOnSetConfig, HashMapStore, HashMapStoreConfig};
use crate::stores::moka::{MokaStore, MokaStoreConfig};
use crate::stores::redis::{RedisStore, RedisStoreConfig};
use crate::swr::{DeferHook, SwrCache};
use crate::tiered::TieredStore;

/// Builder for [`SwrCache`].
///
/// Without an explicit lock provider the cache uses an in-process
/// [`MemoryLockProvider`], which only coordinates callers sharing this
/// process. [`CacheBuilder::from_config`] uses file locks instead.
///
/// # Example
///
/// ```ignore
/// use tiered_swr::{CacheBuilder, CompressionKind, HashMapStore, RedisStore, RedisStoreConfig};
/// use std::sync::Arc;
///
/// let cache = CacheBuilder::new()
///     .tier(Arc::new(HashMapStore::default()))
///     .tier(Arc::new(RedisStore::new(RedisStoreConfig::default()).await?))
///     .compression(CompressionKind::Zstd, None)
///     .default_ttl(300)
///     .build()?;
/// ```
pub struct CacheBuilder<S = SerializerKind> {
    tiers: Vec<Arc<dyn Store>>,
    serializer: S,
    compressor: Arc<dyn Compressor>,
    default_ttl: u64,
    locks: Option<Arc<dyn LockProvider>>,
    defer: Option<Arc<dyn DeferHook>>,
}

impl CacheBuilder<SerializerKind> {
    /// Create a new CacheBuilder with JSON values, no compression and a one
    /// hour default TTL.
    pub fn new() -> Self {
        CacheBuilder {
            tiers: Vec::new(),
            serializer: SerializerKind::default(),
            compressor: Arc::new(NoneCompressor),
            default_ttl: 3600,
            locks: None,
            defer: None,
        }
    }

    /// Prepare a builder from `config`: connect every configured tier in
    /// order and set up file locks under `config.lock_path`.
    pub async fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        let mut builder = CacheBuilder::new()
            .serializer(config.serializer)
            .compression(config.compressor, config.compression_level)
            .default_ttl(config.default_ttl)
            .lock_provider(Arc::new(
                FileLockProvider::new(&config.lock_path)?.with_timeout(config.lock_timeout()),
            ));

        for driver in &config.drivers {
            builder = builder.tier(connect(*driver, config).await?);
        }
        Ok(builder)
    }
}

impl Default for CacheBuilder<SerializerKind> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Serializer> CacheBuilder<S> {
    /// Append a tier. Tiers are read in the order they are added.
    pub fn tier(mut self, store: Arc<dyn Store>) -> Self {
        self.tiers.push(store);
        self
    }

    /// Append several tiers, skipping `None` so the list can be assembled
    /// conditionally.
    pub fn tiers(mut self, stores: impl IntoIterator<Item = Option<Arc<dyn Store>>>) -> Self {
        self.tiers.extend(stores.into_iter().flatten());
        self
    }

    /// Use a different value serializer.
    pub fn serializer<T: Serializer>(self, serializer: T) -> CacheBuilder<T> {
        CacheBuilder {
            tiers: self.tiers,
            serializer,
            compressor: self.compressor,
            default_ttl: self.default_ttl,
            locks: self.locks,
            defer: self.defer,
        }
    }

    pub fn compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    /// Use a built-in compressor. `level` of `None` keeps its default.
    pub fn compression(self, kind: CompressionKind, level: Option<i32>) -> Self {
        self.compressor(kind.compressor(level))
    }

    /// TTL in seconds for writes with `Ttl::Default`. 0 never expires.
    pub fn default_ttl(mut self, secs: u64) -> Self {
        self.default_ttl = secs;
        self
    }

    pub fn lock_provider(mut self, locks: Arc<dyn LockProvider>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Hook used by `RevalidateMode::Defer`.
    pub fn defer_hook(mut self, hook: Arc<dyn DeferHook>) -> Self {
        self.defer = Some(hook);
        self
    }

    /// Build the cache. Fails if no tier was added.
    pub fn build(self) -> Result<SwrCache<S>, CacheError> {
        let codec = Arc::new(RecordCodec::new(self.serializer, self.compressor));
        let tiers = TieredStore::new(self.tiers, codec)?;
        let locks = self
            .locks
            .unwrap_or_else(|| Arc::new(MemoryLockProvider::new()));

        Ok(SwrCache::new(tiers, locks, self.defer, self.default_ttl))
    }
}

async fn connect(driver: Driver, config: &CacheConfig) -> Result<Arc<dyn Store>, CacheError> {
    let store: Arc<dyn Store> = match driver {
        Driver::Memory => Arc::new(HashMapStore::new(HashMapStoreConfig {
            evict_on_set: config.memory.max_items.map(|max_items| EvictOnSetConfig {
                frequency: config.memory.evict_frequency,
                max_items,
            }),
        })),
        Driver::Moka => Arc::new(MokaStore::new(MokaStoreConfig {
            max_capacity: config.moka.max_capacity,
            time_to_idle: config.moka.time_to_idle.map(Duration::from_secs),
        })),
        Driver::Redis => Arc::new(
            RedisStore::new(RedisStoreConfig {
                url: config.redis.url.clone(),
                prefix: config.redis.prefix.clone(),
            })
            .await?,
        ),
        Driver::File => Arc::new(
            FileStore::new(FileStoreConfig {
                path: config.file.path.clone(),
                extension: config.file.extension.clone(),
                shards: config.file.shards,
            })
            .await?,
        ),
        #[cfg(feature = "sqlite")]
        Driver::Sqlite => {
            use crate::stores::sqlite::{SqliteStore, SqliteStoreConfig};

            Arc::new(
                SqliteStore::new(SqliteStoreConfig {
                    url: config.sqlite.url.clone(),
                    table: config.sqlite.table.clone(),
                    max_connections: config.sqlite.max_connections,
                    auto_create: true,
                })
                .await?,
            )
        }
        #[cfg(not(feature = "sqlite"))]
        Driver::Sqlite => {
            return Err(CacheError::Config(
                "the sqlite driver requires the `sqlite` feature".to_string(),
            ));
        }
    };

    tracing::debug!(driver = %driver, "Cache tier ready");
    Ok(store)
}
