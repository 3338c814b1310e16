//! tiered-swr - A multi-tier stale-while-revalidate (SWR) cache for Rust
//!
//! This library provides a read-through/write-through cache over an ordered
//! list of storage tiers with:
//! - Stale-while-revalidate and stale-if-error windows
//! - Backfill of faster tiers on read
//! - Per-key locks so a miss runs its producer once, across processes with
//!   file locks
//! - A versioned binary record envelope with optional gzip or zstd compression
//!
//! # Example
//!
//! ```ignore
//! use tiered_swr::{CacheBuilder, HashMapStore, SwrOptions, Ttl};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tiered_swr::CacheError> {
//!     let cache = CacheBuilder::new()
//!         .tier(Arc::new(HashMapStore::default()))
//!         .build()?;
//!
//!     cache.set("user.123", "alice", Ttl::Seconds(60)).await?;
//!
//!     // Fresh for 60s, then served stale for up to 5 minutes while one
//!     // caller refreshes it.
//!     let stats: u64 = cache
//!         .get_or_set_swr("stats.daily", &SwrOptions::new(Ttl::Seconds(60), 300, 0), || async {
//!             Ok::<_, std::io::Error>(42)
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

mod builder;
pub mod codec;
pub mod config;
mod error;
mod key;
pub mod lock;
mod record;
mod store;
pub mod stores;
mod swr;
mod tiered;
mod utils;

// Re-export public API
pub use builder::CacheBuilder;
pub use codec::RecordCodec;
pub use codec::compressor::{
    CompressionKind, Compressor, GzipCompressor, NoneCompressor, ZstdCompressor,
};
pub use codec::serializer::{BincodeSerializer, JsonSerializer, Serializer, SerializerKind};
pub use config::{CacheConfig, Driver};
pub use error::{BoxError, CacheError};
pub use key::{MAX_KEY_LEN, validate_key};
pub use lock::{FileLockProvider, KeyLock, LockProvider, MemoryLockProvider};
pub use record::{Lifetime, RawRecord, Record, Staleness};
pub use store::Store;
pub use stores::file::{FileStore, FileStoreConfig};
pub use stores::memory::{EvictOnSetConfig, HashMapStore, HashMapStoreConfig};
pub use stores::metrics::{CacheMetric, MetricsSink, MetricsStore};
pub use stores::moka::{MokaStore, MokaStoreConfig};
pub use stores::redis::{RedisStore, RedisStoreConfig};
#[cfg(feature = "sqlite")]
pub use stores::sqlite::{SqliteStore, SqliteStoreConfig};
pub use swr::{DeferHook, RevalidateMode, SwrCache, SwrOptions, TokioDefer, Ttl};
pub use tiered::{Hit, TieredStore};
pub use utils::now_secs;
