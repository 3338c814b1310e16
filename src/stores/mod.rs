//! Store implementations for the cache tiers.

pub mod file;
pub mod memory;
pub mod metrics;
pub mod moka;
pub mod redis;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file::{FileStore, FileStoreConfig};
pub use memory::{EvictOnSetConfig, HashMapStore, HashMapStoreConfig};
pub use metrics::{CacheMetric, MetricsSink, MetricsStore};
pub use moka::{MokaStore, MokaStoreConfig};
pub use redis::{RedisStore, RedisStoreConfig};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteStore, SqliteStoreConfig};
