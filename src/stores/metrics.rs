//! Metrics middleware for cache stores.
//!
//! `MetricsStore` wraps any tier and reports every operation to a
//! user-provided sink. Results pass through untouched.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tiered_swr::{CacheBuilder, MetricsStore, MokaStore, MokaStoreConfig, Store};
//!
//! let sink = Arc::new(MyMetricsSink::new());
//! let moka = Arc::new(MokaStore::new(MokaStoreConfig::default()));
//! let tier: Arc<dyn Store> = Arc::new(MetricsStore::new(moka, sink.clone()));
//!
//! let cache = CacheBuilder::new().tier(tier).build()?;
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use crate::error::CacheError;
use crate::store::Store;

/// Metrics emitted by the MetricsStore wrapper.
#[derive(Debug, Clone)]
pub enum CacheMetric {
    /// Emitted on every read (get or has).
    Read {
        /// The cache key that was read.
        key: String,
        /// Whether the tier had the key. Errors count as misses.
        hit: bool,
        /// Latency of the operation in milliseconds.
        latency_ms: f64,
        /// Name of the store tier (from Store::name()).
        tier: String,
    },
    /// Emitted on every write.
    Write {
        key: String,
        /// Payload size in bytes.
        bytes: usize,
        /// Whether the tier accepted the write.
        ok: bool,
        latency_ms: f64,
        tier: String,
    },
    /// Emitted on every single-key delete.
    Delete {
        key: String,
        latency_ms: f64,
        tier: String,
    },
    /// Emitted on `clear` and `prune`.
    Maintenance {
        /// `"clear"` or `"prune"`.
        operation: &'static str,
        /// Entries removed by `prune`, 0 for `clear`.
        removed: u64,
        latency_ms: f64,
        tier: String,
    },
}

/// Trait for receiving cache metrics.
///
/// # Example
///
/// ```ignore
/// use std::sync::Mutex;
/// use async_trait::async_trait;
/// use tiered_swr::{CacheMetric, MetricsSink};
///
/// struct BufferedSink {
///     buffer: Mutex<Vec<CacheMetric>>,
/// }
///
/// #[async_trait]
/// impl MetricsSink for BufferedSink {
///     fn emit(&self, metric: CacheMetric) {
///         self.buffer.lock().unwrap().push(metric);
///     }
///
///     async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Emit a single metric.
    ///
    /// Called synchronously on the hot path, so keep it cheap (buffer in
    /// memory and ship on `flush`).
    fn emit(&self, metric: CacheMetric);

    /// Flush any buffered metrics.
    async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// A store wrapper that emits metrics for all operations.
pub struct MetricsStore {
    inner: Arc<dyn Store>,
    sink: Arc<dyn MetricsSink>,
    tier_name: String,
}

impl MetricsStore {
    /// Wrap `inner`, reporting to `sink` under the inner tier's name.
    pub fn new(inner: Arc<dyn Store>, sink: Arc<dyn MetricsSink>) -> Self {
        let tier_name = inner.name().to_string();
        MetricsStore {
            inner,
            sink,
            tier_name,
        }
    }

    /// Get a reference to the metrics sink.
    pub fn sink(&self) -> &Arc<dyn MetricsSink> {
        &self.sink
    }

    fn elapsed_ms(start: Instant) -> f64 {
        start.elapsed().as_secs_f64() * 1000.0
    }

    fn read(&self, key: &str, hit: bool, start: Instant) {
        self.sink.emit(CacheMetric::Read {
            key: key.to_string(),
            hit,
            latency_ms: Self::elapsed_ms(start),
            tier: self.tier_name.clone(),
        });
    }
}

#[async_trait]
impl Store for MetricsStore {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let start = Instant::now();
        let result = self.inner.get(key).await;
        self.read(key, matches!(result, Ok(Some(_))), start);
        result
    }

    async fn set(&self, key: &str, payload: &[u8], ttl: u64) -> Result<(), CacheError> {
        let start = Instant::now();
        let result = self.inner.set(key, payload, ttl).await;

        self.sink.emit(CacheMetric::Write {
            key: key.to_string(),
            bytes: payload.len(),
            ok: result.is_ok(),
            latency_ms: Self::elapsed_ms(start),
            tier: self.tier_name.clone(),
        });

        result
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let start = Instant::now();
        let result = self.inner.delete(key).await;

        self.sink.emit(CacheMetric::Delete {
            key: key.to_string(),
            latency_ms: Self::elapsed_ms(start),
            tier: self.tier_name.clone(),
        });

        result
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let start = Instant::now();
        let result = self.inner.has(key).await;
        self.read(key, matches!(result, Ok(true)), start);
        result
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let start = Instant::now();
        let result = self.inner.clear().await;

        self.sink.emit(CacheMetric::Maintenance {
            operation: "clear",
            removed: 0,
            latency_ms: Self::elapsed_ms(start),
            tier: self.tier_name.clone(),
        });

        result
    }

    async fn prune(&self) -> Result<u64, CacheError> {
        let start = Instant::now();
        let result = self.inner.prune().await;

        self.sink.emit(CacheMetric::Maintenance {
            operation: "prune",
            removed: *result.as_ref().unwrap_or(&0),
            latency_ms: Self::elapsed_ms(start),
            tier: self.tier_name.clone(),
        });

        result
    }
}
