use futures::future::join_all;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::codec::RecordCodec;
use crate::codec::serializer::{Serializer, SerializerKind};
use crate::error::CacheError;
use crate::record::{Lifetime, RawRecord, Record, Staleness};
use crate::store::Store;

/// A usable record found by [`TieredStore::read_through`].
#[derive(Debug, Clone, PartialEq)]
pub struct Hit<V> {
    pub value: V,
    pub lifetime: Lifetime,
    pub staleness: Staleness,
    /// Index of the tier the record was read from.
    pub tier: usize,
}

/// TieredStore reads and writes an ordered list of stores.
///
/// Index 0 is the primary (fastest) tier. Reads stop at the first tier
/// holding a decodable record and repopulate every faster tier in front of
/// it. Writes, deletes, clears and prunes fan out to every tier concurrently;
/// a failing tier is logged and never stops the others.
pub struct TieredStore<S = SerializerKind> {
    tiers: Vec<Arc<dyn Store>>,
    codec: Arc<RecordCodec<S>>,
}

impl<S: Serializer> TieredStore<S> {
    /// Create a tiered store. At least one tier is required.
    ///
    /// # Example
    /// ```ignore
    /// TieredStore::new(
    ///     vec![Arc::new(memory_store), Arc::new(redis_store)],
    ///     Arc::new(RecordCodec::uncompressed(SerializerKind::Json)),
    /// )?
    /// ```
    pub fn new(tiers: Vec<Arc<dyn Store>>, codec: Arc<RecordCodec<S>>) -> Result<Self, CacheError> {
        if tiers.is_empty() {
            return Err(CacheError::Config(
                "at least one storage tier is required".to_string(),
            ));
        }
        Ok(TieredStore { tiers, codec })
    }

    pub fn tiers(&self) -> &[Arc<dyn Store>] {
        &self.tiers
    }

    pub fn codec(&self) -> &Arc<RecordCodec<S>> {
        &self.codec
    }

    /// Scan the tiers for `key` and return the first usable record.
    ///
    /// Undecodable bytes and failing tiers are skipped. An expired record is
    /// a miss unless `allow_stale` is set and one of its grace windows is
    /// still open. With `backfill`, a hit from tier `i > 0` is re-encoded
    /// and written to tiers `0..i` with the record's visible TTL.
    pub async fn read_through<V>(
        &self,
        key: &str,
        now: u64,
        allow_stale: bool,
        backfill: bool,
    ) -> Option<Hit<V>>
    where
        V: DeserializeOwned,
    {
        let (index, record, raw) = self.find(key, backfill).await?;

        let staleness = record.lifetime.classify(now);
        if staleness.expired && !(allow_stale && staleness.is_servable_stale()) {
            tracing::trace!(key = %key, tier = index, "Record expired");
            return None;
        }

        if let Some(raw) = raw {
            self.backfill(key, index, &raw, now).await;
        }

        Some(Hit {
            value: record.value,
            lifetime: record.lifetime,
            staleness,
            tier: index,
        })
    }

    /// Whether any tier holds an unexpired, decodable record for `key`.
    ///
    /// The value is never deserialized and nothing is backfilled.
    pub async fn has(&self, key: &str, now: u64) -> bool {
        for (index, tier) in self.tiers.iter().enumerate() {
            let Some(bytes) = self.fetch(tier, index, key).await else {
                continue;
            };
            if let Some(raw) = self.codec.decode_raw(&bytes) {
                return !raw.lifetime.classify(now).expired;
            }
        }
        false
    }

    /// First tier holding a fully decodable record. The raw record is kept
    /// when it will be needed for backfill.
    async fn find<V>(
        &self,
        key: &str,
        keep_raw: bool,
    ) -> Option<(usize, Record<V>, Option<RawRecord>)>
    where
        V: DeserializeOwned,
    {
        for (index, tier) in self.tiers.iter().enumerate() {
            let Some(bytes) = self.fetch(tier, index, key).await else {
                continue;
            };
            let Some(raw) = self.codec.decode_raw(&bytes) else {
                tracing::warn!(key = %key, tier = tier.name(), "Skipping undecodable record");
                continue;
            };

            let kept = (keep_raw && index > 0).then(|| raw.clone());
            match self.codec.deserialize_value(raw) {
                Some(record) => return Some((index, record, kept)),
                None => {
                    tracing::warn!(key = %key, tier = tier.name(), "Skipping undecodable value");
                }
            }
        }
        None
    }

    async fn fetch(&self, tier: &Arc<dyn Store>, index: usize, key: &str) -> Option<Vec<u8>> {
        match tier.get(key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %key, tier = tier.name(), index, error = %e, "Tier read failed");
                None
            }
        }
    }

    async fn backfill(&self, key: &str, hit: usize, raw: &RawRecord, now: u64) {
        let payload = match self.codec.encode_raw(raw) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Backfill encode failed");
                return;
            }
        };
        let ttl = raw.lifetime.visible_ttl(now);

        let writes = self.tiers[..hit].iter().map(|tier| {
            let payload = &payload;
            async move { (tier.name(), tier.set(key, payload, ttl).await) }
        });

        for (tier, result) in join_all(writes).await {
            match result {
                Ok(()) => tracing::debug!(key = %key, tier, ttl, "Backfilled faster tier"),
                Err(e) => tracing::warn!(key = %key, tier, error = %e, "Backfill failed"),
            }
        }
    }

    /// Write `payload` to every tier. True only if every tier accepted it.
    pub async fn write_all_tiers(&self, key: &str, payload: &[u8], ttl: u64) -> bool {
        let writes = self
            .tiers
            .iter()
            .map(|tier| async move { (tier.name(), tier.set(key, payload, ttl).await) });

        Self::all_ok(key, "write", join_all(writes).await)
    }

    /// Delete `key` from every tier.
    pub async fn delete(&self, key: &str) -> bool {
        let deletes = self
            .tiers
            .iter()
            .map(|tier| async move { (tier.name(), tier.delete(key).await) });

        Self::all_ok(key, "delete", join_all(deletes).await)
    }

    /// Clear every tier.
    pub async fn clear(&self) -> bool {
        let clears = self
            .tiers
            .iter()
            .map(|tier| async move { (tier.name(), tier.clear().await) });

        Self::all_ok("*", "clear", join_all(clears).await)
    }

    /// Prune expired entries from every tier, returning the total removed.
    /// A failing tier contributes 0.
    pub async fn prune(&self) -> u64 {
        let prunes = self
            .tiers
            .iter()
            .map(|tier| async move { (tier.name(), tier.prune().await) });

        let mut removed = 0;
        for (tier, result) in join_all(prunes).await {
            match result {
                Ok(count) => removed += count,
                Err(e) => tracing::warn!(tier, error = %e, "Tier prune failed"),
            }
        }
        removed
    }

    fn all_ok(key: &str, operation: &str, results: Vec<(&'static str, Result<(), CacheError>)>) -> bool {
        let mut ok = true;
        for (tier, result) in results {
            if let Err(e) = result {
                tracing::warn!(key = %key, tier, operation, error = %e, "Tier operation failed");
                ok = false;
            }
        }
        ok
    }
}
