//! Versioned binary envelope around a cached record.
//!
//! Wire layout:
//!
//! ```text
//! MAGIC (4) | FLAG (1) | NAMELEN (1) | NAME (NAMELEN) | PAYLOAD (rest)
//! ```
//!
//! `FLAG` is 0 for none, 1 for gzip and 2 for zstd. `NAME` is the serializer
//! name. `PAYLOAD` is the bincode-encoded record tuple, compressed when the
//! flag says so.
//!
//! Decoding is total: any malformed input yields `None` and is logged, never
//! an error. Corruption is data.

pub mod compressor;
pub mod serializer;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::CacheError;
use crate::record::{Lifetime, RawRecord, Record};
use compressor::{CompressionKind, Compressor, NoneCompressor};
use serializer::{Serializer, SerializerKind, bincode_config};

/// Framing version tag.
pub const MAGIC: &[u8; 4] = b"EC02";

/// Smallest structurally valid envelope: magic, flag and an empty name.
pub const HEADER_LEN: usize = 6;

const MAX_NAME_LEN: usize = u8::MAX as usize;

/// The inner tuple carried in the payload.
#[derive(Serialize, Deserialize)]
struct RecordTuple {
    e: u64,
    swr: u64,
    sei: u64,
    v: Vec<u8>,
    sn: String,
}

/// Encodes values into envelopes and decodes them back.
pub struct RecordCodec<S = SerializerKind> {
    serializer: S,
    compressor: Arc<dyn Compressor>,
}

impl<S: Serializer> RecordCodec<S> {
    pub fn new(serializer: S, compressor: Arc<dyn Compressor>) -> Self {
        RecordCodec {
            serializer,
            compressor,
        }
    }

    /// Codec without compression.
    pub fn uncompressed(serializer: S) -> Self {
        RecordCodec::new(serializer, Arc::new(NoneCompressor))
    }

    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    pub fn compressor(&self) -> &Arc<dyn Compressor> {
        &self.compressor
    }

    /// Serialize `value` and frame it with its lifetime.
    pub fn encode<V>(&self, value: &V, lifetime: Lifetime) -> Result<Vec<u8>, CacheError>
    where
        V: Serialize + ?Sized,
    {
        let bytes = self
            .serializer
            .serialize(value)
            .map_err(|e| CacheError::Encoding(e.to_string()))?;

        self.encode_raw(&RawRecord {
            value: bytes,
            lifetime,
            serializer_tag: self.serializer.name().to_string(),
        })
    }

    /// Frame an already-serialized record, keeping its serializer tag.
    pub fn encode_raw(&self, record: &RawRecord) -> Result<Vec<u8>, CacheError> {
        let name = record.serializer_tag.as_bytes();
        if name.len() > MAX_NAME_LEN {
            return Err(CacheError::Encoding(format!(
                "serializer name too long ({} bytes, max {})",
                name.len(),
                MAX_NAME_LEN
            )));
        }

        let tuple = RecordTuple {
            e: record.lifetime.expires_at,
            swr: record.lifetime.swr_window,
            sei: record.lifetime.stale_if_error_window,
            v: record.value.clone(),
            sn: record.serializer_tag.clone(),
        };
        let tuple = bincode::serde::encode_to_vec(&tuple, bincode_config())
            .map_err(|e| CacheError::Encoding(format!("record tuple: {}", e)))?;

        let kind = CompressionKind::from_name(self.compressor.name());
        let payload = match kind {
            CompressionKind::None => tuple,
            CompressionKind::Gzip | CompressionKind::Zstd => self
                .compressor
                .compress(&tuple)
                .map_err(|e| CacheError::Encoding(e.to_string()))?,
        };

        let mut out = Vec::with_capacity(HEADER_LEN + name.len() + payload.len());
        out.extend_from_slice(MAGIC);
        out.push(kind.flag());
        out.push(name.len() as u8);
        out.extend_from_slice(name);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decode an envelope and deserialize its value.
    pub fn decode<V>(&self, bytes: &[u8]) -> Option<Record<V>>
    where
        V: DeserializeOwned,
    {
        self.decode_raw(bytes)
            .and_then(|raw| self.deserialize_value(raw))
    }

    /// Decode an envelope, leaving the value serialized.
    pub fn decode_raw(&self, bytes: &[u8]) -> Option<RawRecord> {
        if bytes.len() < HEADER_LEN {
            tracing::warn!(len = bytes.len(), "Cache record too short");
            return None;
        }
        if &bytes[..4] != MAGIC {
            tracing::warn!("Cache record has unknown magic");
            return None;
        }

        let flag = bytes[4];
        let name_len = bytes[5] as usize;
        let offset = HEADER_LEN + name_len;
        if bytes.len() < offset {
            tracing::warn!(name_len, len = bytes.len(), "Cache record header truncated");
            return None;
        }
        let payload = &bytes[offset..];

        let Some(kind) = CompressionKind::from_flag(flag) else {
            tracing::warn!(flag, "Cache record has unknown compression flag");
            return None;
        };
        let tuple_bytes = match kind {
            CompressionKind::None => payload.to_vec(),
            _ => match self.decompressor_for(kind).decompress(payload) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(error = %e, "Decompression failed");
                    return None;
                }
            },
        };

        let tuple: RecordTuple =
            match bincode::serde::decode_from_slice(&tuple_bytes, bincode_config()) {
                Ok((tuple, read)) if read == tuple_bytes.len() => tuple,
                Ok(_) => {
                    tracing::warn!("Cache record tuple has trailing bytes");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to decode cache record tuple");
                    return None;
                }
            };

        Some(RawRecord {
            value: tuple.v,
            lifetime: Lifetime {
                expires_at: tuple.e,
                swr_window: tuple.swr,
                stale_if_error_window: tuple.sei,
            },
            serializer_tag: tuple.sn,
        })
    }

    /// Deserialize the value of a raw record with the active serializer.
    ///
    /// A differing serializer tag is attempted anyway; failure means absence.
    pub fn deserialize_value<V>(&self, raw: RawRecord) -> Option<Record<V>>
    where
        V: DeserializeOwned,
    {
        if raw.serializer_tag != self.serializer.name() {
            tracing::info!(
                stored = %raw.serializer_tag,
                current = %self.serializer.name(),
                "Serializer mismatch"
            );
        }

        match self.serializer.deserialize(&raw.value) {
            Ok(value) => Some(Record {
                value,
                lifetime: raw.lifetime,
                serializer_tag: raw.serializer_tag,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Deserialization failed");
                None
            }
        }
    }

    fn decompressor_for(&self, kind: CompressionKind) -> Arc<dyn Compressor> {
        if CompressionKind::from_name(self.compressor.name()) == kind {
            self.compressor.clone()
        } else {
            kind.compressor(None)
        }
    }
}
