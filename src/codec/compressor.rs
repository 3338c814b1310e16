//! Byte compressors applied to the record payload.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::CacheError;

/// Compresses and decompresses record payloads.
pub trait Compressor: Send + Sync {
    /// `"none"`, `"gzip"` and `"zstd"` select the matching envelope flag.
    /// Any other name is framed as uncompressed.
    fn name(&self) -> &str;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError>;

    /// Must fail on malformed input.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError>;
}

/// Pass-through compressor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneCompressor;

impl Compressor for NoneCompressor {
    fn name(&self) -> &str {
        "none"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError> {
        Ok(data.to_vec())
    }
}

/// gzip via `flate2`.
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: u32,
}

impl GzipCompressor {
    /// Level is clamped to 0..=9.
    pub fn new(level: u32) -> Self {
        GzipCompressor {
            level: level.min(9),
        }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        GzipCompressor::new(3)
    }
}

impl Compressor for GzipCompressor {
    fn name(&self) -> &str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(data)
            .map_err(|e| CacheError::Encoding(format!("gzip compression failed: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| CacheError::Encoding(format!("gzip compression failed: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError> {
        let mut out = Vec::new();
        GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CacheError::Serialization(format!("gzip decompression failed: {}", e)))?;
        Ok(out)
    }
}

/// zstd via the `zstd` crate.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    pub fn new(level: i32) -> Self {
        ZstdCompressor { level }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        ZstdCompressor::new(3)
    }
}

impl Compressor for ZstdCompressor {
    fn name(&self) -> &str {
        "zstd"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError> {
        zstd::stream::encode_all(data, self.level)
            .map_err(|e| CacheError::Encoding(format!("zstd compression failed: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError> {
        zstd::stream::decode_all(data)
            .map_err(|e| CacheError::Serialization(format!("zstd decompression failed: {}", e)))
    }
}

/// Compression scheme, as written into the envelope FLAG byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    None,
    Gzip,
    Zstd,
}

impl CompressionKind {
    pub fn flag(self) -> u8 {
        match self {
            CompressionKind::None => 0,
            CompressionKind::Gzip => 1,
            CompressionKind::Zstd => 2,
        }
    }

    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0 => Some(CompressionKind::None),
            1 => Some(CompressionKind::Gzip),
            2 => Some(CompressionKind::Zstd),
            _ => None,
        }
    }

    /// Maps a compressor name onto its flag; unknown names frame as `None`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "gzip" => CompressionKind::Gzip,
            "zstd" => CompressionKind::Zstd,
            _ => CompressionKind::None,
        }
    }

    /// Built-in compressor for this scheme.
    pub fn compressor(self, level: Option<i32>) -> Arc<dyn Compressor> {
        match self {
            CompressionKind::None => Arc::new(NoneCompressor),
            CompressionKind::Gzip => Arc::new(
                level
                    .map(|l| GzipCompressor::new(l.max(0) as u32))
                    .unwrap_or_default(),
            ),
            CompressionKind::Zstd => {
                Arc::new(level.map(ZstdCompressor::new).unwrap_or_default())
            }
        }
    }
}

impl FromStr for CompressionKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(CompressionKind::None),
            "gzip" => Ok(CompressionKind::Gzip),
            "zstd" => Ok(CompressionKind::Zstd),
            other => Err(CacheError::Config(format!("unknown compressor '{}'", other))),
        }
    }
}
