//! Value serializers.
//!
//! The serializer turns a caller's value into the opaque bytes stored inside a
//! record. Its `name()` is written into every envelope so readers can detect
//! records produced by a different serializer.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CacheError;

/// Upper bound on a single bincode decode, guards against corrupt length prefixes.
pub(crate) const BINCODE_LIMIT: usize = 256 * 1024 * 1024;

pub(crate) fn bincode_config() -> impl bincode::config::Config {
    bincode::config::standard().with_limit::<BINCODE_LIMIT>()
}

/// Turns values into bytes and back.
pub trait Serializer: Send + Sync + 'static {
    /// Stable identifier stored in the envelope.
    fn name(&self) -> &str;

    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, CacheError>
    where
        T: Serialize + ?Sized;

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T, CacheError>
    where
        T: DeserializeOwned;
}

/// Text-based serializer backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &str {
        "json"
    }

    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, CacheError>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_vec(value)
            .map_err(|e| CacheError::Serialization(format!("Serialization failed: {}", e)))
    }

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T, CacheError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(bytes)
            .map_err(|e| CacheError::Serialization(format!("Deserialization failed: {}", e)))
    }
}

/// Compact binary serializer backed by `bincode` in serde mode.
///
/// bincode is not self-describing: the reader must ask for exactly the type
/// that was written.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn name(&self) -> &str {
        "bincode"
    }

    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, CacheError>
    where
        T: Serialize + ?Sized,
    {
        bincode::serde::encode_to_vec(value, bincode_config())
            .map_err(|e| CacheError::Serialization(format!("Serialization failed: {}", e)))
    }

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T, CacheError>
    where
        T: DeserializeOwned,
    {
        let (value, read) = bincode::serde::decode_from_slice(bytes, bincode_config())
            .map_err(|e| CacheError::Serialization(format!("Deserialization failed: {}", e)))?;
        if read != bytes.len() {
            return Err(CacheError::Serialization(format!(
                "Deserialization failed: {} trailing bytes",
                bytes.len() - read
            )));
        }
        Ok(value)
    }
}

/// Serializer chosen at runtime, e.g. from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    #[default]
    Json,
    Bincode,
}

impl Serializer for SerializerKind {
    fn name(&self) -> &str {
        match self {
            SerializerKind::Json => JsonSerializer.name(),
            SerializerKind::Bincode => BincodeSerializer.name(),
        }
    }

    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, CacheError>
    where
        T: Serialize + ?Sized,
    {
        match self {
            SerializerKind::Json => JsonSerializer.serialize(value),
            SerializerKind::Bincode => BincodeSerializer.serialize(value),
        }
    }

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T, CacheError>
    where
        T: DeserializeOwned,
    {
        match self {
            SerializerKind::Json => JsonSerializer.deserialize(bytes),
            SerializerKind::Bincode => BincodeSerializer.deserialize(bytes),
        }
    }
}

impl FromStr for SerializerKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(SerializerKind::Json),
            "bincode" | "native" => Ok(SerializerKind::Bincode),
            other => Err(CacheError::Config(format!("unknown serializer '{}'", other))),
        }
    }
}

impl fmt::Display for SerializerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
