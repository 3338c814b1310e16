//! Cache configuration.
//!
//! Everything the cache needs at construction lives in [`CacheConfig`]:
//! defaults, lock directory, codec choice and the ordered tier list with one
//! section per backend. It deserializes from any serde format and can be
//! overlaid with `EASYCACHE_*` environment variables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::codec::compressor::CompressionKind;
use crate::codec::serializer::SerializerKind;
use crate::error::CacheError;

/// A storage backend that can appear in the tier list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Memory,
    Moka,
    Redis,
    File,
    Sqlite,
}

impl FromStr for Driver {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "hashmap" => Ok(Driver::Memory),
            "moka" => Ok(Driver::Moka),
            "redis" => Ok(Driver::Redis),
            "file" => Ok(Driver::File),
            "sqlite" => Ok(Driver::Sqlite),
            other => Err(CacheError::Config(format!("unknown cache driver '{}'", other))),
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Driver::Memory => "memory",
            Driver::Moka => "moka",
            Driver::Redis => "redis",
            Driver::File => "file",
            Driver::Sqlite => "sqlite",
        };
        f.write_str(name)
    }
}

/// `HashMapStore` settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// Evict down to this many entries on set. `None` disables eviction.
    pub max_items: Option<usize>,
    /// Probability of running eviction on a set.
    pub evict_frequency: f64,
}

impl Default for MemorySection {
    fn default() -> Self {
        MemorySection {
            max_items: None,
            evict_frequency: 1.0,
        }
    }
}

/// `MokaStore` settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MokaSection {
    pub max_capacity: u64,
    /// Idle expiry in seconds.
    pub time_to_idle: Option<u64>,
}

impl Default for MokaSection {
    fn default() -> Self {
        MokaSection {
            max_capacity: 10_000,
            time_to_idle: None,
        }
    }
}

/// `RedisStore` settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSection {
    pub url: String,
    pub prefix: String,
}

impl Default for RedisSection {
    fn default() -> Self {
        RedisSection {
            url: "redis://127.0.0.1:6379".to_string(),
            prefix: "ec:".to_string(),
        }
    }
}

/// `FileStore` settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSection {
    pub path: PathBuf,
    pub extension: String,
    pub shards: usize,
}

impl Default for FileSection {
    fn default() -> Self {
        FileSection {
            path: std::env::temp_dir().join("ec-cache"),
            extension: ".cache".to_string(),
            shards: 2,
        }
    }
}

/// `SqliteStore` settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteSection {
    pub url: String,
    pub table: String,
    pub max_connections: u32,
}

impl Default for SqliteSection {
    fn default() -> Self {
        SqliteSection {
            url: "sqlite::memory:".to_string(),
            table: "easycache".to_string(),
            max_connections: 1,
        }
    }
}

/// Top-level cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL in seconds for writes without an explicit one. 0 never expires.
    pub default_ttl: u64,
    /// Directory holding the per-key lock files.
    pub lock_path: PathBuf,
    /// Upper bound in seconds on waiting for a contended lock. `None` waits
    /// forever.
    pub lock_timeout: Option<u64>,
    /// Tiers in priority order, fastest first.
    pub drivers: Vec<Driver>,
    pub serializer: SerializerKind,
    pub compressor: CompressionKind,
    /// Compressor level. `None` uses the compressor's default.
    pub compression_level: Option<i32>,
    pub memory: MemorySection,
    pub moka: MokaSection,
    pub redis: RedisSection,
    pub file: FileSection,
    pub sqlite: SqliteSection,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            default_ttl: 3600,
            lock_path: std::env::temp_dir().join("ec-locks"),
            lock_timeout: None,
            drivers: vec![Driver::Memory],
            serializer: SerializerKind::default(),
            compressor: CompressionKind::default(),
            compression_level: None,
            memory: MemorySection::default(),
            moka: MokaSection::default(),
            redis: RedisSection::default(),
            file: FileSection::default(),
            sqlite: SqliteSection::default(),
        }
    }
}

impl CacheConfig {
    /// Defaults overlaid with environment variables.
    ///
    /// # Environment Variables
    /// - `EASYCACHE_DEFAULT_TTL`: default TTL in seconds (default: 3600)
    /// - `EASYCACHE_LOCK_PATH`: lock directory (default: `<tmp>/ec-locks`)
    /// - `EASYCACHE_LOCK_TIMEOUT`: lock wait bound in seconds (default: unbounded)
    /// - `EASYCACHE_DRIVERS`: comma separated tier list (default: `memory`)
    /// - `EASYCACHE_SERIALIZER`: `json` or `bincode` (default: `json`)
    /// - `EASYCACHE_COMPRESSOR`: `none`, `gzip` or `zstd` (default: `none`)
    /// - `EASYCACHE_COMPRESSION_LEVEL`: compressor level
    /// - `EASYCACHE_REDIS_URL`, `EASYCACHE_REDIS_PREFIX`
    /// - `EASYCACHE_FILE_PATH`
    /// - `EASYCACHE_SQLITE_URL`
    ///
    /// Malformed values are a [`CacheError::Config`].
    pub fn from_env() -> Result<Self, CacheError> {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    /// Overlay variables from `lookup` onto `self`.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, CacheError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(ttl) = var("EASYCACHE_DEFAULT_TTL") {
            self.default_ttl = parse("EASYCACHE_DEFAULT_TTL", &ttl)?;
        }
        if let Some(path) = var("EASYCACHE_LOCK_PATH") {
            self.lock_path = PathBuf::from(path);
        }
        if let Some(timeout) = var("EASYCACHE_LOCK_TIMEOUT") {
            self.lock_timeout = Some(parse("EASYCACHE_LOCK_TIMEOUT", &timeout)?);
        }
        if let Some(drivers) = var("EASYCACHE_DRIVERS") {
            self.drivers = drivers
                .split(',')
                .filter(|name| !name.trim().is_empty())
                .map(str::parse)
                .collect::<Result<_, _>>()?;
        }
        if let Some(serializer) = var("EASYCACHE_SERIALIZER") {
            self.serializer = serializer.parse()?;
        }
        if let Some(compressor) = var("EASYCACHE_COMPRESSOR") {
            self.compressor = compressor.parse()?;
        }
        if let Some(level) = var("EASYCACHE_COMPRESSION_LEVEL") {
            self.compression_level = Some(parse("EASYCACHE_COMPRESSION_LEVEL", &level)?);
        }
        if let Some(url) = var("EASYCACHE_REDIS_URL") {
            self.redis.url = url;
        }
        if let Some(prefix) = var("EASYCACHE_REDIS_PREFIX") {
            self.redis.prefix = prefix;
        }
        if let Some(path) = var("EASYCACHE_FILE_PATH") {
            self.file.path = PathBuf::from(path);
        }
        if let Some(url) = var("EASYCACHE_SQLITE_URL") {
            self.sqlite.url = url;
        }

        Ok(self)
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout.map(Duration::from_secs)
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, CacheError> {
    value
        .trim()
        .parse()
        .map_err(|_| CacheError::Config(format!("{} has an invalid value '{}'", name, value)))
}
