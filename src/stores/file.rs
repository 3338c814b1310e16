//! Local filesystem store.
//!
//! Each key maps to one file under an md5-sharded directory tree. A file is an
//! 8-byte big-endian expiry (unix seconds, 0 for never) followed by the
//! payload. Writes go to a temp file first and are renamed into place, so
//! readers never observe a partial file.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;

use crate::error::CacheError;
use crate::store::Store;
use crate::utils::{key_hash, now_secs};

const EXPIRY_LEN: usize = 8;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Configuration for FileStore.
#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    /// Root directory, created if missing.
    pub path: PathBuf,

    /// File extension for cache files. `clear` only removes files ending in it.
    pub extension: String,

    /// Levels of two-hex-character subdirectories taken from the key hash (0 to 3).
    pub shards: usize,
}

impl FileStoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStoreConfig {
            path: path.into(),
            extension: ".cache".to_string(),
            shards: 2,
        }
    }
}

/// Filesystem-backed cache store.
pub struct FileStore {
    root: PathBuf,
    extension: String,
    shards: usize,
}

impl FileStore {
    /// Create the root directory and return the store.
    pub async fn new(config: FileStoreConfig) -> Result<Self, CacheError> {
        fs::create_dir_all(&config.path).await.map_err(|e| {
            CacheError::Config(format!(
                "unable to create cache directory {}: {}",
                config.path.display(),
                e
            ))
        })?;

        Ok(FileStore {
            root: config.path,
            extension: config.extension,
            shards: config.shards.min(3),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_for(&self, key: &str) -> PathBuf {
        let hash = key_hash(key);
        let mut path = self.root.clone();
        for i in 0..self.shards {
            path.push(&hash[i * 2..i * 2 + 2]);
        }
        path.push(format!("{}{}", hash, self.extension));
        path
    }

    fn io_error(key: &str, action: &str, path: &Path, e: std::io::Error) -> CacheError {
        CacheError::operation("file", key, format!("{} {} failed: {}", action, path.display(), e))
    }

    /// Read a cache file, returning its expiry and payload.
    async fn read_entry(path: &Path) -> std::io::Result<Option<(u64, Vec<u8>)>> {
        let mut raw = match fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if raw.len() < EXPIRY_LEN {
            return Ok(None);
        }
        let mut expiry = [0u8; EXPIRY_LEN];
        expiry.copy_from_slice(&raw[..EXPIRY_LEN]);
        let payload = raw.split_off(EXPIRY_LEN);
        Ok(Some((u64::from_be_bytes(expiry), payload)))
    }

    fn is_expired(expires: u64, now: u64) -> bool {
        expires != 0 && expires < now
    }

    /// Delete `path` if it still holds an expired entry. A concurrent `set`
    /// may have renamed a fresh file into place since it was read.
    async fn remove_if_expired(path: &Path) {
        match Self::read_entry(path).await {
            Ok(Some((expires, _))) if Self::is_expired(expires, now_secs()) => {}
            _ => return,
        }
        if let Err(e) = Self::remove_file(path).await {
            tracing::debug!(path = %path.display(), error = %e, "Failed to remove expired cache file");
        }
    }

    async fn remove_file(path: &Path) -> std::io::Result<()> {
        match fs::remove_file(path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Every file under the root carrying our extension.
    async fn cache_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut dirs = vec![self.root.clone()];

        while let Some(dir) = dirs.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    dirs.push(path);
                } else if self.extension.is_empty()
                    || path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(&self.extension))
                {
                    files.push(path);
                }
            }
        }

        Ok(files)
    }
}

#[async_trait]
impl Store for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.file_for(key);
        let entry = Self::read_entry(&path)
            .await
            .map_err(|e| Self::io_error(key, "read", &path, e))?;

        match entry {
            Some((expires, _)) if Self::is_expired(expires, now_secs()) => {
                Self::remove_if_expired(&path).await;
                Ok(None)
            }
            Some((_, payload)) => Ok(Some(payload)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, payload: &[u8], ttl: u64) -> Result<(), CacheError> {
        let path = self.file_for(key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| Self::io_error(key, "mkdir", dir, e))?;
        }

        let expires = if ttl == 0 { 0 } else { now_secs().saturating_add(ttl) };
        let mut contents = Vec::with_capacity(EXPIRY_LEN + payload.len());
        contents.extend_from_slice(&expires.to_be_bytes());
        contents.extend_from_slice(payload);

        let tmp = path.with_extension(format!(
            "tmp.{}.{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        if let Err(e) = fs::write(&tmp, &contents).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Self::io_error(key, "write", &tmp, e));
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Self::io_error(key, "rename", &path, e));
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let path = self.file_for(key);
        Self::remove_file(&path)
            .await
            .map_err(|e| Self::io_error(key, "delete", &path, e))
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let files = self
            .cache_files()
            .await
            .map_err(|e| Self::io_error("*", "scan", &self.root, e))?;

        let mut failed = 0usize;
        for file in &files {
            if let Err(e) = Self::remove_file(file).await {
                tracing::warn!(path = %file.display(), error = %e, "Failed to delete cache file");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(CacheError::operation(
                "file",
                "*",
                format!("failed to delete {} of {} cache files", failed, files.len()),
            ));
        }
        Ok(())
    }

    async fn prune(&self) -> Result<u64, CacheError> {
        let files = self
            .cache_files()
            .await
            .map_err(|e| Self::io_error("*", "scan", &self.root, e))?;

        let now = now_secs();
        let mut removed = 0;
        for file in files {
            let Ok(Some((expires, _))) = Self::read_entry(&file).await else {
                continue;
            };
            if Self::is_expired(expires, now) && Self::remove_file(&file).await.is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
