//! Per-key locks used to single-flight producers.
//!
//! A lock is identified by the md5 digest of the cache key, so every process
//! working on the same key resolves to the same lock resource. Locks are
//! handed out by a [`LockProvider`] and released explicitly or on drop.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::utils::key_hash;

/// Delay between attempts while waiting on a contended file lock.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Contention longer than this is logged once per wait.
const CONTENTION_WARNING: Duration = Duration::from_millis(500);

/// An exclusive lock on one cache key.
#[async_trait]
pub trait KeyLock: Send {
    /// Try to take the lock.
    ///
    /// With `blocking == false` this returns `false` immediately when the
    /// lock is held elsewhere. With `blocking == true` the future resolves
    /// once the lock is held, or with `false` if the provider's timeout
    /// elapses or the lock resource is unusable. Acquiring a lock this handle
    /// already holds returns `true`.
    async fn acquire(&mut self, blocking: bool) -> bool;

    /// Release the lock. Safe to call when not held.
    fn release(&mut self);

    /// Whether this handle currently holds the lock.
    fn is_held(&self) -> bool;
}

/// Hands out lock handles keyed by cache key.
pub trait LockProvider: Send + Sync {
    /// A fresh, unacquired handle for `key`.
    fn lock_for(&self, key: &str) -> Box<dyn KeyLock>;
}

/// Advisory file locks under a shared directory.
///
/// The lock for a key lives at `<dir>/<hash[0..2]>/<hash>.lock`. Any process
/// pointing at the same directory shares the locks.
#[derive(Debug, Clone)]
pub struct FileLockProvider {
    dir: PathBuf,
    timeout: Option<Duration>,
    poll_interval: Duration,
}

impl FileLockProvider {
    /// Create the provider, creating `dir` if it does not exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            CacheError::Config(format!(
                "cannot create lock directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        Ok(FileLockProvider {
            dir,
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Bound blocking acquisition. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The lock file used for `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let hash = key_hash(key);
        self.dir.join(&hash[..2]).join(format!("{}.lock", hash))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FileLockProvider {
    fn key_lock(&self, key: &str) -> FileKeyLock {
        FileKeyLock {
            path: self.path_for(key),
            timeout: self.timeout,
            poll_interval: self.poll_interval,
            dir_ready: false,
            file: None,
        }
    }
}

impl LockProvider for FileLockProvider {
    fn lock_for(&self, key: &str) -> Box<dyn KeyLock> {
        Box::new(self.key_lock(key))
    }
}

/// A single `flock` handle. Each handle opens its own file description, so
/// two handles contend even inside one process.
pub struct FileKeyLock {
    path: PathBuf,
    timeout: Option<Duration>,
    poll_interval: Duration,
    /// Shard directory known to exist.
    dir_ready: bool,
    file: Option<File>,
}

impl FileKeyLock {
    /// One non-blocking attempt. The filesystem calls run on the blocking
    /// pool.
    async fn try_lock(&mut self) -> io::Result<bool> {
        let path = self.path.clone();
        let create_dir = !self.dir_ready;

        let attempt = tokio::task::spawn_blocking(move || {
            if create_dir && let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            try_acquire_exclusive(&path)
        })
        .await
        .map_err(io::Error::other)?;

        match attempt {
            Ok(file) => {
                self.dir_ready = true;
                self.file = Some(file);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.dir_ready = true;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl KeyLock for FileKeyLock {
    async fn acquire(&mut self, blocking: bool) -> bool {
        if self.file.is_some() {
            return true;
        }

        let start = Instant::now();
        let mut warned = false;

        loop {
            match self.try_lock().await {
                Ok(true) => {
                    if warned {
                        debug!(
                            path = %self.path.display(),
                            waited_ms = start.elapsed().as_millis() as u64,
                            "Lock acquired after contention"
                        );
                    }
                    return true;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Lock file unavailable");
                    return false;
                }
            }

            if !blocking {
                return false;
            }
            if let Some(timeout) = self.timeout
                && start.elapsed() >= timeout
            {
                debug!(path = %self.path.display(), ?timeout, "Lock wait timed out");
                return false;
            }
            if !warned && start.elapsed() > CONTENTION_WARNING {
                debug!(path = %self.path.display(), "Lock contended, waiting");
                warned = true;
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn release(&mut self) {
        if let Some(file) = self.file.take() {
            release_exclusive(&self.path, file);
        }
    }

    fn is_held(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for FileKeyLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(unix)]
fn try_acquire_exclusive(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o644)
        .open(path)?;

    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        Ok(file)
    } else {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
        } else {
            Err(err)
        }
    }
}

#[cfg(unix)]
fn release_exclusive(_path: &Path, file: File) {
    use std::os::unix::io::AsRawFd;

    // Closing the descriptor would drop the lock too; unlock first so the
    // release does not depend on drop order.
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn try_acquire_exclusive(path: &Path) -> io::Result<File> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
        }
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn release_exclusive(path: &Path, file: File) {
    drop(file);
    let _ = fs::remove_file(path);
}

type MutexTable = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// In-process lock table for single-node deployments.
///
/// Entries are created on first use and dropped once no handle refers to
/// them.
#[derive(Debug, Clone, Default)]
pub struct MemoryLockProvider {
    table: MutexTable,
    timeout: Option<Duration>,
}

impl MemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound blocking acquisition. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of keys with a live lock entry.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LockProvider for MemoryLockProvider {
    fn lock_for(&self, key: &str) -> Box<dyn KeyLock> {
        Box::new(MemoryKeyLock {
            id: key_hash(key),
            table: self.table.clone(),
            timeout: self.timeout,
            guard: None,
        })
    }
}

/// Handle into a [`MemoryLockProvider`] table.
pub struct MemoryKeyLock {
    id: String,
    table: MutexTable,
    timeout: Option<Duration>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl MemoryKeyLock {
    fn entry(&self) -> Arc<tokio::sync::Mutex<()>> {
        self.table
            .lock()
            .entry(self.id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the table entry when only the table still refers to it.
    fn forget_if_unused(&self) {
        let mut table = self.table.lock();
        if table
            .get(&self.id)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            table.remove(&self.id);
        }
    }
}

#[async_trait]
impl KeyLock for MemoryKeyLock {
    async fn acquire(&mut self, blocking: bool) -> bool {
        if self.guard.is_some() {
            return true;
        }

        let mutex = self.entry();
        let guard = if !blocking {
            mutex.try_lock_owned().ok()
        } else {
            match self.timeout {
                Some(timeout) => tokio::time::timeout(timeout, mutex.lock_owned())
                    .await
                    .ok(),
                None => Some(mutex.lock_owned().await),
            }
        };

        let acquired = guard.is_some();
        self.guard = guard;
        if !acquired {
            self.forget_if_unused();
        }
        acquired
    }

    fn release(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        drop(guard);
        self.forget_if_unused();
    }

    fn is_held(&self) -> bool {
        self.guard.is_some()
    }
}

impl Drop for MemoryKeyLock {
    fn drop(&mut self) {
        self.release();
    }
}
