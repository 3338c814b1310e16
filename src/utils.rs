//! Shared utilities for the cache library.

use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current time in seconds since UNIX epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Hex md5 digest of a cache key.
///
/// Used wherever a key has to be mapped onto a filesystem path or a lock
/// identity, so every process derives the same name for the same key.
pub fn key_hash(key: &str) -> String {
    format!("{:x}", md5::compute(key.as_bytes()))
}

/// Simple pseudo-random number generator (0.0 to 1.0).
pub fn rand_simple() -> f64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let state = RandomState::new();
    let mut hasher = state.build_hasher();
    hasher.write_u128(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    );
    (hasher.finish() as f64) / (u64::MAX as f64)
}
