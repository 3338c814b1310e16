//! Cache key validation.

use crate::error::CacheError;

/// Longest accepted cache key, in bytes.
pub const MAX_KEY_LEN: usize = 64;

/// Reject keys that could collide with lock-path or storage-path construction.
///
/// A valid key is 1 to 64 ASCII characters from `[A-Za-z0-9_.]`. This also
/// excludes the structural characters `{ } ( ) / \ @ :`.
pub fn validate_key(key: &str) -> Result<(), CacheError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.');

    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(key.to_string()))
    }
}
