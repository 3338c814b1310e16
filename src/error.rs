use std::sync::Arc;

/// Boxed error returned by producers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The key is empty, too long or contains characters outside `[A-Za-z0-9_.]`.
    #[error("illegal cache key: '{0}'")]
    InvalidKey(String),

    /// A record could not be encoded, so nothing was written.
    #[error("failed to encode cache record: {0}")]
    Encoding(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A storage tier operation failed.
    #[error("[{tier}] cache error for key '{key}': {message}")]
    Operation {
        tier: String,
        key: String,
        message: String,
    },

    /// The producer failed while computing a value for a cache miss.
    #[error("producer failed: {0}")]
    Producer(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// The cache could not be assembled from its configuration.
    #[error("invalid cache configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// Create a new operation error.
    pub fn operation(
        tier: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CacheError::Operation {
            tier: tier.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    pub(crate) fn producer(err: impl Into<BoxError>) -> Self {
        CacheError::Producer(Arc::from(err.into()))
    }

    /// Returns the producer's original error, if this is a producer failure.
    pub fn producer_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            CacheError::Producer(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("database offline")]
    struct DbDown;

    #[test]
    fn test_producer_error_is_preserved() {
        let err = CacheError::producer(DbDown);
        assert_eq!(err.to_string(), "producer failed: database offline");

        let inner = err.producer_error().unwrap();
        assert!(inner.downcast_ref::<DbDown>().is_some());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_operation_error_display() {
        let err = CacheError::operation("redis", "user.1", "GET failed");
        assert_eq!(err.to_string(), "[redis] cache error for key 'user.1': GET failed");
    }
}
