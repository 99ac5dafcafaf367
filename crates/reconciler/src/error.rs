//! Error types for the reconciler crate.

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Controller error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The stop signal fired before the informer cache finished its first listing.
    #[error("controller '{controller}' failed to wait for caches to sync")]
    CacheSyncFailed { controller: String },

    /// `run` was called more than once.
    #[error("controller '{controller}' has already been started")]
    AlreadyStarted { controller: String },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Work queue setup failed.
    #[error(transparent)]
    Queue(#[from] workqueue::Error),
}

impl Error {
    /// Create a cache sync failed error.
    pub fn cache_sync_failed(controller: impl Into<String>) -> Self {
        Self::CacheSyncFailed {
            controller: controller.into(),
        }
    }

    /// Create an already started error.
    pub fn already_started(controller: impl Into<String>) -> Self {
        Self::AlreadyStarted {
            controller: controller.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Outcome of a failed sync.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Worth retrying; the key is requeued with backoff.
    #[error("{0}")]
    Transient(String),

    /// Retrying cannot help; the key is forgotten.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl SyncError {
    /// Create a transient sync error.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    /// Create a permanent sync error.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }

    /// True if the key should be retried.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_sync_failed_display() {
        let err = Error::cache_sync_failed("crontabs");
        assert_eq!(
            err.to_string(),
            "controller 'crontabs' failed to wait for caches to sync"
        );
    }

    #[test]
    fn test_queue_error_is_transparent() {
        let err: Error = workqueue::Error::invalid_config("burst must be positive").into();
        assert!(err.to_string().contains("burst must be positive"));
    }

    #[test]
    fn test_sync_error_kinds() {
        assert!(SyncError::transient("timeout").is_transient());
        assert!(!SyncError::permanent("bad spec").is_transient());
        assert_eq!(
            SyncError::permanent("bad spec").to_string(),
            "permanent failure: bad spec"
        );
    }
}
