//! Error types for the informer crate.

use thiserror::Error;

/// Result type alias for informer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Informer error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A string could not be parsed as a resource key.
    #[error("invalid resource key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// No key can be derived from an object.
    #[error("cannot derive key for {kind}: {reason}")]
    KeyDerivation { kind: String, reason: String },

    /// The resource source failed to list objects.
    #[error("listing {kind} failed: {reason}")]
    ListFailed { kind: String, reason: String },

    /// `run` was called on an informer that is already running.
    #[error("informer for {kind} is already running")]
    AlreadyRunning { kind: String },
}

impl Error {
    /// Create an invalid key error.
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a key derivation error.
    pub fn key_derivation(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::KeyDerivation {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Create a list failed error.
    pub fn list_failed(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ListFailed {
            kind: kind.into(),
            reason: reason.into(),
        }
    }
}
