//! Error types for the workqueue crate.

use thiserror::Error;

/// Result type alias for workqueue operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Workqueue error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Rate limiter settings cannot produce a usable limiter.
    #[error("invalid rate limiter configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_display() {
        let err = Error::invalid_config("burst must be positive");
        assert!(err.to_string().contains("burst must be positive"));
    }
}
