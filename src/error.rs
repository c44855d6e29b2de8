//! Error types for the dispatch engine.

use thiserror::Error;

/// Result type for dispatch operations
///
/// Senders return this from `send_batch`; construction returns it from
/// `Channel::new`.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Error types for dispatch operations
///
/// The engine never surfaces send failures to producers. A sender's error is
/// classified here, routed through the channel's error callback, and resolved
/// as a retry or a drop.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Transient errors - failures that should be retried with backoff
    ///
    /// Examples: network timeouts, temporary unavailability, throttling
    #[error("Transient error: {message}")]
    Transient {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Fatal errors - permanent failures; the batch is dropped, not retried
    ///
    /// Examples: authentication failures, payload rejected by the remote
    #[error("Fatal error: {message}")]
    Fatal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error - detected when the channel is constructed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Transient { .. })
    }

    /// Check if this error is fatal
    pub fn is_fatal(&self) -> bool {
        matches!(self, DispatchError::Fatal { .. })
    }

    /// Create a transient error from a message
    pub fn transient(message: impl Into<String>) -> Self {
        DispatchError::Transient {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transient error with source
    pub fn transient_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DispatchError::Transient {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a fatal error from a message
    pub fn fatal(message: impl Into<String>) -> Self {
        DispatchError::Fatal {
            message: message.into(),
            source: None,
        }
    }

    /// Create a fatal error with source
    pub fn fatal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DispatchError::Fatal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        DispatchError::Configuration(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let transient = DispatchError::transient("network timeout");
        assert!(transient.is_retryable());
        assert!(!transient.is_fatal());

        let fatal = DispatchError::fatal("auth failed");
        assert!(!fatal.is_retryable());
        assert!(fatal.is_fatal());

        let config = DispatchError::config("bad options");
        assert!(!config.is_retryable());
        assert!(!config.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = DispatchError::transient("test error");
        assert_eq!(err.to_string(), "Transient error: test error");

        let err = DispatchError::config("max_leases must be > 0");
        assert_eq!(
            err.to_string(),
            "Configuration error: max_leases must be > 0"
        );
    }

    #[test]
    fn test_error_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = DispatchError::transient_with_source("send failed", io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
