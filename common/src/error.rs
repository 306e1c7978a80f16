//! Error types for Ratewire.

use crate::ConnectionId;
use thiserror::Error;

/// Main error type for Ratewire operations.
#[derive(Error, Debug)]
pub enum RatewireError {
    /// Requested currency is absent from the current rate table.
    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),

    /// Caller supplied malformed input.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        message: String,
        field: Option<String>,
    },

    /// Upstream rate provider could not be reached.
    #[error("Rate provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Upstream rate provider returned data that failed validation.
    #[error("Rate provider returned malformed data: {0}")]
    ProviderMalformed(String),

    /// Streaming session ended normally.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A push to one subscriber failed.
    #[error("Send to connection {0} failed")]
    SendFailed(ConnectionId),

    /// Peer violated the wire protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RatewireError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RatewireError::ProviderUnavailable(_) | RatewireError::Io(_)
        )
    }

    /// Whether the error ends a session without indicating a fault.
    pub fn is_graceful_close(&self) -> bool {
        matches!(self, RatewireError::ConnectionClosed)
    }

    /// Get error code for protocol messages.
    pub fn error_code(&self) -> &'static str {
        match self {
            RatewireError::UnknownCurrency(_) => "INVALID_ARGUMENT",
            RatewireError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            RatewireError::ProviderUnavailable(_) => "UNAVAILABLE",
            RatewireError::ProviderMalformed(_) => "UNAVAILABLE",
            RatewireError::ConnectionClosed => "UNAVAILABLE",
            RatewireError::SendFailed(_) => "UNAVAILABLE",
            RatewireError::Protocol(_) => "INVALID_ARGUMENT",
            RatewireError::Io(_) => "UNAVAILABLE",
            RatewireError::Configuration(_) => "INTERNAL",
        }
    }
}

/// Result type alias for Ratewire operations.
pub type Result<T> = std::result::Result<T, RatewireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            RatewireError::UnknownCurrency("XYZ".into()).error_code(),
            "INVALID_ARGUMENT"
        );
        assert_eq!(
            RatewireError::InvalidArgument {
                message: "bad".into(),
                field: Some("base".into()),
            }
            .error_code(),
            "INVALID_ARGUMENT"
        );
        assert_eq!(
            RatewireError::ProviderUnavailable("down".into()).error_code(),
            "UNAVAILABLE"
        );
    }

    #[test]
    fn test_graceful_close() {
        assert!(RatewireError::ConnectionClosed.is_graceful_close());
        assert!(!RatewireError::SendFailed(ConnectionId::new()).is_graceful_close());
        assert!(!RatewireError::ConnectionClosed.is_retryable());
    }
}
