//! Error types for the HRMS client core.

use thiserror::Error;

/// The main error type for HRMS core operations.
///
/// Errors are `Clone` because a single failed fetch is delivered to every
/// caller that joined the same in-flight request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The transport failed to reach the backend or got a non-success status.
    #[error("Transport error{}: {message}", status_suffix(.status))]
    Transport {
        /// HTTP status code, when one was received.
        status: Option<u16>,
        /// Human-readable failure description.
        message: String,
    },

    /// The backend answered with `success: false`.
    #[error("API error: {message}")]
    Api {
        /// Message carried by the envelope.
        message: String,
        /// Field-level errors carried by the envelope, if any.
        errors: Vec<String>,
    },

    /// A response body could not be decoded into the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid permission format.
    #[error("Invalid permission format: {0}")]
    InvalidPermission(String),

    /// Durable storage operation failed.
    #[error("Storage operation failed: {0}")]
    Storage(String),

    /// The request was cancelled before it settled.
    #[error("Request cancelled")]
    Cancelled,

    /// An operation required a live session and none exists.
    #[error("No authenticated session")]
    NotAuthenticated,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl Error {
    /// Build a transport error without a status code.
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// Whether retrying the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { status: None, .. } => true,
            Error::Transport {
                status: Some(status),
                ..
            } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

/// Result type alias for HRMS core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_display_includes_status() {
        let err = Error::Transport {
            status: Some(503),
            message: "unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "Transport error (HTTP 503): unavailable");
        assert_eq!(
            Error::transport("connection reset").to_string(),
            "Transport error: connection reset"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::transport("timeout").is_retryable());
        assert!(Error::Transport { status: Some(502), message: String::new() }.is_retryable());
        assert!(Error::Transport { status: Some(429), message: String::new() }.is_retryable());
        assert!(!Error::Transport { status: Some(404), message: String::new() }.is_retryable());
        assert!(!Error::Decode("bad".into()).is_retryable());
        assert!(!Error::NotAuthenticated.is_retryable());
    }
}
