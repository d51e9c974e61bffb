//! Error types for session and stream operations.

use thiserror::Error;

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the session client, the stream transport and the
/// session manager.
///
/// Every variant renders as a message suitable for showing to the user
/// directly; backend messages are passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An argument was rejected before any connection was attempted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// User input failed validation. No request was sent.
    #[error("{0}")]
    Validation(String),

    /// The backend answered with a non-success status.
    #[error("{message}")]
    Backend {
        /// HTTP status code returned by the backend.
        status: u16,
        /// Message taken from the backend's error body.
        message: String,
    },

    /// The event stream failed at the transport level.
    #[error("stream error: {0}")]
    Transport(String),

    /// HTTP request failed before a response was received.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Failed to parse a response or message body.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// Timeout waiting for a response.
    #[error("request timed out")]
    Timeout,

    /// Another start/stop operation is still in flight.
    #[error("another session operation is already in progress")]
    Busy,

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns true for errors raised before any network activity.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::InvalidArgument(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else if err.is_decode() {
            Error::Parse(err.to_string())
        } else {
            Error::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_message_is_verbatim() {
        let err = Error::Backend {
            status: 409,
            message: "Сессия для устройства уже активна".to_string(),
        };
        assert_eq!(err.to_string(), "Сессия для устройства уже активна");
    }

    #[test]
    fn test_is_validation() {
        assert!(Error::Validation("empty".into()).is_validation());
        assert!(Error::InvalidArgument("empty".into()).is_validation());
        assert!(!Error::Busy.is_validation());
        assert!(!Error::Timeout.is_validation());
    }

    #[test]
    fn test_from_json_error() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, Error::Parse(_)));
    }
}
