//! Error types for adapters.

use thiserror::Error;

/// How a caller should react to an [`AdapterError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network trouble, timeouts, broker-side 5xx. Retry on the next tick.
    Transient,
    /// Bad credentials, unknown vhost/queue, rejected request. Never retry.
    Fatal,
}

/// Errors that can occur when talking to a broker.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Server answered with an unexpected status.
    #[error("HTTP request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    /// Failed to parse response.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Requested vhost or queue does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Timeout waiting for response.
    #[error("request timed out")]
    Timeout,

    /// The client could not be constructed.
    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl AdapterError {
    /// Classify this error for retry purposes.
    pub fn class(&self) -> ErrorClass {
        match self {
            AdapterError::Connection(_) | AdapterError::Timeout | AdapterError::Parse(_) => {
                ErrorClass::Transient
            }
            AdapterError::Http { status, .. } if *status >= 500 => ErrorClass::Transient,
            AdapterError::Http { .. }
            | AdapterError::Auth(_)
            | AdapterError::NotFound(_)
            | AdapterError::Config(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

#[cfg(feature = "rabbitmq")]
impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AdapterError::Timeout
        } else if err.is_connect() || err.is_request() || err.is_body() {
            AdapterError::Connection(err.to_string())
        } else if err.is_decode() {
            AdapterError::Parse(err.to_string())
        } else {
            AdapterError::Http {
                status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                message: err.to_string(),
            }
        }
    }
}
