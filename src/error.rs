//! Error handling for the pool mining client
//!
//! Every failure the client can observe maps onto one variant here. Connection
//! level errors are retryable and feed the reconnect loop; protocol, pool and
//! job errors are reported and skipped without tearing the session down.

use thiserror::Error;

/// Result type alias for pool mining operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the pool mining client
#[derive(Error, Debug)]
pub enum Error {
    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Pool host name could not be resolved
    #[error("Failed to resolve {host}: {message}")]
    Resolution { host: String, message: String },

    /// Socket could not be opened or closed before login completed
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// A single inbound line was not a valid pool message
    #[error("Protocol decode error: {message}")]
    ProtocolDecode { message: String },

    /// The pool answered with an error object
    #[error("Pool rejected request: {message}")]
    PoolRejection { message: String },

    /// A job pushed by the pool is incomplete or malformed
    #[error("Invalid job: {message}")]
    JobValidation { message: String },

    /// The hash primitive faulted
    #[error("Hash error: {message}")]
    Hash { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Invalid state errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },
}

impl Error {
    /// Create a resolution error
    pub fn resolution(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a protocol decode error
    pub fn protocol_decode(message: impl Into<String>) -> Self {
        Self::ProtocolDecode {
            message: message.into(),
        }
    }

    /// Create a pool rejection error
    pub fn pool_rejection(message: impl Into<String>) -> Self {
        Self::PoolRejection {
            message: message.into(),
        }
    }

    /// Create a job validation error
    pub fn job_validation(message: impl Into<String>) -> Self {
        Self::JobValidation {
            message: message.into(),
        }
    }

    /// Create a hash error
    pub fn hash(message: impl Into<String>) -> Self {
        Self::Hash {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Check if error is retryable by reconnecting
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Resolution { .. }
                | Error::Connection { .. }
                | Error::Timeout { .. }
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Io(_) => "io",
            Error::Resolution { .. } => "resolution",
            Error::Connection { .. } => "connection",
            Error::ProtocolDecode { .. } => "protocol_decode",
            Error::PoolRejection { .. } => "pool_rejection",
            Error::JobValidation { .. } => "job_validation",
            Error::Hash { .. } => "hash",
            Error::Config { .. } => "config",
            Error::Timeout { .. } => "timeout",
            Error::InvalidState { .. } => "invalid_state",
        }
    }
}
