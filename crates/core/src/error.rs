//! Error types shared by the domain model.

use thiserror::Error;

/// Core domain errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Malformed value supplied to a constructor or parser.
    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    /// A wire payload failed structural validation.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Cryptographic material failed validation.
    #[error("Invalid key or signature: {message}")]
    InvalidCrypto { message: String },

    /// An operation was attempted on state that does not support it.
    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    /// Serialization layer failure.
    #[error("I/O error: {0}")]
    Io(#[from] neoxide_io::IoError),
}

impl CoreError {
    /// Creates a new invalid-format error.
    pub fn invalid_format<S: Into<String>>(message: S) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a new invalid-data error.
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Creates a new invalid-crypto error.
    pub fn invalid_crypto<S: Into<String>>(message: S) -> Self {
        Self::InvalidCrypto {
            message: message.into(),
        }
    }

    /// Creates a new invalid-operation error.
    pub fn invalid_operation<S: Into<String>>(message: S) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

/// Result type for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
