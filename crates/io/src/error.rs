//! Error types for binary serialization.

use thiserror::Error;

/// I/O operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IoError {
    /// Unexpected end of stream.
    #[error("Unexpected end of stream: expected {expected} more bytes while reading {context}")]
    EndOfStream { expected: usize, context: String },

    /// Invalid data content.
    #[error("Invalid data: {context}, value: {value}")]
    InvalidData { context: String, value: String },

    /// A declared length exceeds the permitted maximum.
    #[error("Length {length} exceeds limit {limit} while reading {context}")]
    LengthExceeded {
        length: usize,
        limit: usize,
        context: String,
    },

    /// Invalid operation on the reader or writer.
    #[error("Invalid operation: {operation}, reason: {reason}")]
    InvalidOperation { operation: String, reason: String },
}

impl IoError {
    /// Creates a new end-of-stream error.
    pub fn end_of_stream<S: Into<String>>(expected: usize, context: S) -> Self {
        Self::EndOfStream {
            expected,
            context: context.into(),
        }
    }

    /// Creates a new invalid-data error.
    pub fn invalid_data<S: Into<String>, V: Into<String>>(context: S, value: V) -> Self {
        Self::InvalidData {
            context: context.into(),
            value: value.into(),
        }
    }

    /// Creates a new length-exceeded error.
    pub fn length_exceeded<S: Into<String>>(length: usize, limit: usize, context: S) -> Self {
        Self::LengthExceeded {
            length,
            limit,
            context: context.into(),
        }
    }

    /// Creates a new invalid-operation error.
    pub fn invalid_operation<S: Into<String>, R: Into<String>>(operation: S, reason: R) -> Self {
        Self::InvalidOperation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for I/O operations.
pub type IoResult<T> = std::result::Result<T, IoError>;
