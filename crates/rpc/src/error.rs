//! RPC errors and their JSON-RPC error-object mapping.

use serde_json::{json, Value};
use thiserror::Error;

/// Errors surfaced to RPC clients.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The parameter array did not match the method contract.
    #[error("Invalid params: {detail}")]
    InvalidParams { detail: String },

    /// The requested method does not exist.
    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    /// No block matched the identifier.
    #[error("Unknown block")]
    UnknownBlock,

    /// No transaction matched the hash.
    #[error("Unknown transaction")]
    UnknownTransaction,

    /// No contract matched the hash.
    #[error("Unknown contract")]
    UnknownContract,

    /// No live session matched the id.
    #[error("Unknown session")]
    UnknownSession,

    /// No iterator matched the id within the session.
    #[error("Unknown iterator")]
    UnknownIterator,

    /// A submitted item was rejected.
    #[error("Verification failed: {reason}")]
    VerificationFailed { reason: String },

    /// Anything unexpected. The detail is attached only in debug mode.
    #[error("Internal error: {detail}")]
    Internal { detail: String },
}

impl RpcError {
    /// Creates an invalid-params error.
    pub fn invalid_params<S: Into<String>>(detail: S) -> Self {
        Self::InvalidParams {
            detail: detail.into(),
        }
    }

    /// Creates a verification-failure error.
    pub fn verification<S: Into<String>>(reason: S) -> Self {
        Self::VerificationFailed {
            reason: reason.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal<S: Into<String>>(detail: S) -> Self {
        Self::Internal {
            detail: detail.into(),
        }
    }

    /// The JSON-RPC error code.
    pub fn code(&self) -> i64 {
        match self {
            RpcError::InvalidParams { .. } => -32602,
            RpcError::MethodNotFound { .. } => -32601,
            RpcError::UnknownBlock => -101,
            RpcError::UnknownTransaction => -102,
            RpcError::UnknownContract => -103,
            RpcError::UnknownSession => -104,
            RpcError::UnknownIterator => -105,
            RpcError::VerificationFailed { .. } => -500,
            RpcError::Internal { .. } => -32603,
        }
    }

    /// Stable tag for metrics.
    pub fn reason_tag(&self) -> &'static str {
        match self {
            RpcError::InvalidParams { .. } => "invalid_params",
            RpcError::MethodNotFound { .. } => "method_not_found",
            RpcError::UnknownBlock => "unknown_block",
            RpcError::UnknownTransaction => "unknown_transaction",
            RpcError::UnknownContract => "unknown_contract",
            RpcError::UnknownSession => "unknown_session",
            RpcError::UnknownIterator => "unknown_iterator",
            RpcError::VerificationFailed { .. } => "verification_failed",
            RpcError::Internal { .. } => "internal",
        }
    }

    /// Renders the JSON-RPC error object. Internal details are replaced
    /// by a generic message unless `debug` is set.
    pub fn to_error_object(&self, debug: bool) -> Value {
        let message = match self {
            RpcError::Internal { detail } if debug => format!("Internal error: {detail}"),
            RpcError::Internal { .. } => "Internal error".to_string(),
            other => other.to_string(),
        };
        json!({
            "code": self.code(),
            "message": message,
        })
    }
}

impl From<neoxide_core::CoreError> for RpcError {
    fn from(error: neoxide_core::CoreError) -> Self {
        RpcError::invalid_params(error.to_string())
    }
}

/// Result type for RPC handlers.
pub type RpcResult<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(RpcError::invalid_params("x").code(), -32602);
        assert_eq!(RpcError::UnknownBlock.code(), -101);
    }

    #[test]
    fn test_internal_detail_hidden_without_debug() {
        let error = RpcError::internal("secret backtrace");
        let public = error.to_error_object(false);
        assert_eq!(public["message"], "Internal error");
        let debug = error.to_error_object(true);
        assert!(debug["message"].as_str().unwrap().contains("secret backtrace"));
    }
}
