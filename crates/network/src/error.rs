//! Network-layer errors.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised while handling peer traffic. Any error that escapes a
/// message handler disconnects the offending peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// A peer violated the protocol.
    #[error("Protocol violation from {peer}: {violation}")]
    ProtocolViolation { peer: SocketAddr, violation: String },

    /// A handshake was rejected.
    #[error("Handshake with {peer} rejected: {reason}")]
    HandshakeRejected { peer: SocketAddr, reason: String },

    /// A message failed to encode or decode.
    #[error("Message codec error: {0}")]
    Codec(#[from] neoxide_io::IoError),

    /// A payload failed semantic validation.
    #[error("Invalid payload: {reason}")]
    InvalidPayload { reason: String },

    /// An operation referenced an unknown peer.
    #[error("Unknown peer {peer}")]
    UnknownPeer { peer: SocketAddr },
}

impl NetworkError {
    /// Creates a protocol-violation error.
    pub fn violation<S: Into<String>>(peer: SocketAddr, violation: S) -> Self {
        Self::ProtocolViolation {
            peer,
            violation: violation.into(),
        }
    }

    /// Creates a handshake-rejection error.
    pub fn handshake<S: Into<String>>(peer: SocketAddr, reason: S) -> Self {
        Self::HandshakeRejected {
            peer,
            reason: reason.into(),
        }
    }

    /// Creates an invalid-payload error.
    pub fn invalid_payload<S: Into<String>>(reason: S) -> Self {
        Self::InvalidPayload {
            reason: reason.into(),
        }
    }

    /// Stable tag used for disconnect metrics.
    pub fn reason_tag(&self) -> &'static str {
        match self {
            NetworkError::ProtocolViolation { .. } => "protocol_violation",
            NetworkError::HandshakeRejected { .. } => "handshake_rejected",
            NetworkError::Codec(_) => "codec",
            NetworkError::InvalidPayload { .. } => "invalid_payload",
            NetworkError::UnknownPeer { .. } => "unknown_peer",
        }
    }
}

/// Result type for network operations.
pub type NetworkResult<T> = std::result::Result<T, NetworkError>;
