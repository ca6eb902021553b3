//! Verification outcomes.

use std::fmt;

/// The outcome of verifying a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerifyResult {
    /// The transaction passed every check.
    Succeed,
    /// A witness signature failed cryptographic verification.
    InvalidSignature,
    /// A structural, expiry or witness-binding check failed.
    Invalid,
    /// The declared network fee does not cover size and witness costs.
    InsufficientNetworkFee,
    /// The declared system fee does not cover script execution.
    InsufficientSystemFee,
    /// Required chain state was missing; transient, never cached.
    UnableToVerify,
    /// An unexpected internal error; logged and never cached.
    Failed,
}

impl VerifyResult {
    /// Whether the transaction may enter the mempool or a block.
    pub fn is_ok(&self) -> bool {
        matches!(self, VerifyResult::Succeed)
    }

    /// Whether this outcome may be cached.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, VerifyResult::UnableToVerify | VerifyResult::Failed)
    }

    /// Stable tag for logs and metrics.
    pub fn reason_tag(&self) -> &'static str {
        match self {
            VerifyResult::Succeed => "succeed",
            VerifyResult::InvalidSignature => "invalid_signature",
            VerifyResult::Invalid => "invalid",
            VerifyResult::InsufficientNetworkFee => "insufficient_network_fee",
            VerifyResult::InsufficientSystemFee => "insufficient_system_fee",
            VerifyResult::UnableToVerify => "unable_to_verify",
            VerifyResult::Failed => "failed",
        }
    }
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason_tag())
    }
}

/// A verification result with diagnostics.
#[derive(Debug, Clone)]
pub struct VerificationOutput {
    /// The outcome.
    pub result: VerifyResult,
    /// Human-readable detail for rejected transactions.
    pub message: String,
    /// Gas consumed while verifying witnesses and measuring the script,
    /// reported but never deducted.
    pub gas_consumed: i64,
}

impl VerificationOutput {
    /// Builds an output.
    pub fn new(result: VerifyResult, message: impl Into<String>, gas_consumed: i64) -> Self {
        Self {
            result,
            message: message.into(),
            gas_consumed,
        }
    }

    /// A plain success.
    pub fn succeed(gas_consumed: i64) -> Self {
        Self::new(VerifyResult::Succeed, "", gas_consumed)
    }
}
