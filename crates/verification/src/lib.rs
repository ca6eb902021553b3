//! # Neoxide Verification
//!
//! The transaction verification pipeline: structural checks, witness
//! signature verification against the canonical single- and multi-sig
//! templates (arbitrary witnesses execute under the Verification trigger),
//! script-hash binding, network- and system-fee enforcement, and a bounded
//! cache of outcomes keyed by transaction hash and verification mode.

pub mod cache;
pub mod verifier;
pub mod verify_result;
pub mod witness_template;

pub use cache::{
    VerificationCache, VerificationMode, CACHE_CAPACITY, CACHE_MAX_HEIGHT_DRIFT, CACHE_TTL,
};
pub use verifier::{witness_result_is_truthy, TransactionVerifier, VerificationContext};
pub use verify_result::{VerificationOutput, VerifyResult};
pub use witness_template::{
    multisig_contract_script, parse_multisig_contract, parse_signature_contract,
    parse_signatures, parse_single_signature, signature_contract_script, MultiSigParams,
    MAX_MULTISIG_KEYS,
};
