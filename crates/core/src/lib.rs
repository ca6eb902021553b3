//! # Neoxide Core
//!
//! Domain types and collaborator contracts for the Neo N3 node core:
//! hashes, transactions, blocks, witnesses, the crypto seam, the snapshot
//! and mempool interfaces the other crates consume, the shutdown chain and
//! the shared metrics registry.

pub mod block;
pub mod contract_state;
pub mod crypto;
pub mod error;
pub mod metrics;
pub mod shutdown;
pub mod signer;
pub mod snapshot;
pub mod transaction;
pub mod uint160;
pub mod uint256;
pub mod witness;
pub mod witness_scope;

pub use block::{block_from_base64, Block, BlockHeader, MAX_TRANSACTIONS_PER_BLOCK};
pub use contract_state::{ContractManifest, ContractMethod, ContractState};
pub use crypto::{
    address_to_script_hash, script_hash_to_address, Crypto, StdCrypto, PUBLIC_KEY_SIZE,
    SIGNATURE_SIZE,
};
pub use error::{CoreError, CoreResult};
pub use metrics::CoreMetrics;
pub use shutdown::{ShutdownCoordinator, ShutdownError, ShutdownStage};
pub use signer::Signer;
pub use snapshot::{
    KeyValueStore, Ledger, MemoryKeyValueStore, MemoryMempool, MemorySnapshot, Mempool,
    PolicyReader, Snapshot, StoragePolicyReader, DEFAULT_EXEC_FEE_FACTOR,
};
pub use transaction::{
    transaction_from_base64, Transaction, TransactionAttribute, MAX_TRANSACTION_SIZE,
};
pub use uint160::{UInt160, UINT160_SIZE};
pub use uint256::{UInt256, UINT256_SIZE};
pub use witness::Witness;
pub use witness_scope::WitnessScope;

/// Serde helper encoding byte vectors as Base64 strings on JSON surfaces.
pub mod serde_base64 {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes bytes as a Base64 string.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Deserializes bytes from a Base64 string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(text)
            .map_err(serde::de::Error::custom)
    }
}
