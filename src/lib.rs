//! # Neoxide
//!
//! A Rust implementation of the Neo N3 full-node core: the stack-based
//! virtual machine, the transaction verification pipeline, the P2P
//! protocol handler and the read-only RPC query layer.
//!
//! The workspace is organised around four tightly-coupled subsystems:
//!
//! - [`vm`]: deterministic script execution with reference counting and
//!   hard resource limits
//! - [`verification`]: witness and fee checks gating mempool admission
//! - [`network`]: per-peer handshake, gossip, sync and relay
//! - [`rpc`]: the named-method query surface with iterator sessions
//!
//! Storage engines, cryptographic primitives, consensus, wallets and the
//! concrete TCP transport stay behind collaborator traits in [`core`].
//!
//! ## Example
//!
//! ```
//! use neoxide::vm::{ExecutionEngine, Script, VMState};
//!
//! let mut engine = ExecutionEngine::new();
//! engine
//!     .load_script(Script::new(vec![0x15, 0x13, 0x9E]), -1, 0) // PUSH5 PUSH3 ADD
//!     .unwrap();
//! assert_eq!(engine.execute(), VMState::Halt);
//! ```

pub use neoxide_config as config;
pub use neoxide_core as core;
pub use neoxide_io as io;
pub use neoxide_network as network;
pub use neoxide_rpc as rpc;
pub use neoxide_verification as verification;
pub use neoxide_vm as vm;

/// Commonly-used types re-exported at the crate root.
pub mod prelude {
    pub use neoxide_config::{NetworkConfig, NodeConfig, ProtocolSettings, RpcConfig};
    pub use neoxide_core::{
        Block, BlockHeader, CoreMetrics, Crypto, Ledger, Mempool, Signer, Snapshot, StdCrypto,
        Transaction, UInt160, UInt256, Witness, WitnessScope,
    };
    pub use neoxide_network::{NodeServices, ProtocolHandler, Transport};
    pub use neoxide_rpc::{RpcMethods, RpcNodeServices};
    pub use neoxide_verification::{TransactionVerifier, VerificationContext, VerifyResult};
    pub use neoxide_vm::{ApplicationEngine, ExecutionEngine, Script, StackItem, VMState};
}
