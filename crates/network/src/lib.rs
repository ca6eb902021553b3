//! # Neoxide Network
//!
//! The P2P protocol handler: a message-driven state machine per peer
//! covering handshake, inventory gossip, block/header/transaction
//! request-response and relay, with per-peer known-hash filtering and
//! alternate-peer retry on `NotFound`. Relayed transactions and blocks
//! pass through the verification pipeline before touching the mempool or
//! the ledger.
//!
//! The concrete TCP transport is a collaborator behind the [`Transport`]
//! trait; the handler only needs `send` and `disconnect`.

pub mod error;
pub mod handler;
pub mod messages;
pub mod peer_record;

pub use error::{NetworkError, NetworkResult};
pub use handler::{
    HandshakeState, NodeServices, PeerId, ProtocolHandler, Transport, MAX_VERIFICATION_GAS,
};
pub use messages::{
    InventoryItem, InventoryType, Message, MessageCommand, NetworkAddress, ProtocolMessage,
    MAX_ADDR_ENTRIES, MAX_HEADERS_PER_MESSAGE, MAX_INV_ENTRIES, MAX_PAYLOAD_SIZE,
};
pub use peer_record::{PeerAddressRecord, PEER_ADDRESS_PREFIX};
