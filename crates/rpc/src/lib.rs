//! # Neoxide RPC
//!
//! The read-only query layer: a fixed dispatch table from method names to
//! handlers over the current snapshot, script-evaluation invocations
//! through private [`neoxide_vm::ApplicationEngine`] instances, and a
//! session-scoped iterator store for streaming enumerations.
//!
//! The HTTP envelope is a collaborator; [`RpcMethods::handle_request`]
//! provides the pure JSON-RPC request→response mapping it needs.

pub mod error;
pub mod methods;
pub mod session;
pub mod types;

pub use error::{RpcError, RpcResult};
pub use methods::{RpcMethods, RpcNodeServices};
pub use session::SessionStore;
pub use types::{block_to_json, header_to_json, stack_item_to_json, transaction_to_json};
