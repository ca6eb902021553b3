//! # Neoxide Configuration
//!
//! Configuration types for the node core: protocol settings shared with the
//! network (magic, address version, block timing), the P2P handler knobs,
//! and the RPC query-layer knobs. All types are serde-derived and loadable
//! from TOML.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Blockchain timing constants.
pub const SECONDS_PER_BLOCK: u64 = 15;
/// Milliseconds between blocks.
pub const MILLISECONDS_PER_BLOCK: u64 = SECONDS_PER_BLOCK * 1000;

/// Network limits.
pub const MAX_BLOCK_SIZE: usize = 1_048_576;
/// Maximum size of a transaction in bytes.
pub const MAX_TRANSACTION_SIZE: usize = 102_400;
/// Maximum number of transactions in a block.
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 512;
/// Size of a UInt256 hash in bytes.
pub const HASH_SIZE: usize = 32;
/// Size of a UInt160 account hash in bytes.
pub const ADDRESS_SIZE: usize = 20;

/// Protocol default network fee per byte in datoshi, used when the policy
/// contract has no stored value yet.
pub const DEFAULT_FEE_PER_BYTE: i64 = 1000;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Semantic validation failure.
    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },
}

/// Which chain the node participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum NetworkType {
    MainNet,
    #[default]
    TestNet,
    Private,
}

impl NetworkType {
    /// The network magic identifying the chain on the wire.
    pub fn magic(&self) -> u32 {
        match self {
            NetworkType::MainNet => 0x334f454e,
            NetworkType::TestNet => 0x3254334e,
            NetworkType::Private => 0x0000_0000,
        }
    }

    /// The Base58Check address version byte.
    pub fn address_version(&self) -> u8 {
        0x35
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkType::MainNet => write!(f, "mainnet"),
            NetworkType::TestNet => write!(f, "testnet"),
            NetworkType::Private => write!(f, "private"),
        }
    }
}

impl FromStr for NetworkType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(NetworkType::MainNet),
            "testnet" | "test" => Ok(NetworkType::TestNet),
            "private" | "privnet" => Ok(NetworkType::Private),
            other => Err(ConfigError::Invalid {
                reason: format!("unknown network type: {other}"),
            }),
        }
    }
}

/// Chain-level protocol settings shared by the verifier, the protocol
/// handler and the RPC layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolSettings {
    /// Network magic covered by every transaction signature.
    pub network: u32,
    /// Base58Check address version.
    pub address_version: u8,
    /// Target milliseconds between blocks.
    pub ms_per_block: u64,
    /// How far back blocks stay traceable.
    pub max_traceable_blocks: u32,
    /// Maximum valid-until-block offset for incoming transactions.
    pub max_valid_until_block_increment: u32,
    /// Number of consensus validators.
    pub validators_count: u8,
}

impl ProtocolSettings {
    /// MainNet settings.
    pub fn mainnet() -> Self {
        Self {
            network: NetworkType::MainNet.magic(),
            address_version: NetworkType::MainNet.address_version(),
            ms_per_block: MILLISECONDS_PER_BLOCK,
            max_traceable_blocks: 2_102_400,
            max_valid_until_block_increment: 5760,
            validators_count: 7,
        }
    }

    /// TestNet settings.
    pub fn testnet() -> Self {
        Self {
            network: NetworkType::TestNet.magic(),
            ..Self::mainnet()
        }
    }

    /// Private-net settings for development and tests.
    pub fn private() -> Self {
        Self {
            network: NetworkType::Private.magic(),
            validators_count: 1,
            ..Self::mainnet()
        }
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self::testnet()
    }
}

/// P2P protocol-handler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Lowest protocol version accepted during handshake.
    pub min_protocol_version: u32,
    /// Protocol version advertised in our Version message.
    pub protocol_version: u32,
    /// User agent advertised in our Version message.
    pub user_agent: String,
    /// Local P2P listen port advertised during handshake.
    pub local_port: u16,
    /// Cap on headers served per GetHeaders response.
    pub max_headers_per_message: u32,
    /// Cap on inventory entries served per GetBlocks response.
    pub max_blocks_per_inv: u32,
    /// Cap on blocks served per GetBlockByIndex request.
    pub max_blocks_per_message: u32,
    /// Cap on endpoints served per GetAddr response.
    pub max_addresses_per_message: usize,
    /// Cap on transaction hashes announced per Mempool response.
    pub max_mempool_inv: usize,
    /// How long a pending block request stays exclusive.
    pub block_request_timeout_secs: u64,
    /// How long a pending transaction request stays exclusive.
    pub tx_request_timeout_secs: u64,
    /// Retry cap for block requests answered with NotFound.
    pub max_block_retries: u32,
    /// Retry cap for transaction requests answered with NotFound.
    pub max_tx_retries: u32,
    /// Interval between keepalive pings.
    pub ping_interval_secs: u64,
    /// Relayed blocks stamped further in the future than this are rejected.
    pub max_block_future_ms: u64,
}

impl NetworkConfig {
    /// Window during which a pending block request suppresses re-requests.
    pub fn block_request_timeout(&self) -> Duration {
        Duration::from_secs(self.block_request_timeout_secs)
    }

    /// Window during which a pending transaction request suppresses re-requests.
    pub fn tx_request_timeout(&self) -> Duration {
        Duration::from_secs(self.tx_request_timeout_secs)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            min_protocol_version: 0,
            protocol_version: 0,
            user_agent: concat!("/neoxide:", env!("CARGO_PKG_VERSION"), "/").to_string(),
            local_port: 10333,
            max_headers_per_message: 2000,
            max_blocks_per_inv: 500,
            max_blocks_per_message: 500,
            max_addresses_per_message: 1000,
            max_mempool_inv: 50_000,
            block_request_timeout_secs: 120,
            tx_request_timeout_secs: 60,
            max_block_retries: 3,
            max_tx_retries: 2,
            ping_interval_secs: 30,
            max_block_future_ms: 15_000,
        }
    }
}

/// RPC query-layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Port reported by `getversion`.
    pub port: u16,
    /// Idle lifetime of an iterator session before garbage collection.
    pub session_ttl_secs: u64,
    /// Maximum iterators held by one session.
    pub max_iterators_per_session: usize,
    /// Cap on items returned by one `traverseiterator` call.
    pub max_iterator_items: usize,
    /// Page size for `findstorage`.
    pub find_storage_page_size: usize,
    /// Gas ceiling for `invoke*` executions, in datoshi.
    pub max_gas_invoke: i64,
    /// Whether exception details are attached to internal errors.
    pub debug_errors: bool,
}

impl RpcConfig {
    /// Idle lifetime of an iterator session.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            port: 10332,
            session_ttl_secs: 60,
            max_iterators_per_session: 16,
            max_iterator_items: 1000,
            find_storage_page_size: 50,
            max_gas_invoke: 20_0000_0000,
            debug_errors: false,
        }
    }
}

/// Top-level node configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Chain selection and protocol constants.
    #[serde(default)]
    pub protocol: ProtocolSettings,
    /// P2P handler knobs.
    #[serde(default)]
    pub network: NetworkConfig,
    /// RPC knobs.
    #[serde(default)]
    pub rpc: RpcConfig,
}

impl NodeConfig {
    /// Parses a TOML document into a validated configuration.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.max_headers_per_message == 0 || self.network.max_headers_per_message > 2000
        {
            return Err(ConfigError::Invalid {
                reason: "max_headers_per_message must be in 1..=2000".into(),
            });
        }
        if self.rpc.max_iterator_items == 0 || self.rpc.max_iterator_items > 1000 {
            return Err(ConfigError::Invalid {
                reason: "max_iterator_items must be in 1..=1000".into(),
            });
        }
        if self.rpc.max_gas_invoke <= 0 {
            return Err(ConfigError::Invalid {
                reason: "max_gas_invoke must be positive".into(),
            });
        }
        Ok(())
    }
}
