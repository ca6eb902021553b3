//! Typed P2P messages and their wire codec.
//!
//! Frames are `magic(u32) ∥ command(u8) ∥ var-bytes payload`; payload
//! layouts follow the Neo N3 conventions through `neoxide-io`.

use crate::error::{NetworkError, NetworkResult};
use neoxide_core::{Block, BlockHeader, Transaction, UInt256};
use neoxide_io::{
    deserialize_vec, serialize_vec, BinaryWriter, IoError, IoResult, MemoryReader, Serializable,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

/// Upper bound on inventory vectors in one message.
pub const MAX_INV_ENTRIES: usize = 500;
/// Upper bound on address entries in one message.
pub const MAX_ADDR_ENTRIES: usize = 1000;
/// Upper bound on headers in one message.
pub const MAX_HEADERS_PER_MESSAGE: usize = 2000;
/// Upper bound on an encoded payload.
pub const MAX_PAYLOAD_SIZE: usize = 0x0200_0000;

/// Command tags on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageCommand {
    Version = 0x00,
    Verack = 0x01,
    GetAddr = 0x10,
    Addr = 0x11,
    Ping = 0x18,
    Pong = 0x19,
    GetHeaders = 0x20,
    Headers = 0x21,
    GetBlocks = 0x24,
    Mempool = 0x25,
    Inv = 0x27,
    GetData = 0x28,
    GetBlockByIndex = 0x29,
    NotFound = 0x2a,
    Transaction = 0x2b,
    Block = 0x2c,
    Reject = 0x2f,
}

impl MessageCommand {
    /// Decodes a command byte.
    pub fn from_byte(byte: u8) -> NetworkResult<Self> {
        Ok(match byte {
            0x00 => Self::Version,
            0x01 => Self::Verack,
            0x10 => Self::GetAddr,
            0x11 => Self::Addr,
            0x18 => Self::Ping,
            0x19 => Self::Pong,
            0x20 => Self::GetHeaders,
            0x21 => Self::Headers,
            0x24 => Self::GetBlocks,
            0x25 => Self::Mempool,
            0x27 => Self::Inv,
            0x28 => Self::GetData,
            0x29 => Self::GetBlockByIndex,
            0x2a => Self::NotFound,
            0x2b => Self::Transaction,
            0x2c => Self::Block,
            0x2f => Self::Reject,
            other => {
                return Err(NetworkError::invalid_payload(format!(
                    "unknown message command {other:#04x}"
                )))
            }
        })
    }
}

impl fmt::Display for MessageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// What an inventory entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum InventoryType {
    /// A transaction.
    Transaction = 0x2b,
    /// A block.
    Block = 0x2c,
}

/// A `(type, hash)` pair identifying an item for gossip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Item kind.
    pub inv_type: InventoryType,
    /// Item hash.
    pub hash: UInt256,
}

impl InventoryItem {
    /// A block inventory entry.
    pub fn block(hash: UInt256) -> Self {
        Self {
            inv_type: InventoryType::Block,
            hash,
        }
    }

    /// A transaction inventory entry.
    pub fn transaction(hash: UInt256) -> Self {
        Self {
            inv_type: InventoryType::Transaction,
            hash,
        }
    }
}

impl Serializable for InventoryItem {
    fn size(&self) -> usize {
        1 + 32
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_byte(self.inv_type as u8);
        Serializable::serialize(&self.hash, writer)
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let inv_type = match reader.read_byte()? {
            0x2b => InventoryType::Transaction,
            0x2c => InventoryType::Block,
            other => {
                return Err(IoError::invalid_data(
                    "inventory type",
                    format!("{other:#04x}"),
                ))
            }
        };
        Ok(Self {
            inv_type,
            hash: <UInt256 as Serializable>::deserialize(reader)?,
        })
    }
}

/// A peer endpoint advertised through `Addr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAddress {
    /// Seconds since the Unix epoch when the peer was last seen.
    pub timestamp: u64,
    /// Service bits.
    pub services: u64,
    /// The endpoint.
    pub endpoint: SocketAddr,
}

impl Serializable for NetworkAddress {
    fn size(&self) -> usize {
        8 + 8 + 16 + 2
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_u64(self.timestamp);
        writer.write_u64(self.services);
        let v6 = match self.endpoint.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        writer.write_bytes(&v6.octets());
        writer.write_u16(self.endpoint.port());
        Ok(())
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let timestamp = reader.read_u64()?;
        let services = reader.read_u64()?;
        let octets = reader.read_fixed::<16>()?;
        let port = reader.read_u16()?;
        let v6 = Ipv6Addr::from(octets);
        let ip = match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };
        Ok(Self {
            timestamp,
            services,
            endpoint: SocketAddr::new(ip, port),
        })
    }
}

/// The typed payloads the handler speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolMessage {
    /// Handshake opening.
    Version {
        /// Network magic of the sender's chain.
        magic: u32,
        /// Protocol version.
        version: u32,
        /// Service bits.
        services: u64,
        /// Sender clock, milliseconds since the Unix epoch.
        timestamp: u64,
        /// Listen port.
        port: u16,
        /// Random identity; detects self-connections.
        nonce: u32,
        /// Software identification.
        user_agent: String,
        /// Chain height at handshake time.
        start_height: u32,
        /// Whether the peer relays inventory.
        relay: bool,
    },
    /// Handshake acknowledgement.
    Verack,
    /// Request for known endpoints.
    GetAddr,
    /// Known endpoints.
    Addr { addresses: Vec<NetworkAddress> },
    /// Keepalive probe with an opaque payload the pong must echo.
    Ping { payload: [u8; 8] },
    /// Keepalive echo.
    Pong { payload: [u8; 8] },
    /// Request for headers after a block.
    GetHeaders { hash_start: UInt256, count: i16 },
    /// Headers response.
    Headers { headers: Vec<BlockHeader> },
    /// Request for block inventory after a block.
    GetBlocks { hash_start: UInt256, count: i16 },
    /// Request for the remote mempool inventory.
    Mempool,
    /// Inventory announcement.
    Inv { inventory: Vec<InventoryItem> },
    /// Request for announced items.
    GetData { inventory: Vec<InventoryItem> },
    /// Request for sequential blocks by height.
    GetBlockByIndex { index_start: u32, count: u16 },
    /// Items a `GetData` could not be served from.
    NotFound { inventory: Vec<InventoryItem> },
    /// A relayed transaction.
    Transaction { transaction: Transaction },
    /// A relayed block.
    Block { block: Block },
    /// An item was rejected.
    Reject { message: String, reason: String },
}

impl ProtocolMessage {
    /// The command tag for this payload.
    pub fn command(&self) -> MessageCommand {
        match self {
            ProtocolMessage::Version { .. } => MessageCommand::Version,
            ProtocolMessage::Verack => MessageCommand::Verack,
            ProtocolMessage::GetAddr => MessageCommand::GetAddr,
            ProtocolMessage::Addr { .. } => MessageCommand::Addr,
            ProtocolMessage::Ping { .. } => MessageCommand::Ping,
            ProtocolMessage::Pong { .. } => MessageCommand::Pong,
            ProtocolMessage::GetHeaders { .. } => MessageCommand::GetHeaders,
            ProtocolMessage::Headers { .. } => MessageCommand::Headers,
            ProtocolMessage::GetBlocks { .. } => MessageCommand::GetBlocks,
            ProtocolMessage::Mempool => MessageCommand::Mempool,
            ProtocolMessage::Inv { .. } => MessageCommand::Inv,
            ProtocolMessage::GetData { .. } => MessageCommand::GetData,
            ProtocolMessage::GetBlockByIndex { .. } => MessageCommand::GetBlockByIndex,
            ProtocolMessage::NotFound { .. } => MessageCommand::NotFound,
            ProtocolMessage::Transaction { .. } => MessageCommand::Transaction,
            ProtocolMessage::Block { .. } => MessageCommand::Block,
            ProtocolMessage::Reject { .. } => MessageCommand::Reject,
        }
    }

    fn serialize_payload(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        match self {
            ProtocolMessage::Version {
                magic,
                version,
                services,
                timestamp,
                port,
                nonce,
                user_agent,
                start_height,
                relay,
            } => {
                writer.write_u32(*magic);
                writer.write_u32(*version);
                writer.write_u64(*services);
                writer.write_u64(*timestamp);
                writer.write_u16(*port);
                writer.write_u32(*nonce);
                writer.write_var_string(user_agent);
                writer.write_u32(*start_height);
                writer.write_bool(*relay);
            }
            ProtocolMessage::Verack | ProtocolMessage::GetAddr | ProtocolMessage::Mempool => {}
            ProtocolMessage::Addr { addresses } => serialize_vec(addresses, writer)?,
            ProtocolMessage::Ping { payload } | ProtocolMessage::Pong { payload } => {
                writer.write_bytes(payload);
            }
            ProtocolMessage::GetHeaders { hash_start, count }
            | ProtocolMessage::GetBlocks { hash_start, count } => {
                Serializable::serialize(hash_start, writer)?;
                writer.write_i16(*count);
            }
            ProtocolMessage::Headers { headers } => serialize_vec(headers, writer)?,
            ProtocolMessage::Inv { inventory }
            | ProtocolMessage::GetData { inventory }
            | ProtocolMessage::NotFound { inventory } => serialize_vec(inventory, writer)?,
            ProtocolMessage::GetBlockByIndex { index_start, count } => {
                writer.write_u32(*index_start);
                writer.write_u16(*count);
            }
            ProtocolMessage::Transaction { transaction } => {
                Serializable::serialize(transaction, writer)?
            }
            ProtocolMessage::Block { block } => Serializable::serialize(block, writer)?,
            ProtocolMessage::Reject { message, reason } => {
                writer.write_var_string(message);
                writer.write_var_string(reason);
            }
        }
        Ok(())
    }

    fn deserialize_payload(
        command: MessageCommand,
        reader: &mut MemoryReader<'_>,
    ) -> IoResult<Self> {
        Ok(match command {
            MessageCommand::Version => ProtocolMessage::Version {
                magic: reader.read_u32()?,
                version: reader.read_u32()?,
                services: reader.read_u64()?,
                timestamp: reader.read_u64()?,
                port: reader.read_u16()?,
                nonce: reader.read_u32()?,
                user_agent: reader.read_var_string(1024)?,
                start_height: reader.read_u32()?,
                relay: reader.read_bool()?,
            },
            MessageCommand::Verack => ProtocolMessage::Verack,
            MessageCommand::GetAddr => ProtocolMessage::GetAddr,
            MessageCommand::Addr => ProtocolMessage::Addr {
                addresses: deserialize_vec(reader, MAX_ADDR_ENTRIES)?,
            },
            MessageCommand::Ping => ProtocolMessage::Ping {
                payload: reader.read_fixed::<8>()?,
            },
            MessageCommand::Pong => ProtocolMessage::Pong {
                payload: reader.read_fixed::<8>()?,
            },
            MessageCommand::GetHeaders => ProtocolMessage::GetHeaders {
                hash_start: <UInt256 as Serializable>::deserialize(reader)?,
                count: reader.read_i16()?,
            },
            MessageCommand::Headers => ProtocolMessage::Headers {
                headers: deserialize_vec(reader, MAX_HEADERS_PER_MESSAGE)?,
            },
            MessageCommand::GetBlocks => ProtocolMessage::GetBlocks {
                hash_start: <UInt256 as Serializable>::deserialize(reader)?,
                count: reader.read_i16()?,
            },
            MessageCommand::Mempool => ProtocolMessage::Mempool,
            MessageCommand::Inv => ProtocolMessage::Inv {
                inventory: deserialize_vec(reader, MAX_INV_ENTRIES)?,
            },
            MessageCommand::GetData => ProtocolMessage::GetData {
                inventory: deserialize_vec(reader, MAX_INV_ENTRIES)?,
            },
            MessageCommand::GetBlockByIndex => ProtocolMessage::GetBlockByIndex {
                index_start: reader.read_u32()?,
                count: reader.read_u16()?,
            },
            MessageCommand::NotFound => ProtocolMessage::NotFound {
                inventory: deserialize_vec(reader, MAX_INV_ENTRIES)?,
            },
            MessageCommand::Transaction => ProtocolMessage::Transaction {
                transaction: <Transaction as Serializable>::deserialize(reader)?,
            },
            MessageCommand::Block => ProtocolMessage::Block {
                block: <Block as Serializable>::deserialize(reader)?,
            },
            MessageCommand::Reject => ProtocolMessage::Reject {
                message: reader.read_var_string(256)?,
                reason: reader.read_var_string(1024)?,
            },
        })
    }
}

/// A framed message: magic, command and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Network magic of the chain the frame belongs to.
    pub magic: u32,
    /// The typed payload.
    pub payload: ProtocolMessage,
}

impl Message {
    /// Frames a payload for the given network.
    pub fn new(magic: u32, payload: ProtocolMessage) -> Self {
        Self { magic, payload }
    }

    /// The command tag.
    pub fn command(&self) -> MessageCommand {
        self.payload.command()
    }

    /// Encodes the frame.
    pub fn encode(&self) -> NetworkResult<Vec<u8>> {
        let mut payload_writer = BinaryWriter::new();
        self.payload.serialize_payload(&mut payload_writer)?;
        let payload = payload_writer.into_bytes();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(NetworkError::invalid_payload(format!(
                "payload of {} bytes exceeds the frame limit",
                payload.len()
            )));
        }
        let mut writer = BinaryWriter::with_capacity(payload.len() + 16);
        writer.write_u32(self.magic);
        writer.write_byte(self.command() as u8);
        writer.write_var_bytes(&payload);
        Ok(writer.into_bytes())
    }

    /// Decodes a frame.
    pub fn decode(bytes: &[u8]) -> NetworkResult<Self> {
        let mut reader = MemoryReader::new(bytes);
        let magic = reader.read_u32()?;
        let command = MessageCommand::from_byte(reader.read_byte()?)?;
        let payload_bytes = reader.read_var_bytes(MAX_PAYLOAD_SIZE)?;
        if reader.remaining() != 0 {
            return Err(NetworkError::invalid_payload("trailing bytes after frame"));
        }
        let mut payload_reader = MemoryReader::new(&payload_bytes);
        let payload = ProtocolMessage::deserialize_payload(command, &mut payload_reader)?;
        if payload_reader.remaining() != 0 {
            return Err(NetworkError::invalid_payload(
                "trailing bytes after payload",
            ));
        }
        Ok(Self { magic, payload })
    }
}
