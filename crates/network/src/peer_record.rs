//! Persisted peer-address records.
//!
//! Qualifying `Addr` entries are handed to the store under
//! `"PeerAddress:<addr>:<port>"` as a little-endian tuple
//! `(unix_timestamp u64, services u64, connected bool, attempts u32,
//! last_seen u64)`.

use neoxide_io::{BinaryWriter, IoResult, MemoryReader, Serializable};
use std::net::SocketAddr;

/// Key prefix for peer-address records.
pub const PEER_ADDRESS_PREFIX: &str = "PeerAddress:";

/// The stored record for one known peer endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddressRecord {
    /// Seconds since the Unix epoch when the peer advertised itself.
    pub timestamp: u64,
    /// Service bits.
    pub services: u64,
    /// Whether we are currently connected to the endpoint.
    pub connected: bool,
    /// Connection attempts made so far.
    pub attempts: u32,
    /// Seconds since the Unix epoch when the peer was last seen.
    pub last_seen: u64,
}

impl PeerAddressRecord {
    /// A fresh record for a newly-learned address.
    pub fn new(timestamp: u64, services: u64) -> Self {
        Self {
            timestamp,
            services,
            connected: false,
            attempts: 0,
            last_seen: timestamp,
        }
    }

    /// The storage key for an endpoint.
    pub fn key(endpoint: &SocketAddr) -> String {
        format!("{PEER_ADDRESS_PREFIX}{}:{}", endpoint.ip(), endpoint.port())
    }
}

impl Serializable for PeerAddressRecord {
    fn size(&self) -> usize {
        8 + 8 + 1 + 4 + 8
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_u64(self.timestamp);
        writer.write_u64(self.services);
        writer.write_bool(self.connected);
        writer.write_u32(self.attempts);
        writer.write_u64(self.last_seen);
        Ok(())
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        Ok(Self {
            timestamp: reader.read_u64()?,
            services: reader.read_u64()?,
            connected: reader.read_bool()?,
            attempts: reader.read_u32()?,
            last_seen: reader.read_u64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neoxide_io::SerializableExt;

    #[test]
    fn test_record_round_trip() {
        let record = PeerAddressRecord {
            timestamp: 1_700_000_000,
            services: 1,
            connected: true,
            attempts: 3,
            last_seen: 1_700_000_500,
        };
        let bytes = record.to_array().unwrap();
        assert_eq!(bytes.len(), 29);
        assert_eq!(PeerAddressRecord::from_array(&bytes).unwrap(), record);
    }

    #[test]
    fn test_key_format() {
        let endpoint: SocketAddr = "10.1.2.3:10333".parse().unwrap();
        assert_eq!(
            PeerAddressRecord::key(&endpoint),
            "PeerAddress:10.1.2.3:10333"
        );
    }
}
