//! 256-bit block and transaction hash.

use crate::error::{CoreError, CoreResult};
use neoxide_io::{BinaryWriter, IoResult, MemoryReader, Serializable};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The length of a UInt256 in bytes.
pub const UINT256_SIZE: usize = 32;

/// A 256-bit hash, stored little-endian as on the wire. The textual form is
/// `0x`-prefixed big-endian hex.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UInt256([u8; UINT256_SIZE]);

impl UInt256 {
    /// The all-zero value.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Whether every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Wraps a little-endian byte array.
    pub fn from_bytes(bytes: [u8; UINT256_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parses a little-endian byte slice.
    pub fn from_slice(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != UINT256_SIZE {
            return Err(CoreError::invalid_format(format!(
                "UInt256 requires {UINT256_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; UINT256_SIZE];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// The little-endian wire representation.
    pub fn as_bytes(&self) -> &[u8; UINT256_SIZE] {
        &self.0
    }

    /// Renders the canonical `0x`-prefixed big-endian hex form.
    pub fn to_hex_string(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        format!("0x{}", hex::encode(reversed))
    }

    /// Parses the textual form, accepting an optional `0x` prefix.
    pub fn parse(value: &str) -> CoreResult<Self> {
        let trimmed = value.strip_prefix("0x").unwrap_or(value);
        if trimmed.len() != UINT256_SIZE * 2 {
            return Err(CoreError::invalid_format(format!(
                "UInt256 hex requires {} characters, got {}",
                UINT256_SIZE * 2,
                trimmed.len()
            )));
        }
        let mut bytes = hex::decode(trimmed)
            .map_err(|e| CoreError::invalid_format(format!("invalid hex: {e}")))?;
        bytes.reverse();
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_string())
    }
}

impl fmt::Debug for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UInt256({})", self.to_hex_string())
    }
}

impl FromStr for UInt256 {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serializable for UInt256 {
    fn size(&self) -> usize {
        UINT256_SIZE
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_bytes(&self.0);
        Ok(())
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        Ok(Self(reader.read_fixed::<UINT256_SIZE>()?))
    }
}

impl Serialize for UInt256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex_string())
    }
}

impl<'de> Deserialize<'de> for UInt256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(D::Error::custom)
    }
}
