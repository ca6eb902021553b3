//! Wire identifiers for stack-item types.

use crate::error::{VmError, VmResult};
use std::fmt;

/// The type tag of a stack item, as used by `ISTYPE`, `CONVERT` and the
/// binary serializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StackItemType {
    /// The null placeholder type.
    Any = 0x00,
    /// A code pointer.
    Pointer = 0x10,
    /// A boolean.
    Boolean = 0x20,
    /// A signed arbitrary-precision integer.
    Integer = 0x21,
    /// An immutable byte string.
    ByteString = 0x28,
    /// A mutable byte buffer.
    Buffer = 0x30,
    /// An ordered list of items.
    Array = 0x40,
    /// An ordered list with value semantics.
    Struct = 0x41,
    /// An insertion-ordered map with primitive keys.
    Map = 0x48,
    /// A host-owned opaque object.
    InteropInterface = 0x60,
}

impl StackItemType {
    /// Decodes a type byte.
    pub fn from_byte(byte: u8) -> VmResult<Self> {
        match byte {
            0x00 => Ok(Self::Any),
            0x10 => Ok(Self::Pointer),
            0x20 => Ok(Self::Boolean),
            0x21 => Ok(Self::Integer),
            0x28 => Ok(Self::ByteString),
            0x30 => Ok(Self::Buffer),
            0x40 => Ok(Self::Array),
            0x41 => Ok(Self::Struct),
            0x48 => Ok(Self::Map),
            0x60 => Ok(Self::InteropInterface),
            other => Err(VmError::parse(format!(
                "invalid stack item type byte {other:#04x}"
            ))),
        }
    }

    /// The type byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether map keys of this type are allowed.
    pub fn is_primitive(self) -> bool {
        matches!(self, Self::Boolean | Self::Integer | Self::ByteString)
    }

    /// Whether items of this type live in the compound arena.
    pub fn is_compound(self) -> bool {
        matches!(self, Self::Array | Self::Struct | Self::Map)
    }
}

impl fmt::Display for StackItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for tag in [
            StackItemType::Any,
            StackItemType::Pointer,
            StackItemType::Boolean,
            StackItemType::Integer,
            StackItemType::ByteString,
            StackItemType::Buffer,
            StackItemType::Array,
            StackItemType::Struct,
            StackItemType::Map,
            StackItemType::InteropInterface,
        ] {
            assert_eq!(StackItemType::from_byte(tag.as_byte()).unwrap(), tag);
        }
        assert!(StackItemType::from_byte(0x42).is_err());
    }

    #[test]
    fn test_classification() {
        assert!(StackItemType::Integer.is_primitive());
        assert!(!StackItemType::Buffer.is_primitive());
        assert!(StackItemType::Map.is_compound());
        assert!(!StackItemType::Pointer.is_compound());
    }
}
