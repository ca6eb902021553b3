//! The VM's value universe.
//!
//! Primitive values live inline in the [`StackItem`] enum; compound values
//! (Array, Struct, Map) are handles into the engine's reference-counter
//! arena so that aliasing, identity equality and cycle reclamation behave
//! as the protocol requires.

pub mod stack_item_type;

pub use stack_item_type::StackItemType;

use crate::error::{VmError, VmResult};
use crate::script::Script;
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Integers are capped at 32 bytes of two's-complement.
pub const MAX_INTEGER_SIZE: usize = 32;

/// A handle into the compound arena owned by the reference counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompoundHandle(pub(crate) usize);

impl CompoundHandle {
    /// The arena slot index; stable for the item's lifetime.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A mutable byte buffer with identity semantics.
#[derive(Clone, Debug)]
pub struct BufferRef(Rc<RefCell<Vec<u8>>>);

impl BufferRef {
    /// Allocates a zero-filled buffer.
    pub fn zeroed(len: usize) -> Self {
        Self(Rc::new(RefCell::new(vec![0u8; len])))
    }

    /// Wraps existing bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Rc::new(RefCell::new(bytes)))
    }

    /// Buffer length.
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Copies the contents out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    /// Runs a closure over the contents.
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.0.borrow())
    }

    /// Runs a closure over the mutable contents.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }

    /// Identity comparison.
    pub fn same_buffer(&self, other: &BufferRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// A host-owned object surfaced to scripts as an opaque handle.
pub trait InteropObject: fmt::Debug {
    /// A short tag describing the object, used in errors and JSON output.
    fn interface_type(&self) -> &'static str;

    /// Downcasting support.
    fn as_any(&self) -> &dyn Any;
}

/// A code pointer: a script identity plus an instruction offset.
#[derive(Clone, Debug)]
pub struct Pointer {
    /// The script the pointer refers into.
    pub script: Script,
    /// Instruction offset.
    pub position: usize,
}

impl PartialEq for Pointer {
    fn eq(&self, other: &Self) -> bool {
        self.script.same_script(&other.script) && self.position == other.position
    }
}

impl Eq for Pointer {}

/// A value on the evaluation stack.
#[derive(Clone, Debug)]
pub enum StackItem {
    /// The absent value; all nulls are equal.
    Null,
    /// A boolean.
    Boolean(bool),
    /// An arbitrary-precision integer, ≤32 bytes two's-complement.
    Integer(BigInt),
    /// An immutable octet sequence.
    ByteString(Vec<u8>),
    /// A mutable octet sequence with identity semantics.
    Buffer(BufferRef),
    /// An ordered, mutable sequence (arena handle).
    Array(CompoundHandle),
    /// An ordered, mutable sequence with value semantics (arena handle).
    Struct(CompoundHandle),
    /// An insertion-ordered primitive-keyed map (arena handle).
    Map(CompoundHandle),
    /// A host-owned opaque object.
    InteropInterface(Rc<dyn InteropObject>),
    /// A code pointer.
    Pointer(Pointer),
}

impl StackItem {
    /// The canonical true value.
    pub fn true_value() -> Self {
        StackItem::Boolean(true)
    }

    /// The canonical false value.
    pub fn false_value() -> Self {
        StackItem::Boolean(false)
    }

    /// Creates an integer item.
    pub fn from_int<T: Into<BigInt>>(value: T) -> Self {
        StackItem::Integer(value.into())
    }

    /// Creates a byte-string item.
    pub fn from_bytes<T: Into<Vec<u8>>>(value: T) -> Self {
        StackItem::ByteString(value.into())
    }

    /// The item's type tag.
    pub fn item_type(&self) -> StackItemType {
        match self {
            StackItem::Null => StackItemType::Any,
            StackItem::Boolean(_) => StackItemType::Boolean,
            StackItem::Integer(_) => StackItemType::Integer,
            StackItem::ByteString(_) => StackItemType::ByteString,
            StackItem::Buffer(_) => StackItemType::Buffer,
            StackItem::Array(_) => StackItemType::Array,
            StackItem::Struct(_) => StackItemType::Struct,
            StackItem::Map(_) => StackItemType::Map,
            StackItem::InteropInterface(_) => StackItemType::InteropInterface,
            StackItem::Pointer(_) => StackItemType::Pointer,
        }
    }

    /// Whether this is the null item.
    pub fn is_null(&self) -> bool {
        matches!(self, StackItem::Null)
    }

    /// The compound handle, if this is a compound item.
    pub fn compound_handle(&self) -> Option<CompoundHandle> {
        match self {
            StackItem::Array(h) | StackItem::Struct(h) | StackItem::Map(h) => Some(*h),
            _ => None,
        }
    }

    /// Interprets the item as a boolean.
    pub fn to_bool(&self) -> VmResult<bool> {
        match self {
            StackItem::Null => Ok(false),
            StackItem::Boolean(b) => Ok(*b),
            StackItem::Integer(i) => Ok(!i.is_zero()),
            StackItem::ByteString(bytes) => {
                if bytes.len() > MAX_INTEGER_SIZE {
                    return Err(VmError::limit_exceeded(
                        "byte string interpreted as boolean",
                        bytes.len(),
                        MAX_INTEGER_SIZE,
                    ));
                }
                Ok(bytes.iter().any(|&b| b != 0))
            }
            StackItem::Buffer(_)
            | StackItem::Array(_)
            | StackItem::Struct(_)
            | StackItem::Map(_)
            | StackItem::InteropInterface(_)
            | StackItem::Pointer(_) => Ok(true),
        }
    }

    /// Interprets the item as an integer.
    pub fn to_int(&self) -> VmResult<BigInt> {
        match self {
            StackItem::Boolean(b) => Ok(BigInt::from(*b as u8)),
            StackItem::Integer(i) => Ok(i.clone()),
            StackItem::ByteString(bytes) => bytes_to_int(bytes),
            StackItem::Buffer(buffer) => buffer.with(bytes_to_int),
            other => Err(VmError::invalid_conversion(
                other.item_type().to_string(),
                "Integer",
            )),
        }
    }

    /// Interprets the item as an integer and narrows it to usize.
    pub fn to_usize(&self) -> VmResult<usize> {
        let value = self.to_int()?;
        value
            .to_usize()
            .ok_or_else(|| VmError::index_out_of_range(value, usize::MAX))
    }

    /// Interprets the item as bytes.
    pub fn to_byte_slice(&self) -> VmResult<Vec<u8>> {
        match self {
            StackItem::ByteString(bytes) => Ok(bytes.clone()),
            StackItem::Buffer(buffer) => Ok(buffer.to_vec()),
            StackItem::Integer(i) => Ok(int_to_bytes(i)),
            StackItem::Boolean(b) => Ok(vec![*b as u8]),
            other => Err(VmError::invalid_conversion(
                other.item_type().to_string(),
                "ByteString",
            )),
        }
    }

    /// Downcasts an interop interface to a concrete type.
    pub fn as_interop<T: 'static>(&self) -> VmResult<&T> {
        match self {
            StackItem::InteropInterface(object) => {
                object.as_any().downcast_ref::<T>().ok_or_else(|| {
                    VmError::invalid_type("interop interface", object.interface_type())
                })
            }
            other => Err(VmError::invalid_type(
                "InteropInterface",
                other.item_type().to_string(),
            )),
        }
    }
}

/// Decodes a little-endian two's-complement integer, capped at 32 bytes.
pub fn bytes_to_int(bytes: &[u8]) -> VmResult<BigInt> {
    if bytes.len() > MAX_INTEGER_SIZE {
        return Err(VmError::limit_exceeded(
            "byte string interpreted as integer",
            bytes.len(),
            MAX_INTEGER_SIZE,
        ));
    }
    Ok(BigInt::from_signed_bytes_le(bytes))
}

/// Encodes an integer as its shortest little-endian two's-complement form.
pub fn int_to_bytes(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        return Vec::new();
    }
    value.to_signed_bytes_le()
}

/// Checks an arithmetic result against the 32-byte cap.
pub fn check_integer_size(value: &BigInt, operation: &'static str) -> VmResult<()> {
    // Zero encodes to zero bytes; everything else must fit in 32.
    if !value.is_zero() && value.to_signed_bytes_le().len() > MAX_INTEGER_SIZE {
        return Err(VmError::IntegerOverflow { operation });
    }
    Ok(())
}

/// The size in bytes an item contributes to comparison budgets.
pub fn comparable_size(item: &StackItem) -> usize {
    match item {
        StackItem::Null => 0,
        StackItem::Boolean(_) => 1,
        StackItem::Integer(i) => i.magnitude().to_bytes_le().len().max(1),
        StackItem::ByteString(bytes) => bytes.len(),
        StackItem::Buffer(buffer) => buffer.len(),
        _ => std::mem::size_of::<usize>(),
    }
}

/// A map key: the primitive subset of stack items, hashable and ordered by
/// insertion in the owning map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    /// Boolean key.
    Boolean(bool),
    /// Integer key.
    Integer(BigInt),
    /// Byte-string key.
    ByteString(Vec<u8>),
}

impl MapKey {
    /// Converts a key back to a stack item.
    pub fn to_stack_item(&self) -> StackItem {
        match self {
            MapKey::Boolean(b) => StackItem::Boolean(*b),
            MapKey::Integer(i) => StackItem::Integer(i.clone()),
            MapKey::ByteString(bytes) => StackItem::ByteString(bytes.clone()),
        }
    }

    /// Size contribution toward comparison and key-size limits.
    pub fn byte_len(&self) -> usize {
        match self {
            MapKey::Boolean(_) => 1,
            MapKey::Integer(i) => i.magnitude().to_bytes_le().len().max(1),
            MapKey::ByteString(bytes) => bytes.len(),
        }
    }
}

impl TryFrom<&StackItem> for MapKey {
    type Error = VmError;

    fn try_from(item: &StackItem) -> Result<Self, Self::Error> {
        match item {
            StackItem::Boolean(b) => Ok(MapKey::Boolean(*b)),
            StackItem::Integer(i) => Ok(MapKey::Integer(i.clone())),
            StackItem::ByteString(bytes) => Ok(MapKey::ByteString(bytes.clone())),
            other => Err(VmError::invalid_type(
                "primitive map key",
                other.item_type().to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_interpretation() {
        assert!(!StackItem::Null.to_bool().unwrap());
        assert!(StackItem::from_int(5).to_bool().unwrap());
        assert!(!StackItem::from_int(0).to_bool().unwrap());
        assert!(StackItem::from_bytes(vec![0, 0, 1]).to_bool().unwrap());
        assert!(!StackItem::from_bytes(vec![0, 0, 0]).to_bool().unwrap());
        assert!(StackItem::Buffer(BufferRef::zeroed(4)).to_bool().unwrap());
        assert!(StackItem::from_bytes(vec![0u8; 33]).to_bool().is_err());
    }

    #[test]
    fn test_integer_byte_round_trip() {
        for value in [0i64, 1, -1, 127, 128, -128, -129, 255, 256, i64::MAX, i64::MIN] {
            let big = BigInt::from(value);
            let bytes = int_to_bytes(&big);
            assert_eq!(bytes_to_int(&bytes).unwrap(), big);
        }
    }

    #[test]
    fn test_integer_size_cap() {
        let max = BigInt::from(1u8) << 255;
        assert!(check_integer_size(&(max.clone() - 1u8), "test").is_ok());
        assert!(check_integer_size(&max, "test").is_err());
        let min = -(BigInt::from(1u8) << 255);
        assert!(check_integer_size(&min, "test").is_ok());
        assert!(check_integer_size(&(min - 1u8), "test").is_err());
    }

    #[test]
    fn test_buffer_identity() {
        let a = BufferRef::from_bytes(vec![1, 2, 3]);
        let b = BufferRef::from_bytes(vec![1, 2, 3]);
        assert!(!a.same_buffer(&b));
        assert!(a.same_buffer(&a.clone()));
        a.with_mut(|bytes| bytes[0] = 9);
        assert_eq!(a.to_vec(), vec![9, 2, 3]);
        assert_eq!(b.to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn test_map_key_rejects_non_primitives() {
        assert!(MapKey::try_from(&StackItem::Null).is_err());
        assert!(MapKey::try_from(&StackItem::Buffer(BufferRef::zeroed(1))).is_err());
        assert!(MapKey::try_from(&StackItem::from_int(7)).is_ok());
    }

    #[test]
    fn test_pointer_equality_by_script_identity() {
        let script = Script::new(vec![0x11, 0x40]);
        let a = Pointer {
            script: script.clone(),
            position: 0,
        };
        let b = Pointer {
            script: script.clone(),
            position: 0,
        };
        let c = Pointer {
            script: Script::new(vec![0x11, 0x40]),
            position: 0,
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
