//! Type-introspection and conversion handlers.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::stack_item::{BufferRef, StackItem, StackItemType};

/// `ISNULL`.
pub fn is_null(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.pop()?;
    engine.push(StackItem::Boolean(item.is_null()))
}

/// `ISTYPE`: exact type test; `Any` is not a valid operand.
pub fn is_type(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = StackItemType::from_byte(instruction.token_u8()?)?;
    if target == StackItemType::Any {
        return Err(VmError::invalid_operation("ISTYPE with type Any"));
    }
    let item = engine.pop()?;
    engine.push(StackItem::Boolean(item.item_type() == target))
}

/// `CONVERT`: the information-preserving conversion matrix. Anything else
/// faults.
pub fn convert(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = StackItemType::from_byte(instruction.token_u8()?)?;
    let item = engine.pop()?;
    let source = item.item_type();

    if source == target {
        return engine.push(item);
    }

    let converted = match (&item, target) {
        // Boolean ↔ Integer ↔ ByteString, within the 32-byte cap.
        (
            StackItem::Boolean(_) | StackItem::Integer(_) | StackItem::ByteString(_),
            StackItemType::Boolean,
        ) => StackItem::Boolean(item.to_bool()?),
        (
            StackItem::Boolean(_) | StackItem::Integer(_) | StackItem::ByteString(_),
            StackItemType::Integer,
        ) => StackItem::Integer(item.to_int()?),
        (
            StackItem::Boolean(_) | StackItem::Integer(_) | StackItem::ByteString(_),
            StackItemType::ByteString,
        ) => StackItem::ByteString(item.to_byte_slice()?),

        // Buffer → ByteString and ByteString → Buffer copy the bytes.
        (StackItem::Buffer(buffer), StackItemType::ByteString) => {
            StackItem::ByteString(buffer.to_vec())
        }
        (StackItem::ByteString(bytes), StackItemType::Buffer) => {
            StackItem::Buffer(BufferRef::from_bytes(bytes.clone()))
        }

        _ => {
            return Err(VmError::invalid_conversion(
                source.to_string(),
                target.to_string(),
            ))
        }
    };
    engine.push(converted)
}
