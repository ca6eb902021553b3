//! Splice handlers: buffers and byte-string slicing.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::stack_item::{BufferRef, StackItem};

/// Pops a byte span: only ByteString and Buffer qualify.
fn pop_span(engine: &mut ExecutionEngine) -> VmResult<Vec<u8>> {
    let item = engine.pop()?;
    match &item {
        StackItem::ByteString(bytes) => Ok(bytes.clone()),
        StackItem::Buffer(buffer) => Ok(buffer.to_vec()),
        other => Err(VmError::invalid_type(
            "ByteString or Buffer",
            other.item_type().to_string(),
        )),
    }
}

/// `NEWBUFFER`: allocate a zero-filled buffer of the popped size.
pub fn new_buffer(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let size = engine.pop()?.to_usize()?;
    if size > engine.limits().max_item_size {
        return Err(VmError::limit_exceeded(
            "buffer size",
            size,
            engine.limits().max_item_size,
        ));
    }
    engine.push(StackItem::Buffer(BufferRef::zeroed(size)))
}

/// `MEMCPY`: copy a range from a span into a buffer.
pub fn memcpy(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let count = engine.pop()?.to_usize()?;
    let source_index = engine.pop()?.to_usize()?;
    let source = pop_span(engine)?;
    let destination_index = engine.pop()?.to_usize()?;
    let destination_item = engine.pop()?;
    let StackItem::Buffer(destination) = destination_item else {
        return Err(VmError::invalid_type(
            "Buffer",
            destination_item.item_type().to_string(),
        ));
    };

    if source_index.checked_add(count).map_or(true, |end| end > source.len()) {
        return Err(VmError::index_out_of_range(source_index + count, source.len()));
    }
    let dest_len = destination.len();
    if destination_index
        .checked_add(count)
        .map_or(true, |end| end > dest_len)
    {
        return Err(VmError::index_out_of_range(destination_index + count, dest_len));
    }
    destination.with_mut(|bytes| {
        bytes[destination_index..destination_index + count]
            .copy_from_slice(&source[source_index..source_index + count]);
    });
    Ok(())
}

/// `CAT`: concatenate two spans into a buffer.
pub fn cat(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let right = pop_span(engine)?;
    let left = pop_span(engine)?;
    let total = left.len() + right.len();
    if total > engine.limits().max_item_size {
        return Err(VmError::limit_exceeded(
            "item size",
            total,
            engine.limits().max_item_size,
        ));
    }
    let mut result = left;
    result.extend_from_slice(&right);
    engine.push(StackItem::Buffer(BufferRef::from_bytes(result)))
}

/// `SUBSTR`: a range of a span as a buffer.
pub fn substr(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let count = engine.pop()?.to_usize()?;
    let index = engine.pop()?.to_usize()?;
    let source = pop_span(engine)?;
    if index.checked_add(count).map_or(true, |end| end > source.len()) {
        return Err(VmError::index_out_of_range(index + count, source.len()));
    }
    engine.push(StackItem::Buffer(BufferRef::from_bytes(
        source[index..index + count].to_vec(),
    )))
}

/// `LEFT`: the first `count` bytes of a span.
pub fn left(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let count = engine.pop()?.to_usize()?;
    let source = pop_span(engine)?;
    if count > source.len() {
        return Err(VmError::index_out_of_range(count, source.len()));
    }
    engine.push(StackItem::Buffer(BufferRef::from_bytes(
        source[..count].to_vec(),
    )))
}

/// `RIGHT`: the last `count` bytes of a span.
pub fn right(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let count = engine.pop()?.to_usize()?;
    let source = pop_span(engine)?;
    if count > source.len() {
        return Err(VmError::index_out_of_range(count, source.len()));
    }
    engine.push(StackItem::Buffer(BufferRef::from_bytes(
        source[source.len() - count..].to_vec(),
    )))
}
