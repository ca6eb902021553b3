//! Compound-type handlers. Every mutation routes through the reference
//! counter so edges are observed before the opcode completes.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::stack_item::{MapKey, StackItem, StackItemType};

/// VM maps reject keys larger than this many bytes.
pub const MAX_MAP_KEY_SIZE: usize = 64;

fn check_element_count(engine: &ExecutionEngine, count: usize) -> VmResult<()> {
    let limit = engine.limits().max_initial_element_count;
    if count > limit {
        return Err(VmError::limit_exceeded("element count", count, limit));
    }
    Ok(())
}

fn pop_map_key(engine: &mut ExecutionEngine) -> VmResult<MapKey> {
    let item = engine.pop()?;
    let key = MapKey::try_from(&item)?;
    if key.byte_len() > MAX_MAP_KEY_SIZE {
        return Err(VmError::limit_exceeded(
            "map key size",
            key.byte_len(),
            MAX_MAP_KEY_SIZE,
        ));
    }
    Ok(key)
}

/// Structs assigned into compounds are copied, not shared.
fn clone_if_struct(engine: &ExecutionEngine, item: StackItem) -> VmResult<StackItem> {
    match item {
        StackItem::Struct(handle) => engine
            .reference_counter()
            .clone_struct(handle, engine.limits()),
        other => Ok(other),
    }
}

/// `PACK`: pop a count, then that many items into a new array.
pub fn pack(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let count = engine.pop()?.to_usize()?;
    check_element_count(engine, count)?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(engine.pop()?);
    }
    let array = engine.reference_counter().new_array(items);
    engine.push(array)
}

/// `PACKSTRUCT`.
pub fn pack_struct(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let count = engine.pop()?.to_usize()?;
    check_element_count(engine, count)?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(engine.pop()?);
    }
    let item = engine.reference_counter().new_struct(items);
    engine.push(item)
}

/// `PACKMAP`: pop a count, then key/value pairs.
pub fn pack_map(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let count = engine.pop()?.to_usize()?;
    check_element_count(engine, count)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let key = pop_map_key(engine)?;
        let value = engine.pop()?;
        entries.push((key, value));
    }
    let map = engine.reference_counter().new_map(entries);
    engine.push(map)
}

/// `UNPACK`: spread a compound onto the stack, element zero on top,
/// followed by the element count.
pub fn unpack(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.pop()?;
    let rc = engine.reference_counter();
    match &item {
        StackItem::Array(handle) | StackItem::Struct(handle) => {
            let items = rc.seq_items(*handle)?;
            let count = items.len();
            for element in items.into_iter().rev() {
                engine.push(element)?;
            }
            engine.push(StackItem::from_int(count as u64))
        }
        StackItem::Map(handle) => {
            let entries = rc.map_entries(*handle)?;
            let count = entries.len();
            for (key, value) in entries.into_iter().rev() {
                engine.push(value)?;
                engine.push(key.to_stack_item())?;
            }
            engine.push(StackItem::from_int(count as u64))
        }
        other => Err(VmError::invalid_type(
            "Array, Struct or Map",
            other.item_type().to_string(),
        )),
    }
}

/// `NEWARRAY0`.
pub fn new_array0(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let array = engine.reference_counter().new_array(Vec::new());
    engine.push(array)
}

/// `NEWARRAY`: an array of nulls.
pub fn new_array(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let count = engine.pop()?.to_usize()?;
    check_element_count(engine, count)?;
    let array = engine
        .reference_counter()
        .new_array(vec![StackItem::Null; count]);
    engine.push(array)
}

/// `NEWARRAY_T`: an array of typed defaults.
pub fn new_array_t(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let item_type = StackItemType::from_byte(instruction.token_u8()?)?;
    let count = engine.pop()?.to_usize()?;
    check_element_count(engine, count)?;
    let default = match item_type {
        StackItemType::Boolean => StackItem::Boolean(false),
        StackItemType::Integer => StackItem::from_int(0),
        StackItemType::ByteString => StackItem::ByteString(Vec::new()),
        _ => StackItem::Null,
    };
    let array = engine.reference_counter().new_array(vec![default; count]);
    engine.push(array)
}

/// `NEWSTRUCT0`.
pub fn new_struct0(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.reference_counter().new_struct(Vec::new());
    engine.push(item)
}

/// `NEWSTRUCT`: a struct of nulls.
pub fn new_struct(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let count = engine.pop()?.to_usize()?;
    check_element_count(engine, count)?;
    let item = engine
        .reference_counter()
        .new_struct(vec![StackItem::Null; count]);
    engine.push(item)
}

/// `NEWMAP`.
pub fn new_map(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let map = engine.reference_counter().new_map(Vec::new());
    engine.push(map)
}

/// `SIZE`: element count of a compound or byte length of a span.
pub fn size(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.pop()?;
    let size = match &item {
        StackItem::ByteString(bytes) => bytes.len(),
        StackItem::Buffer(buffer) => buffer.len(),
        StackItem::Array(handle) | StackItem::Struct(handle) | StackItem::Map(handle) => {
            engine.reference_counter().item_count(*handle)?
        }
        other => {
            return Err(VmError::invalid_type(
                "sized item",
                other.item_type().to_string(),
            ))
        }
    };
    engine.push(StackItem::from_int(size as u64))
}

/// `HASKEY`: membership test for maps, index-range test for sequences and
/// spans.
pub fn has_key(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let key = engine.pop()?;
    let collection = engine.pop()?;
    let rc = engine.reference_counter();
    let result = match &collection {
        StackItem::Map(handle) => {
            let key = MapKey::try_from(&key)?;
            rc.map_contains(*handle, &key)?
        }
        StackItem::Array(handle) | StackItem::Struct(handle) => {
            let index = key.to_usize()?;
            index < rc.item_count(*handle)?
        }
        StackItem::ByteString(bytes) => key.to_usize()? < bytes.len(),
        StackItem::Buffer(buffer) => key.to_usize()? < buffer.len(),
        other => {
            return Err(VmError::invalid_type(
                "keyed collection",
                other.item_type().to_string(),
            ))
        }
    };
    engine.push(StackItem::Boolean(result))
}

/// `KEYS`: the map's keys as a new array.
pub fn keys(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.pop()?;
    let StackItem::Map(handle) = item else {
        return Err(VmError::invalid_type("Map", item.item_type().to_string()));
    };
    let rc = engine.reference_counter();
    let keys: Vec<StackItem> = rc
        .map_keys(handle)?
        .iter()
        .map(|k| k.to_stack_item())
        .collect();
    let array = rc.new_array(keys);
    engine.push(array)
}

/// `VALUES`: the values of a map or the elements of a sequence, as a new
/// array; struct values are copied.
pub fn values(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.pop()?;
    let rc = engine.reference_counter();
    let source = match &item {
        StackItem::Map(handle) => rc.map_values(*handle)?,
        StackItem::Array(handle) | StackItem::Struct(handle) => rc.seq_items(*handle)?,
        other => {
            return Err(VmError::invalid_type(
                "Array, Struct or Map",
                other.item_type().to_string(),
            ))
        }
    };
    let mut values = Vec::with_capacity(source.len());
    for value in source {
        values.push(clone_if_struct(engine, value)?);
    }
    let array = rc.new_array(values);
    engine.push(array)
}

/// `PICKITEM`: indexed or keyed element access.
pub fn pick_item(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let key = engine.pop()?;
    let collection = engine.pop()?;
    let rc = engine.reference_counter();
    let result = match &collection {
        StackItem::Array(handle) | StackItem::Struct(handle) => {
            rc.seq_get(*handle, key.to_usize()?)?
        }
        StackItem::Map(handle) => {
            let key = MapKey::try_from(&key)?;
            rc.map_get(*handle, &key)?
                .ok_or_else(|| VmError::invalid_operation("key not found in map"))?
        }
        StackItem::ByteString(bytes) => {
            let index = key.to_usize()?;
            let byte = bytes
                .get(index)
                .copied()
                .ok_or_else(|| VmError::index_out_of_range(index, bytes.len()))?;
            StackItem::from_int(byte)
        }
        StackItem::Buffer(buffer) => {
            let index = key.to_usize()?;
            let len = buffer.len();
            let byte = buffer.with(|bytes| bytes.get(index).copied());
            StackItem::from_int(byte.ok_or_else(|| VmError::index_out_of_range(index, len))?)
        }
        other => {
            return Err(VmError::invalid_type(
                "indexable collection",
                other.item_type().to_string(),
            ))
        }
    };
    engine.push(result)
}

/// `APPEND`: push an element onto an array or struct.
pub fn append(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.pop()?;
    let target = engine.pop()?;
    let handle = match &target {
        StackItem::Array(handle) | StackItem::Struct(handle) => *handle,
        other => {
            return Err(VmError::invalid_type(
                "Array or Struct",
                other.item_type().to_string(),
            ))
        }
    };
    let item = clone_if_struct(engine, item)?;
    engine.reference_counter().seq_append(handle, item)
}

/// `SETITEM`: indexed or keyed element write.
pub fn set_item(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let value = engine.pop()?;
    let key = engine.pop()?;
    let collection = engine.pop()?;
    let rc = engine.reference_counter();
    match &collection {
        StackItem::Array(handle) | StackItem::Struct(handle) => {
            let value = clone_if_struct(engine, value)?;
            rc.seq_set(*handle, key.to_usize()?, value)
        }
        StackItem::Map(handle) => {
            let key = MapKey::try_from(&key)?;
            if key.byte_len() > MAX_MAP_KEY_SIZE {
                return Err(VmError::limit_exceeded(
                    "map key size",
                    key.byte_len(),
                    MAX_MAP_KEY_SIZE,
                ));
            }
            let value = clone_if_struct(engine, value)?;
            rc.map_set(*handle, key, value)
        }
        StackItem::Buffer(buffer) => {
            let index = key.to_usize()?;
            let byte = value.to_int()?;
            let byte = num_traits::ToPrimitive::to_u8(&byte)
                .ok_or_else(|| VmError::invalid_operation("buffer element must be a byte"))?;
            let len = buffer.len();
            if index >= len {
                return Err(VmError::index_out_of_range(index, len));
            }
            buffer.with_mut(|bytes| bytes[index] = byte);
            Ok(())
        }
        other => Err(VmError::invalid_type(
            "writable collection",
            other.item_type().to_string(),
        )),
    }
}

/// `REVERSEITEMS`: reverse a sequence or a buffer in place.
pub fn reverse_items(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.pop()?;
    match &item {
        StackItem::Array(handle) | StackItem::Struct(handle) => {
            engine.reference_counter().seq_reverse(*handle)
        }
        StackItem::Buffer(buffer) => {
            buffer.with_mut(|bytes| bytes.reverse());
            Ok(())
        }
        other => Err(VmError::invalid_type(
            "Array, Struct or Buffer",
            other.item_type().to_string(),
        )),
    }
}

/// `REMOVE`: remove by index or key.
pub fn remove(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let key = engine.pop()?;
    let collection = engine.pop()?;
    let rc = engine.reference_counter();
    match &collection {
        StackItem::Array(handle) | StackItem::Struct(handle) => {
            rc.seq_remove(*handle, key.to_usize()?)?;
            Ok(())
        }
        StackItem::Map(handle) => {
            let key = MapKey::try_from(&key)?;
            rc.map_remove(*handle, &key)?;
            Ok(())
        }
        other => Err(VmError::invalid_type(
            "Array, Struct or Map",
            other.item_type().to_string(),
        )),
    }
}

/// `CLEARITEMS`.
pub fn clear_items(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.pop()?;
    match item.compound_handle() {
        Some(handle) => engine.reference_counter().clear_items(handle),
        None => Err(VmError::invalid_type(
            "compound item",
            item.item_type().to_string(),
        )),
    }
}

/// `POPITEM`: remove and push the last element of a sequence.
pub fn pop_item(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.pop()?;
    let handle = match &item {
        StackItem::Array(handle) | StackItem::Struct(handle) => *handle,
        other => {
            return Err(VmError::invalid_type(
                "Array or Struct",
                other.item_type().to_string(),
            ))
        }
    };
    let element = engine.reference_counter().seq_pop(handle)?;
    engine.push(element)
}
