//! Binary serialization of stack items.
//!
//! Used by storage interop and by hosts that persist items. Compounds are
//! walked iteratively; cyclic graphs are rejected.

use crate::error::{VmError, VmResult};
use crate::jump_table::compound::MAX_MAP_KEY_SIZE;
use crate::limits::ExecutionEngineLimits;
use crate::reference_counter::ReferenceCounter;
use crate::stack_item::{CompoundHandle, MapKey, StackItem, StackItemType};
use num_bigint::BigInt;
use std::collections::HashSet;

fn write_var_len(out: &mut Vec<u8>, value: usize) {
    if value < 0xfd {
        out.push(value as u8);
    } else if value <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else {
        out.push(0xfe);
        out.extend_from_slice(&(value as u32).to_le_bytes());
    }
}

fn read_var_len(bytes: &[u8], pos: &mut usize, max: usize) -> VmResult<usize> {
    let first = *bytes
        .get(*pos)
        .ok_or_else(|| VmError::parse("unexpected end of serialized item"))?;
    *pos += 1;
    let value = match first {
        0xfd => {
            let slice = bytes
                .get(*pos..*pos + 2)
                .ok_or_else(|| VmError::parse("unexpected end of serialized item"))?;
            *pos += 2;
            u16::from_le_bytes([slice[0], slice[1]]) as usize
        }
        0xfe => {
            let slice = bytes
                .get(*pos..*pos + 4)
                .ok_or_else(|| VmError::parse("unexpected end of serialized item"))?;
            *pos += 4;
            u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]) as usize
        }
        0xff => return Err(VmError::parse("length prefix too wide")),
        value => value as usize,
    };
    if value > max {
        return Err(VmError::limit_exceeded("serialized length", value, max));
    }
    Ok(value)
}

fn read_bytes<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> VmResult<&'a [u8]> {
    let slice = bytes
        .get(*pos..*pos + len)
        .ok_or_else(|| VmError::parse("unexpected end of serialized item"))?;
    *pos += len;
    Ok(slice)
}

/// Serializes a stack item. Buffers serialize as their bytes; interop
/// interfaces and pointers are not serializable.
pub fn serialize_item(
    item: &StackItem,
    rc: &ReferenceCounter,
    limits: &ExecutionEngineLimits,
) -> VmResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut queue: Vec<StackItem> = vec![item.clone()];
    let mut seen: HashSet<CompoundHandle> = HashSet::new();

    while let Some(current) = queue.pop() {
        match &current {
            StackItem::Null => out.push(StackItemType::Any.as_byte()),
            StackItem::Boolean(value) => {
                out.push(StackItemType::Boolean.as_byte());
                out.push(*value as u8);
            }
            StackItem::Integer(value) => {
                out.push(StackItemType::Integer.as_byte());
                let bytes = crate::stack_item::int_to_bytes(value);
                write_var_len(&mut out, bytes.len());
                out.extend_from_slice(&bytes);
            }
            StackItem::ByteString(bytes) => {
                out.push(StackItemType::ByteString.as_byte());
                write_var_len(&mut out, bytes.len());
                out.extend_from_slice(bytes);
            }
            StackItem::Buffer(buffer) => {
                out.push(StackItemType::Buffer.as_byte());
                let bytes = buffer.to_vec();
                write_var_len(&mut out, bytes.len());
                out.extend_from_slice(&bytes);
            }
            StackItem::Array(handle) | StackItem::Struct(handle) => {
                if !seen.insert(*handle) {
                    return Err(VmError::invalid_operation(
                        "cannot serialize a cyclic item graph",
                    ));
                }
                let tag = if matches!(current, StackItem::Struct(_)) {
                    StackItemType::Struct
                } else {
                    StackItemType::Array
                };
                out.push(tag.as_byte());
                let items = rc.seq_items(*handle)?;
                write_var_len(&mut out, items.len());
                // Elements serialize in order; the queue is LIFO.
                for element in items.into_iter().rev() {
                    queue.push(element);
                }
            }
            StackItem::Map(handle) => {
                if !seen.insert(*handle) {
                    return Err(VmError::invalid_operation(
                        "cannot serialize a cyclic item graph",
                    ));
                }
                out.push(StackItemType::Map.as_byte());
                let entries = rc.map_entries(*handle)?;
                write_var_len(&mut out, entries.len());
                for (key, value) in entries.into_iter().rev() {
                    queue.push(value);
                    queue.push(key.to_stack_item());
                }
            }
            StackItem::InteropInterface(_) | StackItem::Pointer(_) => {
                return Err(VmError::invalid_operation(format!(
                    "{} is not serializable",
                    current.item_type()
                )))
            }
        }
        if out.len() > limits.max_item_size {
            return Err(VmError::limit_exceeded(
                "serialized item size",
                out.len(),
                limits.max_item_size,
            ));
        }
    }
    Ok(out)
}

enum Frame {
    Sequence {
        handle: CompoundHandle,
        remaining: usize,
    },
    Map {
        handle: CompoundHandle,
        remaining: usize,
        pending_key: Option<MapKey>,
    },
}

/// Deserializes a stack item produced by [`serialize_item`].
pub fn deserialize_item(
    bytes: &[u8],
    rc: &ReferenceCounter,
    limits: &ExecutionEngineLimits,
) -> VmResult<StackItem> {
    if bytes.len() > limits.max_item_size {
        return Err(VmError::limit_exceeded(
            "serialized item size",
            bytes.len(),
            limits.max_item_size,
        ));
    }
    let mut pos = 0usize;
    let mut frames: Vec<Frame> = Vec::new();

    loop {
        // Decode the next atom or open a new compound.
        let tag_byte = *bytes
            .get(pos)
            .ok_or_else(|| VmError::parse("unexpected end of serialized item"))?;
        pos += 1;
        let tag = StackItemType::from_byte(tag_byte)?;

        let produced: Option<StackItem> = match tag {
            StackItemType::Any => Some(StackItem::Null),
            StackItemType::Boolean => {
                let value = read_bytes(bytes, &mut pos, 1)?[0];
                Some(StackItem::Boolean(value != 0))
            }
            StackItemType::Integer => {
                let len = read_var_len(bytes, &mut pos, crate::stack_item::MAX_INTEGER_SIZE)?;
                let data = read_bytes(bytes, &mut pos, len)?;
                Some(StackItem::Integer(BigInt::from_signed_bytes_le(data)))
            }
            StackItemType::ByteString => {
                let len = read_var_len(bytes, &mut pos, limits.max_item_size)?;
                let data = read_bytes(bytes, &mut pos, len)?;
                Some(StackItem::ByteString(data.to_vec()))
            }
            StackItemType::Buffer => {
                let len = read_var_len(bytes, &mut pos, limits.max_item_size)?;
                let data = read_bytes(bytes, &mut pos, len)?;
                Some(StackItem::Buffer(crate::stack_item::BufferRef::from_bytes(
                    data.to_vec(),
                )))
            }
            StackItemType::Array | StackItemType::Struct => {
                let len = read_var_len(bytes, &mut pos, limits.max_initial_element_count)?;
                let item = if tag == StackItemType::Struct {
                    rc.new_struct(Vec::new())
                } else {
                    rc.new_array(Vec::new())
                };
                let handle = item.compound_handle().expect("just allocated");
                if len == 0 {
                    Some(item)
                } else {
                    frames.push(Frame::Sequence {
                        handle,
                        remaining: len,
                    });
                    None
                }
            }
            StackItemType::Map => {
                let len = read_var_len(bytes, &mut pos, limits.max_initial_element_count)?;
                let item = rc.new_map(Vec::new());
                let handle = item.compound_handle().expect("just allocated");
                if len == 0 {
                    Some(item)
                } else {
                    frames.push(Frame::Map {
                        handle,
                        remaining: len,
                        pending_key: None,
                    });
                    None
                }
            }
            StackItemType::Pointer | StackItemType::InteropInterface => {
                return Err(VmError::parse("unserializable type in payload"))
            }
        };

        let Some(mut item) = produced else {
            continue;
        };

        // Deliver the finished item upward through the open frames.
        loop {
            match frames.pop() {
                None => {
                    if pos != bytes.len() {
                        return Err(VmError::parse("trailing bytes after serialized item"));
                    }
                    return Ok(item);
                }
                Some(Frame::Sequence { handle, remaining }) => {
                    rc.seq_append(handle, item)?;
                    if remaining > 1 {
                        frames.push(Frame::Sequence {
                            handle,
                            remaining: remaining - 1,
                        });
                        break;
                    }
                    item = if rc.is_struct(handle) {
                        StackItem::Struct(handle)
                    } else {
                        StackItem::Array(handle)
                    };
                }
                Some(Frame::Map {
                    handle,
                    remaining,
                    pending_key: None,
                }) => {
                    let key = MapKey::try_from(&item)?;
                    if key.byte_len() > MAX_MAP_KEY_SIZE {
                        return Err(VmError::limit_exceeded(
                            "map key size",
                            key.byte_len(),
                            MAX_MAP_KEY_SIZE,
                        ));
                    }
                    frames.push(Frame::Map {
                        handle,
                        remaining,
                        pending_key: Some(key),
                    });
                    break;
                }
                Some(Frame::Map {
                    handle,
                    remaining,
                    pending_key: Some(key),
                }) => {
                    rc.map_set(handle, key, item)?;
                    if remaining > 1 {
                        frames.push(Frame::Map {
                            handle,
                            remaining: remaining - 1,
                            pending_key: None,
                        });
                        break;
                    }
                    item = StackItem::Map(handle);
                }
            }
        }
    }
}
