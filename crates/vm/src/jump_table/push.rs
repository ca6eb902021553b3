//! Push-family handlers.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::op_code::OpCode;
use crate::stack_item::{Pointer, StackItem};
use num_bigint::BigInt;

/// `PUSHINT8` … `PUSHINT256`: a signed little-endian literal.
pub fn push_int(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let value = BigInt::from_signed_bytes_le(&instruction.operand);
    engine.push(StackItem::Integer(value))
}

/// `PUSHT`.
pub fn push_true(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.push(StackItem::Boolean(true))
}

/// `PUSHF`.
pub fn push_false(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.push(StackItem::Boolean(false))
}

/// `PUSHNULL`.
pub fn push_null(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.push(StackItem::Null)
}

/// `PUSHA`: a pointer into the current script.
pub fn push_a(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let offset = instruction.token_i32()? as i64;
    let script = engine.current_context()?.script().clone();
    let target = instruction.pointer as i64 + offset;
    if target < 0 || target > script.len() as i64 {
        return Err(VmError::invalid_operation(format!(
            "PUSHA target {target} is outside the script"
        )));
    }
    engine.push(StackItem::Pointer(Pointer {
        script,
        position: target as usize,
    }))
}

/// `PUSHDATA1/2/4`: a byte-string literal.
pub fn push_data(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let limit = engine.limits().max_item_size;
    if instruction.operand.len() > limit {
        return Err(VmError::limit_exceeded(
            "item size",
            instruction.operand.len(),
            limit,
        ));
    }
    engine.push(StackItem::ByteString(instruction.operand.to_vec()))
}

/// `PUSHM1`, `PUSH0` … `PUSH16`.
pub fn push_small_int(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let value = instruction.opcode.as_byte() as i32 - OpCode::PUSH0.as_byte() as i32;
    engine.push(StackItem::from_int(value))
}
