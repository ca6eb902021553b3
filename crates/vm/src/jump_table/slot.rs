//! Slot handlers: static fields, locals and arguments.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::op_code::OpCode;

/// `INITSSLOT`: create the static-field slot.
pub fn init_static_slot(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let count = instruction.token_u8()? as usize;
    if count == 0 {
        return Err(VmError::invalid_operation("INITSSLOT with zero fields"));
    }
    let rc = engine.reference_counter();
    engine.current_context_mut()?.init_static_fields(count, rc)
}

/// `INITSLOT`: create locals and pop arguments.
pub fn init_slot(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let locals = instruction.token_u8_at(0)? as usize;
    let argument_count = instruction.token_u8_at(1)? as usize;
    if locals == 0 && argument_count == 0 {
        return Err(VmError::invalid_operation("INITSLOT with no slots"));
    }
    // The top of the stack becomes argument 0.
    let mut arguments = Vec::with_capacity(argument_count);
    for _ in 0..argument_count {
        arguments.push(engine.pop()?);
    }
    let rc = engine.reference_counter();
    engine
        .current_context_mut()?
        .init_slot(locals, arguments, rc)
}

fn numbered_index(opcode: OpCode, base: OpCode) -> usize {
    (opcode.as_byte() - base.as_byte()) as usize
}

/// `LDSFLD0` … `LDSFLD6`.
pub fn load_static_field_n(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let index = numbered_index(instruction.opcode, OpCode::LDSFLD0);
    let item = engine.current_context()?.load_static_field(index)?;
    engine.push(item)
}

/// `LDSFLD`.
pub fn load_static_field(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let index = instruction.token_u8()? as usize;
    let item = engine.current_context()?.load_static_field(index)?;
    engine.push(item)
}

/// `STSFLD0` … `STSFLD6`.
pub fn store_static_field_n(
    engine: &mut ExecutionEngine,
    instruction: &Instruction,
) -> VmResult<()> {
    let index = numbered_index(instruction.opcode, OpCode::STSFLD0);
    let item = engine.pop()?;
    engine.current_context_mut()?.store_static_field(index, item)
}

/// `STSFLD`.
pub fn store_static_field(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let index = instruction.token_u8()? as usize;
    let item = engine.pop()?;
    engine.current_context_mut()?.store_static_field(index, item)
}

/// `LDLOC0` … `LDLOC6`.
pub fn load_local_n(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let index = numbered_index(instruction.opcode, OpCode::LDLOC0);
    let item = engine.current_context()?.load_local(index)?;
    engine.push(item)
}

/// `LDLOC`.
pub fn load_local(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let index = instruction.token_u8()? as usize;
    let item = engine.current_context()?.load_local(index)?;
    engine.push(item)
}

/// `STLOC0` … `STLOC6`.
pub fn store_local_n(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let index = numbered_index(instruction.opcode, OpCode::STLOC0);
    let item = engine.pop()?;
    engine.current_context_mut()?.store_local(index, item)
}

/// `STLOC`.
pub fn store_local(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let index = instruction.token_u8()? as usize;
    let item = engine.pop()?;
    engine.current_context_mut()?.store_local(index, item)
}

/// `LDARG0` … `LDARG6`.
pub fn load_argument_n(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let index = numbered_index(instruction.opcode, OpCode::LDARG0);
    let item = engine.current_context()?.load_argument(index)?;
    engine.push(item)
}

/// `LDARG`.
pub fn load_argument(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let index = instruction.token_u8()? as usize;
    let item = engine.current_context()?.load_argument(index)?;
    engine.push(item)
}

/// `STARG0` … `STARG6`.
pub fn store_argument_n(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let index = numbered_index(instruction.opcode, OpCode::STARG0);
    let item = engine.pop()?;
    engine.current_context_mut()?.store_argument(index, item)
}

/// `STARG`.
pub fn store_argument(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let index = instruction.token_u8()? as usize;
    let item = engine.pop()?;
    engine.current_context_mut()?.store_argument(index, item)
}
