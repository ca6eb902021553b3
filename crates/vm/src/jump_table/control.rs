//! Flow-control handlers.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::stack_item::StackItem;

fn short_target(instruction: &Instruction) -> VmResult<i64> {
    Ok(instruction.pointer as i64 + instruction.token_i8()? as i64)
}

fn long_target(instruction: &Instruction) -> VmResult<i64> {
    Ok(instruction.pointer as i64 + instruction.token_i32()? as i64)
}

/// `NOP`.
pub fn nop(_engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    Ok(())
}

/// `JMP`.
pub fn jmp(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    engine.execute_jump(short_target(instruction)?)
}

/// `JMP_L`.
pub fn jmp_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    engine.execute_jump(long_target(instruction)?)
}

fn jump_if(engine: &mut ExecutionEngine, target: i64, expected: bool) -> VmResult<()> {
    if engine.pop_bool()? == expected {
        engine.execute_jump(target)?;
    }
    Ok(())
}

/// `JMPIF`.
pub fn jmp_if(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = short_target(instruction)?;
    jump_if(engine, target, true)
}

/// `JMPIF_L`.
pub fn jmp_if_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = long_target(instruction)?;
    jump_if(engine, target, true)
}

/// `JMPIFNOT`.
pub fn jmp_if_not(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = short_target(instruction)?;
    jump_if(engine, target, false)
}

/// `JMPIFNOT_L`.
pub fn jmp_if_not_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = long_target(instruction)?;
    jump_if(engine, target, false)
}

fn jump_compare(
    engine: &mut ExecutionEngine,
    target: i64,
    compare: fn(&num_bigint::BigInt, &num_bigint::BigInt) -> bool,
) -> VmResult<()> {
    let right = engine.pop_int()?;
    let left = engine.pop_int()?;
    if compare(&left, &right) {
        engine.execute_jump(target)?;
    }
    Ok(())
}

/// `JMPEQ`.
pub fn jmp_eq(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = short_target(instruction)?;
    jump_compare(engine, target, |a, b| a == b)
}

/// `JMPEQ_L`.
pub fn jmp_eq_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = long_target(instruction)?;
    jump_compare(engine, target, |a, b| a == b)
}

/// `JMPNE`.
pub fn jmp_ne(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = short_target(instruction)?;
    jump_compare(engine, target, |a, b| a != b)
}

/// `JMPNE_L`.
pub fn jmp_ne_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = long_target(instruction)?;
    jump_compare(engine, target, |a, b| a != b)
}

/// `JMPGT`.
pub fn jmp_gt(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = short_target(instruction)?;
    jump_compare(engine, target, |a, b| a > b)
}

/// `JMPGT_L`.
pub fn jmp_gt_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = long_target(instruction)?;
    jump_compare(engine, target, |a, b| a > b)
}

/// `JMPGE`.
pub fn jmp_ge(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = short_target(instruction)?;
    jump_compare(engine, target, |a, b| a >= b)
}

/// `JMPGE_L`.
pub fn jmp_ge_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = long_target(instruction)?;
    jump_compare(engine, target, |a, b| a >= b)
}

/// `JMPLT`.
pub fn jmp_lt(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = short_target(instruction)?;
    jump_compare(engine, target, |a, b| a < b)
}

/// `JMPLT_L`.
pub fn jmp_lt_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = long_target(instruction)?;
    jump_compare(engine, target, |a, b| a < b)
}

/// `JMPLE`.
pub fn jmp_le(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = short_target(instruction)?;
    jump_compare(engine, target, |a, b| a <= b)
}

/// `JMPLE_L`.
pub fn jmp_le_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = long_target(instruction)?;
    jump_compare(engine, target, |a, b| a <= b)
}

/// `CALL`.
pub fn call(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    engine.execute_call(short_target(instruction)?)
}

/// `CALL_L`.
pub fn call_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    engine.execute_call(long_target(instruction)?)
}

/// `CALLA`: call through a pointer; the pointer must refer into the
/// current script.
pub fn call_a(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.pop()?;
    let StackItem::Pointer(pointer) = item else {
        return Err(VmError::invalid_type("Pointer", item.item_type().to_string()));
    };
    if !pointer.script.same_script(engine.current_context()?.script()) {
        return Err(VmError::invalid_operation(
            "CALLA pointer refers to a different script",
        ));
    }
    engine.execute_call(pointer.position as i64)
}

/// `CALLT`: call through the context's call table.
pub fn call_t(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let token = instruction.token_u16()? as usize;
    let entry = {
        let table = engine.current_context()?.call_table();
        table
            .get(token)
            .cloned()
            .ok_or_else(|| VmError::invalid_operation(format!("unknown call token {token}")))?
    };
    let mut arguments = Vec::with_capacity(entry.parameters);
    for _ in 0..entry.parameters {
        arguments.push(engine.pop()?);
    }
    engine.load_script(entry.script, entry.rvcount, entry.offset)?;
    for argument in arguments {
        engine.push(argument)?;
    }
    Ok(())
}

/// `ABORT`: an uncatchable fault.
pub fn abort(_engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    Err(VmError::aborted("ABORT"))
}

/// `ASSERT`: fault if the popped condition is false.
pub fn assert(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    if !engine.pop_bool()? {
        return Err(VmError::aborted("ASSERT failed"));
    }
    Ok(())
}

/// `ABORTMSG`: fault, copying the popped message into the report.
pub fn abort_msg(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let message = engine.pop_bytes()?;
    Err(VmError::aborted(format!(
        "ABORT: {}",
        String::from_utf8_lossy(&message)
    )))
}

/// `ASSERTMSG`: fault with the message if the condition is false.
pub fn assert_msg(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let message = engine.pop_bytes()?;
    if !engine.pop_bool()? {
        return Err(VmError::aborted(format!(
            "ASSERT failed: {}",
            String::from_utf8_lossy(&message)
        )));
    }
    Ok(())
}

/// `THROW`: raise the popped item as a catchable exception.
pub fn throw(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let value = engine.pop()?;
    engine.execute_throw(value)
}

fn enter_try(
    engine: &mut ExecutionEngine,
    instruction: &Instruction,
    catch_offset: i64,
    finally_offset: i64,
) -> VmResult<()> {
    if catch_offset == 0 && finally_offset == 0 {
        return Err(VmError::invalid_operation(
            "TRY needs a catch or a finally handler",
        ));
    }
    let base = instruction.pointer as i64;
    let script_len = engine.current_context()?.script().len() as i64;
    let resolve = |offset: i64| -> VmResult<Option<usize>> {
        if offset == 0 {
            return Ok(None);
        }
        let target = base + offset;
        if target < 0 || target > script_len {
            return Err(VmError::invalid_operation(format!(
                "try handler target {target} is outside the script"
            )));
        }
        Ok(Some(target as usize))
    };
    let catch_pointer = resolve(catch_offset)?;
    let finally_pointer = resolve(finally_offset)?;
    let limits = engine.limits().clone();
    engine
        .current_context_mut()?
        .enter_try(catch_pointer, finally_pointer, &limits)
}

/// `TRY`.
pub fn r#try(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let catch_offset = instruction.token_i8_at(0)? as i64;
    let finally_offset = instruction.token_i8_at(1)? as i64;
    enter_try(engine, instruction, catch_offset, finally_offset)
}

/// `TRY_L`.
pub fn try_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let catch_offset = instruction.token_i32_at(0)? as i64;
    let finally_offset = instruction.token_i32_at(4)? as i64;
    enter_try(engine, instruction, catch_offset, finally_offset)
}

/// `ENDTRY`.
pub fn end_try(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = short_target(instruction)?;
    resolve_end_try(engine, target)
}

/// `ENDTRY_L`.
pub fn end_try_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let target = long_target(instruction)?;
    resolve_end_try(engine, target)
}

fn resolve_end_try(engine: &mut ExecutionEngine, target: i64) -> VmResult<()> {
    let script_len = engine.current_context()?.script().len() as i64;
    if target < 0 || target > script_len {
        return Err(VmError::invalid_operation(format!(
            "ENDTRY target {target} is outside the script"
        )));
    }
    engine.execute_end_try(target as usize)
}

/// `ENDFINALLY`.
pub fn end_finally(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.execute_end_finally()
}

/// `RET`.
pub fn ret(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.execute_ret()
}

/// `SYSCALL`: dispatch through the host-installed table.
pub fn syscall(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let token = instruction.token_u32()?;
    let system_call = engine
        .syscall(token)
        .ok_or_else(|| VmError::syscall(format!("{token:#010x}"), "unknown system call"))?;
    (system_call.handler)(engine)
}
