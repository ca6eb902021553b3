//! Bitwise-logic and equality handlers.

use crate::error::VmResult;
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::stack_item::{check_integer_size, StackItem};

/// `INVERT`: bitwise complement, `-(x + 1)` in two's complement.
pub fn invert(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_int()?;
    let result = -(x + 1i32);
    check_integer_size(&result, "INVERT")?;
    engine.push(StackItem::Integer(result))
}

/// `AND`.
pub fn and(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let right = engine.pop_int()?;
    let left = engine.pop_int()?;
    let result = left & right;
    check_integer_size(&result, "AND")?;
    engine.push(StackItem::Integer(result))
}

/// `OR`.
pub fn or(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let right = engine.pop_int()?;
    let left = engine.pop_int()?;
    let result = left | right;
    check_integer_size(&result, "OR")?;
    engine.push(StackItem::Integer(result))
}

/// `XOR`.
pub fn xor(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let right = engine.pop_int()?;
    let left = engine.pop_int()?;
    let result = left ^ right;
    check_integer_size(&result, "XOR")?;
    engine.push(StackItem::Integer(result))
}

/// `EQUAL`: the charged total equality procedure.
pub fn equal(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let right = engine.pop()?;
    let left = engine.pop()?;
    let limits = engine.limits().clone();
    let result = engine.reference_counter().equals(&left, &right, &limits)?;
    engine.push(StackItem::Boolean(result))
}

/// `NOTEQUAL`.
pub fn not_equal(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let right = engine.pop()?;
    let left = engine.pop()?;
    let limits = engine.limits().clone();
    let result = engine.reference_counter().equals(&left, &right, &limits)?;
    engine.push(StackItem::Boolean(!result))
}
