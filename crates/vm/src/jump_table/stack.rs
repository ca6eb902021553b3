//! Stack-manipulation handlers.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::stack_item::StackItem;

/// `DEPTH`.
pub fn depth(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let depth = engine.current_context()?.evaluation_stack().len();
    engine.push(StackItem::from_int(depth as u64))
}

/// `DROP`.
pub fn drop(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.pop()?;
    Ok(())
}

/// `NIP`: drop the second item.
pub fn nip(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.current_context()?.evaluation_stack().remove(1)?;
    Ok(())
}

/// `XDROP`: drop the item at the popped depth.
pub fn xdrop(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let n = engine.pop()?.to_usize()?;
    engine.current_context()?.evaluation_stack().remove(n)?;
    Ok(())
}

/// `CLEAR`.
pub fn clear(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.current_context()?.evaluation_stack().clear();
    Ok(())
}

/// `DUP`.
pub fn dup(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let top = engine.peek(0)?;
    engine.push(top)
}

/// `OVER`.
pub fn over(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let second = engine.peek(1)?;
    engine.push(second)
}

/// `PICK`: copy the item at the popped depth to the top.
pub fn pick(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let n = engine.pop()?.to_usize()?;
    let item = engine.peek(n)?;
    engine.push(item)
}

/// `TUCK`: copy the top below the second item.
pub fn tuck(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let top = engine.peek(0)?;
    engine.current_context()?.evaluation_stack().insert(2, top)
}

/// `SWAP`.
pub fn swap(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.current_context()?.evaluation_stack().swap(0, 1)
}

/// `ROT`: move the third item to the top.
pub fn rot(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.current_context()?.evaluation_stack().remove(2)?;
    engine.push(item)
}

/// `ROLL`: move the item at the popped depth to the top.
pub fn roll(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let n = engine.pop()?.to_usize()?;
    if n == 0 {
        return Ok(());
    }
    let item = engine.current_context()?.evaluation_stack().remove(n)?;
    engine.push(item)
}

/// `REVERSE3`.
pub fn reverse3(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.current_context()?.evaluation_stack().reverse(3)
}

/// `REVERSE4`.
pub fn reverse4(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.current_context()?.evaluation_stack().reverse(4)
}

/// `REVERSEN`: reverse the popped number of items.
pub fn reverse_n(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let n = engine.pop()?.to_usize()?;
    if n > engine.current_context()?.evaluation_stack().len() {
        return Err(VmError::stack_underflow(
            n,
            engine.current_context()?.evaluation_stack().len(),
        ));
    }
    engine.current_context()?.evaluation_stack().reverse(n)
}
