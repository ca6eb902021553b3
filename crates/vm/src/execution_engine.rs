//! The opcode dispatch loop, invocation stack and exception machinery.

use crate::error::{VmError, VmResult};
use crate::evaluation_stack::EvaluationStack;
use crate::execution_context::{ExecutionContext, TryState};
use crate::instruction::Instruction;
use crate::jump_table;
use crate::limits::ExecutionEngineLimits;
use crate::reference_counter::ReferenceCounter;
use crate::script::Script;
use crate::stack_item::StackItem;
use num_bigint::BigInt;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

/// The engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VMState {
    /// Ready to execute.
    None,
    /// Finished successfully; the result stack is populated.
    Halt,
    /// Stopped on an uncatchable error or an uncaught exception.
    Fault,
    /// Stopped at a breakpoint.
    Break,
}

/// A host-installed system call.
#[derive(Clone)]
pub struct SystemCall {
    /// The service name, e.g. `System.Crypto.CheckSig`.
    pub name: String,
    /// The handler.
    pub handler: Rc<dyn Fn(&mut ExecutionEngine) -> VmResult<()>>,
}

/// Computes the 32-bit dispatch token of a system-call name: the first
/// four bytes of its SHA-256, little-endian.
pub fn syscall_hash(name: &str) -> u32 {
    let digest = Sha256::digest(name.as_bytes());
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// A deterministic stack-machine executing one loaded script graph.
pub struct ExecutionEngine {
    state: VMState,
    invocation_stack: Vec<ExecutionContext>,
    result_stack: EvaluationStack,
    reference_counter: ReferenceCounter,
    limits: ExecutionEngineLimits,
    jumping: bool,
    uncaught_exception: Option<StackItem>,
    pending_throw: Option<StackItem>,
    fault_error: Option<VmError>,
    syscalls: HashMap<u32, SystemCall>,
    next_context_id: u64,
    host: Option<Rc<dyn Any>>,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEngine {
    /// Creates an engine with default limits.
    pub fn new() -> Self {
        Self::with_limits(ExecutionEngineLimits::default())
    }

    /// Creates an engine with explicit limits.
    pub fn with_limits(limits: ExecutionEngineLimits) -> Self {
        let reference_counter = ReferenceCounter::new();
        Self {
            state: VMState::None,
            invocation_stack: Vec::new(),
            result_stack: EvaluationStack::new(reference_counter.clone()),
            reference_counter,
            limits,
            jumping: false,
            uncaught_exception: None,
            pending_throw: None,
            fault_error: None,
            syscalls: HashMap::new(),
            next_context_id: 0,
            host: None,
        }
    }

    /// The engine limits.
    pub fn limits(&self) -> &ExecutionEngineLimits {
        &self.limits
    }

    /// The engine state.
    pub fn state(&self) -> VMState {
        self.state
    }

    /// Sets the engine state; used by the debugger.
    pub fn set_state(&mut self, state: VMState) {
        self.state = state;
    }

    /// The per-engine reference counter.
    pub fn reference_counter(&self) -> ReferenceCounter {
        self.reference_counter.clone()
    }

    /// The result stack, populated when the entry context unloads.
    pub fn result_stack(&self) -> &EvaluationStack {
        &self.result_stack
    }

    /// The invocation-stack depth.
    pub fn invocation_depth(&self) -> usize {
        self.invocation_stack.len()
    }

    /// The error that faulted the engine, if any.
    pub fn fault_error(&self) -> Option<&VmError> {
        self.fault_error.as_ref()
    }

    /// The uncaught exception item, if the fault came from `THROW`.
    pub fn uncaught_exception(&self) -> Option<&StackItem> {
        self.uncaught_exception.as_ref()
    }

    /// Attaches an opaque host object reachable from syscall handlers.
    pub fn set_host(&mut self, host: Rc<dyn Any>) {
        self.host = Some(host);
    }

    /// Downcasts the attached host object.
    pub fn host<T: 'static>(&self) -> VmResult<Rc<T>> {
        self.host
            .clone()
            .and_then(|h| h.downcast::<T>().ok())
            .ok_or_else(|| VmError::invalid_operation("no host of the requested type attached"))
    }

    /// Registers a system call by name.
    pub fn register_syscall<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&mut ExecutionEngine) -> VmResult<()> + 'static,
    {
        self.syscalls.insert(
            syscall_hash(name),
            SystemCall {
                name: name.to_string(),
                handler: Rc::new(handler),
            },
        );
    }

    /// Looks up a registered system call.
    pub fn syscall(&self, token: u32) -> Option<SystemCall> {
        self.syscalls.get(&token).cloned()
    }

    /// The current (topmost) context.
    pub fn current_context(&self) -> VmResult<&ExecutionContext> {
        self.invocation_stack
            .last()
            .ok_or_else(|| VmError::invalid_operation("no context loaded"))
    }

    /// The current context, mutably.
    pub fn current_context_mut(&mut self) -> VmResult<&mut ExecutionContext> {
        self.invocation_stack
            .last_mut()
            .ok_or_else(|| VmError::invalid_operation("no context loaded"))
    }

    /// The entry (bottommost) context.
    pub fn entry_context(&self) -> Option<&ExecutionContext> {
        self.invocation_stack.first()
    }

    /// Loads a script as a new context with its own evaluation stack.
    pub fn load_script(&mut self, script: Script, rvcount: i32, position: usize) -> VmResult<()> {
        let id = self.next_context_id;
        self.next_context_id += 1;
        let mut context = ExecutionContext::new(script, rvcount, self.reference_counter.clone(), id);
        context.set_instruction_pointer(position)?;
        self.load_context(context)
    }

    /// Pushes a prepared context onto the invocation stack.
    pub fn load_context(&mut self, context: ExecutionContext) -> VmResult<()> {
        if self.invocation_stack.len() >= self.limits.max_invocation_stack_size {
            return Err(VmError::limit_exceeded(
                "invocation stack depth",
                self.invocation_stack.len() + 1,
                self.limits.max_invocation_stack_size,
            ));
        }
        self.invocation_stack.push(context);
        Ok(())
    }

    /// Allocates a fresh context id for call clones.
    pub fn next_context_id(&mut self) -> u64 {
        let id = self.next_context_id;
        self.next_context_id += 1;
        id
    }

    /// Pushes onto the current evaluation stack.
    pub fn push(&mut self, item: StackItem) -> VmResult<()> {
        self.current_context()?.evaluation_stack().push(item);
        Ok(())
    }

    /// Pops from the current evaluation stack.
    pub fn pop(&mut self) -> VmResult<StackItem> {
        self.current_context()?.evaluation_stack().pop()
    }

    /// Peeks into the current evaluation stack.
    pub fn peek(&self, depth: usize) -> VmResult<StackItem> {
        self.current_context()?.evaluation_stack().peek(depth)
    }

    /// Pops an integer.
    pub fn pop_int(&mut self) -> VmResult<BigInt> {
        self.pop()?.to_int()
    }

    /// Pops a boolean interpretation.
    pub fn pop_bool(&mut self) -> VmResult<bool> {
        self.pop()?.to_bool()
    }

    /// Pops a byte interpretation.
    pub fn pop_bytes(&mut self) -> VmResult<Vec<u8>> {
        self.pop()?.to_byte_slice()
    }

    /// Marks the current instruction as having moved the instruction
    /// pointer itself.
    pub fn set_jumping(&mut self) {
        self.jumping = true;
    }

    /// Jumps within the current context.
    pub fn execute_jump(&mut self, position: i64) -> VmResult<()> {
        let context = self.current_context_mut()?;
        if position < 0 || position as usize > context.script().len() {
            return Err(VmError::invalid_operation(format!(
                "jump target {position} is outside the script"
            )));
        }
        context.set_instruction_pointer(position as usize)?;
        self.jumping = true;
        Ok(())
    }

    /// Calls within the current script: a shared-stack frame at `position`.
    pub fn execute_call(&mut self, position: i64) -> VmResult<()> {
        let context = self.current_context()?;
        if position < 0 || position as usize > context.script().len() {
            return Err(VmError::invalid_operation(format!(
                "call target {position} is outside the script"
            )));
        }
        let id = self.next_context_id();
        let clone = self.current_context()?.call_clone(position as usize, id);
        self.load_context(clone)
    }

    /// Unloads the current context, transferring return values.
    pub fn execute_ret(&mut self) -> VmResult<()> {
        self.unload_context()?;
        self.jumping = true;
        if self.invocation_stack.is_empty() {
            self.state = VMState::Halt;
        }
        Ok(())
    }

    fn unload_context(&mut self) -> VmResult<()> {
        let mut context = self
            .invocation_stack
            .pop()
            .ok_or_else(|| VmError::invalid_operation("no context to unload"))?;
        let target = match self.invocation_stack.last() {
            Some(caller) => caller.evaluation_stack().clone(),
            None => self.result_stack.clone(),
        };
        if !context.evaluation_stack().same_stack(&target) {
            let rvcount = context.rvcount();
            if rvcount >= 0 && context.evaluation_stack().len() != rvcount as usize {
                return Err(VmError::invalid_operation(format!(
                    "context declared {rvcount} return values but left {}",
                    context.evaluation_stack().len()
                )));
            }
            context.evaluation_stack().drain_to(&target);
        }
        context.release_slots();
        Ok(())
    }

    /// Discards the current context during exception unwinding: no return
    /// values are transferred.
    fn discard_context(&mut self) -> VmResult<()> {
        let mut context = self
            .invocation_stack
            .pop()
            .ok_or_else(|| VmError::invalid_operation("no context to discard"))?;
        let keep_stack = self
            .invocation_stack
            .last()
            .map(|caller| caller.evaluation_stack().same_stack(context.evaluation_stack()))
            .unwrap_or(false);
        if !keep_stack {
            context.evaluation_stack().clear();
        }
        context.release_slots();
        Ok(())
    }

    /// Raises a catchable exception carrying `value`.
    pub fn execute_throw(&mut self, value: StackItem) -> VmResult<()> {
        self.pending_throw = Some(value);
        self.continue_unwind()
    }

    /// Advances exception propagation until a catch handler, a finally
    /// handler or the bottom of the invocation stack is reached.
    fn continue_unwind(&mut self) -> VmResult<()> {
        self.jumping = true;
        loop {
            if self.invocation_stack.is_empty() {
                self.uncaught_exception = self.pending_throw.take();
                self.state = VMState::Fault;
                self.fault_error = Some(VmError::invalid_operation("uncaught exception"));
                log::debug!(target: "vm", "fault: uncaught exception");
                return Ok(());
            }

            let mut action = None;
            {
                let context = self.current_context_mut()?;
                while let Some(record) = context.current_try_mut() {
                    match record.state {
                        TryState::Try if record.catch_pointer.is_some() => {
                            let catch = record.catch_pointer.expect("checked above");
                            record.state = TryState::Catch;
                            action = Some(("catch", catch));
                            break;
                        }
                        TryState::Try | TryState::Catch => {
                            if let Some(finally) = record.finally_pointer {
                                record.state = TryState::Finally;
                                action = Some(("finally", finally));
                                break;
                            }
                            context.pop_try();
                        }
                        TryState::Finally => {
                            // A throw from inside a finally abandons the
                            // record and keeps unwinding.
                            context.pop_try();
                        }
                    }
                }
            }

            match action {
                Some(("catch", position)) => {
                    let value = self
                        .pending_throw
                        .take()
                        .ok_or_else(|| VmError::invalid_operation("no pending exception"))?;
                    let context = self.current_context_mut()?;
                    context.set_instruction_pointer(position)?;
                    context.evaluation_stack().push(value);
                    return Ok(());
                }
                Some((_, position)) => {
                    // Enter the finally handler; the pending throw resumes
                    // at its ENDFINALLY.
                    let context = self.current_context_mut()?;
                    context.set_instruction_pointer(position)?;
                    return Ok(());
                }
                None => {
                    self.discard_context()?;
                }
            }
        }
    }

    /// Implements `ENDTRY`/`ENDTRY_L`: leaves the innermost try or catch
    /// body, running the finally handler if one exists.
    pub fn execute_end_try(&mut self, end_position: usize) -> VmResult<()> {
        let context = self.current_context_mut()?;
        let finally = {
            let record = context
                .current_try_mut()
                .ok_or_else(|| VmError::invalid_operation("ENDTRY outside a try block"))?;
            match record.state {
                TryState::Finally => {
                    return Err(VmError::invalid_operation("ENDTRY inside a finally block"))
                }
                TryState::Try | TryState::Catch => {}
            }
            if let Some(finally) = record.finally_pointer {
                record.state = TryState::Finally;
                record.end_pointer = end_position;
                Some(finally)
            } else {
                None
            }
        };
        match finally {
            Some(position) => context.set_instruction_pointer(position)?,
            None => {
                context.pop_try();
                context.set_instruction_pointer(end_position)?;
            }
        }
        self.jumping = true;
        Ok(())
    }

    /// Implements `ENDFINALLY`: resumes a pending throw, or continues at
    /// the end pointer recorded by `ENDTRY`.
    pub fn execute_end_finally(&mut self) -> VmResult<()> {
        let record = {
            let context = self.current_context_mut()?;
            let record = context
                .pop_try()
                .ok_or_else(|| VmError::invalid_operation("ENDFINALLY outside a try block"))?;
            if record.state != TryState::Finally {
                return Err(VmError::invalid_operation(
                    "ENDFINALLY outside a finally block",
                ));
            }
            record
        };
        if self.pending_throw.is_some() {
            self.continue_unwind()
        } else {
            let context = self.current_context_mut()?;
            context.set_instruction_pointer(record.end_pointer)?;
            self.jumping = true;
            Ok(())
        }
    }

    /// Puts the engine into the fault state.
    pub fn fault(&mut self, error: VmError) {
        log::debug!(target: "vm", "fault: {} ({})", error, error.reason_tag());
        self.fault_error = Some(error);
        self.state = VMState::Fault;
    }

    /// Runs until halt or fault.
    pub fn execute(&mut self) -> VMState {
        if self.state == VMState::Break {
            self.state = VMState::None;
        }
        while self.state == VMState::None {
            self.execute_next();
        }
        self.state
    }

    /// The instruction the next step will execute, if any.
    pub fn peek_instruction(&self) -> Option<Rc<Instruction>> {
        self.invocation_stack
            .last()
            .and_then(|ctx| ctx.current_instruction().ok().flatten())
    }

    /// Executes exactly one instruction, then runs the post-step reference
    /// sweep and stack-size check.
    pub fn execute_next(&mut self) {
        if self.invocation_stack.is_empty() {
            self.state = VMState::Halt;
            return;
        }

        let context = self.invocation_stack.last().expect("stack is non-empty");
        let context_id = context.id();
        let instruction = match context.current_instruction() {
            Ok(Some(instruction)) => Some(instruction),
            Ok(None) => None,
            Err(error) => {
                self.fault(error);
                return;
            }
        };

        self.jumping = false;
        let result = match &instruction {
            // Running off the end of a script is an implicit RET.
            None => self.execute_ret(),
            Some(instruction) => jump_table::dispatch(self, instruction),
        };

        match result {
            Ok(()) => {
                if !self.jumping {
                    if let Some(instruction) = &instruction {
                        if let Some(frame) = self
                            .invocation_stack
                            .iter_mut()
                            .rev()
                            .find(|c| c.id() == context_id)
                        {
                            // The decoded instruction lies within the
                            // script, so the advance cannot fail.
                            let _ = frame.set_instruction_pointer(instruction.next_pointer());
                        }
                    }
                }
            }
            Err(error) => {
                self.fault(error);
                return;
            }
        }
        self.jumping = false;

        let total = self.reference_counter.check_zero_referred();
        if total > self.limits.max_stack_size {
            self.fault(VmError::StackOverflow {
                total,
                limit: self.limits.max_stack_size,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syscall_hash_is_sha256_prefix() {
        let digest = Sha256::digest(b"System.Runtime.Platform");
        let expected = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
        assert_eq!(syscall_hash("System.Runtime.Platform"), expected);
    }

    #[test]
    fn test_empty_engine_halts() {
        let mut engine = ExecutionEngine::new();
        assert_eq!(engine.execute(), VMState::Halt);
    }

    #[test]
    fn test_invocation_depth_limit() {
        let mut limits = ExecutionEngineLimits::default();
        limits.max_invocation_stack_size = 2;
        let mut engine = ExecutionEngine::with_limits(limits);
        let script = Script::new(vec![0x40]);
        engine.load_script(script.clone(), -1, 0).unwrap();
        engine.load_script(script.clone(), -1, 0).unwrap();
        assert!(engine.load_script(script, -1, 0).is_err());
    }
}
