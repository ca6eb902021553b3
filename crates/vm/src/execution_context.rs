//! One frame of the invocation stack.

use crate::error::{VmError, VmResult};
use crate::evaluation_stack::EvaluationStack;
use crate::instruction::Instruction;
use crate::limits::ExecutionEngineLimits;
use crate::reference_counter::ReferenceCounter;
use crate::script::Script;
use crate::slot::Slot;
use crate::stack_item::StackItem;
use std::cell::RefCell;
use std::rc::Rc;

/// State of one open try block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryState {
    /// The try body is executing.
    Try,
    /// The catch handler is executing.
    Catch,
    /// The finally handler is executing.
    Finally,
}

/// One open try-catch-finally record.
#[derive(Debug, Clone)]
pub struct TryContext {
    /// Absolute offset of the catch handler, if any.
    pub catch_pointer: Option<usize>,
    /// Absolute offset of the finally handler, if any.
    pub finally_pointer: Option<usize>,
    /// Where execution continues after the block; set by `ENDTRY`.
    pub end_pointer: usize,
    /// Current state.
    pub state: TryState,
}

/// One entry of the `CALLT` call table.
#[derive(Clone)]
pub struct CallTableEntry {
    /// The script the token calls into.
    pub script: Script,
    /// Entry offset.
    pub offset: usize,
    /// Number of arguments moved into the callee frame.
    pub parameters: usize,
    /// Declared return-value count.
    pub rvcount: i32,
}

/// One frame of the invocation stack: an instruction pointer into a script,
/// a (possibly shared) evaluation stack, slots and a try stack.
pub struct ExecutionContext {
    id: u64,
    script: Script,
    rvcount: i32,
    instruction_pointer: usize,
    evaluation_stack: EvaluationStack,
    static_fields: Option<Rc<RefCell<Slot>>>,
    local_variables: Option<Slot>,
    arguments: Option<Slot>,
    try_stack: Vec<TryContext>,
    call_table: Rc<Vec<CallTableEntry>>,
}

impl ExecutionContext {
    /// Creates a fresh context over its own evaluation stack.
    pub fn new(script: Script, rvcount: i32, reference_counter: ReferenceCounter, id: u64) -> Self {
        Self {
            id,
            script,
            rvcount,
            instruction_pointer: 0,
            evaluation_stack: EvaluationStack::new(reference_counter),
            static_fields: None,
            local_variables: None,
            arguments: None,
            try_stack: Vec::new(),
            call_table: Rc::new(Vec::new()),
        }
    }

    /// Creates the frame for a `CALL` into the same script: shares the
    /// evaluation stack, static fields and call table; fresh slots, try
    /// stack and instruction pointer.
    pub fn call_clone(&self, position: usize, id: u64) -> Self {
        Self {
            id,
            script: self.script.clone(),
            rvcount: -1,
            instruction_pointer: position,
            evaluation_stack: self.evaluation_stack.clone(),
            static_fields: self.static_fields.clone(),
            local_variables: None,
            arguments: None,
            try_stack: Vec::new(),
            call_table: self.call_table.clone(),
        }
    }

    /// Unique id of this frame within its engine.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The script this frame executes.
    pub fn script(&self) -> &Script {
        &self.script
    }

    /// Declared return-value count; −1 means "all remaining".
    pub fn rvcount(&self) -> i32 {
        self.rvcount
    }

    /// The frame's evaluation stack.
    pub fn evaluation_stack(&self) -> &EvaluationStack {
        &self.evaluation_stack
    }

    /// Current instruction pointer.
    pub fn instruction_pointer(&self) -> usize {
        self.instruction_pointer
    }

    /// Moves the instruction pointer.
    pub fn set_instruction_pointer(&mut self, position: usize) -> VmResult<()> {
        if position > self.script.len() {
            return Err(VmError::invalid_operation(format!(
                "instruction pointer {position} is outside the script"
            )));
        }
        self.instruction_pointer = position;
        Ok(())
    }

    /// Decodes the instruction under the pointer; `None` at script end.
    pub fn current_instruction(&self) -> VmResult<Option<Rc<Instruction>>> {
        if self.instruction_pointer >= self.script.len() {
            return Ok(None);
        }
        self.script.instruction_at(self.instruction_pointer).map(Some)
    }

    /// Replaces the call table used by `CALLT`.
    pub fn set_call_table(&mut self, table: Rc<Vec<CallTableEntry>>) {
        self.call_table = table;
    }

    /// The call table.
    pub fn call_table(&self) -> &Rc<Vec<CallTableEntry>> {
        &self.call_table
    }

    /// Creates the static-field slot; callable once per script load.
    pub fn init_static_fields(
        &mut self,
        count: usize,
        reference_counter: ReferenceCounter,
    ) -> VmResult<()> {
        if self.static_fields.is_some() {
            return Err(VmError::invalid_operation(
                "static fields already initialised",
            ));
        }
        self.static_fields = Some(Rc::new(RefCell::new(Slot::new(count, reference_counter))));
        Ok(())
    }

    /// Creates the locals and arguments slots; callable once per frame.
    pub fn init_slot(
        &mut self,
        locals: usize,
        arguments: Vec<StackItem>,
        reference_counter: ReferenceCounter,
    ) -> VmResult<()> {
        if self.local_variables.is_some() || self.arguments.is_some() {
            return Err(VmError::invalid_operation("slots already initialised"));
        }
        if locals > 0 {
            self.local_variables = Some(Slot::new(locals, reference_counter.clone()));
        }
        if !arguments.is_empty() {
            self.arguments = Some(Slot::with_items(arguments, reference_counter));
        }
        Ok(())
    }

    /// Reads a static field.
    pub fn load_static_field(&self, index: usize) -> VmResult<StackItem> {
        match &self.static_fields {
            Some(slot) => slot.borrow().get(index),
            None => Err(VmError::invalid_operation("static fields not initialised")),
        }
    }

    /// Writes a static field.
    pub fn store_static_field(&mut self, index: usize, item: StackItem) -> VmResult<()> {
        match &self.static_fields {
            Some(slot) => slot.borrow_mut().put(index, item),
            None => Err(VmError::invalid_operation("static fields not initialised")),
        }
    }

    /// Reads a local variable.
    pub fn load_local(&self, index: usize) -> VmResult<StackItem> {
        match &self.local_variables {
            Some(slot) => slot.get(index),
            None => Err(VmError::invalid_operation("local slot not initialised")),
        }
    }

    /// Writes a local variable.
    pub fn store_local(&mut self, index: usize, item: StackItem) -> VmResult<()> {
        match &mut self.local_variables {
            Some(slot) => slot.put(index, item),
            None => Err(VmError::invalid_operation("local slot not initialised")),
        }
    }

    /// Reads an argument.
    pub fn load_argument(&self, index: usize) -> VmResult<StackItem> {
        match &self.arguments {
            Some(slot) => slot.get(index),
            None => Err(VmError::invalid_operation("argument slot not initialised")),
        }
    }

    /// Writes an argument.
    pub fn store_argument(&mut self, index: usize, item: StackItem) -> VmResult<()> {
        match &mut self.arguments {
            Some(slot) => slot.put(index, item),
            None => Err(VmError::invalid_operation("argument slot not initialised")),
        }
    }

    /// Opens a try block.
    pub fn enter_try(
        &mut self,
        catch_pointer: Option<usize>,
        finally_pointer: Option<usize>,
        limits: &ExecutionEngineLimits,
    ) -> VmResult<()> {
        if self.try_stack.len() >= limits.max_try_nesting_depth {
            return Err(VmError::limit_exceeded(
                "try nesting depth",
                self.try_stack.len() + 1,
                limits.max_try_nesting_depth,
            ));
        }
        self.try_stack.push(TryContext {
            catch_pointer,
            finally_pointer,
            end_pointer: 0,
            state: TryState::Try,
        });
        Ok(())
    }

    /// The open try records, innermost last.
    pub fn try_stack(&self) -> &[TryContext] {
        &self.try_stack
    }

    /// Mutable access to the innermost try record.
    pub fn current_try_mut(&mut self) -> Option<&mut TryContext> {
        self.try_stack.last_mut()
    }

    /// Pops the innermost try record.
    pub fn pop_try(&mut self) -> Option<TryContext> {
        self.try_stack.pop()
    }

    /// Releases slot references when the frame unloads.
    pub fn release_slots(&mut self) {
        if let Some(mut slot) = self.local_variables.take() {
            slot.clear_references();
        }
        if let Some(mut slot) = self.arguments.take() {
            slot.clear_references();
        }
        // Static fields release through their own Drop once the last
        // sharing frame is gone.
        self.static_fields = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> (ExecutionContext, ReferenceCounter) {
        let rc = ReferenceCounter::new();
        let script = Script::new(vec![0x11, 0x40]);
        (ExecutionContext::new(script, -1, rc.clone(), 0), rc)
    }

    #[test]
    fn test_call_clone_shares_stack_and_statics() {
        let (mut ctx, rc) = context();
        ctx.init_static_fields(1, rc.clone()).unwrap();
        ctx.store_static_field(0, StackItem::from_int(7)).unwrap();
        ctx.evaluation_stack().push(StackItem::from_int(1));

        let clone = ctx.call_clone(1, 1);
        assert!(ctx.evaluation_stack().same_stack(clone.evaluation_stack()));
        assert_eq!(clone.load_static_field(0).unwrap().to_int().unwrap(), 7.into());
        assert_eq!(clone.instruction_pointer(), 1);
        assert_eq!(clone.rvcount(), -1);
        assert!(clone.try_stack().is_empty());
    }

    #[test]
    fn test_static_fields_initialise_once() {
        let (mut ctx, rc) = context();
        ctx.init_static_fields(2, rc.clone()).unwrap();
        assert!(ctx.init_static_fields(2, rc).is_err());
    }

    #[test]
    fn test_slot_access() {
        let (mut ctx, rc) = context();
        ctx.init_slot(2, vec![StackItem::from_int(10)], rc).unwrap();
        assert!(ctx.load_local(0).unwrap().is_null());
        ctx.store_local(1, StackItem::from_int(3)).unwrap();
        assert_eq!(ctx.load_local(1).unwrap().to_int().unwrap(), 3.into());
        assert_eq!(ctx.load_argument(0).unwrap().to_int().unwrap(), 10.into());
        assert!(ctx.load_local(2).is_err());
        assert!(ctx.load_argument(1).is_err());
    }

    #[test]
    fn test_try_nesting_limit() {
        let (mut ctx, _rc) = context();
        let limits = ExecutionEngineLimits::default();
        for _ in 0..limits.max_try_nesting_depth {
            ctx.enter_try(Some(0), None, &limits).unwrap();
        }
        assert!(ctx.enter_try(Some(0), None, &limits).is_err());
    }

    #[test]
    fn test_release_slots_drops_references() {
        let (mut ctx, rc) = context();
        ctx.init_slot(3, vec![StackItem::from_int(1)], rc.clone())
            .unwrap();
        assert_eq!(rc.count(), 4);
        ctx.release_slots();
        assert_eq!(rc.count(), 0);
    }

    #[test]
    fn test_instruction_pointer_bounds() {
        let (mut ctx, _rc) = context();
        assert!(ctx.set_instruction_pointer(2).is_ok()); // script end
        assert!(ctx.current_instruction().unwrap().is_none());
        assert!(ctx.set_instruction_pointer(3).is_err());
    }
}
