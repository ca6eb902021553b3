//! Breakpoints and stepping.

use crate::execution_engine::{ExecutionEngine, VMState};
use crate::script::Script;
use std::collections::HashSet;

/// Drives an engine one step at a time, honouring breakpoints. Every
/// engine invariant is preserved: the debugger only calls the engine's
/// public stepping surface.
pub struct Debugger<'a> {
    engine: &'a mut ExecutionEngine,
    // Breakpoints keyed by script identity and offset.
    breakpoints: HashSet<(usize, usize)>,
}

fn script_key(script: &Script) -> usize {
    script.as_bytes().as_ptr() as usize
}

impl<'a> Debugger<'a> {
    /// Wraps an engine for debugging.
    pub fn new(engine: &'a mut ExecutionEngine) -> Self {
        Self {
            engine,
            breakpoints: HashSet::new(),
        }
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &ExecutionEngine {
        self.engine
    }

    /// Installs a breakpoint at a byte offset of a script.
    pub fn add_breakpoint(&mut self, script: &Script, position: usize) {
        self.breakpoints.insert((script_key(script), position));
    }

    /// Removes a breakpoint; returns whether it existed.
    pub fn remove_breakpoint(&mut self, script: &Script, position: usize) -> bool {
        self.breakpoints.remove(&(script_key(script), position))
    }

    fn at_breakpoint(&self) -> bool {
        let Ok(context) = self.engine.current_context() else {
            return false;
        };
        self.breakpoints.contains(&(
            script_key(context.script()),
            context.instruction_pointer(),
        ))
    }

    /// Runs until a breakpoint, halt or fault. A breakpoint stops the
    /// engine *before* the instruction at the breakpoint executes.
    pub fn execute(&mut self) -> VMState {
        if self.engine.state() == VMState::Break {
            self.engine.set_state(VMState::None);
        }
        while self.engine.state() == VMState::None {
            self.engine.execute_next();
            if self.engine.state() == VMState::None && self.at_breakpoint() {
                self.engine.set_state(VMState::Break);
            }
        }
        self.engine.state()
    }

    /// Executes exactly one instruction.
    pub fn step_into(&mut self) -> VMState {
        if matches!(self.engine.state(), VMState::Halt | VMState::Fault) {
            return self.engine.state();
        }
        self.engine.set_state(VMState::None);
        self.engine.execute_next();
        if self.engine.state() == VMState::None {
            self.engine.set_state(VMState::Break);
        }
        self.engine.state()
    }

    /// Executes until the invocation depth returns to its pre-step value,
    /// stepping over calls.
    pub fn step_over(&mut self) -> VMState {
        if matches!(self.engine.state(), VMState::Halt | VMState::Fault) {
            return self.engine.state();
        }
        let depth = self.engine.invocation_depth();
        self.engine.set_state(VMState::None);
        loop {
            self.engine.execute_next();
            if self.engine.state() != VMState::None {
                break;
            }
            if self.engine.invocation_depth() <= depth {
                self.engine.set_state(VMState::Break);
                break;
            }
            if self.at_breakpoint() {
                self.engine.set_state(VMState::Break);
                break;
            }
        }
        self.engine.state()
    }

    /// Executes until the invocation depth decreases below its pre-step
    /// value, stepping out of the current frame.
    pub fn step_out(&mut self) -> VMState {
        if matches!(self.engine.state(), VMState::Halt | VMState::Fault) {
            return self.engine.state();
        }
        let depth = self.engine.invocation_depth();
        self.engine.set_state(VMState::None);
        loop {
            self.engine.execute_next();
            if self.engine.state() != VMState::None {
                break;
            }
            if self.engine.invocation_depth() < depth {
                self.engine.set_state(VMState::Break);
                break;
            }
            if self.at_breakpoint() {
                self.engine.set_state(VMState::Break);
                break;
            }
        }
        self.engine.state()
    }
}
