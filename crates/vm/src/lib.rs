//! # Neoxide VM
//!
//! The deterministic stack-based virtual machine executing every
//! transaction script and contract witness: a fixed 256-entry opcode
//! table, invocation and evaluation stacks, try/catch/finally handling,
//! reference counting with cycle reclamation over compound values, and
//! hard resource limits.
//!
//! ## Architecture
//!
//! - [`ExecutionEngine`]: the dispatch loop and exception machinery
//! - [`ApplicationEngine`]: the hosted engine with triggers, gas and
//!   system calls
//! - [`Script`] / [`Instruction`]: immutable bytecode with prefetched
//!   decoding and strict-mode validation
//! - [`StackItem`] / [`ReferenceCounter`]: the value universe and the
//!   arena that owns compound items
//! - [`ScriptBuilder`]: canonical bytecode construction
//! - [`Debugger`]: breakpoints and stepping
//!
//! ## Example
//!
//! ```
//! use neoxide_vm::{ExecutionEngine, Script, VMState};
//!
//! let script = Script::new(vec![0x15, 0x13, 0x9E]); // PUSH5 PUSH3 ADD
//! let mut engine = ExecutionEngine::new();
//! engine.load_script(script, -1, 0).unwrap();
//! assert_eq!(engine.execute(), VMState::Halt);
//! let result = engine.result_stack().peek(0).unwrap();
//! assert_eq!(result.to_int().unwrap(), 8.into());
//! ```

pub mod application_engine;
pub mod context_state;
pub mod debugger;
pub mod error;
pub mod evaluation_stack;
pub mod execution_context;
pub mod execution_engine;
pub mod instruction;
pub mod interop;
pub mod jump_table;
pub mod limits;
pub mod op_code;
pub mod reference_counter;
pub mod script;
pub mod script_builder;
pub mod serializer;
pub mod slot;
pub mod stack_item;

pub use application_engine::{
    opcode_price, single_sig_verification_script, ApplicationEngine, NotificationEvent,
    TriggerType, CHECKMULTISIG_PRICE_PER_KEY, CHECKSIG_PRICE,
};
pub use context_state::ContextStateRegistry;
pub use debugger::Debugger;
pub use error::{VmError, VmResult};
pub use evaluation_stack::EvaluationStack;
pub use execution_context::{CallTableEntry, ExecutionContext, TryContext, TryState};
pub use execution_engine::{syscall_hash, ExecutionEngine, SystemCall, VMState};
pub use instruction::Instruction;
pub use interop::{IteratorHandle, StorageContext, StorageIterator, VmIterator};
pub use jump_table::InstructionHandler;
pub use limits::ExecutionEngineLimits;
pub use op_code::{OpCode, OperandSize};
pub use reference_counter::ReferenceCounter;
pub use script::Script;
pub use script_builder::ScriptBuilder;
pub use serializer::{deserialize_item, serialize_item};
pub use slot::Slot;
pub use stack_item::{
    BufferRef, CompoundHandle, InteropObject, MapKey, Pointer, StackItem, StackItemType,
    MAX_INTEGER_SIZE,
};
