//! Error types for the virtual machine.

use thiserror::Error;

/// VM execution errors. Every variant is an uncatchable fault when it
/// escapes an instruction handler; catchable exceptions travel through the
/// engine's pending-throw slot instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// Bytecode failed to decode.
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// An undefined opcode byte was encountered.
    #[error("Invalid opcode: {opcode:#04x}")]
    InvalidOpCode { opcode: u8 },

    /// An operation was applied to unsuitable operands or state.
    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    /// A stack access went past the available items.
    #[error("Stack underflow: requested {requested}, available {available}")]
    StackUnderflow { requested: usize, available: usize },

    /// The total reference count exceeded the stack-size limit.
    #[error("Stack overflow: total references {total} exceed limit {limit}")]
    StackOverflow { total: usize, limit: usize },

    /// A value exceeded one of the engine limits.
    #[error("Limit exceeded: {what} {value} > {limit}")]
    LimitExceeded {
        what: &'static str,
        value: usize,
        limit: usize,
    },

    /// A type conversion with no defined semantics.
    #[error("Invalid type conversion: {from} to {to}")]
    InvalidConversion { from: String, to: String },

    /// An expected type did not match.
    #[error("Invalid type: expected {expected}, got {actual}")]
    InvalidType { expected: String, actual: String },

    /// Division or modulo by zero.
    #[error("Division by zero")]
    DivisionByZero,

    /// Arithmetic produced a value outside the 32-byte integer range.
    #[error("Integer overflow in {operation}")]
    IntegerOverflow { operation: &'static str },

    /// A slot or compound index was out of range.
    #[error("Index out of range: {index} (size {size})")]
    IndexOutOfRange { index: String, size: usize },

    /// An ABORT or failed ASSERT, optionally with a script-supplied message.
    #[error("Execution aborted: {message}")]
    Aborted { message: String },

    /// Gas limit exhausted.
    #[error("Gas exhausted: consumed {consumed}, limit {limit}")]
    GasExhausted { consumed: i64, limit: i64 },

    /// An unregistered or failing system call.
    #[error("Syscall error: {name}: {message}")]
    Syscall { name: String, message: String },
}

impl VmError {
    /// Creates a new parse error.
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Creates a new invalid-operation error.
    pub fn invalid_operation<S: Into<String>>(message: S) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a new stack-underflow error.
    pub fn stack_underflow(requested: usize, available: usize) -> Self {
        Self::StackUnderflow {
            requested,
            available,
        }
    }

    /// Creates a new limit-exceeded error.
    pub fn limit_exceeded(what: &'static str, value: usize, limit: usize) -> Self {
        Self::LimitExceeded { what, value, limit }
    }

    /// Creates a new invalid-conversion error.
    pub fn invalid_conversion<A: Into<String>, B: Into<String>>(from: A, to: B) -> Self {
        Self::InvalidConversion {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Creates a new invalid-type error.
    pub fn invalid_type<A: Into<String>, B: Into<String>>(expected: A, actual: B) -> Self {
        Self::InvalidType {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a new index-out-of-range error.
    pub fn index_out_of_range<I: std::fmt::Display>(index: I, size: usize) -> Self {
        Self::IndexOutOfRange {
            index: index.to_string(),
            size,
        }
    }

    /// Creates a new aborted error.
    pub fn aborted<S: Into<String>>(message: S) -> Self {
        Self::Aborted {
            message: message.into(),
        }
    }

    /// Creates a new syscall error.
    pub fn syscall<N: Into<String>, M: Into<String>>(name: N, message: M) -> Self {
        Self::Syscall {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Stable tag used when logging faults.
    pub fn reason_tag(&self) -> &'static str {
        match self {
            VmError::Parse { .. } => "parse",
            VmError::InvalidOpCode { .. } => "invalid_opcode",
            VmError::InvalidOperation { .. } => "invalid_operation",
            VmError::StackUnderflow { .. } => "stack_underflow",
            VmError::StackOverflow { .. } => "stack_overflow",
            VmError::LimitExceeded { .. } => "limit_exceeded",
            VmError::InvalidConversion { .. } => "invalid_conversion",
            VmError::InvalidType { .. } => "invalid_type",
            VmError::DivisionByZero => "division_by_zero",
            VmError::IntegerOverflow { .. } => "integer_overflow",
            VmError::IndexOutOfRange { .. } => "index_out_of_range",
            VmError::Aborted { .. } => "aborted",
            VmError::GasExhausted { .. } => "gas_exhausted",
            VmError::Syscall { .. } => "syscall",
        }
    }
}

/// Result type for VM operations.
pub type VmResult<T> = std::result::Result<T, VmError>;
