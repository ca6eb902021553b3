//! Immutable bytecode with a prefetched instruction cache.

use crate::error::{VmError, VmResult};
use crate::instruction::Instruction;
use crate::op_code::OpCode;
use bytes::Bytes;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

struct ScriptInner {
    bytes: Bytes,
    strict: bool,
    cache: RefCell<HashMap<usize, Rc<Instruction>>>,
}

/// An immutable script. Cloning is cheap and preserves identity, which is
/// what `Pointer` items and breakpoints compare by.
#[derive(Clone)]
pub struct Script {
    inner: Rc<ScriptInner>,
}

impl Script {
    /// Wraps bytecode without validating it; malformed instructions fault
    /// at run time instead.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: Rc::new(ScriptInner {
                bytes: Bytes::from(bytes),
                strict: false,
                cache: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Wraps bytecode in strict mode: every instruction must decode within
    /// bounds, and every jump, call and try target must land on an
    /// instruction start inside the script.
    pub fn new_strict(bytes: Vec<u8>) -> VmResult<Self> {
        let script = Self {
            inner: Rc::new(ScriptInner {
                bytes: Bytes::from(bytes),
                strict: true,
                cache: RefCell::new(HashMap::new()),
            }),
        };
        script.validate()?;
        Ok(script)
    }

    fn validate(&self) -> VmResult<()> {
        let bytes = self.as_bytes();
        let mut starts = std::collections::HashSet::new();
        let mut targets: Vec<(usize, i32)> = Vec::new();

        let mut position = 0;
        while position < bytes.len() {
            let instruction = Instruction::decode(bytes, position)?;
            starts.insert(position);
            match instruction.opcode {
                OpCode::JMP
                | OpCode::JMPIF
                | OpCode::JMPIFNOT
                | OpCode::JMPEQ
                | OpCode::JMPNE
                | OpCode::JMPGT
                | OpCode::JMPGE
                | OpCode::JMPLT
                | OpCode::JMPLE
                | OpCode::CALL
                | OpCode::ENDTRY => {
                    targets.push((position, instruction.token_i8()? as i32));
                }
                OpCode::JMP_L
                | OpCode::JMPIF_L
                | OpCode::JMPIFNOT_L
                | OpCode::JMPEQ_L
                | OpCode::JMPNE_L
                | OpCode::JMPGT_L
                | OpCode::JMPGE_L
                | OpCode::JMPLT_L
                | OpCode::JMPLE_L
                | OpCode::CALL_L
                | OpCode::ENDTRY_L => {
                    targets.push((position, instruction.token_i32()?));
                }
                OpCode::PUSHA => {
                    targets.push((position, instruction.token_i32()?));
                }
                OpCode::TRY => {
                    let catch_offset = instruction.token_i8_at(0)? as i32;
                    let finally_offset = instruction.token_i8_at(1)? as i32;
                    if catch_offset != 0 {
                        targets.push((position, catch_offset));
                    }
                    if finally_offset != 0 {
                        targets.push((position, finally_offset));
                    }
                }
                OpCode::TRY_L => {
                    let catch_offset = instruction.token_i32_at(0)?;
                    let finally_offset = instruction.token_i32_at(4)?;
                    if catch_offset != 0 {
                        targets.push((position, catch_offset));
                    }
                    if finally_offset != 0 {
                        targets.push((position, finally_offset));
                    }
                }
                _ => {}
            }
            position = instruction.next_pointer();
        }

        for (origin, offset) in targets {
            let target = origin as i64 + offset as i64;
            // A jump to the exact end of the script is an implicit RET.
            if target == bytes.len() as i64 {
                continue;
            }
            if target < 0 || target > bytes.len() as i64 || !starts.contains(&(target as usize)) {
                return Err(VmError::parse(format!(
                    "target {target} of instruction at {origin} is not an instruction start"
                )));
            }
        }
        Ok(())
    }

    /// The raw bytecode.
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    /// Script length in bytes.
    pub fn len(&self) -> usize {
        self.inner.bytes.len()
    }

    /// Whether the script is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.bytes.is_empty()
    }

    /// Whether the script was constructed in strict mode.
    pub fn is_strict(&self) -> bool {
        self.inner.strict
    }

    /// Decodes (and caches) the instruction at the given offset.
    pub fn instruction_at(&self, position: usize) -> VmResult<Rc<Instruction>> {
        if let Some(cached) = self.inner.cache.borrow().get(&position) {
            return Ok(cached.clone());
        }
        let instruction = Rc::new(Instruction::decode(self.as_bytes(), position)?);
        self.inner
            .cache
            .borrow_mut()
            .insert(position, instruction.clone());
        Ok(instruction)
    }

    /// Identity comparison: two handles to the same loaded script.
    pub fn same_script(&self, other: &Script) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Script {
    fn eq(&self, other: &Self) -> bool {
        self.inner.bytes == other.inner.bytes
    }
}

impl Eq for Script {}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({} bytes)", self.len())
    }
}

impl From<Vec<u8>> for Script {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}
