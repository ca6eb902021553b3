//! The 256-entry opcode table.

use crate::error::{VmError, VmResult};
use std::fmt;

/// How an opcode's operand is laid out after the opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandSize {
    /// No operand.
    None,
    /// A fixed number of operand bytes.
    Fixed(usize),
    /// A little-endian length prefix of the given width, followed by that
    /// many data bytes.
    Prefix(usize),
}

macro_rules! opcodes {
    ($($name:ident = $value:literal => $operand:expr;)*) => {
        /// An instruction opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum OpCode {
            $($name = $value,)*
        }

        impl OpCode {
            /// Decodes an opcode byte.
            pub fn from_byte(byte: u8) -> VmResult<Self> {
                match byte {
                    $($value => Ok(OpCode::$name),)*
                    other => Err(VmError::InvalidOpCode { opcode: other }),
                }
            }

            /// The operand layout of this opcode.
            pub fn operand_size(self) -> OperandSize {
                match self {
                    $(OpCode::$name => $operand,)*
                }
            }
        }
    };
}

use OperandSize::{Fixed, None as NoOperand, Prefix};

opcodes! {
    // Constants
    PUSHINT8 = 0x00 => Fixed(1);
    PUSHINT16 = 0x01 => Fixed(2);
    PUSHINT32 = 0x02 => Fixed(4);
    PUSHINT64 = 0x03 => Fixed(8);
    PUSHINT128 = 0x04 => Fixed(16);
    PUSHINT256 = 0x05 => Fixed(32);
    PUSHT = 0x08 => NoOperand;
    PUSHF = 0x09 => NoOperand;
    PUSHA = 0x0A => Fixed(4);
    PUSHNULL = 0x0B => NoOperand;
    PUSHDATA1 = 0x0C => Prefix(1);
    PUSHDATA2 = 0x0D => Prefix(2);
    PUSHDATA4 = 0x0E => Prefix(4);
    PUSHM1 = 0x0F => NoOperand;
    PUSH0 = 0x10 => NoOperand;
    PUSH1 = 0x11 => NoOperand;
    PUSH2 = 0x12 => NoOperand;
    PUSH3 = 0x13 => NoOperand;
    PUSH4 = 0x14 => NoOperand;
    PUSH5 = 0x15 => NoOperand;
    PUSH6 = 0x16 => NoOperand;
    PUSH7 = 0x17 => NoOperand;
    PUSH8 = 0x18 => NoOperand;
    PUSH9 = 0x19 => NoOperand;
    PUSH10 = 0x1A => NoOperand;
    PUSH11 = 0x1B => NoOperand;
    PUSH12 = 0x1C => NoOperand;
    PUSH13 = 0x1D => NoOperand;
    PUSH14 = 0x1E => NoOperand;
    PUSH15 = 0x1F => NoOperand;
    PUSH16 = 0x20 => NoOperand;

    // Flow control
    NOP = 0x21 => NoOperand;
    JMP = 0x22 => Fixed(1);
    JMP_L = 0x23 => Fixed(4);
    JMPIF = 0x24 => Fixed(1);
    JMPIF_L = 0x25 => Fixed(4);
    JMPIFNOT = 0x26 => Fixed(1);
    JMPIFNOT_L = 0x27 => Fixed(4);
    JMPEQ = 0x28 => Fixed(1);
    JMPEQ_L = 0x29 => Fixed(4);
    JMPNE = 0x2A => Fixed(1);
    JMPNE_L = 0x2B => Fixed(4);
    JMPGT = 0x2C => Fixed(1);
    JMPGT_L = 0x2D => Fixed(4);
    JMPGE = 0x2E => Fixed(1);
    JMPGE_L = 0x2F => Fixed(4);
    JMPLT = 0x30 => Fixed(1);
    JMPLT_L = 0x31 => Fixed(4);
    JMPLE = 0x32 => Fixed(1);
    JMPLE_L = 0x33 => Fixed(4);
    CALL = 0x34 => Fixed(1);
    CALL_L = 0x35 => Fixed(4);
    CALLA = 0x36 => NoOperand;
    CALLT = 0x37 => Fixed(2);
    ABORT = 0x38 => NoOperand;
    ASSERT = 0x39 => NoOperand;
    THROW = 0x3A => NoOperand;
    TRY = 0x3B => Fixed(2);
    TRY_L = 0x3C => Fixed(8);
    ENDTRY = 0x3D => Fixed(1);
    ENDTRY_L = 0x3E => Fixed(4);
    ENDFINALLY = 0x3F => NoOperand;
    RET = 0x40 => NoOperand;
    SYSCALL = 0x41 => Fixed(4);

    // Stack
    DEPTH = 0x43 => NoOperand;
    DROP = 0x45 => NoOperand;
    NIP = 0x46 => NoOperand;
    XDROP = 0x48 => NoOperand;
    CLEAR = 0x49 => NoOperand;
    DUP = 0x4A => NoOperand;
    OVER = 0x4B => NoOperand;
    PICK = 0x4D => NoOperand;
    TUCK = 0x4E => NoOperand;
    SWAP = 0x50 => NoOperand;
    ROT = 0x51 => NoOperand;
    ROLL = 0x52 => NoOperand;
    REVERSE3 = 0x53 => NoOperand;
    REVERSE4 = 0x54 => NoOperand;
    REVERSEN = 0x55 => NoOperand;

    // Slots
    INITSSLOT = 0x56 => Fixed(1);
    INITSLOT = 0x57 => Fixed(2);
    LDSFLD0 = 0x58 => NoOperand;
    LDSFLD1 = 0x59 => NoOperand;
    LDSFLD2 = 0x5A => NoOperand;
    LDSFLD3 = 0x5B => NoOperand;
    LDSFLD4 = 0x5C => NoOperand;
    LDSFLD5 = 0x5D => NoOperand;
    LDSFLD6 = 0x5E => NoOperand;
    LDSFLD = 0x5F => Fixed(1);
    STSFLD0 = 0x60 => NoOperand;
    STSFLD1 = 0x61 => NoOperand;
    STSFLD2 = 0x62 => NoOperand;
    STSFLD3 = 0x63 => NoOperand;
    STSFLD4 = 0x64 => NoOperand;
    STSFLD5 = 0x65 => NoOperand;
    STSFLD6 = 0x66 => NoOperand;
    STSFLD = 0x67 => Fixed(1);
    LDLOC0 = 0x68 => NoOperand;
    LDLOC1 = 0x69 => NoOperand;
    LDLOC2 = 0x6A => NoOperand;
    LDLOC3 = 0x6B => NoOperand;
    LDLOC4 = 0x6C => NoOperand;
    LDLOC5 = 0x6D => NoOperand;
    LDLOC6 = 0x6E => NoOperand;
    LDLOC = 0x6F => Fixed(1);
    STLOC0 = 0x70 => NoOperand;
    STLOC1 = 0x71 => NoOperand;
    STLOC2 = 0x72 => NoOperand;
    STLOC3 = 0x73 => NoOperand;
    STLOC4 = 0x74 => NoOperand;
    STLOC5 = 0x75 => NoOperand;
    STLOC6 = 0x76 => NoOperand;
    STLOC = 0x77 => Fixed(1);
    LDARG0 = 0x78 => NoOperand;
    LDARG1 = 0x79 => NoOperand;
    LDARG2 = 0x7A => NoOperand;
    LDARG3 = 0x7B => NoOperand;
    LDARG4 = 0x7C => NoOperand;
    LDARG5 = 0x7D => NoOperand;
    LDARG6 = 0x7E => NoOperand;
    LDARG = 0x7F => Fixed(1);
    STARG0 = 0x80 => NoOperand;
    STARG1 = 0x81 => NoOperand;
    STARG2 = 0x82 => NoOperand;
    STARG3 = 0x83 => NoOperand;
    STARG4 = 0x84 => NoOperand;
    STARG5 = 0x85 => NoOperand;
    STARG6 = 0x86 => NoOperand;
    STARG = 0x87 => Fixed(1);

    // Splice
    NEWBUFFER = 0x88 => NoOperand;
    MEMCPY = 0x89 => NoOperand;
    CAT = 0x8B => NoOperand;
    SUBSTR = 0x8C => NoOperand;
    LEFT = 0x8D => NoOperand;
    RIGHT = 0x8E => NoOperand;

    // Bitwise logic
    INVERT = 0x90 => NoOperand;
    AND = 0x91 => NoOperand;
    OR = 0x92 => NoOperand;
    XOR = 0x93 => NoOperand;
    EQUAL = 0x97 => NoOperand;
    NOTEQUAL = 0x98 => NoOperand;

    // Arithmetic
    SIGN = 0x99 => NoOperand;
    ABS = 0x9A => NoOperand;
    NEGATE = 0x9B => NoOperand;
    INC = 0x9C => NoOperand;
    DEC = 0x9D => NoOperand;
    ADD = 0x9E => NoOperand;
    SUB = 0x9F => NoOperand;
    MUL = 0xA0 => NoOperand;
    DIV = 0xA1 => NoOperand;
    MOD = 0xA2 => NoOperand;
    POW = 0xA3 => NoOperand;
    SQRT = 0xA4 => NoOperand;
    MODMUL = 0xA5 => NoOperand;
    MODPOW = 0xA6 => NoOperand;
    SHL = 0xA8 => NoOperand;
    SHR = 0xA9 => NoOperand;
    NOT = 0xAA => NoOperand;
    BOOLAND = 0xAB => NoOperand;
    BOOLOR = 0xAC => NoOperand;
    NZ = 0xB1 => NoOperand;
    NUMEQUAL = 0xB3 => NoOperand;
    NUMNOTEQUAL = 0xB4 => NoOperand;
    LT = 0xB5 => NoOperand;
    LE = 0xB6 => NoOperand;
    GT = 0xB7 => NoOperand;
    GE = 0xB8 => NoOperand;
    MIN = 0xB9 => NoOperand;
    MAX = 0xBA => NoOperand;
    WITHIN = 0xBB => NoOperand;

    // Compound types
    PACKMAP = 0xBE => NoOperand;
    PACKSTRUCT = 0xBF => NoOperand;
    PACK = 0xC0 => NoOperand;
    UNPACK = 0xC1 => NoOperand;
    NEWARRAY0 = 0xC2 => NoOperand;
    NEWARRAY = 0xC3 => NoOperand;
    NEWARRAY_T = 0xC4 => Fixed(1);
    NEWSTRUCT0 = 0xC5 => NoOperand;
    NEWSTRUCT = 0xC6 => NoOperand;
    NEWMAP = 0xC8 => NoOperand;
    SIZE = 0xCA => NoOperand;
    HASKEY = 0xCB => NoOperand;
    KEYS = 0xCC => NoOperand;
    VALUES = 0xCD => NoOperand;
    PICKITEM = 0xCE => NoOperand;
    APPEND = 0xCF => NoOperand;
    SETITEM = 0xD0 => NoOperand;
    REVERSEITEMS = 0xD1 => NoOperand;
    REMOVE = 0xD2 => NoOperand;
    CLEARITEMS = 0xD3 => NoOperand;
    POPITEM = 0xD4 => NoOperand;

    // Types
    ISNULL = 0xD8 => NoOperand;
    ISTYPE = 0xD9 => Fixed(1);
    CONVERT = 0xDB => Fixed(1);

    // Extensions
    ABORTMSG = 0xE0 => NoOperand;
    ASSERTMSG = 0xE1 => NoOperand;
}

impl OpCode {
    /// The opcode byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether this is one of the direct push opcodes.
    pub fn is_push(self) -> bool {
        (self as u8) <= OpCode::PUSH16 as u8
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
