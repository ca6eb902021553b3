//! Programmatic bytecode construction.

use crate::error::{VmError, VmResult};
use crate::execution_engine::syscall_hash;
use crate::op_code::{OpCode, OperandSize};
use crate::script::Script;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

/// Builds scripts with canonical (shortest) push encodings.
#[derive(Default)]
pub struct ScriptBuilder {
    bytes: Vec<u8>,
}

impl ScriptBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current length of the script under construction.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing has been emitted yet.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Emits a bare opcode.
    pub fn emit(&mut self, opcode: OpCode) -> &mut Self {
        self.bytes.push(opcode.as_byte());
        self
    }

    /// Emits an opcode with a fixed-size operand.
    pub fn emit_with_operand(&mut self, opcode: OpCode, operand: &[u8]) -> VmResult<&mut Self> {
        match opcode.operand_size() {
            OperandSize::Fixed(size) if size == operand.len() => {}
            other => {
                return Err(VmError::invalid_operation(format!(
                    "operand of {} bytes does not fit {opcode} ({other:?})",
                    operand.len()
                )))
            }
        }
        self.bytes.push(opcode.as_byte());
        self.bytes.extend_from_slice(operand);
        Ok(self)
    }

    /// Emits the canonical push for an integer: `PUSHM1`/`PUSH0`…`PUSH16`
    /// for small values, else the narrowest `PUSHINT*`.
    pub fn emit_push_int<T: Into<BigInt>>(&mut self, value: T) -> VmResult<&mut Self> {
        let value: BigInt = value.into();
        if let Some(small) = value.to_i32() {
            if (-1..=16).contains(&small) {
                let opcode = (OpCode::PUSH0.as_byte() as i32 + small) as u8;
                self.bytes.push(opcode);
                return Ok(self);
            }
        }

        let bytes = value.to_signed_bytes_le();
        let (opcode, width) = match bytes.len() {
            0..=1 => (OpCode::PUSHINT8, 1),
            2 => (OpCode::PUSHINT16, 2),
            3..=4 => (OpCode::PUSHINT32, 4),
            5..=8 => (OpCode::PUSHINT64, 8),
            9..=16 => (OpCode::PUSHINT128, 16),
            17..=32 => (OpCode::PUSHINT256, 32),
            _ => {
                return Err(VmError::limit_exceeded(
                    "integer size",
                    bytes.len(),
                    32,
                ))
            }
        };
        // Sign-extend to the operand width.
        let fill = if value.is_negative() { 0xFF } else { 0x00 };
        let mut operand = bytes;
        operand.resize(width, fill);
        self.bytes.push(opcode.as_byte());
        self.bytes.extend_from_slice(&operand);
        Ok(self)
    }

    /// Emits `PUSHT` or `PUSHF`.
    pub fn emit_push_bool(&mut self, value: bool) -> &mut Self {
        self.emit(if value { OpCode::PUSHT } else { OpCode::PUSHF })
    }

    /// Emits `PUSHNULL`.
    pub fn emit_push_null(&mut self) -> &mut Self {
        self.emit(OpCode::PUSHNULL)
    }

    /// Emits the narrowest `PUSHDATA*` for the given bytes.
    pub fn emit_push_bytes(&mut self, data: &[u8]) -> VmResult<&mut Self> {
        if data.len() <= u8::MAX as usize {
            self.bytes.push(OpCode::PUSHDATA1.as_byte());
            self.bytes.push(data.len() as u8);
        } else if data.len() <= u16::MAX as usize {
            self.bytes.push(OpCode::PUSHDATA2.as_byte());
            self.bytes.extend_from_slice(&(data.len() as u16).to_le_bytes());
        } else if data.len() <= u32::MAX as usize {
            self.bytes.push(OpCode::PUSHDATA4.as_byte());
            self.bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        } else {
            return Err(VmError::limit_exceeded("push data size", data.len(), u32::MAX as usize));
        }
        self.bytes.extend_from_slice(data);
        Ok(self)
    }

    /// Emits a UTF-8 string push.
    pub fn emit_push_string(&mut self, value: &str) -> VmResult<&mut Self> {
        self.emit_push_bytes(value.as_bytes())
    }

    /// Emits a jump with a long offset.
    pub fn emit_jump(&mut self, opcode: OpCode, offset: i32) -> VmResult<&mut Self> {
        match opcode.operand_size() {
            OperandSize::Fixed(4) => {}
            _ => {
                return Err(VmError::invalid_operation(format!(
                    "{opcode} is not a long-offset jump"
                )))
            }
        }
        self.bytes.push(opcode.as_byte());
        self.bytes.extend_from_slice(&offset.to_le_bytes());
        Ok(self)
    }

    /// Emits `CALL_L` with the given offset.
    pub fn emit_call(&mut self, offset: i32) -> VmResult<&mut Self> {
        self.emit_jump(OpCode::CALL_L, offset)
    }

    /// Emits `SYSCALL` with the hash of the given service name.
    pub fn emit_syscall(&mut self, name: &str) -> &mut Self {
        self.bytes.push(OpCode::SYSCALL.as_byte());
        self.bytes
            .extend_from_slice(&syscall_hash(name).to_le_bytes());
        self
    }

    /// Raw bytes appended verbatim.
    pub fn emit_raw(&mut self, data: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(data);
        self
    }

    /// The finished bytecode.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    /// The finished bytecode as a relaxed script.
    pub fn to_script(&self) -> Script {
        Script::new(self.bytes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_int_encodings() {
        let mut builder = ScriptBuilder::new();
        builder.emit_push_int(-1).unwrap();
        builder.emit_push_int(0).unwrap();
        builder.emit_push_int(16).unwrap();
        assert_eq!(
            builder.to_bytes(),
            vec![
                OpCode::PUSHM1.as_byte(),
                OpCode::PUSH0.as_byte(),
                OpCode::PUSH16.as_byte()
            ]
        );
    }

    #[test]
    fn test_wide_int_encodings() {
        let mut builder = ScriptBuilder::new();
        builder.emit_push_int(17).unwrap();
        assert_eq!(builder.to_bytes(), vec![OpCode::PUSHINT8.as_byte(), 17]);

        let mut builder = ScriptBuilder::new();
        builder.emit_push_int(-2).unwrap();
        assert_eq!(builder.to_bytes(), vec![OpCode::PUSHINT8.as_byte(), 0xFE]);

        let mut builder = ScriptBuilder::new();
        builder.emit_push_int(0x1234).unwrap();
        assert_eq!(
            builder.to_bytes(),
            vec![OpCode::PUSHINT16.as_byte(), 0x34, 0x12]
        );

        let mut builder = ScriptBuilder::new();
        builder.emit_push_int(1i64 << 40).unwrap();
        assert_eq!(builder.to_bytes()[0], OpCode::PUSHINT64.as_byte());
        assert_eq!(builder.to_bytes().len(), 9);
    }

    #[test]
    fn test_negative_sign_extension() {
        let mut builder = ScriptBuilder::new();
        builder.emit_push_int(-300).unwrap();
        let bytes = builder.to_bytes();
        assert_eq!(bytes[0], OpCode::PUSHINT16.as_byte());
        assert_eq!(i16::from_le_bytes([bytes[1], bytes[2]]), -300);
    }

    #[test]
    fn test_int_too_wide_rejected() {
        let mut builder = ScriptBuilder::new();
        assert!(builder.emit_push_int(BigInt::from(1u8) << 300).is_err());
    }

    #[test]
    fn test_pushdata_widths() {
        let mut builder = ScriptBuilder::new();
        builder.emit_push_bytes(&[0xAB; 10]).unwrap();
        assert_eq!(builder.to_bytes()[0], OpCode::PUSHDATA1.as_byte());

        let mut builder = ScriptBuilder::new();
        builder.emit_push_bytes(&vec![0u8; 300]).unwrap();
        assert_eq!(builder.to_bytes()[0], OpCode::PUSHDATA2.as_byte());

        let mut builder = ScriptBuilder::new();
        builder.emit_push_bytes(&vec![0u8; 70_000]).unwrap();
        assert_eq!(builder.to_bytes()[0], OpCode::PUSHDATA4.as_byte());
    }

    #[test]
    fn test_syscall_emission() {
        let mut builder = ScriptBuilder::new();
        builder.emit_syscall("System.Runtime.Platform");
        let bytes = builder.to_bytes();
        assert_eq!(bytes[0], OpCode::SYSCALL.as_byte());
        assert_eq!(
            u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
            syscall_hash("System.Runtime.Platform")
        );
    }

    #[test]
    fn test_operand_width_enforced() {
        let mut builder = ScriptBuilder::new();
        assert!(builder.emit_with_operand(OpCode::JMP, &[1, 2]).is_err());
        assert!(builder.emit_with_operand(OpCode::JMP, &[2]).is_ok());
    }
}
