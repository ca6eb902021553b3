//! Decoded instruction: an opcode plus its operand bytes.

use crate::error::{VmError, VmResult};
use crate::op_code::{OpCode, OperandSize};
use bytes::Bytes;

/// A decoded instruction. For prefixed opcodes (`PUSHDATA*`) the operand
/// holds the data bytes, not the length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Byte offset of the opcode within its script.
    pub pointer: usize,
    /// The opcode.
    pub opcode: OpCode,
    /// The operand data.
    pub operand: Bytes,
    prefix_len: usize,
}

impl Instruction {
    /// Decodes the instruction starting at `position`.
    pub fn decode(script: &[u8], position: usize) -> VmResult<Self> {
        let Some(&opcode_byte) = script.get(position) else {
            return Err(VmError::parse(format!(
                "instruction pointer {position} is past the end of the script"
            )));
        };
        let opcode = OpCode::from_byte(opcode_byte)?;

        let (prefix_len, operand_len) = match opcode.operand_size() {
            OperandSize::None => (0, 0),
            OperandSize::Fixed(n) => (0, n),
            OperandSize::Prefix(width) => {
                let prefix_start = position + 1;
                let prefix_end = prefix_start + width;
                if prefix_end > script.len() {
                    return Err(VmError::parse(format!(
                        "{opcode} length prefix runs past the end of the script"
                    )));
                }
                let mut length = 0usize;
                for (i, &b) in script[prefix_start..prefix_end].iter().enumerate() {
                    length |= (b as usize) << (8 * i);
                }
                (width, length)
            }
        };

        let operand_start = position + 1 + prefix_len;
        let operand_end = operand_start + operand_len;
        if operand_end > script.len() {
            return Err(VmError::parse(format!(
                "{opcode} operand of {operand_len} bytes runs past the end of the script"
            )));
        }

        Ok(Self {
            pointer: position,
            opcode,
            operand: Bytes::copy_from_slice(&script[operand_start..operand_end]),
            prefix_len,
        })
    }

    /// Total encoded size: opcode byte, length prefix and operand.
    pub fn size(&self) -> usize {
        1 + self.prefix_len + self.operand.len()
    }

    /// Offset of the next instruction.
    pub fn next_pointer(&self) -> usize {
        self.pointer + self.size()
    }

    fn operand_slice(&self, offset: usize, len: usize) -> VmResult<&[u8]> {
        self.operand
            .get(offset..offset + len)
            .ok_or_else(|| VmError::parse(format!("{} operand too short", self.opcode)))
    }

    /// Reads the operand as a signed byte.
    pub fn token_i8(&self) -> VmResult<i8> {
        Ok(self.operand_slice(0, 1)?[0] as i8)
    }

    /// Reads a signed byte at the given operand offset.
    pub fn token_i8_at(&self, offset: usize) -> VmResult<i8> {
        Ok(self.operand_slice(offset, 1)?[0] as i8)
    }

    /// Reads the operand as an unsigned byte.
    pub fn token_u8(&self) -> VmResult<u8> {
        Ok(self.operand_slice(0, 1)?[0])
    }

    /// Reads an unsigned byte at the given operand offset.
    pub fn token_u8_at(&self, offset: usize) -> VmResult<u8> {
        Ok(self.operand_slice(offset, 1)?[0])
    }

    /// Reads the operand as a little-endian u16.
    pub fn token_u16(&self) -> VmResult<u16> {
        let bytes = self.operand_slice(0, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Reads the operand as a little-endian i32.
    pub fn token_i32(&self) -> VmResult<i32> {
        self.token_i32_at(0)
    }

    /// Reads a little-endian i32 at the given operand offset.
    pub fn token_i32_at(&self, offset: usize) -> VmResult<i32> {
        let bytes = self.operand_slice(offset, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads the operand as a little-endian u32.
    pub fn token_u32(&self) -> VmResult<u32> {
        let bytes = self.operand_slice(0, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_no_operand() {
        let script = [OpCode::NOP.as_byte(), OpCode::RET.as_byte()];
        let instr = Instruction::decode(&script, 0).unwrap();
        assert_eq!(instr.opcode, OpCode::NOP);
        assert_eq!(instr.size(), 1);
        assert_eq!(instr.next_pointer(), 1);
    }

    #[test]
    fn test_decode_fixed_operand() {
        let script = [OpCode::JMP.as_byte(), 0xFE];
        let instr = Instruction::decode(&script, 0).unwrap();
        assert_eq!(instr.token_i8().unwrap(), -2);
        assert_eq!(instr.size(), 2);
    }

    #[test]
    fn test_decode_pushdata1() {
        let script = [OpCode::PUSHDATA1.as_byte(), 3, 0xAA, 0xBB, 0xCC];
        let instr = Instruction::decode(&script, 0).unwrap();
        assert_eq!(instr.operand.as_ref(), &[0xAA, 0xBB, 0xCC]);
        assert_eq!(instr.size(), 5);
    }

    #[test]
    fn test_decode_pushdata2_length() {
        let mut script = vec![OpCode::PUSHDATA2.as_byte(), 0x00, 0x01];
        script.extend(vec![7u8; 256]);
        let instr = Instruction::decode(&script, 0).unwrap();
        assert_eq!(instr.operand.len(), 256);
        assert_eq!(instr.size(), 3 + 256);
    }

    #[test]
    fn test_truncated_operand_fails() {
        let script = [OpCode::PUSHINT32.as_byte(), 1, 2];
        assert!(Instruction::decode(&script, 0).is_err());
        let script = [OpCode::PUSHDATA1.as_byte(), 10, 1];
        assert!(Instruction::decode(&script, 0).is_err());
    }

    #[test]
    fn test_try_offsets() {
        let script = [OpCode::TRY.as_byte(), 0x05, 0x00];
        let instr = Instruction::decode(&script, 0).unwrap();
        assert_eq!(instr.token_i8_at(0).unwrap(), 5);
        assert_eq!(instr.token_i8_at(1).unwrap(), 0);
    }
}
