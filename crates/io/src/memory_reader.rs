//! Positioned reader over an in-memory byte span.

use crate::error::{IoError, IoResult};

/// Maximum length accepted for a var-length byte array unless the caller
/// passes a tighter bound.
pub const MAX_VAR_BYTES: usize = 0x1000000;

/// A reader for decoding the Neo wire format from a byte slice.
pub struct MemoryReader<'a> {
    span: &'a [u8],
    pos: usize,
}

impl<'a> MemoryReader<'a> {
    /// Creates a new reader over the given data.
    pub fn new(data: &'a [u8]) -> Self {
        Self { span: data, pos: 0 }
    }

    /// Current position in the underlying span.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Total length of the underlying span.
    pub fn len(&self) -> usize {
        self.span.len()
    }

    /// Whether the underlying span is empty.
    pub fn is_empty(&self) -> bool {
        self.span.is_empty()
    }

    /// Number of bytes left to read.
    pub fn remaining(&self) -> usize {
        self.span.len() - self.pos
    }

    /// Moves the read position.
    pub fn set_position(&mut self, position: usize) -> IoResult<()> {
        if position > self.span.len() {
            return Err(IoError::invalid_operation(
                "set_position",
                format!("position {position} is out of bounds"),
            ));
        }
        self.pos = position;
        Ok(())
    }

    fn ensure(&self, count: usize, context: &str) -> IoResult<()> {
        if self.remaining() < count {
            return Err(IoError::end_of_stream(count - self.remaining(), context));
        }
        Ok(())
    }

    /// Peeks at the next byte without advancing.
    pub fn peek(&self) -> IoResult<u8> {
        self.ensure(1, "peek")?;
        Ok(self.span[self.pos])
    }

    /// Reads a single byte.
    pub fn read_byte(&mut self) -> IoResult<u8> {
        self.ensure(1, "u8")?;
        let b = self.span[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// Reads a boolean encoded as a single byte, rejecting values other than 0 and 1.
    pub fn read_bool(&mut self) -> IoResult<bool> {
        match self.read_byte()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(IoError::invalid_data("bool", other.to_string())),
        }
    }

    /// Reads a little-endian u16.
    pub fn read_u16(&mut self) -> IoResult<u16> {
        self.ensure(2, "u16")?;
        let v = u16::from_le_bytes([self.span[self.pos], self.span[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    /// Reads a little-endian i16.
    pub fn read_i16(&mut self) -> IoResult<i16> {
        Ok(self.read_u16()? as i16)
    }

    /// Reads a little-endian u32.
    pub fn read_u32(&mut self) -> IoResult<u32> {
        self.ensure(4, "u32")?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.span[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(u32::from_le_bytes(buf))
    }

    /// Reads a little-endian i32.
    pub fn read_i32(&mut self) -> IoResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Reads a little-endian u64.
    pub fn read_u64(&mut self) -> IoResult<u64> {
        self.ensure(8, "u64")?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.span[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads a little-endian i64.
    pub fn read_i64(&mut self) -> IoResult<i64> {
        Ok(self.read_u64()? as i64)
    }

    /// Reads `count` raw bytes.
    pub fn read_bytes(&mut self, count: usize) -> IoResult<Vec<u8>> {
        self.ensure(count, "bytes")?;
        let out = self.span[self.pos..self.pos + count].to_vec();
        self.pos += count;
        Ok(out)
    }

    /// Reads a fixed-size array.
    pub fn read_fixed<const N: usize>(&mut self) -> IoResult<[u8; N]> {
        self.ensure(N, "fixed bytes")?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.span[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    /// Reads a Neo variable-length integer (1/3/5/9-byte encoding).
    pub fn read_var_int(&mut self, max: u64) -> IoResult<u64> {
        let first = self.read_byte()?;
        let value = match first {
            0xfd => self.read_u16()? as u64,
            0xfe => self.read_u32()? as u64,
            0xff => self.read_u64()?,
            v => v as u64,
        };
        if value > max {
            return Err(IoError::length_exceeded(value as usize, max as usize, "var-int"));
        }
        Ok(value)
    }

    /// Reads a variable-length byte array, bounded by `max`.
    pub fn read_var_bytes(&mut self, max: usize) -> IoResult<Vec<u8>> {
        let len = self.read_var_int(max as u64)? as usize;
        self.read_bytes(len)
    }

    /// Reads a variable-length UTF-8 string, bounded by `max` bytes.
    pub fn read_var_string(&mut self, max: usize) -> IoResult<String> {
        let bytes = self.read_var_bytes(max)?;
        String::from_utf8(bytes)
            .map_err(|_| IoError::invalid_data("var-string", "not valid UTF-8"))
    }
}
