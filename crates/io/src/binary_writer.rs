//! Growable writer producing the Neo wire format.

use crate::error::{IoError, IoResult};

/// A writer for encoding the Neo wire format into an in-memory buffer.
#[derive(Default)]
pub struct BinaryWriter {
    buffer: Vec<u8>,
}

impl BinaryWriter {
    /// Creates a new empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writer with the given capacity pre-allocated.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consumes the writer and returns the buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Returns a copy of the buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.buffer.clone()
    }

    /// Writes a single byte.
    pub fn write_byte(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes a boolean as a single byte.
    pub fn write_bool(&mut self, value: bool) {
        self.buffer.push(value as u8);
    }

    /// Writes a little-endian u16.
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a little-endian i16.
    pub fn write_i16(&mut self, value: i16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a little-endian u32.
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a little-endian i32.
    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a little-endian u64.
    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a little-endian i64.
    pub fn write_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes a Neo variable-length integer.
    pub fn write_var_int(&mut self, value: u64) {
        if value < 0xfd {
            self.buffer.push(value as u8);
        } else if value <= 0xffff {
            self.buffer.push(0xfd);
            self.write_u16(value as u16);
        } else if value <= 0xffff_ffff {
            self.buffer.push(0xfe);
            self.write_u32(value as u32);
        } else {
            self.buffer.push(0xff);
            self.write_u64(value);
        }
    }

    /// Writes a length-prefixed byte array.
    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_var_int(bytes.len() as u64);
        self.write_bytes(bytes);
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_var_string(&mut self, value: &str) {
        self.write_var_bytes(value.as_bytes());
    }

    /// Writes a string into a fixed-width zero-padded field, used by the
    /// message command header. Fails if the string does not fit.
    pub fn write_fixed_string(&mut self, value: &str, width: usize) -> IoResult<()> {
        let bytes = value.as_bytes();
        if bytes.len() > width {
            return Err(IoError::length_exceeded(bytes.len(), width, "fixed string"));
        }
        self.buffer.extend_from_slice(bytes);
        self.buffer.extend(std::iter::repeat(0u8).take(width - bytes.len()));
        Ok(())
    }
}

/// Size in bytes of a value encoded as a var-int.
pub fn var_int_size(value: u64) -> usize {
    if value < 0xfd {
        1
    } else if value <= 0xffff {
        3
    } else if value <= 0xffff_ffff {
        5
    } else {
        9
    }
}

/// Size in bytes of a var-length byte array including its prefix.
pub fn var_bytes_size(len: usize) -> usize {
    var_int_size(len as u64) + len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_reader::MemoryReader;

    #[test]
    fn test_var_int_round_trip() {
        for value in [0u64, 1, 0xfc, 0xfd, 0xffff, 0x10000, 0xffff_ffff, 1 << 40] {
            let mut writer = BinaryWriter::new();
            writer.write_var_int(value);
            assert_eq!(writer.len(), var_int_size(value));
            let bytes = writer.into_bytes();
            let mut reader = MemoryReader::new(&bytes);
            assert_eq!(reader.read_var_int(u64::MAX).unwrap(), value);
        }
    }

    #[test]
    fn test_var_bytes_round_trip() {
        let payload = vec![7u8; 300];
        let mut writer = BinaryWriter::new();
        writer.write_var_bytes(&payload);
        let bytes = writer.into_bytes();
        let mut reader = MemoryReader::new(&bytes);
        assert_eq!(reader.read_var_bytes(1024).unwrap(), payload);
    }

    #[test]
    fn test_fixed_string_padding() {
        let mut writer = BinaryWriter::new();
        writer.write_fixed_string("inv", 12).unwrap();
        let bytes = writer.into_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..3], b"inv");
        assert!(bytes[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_fixed_string_too_long() {
        let mut writer = BinaryWriter::new();
        assert!(writer.write_fixed_string("averylongcommand", 12).is_err());
    }
}
