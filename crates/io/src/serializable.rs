//! Serialization trait for Neo wire objects.

use crate::{BinaryWriter, IoResult, MemoryReader};

/// Objects that encode to and decode from the Neo wire format.
pub trait Serializable {
    /// The size of the object in bytes after serialization.
    fn size(&self) -> usize;

    /// Serializes the object using the specified writer.
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()>;

    /// Deserializes the object using the specified reader.
    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self>
    where
        Self: Sized;
}

/// Extension methods for serializable objects.
pub trait SerializableExt: Serializable {
    /// Encodes the object to a fresh byte vector.
    fn to_array(&self) -> IoResult<Vec<u8>> {
        let mut writer = BinaryWriter::with_capacity(self.size());
        self.serialize(&mut writer)?;
        Ok(writer.into_bytes())
    }

    /// Decodes an object from a byte slice, requiring the slice to be fully
    /// consumed.
    fn from_array(data: &[u8]) -> IoResult<Self>
    where
        Self: Sized,
    {
        let mut reader = MemoryReader::new(data);
        let value = Self::deserialize(&mut reader)?;
        if reader.remaining() != 0 {
            return Err(crate::IoError::invalid_data(
                "trailing bytes",
                reader.remaining().to_string(),
            ));
        }
        Ok(value)
    }
}

impl<T: Serializable> SerializableExt for T {}

/// Serializes a length-prefixed vector of serializable items.
pub fn serialize_vec<T: Serializable>(items: &[T], writer: &mut BinaryWriter) -> IoResult<()> {
    writer.write_var_int(items.len() as u64);
    for item in items {
        item.serialize(writer)?;
    }
    Ok(())
}

/// Deserializes a length-prefixed vector of serializable items, bounded by `max`.
pub fn deserialize_vec<T: Serializable>(
    reader: &mut MemoryReader<'_>,
    max: usize,
) -> IoResult<Vec<T>> {
    let count = reader.read_var_int(max as u64)? as usize;
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        items.push(T::deserialize(reader)?);
    }
    Ok(items)
}
