//! # Neoxide I/O
//!
//! Binary serialization substrate shared by every wire-facing crate in the
//! workspace: a positioned [`MemoryReader`], a growable [`BinaryWriter`],
//! the [`Serializable`] trait, and the Neo variable-length integer codec.
//!
//! The byte layouts produced here are consensus-critical; nothing in this
//! crate is serde-based on purpose.

pub mod binary_writer;
pub mod error;
pub mod memory_reader;
pub mod serializable;

pub use binary_writer::{var_bytes_size, var_int_size, BinaryWriter};
pub use error::{IoError, IoResult};
pub use memory_reader::{MemoryReader, MAX_VAR_BYTES};
pub use serializable::{deserialize_vec, serialize_vec, Serializable, SerializableExt};
