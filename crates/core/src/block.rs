//! Block and block-header model.

use crate::error::{CoreError, CoreResult};
use crate::transaction::Transaction;
use crate::uint160::UInt160;
use crate::uint256::UInt256;
use crate::witness::Witness;
use neoxide_io::{
    deserialize_vec, serialize_vec, var_int_size, BinaryWriter, IoResult, MemoryReader,
    Serializable, SerializableExt,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum number of transactions carried by one block.
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 512;

/// A block header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Format version; only 0 is defined.
    pub version: u32,
    /// Hash of the previous block.
    pub prev_hash: UInt256,
    /// Merkle root over the block's transaction hashes.
    pub merkle_root: UInt256,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Consensus nonce.
    pub nonce: u64,
    /// Height of this block.
    pub index: u32,
    /// Index of the primary consensus node for this round.
    pub primary_index: u8,
    /// Script hash of the next round's consensus multisig.
    pub next_consensus: UInt160,
    /// The consensus witness.
    pub witness: Witness,
}

impl PartialEq for BlockHeader {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for BlockHeader {}

impl BlockHeader {
    /// Serializes every field except the witness.
    pub fn unsigned_data(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::with_capacity(self.size());
        self.serialize_unsigned(&mut writer);
        writer.into_bytes()
    }

    /// The identity hash: SHA-256 over the unsigned serialization.
    pub fn hash(&self) -> UInt256 {
        let digest = Sha256::digest(self.unsigned_data());
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        UInt256::from_bytes(out)
    }

    /// Whether this header chains onto `previous`.
    pub fn links_to(&self, previous: &BlockHeader) -> bool {
        self.prev_hash == previous.hash()
            && self.index == previous.index + 1
            && self.timestamp > previous.timestamp
    }

    fn serialize_unsigned(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.version);
        writer.write_bytes(self.prev_hash.as_bytes());
        writer.write_bytes(self.merkle_root.as_bytes());
        writer.write_u64(self.timestamp);
        writer.write_u64(self.nonce);
        writer.write_u32(self.index);
        writer.write_byte(self.primary_index);
        writer.write_bytes(self.next_consensus.as_bytes());
    }
}

impl Serializable for BlockHeader {
    fn size(&self) -> usize {
        4 + 32 + 32 + 8 + 8 + 4 + 1 + 20 + 1 + self.witness.size()
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        self.serialize_unsigned(writer);
        // One consensus witness, carried as a length-1 vector on the wire.
        writer.write_var_int(1);
        Serializable::serialize(&self.witness, writer)?;
        Ok(())
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let version = reader.read_u32()?;
        let prev_hash = <UInt256 as Serializable>::deserialize(reader)?;
        let merkle_root = <UInt256 as Serializable>::deserialize(reader)?;
        let timestamp = reader.read_u64()?;
        let nonce = reader.read_u64()?;
        let index = reader.read_u32()?;
        let primary_index = reader.read_byte()?;
        let next_consensus = <UInt160 as Serializable>::deserialize(reader)?;
        let witness_count = reader.read_var_int(1)?;
        if witness_count != 1 {
            return Err(neoxide_io::IoError::invalid_data(
                "header witness count",
                witness_count.to_string(),
            ));
        }
        let witness = <Witness as Serializable>::deserialize(reader)?;
        Ok(Self {
            version,
            prev_hash,
            merkle_root,
            timestamp,
            nonce,
            index,
            primary_index,
            next_consensus,
            witness,
        })
    }
}

/// A full block: header plus transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The header.
    pub header: BlockHeader,
    /// The transactions, in consensus order.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The block's identity hash (the header hash).
    pub fn hash(&self) -> UInt256 {
        self.header.hash()
    }

    /// The block height.
    pub fn index(&self) -> u32 {
        self.header.index
    }

    /// Computes the Merkle root over the transaction hashes.
    pub fn compute_merkle_root(&self) -> UInt256 {
        let mut layer: Vec<UInt256> = self.transactions.iter().map(|tx| tx.hash()).collect();
        if layer.is_empty() {
            return UInt256::zero();
        }
        while layer.len() > 1 {
            if layer.len() % 2 == 1 {
                let last = *layer.last().expect("layer is non-empty");
                layer.push(last);
            }
            layer = layer
                .chunks(2)
                .map(|pair| {
                    let mut data = Vec::with_capacity(64);
                    data.extend_from_slice(pair[0].as_bytes());
                    data.extend_from_slice(pair[1].as_bytes());
                    let digest = Sha256::digest(Sha256::digest(data));
                    let mut out = [0u8; 32];
                    out.copy_from_slice(&digest);
                    UInt256::from_bytes(out)
                })
                .collect();
        }
        layer[0]
    }

    /// Structural validation independent of chain state.
    pub fn validate_structure(&self) -> CoreResult<()> {
        if self.transactions.len() > MAX_TRANSACTIONS_PER_BLOCK {
            return Err(CoreError::invalid_data("too many transactions in block"));
        }
        if self.header.merkle_root != self.compute_merkle_root() {
            return Err(CoreError::invalid_data("merkle root mismatch"));
        }
        for (i, tx) in self.transactions.iter().enumerate() {
            if self.transactions[..i].iter().any(|t| t.hash() == tx.hash()) {
                return Err(CoreError::invalid_data("duplicate transaction in block"));
            }
        }
        Ok(())
    }
}

impl Serializable for Block {
    fn size(&self) -> usize {
        self.header.size()
            + var_int_size(self.transactions.len() as u64)
            + self.transactions.iter().map(|tx| tx.size()).sum::<usize>()
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        Serializable::serialize(&self.header, writer)?;
        serialize_vec(&self.transactions, writer)?;
        Ok(())
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let header = <BlockHeader as Serializable>::deserialize(reader)?;
        let transactions = deserialize_vec(reader, MAX_TRANSACTIONS_PER_BLOCK)?;
        Ok(Self {
            header,
            transactions,
        })
    }
}

/// Decodes a block from Base64, the encoding used on the RPC surface.
pub fn block_from_base64(text: &str) -> CoreResult<Block> {
    use base64::Engine as _;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|e| CoreError::invalid_format(format!("invalid base64: {e}")))?;
    Ok(Block::from_array(&bytes)?)
}
