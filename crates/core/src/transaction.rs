//! Neo N3 transaction: wire codec, identity hash and sign-data.

use crate::error::{CoreError, CoreResult};
use crate::signer::Signer;
use crate::uint160::UInt160;
use crate::uint256::UInt256;
use crate::witness::Witness;
use neoxide_io::{
    deserialize_vec, serialize_vec, var_bytes_size, var_int_size, BinaryWriter, IoError, IoResult,
    MemoryReader, Serializable, SerializableExt,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum size of a transaction in bytes.
pub const MAX_TRANSACTION_SIZE: usize = 102_400;
/// Maximum number of attributes on a transaction.
pub const MAX_TRANSACTION_ATTRIBUTES: usize = 16;
/// Maximum number of signers on a transaction.
pub const MAX_TRANSACTION_SIGNERS: usize = 16;
/// Maximum size of a transaction script.
pub const MAX_TRANSACTION_SCRIPT: usize = 65_535;

/// Fixed-width portion of the transaction wire format.
pub const HEADER_SIZE: usize = 1 + 4 + 8 + 8 + 4;

/// A transaction attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransactionAttribute {
    /// Marks the transaction for priority pool admission.
    HighPriority,
    /// The transaction is invalid before the given height.
    NotValidBefore { height: u32 },
    /// The transaction conflicts with another by hash.
    Conflicts { hash: UInt256 },
}

impl TransactionAttribute {
    const HIGH_PRIORITY: u8 = 0x01;
    const NOT_VALID_BEFORE: u8 = 0x20;
    const CONFLICTS: u8 = 0x21;
}

impl Serializable for TransactionAttribute {
    fn size(&self) -> usize {
        match self {
            Self::HighPriority => 1,
            Self::NotValidBefore { .. } => 1 + 4,
            Self::Conflicts { .. } => 1 + 32,
        }
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        match self {
            Self::HighPriority => writer.write_byte(Self::HIGH_PRIORITY),
            Self::NotValidBefore { height } => {
                writer.write_byte(Self::NOT_VALID_BEFORE);
                writer.write_u32(*height);
            }
            Self::Conflicts { hash } => {
                writer.write_byte(Self::CONFLICTS);
                Serializable::serialize(hash, writer)?;
            }
        }
        Ok(())
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        match reader.read_byte()? {
            Self::HIGH_PRIORITY => Ok(Self::HighPriority),
            Self::NOT_VALID_BEFORE => Ok(Self::NotValidBefore {
                height: reader.read_u32()?,
            }),
            Self::CONFLICTS => Ok(Self::Conflicts {
                hash: <UInt256 as Serializable>::deserialize(reader)?,
            }),
            other => Err(IoError::invalid_data(
                "transaction attribute",
                format!("{other:#04x}"),
            )),
        }
    }
}

/// A Neo N3 transaction.
///
/// The identity hash covers everything except the witnesses; signatures
/// cover the network magic concatenated with that hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Format version; only 0 is defined.
    pub version: u8,
    /// Random value distinguishing otherwise-identical transactions.
    pub nonce: u32,
    /// Execution fee in datoshi.
    pub system_fee: i64,
    /// Relay fee in datoshi.
    pub network_fee: i64,
    /// Height after which the transaction expires.
    pub valid_until_block: u32,
    /// Accounts whose witnesses the transaction carries.
    pub signers: Vec<Signer>,
    /// Optional attributes.
    pub attributes: Vec<TransactionAttribute>,
    /// The script executed under the Application trigger.
    #[serde(with = "crate::serde_base64")]
    pub script: Vec<u8>,
    /// One witness per signer, same order.
    pub witnesses: Vec<Witness>,
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for Transaction {}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            version: 0,
            nonce: 0,
            system_fee: 0,
            network_fee: 0,
            valid_until_block: 0,
            signers: Vec::new(),
            attributes: Vec::new(),
            script: Vec::new(),
            witnesses: Vec::new(),
        }
    }
}

impl Transaction {
    /// Serializes every field except the witnesses.
    pub fn unsigned_data(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::with_capacity(self.size());
        self.serialize_unsigned(&mut writer)
            .expect("in-memory serialization cannot fail");
        writer.into_bytes()
    }

    /// The identity hash: SHA-256 over the unsigned serialization.
    pub fn hash(&self) -> UInt256 {
        let digest = Sha256::digest(self.unsigned_data());
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        UInt256::from_bytes(out)
    }

    /// The payload each witness signature covers: network magic in
    /// little-endian followed by the identity hash.
    pub fn sign_data(&self, network_magic: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + 32);
        data.extend_from_slice(&network_magic.to_le_bytes());
        data.extend_from_slice(self.hash().as_bytes());
        data
    }

    /// The account paying fees: the first signer.
    pub fn sender(&self) -> Option<UInt160> {
        self.signers.first().map(|s| s.account)
    }

    /// The accounts that must be witnessed, in signer order.
    pub fn script_hashes_for_verifying(&self) -> Vec<UInt160> {
        self.signers.iter().map(|s| s.account).collect()
    }

    /// Structural validation independent of any chain state.
    pub fn validate_structure(&self) -> CoreResult<()> {
        if self.version != 0 {
            return Err(CoreError::invalid_data(format!(
                "unsupported transaction version {}",
                self.version
            )));
        }
        if self.system_fee < 0 || self.network_fee < 0 {
            return Err(CoreError::invalid_data("negative fee"));
        }
        if self.signers.is_empty() {
            return Err(CoreError::invalid_data("transaction has no signers"));
        }
        if self.signers.len() > MAX_TRANSACTION_SIGNERS {
            return Err(CoreError::invalid_data("too many signers"));
        }
        for (i, signer) in self.signers.iter().enumerate() {
            if self.signers[..i].iter().any(|s| s.account == signer.account) {
                return Err(CoreError::invalid_data("duplicate signer account"));
            }
        }
        if self.attributes.len() > MAX_TRANSACTION_ATTRIBUTES {
            return Err(CoreError::invalid_data("too many attributes"));
        }
        if self.script.is_empty() {
            return Err(CoreError::invalid_data("empty transaction script"));
        }
        if self.script.len() > MAX_TRANSACTION_SCRIPT {
            return Err(CoreError::invalid_data("transaction script too large"));
        }
        if self.witnesses.len() != self.signers.len() {
            return Err(CoreError::invalid_data(
                "witness count does not match signer count",
            ));
        }
        if self.size() > MAX_TRANSACTION_SIZE {
            return Err(CoreError::invalid_data("transaction exceeds maximum size"));
        }
        Ok(())
    }

    fn serialize_unsigned(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_byte(self.version);
        writer.write_u32(self.nonce);
        writer.write_i64(self.system_fee);
        writer.write_i64(self.network_fee);
        writer.write_u32(self.valid_until_block);
        serialize_vec(&self.signers, writer)?;
        serialize_vec(&self.attributes, writer)?;
        writer.write_var_bytes(&self.script);
        Ok(())
    }
}

impl Serializable for Transaction {
    fn size(&self) -> usize {
        HEADER_SIZE
            + var_int_size(self.signers.len() as u64)
            + self.signers.iter().map(|s| s.size()).sum::<usize>()
            + var_int_size(self.attributes.len() as u64)
            + self.attributes.iter().map(|a| a.size()).sum::<usize>()
            + var_bytes_size(self.script.len())
            + var_int_size(self.witnesses.len() as u64)
            + self.witnesses.iter().map(|w| w.size()).sum::<usize>()
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        self.serialize_unsigned(writer)?;
        serialize_vec(&self.witnesses, writer)?;
        Ok(())
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let version = reader.read_byte()?;
        let nonce = reader.read_u32()?;
        let system_fee = reader.read_i64()?;
        let network_fee = reader.read_i64()?;
        let valid_until_block = reader.read_u32()?;
        let signers: Vec<Signer> = deserialize_vec(reader, MAX_TRANSACTION_SIGNERS)?;
        let attributes: Vec<TransactionAttribute> =
            deserialize_vec(reader, MAX_TRANSACTION_ATTRIBUTES)?;
        let script = reader.read_var_bytes(MAX_TRANSACTION_SCRIPT)?;
        let witnesses: Vec<Witness> = deserialize_vec(reader, MAX_TRANSACTION_SIGNERS)?;
        Ok(Self {
            version,
            nonce,
            system_fee,
            network_fee,
            valid_until_block,
            signers,
            attributes,
            script,
            witnesses,
        })
    }
}

/// Decodes a transaction from Base64, the encoding used on the RPC surface.
pub fn transaction_from_base64(text: &str) -> CoreResult<Transaction> {
    use base64::Engine as _;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|e| CoreError::invalid_format(format!("invalid base64: {e}")))?;
    Ok(Transaction::from_array(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::witness_scope::WitnessScope;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 0,
            nonce: 0xDEADBEEF,
            system_fee: 100,
            network_fee: 200,
            valid_until_block: 5000,
            signers: vec![Signer::new(
                UInt160::from_bytes([7u8; 20]),
                WitnessScope::CALLED_BY_ENTRY,
            )],
            attributes: vec![TransactionAttribute::NotValidBefore { height: 10 }],
            script: vec![0x11, 0x12, 0x9E], // PUSH1 PUSH2 ADD
            witnesses: vec![Witness::new(vec![1, 2], vec![3, 4])],
        }
    }

    #[test]
    fn test_wire_round_trip_preserves_hash() {
        let tx = sample_tx();
        let bytes = tx.to_array().unwrap();
        assert_eq!(bytes.len(), tx.size());
        let decoded = Transaction::from_array(&bytes).unwrap();
        assert_eq!(decoded.hash(), tx.hash());
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_hash_ignores_witnesses() {
        let mut tx = sample_tx();
        let hash = tx.hash();
        tx.witnesses[0].invocation_script = vec![0xFF; 16];
        let redecoded = Transaction::from_array(&tx.to_array().unwrap()).unwrap();
        assert_eq!(redecoded.hash(), hash);
    }

    #[test]
    fn test_sign_data_layout() {
        let tx = sample_tx();
        let data = tx.sign_data(0x334f454e);
        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &0x334f454eu32.to_le_bytes());
        assert_eq!(&data[4..], tx.hash().as_bytes());
    }

    #[test]
    fn test_structure_validation() {
        assert!(sample_tx().validate_structure().is_ok());

        let mut no_signers = sample_tx();
        no_signers.signers.clear();
        no_signers.witnesses.clear();
        assert!(no_signers.validate_structure().is_err());

        let mut dup = sample_tx();
        dup.signers.push(dup.signers[0].clone());
        dup.witnesses.push(Witness::default());
        assert!(dup.validate_structure().is_err());

        let mut mismatched = sample_tx();
        mismatched.witnesses.clear();
        assert!(mismatched.validate_structure().is_err());
    }

    #[test]
    fn test_attribute_round_trip() {
        for attr in [
            TransactionAttribute::HighPriority,
            TransactionAttribute::NotValidBefore { height: 42 },
            TransactionAttribute::Conflicts {
                hash: UInt256::from_bytes([5u8; 32]),
            },
        ] {
            let bytes = attr.to_array().unwrap();
            assert_eq!(TransactionAttribute::from_array(&bytes).unwrap(), attr);
        }
    }
}
