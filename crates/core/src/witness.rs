//! Transaction witness: the (invocation, verification) script pair.

use crate::crypto::Crypto;
use crate::uint160::UInt160;
use neoxide_io::{var_bytes_size, BinaryWriter, IoError, IoResult, MemoryReader, Serializable};
use serde::{Deserialize, Serialize};

/// Maximum size of an invocation script: room for 1024 signatures.
pub const MAX_INVOCATION_SCRIPT: usize = 1024;
/// Maximum size of a verification script.
pub const MAX_VERIFICATION_SCRIPT: usize = 1024;

/// A witness authorising one signer of a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    /// Script supplying the signatures (the arguments).
    #[serde(with = "crate::serde_base64")]
    pub invocation_script: Vec<u8>,
    /// Script performing the check (the predicate). Its Hash160 must equal
    /// the signer's account.
    #[serde(with = "crate::serde_base64")]
    pub verification_script: Vec<u8>,
}

impl Witness {
    /// Creates a witness from its two scripts.
    pub fn new(invocation_script: Vec<u8>, verification_script: Vec<u8>) -> Self {
        Self {
            invocation_script,
            verification_script,
        }
    }

    /// The script hash the verification script binds to.
    pub fn script_hash(&self, crypto: &dyn Crypto) -> UInt160 {
        crypto.hash160(&self.verification_script)
    }
}

impl Serializable for Witness {
    fn size(&self) -> usize {
        var_bytes_size(self.invocation_script.len())
            + var_bytes_size(self.verification_script.len())
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        if self.invocation_script.len() > MAX_INVOCATION_SCRIPT {
            return Err(IoError::length_exceeded(
                self.invocation_script.len(),
                MAX_INVOCATION_SCRIPT,
                "invocation script",
            ));
        }
        if self.verification_script.len() > MAX_VERIFICATION_SCRIPT {
            return Err(IoError::length_exceeded(
                self.verification_script.len(),
                MAX_VERIFICATION_SCRIPT,
                "verification script",
            ));
        }
        writer.write_var_bytes(&self.invocation_script);
        writer.write_var_bytes(&self.verification_script);
        Ok(())
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let invocation_script = reader.read_var_bytes(MAX_INVOCATION_SCRIPT)?;
        let verification_script = reader.read_var_bytes(MAX_VERIFICATION_SCRIPT)?;
        Ok(Self {
            invocation_script,
            verification_script,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::StdCrypto;
    use neoxide_io::SerializableExt;

    #[test]
    fn test_wire_round_trip() {
        let witness = Witness::new(vec![0x0C, 0x40, 1, 2, 3], vec![0x0C, 0x21, 9, 9]);
        let bytes = witness.to_array().unwrap();
        assert_eq!(bytes.len(), witness.size());
        assert_eq!(Witness::from_array(&bytes).unwrap(), witness);
    }

    #[test]
    fn test_script_hash_is_hash160_of_verification() {
        let crypto = StdCrypto;
        let witness = Witness::new(vec![], vec![1, 2, 3]);
        assert_eq!(
            witness.script_hash(&crypto),
            crate::crypto::Crypto::hash160(&crypto, &[1, 2, 3])
        );
    }

    #[test]
    fn test_oversized_script_rejected() {
        let witness = Witness::new(vec![0u8; MAX_INVOCATION_SCRIPT + 1], vec![]);
        assert!(witness.to_array().is_err());
    }
}
