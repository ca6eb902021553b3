//! Cryptographic primitives behind the collaborator contract.
//!
//! The core never calls a concrete algorithm directly; everything flows
//! through [`Crypto`]. [`StdCrypto`] is the default implementation wired
//! over `p256`, `sha2`, `ripemd` and `bs58`.

use crate::error::{CoreError, CoreResult};
use crate::uint160::UInt160;
use crate::uint256::UInt256;
use p256::ecdsa::signature::Verifier as _;
use p256::ecdsa::{Signature, VerifyingKey};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Length of a compressed P-256 public key.
pub const PUBLIC_KEY_SIZE: usize = 33;
/// Length of a raw ECDSA P-256 signature.
pub const SIGNATURE_SIZE: usize = 64;

/// Cryptographic primitives consumed by the core.
pub trait Crypto: Send + Sync {
    /// Verifies an ECDSA P-256 signature over `message` (hashed internally
    /// with SHA-256) against a compressed public key.
    fn verify_signature(&self, message: &[u8], signature: &[u8], public_key: &[u8]) -> bool;

    /// SHA-256 followed by RIPEMD-160.
    fn hash160(&self, data: &[u8]) -> UInt160;

    /// Double SHA-256.
    fn hash256(&self, data: &[u8]) -> UInt256;

    /// Single SHA-256, the hash used for transaction and block identities.
    fn sha256(&self, data: &[u8]) -> UInt256;

    /// Base58Check encoding with a 4-byte double-SHA-256 checksum.
    fn base58_check_encode(&self, data: &[u8]) -> String;

    /// Base58Check decoding, validating the checksum.
    fn base58_check_decode(&self, text: &str) -> CoreResult<Vec<u8>>;
}

/// Default [`Crypto`] implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdCrypto;

impl Crypto for StdCrypto {
    fn verify_signature(&self, message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        if signature.len() != SIGNATURE_SIZE || public_key.len() != PUBLIC_KEY_SIZE {
            return false;
        }
        let Ok(key) = VerifyingKey::from_sec1_bytes(public_key) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify(message, &sig).is_ok()
    }

    fn hash160(&self, data: &[u8]) -> UInt160 {
        let sha = Sha256::digest(data);
        let ripe = Ripemd160::digest(sha);
        let mut out = [0u8; 20];
        out.copy_from_slice(&ripe);
        UInt160::from_bytes(out)
    }

    fn hash256(&self, data: &[u8]) -> UInt256 {
        let first = Sha256::digest(data);
        let second = Sha256::digest(first);
        let mut out = [0u8; 32];
        out.copy_from_slice(&second);
        UInt256::from_bytes(out)
    }

    fn sha256(&self, data: &[u8]) -> UInt256 {
        let digest = Sha256::digest(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        UInt256::from_bytes(out)
    }

    fn base58_check_encode(&self, data: &[u8]) -> String {
        let checksum = self.hash256(data);
        let mut payload = data.to_vec();
        payload.extend_from_slice(&checksum.as_bytes()[..4]);
        bs58::encode(payload).into_string()
    }

    fn base58_check_decode(&self, text: &str) -> CoreResult<Vec<u8>> {
        let decoded = bs58::decode(text)
            .into_vec()
            .map_err(|e| CoreError::invalid_format(format!("invalid base58: {e}")))?;
        if decoded.len() < 4 {
            return Err(CoreError::invalid_format("base58check payload too short"));
        }
        let (payload, checksum) = decoded.split_at(decoded.len() - 4);
        let expected = self.hash256(payload);
        if checksum != &expected.as_bytes()[..4] {
            return Err(CoreError::invalid_crypto("base58check checksum mismatch"));
        }
        Ok(payload.to_vec())
    }
}

/// Converts a script hash to its Base58Check address form.
pub fn script_hash_to_address(crypto: &dyn Crypto, hash: &UInt160, version: u8) -> String {
    let mut data = Vec::with_capacity(21);
    data.push(version);
    data.extend_from_slice(hash.as_bytes());
    crypto.base58_check_encode(&data)
}

/// Parses a Base58Check address back into a script hash.
pub fn address_to_script_hash(
    crypto: &dyn Crypto,
    address: &str,
    version: u8,
) -> CoreResult<UInt160> {
    let payload = crypto.base58_check_decode(address)?;
    if payload.len() != 21 {
        return Err(CoreError::invalid_format("address payload must be 21 bytes"));
    }
    if payload[0] != version {
        return Err(CoreError::invalid_format(format!(
            "address version {:#04x} does not match expected {version:#04x}",
            payload[0]
        )));
    }
    UInt160::from_slice(&payload[1..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Signer as _;
    use p256::ecdsa::SigningKey;

    #[test]
    fn test_sign_verify_round_trip() {
        let signing = SigningKey::from_slice(&[7u8; 32]).unwrap();
        let verifying = VerifyingKey::from(&signing);
        let public_key = verifying.to_encoded_point(true).as_bytes().to_vec();

        let message = b"neoxide sign data";
        let signature: Signature = signing.sign(message);

        let crypto = StdCrypto;
        assert!(crypto.verify_signature(message, &signature.to_bytes(), &public_key));
        assert!(!crypto.verify_signature(b"tampered", &signature.to_bytes(), &public_key));
    }

    #[test]
    fn test_verify_rejects_malformed_inputs() {
        let crypto = StdCrypto;
        assert!(!crypto.verify_signature(b"m", &[0u8; 10], &[0u8; PUBLIC_KEY_SIZE]));
        assert!(!crypto.verify_signature(b"m", &[0u8; SIGNATURE_SIZE], &[0u8; 5]));
        assert!(!crypto.verify_signature(b"m", &[0u8; SIGNATURE_SIZE], &[0u8; PUBLIC_KEY_SIZE]));
    }

    #[test]
    fn test_hash160_composition() {
        let crypto = StdCrypto;
        let value = crypto.hash160(b"hello");
        let sha = Sha256::digest(b"hello");
        let ripe = Ripemd160::digest(sha);
        assert_eq!(value.as_bytes()[..], ripe[..]);
    }

    #[test]
    fn test_base58_check_round_trip() {
        let crypto = StdCrypto;
        let data = [0x35u8, 1, 2, 3, 4, 5];
        let encoded = crypto.base58_check_encode(&data);
        assert_eq!(crypto.base58_check_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_base58_check_detects_corruption() {
        let crypto = StdCrypto;
        let encoded = crypto.base58_check_encode(&[1, 2, 3]);
        let mut corrupted = encoded.into_bytes();
        let last = corrupted.len() - 1;
        corrupted[last] = if corrupted[last] == b'1' { b'2' } else { b'1' };
        let corrupted = String::from_utf8(corrupted).unwrap();
        assert!(crypto.base58_check_decode(&corrupted).is_err());
    }

    #[test]
    fn test_address_round_trip() {
        let crypto = StdCrypto;
        let hash = UInt160::from_bytes([9u8; 20]);
        let address = script_hash_to_address(&crypto, &hash, 0x35);
        let back = address_to_script_hash(&crypto, &address, 0x35).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn test_address_wrong_version() {
        let crypto = StdCrypto;
        let hash = UInt160::from_bytes([9u8; 20]);
        let address = script_hash_to_address(&crypto, &hash, 0x35);
        assert!(address_to_script_hash(&crypto, &address, 0x17).is_err());
    }
}
