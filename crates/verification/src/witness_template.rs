//! Recognition of the canonical witness script templates.

use neoxide_core::{PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
use neoxide_vm::{syscall_hash, OpCode};

/// Maximum public keys in a multi-signature contract.
pub const MAX_MULTISIG_KEYS: usize = 1024;

/// Parsed parameters of a multi-signature verification script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiSigParams {
    /// Required signatures.
    pub m: usize,
    /// Total public keys.
    pub n: usize,
    /// The public keys, in script order.
    pub public_keys: Vec<Vec<u8>>,
}

/// Parses the single-signature template and returns the public key:
/// `PUSHDATA1 33 <pubkey> SYSCALL System.Crypto.CheckSig`.
pub fn parse_signature_contract(script: &[u8]) -> Option<Vec<u8>> {
    if script.len() != 2 + PUBLIC_KEY_SIZE + 5 {
        return None;
    }
    if script[0] != OpCode::PUSHDATA1.as_byte() || script[1] as usize != PUBLIC_KEY_SIZE {
        return None;
    }
    let key_end = 2 + PUBLIC_KEY_SIZE;
    if script[key_end] != OpCode::SYSCALL.as_byte() {
        return None;
    }
    let token = u32::from_le_bytes([
        script[key_end + 1],
        script[key_end + 2],
        script[key_end + 3],
        script[key_end + 4],
    ]);
    if token != syscall_hash("System.Crypto.CheckSig") {
        return None;
    }
    Some(script[2..key_end].to_vec())
}

/// Reads a small integer push (`PUSH1`..`PUSH16` or `PUSHINT8/16`) and
/// the bytes it consumed.
fn read_small_push(script: &[u8]) -> Option<(usize, usize)> {
    let opcode = *script.first()?;
    if (OpCode::PUSH1.as_byte()..=OpCode::PUSH16.as_byte()).contains(&opcode) {
        return Some(((opcode - OpCode::PUSH0.as_byte()) as usize, 1));
    }
    if opcode == OpCode::PUSHINT8.as_byte() {
        let value = *script.get(1)?;
        return Some((value as usize, 2));
    }
    if opcode == OpCode::PUSHINT16.as_byte() {
        let value = u16::from_le_bytes([*script.get(1)?, *script.get(2)?]);
        return Some((value as usize, 3));
    }
    None
}

/// Parses the multi-signature template:
/// `PUSH(m) (PUSHDATA1 33 <pubkey>){n} PUSH(n) SYSCALL CheckMultisig`.
/// Rejects `m = 0`, `m > n` and `n > 1024`.
pub fn parse_multisig_contract(script: &[u8]) -> Option<MultiSigParams> {
    let (m, mut cursor) = read_small_push(script)?;
    if m == 0 {
        return None;
    }

    let mut public_keys = Vec::new();
    while script.get(cursor) == Some(&OpCode::PUSHDATA1.as_byte()) {
        if script.get(cursor + 1) != Some(&(PUBLIC_KEY_SIZE as u8)) {
            return None;
        }
        let key_start = cursor + 2;
        let key_end = key_start + PUBLIC_KEY_SIZE;
        public_keys.push(script.get(key_start..key_end)?.to_vec());
        cursor = key_end;
        if public_keys.len() > MAX_MULTISIG_KEYS {
            return None;
        }
    }

    let (n, n_len) = read_small_push(&script[cursor..])?;
    cursor += n_len;
    if n != public_keys.len() || m > n || n > MAX_MULTISIG_KEYS {
        return None;
    }

    if script.get(cursor) != Some(&OpCode::SYSCALL.as_byte()) {
        return None;
    }
    let token_bytes = script.get(cursor + 1..cursor + 5)?;
    let token = u32::from_le_bytes([
        token_bytes[0],
        token_bytes[1],
        token_bytes[2],
        token_bytes[3],
    ]);
    if token != syscall_hash("System.Crypto.CheckMultisig") || script.len() != cursor + 5 {
        return None;
    }

    Some(MultiSigParams { m, n, public_keys })
}

/// Extracts the single signature from an invocation script of the form
/// `PUSHDATA1 64 <signature>`.
pub fn parse_single_signature(invocation: &[u8]) -> Option<Vec<u8>> {
    if invocation.len() != 2 + SIGNATURE_SIZE {
        return None;
    }
    if invocation[0] != OpCode::PUSHDATA1.as_byte() || invocation[1] as usize != SIGNATURE_SIZE {
        return None;
    }
    Some(invocation[2..].to_vec())
}

/// Extracts up to `max` signatures from a multi-sig invocation script: a
/// sequence of `PUSHDATA1 64 <signature>` pushes.
pub fn parse_signatures(invocation: &[u8], max: usize) -> Option<Vec<Vec<u8>>> {
    let mut signatures = Vec::new();
    let mut cursor = 0;
    while cursor < invocation.len() {
        if invocation.get(cursor) != Some(&OpCode::PUSHDATA1.as_byte())
            || invocation.get(cursor + 1) != Some(&(SIGNATURE_SIZE as u8))
        {
            return None;
        }
        let start = cursor + 2;
        let end = start + SIGNATURE_SIZE;
        signatures.push(invocation.get(start..end)?.to_vec());
        cursor = end;
        if signatures.len() > max {
            return None;
        }
    }
    if signatures.is_empty() {
        return None;
    }
    Some(signatures)
}

/// Builds the canonical single-signature verification script.
pub fn signature_contract_script(public_key: &[u8]) -> Vec<u8> {
    neoxide_vm::single_sig_verification_script(public_key)
}

/// Builds the canonical multi-signature verification script.
pub fn multisig_contract_script(m: usize, public_keys: &[Vec<u8>]) -> Vec<u8> {
    let mut builder = neoxide_vm::ScriptBuilder::new();
    builder.emit_push_int(m as u64).expect("small integer");
    for key in public_keys {
        builder.emit_push_bytes(key).expect("key fits PUSHDATA1");
    }
    builder
        .emit_push_int(public_keys.len() as u64)
        .expect("small integer");
    builder.emit_syscall("System.Crypto.CheckMultisig");
    builder.to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(tag: u8) -> Vec<u8> {
        let mut key = vec![0x02];
        key.extend(vec![tag; 32]);
        key
    }

    #[test]
    fn test_signature_contract_round_trip() {
        let script = signature_contract_script(&key(7));
        assert_eq!(parse_signature_contract(&script).unwrap(), key(7));
    }

    #[test]
    fn test_signature_contract_rejects_wrong_syscall() {
        let mut script = signature_contract_script(&key(7));
        let len = script.len();
        script[len - 1] ^= 0xFF;
        assert!(parse_signature_contract(&script).is_none());
    }

    #[test]
    fn test_multisig_round_trip() {
        let keys = vec![key(1), key(2), key(3)];
        let script = multisig_contract_script(2, &keys);
        let params = parse_multisig_contract(&script).unwrap();
        assert_eq!(params.m, 2);
        assert_eq!(params.n, 3);
        assert_eq!(params.public_keys, keys);
    }

    #[test]
    fn test_multisig_rejects_bad_parameters() {
        // m > n
        let script = multisig_contract_script(4, &[key(1), key(2)]);
        assert!(parse_multisig_contract(&script).is_none());
        // m = 0
        let script = multisig_contract_script(0, &[key(1)]);
        assert!(parse_multisig_contract(&script).is_none());
    }

    #[test]
    fn test_multisig_not_confused_with_single_sig() {
        let script = signature_contract_script(&key(9));
        assert!(parse_multisig_contract(&script).is_none());
    }

    #[test]
    fn test_invocation_signature_parsing() {
        let mut invocation = vec![OpCode::PUSHDATA1.as_byte(), 64];
        invocation.extend(vec![5u8; 64]);
        assert_eq!(parse_single_signature(&invocation).unwrap(), vec![5u8; 64]);

        let mut double = invocation.clone();
        double.extend_from_slice(&invocation);
        assert!(parse_single_signature(&double).is_none());
        let sigs = parse_signatures(&double, 4).unwrap();
        assert_eq!(sigs.len(), 2);
        assert!(parse_signatures(&double, 1).is_none());
    }
}
