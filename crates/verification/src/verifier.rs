//! The transaction verification pipeline.

use crate::cache::{VerificationCache, VerificationMode};
use crate::verify_result::{VerificationOutput, VerifyResult};
use crate::witness_template::{
    parse_multisig_contract, parse_signature_contract, parse_signatures, parse_single_signature,
};
use neoxide_config::ProtocolSettings;
use neoxide_core::{
    Block, CoreMetrics, Crypto, PolicyReader, Snapshot, Transaction, Witness,
};
use neoxide_io::Serializable;
use neoxide_vm::{
    ApplicationEngine, StackItem, TriggerType, VMState, CHECKMULTISIG_PRICE_PER_KEY,
    CHECKSIG_PRICE,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything a verification run needs from its environment.
pub struct VerificationContext {
    /// The chain view the transaction is checked against.
    pub snapshot: Arc<dyn Snapshot>,
    /// Protocol constants, including the network magic signatures cover.
    pub settings: ProtocolSettings,
    /// The block being persisted, when verifying during persistence.
    pub persisting_block: Option<Block>,
    /// Ceiling on gas spent measuring witness and script execution.
    pub max_gas: i64,
    /// Skip cryptographic signature verification.
    pub skip_signature_verification: bool,
    /// Skip witness script-hash binding.
    pub skip_witness_verification: bool,
}

impl VerificationContext {
    /// A context with full checks enabled.
    pub fn new(snapshot: Arc<dyn Snapshot>, settings: ProtocolSettings, max_gas: i64) -> Self {
        Self {
            snapshot,
            settings,
            persisting_block: None,
            max_gas,
            skip_signature_verification: false,
            skip_witness_verification: false,
        }
    }

    fn mode(&self) -> VerificationMode {
        VerificationMode {
            skip_signatures: self.skip_signature_verification,
            skip_witnesses: self.skip_witness_verification,
        }
    }
}

/// Verifies transactions before mempool admission or block inclusion.
///
/// Thread-safe: the cache sits behind its own lock, and each witness or
/// script execution constructs a private engine over the read-only
/// snapshot. Verification never mutates chain state and gas consumed here
/// is reported, never deducted.
pub struct TransactionVerifier {
    cache: VerificationCache,
    policy: Arc<dyn PolicyReader>,
    crypto: Arc<dyn Crypto>,
    metrics: Option<Arc<CoreMetrics>>,
}

impl TransactionVerifier {
    /// Creates a verifier.
    pub fn new(policy: Arc<dyn PolicyReader>, crypto: Arc<dyn Crypto>) -> Self {
        Self {
            cache: VerificationCache::new(),
            policy,
            crypto,
            metrics: None,
        }
    }

    /// Attaches the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<CoreMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The verification cache, exposed for diagnostics.
    pub fn cache(&self) -> &VerificationCache {
        &self.cache
    }

    /// Runs the full pipeline.
    pub fn verify_transaction(
        &self,
        transaction: &Transaction,
        context: &VerificationContext,
    ) -> VerificationOutput {
        let hash = transaction.hash();
        let height = context.snapshot.height();
        let mode = context.mode();

        if let Some(result) = self.cache.get(&hash, mode, height) {
            debug!(%hash, %result, "verification cache hit");
            return VerificationOutput::new(result, "cached verification result", 0);
        }

        let output = self.verify_uncached(transaction, context, height);
        self.cache.put(hash, mode, output.result, height);
        self.record(transaction, &output);
        output
    }

    fn record(&self, transaction: &Transaction, output: &VerificationOutput) {
        if output.result != VerifyResult::Succeed {
            warn!(
                hash = %transaction.hash(),
                reason = output.result.reason_tag(),
                detail = %output.message,
                "transaction rejected"
            );
        }
        if let Some(metrics) = &self.metrics {
            match output.result {
                VerifyResult::Succeed => metrics.tx_accepted.inc(),
                other => metrics
                    .tx_rejected
                    .with_label_values(&[other.reason_tag()])
                    .inc(),
            }
            metrics.vm_gas.observe(output.gas_consumed as f64);
        }
    }

    fn verify_uncached(
        &self,
        transaction: &Transaction,
        context: &VerificationContext,
        height: u32,
    ) -> VerificationOutput {
        if let Err(error) = transaction.validate_structure() {
            return VerificationOutput::new(VerifyResult::Invalid, error.to_string(), 0);
        }
        if transaction.valid_until_block <= height {
            return VerificationOutput::new(
                VerifyResult::Invalid,
                format!(
                    "expired at {} (height {height})",
                    transaction.valid_until_block
                ),
                0,
            );
        }
        let horizon = height.saturating_add(context.settings.max_valid_until_block_increment);
        if transaction.valid_until_block > horizon {
            return VerificationOutput::new(
                VerifyResult::Invalid,
                "valid_until_block too far in the future",
                0,
            );
        }

        let mut witness_gas = vec![0i64; transaction.witnesses.len()];

        if !context.skip_signature_verification {
            match self.verify_signatures(transaction, context, &mut witness_gas) {
                Ok(()) => {}
                Err(output) => return output,
            }
        }

        if !context.skip_witness_verification {
            for (signer, witness) in transaction.signers.iter().zip(&transaction.witnesses) {
                // Deployed-contract signers carry an empty verification
                // script; their account binds through the contract hash.
                if witness.verification_script.is_empty() {
                    continue;
                }
                let bound = witness.script_hash(self.crypto.as_ref());
                if bound != signer.account {
                    return VerificationOutput::new(
                        VerifyResult::Invalid,
                        format!(
                            "witness script hash {bound} does not match signer {}",
                            signer.account
                        ),
                        0,
                    );
                }
            }
        }

        let exec_fee_factor = self.policy.exec_fee_factor(context.snapshot.as_ref());
        let fee_per_byte = self.policy.fee_per_byte(context.snapshot.as_ref());
        let witness_cost: i64 = transaction
            .witnesses
            .iter()
            .zip(&witness_gas)
            .map(|(witness, measured)| {
                self.witness_verification_cost(witness, *measured, exec_fee_factor)
            })
            .sum();
        let size_fee = (transaction.size() as i64).saturating_mul(fee_per_byte);
        let required_network_fee = size_fee.saturating_add(witness_cost);
        if transaction.network_fee < required_network_fee {
            return VerificationOutput::new(
                VerifyResult::InsufficientNetworkFee,
                format!(
                    "required {required_network_fee}, provided {}",
                    transaction.network_fee
                ),
                witness_gas.iter().sum(),
            );
        }

        // System-fee measurement: a fault is permitted here, only the fee
        // budget decides admission.
        let script_gas = {
            let mut engine = self.application_engine(
                TriggerType::Application,
                context,
                transaction.system_fee.min(context.max_gas),
            );
            engine.set_container(transaction.clone());
            if engine.load_script_bytes(&transaction.script).is_err() {
                return VerificationOutput::new(VerifyResult::Invalid, "unloadable script", 0);
            }
            engine.execute();
            engine.gas_consumed()
        };
        if script_gas > transaction.system_fee {
            return VerificationOutput::new(
                VerifyResult::InsufficientSystemFee,
                format!("required {script_gas}, provided {}", transaction.system_fee),
                script_gas,
            );
        }

        let total_gas = script_gas + witness_gas.iter().sum::<i64>();
        VerificationOutput::succeed(total_gas)
    }

    fn verify_signatures(
        &self,
        transaction: &Transaction,
        context: &VerificationContext,
        witness_gas: &mut [i64],
    ) -> Result<(), VerificationOutput> {
        let sign_data = transaction.sign_data(context.settings.network);

        for (index, witness) in transaction.witnesses.iter().enumerate() {
            if let Some(public_key) = parse_signature_contract(&witness.verification_script) {
                let Some(signature) = parse_single_signature(&witness.invocation_script) else {
                    return Err(VerificationOutput::new(
                        VerifyResult::InvalidSignature,
                        "malformed single-signature invocation script",
                        0,
                    ));
                };
                if !self
                    .crypto
                    .verify_signature(&sign_data, &signature, &public_key)
                {
                    return Err(VerificationOutput::new(
                        VerifyResult::InvalidSignature,
                        "signature verification failed",
                        0,
                    ));
                }
                continue;
            }

            if let Some(params) = parse_multisig_contract(&witness.verification_script) {
                let Some(signatures) = parse_signatures(&witness.invocation_script, params.m)
                else {
                    return Err(VerificationOutput::new(
                        VerifyResult::InvalidSignature,
                        "malformed multi-signature invocation script",
                        0,
                    ));
                };
                if signatures.len() < params.m {
                    return Err(VerificationOutput::new(
                        VerifyResult::InvalidSignature,
                        format!("{} of {} required signatures", signatures.len(), params.m),
                        0,
                    ));
                }
                let mut key_index = 0usize;
                let mut matched = 0usize;
                for signature in &signatures {
                    while key_index < params.public_keys.len() {
                        let key = &params.public_keys[key_index];
                        key_index += 1;
                        if self.crypto.verify_signature(&sign_data, signature, key) {
                            matched += 1;
                            break;
                        }
                    }
                }
                if matched < params.m {
                    return Err(VerificationOutput::new(
                        VerifyResult::InvalidSignature,
                        format!("{matched} of {} multi-signatures verified", params.m),
                        0,
                    ));
                }
                continue;
            }

            // Arbitrary witness: run it under the Verification trigger.
            match self.execute_witness(transaction, witness, index, context) {
                Ok(gas) => witness_gas[index] = gas,
                Err(output) => return Err(output),
            }
        }
        Ok(())
    }

    fn execute_witness(
        &self,
        transaction: &Transaction,
        witness: &Witness,
        index: usize,
        context: &VerificationContext,
    ) -> Result<i64, VerificationOutput> {
        let mut engine =
            self.application_engine(TriggerType::Verification, context, context.max_gas);
        engine.set_container(transaction.clone());

        if witness.verification_script.is_empty() {
            // The signer is a deployed contract; run its `verify` method.
            let account = match transaction.signers.get(index) {
                Some(signer) => signer.account,
                None => {
                    return Err(VerificationOutput::new(
                        VerifyResult::Invalid,
                        "witness without matching signer",
                        0,
                    ))
                }
            };
            let Some(contract) = context.snapshot.contract(&account) else {
                return Err(VerificationOutput::new(
                    VerifyResult::UnableToVerify,
                    format!("no contract deployed at signer account {account}"),
                    0,
                ));
            };
            let Some(method) = contract.manifest.method("verify", usize::MAX) else {
                return Err(VerificationOutput::new(
                    VerifyResult::Invalid,
                    "signer contract has no verify method",
                    0,
                ));
            };
            let script = neoxide_vm::Script::new(contract.script.clone());
            if engine.load_script(script, -1, method.offset).is_err() {
                return Err(VerificationOutput::new(
                    VerifyResult::Invalid,
                    "unloadable contract verification script",
                    0,
                ));
            }
            if !witness.invocation_script.is_empty()
                && engine
                    .load_script(
                        neoxide_vm::Script::new(witness.invocation_script.clone()),
                        -1,
                        0,
                    )
                    .is_err()
            {
                return Err(VerificationOutput::new(
                    VerifyResult::Invalid,
                    "unloadable invocation script",
                    0,
                ));
            }
        } else if engine
            .load_witness(&witness.verification_script, &witness.invocation_script)
            .is_err()
        {
            return Err(VerificationOutput::new(
                VerifyResult::Invalid,
                "unloadable witness scripts",
                0,
            ));
        }

        let state = engine.execute();
        let gas = engine.gas_consumed();
        if state != VMState::Halt {
            return Err(VerificationOutput::new(
                VerifyResult::Invalid,
                format!(
                    "witness execution faulted: {}",
                    engine
                        .fault_error()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unknown fault".into())
                ),
                gas,
            ));
        }
        let items = engine.result_items();
        let truthy = matches!(items.last(), Some(item) if item.to_bool().unwrap_or(false));
        if items.len() != 1 || !truthy {
            return Err(VerificationOutput::new(
                VerifyResult::Invalid,
                "witness execution did not leave a single truthy result",
                gas,
            ));
        }
        Ok(gas)
    }

    /// Fixed costs for the recognised templates, measured gas otherwise.
    fn witness_verification_cost(
        &self,
        witness: &Witness,
        measured_gas: i64,
        exec_fee_factor: i64,
    ) -> i64 {
        if parse_signature_contract(&witness.verification_script).is_some() {
            // One signature push, one key push, one CheckSig.
            return exec_fee_factor * (CHECKSIG_PRICE + 2 * (1 << 3));
        }
        if let Some(params) = parse_multisig_contract(&witness.verification_script) {
            let pushes = (params.m + params.n + 2) as i64 * (1 << 3);
            let checks = CHECKMULTISIG_PRICE_PER_KEY * params.n as i64;
            return exec_fee_factor * (checks + pushes);
        }
        measured_gas
    }

    fn application_engine(
        &self,
        trigger: TriggerType,
        context: &VerificationContext,
        gas_limit: i64,
    ) -> ApplicationEngine {
        ApplicationEngine::new(
            trigger,
            Some(context.snapshot.clone()),
            gas_limit,
            context.settings.network,
            self.policy.exec_fee_factor(context.snapshot.as_ref()),
            self.crypto.clone(),
        )
    }
}

/// Convenience check used by relay paths: whether a halted engine left a
/// truthy witness result.
pub fn witness_result_is_truthy(items: &[StackItem]) -> bool {
    items.len() == 1 && items[0].to_bool().unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use neoxide_core::{MemorySnapshot, Signer, StdCrypto, StoragePolicyReader, UInt160};

    fn context() -> VerificationContext {
        VerificationContext::new(
            Arc::new(MemorySnapshot::new()),
            ProtocolSettings::private(),
            100_000_000,
        )
    }

    fn verifier() -> TransactionVerifier {
        TransactionVerifier::new(
            Arc::new(StoragePolicyReader::new(UInt160::from_bytes([0xEE; 20]))),
            Arc::new(StdCrypto),
        )
    }

    fn plain_tx() -> Transaction {
        Transaction {
            valid_until_block: 100,
            script: vec![0x11], // PUSH1
            signers: vec![Signer::called_by_entry(UInt160::from_bytes([1; 20]))],
            witnesses: vec![Witness::default()],
            ..Default::default()
        }
    }

    #[test]
    fn test_structural_rejection() {
        let mut tx = plain_tx();
        tx.script.clear();
        let output = verifier().verify_transaction(&tx, &context());
        assert_eq!(output.result, VerifyResult::Invalid);
    }

    #[test]
    fn test_expired_transaction_rejected() {
        let mut tx = plain_tx();
        tx.valid_until_block = 0;
        let output = verifier().verify_transaction(&tx, &context());
        assert_eq!(output.result, VerifyResult::Invalid);
        assert!(output.message.contains("expired"));
    }

    #[test]
    fn test_missing_contract_signer_is_transient() {
        let mut ctx = context();
        ctx.skip_witness_verification = true;
        let tx = plain_tx(); // empty witness scripts -> contract signer path
        let verifier = verifier();
        let output = verifier.verify_transaction(&tx, &ctx);
        assert_eq!(output.result, VerifyResult::UnableToVerify);
        // Transient outcomes are never cached.
        assert!(verifier.cache().is_empty());
    }

    #[test]
    fn test_cache_round_trip() {
        let mut tx = plain_tx();
        tx.valid_until_block = 0; // deterministic Invalid outcome
        let verifier = verifier();
        let ctx = context();
        let first = verifier.verify_transaction(&tx, &ctx);
        assert_eq!(first.result, VerifyResult::Invalid);
        assert_eq!(verifier.cache().len(), 1);
        let second = verifier.verify_transaction(&tx, &ctx);
        assert_eq!(second.result, VerifyResult::Invalid);
        assert_eq!(second.message, "cached verification result");
    }
}
