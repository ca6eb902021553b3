//! The RPC method table.
//!
//! Every handler is read-only and synchronous over the current snapshot;
//! `invoke*` handlers build a private [`ApplicationEngine`] per call. The
//! HTTP envelope is a collaborator: [`RpcMethods::handle_request`] maps a
//! JSON-RPC request object to its response object and nothing here blocks
//! on network I/O.

use crate::error::{RpcError, RpcResult};
use crate::session::SessionStore;
use crate::types::{block_to_json, header_to_json, stack_item_to_json, transaction_to_json};
use base64::Engine as _;
use neoxide_config::{NetworkConfig, ProtocolSettings, RpcConfig};
use neoxide_core::{
    address_to_script_hash, block_from_base64, script_hash_to_address, transaction_from_base64,
    CoreMetrics, Crypto, KeyValueStore, Ledger, Mempool, PolicyReader, Signer, Snapshot,
    Transaction, UInt160, UInt256, WitnessScope,
};
use neoxide_network::{ProtocolHandler, PEER_ADDRESS_PREFIX};
use neoxide_verification::{TransactionVerifier, VerificationContext, VerifyResult};
use neoxide_vm::{ApplicationEngine, IteratorHandle, OpCode, ScriptBuilder, TriggerType, VMState};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// The collaborators the query layer reads from.
pub struct RpcNodeServices {
    /// Read-only chain view.
    pub snapshot: Arc<dyn Snapshot>,
    /// Chain append side, for `submitblock`.
    pub ledger: Arc<dyn Ledger>,
    /// The memory pool.
    pub mempool: Arc<dyn Mempool>,
    /// Verifier for `sendrawtransaction`.
    pub verifier: Arc<TransactionVerifier>,
    /// Policy reader feeding the execution fee factor.
    pub policy: Arc<dyn PolicyReader>,
    /// Crypto seam for addresses and hashes.
    pub crypto: Arc<dyn Crypto>,
    /// Store holding persisted peer records.
    pub store: Arc<dyn KeyValueStore>,
    /// The protocol handler, for peers, relay and connection counts.
    pub network: Option<Arc<ProtocolHandler>>,
}

/// The dispatch table: a fixed set of named methods over the node handle.
pub struct RpcMethods {
    settings: ProtocolSettings,
    network_config: NetworkConfig,
    config: RpcConfig,
    services: RpcNodeServices,
    sessions: SessionStore,
    metrics: Option<Arc<CoreMetrics>>,
    nonce: u32,
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn b64_decode(text: &str) -> RpcResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|e| RpcError::invalid_params(format!("invalid base64: {e}")))
}

impl RpcMethods {
    /// Creates the method table.
    pub fn new(
        settings: ProtocolSettings,
        network_config: NetworkConfig,
        config: RpcConfig,
        services: RpcNodeServices,
    ) -> Self {
        let sessions = SessionStore::new(config.session_ttl(), config.max_iterators_per_session);
        Self {
            settings,
            network_config,
            config,
            services,
            sessions,
            metrics: None,
            nonce: rand_nonce(),
        }
    }

    /// Attaches the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<CoreMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The session store, exposed for diagnostics.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Maps one JSON-RPC request object to its response object.
    pub fn handle_request(&self, request: &Value) -> Value {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        let empty = Vec::new();
        let params = request
            .get("params")
            .and_then(Value::as_array)
            .unwrap_or(&empty);
        match self.dispatch(method, params) {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err(error) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": error.to_error_object(self.config.debug_errors),
            }),
        }
    }

    /// Dispatches one named method.
    pub fn dispatch(&self, method: &str, params: &[Value]) -> RpcResult<Value> {
        debug!(method, "rpc request");
        if let Some(metrics) = &self.metrics {
            metrics.rpc_requests.with_label_values(&[method]).inc();
        }
        self.sessions.collect_expired();
        let result = self.dispatch_inner(method, params);
        if result.is_err() {
            if let Some(metrics) = &self.metrics {
                metrics.rpc_errors.with_label_values(&[method]).inc();
            }
        }
        result
    }

    fn dispatch_inner(&self, method: &str, params: &[Value]) -> RpcResult<Value> {
        match method {
            "getversion" => self.get_version(),
            "getblockcount" => Ok(json!(self.services.snapshot.height() + 1)),
            "getblockheadercount" => Ok(json!(self.services.snapshot.height() + 1)),
            "getbestblockhash" => {
                Ok(json!(self.services.snapshot.best_block_hash().to_hex_string()))
            }
            "getblock" => self.get_block(params),
            "getblockhash" => self.get_block_hash(params),
            "getblockheader" => self.get_block_header(params),
            "getrawmempool" => self.get_raw_mempool(),
            "getrawtransaction" => self.get_raw_transaction(params),
            "gettransactionheight" => self.get_transaction_height(params),
            "sendrawtransaction" => self.send_raw_transaction(params),
            "submitblock" => self.submit_block(params),
            "invokefunction" => self.invoke_function(params),
            "invokescript" => self.invoke_script(params),
            "invokecontractverify" => self.invoke_contract_verify(params),
            "getcontractstate" => self.get_contract_state(params),
            "getstorage" => self.get_storage(params),
            "findstorage" => self.find_storage(params),
            "getunclaimedgas" => self.get_unclaimed_gas(params),
            "getcommittee" => Ok(hex_keys(self.services.snapshot.committee())),
            "getvalidators" => Ok(hex_keys(self.services.snapshot.next_block_validators())),
            "getnextblockvalidators" => {
                Ok(hex_keys(self.services.snapshot.next_block_validators()))
            }
            "getcandidates" => self.get_candidates(),
            "getnativecontracts" => self.get_native_contracts(),
            "getpeers" => self.get_peers(),
            "getconnectioncount" => self.get_connection_count(),
            "validateaddress" => self.validate_address(params),
            "traverseiterator" => self.traverse_iterator(params),
            "terminatesession" => self.terminate_session(params),
            other => Err(RpcError::MethodNotFound {
                method: other.to_string(),
            }),
        }
    }

    // --- chain getters ---------------------------------------------------

    fn get_version(&self) -> RpcResult<Value> {
        Ok(json!({
            "tcpport": self.network_config.local_port,
            "rpcport": self.config.port,
            "nonce": self.nonce,
            "useragent": self.network_config.user_agent,
            "protocol": {
                "network": self.settings.network,
                "addressversion": self.settings.address_version,
                "msperblock": self.settings.ms_per_block,
                "maxtraceableblocks": self.settings.max_traceable_blocks,
                "maxvaliduntilblockincrement": self.settings.max_valid_until_block_increment,
                "validatorscount": self.settings.validators_count,
            },
        }))
    }

    fn block_by_id(&self, id: &Value) -> RpcResult<neoxide_core::Block> {
        if let Some(index) = id.as_u64() {
            return self
                .services
                .snapshot
                .block_by_index(index as u32)
                .ok_or(RpcError::UnknownBlock);
        }
        let text = id
            .as_str()
            .ok_or_else(|| RpcError::invalid_params("block id must be a hash or an index"))?;
        let hash = UInt256::parse(text)?;
        self.services.snapshot.block(&hash).ok_or(RpcError::UnknownBlock)
    }

    fn verbose_flag(params: &[Value], index: usize) -> bool {
        match params.get(index) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::Number(n)) => n.as_u64() == Some(1),
            _ => false,
        }
    }

    fn get_block(&self, params: &[Value]) -> RpcResult<Value> {
        let id = params
            .first()
            .ok_or_else(|| RpcError::invalid_params("missing block identifier"))?;
        let block = self.block_by_id(id)?;
        Ok(block_to_json(
            &block,
            Self::verbose_flag(params, 1),
            self.services.crypto.as_ref(),
            self.settings.address_version,
            self.services.snapshot.as_ref(),
        ))
    }

    fn get_block_hash(&self, params: &[Value]) -> RpcResult<Value> {
        let index = params
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| RpcError::invalid_params("missing block index"))?;
        self.services
            .snapshot
            .block_hash(index as u32)
            .map(|hash| json!(hash.to_hex_string()))
            .ok_or(RpcError::UnknownBlock)
    }

    fn get_block_header(&self, params: &[Value]) -> RpcResult<Value> {
        let id = params
            .first()
            .ok_or_else(|| RpcError::invalid_params("missing block identifier"))?;
        let block = self.block_by_id(id)?;
        if Self::verbose_flag(params, 1) {
            Ok(header_to_json(
                &block.header,
                self.services.crypto.as_ref(),
                self.settings.address_version,
                self.services.snapshot.as_ref(),
            ))
        } else {
            let bytes = neoxide_io::SerializableExt::to_array(&block.header)
                .map_err(|e| RpcError::internal(e.to_string()))?;
            Ok(json!(b64(&bytes)))
        }
    }

    fn get_raw_mempool(&self) -> RpcResult<Value> {
        let hashes: Vec<String> = self
            .services
            .mempool
            .all()
            .iter()
            .map(|tx| tx.hash().to_hex_string())
            .collect();
        Ok(json!(hashes))
    }

    fn get_raw_transaction(&self, params: &[Value]) -> RpcResult<Value> {
        let text = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing transaction hash"))?;
        let hash = UInt256::parse(text)?;
        let transaction = self
            .services
            .mempool
            .get(&hash)
            .or_else(|| self.services.snapshot.transaction(&hash))
            .ok_or(RpcError::UnknownTransaction)?;
        Ok(transaction_to_json(
            &transaction,
            Self::verbose_flag(params, 1),
            self.services.crypto.as_ref(),
            self.settings.address_version,
        ))
    }

    fn get_transaction_height(&self, params: &[Value]) -> RpcResult<Value> {
        let text = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing transaction hash"))?;
        let hash = UInt256::parse(text)?;
        self.services
            .snapshot
            .transaction_height(&hash)
            .map(|height| json!(height))
            .ok_or(RpcError::UnknownTransaction)
    }

    // --- submission ------------------------------------------------------

    fn send_raw_transaction(&self, params: &[Value]) -> RpcResult<Value> {
        let text = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing transaction payload"))?;
        let transaction = transaction_from_base64(text)?;
        let hash = transaction.hash();

        let context = VerificationContext::new(
            self.services.snapshot.clone(),
            self.settings.clone(),
            self.config.max_gas_invoke,
        );
        let output = self
            .services
            .verifier
            .verify_transaction(&transaction, &context);
        if output.result != VerifyResult::Succeed {
            return Err(RpcError::verification(format!(
                "{}: {}",
                output.result.reason_tag(),
                output.message
            )));
        }
        if !self.services.mempool.try_add(transaction) {
            return Err(RpcError::verification("already in the memory pool"));
        }
        if let Some(network) = &self.services.network {
            network.broadcast_transaction(hash);
        }
        Ok(json!({ "hash": hash.to_hex_string() }))
    }

    fn submit_block(&self, params: &[Value]) -> RpcResult<Value> {
        let text = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing block payload"))?;
        let block = block_from_base64(text)?;
        let hash = block.hash();
        match self.services.ledger.try_add_block(block) {
            Ok(true) => {
                if let Some(network) = &self.services.network {
                    network.broadcast_block(hash);
                }
                Ok(json!({ "hash": hash.to_hex_string() }))
            }
            Ok(false) => Err(RpcError::verification("block already exists")),
            Err(error) => Err(RpcError::verification(error.to_string())),
        }
    }

    // --- invocation ------------------------------------------------------

    fn parse_signers(&self, value: Option<&Value>) -> RpcResult<Vec<Signer>> {
        let Some(list) = value.and_then(Value::as_array) else {
            return Ok(Vec::new());
        };
        let mut signers = Vec::new();
        for entry in list {
            let account_text = entry
                .get("account")
                .and_then(Value::as_str)
                .ok_or_else(|| RpcError::invalid_params("signer without account"))?;
            let account = UInt160::parse(account_text)?;
            let scopes = match entry.get("scopes").and_then(Value::as_str) {
                None => WitnessScope::CALLED_BY_ENTRY,
                Some(text) => parse_scopes(text)?,
            };
            signers.push(Signer::new(account, scopes));
        }
        Ok(signers)
    }

    fn push_param(builder: &mut ScriptBuilder, param: &Value) -> RpcResult<()> {
        let kind = param
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("parameter without type"))?;
        let value = param.get("value");
        match kind {
            "Any" => {
                builder.emit_push_null();
            }
            "Boolean" => {
                let flag = value
                    .and_then(Value::as_bool)
                    .ok_or_else(|| RpcError::invalid_params("Boolean parameter needs a bool"))?;
                builder.emit_push_bool(flag);
            }
            "Integer" => {
                let text = match value {
                    Some(Value::String(text)) => text.clone(),
                    Some(Value::Number(number)) => number.to_string(),
                    _ => return Err(RpcError::invalid_params("Integer parameter needs a value")),
                };
                let parsed: num_bigint::BigInt = text
                    .parse()
                    .map_err(|_| RpcError::invalid_params("unparsable integer"))?;
                builder
                    .emit_push_int(parsed)
                    .map_err(|e| RpcError::invalid_params(e.to_string()))?;
            }
            "String" => {
                let text = value
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::invalid_params("String parameter needs a string"))?;
                builder
                    .emit_push_string(text)
                    .map_err(|e| RpcError::invalid_params(e.to_string()))?;
            }
            "ByteArray" => {
                let text = value
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::invalid_params("ByteArray parameter needs base64"))?;
                let bytes = b64_decode(text)?;
                builder
                    .emit_push_bytes(&bytes)
                    .map_err(|e| RpcError::invalid_params(e.to_string()))?;
            }
            "Hash160" => {
                let text = value
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::invalid_params("Hash160 parameter needs a hash"))?;
                let hash = UInt160::parse(text)?;
                builder
                    .emit_push_bytes(hash.as_bytes())
                    .map_err(|e| RpcError::invalid_params(e.to_string()))?;
            }
            "Hash256" => {
                let text = value
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::invalid_params("Hash256 parameter needs a hash"))?;
                let hash = UInt256::parse(text)?;
                builder
                    .emit_push_bytes(hash.as_bytes())
                    .map_err(|e| RpcError::invalid_params(e.to_string()))?;
            }
            "Array" => {
                let items = value
                    .and_then(Value::as_array)
                    .ok_or_else(|| RpcError::invalid_params("Array parameter needs elements"))?;
                for item in items.iter().rev() {
                    Self::push_param(builder, item)?;
                }
                builder
                    .emit_push_int(items.len() as u64)
                    .map_err(|e| RpcError::invalid_params(e.to_string()))?;
                builder.emit(OpCode::PACK);
            }
            other => {
                return Err(RpcError::invalid_params(format!(
                    "unsupported parameter type {other}"
                )))
            }
        }
        Ok(())
    }

    fn build_call_script(
        &self,
        contract: UInt160,
        method: &str,
        params: &[Value],
    ) -> RpcResult<Vec<u8>> {
        let mut builder = ScriptBuilder::new();
        // Arguments as one array, then call flags, method and hash.
        for param in params.iter().rev() {
            Self::push_param(&mut builder, param)?;
        }
        builder
            .emit_push_int(params.len() as u64)
            .map_err(|e| RpcError::invalid_params(e.to_string()))?;
        builder.emit(OpCode::PACK);
        builder
            .emit_push_int(15u8) // CallFlags::All
            .map_err(|e| RpcError::invalid_params(e.to_string()))?;
        builder
            .emit_push_string(method)
            .map_err(|e| RpcError::invalid_params(e.to_string()))?;
        builder
            .emit_push_bytes(contract.as_bytes())
            .map_err(|e| RpcError::invalid_params(e.to_string()))?;
        builder.emit_syscall("System.Contract.Call");
        Ok(builder.to_bytes())
    }

    fn run_script(
        &self,
        script: Vec<u8>,
        trigger: TriggerType,
        signers: Vec<Signer>,
        extra_witness: Option<Vec<u8>>,
    ) -> RpcResult<Value> {
        let exec_fee_factor = self
            .services
            .policy
            .exec_fee_factor(self.services.snapshot.as_ref());
        let mut engine = ApplicationEngine::new(
            trigger,
            Some(self.services.snapshot.clone()),
            self.config.max_gas_invoke,
            self.settings.network,
            exec_fee_factor,
            self.services.crypto.clone(),
        );
        if !signers.is_empty() {
            let container = Transaction {
                valid_until_block: self.services.snapshot.height() + 1,
                script: script.clone(),
                signers,
                ..Default::default()
            };
            engine.set_container(container);
        }
        engine
            .load_script_bytes(&script)
            .map_err(|e| RpcError::invalid_params(e.to_string()))?;
        if let Some(invocation) = extra_witness {
            if !invocation.is_empty() {
                engine
                    .load_script_bytes(&invocation)
                    .map_err(|e| RpcError::invalid_params(e.to_string()))?;
            }
        }
        let state = engine.execute();
        if let Some(metrics) = &self.metrics {
            metrics.vm_gas.observe(engine.gas_consumed() as f64);
        }
        Ok(self.execution_report(&script, state, &engine))
    }

    fn execution_report(
        &self,
        script: &[u8],
        state: VMState,
        engine: &ApplicationEngine,
    ) -> Value {
        let rc = engine.engine().reference_counter();
        let mut iterators: Vec<Vec<Value>> = Vec::new();
        let mut stack = Vec::new();
        let mut iterator_slots = Vec::new();

        for item in engine.result_items() {
            if let Ok(handle) = item.as_interop::<IteratorHandle>() {
                let mut items = Vec::new();
                while handle.advance() {
                    items.push(stack_item_to_json(&handle.current(&rc), &rc));
                }
                iterator_slots.push(stack.len());
                iterators.push(items);
                stack.push(Value::Null); // placeholder, patched below
            } else {
                stack.push(stack_item_to_json(&item, &rc));
            }
        }

        let session = if iterators.is_empty() {
            None
        } else {
            let (session_id, iterator_ids) = self.sessions.create_session(iterators);
            for (slot, iterator_id) in iterator_slots.into_iter().zip(iterator_ids) {
                stack[slot] = json!({
                    "type": "InteropInterface",
                    "interface": "IIterator",
                    "id": iterator_id.to_string(),
                });
            }
            Some(session_id)
        };

        let exception = match state {
            VMState::Fault => Some(
                engine
                    .uncaught_exception()
                    .map(|item| {
                        item.to_byte_slice()
                            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                            .unwrap_or_else(|_| "unhandled exception".into())
                    })
                    .or_else(|| engine.fault_error().map(|e| e.to_string()))
                    .unwrap_or_else(|| "fault".into()),
            ),
            _ => None,
        };

        let mut report = json!({
            "script": b64(script),
            "state": if state == VMState::Halt { "HALT" } else { "FAULT" },
            "gasconsumed": engine.gas_consumed().to_string(),
            "exception": exception,
            "stack": stack,
        });
        if let Some(session_id) = session {
            report["session"] = json!(session_id.to_string());
        }
        report
    }

    fn invoke_function(&self, params: &[Value]) -> RpcResult<Value> {
        let contract_text = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing contract hash"))?;
        let contract = UInt160::parse(contract_text)?;
        if self.services.snapshot.contract(&contract).is_none() {
            return Err(RpcError::UnknownContract);
        }
        let method = params
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing method name"))?;
        let empty = Vec::new();
        let call_params = params.get(2).and_then(Value::as_array).unwrap_or(&empty);
        let signers = self.parse_signers(params.get(3))?;
        let script = self.build_call_script(contract, method, call_params)?;
        self.run_script(script, TriggerType::Application, signers, None)
    }

    fn invoke_script(&self, params: &[Value]) -> RpcResult<Value> {
        let text = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing script"))?;
        let script = b64_decode(text)?;
        let signers = self.parse_signers(params.get(1))?;
        self.run_script(script, TriggerType::Application, signers, None)
    }

    fn invoke_contract_verify(&self, params: &[Value]) -> RpcResult<Value> {
        let contract_text = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing contract hash"))?;
        let contract_hash = UInt160::parse(contract_text)?;
        let contract = self
            .services
            .snapshot
            .contract(&contract_hash)
            .ok_or(RpcError::UnknownContract)?;
        let method = contract
            .manifest
            .method("verify", usize::MAX)
            .ok_or_else(|| RpcError::invalid_params("contract has no verify method"))?;

        // Arguments reach the verify method through an invocation script
        // loaded on top of the verification context.
        let empty = Vec::new();
        let call_params = params.get(1).and_then(Value::as_array).unwrap_or(&empty);
        let mut invocation = ScriptBuilder::new();
        for param in call_params.iter().rev() {
            Self::push_param(&mut invocation, param)?;
        }
        let signers = self.parse_signers(params.get(2))?;

        let exec_fee_factor = self
            .services
            .policy
            .exec_fee_factor(self.services.snapshot.as_ref());
        let mut engine = ApplicationEngine::new(
            TriggerType::Verification,
            Some(self.services.snapshot.clone()),
            self.config.max_gas_invoke,
            self.settings.network,
            exec_fee_factor,
            self.services.crypto.clone(),
        );
        if !signers.is_empty() {
            engine.set_container(Transaction {
                valid_until_block: self.services.snapshot.height() + 1,
                script: vec![OpCode::RET.as_byte()],
                signers,
                ..Default::default()
            });
        }
        engine
            .load_script(
                neoxide_vm::Script::new(contract.script.clone()),
                -1,
                method.offset,
            )
            .map_err(|e| RpcError::internal(e.to_string()))?;
        let invocation_bytes = invocation.to_bytes();
        if !invocation_bytes.is_empty() {
            engine
                .load_script_bytes(&invocation_bytes)
                .map_err(|e| RpcError::internal(e.to_string()))?;
        }
        let state = engine.execute();
        Ok(self.execution_report(&contract.script, state, &engine))
    }

    // --- contract state --------------------------------------------------

    fn get_contract_state(&self, params: &[Value]) -> RpcResult<Value> {
        let text = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing contract hash"))?;
        let hash = UInt160::parse(text)?;
        let contract = self
            .services
            .snapshot
            .contract(&hash)
            .ok_or(RpcError::UnknownContract)?;
        serde_json::to_value(&contract).map_err(|e| RpcError::internal(e.to_string()))
    }

    fn get_storage(&self, params: &[Value]) -> RpcResult<Value> {
        let contract_text = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing contract hash"))?;
        let contract = UInt160::parse(contract_text)?;
        if self.services.snapshot.contract(&contract).is_none() {
            return Err(RpcError::UnknownContract);
        }
        let key_text = params
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing storage key"))?;
        let key = b64_decode(key_text)?;
        Ok(match self.services.snapshot.storage(&contract, &key) {
            Some(value) => json!(b64(&value)),
            None => Value::Null,
        })
    }

    fn find_storage(&self, params: &[Value]) -> RpcResult<Value> {
        let contract_text = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing contract hash"))?;
        let contract = UInt160::parse(contract_text)?;
        if self.services.snapshot.contract(&contract).is_none() {
            return Err(RpcError::UnknownContract);
        }
        let prefix_text = params
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing prefix"))?;
        let prefix = b64_decode(prefix_text)?;
        let start = params.get(2).and_then(Value::as_u64).unwrap_or(0) as usize;

        let entries = self.services.snapshot.find_storage(&contract, &prefix);
        let page_size = self.config.find_storage_page_size;
        let page: Vec<Value> = entries
            .iter()
            .skip(start)
            .take(page_size)
            .map(|(key, value)| json!({ "key": b64(key), "value": b64(value) }))
            .collect();
        let truncated = entries.len() > start + page.len();
        Ok(json!({
            "results": page,
            "firstproofpair": Value::Null,
            "next": start + page.len(),
            "truncated": truncated,
        }))
    }

    fn get_unclaimed_gas(&self, params: &[Value]) -> RpcResult<Value> {
        let text = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing account"))?;
        let account = self.parse_account(text)?;
        let height = self.services.snapshot.height();
        let unclaimed = self.services.snapshot.unclaimed_gas(&account, height + 1);
        Ok(json!({
            "unclaimed": unclaimed.to_string(),
            "address": script_hash_to_address(
                self.services.crypto.as_ref(),
                &account,
                self.settings.address_version,
            ),
        }))
    }

    fn parse_account(&self, text: &str) -> RpcResult<UInt160> {
        if text.starts_with("0x") || text.len() == 40 {
            return Ok(UInt160::parse(text)?);
        }
        Ok(address_to_script_hash(
            self.services.crypto.as_ref(),
            text,
            self.settings.address_version,
        )?)
    }

    fn get_candidates(&self) -> RpcResult<Value> {
        let candidates: Vec<Value> = self
            .services
            .snapshot
            .candidates()
            .iter()
            .map(|(key, votes)| {
                json!({
                    "publickey": hex::encode(key),
                    "votes": votes.to_string(),
                })
            })
            .collect();
        Ok(json!(candidates))
    }

    fn get_native_contracts(&self) -> RpcResult<Value> {
        serde_json::to_value(self.services.snapshot.native_contracts())
            .map_err(|e| RpcError::internal(e.to_string()))
    }

    // --- network surfaces ------------------------------------------------

    fn get_peers(&self) -> RpcResult<Value> {
        let connected: Vec<Value> = match &self.services.network {
            Some(network) => network
                .ready_peers()
                .iter()
                .map(|(peer, _)| {
                    json!({ "address": peer.ip().to_string(), "port": peer.port() })
                })
                .collect(),
            None => Vec::new(),
        };
        let unconnected: Vec<Value> = self
            .services
            .store
            .keys_with_prefix(PEER_ADDRESS_PREFIX)
            .iter()
            .filter_map(|key| {
                let rest = key.strip_prefix(PEER_ADDRESS_PREFIX)?;
                let (address, port) = rest.rsplit_once(':')?;
                Some(json!({ "address": address, "port": port.parse::<u16>().ok()? }))
            })
            .collect();
        Ok(json!({
            "connected": connected,
            "unconnected": unconnected,
            "bad": [],
        }))
    }

    fn get_connection_count(&self) -> RpcResult<Value> {
        Ok(json!(self
            .services
            .network
            .as_ref()
            .map(|n| n.connection_count())
            .unwrap_or(0)))
    }

    fn validate_address(&self, params: &[Value]) -> RpcResult<Value> {
        let text = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing address"))?;
        let valid = address_to_script_hash(
            self.services.crypto.as_ref(),
            text,
            self.settings.address_version,
        )
        .is_ok();
        Ok(json!({ "address": text, "isvalid": valid }))
    }

    // --- iterator sessions -----------------------------------------------

    fn traverse_iterator(&self, params: &[Value]) -> RpcResult<Value> {
        let session_id = parse_uuid(params.first(), "session id")?;
        let iterator_id = parse_uuid(params.get(1), "iterator id")?;
        let count = params
            .get(2)
            .and_then(Value::as_u64)
            .unwrap_or(self.config.max_iterator_items as u64) as usize;
        if count > self.config.max_iterator_items {
            return Err(RpcError::invalid_params(format!(
                "count exceeds the {} item limit",
                self.config.max_iterator_items
            )));
        }
        match self.sessions.has_iterator(&session_id, &iterator_id) {
            None => Err(RpcError::UnknownSession),
            Some(false) => Err(RpcError::UnknownIterator),
            Some(true) => self
                .sessions
                .traverse(&session_id, &iterator_id, count)
                .map(Value::Array)
                .ok_or(RpcError::UnknownSession),
        }
    }

    fn terminate_session(&self, params: &[Value]) -> RpcResult<Value> {
        let session_id = parse_uuid(params.first(), "session id")?;
        Ok(json!(self.sessions.terminate(&session_id)))
    }
}

fn parse_uuid(value: Option<&Value>, what: &str) -> RpcResult<Uuid> {
    let text = value
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params(format!("missing {what}")))?;
    Uuid::parse_str(text).map_err(|_| RpcError::invalid_params(format!("malformed {what}")))
}

fn hex_keys(keys: Vec<Vec<u8>>) -> Value {
    Value::Array(keys.iter().map(|key| json!(hex::encode(key))).collect())
}

fn parse_scopes(text: &str) -> RpcResult<WitnessScope> {
    let mut bits = 0u8;
    for part in text.split(',') {
        bits |= match part.trim() {
            "None" => 0x00,
            "CalledByEntry" => 0x01,
            "CustomContracts" => 0x10,
            "CustomGroups" => 0x20,
            "WitnessRules" => 0x40,
            "Global" => 0x80,
            other => {
                return Err(RpcError::invalid_params(format!(
                    "unknown witness scope {other}"
                )))
            }
        };
    }
    WitnessScope::from_byte(bits).map_err(|e| RpcError::invalid_params(e.to_string()))
}

fn rand_nonce() -> u32 {
    // Sessions already pull entropy through uuid; reuse it for the nonce.
    let id = Uuid::new_v4();
    u32::from_le_bytes(id.as_bytes()[..4].try_into().expect("uuid has 16 bytes"))
}
