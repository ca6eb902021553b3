//! Integration tests for the RPC method table over an in-memory chain.

use base64::Engine as _;
use neoxide_config::{NetworkConfig, ProtocolSettings, RpcConfig};
use neoxide_core::{
    Block, BlockHeader, ContractManifest, ContractMethod, ContractState, Crypto, Ledger,
    MemoryKeyValueStore, MemoryMempool, MemorySnapshot, Mempool, Signer, Snapshot, StdCrypto,
    StoragePolicyReader, Transaction, UInt160, UInt256, Witness,
};
use neoxide_io::{Serializable, SerializableExt};
use neoxide_rpc::{RpcError, RpcMethods, RpcNodeServices};
use neoxide_verification::{signature_contract_script, TransactionVerifier};
use neoxide_vm::{syscall_hash, OpCode};
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

fn sample_tx(nonce: u32) -> Transaction {
    Transaction {
        nonce,
        valid_until_block: 1000,
        script: vec![0x11],
        signers: vec![Signer::called_by_entry(UInt160::from_bytes([7; 20]))],
        witnesses: vec![Witness::default()],
        ..Default::default()
    }
}

fn block_at(index: u32, prev_hash: UInt256, transactions: Vec<Transaction>) -> Block {
    let mut block = Block {
        header: BlockHeader {
            version: 0,
            prev_hash,
            merkle_root: UInt256::zero(),
            timestamp: now_millis().saturating_sub(120_000) + index as u64 * 1000,
            nonce: 1,
            index,
            primary_index: 0,
            next_consensus: UInt160::zero(),
            witness: Witness::default(),
        },
        transactions,
    };
    block.header.merkle_root = block.compute_merkle_root();
    block
}

/// A contract with two methods: `add(a, b)` at offset 0 and `find()` at
/// offset 2 returning a storage iterator.
fn sample_contract() -> (ContractState, Vec<(Vec<u8>, Vec<u8>)>) {
    let mut script = vec![OpCode::ADD.as_byte(), OpCode::RET.as_byte()];
    let find_offset = script.len();
    script.push(OpCode::PUSH0.as_byte()); // find options
    script.extend_from_slice(&[OpCode::PUSHDATA1.as_byte(), 0]); // empty prefix
    script.push(OpCode::SYSCALL.as_byte());
    script.extend_from_slice(&syscall_hash("System.Storage.GetContext").to_le_bytes());
    script.push(OpCode::SYSCALL.as_byte());
    script.extend_from_slice(&syscall_hash("System.Storage.Find").to_le_bytes());
    script.push(OpCode::RET.as_byte());

    let hash = StdCrypto.hash160(&script);
    let contract = ContractState {
        id: 1,
        update_counter: 0,
        hash,
        script,
        manifest: ContractManifest {
            name: "sample".into(),
            methods: vec![
                ContractMethod {
                    name: "add".into(),
                    offset: 0,
                    parameters: 2,
                    safe: true,
                },
                ContractMethod {
                    name: "find".into(),
                    offset: find_offset,
                    parameters: 0,
                    safe: true,
                },
            ],
            raw: Value::Null,
        },
    };
    let storage = vec![
        (vec![1u8], vec![10u8]),
        (vec![2u8], vec![20u8]),
        (vec![3u8], vec![30u8]),
    ];
    (contract, storage)
}

struct Fixture {
    methods: RpcMethods,
    snapshot: Arc<MemorySnapshot>,
    mempool: Arc<MemoryMempool>,
    contract_hash: UInt160,
    chain_tx: Transaction,
}

fn fixture() -> Fixture {
    let snapshot = Arc::new(MemorySnapshot::new());
    let genesis = block_at(0, UInt256::zero(), Vec::new());
    let genesis_hash = genesis.hash();
    snapshot.try_add_block(genesis).unwrap();
    let chain_tx = sample_tx(1);
    snapshot
        .try_add_block(block_at(1, genesis_hash, vec![chain_tx.clone()]))
        .unwrap();

    let (contract, storage) = sample_contract();
    let contract_hash = contract.hash;
    snapshot.put_contract(contract, storage);
    snapshot.set_committee(vec![vec![0x02; 33]], vec![vec![0x03; 33]]);
    snapshot.set_gas_per_block(5_0000_0000);

    let mempool = Arc::new(MemoryMempool::new());
    let services = RpcNodeServices {
        snapshot: snapshot.clone(),
        ledger: snapshot.clone(),
        mempool: mempool.clone(),
        verifier: Arc::new(TransactionVerifier::new(
            Arc::new(StoragePolicyReader::new(UInt160::from_bytes([0xEE; 20]))),
            Arc::new(StdCrypto),
        )),
        policy: Arc::new(StoragePolicyReader::new(UInt160::from_bytes([0xEE; 20]))),
        crypto: Arc::new(StdCrypto),
        store: Arc::new(MemoryKeyValueStore::new()),
        network: None,
    };
    let methods = RpcMethods::new(
        ProtocolSettings::private(),
        NetworkConfig::default(),
        RpcConfig::default(),
        services,
    );
    Fixture {
        methods,
        snapshot,
        mempool,
        contract_hash,
        chain_tx,
    }
}

#[test]
fn test_chain_getters() {
    let fixture = fixture();
    assert_eq!(
        fixture.methods.dispatch("getblockcount", &[]).unwrap(),
        json!(2)
    );
    assert_eq!(
        fixture.methods.dispatch("getblockheadercount", &[]).unwrap(),
        json!(2)
    );
    let best = fixture.methods.dispatch("getbestblockhash", &[]).unwrap();
    assert_eq!(
        best.as_str().unwrap(),
        fixture.snapshot.best_block_hash().to_hex_string()
    );
}

#[test]
fn test_get_block_by_index_and_hash() {
    let fixture = fixture();
    let verbose = fixture
        .methods
        .dispatch("getblock", &[json!(1), json!(true)])
        .unwrap();
    assert_eq!(verbose["index"], 1);
    assert_eq!(verbose["tx"].as_array().unwrap().len(), 1);
    assert_eq!(verbose["confirmations"], 1);

    let hash = verbose["hash"].as_str().unwrap().to_string();
    let raw = fixture
        .methods
        .dispatch("getblock", &[json!(hash)])
        .unwrap();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(raw.as_str().unwrap())
        .unwrap();
    let decoded = Block::from_array(&bytes).unwrap();
    assert_eq!(decoded.index(), 1);
}

#[test]
fn test_unknown_block() {
    let fixture = fixture();
    assert_eq!(
        fixture.methods.dispatch("getblock", &[json!(99)]),
        Err(RpcError::UnknownBlock)
    );
    assert_eq!(
        fixture.methods.dispatch("getblockhash", &[json!(99)]),
        Err(RpcError::UnknownBlock)
    );
}

#[test]
fn test_get_raw_transaction_and_height() {
    let fixture = fixture();
    let hash = fixture.chain_tx.hash().to_hex_string();
    let verbose = fixture
        .methods
        .dispatch("getrawtransaction", &[json!(hash), json!(true)])
        .unwrap();
    assert_eq!(verbose["hash"].as_str().unwrap(), hash);
    assert_eq!(verbose["sysfee"], "0");

    let height = fixture
        .methods
        .dispatch("gettransactionheight", &[json!(hash)])
        .unwrap();
    assert_eq!(height, json!(1));

    let missing = UInt256::from_bytes([0xAB; 32]).to_hex_string();
    assert_eq!(
        fixture
            .methods
            .dispatch("gettransactionheight", &[json!(missing)]),
        Err(RpcError::UnknownTransaction)
    );
}

#[test]
fn test_raw_mempool_lists_pooled_transactions() {
    let fixture = fixture();
    let tx = sample_tx(9);
    let hash = tx.hash().to_hex_string();
    fixture.mempool.try_add(tx);
    let listed = fixture.methods.dispatch("getrawmempool", &[]).unwrap();
    assert_eq!(listed, json!([hash]));
}

#[test]
fn test_send_raw_transaction_accepts_signed() {
    let fixture = fixture();
    let signing = SigningKey::from_slice(&[5u8; 32]).unwrap();
    let public = VerifyingKey::from(&signing)
        .to_encoded_point(true)
        .as_bytes()
        .to_vec();
    let verification = signature_contract_script(&public);
    let account = StdCrypto.hash160(&verification);
    let mut tx = Transaction {
        nonce: 77,
        system_fee: 10_000_000,
        valid_until_block: 1000,
        script: vec![0x11],
        signers: vec![Signer::called_by_entry(account)],
        witnesses: vec![Witness::new(vec![0u8; 66], verification)],
        ..Default::default()
    };
    tx.network_fee = (tx.size() as i64) * 1000 + 30 * ((1 << 15) + 16) + 100_000;
    let settings = ProtocolSettings::private();
    let signature: Signature = signing.sign(&tx.sign_data(settings.network));
    let mut invocation = vec![0x0C, 64];
    invocation.extend_from_slice(&signature.to_bytes());
    tx.witnesses[0].invocation_script = invocation;

    let payload = b64(&tx.to_array().unwrap());
    let result = fixture
        .methods
        .dispatch("sendrawtransaction", &[json!(payload)])
        .unwrap();
    assert_eq!(result["hash"].as_str().unwrap(), tx.hash().to_hex_string());
    assert!(fixture.mempool.contains(&tx.hash()));
}

#[test]
fn test_send_raw_transaction_rejects_unsigned() {
    let fixture = fixture();
    let tx = sample_tx(50);
    let payload = b64(&tx.to_array().unwrap());
    let result = fixture
        .methods
        .dispatch("sendrawtransaction", &[json!(payload)]);
    assert!(matches!(result, Err(RpcError::VerificationFailed { .. })));
    assert!(fixture.mempool.is_empty());
}

#[test]
fn test_submit_block_extends_chain() {
    let fixture = fixture();
    let tip = fixture.snapshot.best_block_hash();
    let block = block_at(2, tip, Vec::new());
    let payload = b64(&block.to_array().unwrap());
    let result = fixture
        .methods
        .dispatch("submitblock", &[json!(payload)])
        .unwrap();
    assert_eq!(result["hash"].as_str().unwrap(), block.hash().to_hex_string());

    // A duplicate submission reports the conflict.
    assert!(matches!(
        fixture.methods.dispatch("submitblock", &[json!(payload)]),
        Err(RpcError::VerificationFailed { .. })
    ));
}

#[test]
fn test_invoke_function_add() {
    let fixture = fixture();
    let report = fixture
        .methods
        .dispatch(
            "invokefunction",
            &[
                json!(fixture.contract_hash.to_hex_string()),
                json!("add"),
                json!([
                    { "type": "Integer", "value": "3" },
                    { "type": "Integer", "value": "4" },
                ]),
            ],
        )
        .unwrap();
    assert_eq!(report["state"], "HALT", "{report}");
    let stack = report["stack"].as_array().unwrap();
    assert_eq!(stack.last().unwrap()["value"], "7");
    assert_ne!(report["gasconsumed"], "0");
}

#[test]
fn test_invoke_function_unknown_contract() {
    let fixture = fixture();
    let missing = UInt160::from_bytes([0x99; 20]).to_hex_string();
    assert_eq!(
        fixture
            .methods
            .dispatch("invokefunction", &[json!(missing), json!("add"), json!([])]),
        Err(RpcError::UnknownContract)
    );
}

#[test]
fn test_invoke_script_reports_fault() {
    let fixture = fixture();
    // PUSH0 PUSH0 DIV faults.
    let script = b64(&[0x10, 0x10, 0xA1]);
    let report = fixture
        .methods
        .dispatch("invokescript", &[json!(script)])
        .unwrap();
    assert_eq!(report["state"], "FAULT");
    assert!(report["exception"].as_str().is_some());
}

#[test]
fn test_iterator_session_lifecycle() {
    let fixture = fixture();
    let report = fixture
        .methods
        .dispatch(
            "invokefunction",
            &[
                json!(fixture.contract_hash.to_hex_string()),
                json!("find"),
                json!([]),
            ],
        )
        .unwrap();
    assert_eq!(report["state"], "HALT", "{report}");
    let session = report["session"].as_str().expect("session allocated");
    let stack = report["stack"].as_array().unwrap();
    let iterator = stack.last().unwrap();
    assert_eq!(iterator["type"], "InteropInterface");
    assert_eq!(iterator["interface"], "IIterator");
    let iterator_id = iterator["id"].as_str().unwrap();

    // Page through the three storage entries two at a time.
    let first = fixture
        .methods
        .dispatch(
            "traverseiterator",
            &[json!(session), json!(iterator_id), json!(2)],
        )
        .unwrap();
    assert_eq!(first.as_array().unwrap().len(), 2);
    assert_eq!(first[0]["type"], "Struct");
    let second = fixture
        .methods
        .dispatch(
            "traverseiterator",
            &[json!(session), json!(iterator_id), json!(2)],
        )
        .unwrap();
    assert_eq!(second.as_array().unwrap().len(), 1);

    // Termination reports existence exactly once.
    assert_eq!(
        fixture
            .methods
            .dispatch("terminatesession", &[json!(session)])
            .unwrap(),
        json!(true)
    );
    assert_eq!(
        fixture
            .methods
            .dispatch("terminatesession", &[json!(session)])
            .unwrap(),
        json!(false)
    );
    assert_eq!(
        fixture.methods.dispatch(
            "traverseiterator",
            &[json!(session), json!(iterator_id), json!(1)],
        ),
        Err(RpcError::UnknownSession)
    );
}

#[test]
fn test_traverse_count_limit() {
    let fixture = fixture();
    let session = uuid::Uuid::new_v4().to_string();
    let iterator = uuid::Uuid::new_v4().to_string();
    assert!(matches!(
        fixture.methods.dispatch(
            "traverseiterator",
            &[json!(session), json!(iterator), json!(5000)],
        ),
        Err(RpcError::InvalidParams { .. })
    ));
}

#[test]
fn test_storage_getters() {
    let fixture = fixture();
    let contract = fixture.contract_hash.to_hex_string();
    let value = fixture
        .methods
        .dispatch("getstorage", &[json!(contract), json!(b64(&[1u8]))])
        .unwrap();
    assert_eq!(value.as_str().unwrap(), b64(&[10u8]));

    let missing = fixture
        .methods
        .dispatch("getstorage", &[json!(contract), json!(b64(&[9u8]))])
        .unwrap();
    assert_eq!(missing, Value::Null);
}

#[test]
fn test_find_storage_pagination() {
    let fixture = fixture();
    let contract = fixture.contract_hash.to_hex_string();
    let page = fixture
        .methods
        .dispatch(
            "findstorage",
            &[json!(contract), json!(b64(&[])), json!(1)],
        )
        .unwrap();
    let results = page["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["key"].as_str().unwrap(), b64(&[2u8]));
    assert_eq!(page["truncated"], false);
    assert_eq!(page["next"], 3);
}

#[test]
fn test_contract_state_and_native_surfaces() {
    let fixture = fixture();
    let state = fixture
        .methods
        .dispatch(
            "getcontractstate",
            &[json!(fixture.contract_hash.to_hex_string())],
        )
        .unwrap();
    assert_eq!(state["manifest"]["name"], "sample");

    let committee = fixture.methods.dispatch("getcommittee", &[]).unwrap();
    assert_eq!(committee.as_array().unwrap().len(), 1);
    let validators = fixture
        .methods
        .dispatch("getnextblockvalidators", &[])
        .unwrap();
    assert_eq!(validators[0].as_str().unwrap(), hex::encode(vec![0x03; 33]));
}

#[test]
fn test_unclaimed_gas_and_addresses() {
    let fixture = fixture();
    let crypto = StdCrypto;
    let account = UInt160::from_bytes([4; 20]);
    let address = neoxide_core::script_hash_to_address(
        &crypto,
        &account,
        ProtocolSettings::private().address_version,
    );
    let result = fixture
        .methods
        .dispatch("getunclaimedgas", &[json!(address)])
        .unwrap();
    // gas_per_block × (height + 1) with height 1.
    assert_eq!(result["unclaimed"], "1000000000");
    assert_eq!(result["address"].as_str().unwrap(), address);

    let valid = fixture
        .methods
        .dispatch("validateaddress", &[json!(address)])
        .unwrap();
    assert_eq!(valid["isvalid"], true);
    let invalid = fixture
        .methods
        .dispatch("validateaddress", &[json!("not-an-address")])
        .unwrap();
    assert_eq!(invalid["isvalid"], false);
}

#[test]
fn test_getversion_shape() {
    let fixture = fixture();
    let version = fixture.methods.dispatch("getversion", &[]).unwrap();
    assert_eq!(version["tcpport"], 10333);
    assert_eq!(
        version["protocol"]["network"],
        ProtocolSettings::private().network
    );
    assert!(version["useragent"].as_str().unwrap().contains("neoxide"));
}

#[test]
fn test_json_rpc_envelope_mapping() {
    let fixture = fixture();
    let ok = fixture.methods.handle_request(&json!({
        "jsonrpc": "2.0", "id": 1, "method": "getblockcount", "params": [],
    }));
    assert_eq!(ok["result"], json!(2));
    assert_eq!(ok["id"], 1);

    let unknown = fixture.methods.handle_request(&json!({
        "jsonrpc": "2.0", "id": 2, "method": "frobnicate", "params": [],
    }));
    assert_eq!(unknown["error"]["code"], -32601);

    let bad_params = fixture.methods.handle_request(&json!({
        "jsonrpc": "2.0", "id": 3, "method": "getblock", "params": [],
    }));
    assert_eq!(bad_params["error"]["code"], -32602);
}

#[test]
fn test_connection_surfaces_without_network() {
    let fixture = fixture();
    assert_eq!(
        fixture.methods.dispatch("getconnectioncount", &[]).unwrap(),
        json!(0)
    );
    let peers = fixture.methods.dispatch("getpeers", &[]).unwrap();
    assert_eq!(peers["connected"].as_array().unwrap().len(), 0);
}
