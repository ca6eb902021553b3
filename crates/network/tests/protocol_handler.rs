//! Scenario tests for the protocol handler: handshake, gossip, retry and
//! relay against a recording transport.

use neoxide_config::{NetworkConfig, ProtocolSettings};
use neoxide_core::{
    Block, BlockHeader, Crypto, KeyValueStore, Ledger, MemoryKeyValueStore, MemoryMempool,
    MemorySnapshot, Mempool, Signer, Snapshot, StdCrypto, StoragePolicyReader, Transaction,
    UInt160, UInt256, Witness,
};
use neoxide_io::Serializable;
use neoxide_network::{
    HandshakeState, InventoryItem, Message, MessageCommand, NetworkAddress, NodeServices,
    PeerAddressRecord, PeerId, ProtocolHandler, ProtocolMessage, Transport,
};
use neoxide_verification::{signature_contract_script, TransactionVerifier};
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Default)]
struct MockTransport {
    sent: Mutex<Vec<(PeerId, Message)>>,
    disconnected: Mutex<Vec<(PeerId, String)>>,
}

impl Transport for MockTransport {
    fn send(&self, peer: PeerId, message: Message) {
        self.sent.lock().push((peer, message));
    }

    fn disconnect(&self, peer: PeerId, reason: &str) {
        self.disconnected.lock().push((peer, reason.to_string()));
    }
}

impl MockTransport {
    fn take_sent(&self) -> Vec<(PeerId, Message)> {
        std::mem::take(&mut self.sent.lock())
    }

    fn commands_to(&self, peer: PeerId) -> Vec<MessageCommand> {
        self.sent
            .lock()
            .iter()
            .filter(|(id, _)| *id == peer)
            .map(|(_, m)| m.command())
            .collect()
    }

    fn disconnect_count(&self) -> usize {
        self.disconnected.lock().len()
    }
}

struct Harness {
    handler: ProtocolHandler,
    transport: Arc<MockTransport>,
    snapshot: Arc<MemorySnapshot>,
    mempool: Arc<MemoryMempool>,
    store: Arc<MemoryKeyValueStore>,
    settings: ProtocolSettings,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

fn block_at(index: u32, prev_hash: UInt256) -> Block {
    Block {
        header: BlockHeader {
            version: 0,
            prev_hash,
            merkle_root: UInt256::zero(),
            timestamp: now_millis().saturating_sub(60_000) + index as u64 * 1000,
            nonce: 7,
            index,
            primary_index: 0,
            next_consensus: UInt160::zero(),
            witness: Witness::default(),
        },
        transactions: Vec::new(),
    }
}

fn harness() -> Harness {
    let settings = ProtocolSettings::private();
    let snapshot = Arc::new(MemorySnapshot::new());
    snapshot.try_add_block(block_at(0, UInt256::zero())).unwrap();
    let mempool = Arc::new(MemoryMempool::new());
    let store = Arc::new(MemoryKeyValueStore::new());
    let transport = Arc::new(MockTransport::default());
    let verifier = Arc::new(TransactionVerifier::new(
        Arc::new(StoragePolicyReader::new(UInt160::from_bytes([0xEE; 20]))),
        Arc::new(StdCrypto),
    ));
    let handler = ProtocolHandler::new(
        settings.clone(),
        NetworkConfig::default(),
        NodeServices {
            snapshot: snapshot.clone(),
            ledger: snapshot.clone(),
            mempool: mempool.clone(),
            verifier,
            store: store.clone(),
            transport: transport.clone(),
        },
    );
    Harness {
        handler,
        transport,
        snapshot,
        mempool,
        store,
        settings,
    }
}

fn peer(n: u8) -> PeerId {
    format!("10.0.0.{n}:10333").parse().unwrap()
}

fn version_from(harness: &Harness, nonce: u32, start_height: u32) -> Message {
    Message::new(
        harness.settings.network,
        ProtocolMessage::Version {
            magic: harness.settings.network,
            version: 0,
            services: 1,
            timestamp: now_millis(),
            port: 10333,
            nonce,
            user_agent: "/peer/".into(),
            start_height,
            relay: true,
        },
    )
}

fn make_ready(harness: &Harness, id: PeerId, start_height: u32) {
    harness.handler.on_peer_connected(id, false);
    harness
        .handler
        .handle_message(id, version_from(harness, 1000 + id.port() as u32, start_height));
    harness.handler.handle_message(
        id,
        Message::new(harness.settings.network, ProtocolMessage::Verack),
    );
    assert_eq!(
        harness.handler.peer_handshake_state(id),
        Some(HandshakeState::Ready)
    );
    harness.transport.take_sent();
}

#[test]
fn test_inbound_handshake_sequence() {
    let harness = harness();
    let a = peer(1);
    harness.handler.on_peer_connected(a, false);
    harness.handler.handle_message(a, version_from(&harness, 42, 0));

    // Inbound: the peer's Version triggers our Verack plus our Version.
    let commands = harness.transport.commands_to(a);
    assert_eq!(commands, vec![MessageCommand::Verack, MessageCommand::Version]);
    assert_eq!(
        harness.handler.peer_handshake_state(a),
        Some(HandshakeState::VersionReceived)
    );

    harness.transport.take_sent();
    harness.handler.handle_message(
        a,
        Message::new(harness.settings.network, ProtocolMessage::Verack),
    );
    assert_eq!(
        harness.handler.peer_handshake_state(a),
        Some(HandshakeState::Ready)
    );
    // On Ready we ask for addresses; the peer is not taller, so no
    // GetHeaders.
    assert_eq!(harness.transport.commands_to(a), vec![MessageCommand::GetAddr]);
}

#[test]
fn test_taller_peer_triggers_header_sync() {
    let harness = harness();
    let a = peer(1);
    harness.handler.on_peer_connected(a, false);
    harness.handler.handle_message(a, version_from(&harness, 42, 500));
    harness.transport.take_sent();
    harness.handler.handle_message(
        a,
        Message::new(harness.settings.network, ProtocolMessage::Verack),
    );
    let commands = harness.transport.commands_to(a);
    assert!(commands.contains(&MessageCommand::GetAddr));
    assert!(commands.contains(&MessageCommand::GetHeaders));
}

#[test]
fn test_nonce_collision_disconnects() {
    let harness = harness();
    let a = peer(1);
    harness.handler.on_peer_connected(a, false);
    let own = harness.handler.nonce();
    harness.handler.handle_message(a, version_from(&harness, own, 0));
    assert_eq!(harness.transport.disconnect_count(), 1);
    assert_eq!(harness.handler.connection_count(), 0);
}

#[test]
fn test_wrong_magic_disconnects() {
    let harness = harness();
    let a = peer(1);
    harness.handler.on_peer_connected(a, false);
    let mut message = version_from(&harness, 42, 0);
    message.magic ^= 0xFFFF;
    harness.handler.handle_message(a, message);
    assert_eq!(harness.transport.disconnect_count(), 1);
}

#[test]
fn test_message_before_ready_is_ignored_not_disconnected() {
    let harness = harness();
    let a = peer(1);
    harness.handler.on_peer_connected(a, false);
    harness.handler.handle_message(
        a,
        Message::new(harness.settings.network, ProtocolMessage::Mempool),
    );
    assert_eq!(harness.transport.disconnect_count(), 0);
    assert!(harness.transport.take_sent().is_empty());
}

#[test]
fn test_ping_pong_echo() {
    let harness = harness();
    let a = peer(1);
    make_ready(&harness, a, 0);
    let payload = [9u8; 8];
    harness.handler.handle_message(
        a,
        Message::new(harness.settings.network, ProtocolMessage::Ping { payload }),
    );
    let sent = harness.transport.take_sent();
    assert_eq!(sent.len(), 1);
    match &sent[0].1.payload {
        ProtocolMessage::Pong { payload: echoed } => assert_eq!(*echoed, payload),
        other => panic!("expected Pong, got {other:?}"),
    }
}

#[test]
fn test_inv_relay_excludes_source() {
    // Spec scenario: A announces a block; after ingest it relays to B and
    // C but never back to A.
    let harness = harness();
    let (a, b, c) = (peer(1), peer(2), peer(3));
    for id in [a, b, c] {
        make_ready(&harness, id, 0);
    }

    let genesis_hash = harness.snapshot.block_hash(0).unwrap();
    let block = block_at(1, genesis_hash);
    let hash = block.hash();

    harness.handler.handle_message(
        a,
        Message::new(
            harness.settings.network,
            ProtocolMessage::Inv {
                inventory: vec![InventoryItem::block(hash)],
            },
        ),
    );
    assert!(harness.handler.peer_knows_hash(a, &hash));
    assert_eq!(harness.transport.commands_to(a), vec![MessageCommand::GetData]);
    assert_eq!(harness.handler.pending_block_requests(), 1);
    harness.transport.take_sent();

    harness.handler.handle_message(
        a,
        Message::new(harness.settings.network, ProtocolMessage::Block { block }),
    );
    assert!(harness.snapshot.contains_block(&hash));
    assert_eq!(harness.handler.pending_block_requests(), 0);

    let sent = harness.transport.take_sent();
    let inv_targets: Vec<PeerId> = sent
        .iter()
        .filter(|(_, m)| m.command() == MessageCommand::Inv)
        .map(|(id, _)| *id)
        .collect();
    assert_eq!(inv_targets.len(), 2);
    assert!(inv_targets.contains(&b));
    assert!(inv_targets.contains(&c));
    assert!(!inv_targets.contains(&a));
    assert!(harness.handler.peer_knows_hash(b, &hash));
    assert!(harness.handler.peer_knows_hash(c, &hash));
}

#[test]
fn test_duplicate_inv_not_rerequested() {
    let harness = harness();
    let a = peer(1);
    make_ready(&harness, a, 0);
    let hash = UInt256::from_bytes([5; 32]);
    let inv = Message::new(
        harness.settings.network,
        ProtocolMessage::Inv {
            inventory: vec![InventoryItem::block(hash)],
        },
    );
    harness.handler.handle_message(a, inv.clone());
    assert_eq!(harness.transport.commands_to(a).len(), 1);
    harness.transport.take_sent();
    // Announcing again within the request window is a no-op.
    harness.handler.handle_message(a, inv);
    assert!(harness.transport.take_sent().is_empty());
}

#[test]
fn test_notfound_triggers_alternate_peer_retry() {
    // Spec scenario: A reports NotFound; the handler retries against B or
    // C and the block still arrives and relays.
    let harness = harness();
    let (a, b, c) = (peer(1), peer(2), peer(3));
    for id in [a, b, c] {
        make_ready(&harness, id, 0);
    }

    let genesis_hash = harness.snapshot.block_hash(0).unwrap();
    let block = block_at(1, genesis_hash);
    let hash = block.hash();

    harness.handler.handle_message(
        a,
        Message::new(
            harness.settings.network,
            ProtocolMessage::Inv {
                inventory: vec![InventoryItem::block(hash)],
            },
        ),
    );
    harness.transport.take_sent();

    harness.handler.handle_message(
        a,
        Message::new(
            harness.settings.network,
            ProtocolMessage::NotFound {
                inventory: vec![InventoryItem::block(hash)],
            },
        ),
    );
    let sent = harness.transport.take_sent();
    assert_eq!(sent.len(), 1);
    let (alternate, message) = &sent[0];
    assert_ne!(*alternate, a);
    assert_eq!(message.command(), MessageCommand::GetData);

    // The alternate answers; the block lands and is relayed to the one
    // remaining peer that has not seen it.
    harness.handler.handle_message(
        *alternate,
        Message::new(harness.settings.network, ProtocolMessage::Block { block }),
    );
    assert!(harness.snapshot.contains_block(&hash));
    let sent = harness.transport.take_sent();
    let inv_targets: Vec<PeerId> = sent
        .iter()
        .filter(|(_, m)| m.command() == MessageCommand::Inv)
        .map(|(id, _)| *id)
        .collect();
    // A announced it and the alternate served it; only the third peer
    // needs the announcement.
    assert_eq!(inv_targets.len(), 1);
    assert!(*alternate != inv_targets[0] && inv_targets[0] != a);
}

#[test]
fn test_notfound_retry_cap_drops_request() {
    let harness = harness();
    let (a, b) = (peer(1), peer(2));
    make_ready(&harness, a, 0);
    make_ready(&harness, b, 0);

    let hash = UInt256::from_bytes([7; 32]);
    harness.handler.handle_message(
        a,
        Message::new(
            harness.settings.network,
            ProtocolMessage::Inv {
                inventory: vec![InventoryItem::block(hash)],
            },
        ),
    );
    assert_eq!(harness.handler.pending_block_requests(), 1);

    // Both peers report NotFound; with no untried peer left the request
    // is dropped.
    for id in [a, b] {
        harness.handler.handle_message(
            id,
            Message::new(
                harness.settings.network,
                ProtocolMessage::NotFound {
                    inventory: vec![InventoryItem::block(hash)],
                },
            ),
        );
    }
    assert_eq!(harness.handler.pending_block_requests(), 0);
}

#[test]
fn test_getdata_miss_answers_notfound() {
    let harness = harness();
    let a = peer(1);
    make_ready(&harness, a, 0);
    let missing = UInt256::from_bytes([9; 32]);
    harness.handler.handle_message(
        a,
        Message::new(
            harness.settings.network,
            ProtocolMessage::GetData {
                inventory: vec![InventoryItem::block(missing)],
            },
        ),
    );
    let sent = harness.transport.take_sent();
    assert_eq!(sent.len(), 1);
    match &sent[0].1.payload {
        ProtocolMessage::NotFound { inventory } => {
            assert_eq!(inventory, &vec![InventoryItem::block(missing)]);
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn test_getdata_serves_mempool_transaction() {
    let harness = harness();
    let a = peer(1);
    make_ready(&harness, a, 0);
    let tx = Transaction {
        valid_until_block: 100,
        script: vec![0x11],
        signers: vec![Signer::called_by_entry(UInt160::from_bytes([1; 20]))],
        witnesses: vec![Witness::default()],
        ..Default::default()
    };
    let hash = tx.hash();
    assert!(harness.mempool.try_add(tx));

    harness.handler.handle_message(
        a,
        Message::new(
            harness.settings.network,
            ProtocolMessage::GetData {
                inventory: vec![InventoryItem::transaction(hash)],
            },
        ),
    );
    let sent = harness.transport.take_sent();
    assert_eq!(sent[0].1.command(), MessageCommand::Transaction);
    assert!(harness.handler.peer_knows_hash(a, &hash));
}

#[test]
fn test_verified_transaction_enters_mempool_and_relays() {
    let harness = harness();
    let (a, b) = (peer(1), peer(2));
    make_ready(&harness, a, 0);
    make_ready(&harness, b, 0);

    // A properly signed, properly funded transaction.
    let signing = SigningKey::from_slice(&[3u8; 32]).unwrap();
    let public = VerifyingKey::from(&signing)
        .to_encoded_point(true)
        .as_bytes()
        .to_vec();
    let verification = signature_contract_script(&public);
    let account = StdCrypto.hash160(&verification);
    let mut tx = Transaction {
        nonce: 1,
        system_fee: 10_000_000,
        valid_until_block: 1000,
        script: vec![0x11],
        signers: vec![Signer::called_by_entry(account)],
        witnesses: vec![Witness::new(vec![0u8; 66], verification)],
        ..Default::default()
    };
    tx.network_fee = (tx.size() as i64) * 1000 + 30 * ((1 << 15) + 16) + 100_000;
    let signature: Signature = signing.sign(&tx.sign_data(harness.settings.network));
    let mut invocation = vec![0x0C, 64];
    invocation.extend_from_slice(&signature.to_bytes());
    tx.witnesses[0].invocation_script = invocation;
    let hash = tx.hash();

    harness.handler.handle_message(
        a,
        Message::new(
            harness.settings.network,
            ProtocolMessage::Transaction { transaction: tx },
        ),
    );
    assert!(harness.mempool.contains(&hash));
    let sent = harness.transport.take_sent();
    let inv_targets: Vec<PeerId> = sent
        .iter()
        .filter(|(_, m)| m.command() == MessageCommand::Inv)
        .map(|(id, _)| *id)
        .collect();
    assert_eq!(inv_targets, vec![b]);
}

#[test]
fn test_invalid_transaction_rejected_not_pooled() {
    let harness = harness();
    let a = peer(1);
    make_ready(&harness, a, 0);
    let tx = Transaction {
        valid_until_block: 100,
        script: vec![0x11],
        signers: vec![Signer::called_by_entry(UInt160::from_bytes([1; 20]))],
        witnesses: vec![Witness::new(vec![], vec![0x01, 0x02])], // junk witness
        ..Default::default()
    };
    let hash = tx.hash();
    harness.handler.handle_message(
        a,
        Message::new(
            harness.settings.network,
            ProtocolMessage::Transaction { transaction: tx },
        ),
    );
    assert!(!harness.mempool.contains(&hash));
    let sent = harness.transport.take_sent();
    assert!(sent.iter().any(|(_, m)| m.command() == MessageCommand::Reject));
}

#[test]
fn test_block_gap_requests_backfill() {
    let harness = harness();
    let a = peer(1);
    make_ready(&harness, a, 0);

    // A block five heights ahead cannot link; the handler requests the
    // missing range from the same peer.
    let orphan = block_at(5, UInt256::from_bytes([0xAA; 32]));
    harness.handler.handle_message(
        a,
        Message::new(harness.settings.network, ProtocolMessage::Block { block: orphan }),
    );
    let sent = harness.transport.take_sent();
    assert_eq!(sent.len(), 1);
    match &sent[0].1.payload {
        ProtocolMessage::GetBlockByIndex { index_start, count } => {
            assert_eq!(*index_start, 1);
            assert_eq!(*count, 4);
        }
        other => panic!("expected GetBlockByIndex, got {other:?}"),
    }
}

#[test]
fn test_get_headers_served_from_ledger() {
    let harness = harness();
    let a = peer(1);

    let mut prev = harness.snapshot.block_hash(0).unwrap();
    for index in 1..=5 {
        let block = block_at(index, prev);
        prev = block.hash();
        harness.snapshot.try_add_block(block).unwrap();
    }
    make_ready(&harness, a, 0);

    let genesis_hash = harness.snapshot.block_hash(0).unwrap();
    harness.handler.handle_message(
        a,
        Message::new(
            harness.settings.network,
            ProtocolMessage::GetHeaders {
                hash_start: genesis_hash,
                count: 3,
            },
        ),
    );
    let sent = harness.transport.take_sent();
    match &sent[0].1.payload {
        ProtocolMessage::Headers { headers } => {
            assert_eq!(headers.len(), 3);
            assert_eq!(headers[0].index, 1);
        }
        other => panic!("expected Headers, got {other:?}"),
    }
}

#[test]
fn test_headers_response_requests_missing_bodies() {
    let harness = harness();
    let a = peer(1);
    make_ready(&harness, a, 10);

    let genesis = harness.snapshot.block_by_index(0).unwrap();
    let block1 = block_at(1, genesis.hash());
    let block2 = block_at(2, block1.hash());
    harness.handler.handle_message(
        a,
        Message::new(
            harness.settings.network,
            ProtocolMessage::Headers {
                headers: vec![block1.header.clone(), block2.header.clone()],
            },
        ),
    );
    let sent = harness.transport.take_sent();
    match &sent[0].1.payload {
        ProtocolMessage::GetData { inventory } => {
            assert_eq!(inventory.len(), 2);
            assert_eq!(inventory[0].hash, block1.hash());
            assert_eq!(inventory[1].hash, block2.hash());
        }
        other => panic!("expected GetData, got {other:?}"),
    }
    assert_eq!(harness.handler.pending_block_requests(), 2);
}

#[test]
fn test_addr_entries_validated_and_persisted() {
    let harness = harness();
    let a = peer(1);
    make_ready(&harness, a, 0);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let good: NetworkAddress = NetworkAddress {
        timestamp: now - 60,
        services: 1,
        endpoint: "20.1.2.3:10333".parse().unwrap(),
    };
    let stale = NetworkAddress {
        timestamp: now - 48 * 3600,
        services: 1,
        endpoint: "20.1.2.4:10333".parse().unwrap(),
    };
    let bad_port = NetworkAddress {
        timestamp: now,
        services: 1,
        endpoint: "20.1.2.5:0".parse().unwrap(),
    };
    let loopback = NetworkAddress {
        timestamp: now,
        services: 1,
        endpoint: "127.0.0.1:10333".parse().unwrap(),
    };
    harness.handler.handle_message(
        a,
        Message::new(
            harness.settings.network,
            ProtocolMessage::Addr {
                addresses: vec![good, stale, bad_port, loopback],
            },
        ),
    );

    let keys = harness.store.keys_with_prefix("PeerAddress:");
    assert_eq!(keys, vec!["PeerAddress:20.1.2.3:10333".to_string()]);
    let record_bytes = harness.store.get(&keys[0]).unwrap();
    let record =
        <PeerAddressRecord as neoxide_io::SerializableExt>::from_array(&record_bytes).unwrap();
    assert_eq!(record.timestamp, now - 60);
    assert!(!record.connected);
}

#[test]
fn test_get_addr_answers_ready_endpoints() {
    let harness = harness();
    let (a, b, c) = (peer(1), peer(2), peer(3));
    make_ready(&harness, a, 0);
    make_ready(&harness, b, 0);
    // c connects but never completes the handshake.
    harness.handler.on_peer_connected(c, false);

    harness.handler.handle_message(
        a,
        Message::new(harness.settings.network, ProtocolMessage::GetAddr),
    );
    let sent = harness.transport.take_sent();
    match &sent[0].1.payload {
        ProtocolMessage::Addr { addresses } => {
            assert_eq!(addresses.len(), 1);
            assert_eq!(addresses[0].endpoint.ip(), b.ip());
        }
        other => panic!("expected Addr, got {other:?}"),
    }
}

#[test]
fn test_mempool_message_answers_inventory() {
    let harness = harness();
    let a = peer(1);
    make_ready(&harness, a, 0);
    let tx = Transaction {
        valid_until_block: 50,
        script: vec![0x11],
        signers: vec![Signer::called_by_entry(UInt160::from_bytes([2; 20]))],
        witnesses: vec![Witness::default()],
        ..Default::default()
    };
    let hash = tx.hash();
    harness.mempool.try_add(tx);

    harness.handler.handle_message(
        a,
        Message::new(harness.settings.network, ProtocolMessage::Mempool),
    );
    let sent = harness.transport.take_sent();
    match &sent[0].1.payload {
        ProtocolMessage::Inv { inventory } => {
            assert_eq!(inventory, &vec![InventoryItem::transaction(hash)]);
        }
        other => panic!("expected Inv, got {other:?}"),
    }
}

#[test]
fn test_sync_oracle() {
    let harness = harness();
    // No peers: not synchronized.
    assert!(!harness.handler.is_synchronized());

    // One Ready peer at our height: synchronized.
    let a = peer(1);
    make_ready(&harness, a, 1);
    assert!(harness.handler.is_synchronized());

    // A much taller peer breaks the height window.
    let b = peer(2);
    make_ready(&harness, b, 500);
    assert!(!harness.handler.is_synchronized());
}

#[test]
fn test_keepalive_disconnects_after_two_silent_pings() {
    let harness = harness();
    let a = peer(1);
    make_ready(&harness, a, 0);

    harness.handler.send_pings(); // ping 1, unanswered
    harness.handler.send_pings(); // missed 1, ping 2
    assert_eq!(harness.transport.disconnect_count(), 0);
    harness.handler.send_pings(); // missed 2 -> disconnect
    assert_eq!(harness.transport.disconnect_count(), 1);
    assert_eq!(harness.handler.connection_count(), 0);
}

#[test]
fn test_pong_resets_keepalive() {
    let harness = harness();
    let a = peer(1);
    make_ready(&harness, a, 0);

    harness.handler.send_pings();
    let sent = harness.transport.take_sent();
    let payload = match &sent[0].1.payload {
        ProtocolMessage::Ping { payload } => *payload,
        other => panic!("expected Ping, got {other:?}"),
    };
    harness.handler.handle_message(
        a,
        Message::new(harness.settings.network, ProtocolMessage::Pong { payload }),
    );
    // Two more ping rounds must not disconnect a responsive peer.
    harness.handler.send_pings();
    harness.handler.send_pings();
    assert!(harness.transport.disconnect_count() <= 1);
}
