//! The per-peer message state machine.
//!
//! One handler per node. Per-peer state sits behind one mutex, the
//! pending-request maps behind another so the relay hot path stays narrow.
//! The transport wires two callbacks: `send` and `disconnect`. Message
//! handlers return errors only for offences that warrant disconnection;
//! the dispatch boundary turns them into `disconnect` calls.

use crate::error::{NetworkError, NetworkResult};
use crate::messages::{
    InventoryItem, InventoryType, Message, NetworkAddress, ProtocolMessage, MAX_INV_ENTRIES,
};
use crate::peer_record::PeerAddressRecord;
use neoxide_config::{NetworkConfig, ProtocolSettings};
use neoxide_core::{
    CoreMetrics, KeyValueStore, Ledger, Mempool, Snapshot, UInt256,
};
use neoxide_io::SerializableExt;
use neoxide_verification::{TransactionVerifier, VerificationContext, VerifyResult};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Peers are identified by their socket address.
pub type PeerId = SocketAddr;

/// Gas ceiling for verifying one relayed transaction.
pub const MAX_VERIFICATION_GAS: i64 = 2_0000_0000;

/// The transport callbacks the handler drives.
pub trait Transport: Send + Sync {
    /// Sends a message to a peer; may block briefly on a bounded queue.
    fn send(&self, peer: PeerId, message: Message);

    /// Severs a peer connection.
    fn disconnect(&self, peer: PeerId, reason: &str);
}

/// Handshake progression per peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// TCP established, nothing exchanged.
    Connected,
    /// Our Version is out.
    VersionSent,
    /// The peer's Version arrived.
    VersionReceived,
    /// Both directions acknowledged.
    Ready,
}

struct PeerState {
    version_sent: bool,
    version_received: bool,
    verack_received: bool,
    start_height: u32,
    listen_port: u16,
    services: u64,
    known_hashes: HashSet<UInt256>,
    requested_blocks: VecDeque<UInt256>,
    requested_transactions: VecDeque<UInt256>,
    last_ping_payload: Option<[u8; 8]>,
    missed_pongs: u32,
    last_pong: Instant,
}

impl PeerState {
    fn new() -> Self {
        Self {
            version_sent: false,
            version_received: false,
            verack_received: false,
            start_height: 0,
            listen_port: 0,
            services: 0,
            known_hashes: HashSet::new(),
            requested_blocks: VecDeque::new(),
            requested_transactions: VecDeque::new(),
            last_ping_payload: None,
            missed_pongs: 0,
            last_pong: Instant::now(),
        }
    }

    fn is_ready(&self) -> bool {
        self.version_received && self.verack_received
    }

    fn handshake_state(&self) -> HandshakeState {
        match (self.version_sent, self.version_received, self.verack_received) {
            (_, true, true) => HandshakeState::Ready,
            (_, true, false) => HandshakeState::VersionReceived,
            (true, false, _) => HandshakeState::VersionSent,
            _ => HandshakeState::Connected,
        }
    }
}

struct PendingRequest {
    requested_from: PeerId,
    issued_at: Instant,
    failed_peers: HashSet<PeerId>,
    retry_count: u32,
}

#[derive(Default)]
struct PendingRequests {
    blocks: HashMap<UInt256, PendingRequest>,
    transactions: HashMap<UInt256, PendingRequest>,
}

/// The collaborators the handler consumes.
pub struct NodeServices {
    /// Read-only chain view.
    pub snapshot: Arc<dyn Snapshot>,
    /// Chain append side.
    pub ledger: Arc<dyn Ledger>,
    /// The memory pool.
    pub mempool: Arc<dyn Mempool>,
    /// The transaction verifier.
    pub verifier: Arc<TransactionVerifier>,
    /// Store for peer-address records.
    pub store: Arc<dyn KeyValueStore>,
    /// The wire.
    pub transport: Arc<dyn Transport>,
}

/// The protocol handler.
pub struct ProtocolHandler {
    settings: ProtocolSettings,
    config: NetworkConfig,
    services: NodeServices,
    metrics: Option<Arc<CoreMetrics>>,
    nonce: u32,
    peers: Mutex<HashMap<PeerId, PeerState>>,
    pending: Mutex<PendingRequests>,
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl ProtocolHandler {
    /// Creates a handler over its collaborators.
    pub fn new(settings: ProtocolSettings, config: NetworkConfig, services: NodeServices) -> Self {
        Self {
            settings,
            config,
            services,
            metrics: None,
            nonce: rand::thread_rng().gen(),
            peers: Mutex::new(HashMap::new()),
            pending: Mutex::new(PendingRequests::default()),
        }
    }

    /// Attaches the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<CoreMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Our handshake nonce, used to detect self-connections.
    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    fn send(&self, peer: PeerId, payload: ProtocolMessage) {
        self.services
            .transport
            .send(peer, Message::new(self.settings.network, payload));
    }

    fn disconnect(&self, peer: PeerId, reason: &str) {
        self.services.transport.disconnect(peer, reason);
        if self.peers.lock().remove(&peer).is_some() {
            if let Some(metrics) = &self.metrics {
                metrics.peers_connected.dec();
                metrics
                    .peers_disconnected
                    .with_label_values(&[reason])
                    .inc();
            }
        }
    }

    /// Registers a new connection; outbound connects open the handshake.
    pub fn on_peer_connected(&self, peer: PeerId, outbound: bool) {
        debug!(%peer, outbound, "peer connected");
        self.peers.lock().insert(peer, PeerState::new());
        if let Some(metrics) = &self.metrics {
            metrics.peers_connected.inc();
        }
        if outbound {
            self.send_version(peer);
        }
    }

    /// Drops a peer's state after the transport lost it.
    pub fn on_peer_disconnected(&self, peer: PeerId) {
        debug!(%peer, "peer disconnected");
        if self.peers.lock().remove(&peer).is_some() {
            if let Some(metrics) = &self.metrics {
                metrics.peers_connected.dec();
                metrics
                    .peers_disconnected
                    .with_label_values(&["transport"])
                    .inc();
            }
        }
    }

    fn send_version(&self, peer: PeerId) {
        let payload = ProtocolMessage::Version {
            magic: self.settings.network,
            version: self.config.protocol_version,
            services: 1,
            timestamp: unix_now_millis(),
            port: self.config.local_port,
            nonce: self.nonce,
            user_agent: self.config.user_agent.clone(),
            start_height: self.services.snapshot.height(),
            relay: true,
        };
        if let Some(state) = self.peers.lock().get_mut(&peer) {
            state.version_sent = true;
        }
        self.send(peer, payload);
    }

    /// The message entry point. The transport must deliver one peer's
    /// messages in arrival order; across peers this may run concurrently.
    pub fn handle_message(&self, peer: PeerId, message: Message) {
        if message.magic != self.settings.network {
            warn!(%peer, magic = message.magic, "frame from a different network");
            self.disconnect(peer, "wrong_network");
            return;
        }
        let command = message.command();
        debug!(%peer, %command, "handling message");
        if let Err(error) = self.dispatch(peer, message) {
            warn!(%peer, %error, "message handling failed, disconnecting");
            self.disconnect(peer, error.reason_tag());
        }
    }

    fn dispatch(&self, peer: PeerId, message: Message) -> NetworkResult<()> {
        match message.payload {
            ProtocolMessage::Version {
                magic,
                version,
                port,
                nonce,
                start_height,
                services,
                ..
            } => self.handle_version(peer, magic, version, port, nonce, services, start_height),
            ProtocolMessage::Verack => self.handle_verack(peer),
            payload => {
                // Every other message requires a completed handshake;
                // early traffic is ignored with a warning.
                if !self.is_peer_ready(peer) {
                    warn!(%peer, command = %payload.command(), "message before handshake completion ignored");
                    return Ok(());
                }
                match payload {
                    ProtocolMessage::GetAddr => self.handle_get_addr(peer),
                    ProtocolMessage::Addr { addresses } => self.handle_addr(peer, addresses),
                    ProtocolMessage::Ping { payload } => self.handle_ping(peer, payload),
                    ProtocolMessage::Pong { payload } => self.handle_pong(peer, payload),
                    ProtocolMessage::GetHeaders { hash_start, count } => {
                        self.handle_get_headers(peer, hash_start, count)
                    }
                    ProtocolMessage::Headers { headers } => self.handle_headers(peer, headers),
                    ProtocolMessage::GetBlocks { hash_start, count } => {
                        self.handle_get_blocks(peer, hash_start, count)
                    }
                    ProtocolMessage::Mempool => self.handle_mempool(peer),
                    ProtocolMessage::Inv { inventory } => self.handle_inv(peer, inventory),
                    ProtocolMessage::GetData { inventory } => self.handle_get_data(peer, inventory),
                    ProtocolMessage::GetBlockByIndex { index_start, count } => {
                        self.handle_get_block_by_index(peer, index_start, count)
                    }
                    ProtocolMessage::NotFound { inventory } => {
                        self.handle_not_found(peer, inventory)
                    }
                    ProtocolMessage::Transaction { transaction } => {
                        self.handle_transaction(peer, transaction)
                    }
                    ProtocolMessage::Block { block } => self.handle_block(peer, block),
                    ProtocolMessage::Reject { message, reason } => {
                        debug!(%peer, message, reason, "peer rejected an item");
                        Ok(())
                    }
                    ProtocolMessage::Version { .. } | ProtocolMessage::Verack => unreachable!(),
                }
            }
        }
    }

    // --- handshake -------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn handle_version(
        &self,
        peer: PeerId,
        magic: u32,
        version: u32,
        port: u16,
        nonce: u32,
        services: u64,
        start_height: u32,
    ) -> NetworkResult<()> {
        let need_version = {
            let mut peers = self.peers.lock();
            let state = peers
                .get_mut(&peer)
                .ok_or(NetworkError::UnknownPeer { peer })?;
            if state.version_received {
                return Err(NetworkError::violation(peer, "duplicate Version"));
            }
            if magic != self.settings.network {
                return Err(NetworkError::handshake(peer, "different network magic"));
            }
            if version < self.config.min_protocol_version {
                return Err(NetworkError::handshake(
                    peer,
                    format!("protocol version {version} below minimum"),
                ));
            }
            if nonce == self.nonce {
                return Err(NetworkError::handshake(peer, "connected to ourselves"));
            }
            state.version_received = true;
            state.start_height = start_height;
            state.listen_port = port;
            state.services = services;
            !state.version_sent
        };

        self.send(peer, ProtocolMessage::Verack);
        if need_version {
            self.send_version(peer);
        }
        Ok(())
    }

    fn handle_verack(&self, peer: PeerId) -> NetworkResult<()> {
        let start_height = {
            let mut peers = self.peers.lock();
            let state = peers
                .get_mut(&peer)
                .ok_or(NetworkError::UnknownPeer { peer })?;
            if !state.version_received {
                return Err(NetworkError::violation(peer, "Verack before Version"));
            }
            if state.verack_received {
                return Err(NetworkError::violation(peer, "duplicate Verack"));
            }
            state.verack_received = true;
            state.start_height
        };
        info!(%peer, "handshake complete");

        self.send(peer, ProtocolMessage::GetAddr);
        let our_height = self.services.snapshot.height();
        if start_height > our_height {
            self.send(
                peer,
                ProtocolMessage::GetHeaders {
                    hash_start: self.services.snapshot.best_block_hash(),
                    count: -1,
                },
            );
        }
        Ok(())
    }

    fn is_peer_ready(&self, peer: PeerId) -> bool {
        self.peers
            .lock()
            .get(&peer)
            .map(|state| state.is_ready())
            .unwrap_or(false)
    }

    /// The handshake state of a peer, for diagnostics.
    pub fn peer_handshake_state(&self, peer: PeerId) -> Option<HandshakeState> {
        self.peers.lock().get(&peer).map(|s| s.handshake_state())
    }

    // --- address gossip --------------------------------------------------

    fn handle_get_addr(&self, peer: PeerId) -> NetworkResult<()> {
        let now = unix_now_secs();
        let addresses: Vec<NetworkAddress> = {
            let peers = self.peers.lock();
            peers
                .iter()
                .filter(|(id, state)| **id != peer && state.is_ready() && state.listen_port > 0)
                .take(self.config.max_addresses_per_message)
                .map(|(id, state)| NetworkAddress {
                    timestamp: now,
                    services: state.services,
                    endpoint: SocketAddr::new(id.ip(), state.listen_port),
                })
                .collect()
        };
        debug!(%peer, count = addresses.len(), "answering GetAddr");
        self.send(peer, ProtocolMessage::Addr { addresses });
        Ok(())
    }

    fn handle_addr(&self, peer: PeerId, addresses: Vec<NetworkAddress>) -> NetworkResult<()> {
        let now = unix_now_secs();
        let mut accepted = 0usize;
        for address in &addresses {
            if address.endpoint.port() == 0 {
                continue;
            }
            // Stale entries (older than 24 h) and obvious self-addresses
            // are dropped.
            if address.timestamp + 24 * 3600 < now || address.timestamp > now + 3600 {
                continue;
            }
            if address.endpoint.ip().is_loopback() || address.endpoint.ip().is_unspecified() {
                continue;
            }
            let record = PeerAddressRecord::new(address.timestamp, address.services);
            match record.to_array() {
                Ok(bytes) => {
                    self.services
                        .store
                        .put(PeerAddressRecord::key(&address.endpoint), bytes);
                    accepted += 1;
                }
                Err(error) => warn!(%error, "failed to encode peer record"),
            }
        }
        debug!(%peer, received = addresses.len(), accepted, "processed Addr");
        Ok(())
    }

    // --- keepalive -------------------------------------------------------

    fn handle_ping(&self, peer: PeerId, payload: [u8; 8]) -> NetworkResult<()> {
        self.send(peer, ProtocolMessage::Pong { payload });
        Ok(())
    }

    fn handle_pong(&self, peer: PeerId, payload: [u8; 8]) -> NetworkResult<()> {
        let mut peers = self.peers.lock();
        if let Some(state) = peers.get_mut(&peer) {
            if state.last_ping_payload == Some(payload) {
                state.last_ping_payload = None;
                state.missed_pongs = 0;
                state.last_pong = Instant::now();
            } else {
                debug!(%peer, "pong payload does not match outstanding ping");
            }
        }
        Ok(())
    }

    /// Sends keepalive pings; peers with two unanswered pings in a row are
    /// disconnected. Call once per configured ping interval.
    pub fn send_pings(&self) {
        let mut to_disconnect = Vec::new();
        let mut to_ping = Vec::new();
        {
            let mut peers = self.peers.lock();
            for (id, state) in peers.iter_mut() {
                if !state.is_ready() {
                    continue;
                }
                if state.last_ping_payload.is_some() {
                    state.missed_pongs += 1;
                    if state.missed_pongs >= 2 {
                        to_disconnect.push(*id);
                        continue;
                    }
                }
                let payload: [u8; 8] = rand::thread_rng().gen();
                state.last_ping_payload = Some(payload);
                to_ping.push((*id, payload));
            }
        }
        for peer in to_disconnect {
            warn!(%peer, "no pong for two pings, disconnecting");
            self.disconnect(peer, "ping_timeout");
        }
        for (peer, payload) in to_ping {
            self.send(peer, ProtocolMessage::Ping { payload });
        }
    }

    // --- inventory -------------------------------------------------------

    fn handle_inv(&self, peer: PeerId, inventory: Vec<InventoryItem>) -> NetworkResult<()> {
        let now = Instant::now();
        let mut to_request = Vec::new();
        {
            let mut peers = self.peers.lock();
            let state = peers
                .get_mut(&peer)
                .ok_or(NetworkError::UnknownPeer { peer })?;
            let mut pending = self.pending.lock();
            for item in inventory {
                state.known_hashes.insert(item.hash);
                let needed = match item.inv_type {
                    InventoryType::Block => {
                        !self.services.snapshot.contains_block(&item.hash)
                            && Self::no_live_request(
                                &mut pending.blocks,
                                &item.hash,
                                now,
                                self.config.block_request_timeout(),
                            )
                    }
                    InventoryType::Transaction => {
                        !self.services.mempool.contains(&item.hash)
                            && !self.services.snapshot.contains_transaction(&item.hash)
                            && Self::no_live_request(
                                &mut pending.transactions,
                                &item.hash,
                                now,
                                self.config.tx_request_timeout(),
                            )
                    }
                };
                if needed {
                    let map = match item.inv_type {
                        InventoryType::Block => &mut pending.blocks,
                        InventoryType::Transaction => &mut pending.transactions,
                    };
                    map.insert(
                        item.hash,
                        PendingRequest {
                            requested_from: peer,
                            issued_at: now,
                            failed_peers: HashSet::new(),
                            retry_count: 0,
                        },
                    );
                    match item.inv_type {
                        InventoryType::Block => state.requested_blocks.push_back(item.hash),
                        InventoryType::Transaction => {
                            state.requested_transactions.push_back(item.hash)
                        }
                    }
                    to_request.push(item);
                }
            }
        }
        if !to_request.is_empty() {
            debug!(%peer, count = to_request.len(), "requesting announced items");
            self.send(peer, ProtocolMessage::GetData { inventory: to_request });
        }
        Ok(())
    }

    /// Whether no unexpired request for the hash is outstanding; expired
    /// entries are dropped so the item can be re-requested.
    fn no_live_request(
        map: &mut HashMap<UInt256, PendingRequest>,
        hash: &UInt256,
        now: Instant,
        window: Duration,
    ) -> bool {
        match map.get(hash) {
            Some(request) if now.duration_since(request.issued_at) < window => false,
            Some(_) => {
                map.remove(hash);
                true
            }
            None => true,
        }
    }

    fn handle_get_data(&self, peer: PeerId, inventory: Vec<InventoryItem>) -> NetworkResult<()> {
        let mut not_found = Vec::new();
        for item in inventory {
            let served = match item.inv_type {
                InventoryType::Block => match self.services.snapshot.block(&item.hash) {
                    Some(block) => {
                        self.send(peer, ProtocolMessage::Block { block });
                        true
                    }
                    None => false,
                },
                InventoryType::Transaction => {
                    // The mempool answers first, then the ledger.
                    let transaction = self
                        .services
                        .mempool
                        .get(&item.hash)
                        .or_else(|| self.services.snapshot.transaction(&item.hash));
                    match transaction {
                        Some(transaction) => {
                            self.send(peer, ProtocolMessage::Transaction { transaction });
                            true
                        }
                        None => false,
                    }
                }
            };
            if served {
                if let Some(state) = self.peers.lock().get_mut(&peer) {
                    state.known_hashes.insert(item.hash);
                }
            } else {
                not_found.push(item);
            }
        }
        if !not_found.is_empty() {
            self.send(peer, ProtocolMessage::NotFound { inventory: not_found });
        }
        Ok(())
    }

    fn handle_not_found(&self, peer: PeerId, inventory: Vec<InventoryItem>) -> NetworkResult<()> {
        // Candidate alternates are read before the pending lock to keep
        // lock order (peers, then pending) consistent with handle_inv.
        let ready_peers: Vec<PeerId> = {
            let peers = self.peers.lock();
            peers
                .iter()
                .filter(|(id, state)| **id != peer && state.is_ready())
                .map(|(id, _)| *id)
                .collect()
        };

        let mut reissues = Vec::new();
        {
            let mut pending = self.pending.lock();
            for item in inventory {
                let (map, max_retries) = match item.inv_type {
                    InventoryType::Block => (&mut pending.blocks, self.config.max_block_retries),
                    InventoryType::Transaction => {
                        (&mut pending.transactions, self.config.max_tx_retries)
                    }
                };
                let Some(request) = map.get_mut(&item.hash) else {
                    continue;
                };
                request.failed_peers.insert(peer);
                request.retry_count += 1;

                let alternates: Vec<PeerId> = ready_peers
                    .iter()
                    .filter(|id| !request.failed_peers.contains(*id))
                    .copied()
                    .collect();
                if request.retry_count <= max_retries && !alternates.is_empty() {
                    let target = alternates[rand::thread_rng().gen_range(0..alternates.len())];
                    request.requested_from = target;
                    request.issued_at = Instant::now();
                    debug!(
                        hash = %item.hash,
                        %target,
                        retry = request.retry_count,
                        "retrying request against an alternate peer"
                    );
                    reissues.push((target, item));
                } else {
                    warn!(
                        hash = %item.hash,
                        failed = request.failed_peers.len(),
                        "request exhausted its retries, dropping"
                    );
                    map.remove(&item.hash);
                }
            }
        }
        for (target, item) in reissues {
            self.send(
                target,
                ProtocolMessage::GetData {
                    inventory: vec![item],
                },
            );
        }
        Ok(())
    }

    // --- header and block synchronisation --------------------------------

    fn handle_get_headers(
        &self,
        peer: PeerId,
        hash_start: UInt256,
        count: i16,
    ) -> NetworkResult<()> {
        let cap = self.config.max_headers_per_message.min(2000) as usize;
        let limit = if count < 0 { cap } else { cap.min(count as usize) };
        let headers = self.services.ledger.headers_from(&hash_start, limit);
        debug!(%peer, count = headers.len(), "answering GetHeaders");
        self.send(peer, ProtocolMessage::Headers { headers });
        Ok(())
    }

    fn handle_headers(
        &self,
        peer: PeerId,
        headers: Vec<neoxide_core::BlockHeader>,
    ) -> NetworkResult<()> {
        if headers.len() > 2000 {
            return Err(NetworkError::violation(peer, "oversized Headers message"));
        }
        let mut to_request = Vec::new();
        let mut previous: Option<neoxide_core::BlockHeader> = None;
        for header in headers {
            let hash = header.hash();
            if self.services.snapshot.contains_block(&hash) {
                previous = Some(header);
                continue;
            }
            let linked = match &previous {
                Some(prev) => header.links_to(prev),
                None => match self.services.snapshot.header(&header.prev_hash) {
                    Some(prev) => header.links_to(&prev),
                    // An unknown parent is not an offence; the gap fills
                    // through later sync rounds.
                    None => false,
                },
            };
            if !linked {
                debug!(%peer, header = %hash, "discarding unlinked header");
                previous = Some(header);
                continue;
            }
            if !to_request.contains(&hash) {
                to_request.push(hash);
            }
            previous = Some(header);
        }

        if !to_request.is_empty() {
            let now = Instant::now();
            let inventory: Vec<InventoryItem> = {
                let mut peers = self.peers.lock();
                let state = peers
                    .get_mut(&peer)
                    .ok_or(NetworkError::UnknownPeer { peer })?;
                let mut pending = self.pending.lock();
                let mut inventory = Vec::new();
                for hash in to_request {
                    if !Self::no_live_request(
                        &mut pending.blocks,
                        &hash,
                        now,
                        self.config.block_request_timeout(),
                    ) {
                        continue;
                    }
                    pending.blocks.insert(
                        hash,
                        PendingRequest {
                            requested_from: peer,
                            issued_at: now,
                            failed_peers: HashSet::new(),
                            retry_count: 0,
                        },
                    );
                    state.requested_blocks.push_back(hash);
                    inventory.push(InventoryItem::block(hash));
                }
                inventory
            };
            if !inventory.is_empty() {
                debug!(%peer, count = inventory.len(), "requesting block bodies");
                self.send(peer, ProtocolMessage::GetData { inventory });
            }
        }
        Ok(())
    }

    fn handle_get_blocks(&self, peer: PeerId, hash_start: UInt256, count: i16) -> NetworkResult<()> {
        let cap = self.config.max_blocks_per_inv as usize;
        let limit = if count < 0 { cap } else { cap.min(count as usize) };
        let hashes = self.services.ledger.block_hashes_from(&hash_start, limit);
        let inventory = hashes.into_iter().map(InventoryItem::block).collect();
        self.send(peer, ProtocolMessage::Inv { inventory });
        Ok(())
    }

    fn handle_get_block_by_index(
        &self,
        peer: PeerId,
        index_start: u32,
        count: u16,
    ) -> NetworkResult<()> {
        let limit = (count as u32).min(self.config.max_blocks_per_message);
        for offset in 0..limit {
            match self.services.snapshot.block_by_index(index_start + offset) {
                Some(block) => self.send(peer, ProtocolMessage::Block { block }),
                None => break,
            }
        }
        Ok(())
    }

    fn handle_block(&self, peer: PeerId, block: neoxide_core::Block) -> NetworkResult<()> {
        let hash = block.hash();
        let index = block.index();

        // Clear request bookkeeping regardless of the outcome.
        {
            let mut pending = self.pending.lock();
            pending.blocks.remove(&hash);
        }
        {
            let mut peers = self.peers.lock();
            if let Some(state) = peers.get_mut(&peer) {
                state.known_hashes.insert(hash);
                if state.requested_blocks.front() == Some(&hash) {
                    state.requested_blocks.pop_front();
                }
            }
        }

        if let Err(error) = block.validate_structure() {
            warn!(%peer, block = %hash, %error, "invalid relayed block");
            self.send(
                peer,
                ProtocolMessage::Reject {
                    message: "block".into(),
                    reason: error.to_string(),
                },
            );
            return Ok(());
        }
        let now_ms = unix_now_millis();
        if block.header.timestamp > now_ms + self.config.max_block_future_ms {
            warn!(%peer, block = %hash, "block timestamp too far in the future");
            self.send(
                peer,
                ProtocolMessage::Reject {
                    message: "block".into(),
                    reason: "timestamp in the future".into(),
                },
            );
            return Ok(());
        }

        let our_height = self.services.snapshot.height();
        match self.services.ledger.try_add_block(block) {
            Ok(true) => {
                info!(block = %hash, index, %peer, "block accepted");
                self.relay_inventory(InventoryType::Block, hash, Some(peer));
                // The announcing peer is at least this tall.
                {
                    let mut peers = self.peers.lock();
                    if let Some(state) = peers.get_mut(&peer) {
                        if index > state.start_height {
                            state.start_height = index;
                        }
                    }
                }
            }
            Ok(false) => {
                debug!(block = %hash, "duplicate block ignored");
            }
            Err(error) => {
                // A block beyond the chain tip signals a gap to backfill
                // from the same peer.
                if index > our_height + 1 {
                    let missing = (index - our_height - 1).min(self.config.max_blocks_per_message);
                    debug!(from = our_height + 1, count = missing, %peer, "requesting gap blocks");
                    self.send(
                        peer,
                        ProtocolMessage::GetBlockByIndex {
                            index_start: our_height + 1,
                            count: missing as u16,
                        },
                    );
                    return Ok(());
                }
                warn!(%peer, block = %hash, %error, "block rejected by ledger");
                self.send(
                    peer,
                    ProtocolMessage::Reject {
                        message: "block".into(),
                        reason: error.to_string(),
                    },
                );
            }
        }
        Ok(())
    }

    fn handle_transaction(
        &self,
        peer: PeerId,
        transaction: neoxide_core::Transaction,
    ) -> NetworkResult<()> {
        let hash = transaction.hash();

        {
            let mut pending = self.pending.lock();
            pending.transactions.remove(&hash);
        }
        {
            let mut peers = self.peers.lock();
            if let Some(state) = peers.get_mut(&peer) {
                state.known_hashes.insert(hash);
                if state.requested_transactions.front() == Some(&hash) {
                    state.requested_transactions.pop_front();
                }
            }
        }

        if self.services.mempool.contains(&hash)
            || self.services.snapshot.contains_transaction(&hash)
        {
            debug!(tx = %hash, "duplicate transaction ignored");
            return Ok(());
        }

        let context = VerificationContext::new(
            self.services.snapshot.clone(),
            self.settings.clone(),
            MAX_VERIFICATION_GAS,
        );
        let output = self
            .services
            .verifier
            .verify_transaction(&transaction, &context);
        if output.result != VerifyResult::Succeed {
            debug!(tx = %hash, reason = output.result.reason_tag(), "relayed transaction rejected");
            self.send(
                peer,
                ProtocolMessage::Reject {
                    message: "tx".into(),
                    reason: output.result.reason_tag().into(),
                },
            );
            return Ok(());
        }

        if self.services.mempool.try_add(transaction) {
            debug!(tx = %hash, "transaction pooled");
            self.relay_inventory(InventoryType::Transaction, hash, Some(peer));
        }
        Ok(())
    }

    fn handle_mempool(&self, peer: PeerId) -> NetworkResult<()> {
        let hashes: Vec<UInt256> = self
            .services
            .mempool
            .all()
            .into_iter()
            .map(|tx| tx.hash())
            .take(self.config.max_mempool_inv)
            .collect();
        for chunk in hashes.chunks(MAX_INV_ENTRIES) {
            let inventory = chunk
                .iter()
                .copied()
                .map(InventoryItem::transaction)
                .collect();
            self.send(peer, ProtocolMessage::Inv { inventory });
        }
        Ok(())
    }

    // --- relay -----------------------------------------------------------

    /// Announces a locally-accepted item to every Ready peer that does not
    /// already know the hash. The target set is computed and the known
    /// hashes recorded inside one critical section so relays cannot
    /// reflect an item back to its source.
    pub fn relay_inventory(
        &self,
        inv_type: InventoryType,
        hash: UInt256,
        exclude: Option<PeerId>,
    ) {
        let targets: Vec<PeerId> = {
            let mut peers = self.peers.lock();
            peers
                .iter_mut()
                .filter(|(id, state)| {
                    Some(**id) != exclude && state.is_ready() && !state.known_hashes.contains(&hash)
                })
                .map(|(id, state)| {
                    state.known_hashes.insert(hash);
                    *id
                })
                .collect()
        };
        let item = match inv_type {
            InventoryType::Block => InventoryItem::block(hash),
            InventoryType::Transaction => InventoryItem::transaction(hash),
        };
        for target in targets {
            self.send(
                target,
                ProtocolMessage::Inv {
                    inventory: vec![item],
                },
            );
        }
    }

    /// Announces a block produced or accepted locally.
    pub fn broadcast_block(&self, hash: UInt256) {
        self.relay_inventory(InventoryType::Block, hash, None);
    }

    /// Announces a transaction accepted locally.
    pub fn broadcast_transaction(&self, hash: UInt256) {
        self.relay_inventory(InventoryType::Transaction, hash, None);
    }

    // --- oracles ---------------------------------------------------------

    /// Number of peers in any state.
    pub fn connection_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Number of Ready peers.
    pub fn ready_peer_count(&self) -> usize {
        self.peers.lock().values().filter(|s| s.is_ready()).count()
    }

    /// Ready peers with their advertised heights, for query surfaces.
    pub fn ready_peers(&self) -> Vec<(PeerId, u32)> {
        self.peers
            .lock()
            .iter()
            .filter(|(_, state)| state.is_ready())
            .map(|(id, state)| (*id, state.start_height))
            .collect()
    }

    /// When the peer last answered a keepalive, for diagnostics.
    pub fn peer_last_pong(&self, peer: PeerId) -> Option<Instant> {
        self.peers.lock().get(&peer).map(|state| state.last_pong)
    }

    /// Whether a peer has seen a hash, for tests and diagnostics.
    pub fn peer_knows_hash(&self, peer: PeerId, hash: &UInt256) -> bool {
        self.peers
            .lock()
            .get(&peer)
            .map(|state| state.known_hashes.contains(hash))
            .unwrap_or(false)
    }

    /// The synchronisation oracle: true iff a Ready peer exists, our
    /// height is within two blocks of the tallest Ready peer, and at least
    /// half of the Ready peers sit inside that same window.
    pub fn is_synchronized(&self) -> bool {
        const TOLERANCE: u32 = 2;
        let our_height = self.services.snapshot.height();
        let peers = self.peers.lock();
        let mut ready = 0usize;
        let mut near = 0usize;
        let mut max_height = 0u32;
        for state in peers.values() {
            if !state.is_ready() {
                continue;
            }
            ready += 1;
            max_height = max_height.max(state.start_height);
            if state.start_height <= our_height + TOLERANCE
                && state.start_height + TOLERANCE >= our_height
            {
                near += 1;
            }
        }
        if ready == 0 {
            return false;
        }
        let height_ok = our_height + TOLERANCE >= max_height;
        let quorum_ok = near * 2 >= ready;
        height_ok && quorum_ok
    }

    /// Drops pending requests whose window expired without an answer.
    /// Housekeeping; the invariant that expired entries never block a
    /// re-request is enforced on the Inv path as well.
    pub fn expire_pending_requests(&self) {
        let now = Instant::now();
        let mut pending = self.pending.lock();
        let block_window = self.config.block_request_timeout();
        let tx_window = self.config.tx_request_timeout();
        pending
            .blocks
            .retain(|_, request| now.duration_since(request.issued_at) < block_window);
        pending
            .transactions
            .retain(|_, request| now.duration_since(request.issued_at) < tx_window);
    }

    /// Number of outstanding block requests, for diagnostics.
    pub fn pending_block_requests(&self) -> usize {
        self.pending.lock().blocks.len()
    }

    /// Number of outstanding transaction requests, for diagnostics.
    pub fn pending_transaction_requests(&self) -> usize {
        self.pending.lock().transactions.len()
    }
}
