//! Collaborator contracts the core consumes, with in-memory reference
//! implementations used by tests and by nodes that have not wired a real
//! storage engine yet.

use crate::block::{Block, BlockHeader};
use crate::contract_state::ContractState;
use crate::error::{CoreError, CoreResult};
use crate::transaction::Transaction;
use crate::uint160::UInt160;
use crate::uint256::UInt256;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Storage key prefix under which the policy contract keeps the network fee
/// per byte.
pub const POLICY_FEE_PER_BYTE_PREFIX: u8 = 10;
/// Storage key prefix under which the policy contract keeps the execution
/// fee factor.
pub const POLICY_EXEC_FEE_FACTOR_PREFIX: u8 = 18;
/// Execution fee factor used until the policy contract stores one.
pub const DEFAULT_EXEC_FEE_FACTOR: i64 = 30;

/// An immutable, point-in-time view of the ledger plus contract storage.
pub trait Snapshot: Send + Sync {
    /// Current chain height.
    fn height(&self) -> u32;

    /// Hash of the chain head.
    fn best_block_hash(&self) -> UInt256;

    /// Whether the ledger holds the given block.
    fn contains_block(&self, hash: &UInt256) -> bool;

    /// Whether the ledger holds the given transaction.
    fn contains_transaction(&self, hash: &UInt256) -> bool;

    /// Fetches a block by hash.
    fn block(&self, hash: &UInt256) -> Option<Block>;

    /// Fetches a block by height.
    fn block_by_index(&self, index: u32) -> Option<Block>;

    /// Fetches a block hash by height.
    fn block_hash(&self, index: u32) -> Option<UInt256>;

    /// Fetches a header by hash.
    fn header(&self, hash: &UInt256) -> Option<BlockHeader>;

    /// Fetches a header by height.
    fn header_by_index(&self, index: u32) -> Option<BlockHeader>;

    /// Fetches a transaction by hash.
    fn transaction(&self, hash: &UInt256) -> Option<Transaction>;

    /// The height a transaction was included at.
    fn transaction_height(&self, hash: &UInt256) -> Option<u32>;

    /// Fetches a deployed contract by script hash.
    fn contract(&self, hash: &UInt160) -> Option<ContractState>;

    /// Reads one storage entry of a contract.
    fn storage(&self, contract: &UInt160, key: &[u8]) -> Option<Vec<u8>>;

    /// Reads all storage entries of a contract under a key prefix, in key
    /// order. Implementations may materialise a bounded range.
    fn find_storage(&self, contract: &UInt160, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;

    /// The current committee public keys.
    fn committee(&self) -> Vec<Vec<u8>> {
        Vec::new()
    }

    /// The validators for the next block.
    fn next_block_validators(&self) -> Vec<Vec<u8>> {
        Vec::new()
    }

    /// Registered candidates with their vote counts.
    fn candidates(&self) -> Vec<(Vec<u8>, i64)> {
        Vec::new()
    }

    /// The native contract states.
    fn native_contracts(&self) -> Vec<ContractState> {
        Vec::new()
    }

    /// Unclaimed GAS of an account at the given height, in datoshi.
    fn unclaimed_gas(&self, _account: &UInt160, _height: u32) -> i64 {
        0
    }
}

/// The mutable side of the ledger, consumed by the protocol handler when it
/// accepts relayed blocks.
pub trait Ledger: Snapshot {
    /// Appends a block. Returns `Ok(false)` for duplicates, an error for
    /// blocks that fail validation.
    fn try_add_block(&self, block: Block) -> CoreResult<bool>;

    /// Headers following `start`, capped at `max`.
    fn headers_from(&self, start: &UInt256, max: usize) -> Vec<BlockHeader>;

    /// Block hashes following `start`, capped at `max`.
    fn block_hashes_from(&self, start: &UInt256, max: usize) -> Vec<UInt256>;
}

/// The memory pool collaborator.
pub trait Mempool: Send + Sync {
    /// Adds a verified transaction. Returns false for duplicates or when
    /// the pool refuses the transaction.
    fn try_add(&self, tx: Transaction) -> bool;

    /// Whether the pool holds the transaction.
    fn contains(&self, hash: &UInt256) -> bool;

    /// Fetches a pooled transaction.
    fn get(&self, hash: &UInt256) -> Option<Transaction>;

    /// All pooled transactions.
    fn all(&self) -> Vec<Transaction>;

    /// Number of pooled transactions.
    fn len(&self) -> usize;

    /// Whether the pool is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every pooled transaction.
    fn clear(&self);
}

/// Reader over the policy contract.
pub trait PolicyReader: Send + Sync {
    /// Network fee per transaction byte, in datoshi.
    fn fee_per_byte(&self, snapshot: &dyn Snapshot) -> i64;

    /// Multiplier applied to opcode base prices.
    fn exec_fee_factor(&self, snapshot: &dyn Snapshot) -> i64;
}

/// Policy reader backed by the policy contract's storage, falling back to
/// the protocol defaults while the contract has no stored value (early
/// chain history).
pub struct StoragePolicyReader {
    policy_contract: UInt160,
}

impl StoragePolicyReader {
    /// Creates a reader over the given policy contract hash.
    pub fn new(policy_contract: UInt160) -> Self {
        Self { policy_contract }
    }

    fn read_i64(&self, snapshot: &dyn Snapshot, prefix: u8) -> Option<i64> {
        let value = snapshot.storage(&self.policy_contract, &[prefix])?;
        let bytes: [u8; 8] = value.try_into().ok()?;
        Some(i64::from_le_bytes(bytes))
    }
}

impl PolicyReader for StoragePolicyReader {
    fn fee_per_byte(&self, snapshot: &dyn Snapshot) -> i64 {
        self.read_i64(snapshot, POLICY_FEE_PER_BYTE_PREFIX)
            .unwrap_or(neoxide_config::DEFAULT_FEE_PER_BYTE)
    }

    fn exec_fee_factor(&self, snapshot: &dyn Snapshot) -> i64 {
        self.read_i64(snapshot, POLICY_EXEC_FEE_FACTOR_PREFIX)
            .unwrap_or(DEFAULT_EXEC_FEE_FACTOR)
    }
}

/// Flat key-value store the protocol handler persists peer records through.
pub trait KeyValueStore: Send + Sync {
    /// Writes a record.
    fn put(&self, key: String, value: Vec<u8>);

    /// Reads a record.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// All keys under a prefix.
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;
}

#[derive(Default)]
struct ChainState {
    blocks: HashMap<UInt256, Block>,
    hash_by_index: BTreeMap<u32, UInt256>,
    tx_height: HashMap<UInt256, u32>,
    contracts: HashMap<UInt160, ContractState>,
    storage: BTreeMap<(UInt160, Vec<u8>), Vec<u8>>,
    committee: Vec<Vec<u8>>,
    next_validators: Vec<Vec<u8>>,
    candidates: Vec<(Vec<u8>, i64)>,
    native_contracts: Vec<ContractState>,
    gas_per_block: i64,
}

/// In-memory ledger implementing [`Snapshot`] and [`Ledger`].
#[derive(Default)]
pub struct MemorySnapshot {
    state: RwLock<ChainState>,
}

impl MemorySnapshot {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a chain seeded with a genesis block.
    pub fn with_genesis(genesis: Block) -> Self {
        let snapshot = Self::new();
        snapshot
            .try_add_block(genesis)
            .expect("genesis block is structurally valid");
        snapshot
    }

    /// Installs a contract with its storage entries.
    pub fn put_contract(&self, contract: ContractState, storage: Vec<(Vec<u8>, Vec<u8>)>) {
        let mut state = self.state.write();
        for (key, value) in storage {
            state.storage.insert((contract.hash, key), value);
        }
        state.contracts.insert(contract.hash, contract);
    }

    /// Writes one storage entry directly.
    pub fn put_storage(&self, contract: UInt160, key: Vec<u8>, value: Vec<u8>) {
        self.state.write().storage.insert((contract, key), value);
    }

    /// Configures committee and validator sets for query surfaces.
    pub fn set_committee(&self, committee: Vec<Vec<u8>>, next_validators: Vec<Vec<u8>>) {
        let mut state = self.state.write();
        state.committee = committee;
        state.next_validators = next_validators;
    }

    /// Configures the candidate list.
    pub fn set_candidates(&self, candidates: Vec<(Vec<u8>, i64)>) {
        self.state.write().candidates = candidates;
    }

    /// Registers native contract states.
    pub fn set_native_contracts(&self, contracts: Vec<ContractState>) {
        self.state.write().native_contracts = contracts;
    }

    /// Configures the per-block GAS accrual used by `unclaimed_gas`.
    pub fn set_gas_per_block(&self, gas: i64) {
        self.state.write().gas_per_block = gas;
    }
}

impl Snapshot for MemorySnapshot {
    fn height(&self) -> u32 {
        let state = self.state.read();
        state.hash_by_index.keys().next_back().copied().unwrap_or(0)
    }

    fn best_block_hash(&self) -> UInt256 {
        let state = self.state.read();
        state
            .hash_by_index
            .values()
            .next_back()
            .copied()
            .unwrap_or_else(UInt256::zero)
    }

    fn contains_block(&self, hash: &UInt256) -> bool {
        self.state.read().blocks.contains_key(hash)
    }

    fn contains_transaction(&self, hash: &UInt256) -> bool {
        self.state.read().tx_height.contains_key(hash)
    }

    fn block(&self, hash: &UInt256) -> Option<Block> {
        self.state.read().blocks.get(hash).cloned()
    }

    fn block_by_index(&self, index: u32) -> Option<Block> {
        let state = self.state.read();
        let hash = state.hash_by_index.get(&index)?;
        state.blocks.get(hash).cloned()
    }

    fn block_hash(&self, index: u32) -> Option<UInt256> {
        self.state.read().hash_by_index.get(&index).copied()
    }

    fn header(&self, hash: &UInt256) -> Option<BlockHeader> {
        self.state.read().blocks.get(hash).map(|b| b.header.clone())
    }

    fn header_by_index(&self, index: u32) -> Option<BlockHeader> {
        self.block_by_index(index).map(|b| b.header)
    }

    fn transaction(&self, hash: &UInt256) -> Option<Transaction> {
        let state = self.state.read();
        let height = *state.tx_height.get(hash)?;
        let block_hash = state.hash_by_index.get(&height)?;
        state
            .blocks
            .get(block_hash)?
            .transactions
            .iter()
            .find(|tx| tx.hash() == *hash)
            .cloned()
    }

    fn transaction_height(&self, hash: &UInt256) -> Option<u32> {
        self.state.read().tx_height.get(hash).copied()
    }

    fn contract(&self, hash: &UInt160) -> Option<ContractState> {
        self.state.read().contracts.get(hash).cloned()
    }

    fn storage(&self, contract: &UInt160, key: &[u8]) -> Option<Vec<u8>> {
        self.state
            .read()
            .storage
            .get(&(*contract, key.to_vec()))
            .cloned()
    }

    fn find_storage(&self, contract: &UInt160, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let state = self.state.read();
        state
            .storage
            .range((*contract, prefix.to_vec())..)
            .take_while(|((c, k), _)| c == contract && k.starts_with(prefix))
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect()
    }

    fn committee(&self) -> Vec<Vec<u8>> {
        self.state.read().committee.clone()
    }

    fn next_block_validators(&self) -> Vec<Vec<u8>> {
        self.state.read().next_validators.clone()
    }

    fn candidates(&self) -> Vec<(Vec<u8>, i64)> {
        self.state.read().candidates.clone()
    }

    fn native_contracts(&self) -> Vec<ContractState> {
        self.state.read().native_contracts.clone()
    }

    fn unclaimed_gas(&self, _account: &UInt160, height: u32) -> i64 {
        let state = self.state.read();
        state.gas_per_block.saturating_mul(height as i64)
    }
}

impl Ledger for MemorySnapshot {
    fn try_add_block(&self, block: Block) -> CoreResult<bool> {
        block.validate_structure()?;
        let mut state = self.state.write();
        let hash = block.hash();
        if state.blocks.contains_key(&hash) {
            return Ok(false);
        }
        if let Some(&tip) = state.hash_by_index.keys().next_back() {
            if block.index() != tip + 1 {
                return Err(CoreError::invalid_operation(format!(
                    "block index {} does not extend height {tip}",
                    block.index()
                )));
            }
            let tip_hash = state.hash_by_index[&tip];
            if block.header.prev_hash != tip_hash {
                return Err(CoreError::invalid_data("block does not link to chain head"));
            }
        }
        for tx in &block.transactions {
            state.tx_height.insert(tx.hash(), block.index());
        }
        state.hash_by_index.insert(block.index(), hash);
        state.blocks.insert(hash, block);
        debug!(height = ?state.hash_by_index.keys().next_back(), "block appended");
        Ok(true)
    }

    fn headers_from(&self, start: &UInt256, max: usize) -> Vec<BlockHeader> {
        let state = self.state.read();
        let Some(start_block) = state.blocks.get(start) else {
            return Vec::new();
        };
        let mut headers = Vec::new();
        let mut index = start_block.index() + 1;
        while headers.len() < max {
            let Some(hash) = state.hash_by_index.get(&index) else {
                break;
            };
            if let Some(block) = state.blocks.get(hash) {
                headers.push(block.header.clone());
            }
            index += 1;
        }
        headers
    }

    fn block_hashes_from(&self, start: &UInt256, max: usize) -> Vec<UInt256> {
        let state = self.state.read();
        let Some(start_block) = state.blocks.get(start) else {
            return Vec::new();
        };
        let mut hashes = Vec::new();
        let mut index = start_block.index() + 1;
        while hashes.len() < max {
            let Some(hash) = state.hash_by_index.get(&index) else {
                break;
            };
            hashes.push(*hash);
            index += 1;
        }
        hashes
    }
}

/// In-memory [`Mempool`].
#[derive(Default)]
pub struct MemoryMempool {
    pool: RwLock<HashMap<UInt256, Transaction>>,
}

impl MemoryMempool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Mempool for MemoryMempool {
    fn try_add(&self, tx: Transaction) -> bool {
        let mut pool = self.pool.write();
        let hash = tx.hash();
        if pool.contains_key(&hash) {
            return false;
        }
        pool.insert(hash, tx);
        true
    }

    fn contains(&self, hash: &UInt256) -> bool {
        self.pool.read().contains_key(hash)
    }

    fn get(&self, hash: &UInt256) -> Option<Transaction> {
        self.pool.read().get(hash).cloned()
    }

    fn all(&self) -> Vec<Transaction> {
        self.pool.read().values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.pool.read().len()
    }

    fn clear(&self) {
        self.pool.write().clear();
    }
}

/// In-memory [`KeyValueStore`].
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKeyValueStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn put(&self, key: String, value: Vec<u8>) {
        self.entries.write().insert(key, value);
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().get(key).cloned()
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::Signer;
    use crate::witness::Witness;

    fn block_at(index: u32, prev_hash: UInt256) -> Block {
        Block {
            header: BlockHeader {
                version: 0,
                prev_hash,
                merkle_root: UInt256::zero(),
                timestamp: 1_600_000_000_000 + index as u64 * 15_000,
                nonce: 0,
                index,
                primary_index: 0,
                next_consensus: UInt160::zero(),
                witness: Witness::default(),
            },
            transactions: Vec::new(),
        }
    }

    fn tx_with_nonce(nonce: u32) -> Transaction {
        Transaction {
            nonce,
            script: vec![0x11],
            signers: vec![Signer::called_by_entry(UInt160::zero())],
            witnesses: vec![Witness::default()],
            ..Default::default()
        }
    }

    #[test]
    fn test_chain_growth_and_lookup() {
        let chain = MemorySnapshot::new();
        let genesis = block_at(0, UInt256::zero());
        let genesis_hash = genesis.hash();
        assert!(chain.try_add_block(genesis).unwrap());
        let next = block_at(1, genesis_hash);
        assert!(chain.try_add_block(next.clone()).unwrap());

        assert_eq!(chain.height(), 1);
        assert_eq!(chain.best_block_hash(), next.hash());
        assert!(chain.contains_block(&genesis_hash));
        assert_eq!(chain.block_by_index(1).unwrap().hash(), next.hash());
        // Duplicate insert is a no-op.
        assert!(!chain.try_add_block(next).unwrap());
    }

    #[test]
    fn test_non_linking_block_rejected() {
        let chain = MemorySnapshot::new();
        chain.try_add_block(block_at(0, UInt256::zero())).unwrap();
        let orphan = block_at(5, UInt256::from_bytes([9u8; 32]));
        assert!(chain.try_add_block(orphan).is_err());
    }

    #[test]
    fn test_headers_from_walks_forward() {
        let chain = MemorySnapshot::new();
        let genesis = block_at(0, UInt256::zero());
        let genesis_hash = genesis.hash();
        chain.try_add_block(genesis).unwrap();
        let mut prev = genesis_hash;
        for i in 1..=5 {
            let block = block_at(i, prev);
            prev = block.hash();
            chain.try_add_block(block).unwrap();
        }
        let headers = chain.headers_from(&genesis_hash, 3);
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0].index, 1);
        assert_eq!(headers[2].index, 3);
    }

    #[test]
    fn test_find_storage_is_prefix_scoped() {
        let chain = MemorySnapshot::new();
        let contract = UInt160::from_bytes([1u8; 20]);
        let other = UInt160::from_bytes([2u8; 20]);
        chain.put_storage(contract, vec![1, 1], vec![10]);
        chain.put_storage(contract, vec![1, 2], vec![20]);
        chain.put_storage(contract, vec![2, 1], vec![30]);
        chain.put_storage(other, vec![1, 9], vec![40]);

        let found = chain.find_storage(&contract, &[1]);
        assert_eq!(found, vec![(vec![1, 1], vec![10]), (vec![1, 2], vec![20])]);
    }

    #[test]
    fn test_mempool_semantics() {
        let pool = MemoryMempool::new();
        let tx = tx_with_nonce(1);
        let hash = tx.hash();
        assert!(pool.try_add(tx.clone()));
        assert!(!pool.try_add(tx));
        assert!(pool.contains(&hash));
        assert_eq!(pool.len(), 1);
        pool.clear();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_policy_reader_fallback_and_stored_value() {
        let chain = MemorySnapshot::new();
        let policy_hash = UInt160::from_bytes([0xCC; 20]);
        let reader = StoragePolicyReader::new(policy_hash);
        assert_eq!(
            reader.fee_per_byte(&chain),
            neoxide_config::DEFAULT_FEE_PER_BYTE
        );
        chain.put_storage(
            policy_hash,
            vec![POLICY_FEE_PER_BYTE_PREFIX],
            5000i64.to_le_bytes().to_vec(),
        );
        assert_eq!(reader.fee_per_byte(&chain), 5000);
    }
}
