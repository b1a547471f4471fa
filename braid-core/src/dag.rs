// src/dag.rs

//! In-memory development consensus.
//!
//! [`DagProcessor`] keeps the block DAG in memory and maintains a selected
//! chain over it. It is deliberately simple: every merged block is blue, the
//! selected parent is the parent with the highest `(blue_score, hash)` and a
//! chain block accepts its own transactions followed by those of the rest of
//! its merge set, skipping anything accepted earlier on the chain.
//!
//! Chain changes are reported to an optional [`BlockEventSink`] as ordered
//! disconnect/connect events. A block is only committed once the sink has
//! accepted every event it produced; otherwise the insertion is rolled back
//! in place.
//!
//! The processed blocks can be written to a block log and replayed on the
//! next start. [`DagProcessor::checkpoint`] identifies the resulting state
//! so that derived data saved alongside it can be matched up again.

use crate::block::{Block, BlockHeader};
use crate::coinbase::{CoinbaseData, CoinbaseManager, COINBASE_TRANSACTION_VERSION};
use crate::consensus::{
    AcceptanceChange, BlockEventSink, BlockInfo, BlockInsertion, ChainBlock, ChainChanges,
    ConsensusApi, ConsensusEvent, MergeSetSnapshot, MergeSetSource, MergedBlock,
};
use crate::errors::{ConsensusError, ConsensusResult, CoreError};
use crate::params::ConsensusParams;
use crate::storage::MemoryStorage;
use crate::transaction::{ScriptPublicKey, Transaction};
use crate::types::{
    Hash, SubnetworkId, Timestamp, TransactionId, SUBNETWORK_ID_COINBASE, VIRTUAL_BLOCK_HASH,
};
use braid_crypto::hash::hash_chunks;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

/// Header version of blocks built by this node
pub const BLOCK_VERSION: u16 = 1;

/// Extra data carried by the genesis coinbase
const GENESIS_EXTRA_DATA: &[u8] = b"braid genesis";

/// On-disk format version of the block log
const BLOCK_LOG_VERSION: u32 = 1;

/// Every block past genesis, in insertion order
#[derive(Serialize, Deserialize)]
struct BlockLog {
    version: u32,
    network_name: String,
    blocks: Vec<Block>,
}

fn storage_error(e: std::io::Error) -> CoreError {
    CoreError::StorageError(e.to_string())
}

/// A processed block together with its consensus data
#[derive(Debug, Clone)]
struct BlockNode {
    block: Arc<Block>,

    /// `None` only for genesis
    selected_parent: Option<Hash>,

    /// Merged blocks other than the selected parent, ascending by (blue score, hash)
    merge_set: Vec<Hash>,

    blue_score: u64,

    /// Miner payout script recovered from the coinbase
    payout: ScriptPublicKey,
}

/// Result of running the blue-score rule over a parent set
struct GhostdagData {
    selected_parent: Hash,
    merge_set: Vec<Hash>,
    blue_score: u64,
}

/// What a chain update changed, recorded as it goes so that a failed
/// insertion can be rolled back
#[derive(Debug, Default)]
struct ChainUndo {
    /// Chain position the update branched from, once known
    split: Option<usize>,

    /// Blocks taken off the chain with their acceptance, tip first
    retracted: Vec<(Hash, Vec<TransactionId>)>,

    /// Accepting block of every transaction before the update touched it
    previous_acceptance: HashMap<TransactionId, Option<Hash>>,
}

#[derive(Debug, Default)]
struct DagState {
    nodes: HashMap<Hash, BlockNode>,

    /// Children map: block hash -> set of children hashes
    children: HashMap<Hash, HashSet<Hash>>,

    /// Blocks without children
    tips: HashSet<Hash>,

    insertion_order: Vec<Hash>,
    insertion_index: HashMap<Hash, usize>,

    /// Genesis first, selected tip last
    selected_chain: Vec<Hash>,
    chain_index: HashMap<Hash, usize>,

    /// Transactions accepted by each chain block
    chain_acceptance: HashMap<Hash, Vec<TransactionId>>,

    /// Current accepting chain block of every accepted transaction
    accepted_by: HashMap<TransactionId, Hash>,
}

impl DagState {
    fn node(&self, hash: &Hash) -> ConsensusResult<&BlockNode> {
        self.nodes
            .get(hash)
            .ok_or(ConsensusError::BlockNotFound(*hash))
    }

    /// Adds a block and returns the parents that stopped being tips
    fn add_node(&mut self, hash: Hash, node: BlockNode) -> Vec<Hash> {
        let mut former_tips = Vec::new();
        for parent in &node.block.header.parents {
            self.children.entry(*parent).or_default().insert(hash);
            if self.tips.remove(parent) {
                former_tips.push(*parent);
            }
        }
        self.tips.insert(hash);
        self.insertion_index.insert(hash, self.insertion_order.len());
        self.insertion_order.push(hash);
        self.nodes.insert(hash, node);
        former_tips
    }

    /// Inverse of [`DagState::add_node`] for the most recently added block
    fn remove_node(&mut self, hash: &Hash, former_tips: &[Hash]) {
        let Some(node) = self.nodes.remove(hash) else {
            return;
        };

        for parent in &node.block.header.parents {
            if let Some(children) = self.children.get_mut(parent) {
                children.remove(hash);
                if children.is_empty() {
                    self.children.remove(parent);
                }
            }
        }
        self.tips.remove(hash);
        self.tips.extend(former_tips.iter().copied());
        if let Some(index) = self.insertion_index.remove(hash) {
            self.insertion_order.truncate(index);
        }
    }

    /// Undoes a chain update and then the insertion of `hash`
    fn revert_insertion(&mut self, hash: &Hash, former_tips: &[Hash], undo: ChainUndo) {
        if let Some(split) = undo.split {
            for added in self.selected_chain.split_off(split + 1) {
                self.chain_index.remove(&added);
                self.chain_acceptance.remove(&added);
            }
            for (retracted, accepted) in undo.retracted.into_iter().rev() {
                self.chain_index.insert(retracted, self.selected_chain.len());
                self.selected_chain.push(retracted);
                self.chain_acceptance.insert(retracted, accepted);
            }
        }

        for (id, previous) in undo.previous_acceptance {
            match previous {
                Some(block) => {
                    self.accepted_by.insert(id, block);
                }
                None => {
                    self.accepted_by.remove(&id);
                }
            }
        }

        self.remove_node(hash, former_tips);
    }

    fn sorted_tips(&self) -> Vec<Hash> {
        let mut tips: Vec<Hash> = self.tips.iter().copied().collect();
        tips.sort();
        tips
    }

    /// Highest (blue score, hash) among the known candidates
    fn select_parent<'a>(&self, candidates: impl IntoIterator<Item = &'a Hash>) -> Option<Hash> {
        candidates
            .into_iter()
            .filter_map(|hash| self.nodes.get(hash).map(|node| (node.blue_score, *hash)))
            .max()
            .map(|(_, hash)| hash)
    }

    /// All ancestors of `hash`, excluding itself
    fn past(&self, hash: &Hash) -> ConsensusResult<HashSet<Hash>> {
        let mut past = HashSet::new();
        let mut queue: VecDeque<Hash> = self.node(hash)?.block.header.parents.iter().copied().collect();

        while let Some(current) = queue.pop_front() {
            if past.insert(current) {
                queue.extend(self.node(&current)?.block.header.parents.iter().copied());
            }
        }

        Ok(past)
    }

    fn ghostdag(&self, parents: &[Hash]) -> ConsensusResult<GhostdagData> {
        let selected_parent = self
            .select_parent(parents)
            .ok_or_else(|| ConsensusError::RuleError("block has no known parents".to_string()))?;

        let mut selected_past = self.past(&selected_parent)?;
        selected_past.insert(selected_parent);

        let mut merged = HashSet::new();
        let mut queue: VecDeque<Hash> = parents
            .iter()
            .filter(|parent| **parent != selected_parent)
            .copied()
            .collect();
        while let Some(current) = queue.pop_front() {
            if selected_past.contains(&current) || !merged.insert(current) {
                continue;
            }
            queue.extend(self.node(&current)?.block.header.parents.iter().copied());
        }

        let mut scored = merged
            .into_iter()
            .map(|hash| Ok((self.node(&hash)?.blue_score, hash)))
            .collect::<ConsensusResult<Vec<_>>>()?;
        scored.sort();
        let merge_set: Vec<Hash> = scored.into_iter().map(|(_, hash)| hash).collect();

        let blue_score = self.node(&selected_parent)?.blue_score + 1 + merge_set.len() as u64;

        Ok(GhostdagData {
            selected_parent,
            merge_set,
            blue_score,
        })
    }

    fn merged_block(&self, hash: &Hash) -> ConsensusResult<MergedBlock> {
        let node = self.node(hash)?;
        Ok(MergedBlock {
            hash: *hash,
            blue_score: node.blue_score,
            // Fees need a UTXO set, which this processor does not keep
            total_fees: 0,
            script_public_key: node.payout.clone(),
        })
    }

    fn snapshot_for(&self, ghostdag: &GhostdagData) -> ConsensusResult<MergeSetSnapshot> {
        let blues = std::iter::once(&ghostdag.selected_parent)
            .chain(ghostdag.merge_set.iter())
            .map(|hash| self.merged_block(hash))
            .collect::<ConsensusResult<Vec<_>>>()?;

        Ok(MergeSetSnapshot {
            blue_score: ghostdag.blue_score,
            blues,
            reds: Vec::new(),
        })
    }

    fn snapshot_of_block(&self, hash: &Hash) -> ConsensusResult<Option<MergeSetSnapshot>> {
        let node = match self.nodes.get(hash) {
            Some(node) => node,
            None => return Ok(None),
        };

        match node.selected_parent {
            None => Ok(Some(MergeSetSnapshot {
                blue_score: node.blue_score,
                blues: Vec::new(),
                reds: Vec::new(),
            })),
            Some(selected_parent) => {
                let ghostdag = GhostdagData {
                    selected_parent,
                    merge_set: node.merge_set.clone(),
                    blue_score: node.blue_score,
                };
                self.snapshot_for(&ghostdag).map(Some)
            }
        }
    }

    /// Transactions `chain_block` accepts given the current chain prefix
    fn acceptance_of(&self, chain_block: &Hash) -> ConsensusResult<Vec<TransactionId>> {
        let node = self.node(chain_block)?;
        let mut seen = HashSet::new();
        let mut accepted = Vec::new();

        for source in std::iter::once(chain_block).chain(node.merge_set.iter()) {
            for tx in &self.node(source)?.block.transactions {
                let id = tx.id();
                if !self.accepted_by.contains_key(&id) && seen.insert(id) {
                    accepted.push(id);
                }
            }
        }

        Ok(accepted)
    }

    /// Moves the selected chain to the best tip and returns the resulting
    /// events, in the order they must be applied
    ///
    /// Every mutation is recorded in `undo` before it happens, including
    /// when this returns an error half way.
    fn update_selected_chain(
        &mut self,
        new_block: &Arc<Block>,
        undo: &mut ChainUndo,
    ) -> ConsensusResult<(ChainChanges, Vec<ConsensusEvent>)> {
        let new_tip = self
            .select_parent(self.tips.iter())
            .ok_or_else(|| ConsensusError::Internal("DAG has no tips".to_string()))?;

        let mut added = Vec::new();
        let mut cursor = new_tip;
        while !self.chain_index.contains_key(&cursor) {
            added.push(cursor);
            cursor = self.node(&cursor)?.selected_parent.ok_or_else(|| {
                ConsensusError::Internal("selected chain does not reach genesis".to_string())
            })?;
        }
        added.reverse();

        let split = self.chain_index[&cursor];
        undo.split = Some(split);
        let removed = self.selected_chain.split_off(split + 1);

        let mut retracted = Vec::with_capacity(removed.len());
        for hash in removed.iter().rev() {
            self.chain_index.remove(hash);
            let accepted = self.chain_acceptance.remove(hash).unwrap_or_default();
            for id in &accepted {
                if self.accepted_by.get(id) == Some(hash) {
                    undo.previous_acceptance.entry(*id).or_insert(Some(*hash));
                    self.accepted_by.remove(id);
                }
            }
            retracted.push((*hash, accepted));
        }
        undo.retracted = retracted.clone();

        let mut added_chain_blocks = Vec::with_capacity(added.len());
        for hash in added {
            let accepted = self.acceptance_of(&hash)?;
            for id in &accepted {
                let previous = self.accepted_by.insert(*id, hash);
                undo.previous_acceptance.entry(*id).or_insert(previous);
            }
            self.chain_index.insert(hash, self.selected_chain.len());
            self.selected_chain.push(hash);
            self.chain_acceptance.insert(hash, accepted.clone());
            added_chain_blocks.push(ChainBlock {
                hash,
                accepted_transaction_ids: accepted,
            });
        }

        let mut events = Vec::with_capacity(1 + retracted.len() + added_chain_blocks.len());
        if !self.chain_index.contains_key(&new_block.hash()) {
            events.push(ConsensusEvent::BlockConnected {
                block: new_block.clone(),
                accepted_transactions: Vec::new(),
            });
        }
        for (hash, accepted) in &retracted {
            let reassigned = accepted
                .iter()
                .map(|id| AcceptanceChange {
                    transaction_id: *id,
                    accepting_block: self.accepted_by.get(id).copied(),
                })
                .collect();
            events.push(ConsensusEvent::BlockDisconnected {
                block: self.node(hash)?.block.clone(),
                reassigned,
            });
        }
        for chain_block in &added_chain_blocks {
            events.push(ConsensusEvent::BlockConnected {
                block: self.node(&chain_block.hash)?.block.clone(),
                accepted_transactions: chain_block.accepted_transaction_ids.clone(),
            });
        }

        let changes = ChainChanges {
            removed_chain_block_hashes: retracted.into_iter().map(|(hash, _)| hash).collect(),
            added_chain_blocks,
        };

        Ok((changes, events))
    }
}

/// DAG processor managing the block graph and its selected chain
#[derive(Clone)]
pub struct DagProcessor {
    /// Consensus parameters
    params: ConsensusParams,

    /// Coinbase rules
    coinbase: CoinbaseManager,

    /// Storage backend for encoded blocks
    storage: MemoryStorage,

    /// Graph and chain state
    state: Arc<RwLock<DagState>>,

    /// Registered subnetworks and their gas limits
    subnetworks: Arc<RwLock<HashMap<SubnetworkId, u64>>>,

    /// Receiver of chain events
    event_sink: Option<Arc<dyn BlockEventSink>>,
}

impl DagProcessor {
    /// Creates a DAG processor holding only the genesis block
    pub fn new(params: ConsensusParams, storage: MemoryStorage) -> ConsensusResult<Self> {
        Self::build(params, storage, None)
    }

    /// Creates a DAG processor that reports chain changes to `sink`
    ///
    /// The sink receives the genesis connection before this returns.
    pub fn with_event_sink(
        params: ConsensusParams,
        storage: MemoryStorage,
        sink: Arc<dyn BlockEventSink>,
    ) -> ConsensusResult<Self> {
        Self::build(params, storage, Some(sink))
    }

    fn build(
        params: ConsensusParams,
        storage: MemoryStorage,
        event_sink: Option<Arc<dyn BlockEventSink>>,
    ) -> ConsensusResult<Self> {
        let coinbase = CoinbaseManager::new(&params);
        let genesis = Arc::new(Self::genesis_block(&params)?);
        let genesis_hash = genesis.hash();

        let mut state = DagState::default();
        state.add_node(
            genesis_hash,
            BlockNode {
                block: genesis.clone(),
                selected_parent: None,
                merge_set: Vec::new(),
                blue_score: 0,
                payout: ScriptPublicKey::default(),
            },
        );

        let accepted = genesis.transaction_ids();
        for id in &accepted {
            state.accepted_by.insert(*id, genesis_hash);
        }
        state.chain_index.insert(genesis_hash, 0);
        state.selected_chain.push(genesis_hash);
        state.chain_acceptance.insert(genesis_hash, accepted.clone());

        let processor = Self {
            params,
            coinbase,
            storage,
            state: Arc::new(RwLock::new(state)),
            subnetworks: Arc::new(RwLock::new(HashMap::new())),
            event_sink,
        };

        processor.storage.store_block(&genesis)?;
        processor.dispatch(&[ConsensusEvent::BlockConnected {
            block: genesis,
            accepted_transactions: accepted,
        }])?;

        info!("DAG initialized with genesis {}", hex::encode(genesis_hash));
        Ok(processor)
    }

    /// The genesis block of a network
    pub fn genesis_block(params: &ConsensusParams) -> ConsensusResult<Block> {
        let coinbase_data = CoinbaseData {
            script_public_key: ScriptPublicKey::default(),
            extra_data: GENESIS_EXTRA_DATA.to_vec(),
        };
        let payload = CoinbaseManager::new(params).serialize_coinbase_payload(0, 0, &coinbase_data)?;
        let coinbase = Transaction::new(
            COINBASE_TRANSACTION_VERSION,
            Vec::new(),
            Vec::new(),
            0,
            SUBNETWORK_ID_COINBASE,
            0,
            payload,
        );

        let transactions = vec![coinbase];
        let header = BlockHeader {
            version: BLOCK_VERSION,
            parents: Vec::new(),
            hash_merkle_root: Block::calculate_merkle_root(&transactions),
            timestamp: params.genesis_timestamp,
            bits: params.bits,
            nonce: 0,
        };
        Ok(Block::new(header, transactions))
    }

    /// Storage backend holding every processed block
    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }

    /// Reports chain changes from now on to `sink`
    ///
    /// Blocks processed earlier are not reported again.
    pub fn attach_event_sink(&mut self, sink: Arc<dyn BlockEventSink>) {
        self.event_sink = Some(sink);
    }

    /// Commitment to the processed blocks and the order they arrived in
    ///
    /// Processors that inserted the same blocks in the same order share a
    /// checkpoint.
    pub fn checkpoint(&self) -> ConsensusResult<Hash> {
        let state = self.read_state()?;
        let chunks: Vec<&[u8]> = state
            .insertion_order
            .iter()
            .map(|hash| hash.as_slice())
            .collect();
        Ok(hash_chunks(&chunks))
    }

    /// Writes every block past genesis to `path`, in insertion order
    ///
    /// The log is written next to `path` and renamed into place.
    pub fn save_blocks(&self, path: &Path) -> ConsensusResult<()> {
        let (bytes, count) = {
            let state = self.read_state()?;
            let blocks = state
                .insertion_order
                .iter()
                .skip(1)
                .map(|hash| Ok(state.node(hash)?.block.as_ref().clone()))
                .collect::<ConsensusResult<Vec<_>>>()?;
            let count = blocks.len();
            let log = BlockLog {
                version: BLOCK_LOG_VERSION,
                network_name: self.params.network_name.clone(),
                blocks,
            };
            let bytes = bincode::serialize(&log)
                .map_err(|e| CoreError::SerializationError(e.to_string()))?;
            (bytes, count)
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(storage_error)?;
            }
        }

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &bytes).map_err(storage_error)?;
        fs::rename(&temp_path, path).map_err(storage_error)?;

        info!("Saved {} blocks to {}", count, path.display());
        Ok(())
    }

    /// Reads a block log written by [`DagProcessor::save_blocks`]
    ///
    /// A missing log yields no blocks.
    pub fn load_blocks(params: &ConsensusParams, path: &Path) -> ConsensusResult<Vec<Block>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let bytes = fs::read(path).map_err(storage_error)?;
        let log: BlockLog = bincode::deserialize(&bytes)
            .map_err(|e| CoreError::SerializationError(e.to_string()))?;

        if log.version != BLOCK_LOG_VERSION {
            return Err(CoreError::StorageError(format!(
                "unsupported block log version {}",
                log.version
            ))
            .into());
        }
        if log.network_name != params.network_name {
            return Err(CoreError::StorageError(format!(
                "block log belongs to {}, not {}",
                log.network_name, params.network_name
            ))
            .into());
        }

        info!("Loaded {} blocks from {}", log.blocks.len(), path.display());
        Ok(log.blocks)
    }

    /// Inserts previously processed blocks in their original order
    pub fn replay(&self, blocks: Vec<Block>) -> ConsensusResult<usize> {
        let count = blocks.len();
        for block in blocks {
            self.validate_and_insert_block(block)?;
        }

        if count > 0 {
            info!("Replayed {} blocks", count);
        }
        Ok(count)
    }

    /// Coinbase rules used for validation and templates
    pub fn coinbase_manager(&self) -> &CoinbaseManager {
        &self.coinbase
    }

    /// Registers a subnetwork with its gas limit
    pub fn register_subnetwork(&self, subnetwork_id: SubnetworkId, gas_limit: u64) -> ConsensusResult<()> {
        if subnetwork_id.is_builtin() {
            return Err(ConsensusError::RuleError(format!(
                "subnetwork {} is built in",
                subnetwork_id
            )));
        }

        let mut subnetworks = self
            .subnetworks
            .write()
            .map_err(|e| ConsensusError::Internal(format!("Lock poisoned: {}", e)))?;
        subnetworks.insert(subnetwork_id, gas_limit);
        Ok(())
    }

    /// Builds a block on explicit parents
    pub fn build_block_with_parents(
        &self,
        parents: Vec<Hash>,
        coinbase_data: &CoinbaseData,
        transactions: Vec<Transaction>,
        timestamp: Timestamp,
    ) -> ConsensusResult<Block> {
        let state = self.read_state()?;

        let missing: Vec<Hash> = parents
            .iter()
            .filter(|parent| !state.nodes.contains_key(*parent))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(ConsensusError::MissingParents(missing));
        }

        let ghostdag = state.ghostdag(&parents)?;
        let snapshot = state.snapshot_for(&ghostdag)?;
        drop(state);

        let coinbase = self.coinbase.coinbase_for_merge_set(&snapshot, coinbase_data)?;

        let mut block_transactions = Vec::with_capacity(transactions.len() + 1);
        block_transactions.push(coinbase);
        block_transactions.extend(transactions.into_iter().filter(|tx| !tx.is_coinbase()));

        let header = BlockHeader {
            version: BLOCK_VERSION,
            parents,
            hash_merkle_root: Block::calculate_merkle_root(&block_transactions),
            timestamp,
            bits: self.params.bits,
            nonce: 0,
        };
        Ok(Block::new(header, block_transactions))
    }

    /// Ordered selected chain, genesis first
    pub fn selected_chain(&self) -> ConsensusResult<Vec<Hash>> {
        Ok(self.read_state()?.selected_chain.clone())
    }

    /// Chain block currently accepting `transaction_id`
    pub fn accepting_block(&self, transaction_id: &TransactionId) -> ConsensusResult<Option<Hash>> {
        Ok(self.read_state()?.accepted_by.get(transaction_id).copied())
    }

    /// Returns statistics about the DAG
    pub fn get_stats(&self) -> ConsensusResult<DagStats> {
        let state = self.read_state()?;

        Ok(DagStats {
            total_blocks: state.nodes.len(),
            current_tips: state.tips.len(),
            selected_chain_length: state.selected_chain.len(),
            accepted_transactions: state.accepted_by.len(),
        })
    }

    fn read_state(&self) -> ConsensusResult<RwLockReadGuard<'_, DagState>> {
        self.state
            .read()
            .map_err(|e| ConsensusError::Internal(format!("Lock poisoned: {}", e)))
    }

    fn dispatch(&self, events: &[ConsensusEvent]) -> ConsensusResult<()> {
        if let Some(sink) = &self.event_sink {
            for event in events {
                sink.handle_event(event).map_err(|e| {
                    warn!(
                        "Event sink rejected {} event for block {}: {}",
                        event.kind(),
                        hex::encode(event.block().hash()),
                        e
                    );
                    ConsensusError::Indexing(e.to_string())
                })?;
            }
        }
        Ok(())
    }

    fn check_block_structure(&self, block: &Block) -> ConsensusResult<()> {
        let parents = &block.header.parents;
        if parents.is_empty() {
            return Err(ConsensusError::RuleError("block has no parents".to_string()));
        }
        let unique: HashSet<&Hash> = parents.iter().collect();
        if unique.len() != parents.len() {
            return Err(ConsensusError::RuleError("block repeats a parent".to_string()));
        }

        if block.transactions.is_empty() {
            return Err(ConsensusError::RuleError("block has no transactions".to_string()));
        }
        if block.transactions.len() > self.params.max_block_transactions {
            return Err(ConsensusError::RuleError(format!(
                "block has {} transactions, limit is {}",
                block.transactions.len(),
                self.params.max_block_transactions
            )));
        }
        if !block.has_valid_merkle_root() {
            return Err(ConsensusError::RuleError("merkle root mismatch".to_string()));
        }
        if block.coinbase().is_none() {
            return Err(ConsensusError::RuleError(
                "first transaction is not a coinbase".to_string(),
            ));
        }

        let subnetworks = self
            .subnetworks
            .read()
            .map_err(|e| ConsensusError::Internal(format!("Lock poisoned: {}", e)))?;

        for (position, tx) in block.transactions.iter().enumerate().skip(1) {
            if tx.is_coinbase() {
                return Err(ConsensusError::RuleError(format!(
                    "transaction {} is a second coinbase",
                    position
                )));
            }
            if !tx.validate_structure() {
                return Err(ConsensusError::RuleError(format!(
                    "transaction {} is malformed",
                    position
                )));
            }
            if tx.subnetwork_id.is_builtin() {
                if tx.gas != 0 {
                    return Err(ConsensusError::RuleError(format!(
                        "transaction {} uses gas on a built-in subnetwork",
                        position
                    )));
                }
            } else {
                match subnetworks.get(&tx.subnetwork_id) {
                    Some(limit) if tx.gas <= *limit => {}
                    Some(limit) => {
                        return Err(ConsensusError::RuleError(format!(
                            "transaction {} uses {} gas, subnetwork limit is {}",
                            position, tx.gas, limit
                        )))
                    }
                    None => {
                        return Err(ConsensusError::RuleError(format!(
                            "transaction {} targets unknown subnetwork {}",
                            position, tx.subnetwork_id
                        )))
                    }
                }
            }
        }

        Ok(())
    }
}

impl MergeSetSource for DagProcessor {
    fn merge_set(&self, block_hash: &Hash) -> ConsensusResult<Option<MergeSetSnapshot>> {
        let state = self.read_state()?;

        if *block_hash == VIRTUAL_BLOCK_HASH {
            let ghostdag = state.ghostdag(&state.sorted_tips())?;
            return state.snapshot_for(&ghostdag).map(Some);
        }

        state.snapshot_of_block(block_hash)
    }
}

impl ConsensusApi for DagProcessor {
    fn validate_and_insert_block(&self, block: Block) -> ConsensusResult<BlockInsertion> {
        let hash = block.hash();

        let mut state = self
            .state
            .write()
            .map_err(|e| ConsensusError::Internal(format!("Lock poisoned: {}", e)))?;

        if state.nodes.contains_key(&hash) {
            return Err(ConsensusError::DuplicateBlock(hash));
        }

        self.check_block_structure(&block)?;

        let missing: Vec<Hash> = block
            .header
            .parents
            .iter()
            .filter(|parent| !state.nodes.contains_key(*parent))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(ConsensusError::MissingParents(missing));
        }

        let ghostdag = state.ghostdag(&block.header.parents)?;
        let snapshot = state.snapshot_for(&ghostdag)?;

        let coinbase = block
            .coinbase()
            .ok_or_else(|| ConsensusError::RuleError("block has no coinbase".to_string()))?;
        self.coinbase.validate_coinbase_for_merge_set(&snapshot, coinbase)?;
        let payout = self
            .coinbase
            .extract_coinbase_data(coinbase)?
            .coinbase_data
            .script_public_key;

        let block = Arc::new(block);
        let former_tips = state.add_node(
            hash,
            BlockNode {
                block: block.clone(),
                selected_parent: Some(ghostdag.selected_parent),
                merge_set: ghostdag.merge_set,
                blue_score: ghostdag.blue_score,
                payout,
            },
        );

        let mut undo = ChainUndo::default();
        let committed = state
            .update_selected_chain(&block, &mut undo)
            .and_then(|(chain_changes, events)| {
                self.storage.store_block(&block)?;
                if let Err(e) = self.dispatch(&events) {
                    self.storage.remove_block(&hash)?;
                    return Err(e);
                }
                Ok(chain_changes)
            });

        let chain_changes = match committed {
            Ok(chain_changes) => chain_changes,
            Err(e) => {
                state.revert_insertion(&hash, &former_tips, undo);
                debug!("Rolled back block {}: {}", hex::encode(hash), e);
                return Err(e);
            }
        };

        debug!(
            "Inserted block {} with blue score {}",
            hex::encode(hash),
            ghostdag.blue_score
        );
        if !chain_changes.removed_chain_block_hashes.is_empty() {
            info!(
                "Selected chain reorganized: {} blocks removed, {} added",
                chain_changes.removed_chain_block_hashes.len(),
                chain_changes.added_chain_blocks.len()
            );
        }

        Ok(BlockInsertion {
            hash,
            chain_changes,
        })
    }

    fn build_block_template(
        &self,
        coinbase_data: &CoinbaseData,
        transactions: Vec<Transaction>,
        timestamp: Timestamp,
    ) -> ConsensusResult<Block> {
        let parents = self.tips()?;
        self.build_block_with_parents(parents, coinbase_data, transactions, timestamp)
    }

    fn get_block(&self, hash: &Hash) -> ConsensusResult<Block> {
        let state = self.read_state()?;
        Ok(state.node(hash)?.block.as_ref().clone())
    }

    fn block_info(&self, hash: &Hash) -> ConsensusResult<BlockInfo> {
        let state = self.read_state()?;
        let node = state.node(hash)?;
        let is_chain_block = state.chain_index.contains_key(hash);

        let accepting_block = if is_chain_block {
            Some(*hash)
        } else {
            state
                .selected_chain
                .iter()
                .find(|chain_block| {
                    state
                        .nodes
                        .get(*chain_block)
                        .map_or(false, |chain_node| chain_node.merge_set.contains(hash))
                })
                .copied()
        };

        Ok(BlockInfo {
            hash: *hash,
            blue_score: node.blue_score,
            selected_parent: node.selected_parent,
            merge_set: node.merge_set.clone(),
            is_chain_block,
            accepting_block,
        })
    }

    fn selected_tip_hash(&self) -> ConsensusResult<Hash> {
        let state = self.read_state()?;
        state
            .selected_chain
            .last()
            .copied()
            .ok_or_else(|| ConsensusError::Internal("selected chain is empty".to_string()))
    }

    fn tips(&self) -> ConsensusResult<Vec<Hash>> {
        Ok(self.read_state()?.sorted_tips())
    }

    fn block_count(&self) -> ConsensusResult<u64> {
        Ok(self.read_state()?.nodes.len() as u64)
    }

    fn virtual_blue_score(&self) -> ConsensusResult<u64> {
        let state = self.read_state()?;
        Ok(state.ghostdag(&state.sorted_tips())?.blue_score)
    }

    fn chain_from_block(&self, start: Option<Hash>) -> ConsensusResult<ChainChanges> {
        let state = self.read_state()?;

        let mut removed_chain_block_hashes = Vec::new();
        let mut cursor = match start {
            Some(hash) => hash,
            None => {
                return Ok(ChainChanges {
                    removed_chain_block_hashes,
                    added_chain_blocks: state
                        .selected_chain
                        .iter()
                        .map(|hash| ChainBlock {
                            hash: *hash,
                            accepted_transaction_ids: state
                                .chain_acceptance
                                .get(hash)
                                .cloned()
                                .unwrap_or_default(),
                        })
                        .collect(),
                })
            }
        };

        state.node(&cursor)?;
        while !state.chain_index.contains_key(&cursor) {
            removed_chain_block_hashes.push(cursor);
            cursor = state.node(&cursor)?.selected_parent.ok_or_else(|| {
                ConsensusError::Internal("selected chain does not reach genesis".to_string())
            })?;
        }

        let split = state.chain_index[&cursor];
        let added_chain_blocks = state.selected_chain[split + 1..]
            .iter()
            .map(|hash| ChainBlock {
                hash: *hash,
                accepted_transaction_ids: state.chain_acceptance.get(hash).cloned().unwrap_or_default(),
            })
            .collect();

        Ok(ChainChanges {
            removed_chain_block_hashes,
            added_chain_blocks,
        })
    }

    fn blocks_after(&self, low: Option<Hash>, limit: usize) -> ConsensusResult<Vec<Hash>> {
        let state = self.read_state()?;

        let start = match low {
            Some(hash) => {
                state
                    .insertion_index
                    .get(&hash)
                    .copied()
                    .ok_or(ConsensusError::BlockNotFound(hash))?
                    + 1
            }
            None => 0,
        };

        Ok(state
            .insertion_order
            .iter()
            .skip(start)
            .take(limit)
            .copied()
            .collect())
    }

    fn subnetwork_gas_limit(&self, subnetwork_id: &SubnetworkId) -> ConsensusResult<Option<u64>> {
        let subnetworks = self
            .subnetworks
            .read()
            .map_err(|e| ConsensusError::Internal(format!("Lock poisoned: {}", e)))?;
        Ok(subnetworks.get(subnetwork_id).copied())
    }

    fn resolve_finality_conflict(&self, finality_block_hash: &Hash) -> ConsensusResult<()> {
        let state = self.read_state()?;
        state.node(finality_block_hash)?;

        if state.chain_index.contains_key(finality_block_hash) {
            Ok(())
        } else {
            Err(ConsensusError::FinalityConflict(format!(
                "block {} is not on the selected chain",
                hex::encode(finality_block_hash)
            )))
        }
    }

    fn is_synced(&self) -> bool {
        true
    }

    fn params(&self) -> &ConsensusParams {
        &self.params
    }
}

/// Statistics about the DAG state
#[derive(Debug, Clone)]
pub struct DagStats {
    /// Total number of blocks
    pub total_blocks: usize,
    /// Current number of tips
    pub current_tips: usize,
    /// Length of the selected chain, genesis included
    pub selected_chain_length: usize,
    /// Transactions accepted by the selected chain
    pub accepted_transactions: usize,
}
