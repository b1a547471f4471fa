// src/consensus.rs

//! The consensus boundary.
//!
//! Consensus decides the selected chain and which transactions each chain
//! block accepts. Everything downstream (indexes, coinbase rules, the RPC
//! layer) only sees it through the types and traits in this module.

use crate::block::Block;
use crate::coinbase::CoinbaseData;
use crate::errors::ConsensusResult;
use crate::params::ConsensusParams;
use crate::transaction::{ScriptPublicKey, Transaction};
use crate::types::{Hash, SubnetworkId, Timestamp, TransactionId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// New accepting block of a transaction after a disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceChange {
    /// Transaction whose acceptance changed
    pub transaction_id: TransactionId,

    /// Chain block accepting it now, `None` if no chain block does
    pub accepting_block: Option<Hash>,
}

/// Ordered event emitted as the selected chain changes
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    /// `block` became visible; `accepted_transactions` are the transactions
    /// it accepts as a selected-chain block (empty off-chain)
    BlockConnected {
        /// Connected block
        block: Arc<Block>,
        /// Transactions newly accepted by the block
        accepted_transactions: Vec<TransactionId>,
    },

    /// `block` left the selected chain; `reassigned` carries the full
    /// replacement acceptance of every transaction it used to accept
    BlockDisconnected {
        /// Disconnected block
        block: Arc<Block>,
        /// New acceptance of the block's former transactions
        reassigned: Vec<AcceptanceChange>,
    },
}

impl ConsensusEvent {
    /// Block the event is about
    pub fn block(&self) -> &Arc<Block> {
        match self {
            ConsensusEvent::BlockConnected { block, .. } => block,
            ConsensusEvent::BlockDisconnected { block, .. } => block,
        }
    }

    /// Short event name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusEvent::BlockConnected { .. } => "connected",
            ConsensusEvent::BlockDisconnected { .. } => "disconnected",
        }
    }
}

/// Error type returned by event sinks
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Receiver of consensus events, driven in event order
pub trait BlockEventSink: Send + Sync {
    /// Applies one event; an error stops consensus from committing the block
    fn handle_event(&self, event: &ConsensusEvent) -> Result<(), SinkError>;
}

/// A block merged by another block, as seen by the coinbase rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedBlock {
    /// Merged block hash
    pub hash: Hash,

    /// Blue score of the merged block
    pub blue_score: u64,

    /// Fees collected by the merged block
    pub total_fees: u64,

    /// Payout script recovered from the merged block's coinbase
    pub script_public_key: ScriptPublicKey,
}

/// Merge set of one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSetSnapshot {
    /// Blue score of the merging block
    pub blue_score: u64,

    /// Blue merged blocks, selected parent included
    pub blues: Vec<MergedBlock>,

    /// Red merged blocks
    pub reds: Vec<MergedBlock>,
}

/// Source of merge-set snapshots
pub trait MergeSetSource: Send + Sync {
    /// Merge set of `block_hash`, `None` if the block is unknown.
    /// [`crate::VIRTUAL_BLOCK_HASH`] addresses a block built on the current tips.
    fn merge_set(&self, block_hash: &Hash) -> ConsensusResult<Option<MergeSetSnapshot>>;
}

/// Selected chain block with the transactions it accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBlock {
    /// Chain block hash
    pub hash: Hash,

    /// Transactions accepted by the block
    pub accepted_transaction_ids: Vec<TransactionId>,
}

/// Difference between two views of the selected chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainChanges {
    /// Blocks that left the chain, tip first
    pub removed_chain_block_hashes: Vec<Hash>,

    /// Blocks that joined the chain, oldest first
    pub added_chain_blocks: Vec<ChainBlock>,
}

impl ChainChanges {
    /// Whether the chain did not move
    pub fn is_empty(&self) -> bool {
        self.removed_chain_block_hashes.is_empty() && self.added_chain_blocks.is_empty()
    }
}

/// Outcome of inserting a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInsertion {
    /// Inserted block hash
    pub hash: Hash,

    /// Resulting selected chain changes
    pub chain_changes: ChainChanges,
}

/// Consensus view of a single block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Block hash
    pub hash: Hash,

    /// Blue score
    pub blue_score: u64,

    /// Selected parent, `None` for genesis
    pub selected_parent: Option<Hash>,

    /// Merge set excluding the selected parent
    pub merge_set: Vec<Hash>,

    /// Whether the block is on the selected chain
    pub is_chain_block: bool,

    /// Selected chain block accepting this block's transactions, if any
    pub accepting_block: Option<Hash>,
}

/// Query and command surface of consensus used by the node
pub trait ConsensusApi: MergeSetSource {
    /// Validates and inserts a block, emitting events for chain changes
    fn validate_and_insert_block(&self, block: Block) -> ConsensusResult<BlockInsertion>;

    /// Builds a block on the current tips paying `coinbase_data`
    fn build_block_template(
        &self,
        coinbase_data: &CoinbaseData,
        transactions: Vec<Transaction>,
        timestamp: Timestamp,
    ) -> ConsensusResult<Block>;

    /// Retrieves a block
    fn get_block(&self, hash: &Hash) -> ConsensusResult<Block>;

    /// Consensus data about a block
    fn block_info(&self, hash: &Hash) -> ConsensusResult<BlockInfo>;

    /// Tip of the selected chain
    fn selected_tip_hash(&self) -> ConsensusResult<Hash>;

    /// Blocks without children, sorted
    fn tips(&self) -> ConsensusResult<Vec<Hash>>;

    /// Number of processed blocks
    fn block_count(&self) -> ConsensusResult<u64>;

    /// Blue score a block on the current tips would have
    fn virtual_blue_score(&self) -> ConsensusResult<u64>;

    /// Chain changes from `start` (genesis when `None`) to the current tip
    fn chain_from_block(&self, start: Option<Hash>) -> ConsensusResult<ChainChanges>;

    /// Up to `limit` block hashes processed after `low` (from the first when `None`)
    fn blocks_after(&self, low: Option<Hash>, limit: usize) -> ConsensusResult<Vec<Hash>>;

    /// Gas limit of a registered subnetwork
    fn subnetwork_gas_limit(&self, subnetwork_id: &SubnetworkId) -> ConsensusResult<Option<u64>>;

    /// Resolves a finality conflict in favour of `finality_block_hash`
    fn resolve_finality_conflict(&self, finality_block_hash: &Hash) -> ConsensusResult<()>;

    /// Whether the node considers itself synced
    fn is_synced(&self) -> bool;

    /// Parameters of the network
    fn params(&self) -> &ConsensusParams;
}
