// src/payloads.rs

//! Structured payloads carried by RPC responses.

use braid_core::{
    Block, BlockHeader, ChainBlock, ConsensusError, Hash, SubnetworkId, Transaction, TransactionId,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Error reported to the client inside a response
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    /// Human readable reason
    pub message: String,
}

impl RpcError {
    /// Creates an error with the given message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RpcError {}

impl From<ConsensusError> for RpcError {
    fn from(err: ConsensusError) -> Self {
        RpcError::new(err.to_string())
    }
}

/// Outcome of a request as seen by the client
pub type RpcResult<T> = std::result::Result<T, RpcError>;

/// Block a miner can solve and submit
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockTemplate {
    /// Block with the expected coinbase and mempool transactions
    pub block: Block,

    /// Whether the node considered itself synced when building it
    pub is_synced: bool,
}

/// Transaction waiting in the mempool
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MempoolEntry {
    /// Transaction id
    pub transaction_id: TransactionId,

    /// The transaction
    pub transaction: Transaction,

    /// Milliseconds since the Unix epoch when it entered the mempool
    pub added_at: u64,
}

/// A live RPC connection
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerInfo {
    /// Connection id
    pub id: u64,

    /// Remote address
    pub address: SocketAddr,

    /// Milliseconds since the Unix epoch when the connection was accepted
    pub connected_at: u64,

    /// Whether the remote side opened the connection
    pub is_inbound: bool,
}

/// Acceptance data of one transaction of a block
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionVerbose {
    /// Transaction id
    pub transaction_id: TransactionId,

    /// Chain block accepting the transaction, if any
    pub accepting_block: Option<Hash>,
}

/// A block together with consensus data
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockVerbose {
    /// Block hash
    pub hash: Hash,

    /// Block header
    pub header: BlockHeader,

    /// Blue score
    pub blue_score: u64,

    /// Selected parent, `None` for genesis
    pub selected_parent: Option<Hash>,

    /// Merge set excluding the selected parent
    pub merge_set: Vec<Hash>,

    /// Whether the block is on the selected chain
    pub is_chain_block: bool,

    /// Ids of the block's transactions, in block order
    pub transaction_ids: Vec<TransactionId>,

    /// Per-transaction acceptance, empty unless requested
    pub transactions: Vec<TransactionVerbose>,
}

/// Registration data of a subnetwork
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubnetworkInfo {
    /// Subnetwork id
    pub subnetwork_id: SubnetworkId,

    /// Maximum gas a transaction may declare
    pub gas_limit: u64,
}

/// Selected chain changes since a block
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainFromBlockResult {
    /// Chain blocks removed since the start block, tip first
    pub removed_chain_block_hashes: Vec<Hash>,

    /// Chain blocks added since the split point, oldest first
    pub added_chain_blocks: Vec<ChainBlock>,

    /// The added blocks, when requested
    pub blocks: Vec<Block>,
}

/// Blocks in processing order
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlocksResult {
    /// Block hashes
    pub hashes: Vec<Hash>,

    /// The blocks, when requested
    pub blocks: Vec<Block>,
}

/// Summary of the DAG
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockDagInfo {
    /// Network name
    pub network_name: String,

    /// Number of processed blocks
    pub block_count: u64,

    /// Current tips, sorted
    pub tip_hashes: Vec<Hash>,

    /// Tip of the selected chain
    pub selected_tip_hash: Hash,

    /// Blue score a block on the current tips would have
    pub virtual_blue_score: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_from_consensus() {
        let err: RpcError = ConsensusError::BlockNotFound([0xab; 32]).into();
        assert!(err.message.contains("abab"));
        assert_eq!(err.to_string(), err.message);
    }

    #[test]
    fn test_rpc_result_roundtrip() {
        let result: RpcResult<u64> = Err(RpcError::new("busy"));
        let bytes = bincode::serialize(&result).unwrap();
        let decoded: RpcResult<u64> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, result);
    }
}
