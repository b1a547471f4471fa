// src/errors.rs

//! Error types for the Braid core.
//!
//! [`CoreError`] covers storage and encoding, [`CoinbaseError`] the reward
//! rules and [`ConsensusError`] everything the consensus boundary reports
//! back to its callers.

use crate::types::Hash;
use thiserror::Error;

/// Storage and encoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Storage/database error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Block not present in the store
    #[error("Block not found: {}", hex::encode(.0))]
    BlockNotFound(Hash),

    /// Requested region lies outside the stored block
    #[error("Region {offset}+{len} out of bounds for block {} of {size} bytes", hex::encode(.block_hash))]
    RegionOutOfBounds {
        /// Block addressed by the region
        block_hash: Hash,
        /// Region offset
        offset: u64,
        /// Region length
        len: u64,
        /// Encoded size of the block
        size: u64,
    },
}

/// Errors from computing or checking a coinbase transaction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoinbaseError {
    /// Consensus has not processed the block
    #[error("Unknown block: {}", hex::encode(.0))]
    UnknownBlock(Hash),

    /// Miner payout data violates the coinbase limits
    #[error("Invalid coinbase payout: {0}")]
    InvalidPayout(String),

    /// A reward sum does not fit in 64 bits
    #[error("Coinbase reward overflow")]
    RewardOverflow,

    /// Coinbase payload could not be parsed
    #[error("Malformed coinbase: {0}")]
    MalformedCoinbase(String),

    /// Submitted coinbase differs from the expected one
    #[error("Coinbase mismatch: expected {}, got {}", hex::encode(.expected), hex::encode(.actual))]
    Mismatch {
        /// Id of the expected coinbase
        expected: Hash,
        /// Id of the submitted coinbase
        actual: Hash,
    },

    /// The merge set could not be read
    #[error("Merge set unavailable: {0}")]
    MergeSetUnavailable(String),
}

/// Errors reported across the consensus boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    /// Block not known to consensus
    #[error("Block not found: {}", hex::encode(.0))]
    BlockNotFound(Hash),

    /// Block was already processed
    #[error("Block already exists: {}", hex::encode(.0))]
    DuplicateBlock(Hash),

    /// Some parents have not been processed
    #[error("Missing parents: {}", format_hashes(.0))]
    MissingParents(Vec<Hash>),

    /// Block violates a structural rule
    #[error("Rule violation: {0}")]
    RuleError(String),

    /// Coinbase rules failed
    #[error("Invalid coinbase: {0}")]
    InvalidCoinbase(#[from] CoinbaseError),

    /// Requested block is not on the selected chain
    #[error("Finality conflict: {0}")]
    FinalityConflict(String),

    /// An event sink rejected a block event; the block was not committed
    #[error("Indexing failed: {0}")]
    Indexing(String),

    /// Storage or encoding failure
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Internal state is unusable (poisoned lock)
    #[error("Internal consensus error: {0}")]
    Internal(String),
}

fn format_hashes(hashes: &[Hash]) -> String {
    hashes.iter().map(hex::encode).collect::<Vec<_>>().join(", ")
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Result type alias for consensus operations
pub type ConsensusResult<T> = std::result::Result<T, ConsensusError>;

/// Result type alias for coinbase operations
pub type CoinbaseResult<T> = std::result::Result<T, CoinbaseError>;
