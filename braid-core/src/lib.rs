// src/lib.rs

//! # Braid Core
//!
//! Core data model of the Braid BlockDAG node and the boundary it shares
//! with consensus.
//!
//! ## Architecture
//!
//! - **Data model**: [`Block`], [`Transaction`] and their canonical bincode
//!   encoding, which makes every transaction addressable as a
//!   [`BlockRegion`] of its block.
//! - **Consensus boundary**: [`ConsensusEvent`], [`BlockEventSink`],
//!   [`MergeSetSource`] and [`ConsensusApi`].
//! - **Coinbase rules**: [`CoinbaseManager`] computes the expected reward
//!   transaction of a block from its merge set.
//! - **Development consensus**: [`DagProcessor`] keeps the DAG in memory and
//!   emits ordered connect/disconnect events as its selected chain moves.
//!
//! ## Example Usage
//!
//! ```rust
//! use braid_core::{ConsensusApi, ConsensusParams, DagProcessor, MemoryStorage};
//!
//! let dag = DagProcessor::new(ConsensusParams::devnet(), MemoryStorage::new()).unwrap();
//! let genesis = dag.selected_tip_hash().unwrap();
//! assert_eq!(dag.tips().unwrap(), vec![genesis]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod block;
pub mod coinbase;
pub mod consensus;
pub mod dag;
pub mod errors;
pub mod params;
pub mod storage;
pub mod transaction;
pub mod types;

// Re-export crypto for convenience
pub use braid_crypto;

// Re-export commonly used types
pub use crate::block::{Block, BlockHeader, BlockRegion};
pub use crate::coinbase::{CoinbaseData, CoinbaseManager, CoinbasePayload};
pub use crate::consensus::{
    AcceptanceChange, BlockEventSink, BlockInfo, BlockInsertion, ChainBlock, ChainChanges,
    ConsensusApi, ConsensusEvent, MergeSetSnapshot, MergeSetSource, MergedBlock, SinkError,
};
pub use crate::dag::{DagProcessor, DagStats};
pub use crate::errors::{
    CoinbaseError, CoinbaseResult, ConsensusError, ConsensusResult, CoreError, Result,
};
pub use crate::params::ConsensusParams;
pub use crate::storage::MemoryStorage;
pub use crate::transaction::{Outpoint, ScriptPublicKey, Transaction, TxInput, TxOutput};
pub use crate::types::{
    hash_bytes_to_hash, Hash, SubnetworkId, Timestamp, TransactionId, SUBNETWORK_ID_COINBASE,
    SUBNETWORK_ID_NATIVE, SUBNETWORK_ID_REGISTRY, VIRTUAL_BLOCK_HASH,
};

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;
