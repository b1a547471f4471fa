// src/lib.rs

//! # Braid Index
//!
//! Indexes maintained from consensus events.
//!
//! [`IndexerManager`] receives the ordered connect/disconnect events
//! consensus emits and forwards them to each registered [`Indexer`].
//! [`TxIndex`] answers which selected-chain block currently accepts a
//! transaction and where the transaction was first seen.
//!
//! ## Example Usage
//!
//! ```rust
//! use braid_core::{ConsensusParams, DagProcessor, MemoryStorage};
//! use braid_index::{Indexer, IndexerManager, TxIndex};
//! use std::sync::Arc;
//!
//! let txindex = Arc::new(TxIndex::new());
//! let manager = IndexerManager::new(vec![txindex.clone() as Arc<dyn Indexer>]);
//! let dag = DagProcessor::with_event_sink(
//!     ConsensusParams::devnet(),
//!     MemoryStorage::new(),
//!     Arc::new(manager),
//! )
//! .unwrap();
//!
//! let genesis = DagProcessor::genesis_block(&ConsensusParams::devnet()).unwrap();
//! let coinbase_id = genesis.transactions[0].id();
//! assert_eq!(txindex.block_that_accepted_tx(&coinbase_id).unwrap(), genesis.hash());
//! # drop(dag);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod errors;
pub mod manager;
pub mod txindex;

// Re-export commonly used types
pub use crate::errors::{IndexError, Result};
pub use crate::manager::{Indexer, IndexerManager};
pub use crate::txindex::{TxIndex, TxIndexStats};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txindex_name() {
        let index = TxIndex::new();
        assert_eq!(Indexer::name(&index), "txindex");
    }
}
