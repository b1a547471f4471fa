// src/txindex.rs

//! Reorg-aware transaction index.
//!
//! Two records are kept per transaction:
//!
//! - the selected-chain block currently accepting it, which moves as the
//!   chain reorganizes;
//! - the byte region of the first block it was ever seen in, which is written
//!   once and never changes.
//!
//! Both maps live under a single lock so a reader never observes half of an
//! event.

use crate::errors::{IndexError, Result};
use crate::manager::Indexer;
use braid_core::{AcceptanceChange, Block, BlockRegion, Hash, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// Snapshot layout version
const SNAPSHOT_VERSION: u32 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct TxIndexState {
    /// Transaction -> accepting selected-chain block
    accepting: HashMap<TransactionId, Hash>,

    /// Transaction -> region in the first block it appeared in
    first_seen: HashMap<TransactionId, BlockRegion>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    /// Consensus state the index was taken at
    checkpoint: Hash,
    state: TxIndexState,
}

/// Record counts of the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIndexStats {
    /// Transactions with an accepting block
    pub accepted_transactions: usize,

    /// Transactions with a first-seen region
    pub known_transactions: usize,
}

/// Transaction index
#[derive(Debug, Default)]
pub struct TxIndex {
    state: RwLock<TxIndexState>,
}

impl TxIndex {
    /// Name the index reports to the indexer manager
    pub const NAME: &'static str = "txindex";

    /// Creates an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a block connection
    ///
    /// Every transaction in `accepted_transactions` is now accepted by
    /// `block`; every transaction of `block` not seen before gets its region
    /// recorded.
    pub fn connect_block(&self, block: &Block, accepted_transactions: &[TransactionId]) -> Result<()> {
        let block_hash = block.hash();
        let regions = block.transaction_regions();

        let mut state = self
            .state
            .write()
            .map_err(|e| IndexError::StorageError(format!("Lock poisoned: {}", e)))?;

        for (tx_id, region) in regions {
            state.first_seen.entry(tx_id).or_insert(region);
        }
        for tx_id in accepted_transactions {
            state.accepting.insert(*tx_id, block_hash);
        }

        debug!(
            "txindex connected block {} accepting {} transactions",
            hex::encode(block_hash),
            accepted_transactions.len()
        );
        Ok(())
    }

    /// Applies a block disconnection
    ///
    /// `reassigned` is the full replacement acceptance for the transactions
    /// the block used to accept; `None` drops the record.
    pub fn disconnect_block(&self, block: &Block, reassigned: &[AcceptanceChange]) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|e| IndexError::StorageError(format!("Lock poisoned: {}", e)))?;

        for change in reassigned {
            match change.accepting_block {
                Some(accepting_block) => {
                    state.accepting.insert(change.transaction_id, accepting_block);
                }
                None => {
                    state.accepting.remove(&change.transaction_id);
                }
            }
        }

        debug!(
            "txindex disconnected block {} reassigning {} transactions",
            hex::encode(block.hash()),
            reassigned.len()
        );
        Ok(())
    }

    /// Selected-chain block currently accepting `tx_id`
    ///
    /// # Errors
    /// [`IndexError::NotFound`] when no chain block accepts the transaction.
    pub fn block_that_accepted_tx(&self, tx_id: &TransactionId) -> Result<Hash> {
        let state = self
            .state
            .read()
            .map_err(|e| IndexError::StorageError(format!("Lock poisoned: {}", e)))?;

        state
            .accepting
            .get(tx_id)
            .copied()
            .ok_or(IndexError::NotFound(*tx_id))
    }

    /// Region of `tx_id` in the first block it was seen in
    ///
    /// # Errors
    /// [`IndexError::NotFound`] when the transaction was never seen.
    pub fn tx_first_block_region(&self, tx_id: &TransactionId) -> Result<BlockRegion> {
        let state = self
            .state
            .read()
            .map_err(|e| IndexError::StorageError(format!("Lock poisoned: {}", e)))?;

        state
            .first_seen
            .get(tx_id)
            .copied()
            .ok_or(IndexError::NotFound(*tx_id))
    }

    /// Returns record counts
    pub fn stats(&self) -> Result<TxIndexStats> {
        let state = self
            .state
            .read()
            .map_err(|e| IndexError::StorageError(format!("Lock poisoned: {}", e)))?;

        Ok(TxIndexStats {
            accepted_transactions: state.accepting.len(),
            known_transactions: state.first_seen.len(),
        })
    }

    /// Writes the index to `path`, tagged with the consensus `checkpoint`
    /// it reflects
    ///
    /// The snapshot is written next to `path` and renamed into place, so an
    /// interrupted save leaves the previous snapshot intact.
    pub fn save_snapshot(&self, path: &Path, checkpoint: Hash) -> Result<()> {
        let bytes = {
            let state = self
                .state
                .read()
                .map_err(|e| IndexError::StorageError(format!("Lock poisoned: {}", e)))?;
            bincode::serialize(&SnapshotFile {
                version: SNAPSHOT_VERSION,
                checkpoint,
                state: state.clone(),
            })?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &bytes)?;
        fs::rename(&temp_path, path)?;

        info!("txindex snapshot saved to {}", path.display());
        Ok(())
    }

    /// Loads an index written by [`TxIndex::save_snapshot`] together with
    /// its checkpoint
    pub fn open_snapshot(path: &Path) -> Result<(Self, Hash)> {
        let bytes = fs::read(path)?;
        let snapshot: SnapshotFile = bincode::deserialize(&bytes)?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(IndexError::SnapshotError(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        info!(
            "txindex snapshot loaded from {} ({} accepted transactions)",
            path.display(),
            snapshot.state.accepting.len()
        );
        let index = Self {
            state: RwLock::new(snapshot.state),
        };
        Ok((index, snapshot.checkpoint))
    }

    /// Loads the snapshot at `path` if it was taken at `checkpoint`
    ///
    /// Returns `None` when there is no snapshot or it belongs to another
    /// consensus state; the caller then rebuilds the index by replay.
    pub fn open_at_checkpoint(path: &Path, checkpoint: &Hash) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let (index, saved) = Self::open_snapshot(path)?;
        if saved != *checkpoint {
            warn!(
                "txindex snapshot at {} was taken at {}, consensus is at {}",
                path.display(),
                hex::encode(saved),
                hex::encode(checkpoint)
            );
            return Ok(None);
        }
        Ok(Some(index))
    }
}

impl Indexer for TxIndex {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn connect_block(&self, block: &Block, accepted_transactions: &[TransactionId]) -> Result<()> {
        TxIndex::connect_block(self, block, accepted_transactions)
    }

    fn disconnect_block(&self, block: &Block, reassigned: &[AcceptanceChange]) -> Result<()> {
        TxIndex::disconnect_block(self, block, reassigned)
    }
}
