// src/manager.rs

//! Ordered fan-out of consensus events to indexers.

use crate::errors::{IndexError, Result};
use braid_core::{
    AcceptanceChange, Block, BlockEventSink, ConsensusEvent, SinkError, TransactionId,
};
use std::sync::Arc;
use tracing::{debug, error};

/// An index maintained from consensus events
pub trait Indexer: Send + Sync {
    /// Name used in logs and failure reports
    fn name(&self) -> &str;

    /// `block` was connected and accepts `accepted_transactions`
    fn connect_block(&self, block: &Block, accepted_transactions: &[TransactionId]) -> Result<()>;

    /// `block` left the selected chain; `reassigned` is the new acceptance
    /// of every transaction it accepted
    fn disconnect_block(&self, block: &Block, reassigned: &[AcceptanceChange]) -> Result<()>;
}

/// Drives registered indexers in registration order
#[derive(Clone, Default)]
pub struct IndexerManager {
    indexers: Vec<Arc<dyn Indexer>>,
}

impl IndexerManager {
    /// Creates a manager over `indexers`, invoked in the given order
    pub fn new(indexers: Vec<Arc<dyn Indexer>>) -> Self {
        Self { indexers }
    }

    /// Names of the registered indexers, in invocation order
    pub fn indexer_names(&self) -> Vec<&str> {
        self.indexers.iter().map(|indexer| indexer.name()).collect()
    }

    /// Number of registered indexers
    pub fn len(&self) -> usize {
        self.indexers.len()
    }

    /// Whether no indexer is registered
    pub fn is_empty(&self) -> bool {
        self.indexers.is_empty()
    }

    /// Forwards a block connection to every indexer
    ///
    /// Stops at the first failing indexer; later indexers do not see the
    /// event.
    pub fn connect_block(&self, block: &Block, accepted_transactions: &[TransactionId]) -> Result<()> {
        for indexer in &self.indexers {
            indexer
                .connect_block(block, accepted_transactions)
                .map_err(|source| Self::failure(indexer.name(), block, source))?;
        }
        Ok(())
    }

    /// Forwards a block disconnection to every indexer
    pub fn disconnect_block(&self, block: &Block, reassigned: &[AcceptanceChange]) -> Result<()> {
        for indexer in &self.indexers {
            indexer
                .disconnect_block(block, reassigned)
                .map_err(|source| Self::failure(indexer.name(), block, source))?;
        }
        Ok(())
    }

    /// Applies one consensus event
    pub fn apply(&self, event: &ConsensusEvent) -> Result<()> {
        debug!(
            "Applying {} event for block {} to {} indexers",
            event.kind(),
            hex::encode(event.block().hash()),
            self.indexers.len()
        );

        match event {
            ConsensusEvent::BlockConnected {
                block,
                accepted_transactions,
            } => self.connect_block(block, accepted_transactions),
            ConsensusEvent::BlockDisconnected { block, reassigned } => {
                self.disconnect_block(block, reassigned)
            }
        }
    }

    fn failure(indexer: &str, block: &Block, source: IndexError) -> IndexError {
        error!(
            "Indexer {} failed on block {}: {}",
            indexer,
            hex::encode(block.hash()),
            source
        );
        IndexError::IndexerFailure {
            indexer: indexer.to_string(),
            source: Box::new(source),
        }
    }
}

impl BlockEventSink for IndexerManager {
    fn handle_event(&self, event: &ConsensusEvent) -> std::result::Result<(), SinkError> {
        self.apply(event).map_err(SinkError::from)
    }
}
