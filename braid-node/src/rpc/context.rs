// src/rpc/context.rs

//! State shared by every RPC handler.

use crate::mempool::Mempool;
use crate::rpc::notification_manager::NotificationManager;
use crate::shutdown::ShutdownSignal;
use braid_core::{Block, BlockInsertion, ConsensusApi, TransactionId};
use braid_index::TxIndex;
use braid_network::{AddressBook, ConnectionManager};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Handles to the node components an RPC request may touch
#[derive(Clone)]
pub struct RpcContext {
    /// Consensus
    pub consensus: Arc<dyn ConsensusApi>,

    /// Transaction index, when enabled
    pub txindex: Option<Arc<TxIndex>>,

    /// Pending transactions
    pub mempool: Mempool,

    /// Live RPC connections
    pub connections: Arc<RwLock<ConnectionManager>>,

    /// Known peer addresses
    pub address_book: Arc<RwLock<AddressBook>>,

    /// Notification listeners
    pub notification_manager: Arc<NotificationManager>,

    /// Process shutdown signal
    pub shutdown: ShutdownSignal,
}

impl RpcContext {
    /// Follows up on a block accepted by consensus: drops the transactions
    /// it made accepted from the mempool and notifies subscribers
    pub async fn on_block_inserted(&self, block: &Block, insertion: &BlockInsertion) {
        let accepted: Vec<TransactionId> = insertion
            .chain_changes
            .added_chain_blocks
            .iter()
            .flat_map(|chain_block| chain_block.accepted_transaction_ids.iter().copied())
            .collect();
        self.mempool.remove_accepted(&accepted).await;

        if let Err(e) = self.notification_manager.notify_block_added(block).await {
            warn!("Failed to send block-added notifications: {}", e);
        }

        if !insertion.chain_changes.is_empty() {
            if let Err(e) = self
                .notification_manager
                .notify_chain_changed(&insertion.chain_changes)
                .await
            {
                warn!("Failed to send chain-changed notifications: {}", e);
            }
        }
    }
}
