// src/mempool.rs

//! Transaction mempool for pending transactions.

use braid_core::{Transaction, TransactionId};
use braid_network::MempoolEntry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Transaction mempool
#[derive(Clone)]
pub struct Mempool {
    /// Pending transactions
    entries: Arc<RwLock<HashMap<TransactionId, MempoolEntry>>>,

    /// Maximum mempool size
    max_size: usize,
}

impl Mempool {
    /// Creates a new mempool
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_size,
        }
    }

    /// Adds a transaction to the mempool
    pub async fn add_transaction(&self, tx: Transaction) -> crate::Result<TransactionId> {
        if tx.is_coinbase() {
            return Err(crate::NodeError::MempoolError(
                "Coinbase transactions are only valid inside blocks".to_string(),
            ));
        }
        if !tx.validate_structure() {
            return Err(crate::NodeError::MempoolError(
                "Malformed transaction".to_string(),
            ));
        }

        let tx_id = tx.id();
        let mut entries = self.entries.write().await;

        // Check if transaction already exists
        if entries.contains_key(&tx_id) {
            return Ok(tx_id);
        }

        // Check if mempool is full
        if entries.len() >= self.max_size {
            return Err(crate::NodeError::MempoolError("Mempool is full".to_string()));
        }

        entries.insert(
            tx_id,
            MempoolEntry {
                transaction_id: tx_id,
                transaction: tx,
                added_at: chrono::Utc::now().timestamp_millis().max(0) as u64,
            },
        );

        Ok(tx_id)
    }

    /// Gets a mempool entry
    pub async fn get_entry(&self, tx_id: &TransactionId) -> Option<MempoolEntry> {
        self.entries.read().await.get(tx_id).cloned()
    }

    /// All entries, oldest first
    pub async fn entries(&self) -> Vec<MempoolEntry> {
        let mut entries: Vec<_> = self.entries.read().await.values().cloned().collect();
        entries.sort_by_key(|entry| (entry.added_at, entry.transaction_id));
        entries
    }

    /// Up to `limit` transactions for a block template, oldest first
    pub async fn transactions_for_template(&self, limit: usize) -> Vec<Transaction> {
        self.entries()
            .await
            .into_iter()
            .take(limit)
            .map(|entry| entry.transaction)
            .collect()
    }

    /// Removes a transaction from the mempool
    pub async fn remove_transaction(&self, tx_id: &TransactionId) -> Option<Transaction> {
        self.entries
            .write()
            .await
            .remove(tx_id)
            .map(|entry| entry.transaction)
    }

    /// Removes transactions accepted by the selected chain
    pub async fn remove_accepted(&self, accepted: &[TransactionId]) -> usize {
        let mut entries = self.entries.write().await;
        let removed = accepted
            .iter()
            .filter(|tx_id| entries.remove(*tx_id).is_some())
            .count();

        if removed > 0 {
            debug!("Removed {} accepted transactions from the mempool", removed);
        }
        removed
    }

    /// Gets mempool size
    pub async fn size(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Clears the mempool
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
