// src/storage.rs

//! Content-addressed block storage.
//!
//! Blocks are kept in their canonical encoding so that transaction regions
//! recorded by the indexes can be resolved to bytes without re-encoding.

use crate::block::{Block, BlockRegion};
use crate::errors::{CoreError, Result};
use crate::types::Hash;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// In-memory block store for development and testing
#[derive(Clone)]
pub struct MemoryStorage {
    /// Encoded blocks indexed by their hash
    blocks: Arc<RwLock<HashMap<Hash, Arc<Vec<u8>>>>>,
}

impl MemoryStorage {
    /// Creates a new empty in-memory storage
    pub fn new() -> Self {
        Self {
            blocks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Stores a block under its hash
    ///
    /// Storing the same block twice is a no-op; the content address
    /// guarantees the bytes are identical.
    pub fn store_block(&self, block: &Block) -> Result<Hash> {
        let hash = block.hash();
        let bytes = block.to_bytes();

        let mut blocks = self
            .blocks
            .write()
            .map_err(|e| CoreError::StorageError(format!("Lock poisoned: {}", e)))?;

        blocks.entry(hash).or_insert_with(|| Arc::new(bytes));
        Ok(hash)
    }

    /// Drops a block, returning whether it was present
    pub fn remove_block(&self, hash: &Hash) -> Result<bool> {
        let mut blocks = self
            .blocks
            .write()
            .map_err(|e| CoreError::StorageError(format!("Lock poisoned: {}", e)))?;

        Ok(blocks.remove(hash).is_some())
    }

    /// Retrieves and decodes a block
    pub fn get_block(&self, hash: &Hash) -> Result<Block> {
        let bytes = self.get_block_bytes(hash)?;
        Block::from_bytes(&bytes)
    }

    /// Retrieves the canonical encoding of a block
    pub fn get_block_bytes(&self, hash: &Hash) -> Result<Arc<Vec<u8>>> {
        let blocks = self
            .blocks
            .read()
            .map_err(|e| CoreError::StorageError(format!("Lock poisoned: {}", e)))?;

        blocks
            .get(hash)
            .cloned()
            .ok_or(CoreError::BlockNotFound(*hash))
    }

    /// Reads the bytes a region points at
    pub fn fetch_region(&self, region: &BlockRegion) -> Result<Vec<u8>> {
        let bytes = self.get_block_bytes(&region.block_hash)?;
        let size = bytes.len() as u64;

        let out_of_bounds = CoreError::RegionOutOfBounds {
            block_hash: region.block_hash,
            offset: region.offset,
            len: region.len,
            size,
        };

        let end = region
            .offset
            .checked_add(region.len)
            .ok_or_else(|| out_of_bounds.clone())?;
        if end > size {
            return Err(out_of_bounds);
        }

        Ok(bytes[region.offset as usize..end as usize].to_vec())
    }

    /// Checks if a block exists
    pub fn has_block(&self, hash: &Hash) -> Result<bool> {
        let blocks = self
            .blocks
            .read()
            .map_err(|e| CoreError::StorageError(format!("Lock poisoned: {}", e)))?;

        Ok(blocks.contains_key(hash))
    }

    /// Returns the total number of stored blocks
    pub fn block_count(&self) -> Result<usize> {
        let blocks = self
            .blocks
            .read()
            .map_err(|e| CoreError::StorageError(format!("Lock poisoned: {}", e)))?;

        Ok(blocks.len())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockHeader;
    use crate::transaction::{ScriptPublicKey, Transaction, TxOutput};
    use crate::types::SUBNETWORK_ID_COINBASE;

    fn create_test_block(nonce: u64) -> Block {
        let coinbase = Transaction::new(
            0,
            vec![],
            vec![TxOutput {
                value: 5,
                script_public_key: ScriptPublicKey::new(0, vec![nonce as u8]),
            }],
            0,
            SUBNETWORK_ID_COINBASE,
            0,
            vec![],
        );
        let transactions = vec![coinbase];
        Block::new(
            BlockHeader {
                version: 1,
                parents: vec![],
                hash_merkle_root: Block::calculate_merkle_root(&transactions),
                timestamp: 0,
                bits: 0,
                nonce,
            },
            transactions,
        )
    }

    #[test]
    fn test_store_and_retrieve() {
        let storage = MemoryStorage::new();
        let block = create_test_block(1);

        let hash = storage.store_block(&block).unwrap();
        assert_eq!(hash, block.hash());
        assert!(storage.has_block(&hash).unwrap());
        assert_eq!(storage.get_block(&hash).unwrap(), block);

        storage.store_block(&block).unwrap();
        assert_eq!(storage.block_count().unwrap(), 1);
    }

    #[test]
    fn test_remove_block() {
        let storage = MemoryStorage::new();
        let block = create_test_block(4);
        let hash = storage.store_block(&block).unwrap();

        assert!(storage.remove_block(&hash).unwrap());
        assert!(!storage.has_block(&hash).unwrap());
        assert!(!storage.remove_block(&hash).unwrap());
        assert_eq!(storage.block_count().unwrap(), 0);
    }

    #[test]
    fn test_missing_block() {
        let storage = MemoryStorage::new();
        assert_eq!(
            storage.get_block(&[3u8; 32]),
            Err(CoreError::BlockNotFound([3u8; 32]))
        );
    }

    #[test]
    fn test_fetch_region() {
        let storage = MemoryStorage::new();
        let block = create_test_block(2);
        storage.store_block(&block).unwrap();

        let (_, region) = block.transaction_regions()[0];
        assert_eq!(
            storage.fetch_region(&region).unwrap(),
            block.transactions[0].to_bytes()
        );

        let past_end = BlockRegion {
            offset: region.offset + 1,
            ..region
        };
        assert!(matches!(
            storage.fetch_region(&past_end),
            Err(CoreError::RegionOutOfBounds { .. })
        ));

        let overflowing = BlockRegion {
            offset: u64::MAX,
            len: 2,
            ..region
        };
        assert!(storage.fetch_region(&overflowing).is_err());
    }
}
