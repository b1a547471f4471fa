// src/block.rs

//! Blocks and transaction byte regions.
//!
//! The canonical block encoding is the bincode encoding of [`Block`]: the
//! header, the transaction count as a `u64`, then every transaction in its
//! standalone encoding. A transaction therefore occupies a contiguous
//! [`BlockRegion`] whose bytes are exactly [`Transaction::to_bytes`].

use crate::errors::{CoreError, Result};
use crate::transaction::Transaction;
use crate::types::{Hash, Timestamp, TransactionId};
use serde::{Deserialize, Serialize};

/// Size of the transaction count prefix in the canonical encoding
const TX_COUNT_PREFIX_LEN: u64 = 8;

/// Block header
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    /// Header version
    pub version: u16,

    /// Ordered parent block hashes
    pub parents: Vec<Hash>,

    /// Merkle root over the transaction ids
    pub hash_merkle_root: Hash,

    /// Milliseconds since the Unix epoch
    pub timestamp: Timestamp,

    /// Compact difficulty target
    pub bits: u32,

    /// Proof of work nonce
    pub nonce: u64,
}

impl BlockHeader {
    /// Block hash: BLAKE3 over the encoded header
    pub fn hash(&self) -> Hash {
        let serialized =
            bincode::serialize(self).expect("Header serialization should never fail");
        braid_crypto::hash::blake3_hash(&serialized)
    }
}

/// A block: header plus ordered transactions, coinbase first
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    /// Block header
    pub header: BlockHeader,

    /// Ordered transactions
    pub transactions: Vec<Transaction>,
}

/// Byte range of one transaction inside a block's canonical encoding
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BlockRegion {
    /// Block holding the bytes
    pub block_hash: Hash,

    /// Offset from the start of the encoded block
    pub offset: u64,

    /// Length of the encoded transaction
    pub len: u64,
}

impl Block {
    /// Creates a block from a header and its transactions
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// Block hash
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Canonical encoding of the whole block
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("Block serialization should never fail")
    }

    /// Decodes a block from its canonical encoding
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| CoreError::SerializationError(e.to_string()))
    }

    /// The coinbase transaction, if the first transaction is one
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    /// Ids of all transactions in block order
    pub fn transaction_ids(&self) -> Vec<TransactionId> {
        self.transactions.iter().map(Transaction::id).collect()
    }

    /// Merkle root over the ids of `transactions`
    pub fn calculate_merkle_root(transactions: &[Transaction]) -> Hash {
        let ids: Vec<Hash> = transactions.iter().map(Transaction::id).collect();
        braid_crypto::hash::merkle_root(&ids)
    }

    /// Whether the header commits to the carried transactions
    pub fn has_valid_merkle_root(&self) -> bool {
        self.header.hash_merkle_root == Self::calculate_merkle_root(&self.transactions)
    }

    /// Region of every transaction, in block order
    pub fn transaction_regions(&self) -> Vec<(TransactionId, BlockRegion)> {
        let block_hash = self.hash();
        let mut offset = bincode::serialized_size(&self.header)
            .expect("Header serialization should never fail")
            + TX_COUNT_PREFIX_LEN;

        self.transactions
            .iter()
            .map(|tx| {
                let len = tx.encoded_len();
                let region = BlockRegion {
                    block_hash,
                    offset,
                    len,
                };
                offset += len;
                (tx.id(), region)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{Outpoint, ScriptPublicKey, TxInput, TxOutput};
    use crate::types::{SUBNETWORK_ID_COINBASE, SUBNETWORK_ID_NATIVE};

    fn create_test_block() -> Block {
        let coinbase = Transaction::new(
            0,
            vec![],
            vec![TxOutput {
                value: 50,
                script_public_key: ScriptPublicKey::new(0, vec![1, 2, 3]),
            }],
            0,
            SUBNETWORK_ID_COINBASE,
            0,
            vec![9; 19],
        );
        let spend = Transaction::new(
            0,
            vec![TxInput {
                previous_outpoint: Outpoint {
                    transaction_id: [4u8; 32],
                    index: 1,
                },
                signature_script: vec![5; 70],
                sequence: u64::MAX,
            }],
            vec![TxOutput {
                value: 10,
                script_public_key: ScriptPublicKey::new(0, vec![6]),
            }],
            0,
            SUBNETWORK_ID_NATIVE,
            0,
            vec![],
        );
        let transactions = vec![coinbase, spend];
        let header = BlockHeader {
            version: 1,
            parents: vec![[1u8; 32], [2u8; 32]],
            hash_merkle_root: Block::calculate_merkle_root(&transactions),
            timestamp: 1_700_000_000_000,
            bits: 0x207fffff,
            nonce: 7,
        };
        Block::new(header, transactions)
    }

    #[test]
    fn test_regions_slice_canonical_encoding() {
        let block = create_test_block();
        let bytes = block.to_bytes();

        for (tx, (id, region)) in block.transactions.iter().zip(block.transaction_regions()) {
            assert_eq!(id, tx.id());
            assert_eq!(region.block_hash, block.hash());
            let start = region.offset as usize;
            let end = start + region.len as usize;
            assert_eq!(&bytes[start..end], tx.to_bytes().as_slice());
        }
    }

    #[test]
    fn test_last_region_ends_at_block_end() {
        let block = create_test_block();
        let (_, last) = *block.transaction_regions().last().unwrap();
        assert_eq!(last.offset + last.len, block.to_bytes().len() as u64);
    }

    #[test]
    fn test_block_decode() {
        let block = create_test_block();
        assert_eq!(Block::from_bytes(&block.to_bytes()).unwrap(), block);
    }

    #[test]
    fn test_coinbase_and_merkle() {
        let mut block = create_test_block();
        assert!(block.coinbase().is_some());
        assert!(block.has_valid_merkle_root());

        block.transactions.swap(0, 1);
        assert!(block.coinbase().is_none());
        assert!(!block.has_valid_merkle_root());
    }

    #[test]
    fn test_hash_covers_header_only() {
        let block = create_test_block();
        let mut other = block.clone();
        other.transactions.pop();
        assert_eq!(block.hash(), other.hash());

        other.header.nonce += 1;
        assert_ne!(block.hash(), other.hash());
    }
}
