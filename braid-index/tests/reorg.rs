// tests/reorg.rs

//! Integration tests for the transaction index under chain reorganization.
//!
//! Blocks are produced by the development consensus, which drives the
//! indexer manager exactly like the node does.
//!
//! ```text
//!          +-- 3 ---------------+
//!          |                    |
//! G - 1 - 2                     5
//!          |                    |
//!          +-- 3A --- 4 --------+
//! ```
//!
//! Block 3 and block 3A both carry the same transfer. Once 4 and 5 arrive
//! the selected chain runs through 3A, so the transfer must be reported as
//! accepted by 3A while its first-seen region stays in block 3.

use braid_core::{
    Block, CoinbaseData, ConsensusApi, ConsensusError, ConsensusParams, DagProcessor, Hash,
    MemoryStorage, Outpoint, ScriptPublicKey, Transaction, TxInput, TxOutput,
    SUBNETWORK_ID_NATIVE,
};
use braid_index::{Indexer, IndexError, IndexerManager, Result, TxIndex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn transfer(seed: u8) -> Transaction {
    Transaction::new(
        0,
        vec![TxInput {
            previous_outpoint: Outpoint {
                transaction_id: [seed; 32],
                index: 0,
            },
            signature_script: vec![seed; 64],
            sequence: u64::MAX,
        }],
        vec![TxOutput {
            value: 1_000 + seed as u64,
            script_public_key: ScriptPublicKey::new(0, vec![0x20, seed, 0xac]),
        }],
        0,
        SUBNETWORK_ID_NATIVE,
        0,
        Vec::new(),
    )
}

fn miner(tag: &str) -> CoinbaseData {
    CoinbaseData {
        script_public_key: ScriptPublicKey::new(0, vec![0x51]),
        extra_data: tag.as_bytes().to_vec(),
    }
}

fn mine(dag: &DagProcessor, parents: Vec<Hash>, tag: &str, txs: Vec<Transaction>) -> Block {
    let block = dag
        .build_block_with_parents(parents, &miner(tag), txs, 1_700_000_000_000)
        .unwrap();
    dag.validate_and_insert_block(block.clone()).unwrap();
    block
}

fn indexed_dag() -> (DagProcessor, Arc<TxIndex>) {
    let txindex = Arc::new(TxIndex::new());
    let manager = IndexerManager::new(vec![txindex.clone() as Arc<dyn Indexer>]);
    let dag = DagProcessor::with_event_sink(
        ConsensusParams::devnet(),
        MemoryStorage::new(),
        Arc::new(manager),
    )
    .unwrap();
    (dag, txindex)
}

/// Every transaction of every block agrees with consensus
fn assert_matches_consensus(dag: &DagProcessor, txindex: &TxIndex, blocks: &[&Block]) {
    for block in blocks {
        for tx in &block.transactions {
            let id = tx.id();
            let expected = dag.accepting_block(&id).unwrap();
            match txindex.block_that_accepted_tx(&id) {
                Ok(accepting) => assert_eq!(Some(accepting), expected),
                Err(IndexError::NotFound(_)) => assert_eq!(expected, None),
                Err(e) => panic!("unexpected index error: {}", e),
            }
        }
    }
}

#[test]
fn test_accepting_block_follows_reorg() {
    println!("\n=== Test: Accepting Block Follows Reorg ===");

    let (dag, txindex) = indexed_dag();
    let genesis = dag.selected_tip_hash().unwrap();
    let block3_tx = transfer(3);

    let block1 = mine(&dag, vec![genesis], "1", vec![]);
    let block2 = mine(&dag, vec![block1.hash()], "2", vec![]);
    let block3 = mine(&dag, vec![block2.hash()], "3", vec![block3_tx.clone()]);

    assert_eq!(
        txindex.block_that_accepted_tx(&block3_tx.id()).unwrap(),
        block3.hash()
    );
    println!("✓ Transfer accepted by block 3");

    let block3a = mine(&dag, vec![block2.hash()], "3A", vec![block3_tx.clone()]);
    let block4 = mine(&dag, vec![block3a.hash()], "4", vec![]);
    let block5 = mine(&dag, vec![block4.hash(), block3.hash()], "5", vec![]);

    assert_eq!(
        dag.selected_chain().unwrap(),
        vec![
            genesis,
            block1.hash(),
            block2.hash(),
            block3a.hash(),
            block4.hash(),
            block5.hash()
        ]
    );
    assert_eq!(
        txindex.block_that_accepted_tx(&block3_tx.id()).unwrap(),
        block3a.hash()
    );
    println!("✓ Transfer accepted by block 3A after reorg");

    // Block 3 is merged by block 5, which now accepts its coinbase
    assert_eq!(
        txindex
            .block_that_accepted_tx(&block3.transactions[0].id())
            .unwrap(),
        block5.hash()
    );

    assert_matches_consensus(
        &dag,
        &txindex,
        &[&block1, &block2, &block3, &block3a, &block4, &block5],
    );
    println!("✓ Index agrees with consensus for every transaction");
}

#[test]
fn test_first_seen_region_survives_reorg() {
    println!("\n=== Test: First Seen Region Survives Reorg ===");

    let (dag, txindex) = indexed_dag();
    let genesis = dag.selected_tip_hash().unwrap();
    let block3_tx = transfer(3);

    let block1 = mine(&dag, vec![genesis], "1", vec![]);
    let block2 = mine(&dag, vec![block1.hash()], "2", vec![]);
    let block3 = mine(&dag, vec![block2.hash()], "3", vec![block3_tx.clone()]);
    let region_before = txindex.tx_first_block_region(&block3_tx.id()).unwrap();

    let block3a = mine(&dag, vec![block2.hash()], "3A", vec![block3_tx.clone()]);
    let block4 = mine(&dag, vec![block3a.hash()], "4", vec![]);
    mine(&dag, vec![block4.hash(), block3.hash()], "5", vec![]);

    let region = txindex.tx_first_block_region(&block3_tx.id()).unwrap();
    assert_eq!(region, region_before);
    assert_eq!(region.block_hash, block3.hash());

    let bytes = dag.storage().fetch_region(&region).unwrap();
    assert_eq!(bytes, block3_tx.to_bytes());
    assert_eq!(Transaction::from_bytes(&bytes).unwrap(), block3_tx);
    println!("✓ Region still resolves to the transfer's encoding in block 3");
}

#[test]
fn test_transaction_dropped_from_chain_is_not_found() {
    let (dag, txindex) = indexed_dag();
    let genesis = dag.selected_tip_hash().unwrap();
    let orphaned = transfer(9);

    let short = mine(&dag, vec![genesis], "short", vec![orphaned.clone()]);
    assert_eq!(
        txindex.block_that_accepted_tx(&orphaned.id()).unwrap(),
        short.hash()
    );

    let long1 = mine(&dag, vec![genesis], "long1", vec![]);
    let long2 = mine(&dag, vec![long1.hash()], "long2", vec![]);
    mine(&dag, vec![long2.hash()], "long3", vec![]);

    assert!(matches!(
        txindex.block_that_accepted_tx(&orphaned.id()),
        Err(IndexError::NotFound(_))
    ));
    assert_eq!(
        txindex.tx_first_block_region(&orphaned.id()).unwrap().block_hash,
        short.hash()
    );
}

#[test]
fn test_snapshot_matches_replay() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("txindex.bin");

    let (dag, txindex) = indexed_dag();
    let genesis = dag.selected_tip_hash().unwrap();
    let tx = transfer(4);
    let block1 = mine(&dag, vec![genesis], "1", vec![tx.clone()]);
    let block2 = mine(&dag, vec![genesis], "2", vec![]);
    let block3 = mine(&dag, vec![block1.hash(), block2.hash()], "3", vec![]);

    let checkpoint = dag.checkpoint().unwrap();
    txindex.save_snapshot(&path, checkpoint).unwrap();
    let restored = TxIndex::open_at_checkpoint(&path, &checkpoint)
        .unwrap()
        .expect("snapshot taken at the current checkpoint");

    assert_matches_consensus(&dag, &restored, &[&block1, &block2, &block3]);
    assert_eq!(restored.stats().unwrap(), txindex.stats().unwrap());
}

struct FlakyIndexer {
    fail: AtomicBool,
}

impl Indexer for FlakyIndexer {
    fn name(&self) -> &str {
        "flaky"
    }

    fn connect_block(&self, _block: &Block, _accepted: &[braid_core::TransactionId]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IndexError::StorageError("flaky indexer is down".to_string()));
        }
        Ok(())
    }

    fn disconnect_block(
        &self,
        _block: &Block,
        _reassigned: &[braid_core::AcceptanceChange],
    ) -> Result<()> {
        Ok(())
    }
}

#[test]
fn test_indexer_failure_rejects_block() {
    let txindex = Arc::new(TxIndex::new());
    let flaky = Arc::new(FlakyIndexer {
        fail: AtomicBool::new(false),
    });
    let manager = IndexerManager::new(vec![
        txindex.clone() as Arc<dyn Indexer>,
        flaky.clone() as Arc<dyn Indexer>,
    ]);
    let dag = DagProcessor::with_event_sink(
        ConsensusParams::devnet(),
        MemoryStorage::new(),
        Arc::new(manager),
    )
    .unwrap();
    let genesis = dag.selected_tip_hash().unwrap();

    flaky.fail.store(true, Ordering::SeqCst);
    let block = dag
        .build_block_with_parents(vec![genesis], &miner("x"), vec![transfer(1)], 0)
        .unwrap();
    let result = dag.validate_and_insert_block(block.clone());

    match result {
        Err(ConsensusError::Indexing(message)) => assert!(message.contains("flaky")),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(dag.selected_tip_hash().unwrap(), genesis);
    assert_eq!(dag.block_count().unwrap(), 1);
    assert!(!dag.storage().has_block(&block.hash()).unwrap());

    // Once the indexer recovers the same block goes through
    flaky.fail.store(false, Ordering::SeqCst);
    dag.validate_and_insert_block(block.clone()).unwrap();
    assert!(dag.storage().has_block(&block.hash()).unwrap());
    assert_eq!(
        txindex.block_that_accepted_tx(&transfer(1).id()).unwrap(),
        block.hash()
    );
}
