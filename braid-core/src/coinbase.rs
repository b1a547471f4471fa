// src/coinbase.rs

//! Coinbase construction and validation.
//!
//! The expected coinbase of a block is a pure function of the block's
//! merge set and the miner supplied [`CoinbaseData`]. Every honest node
//! must produce byte-identical output, so only checked integer arithmetic
//! is used and merged blocks are always visited in hash order.
//!
//! Payload layout (little endian):
//!
//! | field          | size         |
//! |----------------|--------------|
//! | blue score     | 8            |
//! | subsidy        | 8            |
//! | script version | 2            |
//! | script length  | 1            |
//! | script         | script length|
//! | extra data     | remainder    |

use crate::consensus::{MergeSetSnapshot, MergeSetSource, MergedBlock};
use crate::errors::{CoinbaseError, CoinbaseResult};
use crate::params::ConsensusParams;
use crate::transaction::{ScriptPublicKey, Transaction, TxOutput};
use crate::types::{Hash, SUBNETWORK_ID_COINBASE};
use serde::{Deserialize, Serialize};

/// Version of generated coinbase transactions
pub const COINBASE_TRANSACTION_VERSION: u16 = 0;

/// Highest script public key version a payout may use
pub const MAX_SCRIPT_PUBLIC_KEY_VERSION: u16 = 0;

/// Bytes preceding the script in a coinbase payload
const PAYLOAD_FIXED_LEN: usize = 8 + 8 + 2 + 1;

/// After this many halvings the subsidy is zero
const MAX_HALVINGS: u64 = 64;

/// Miner supplied payout template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinbaseData {
    /// Script receiving the miner's reward
    pub script_public_key: ScriptPublicKey,

    /// Arbitrary miner data
    pub extra_data: Vec<u8>,
}

/// Decoded coinbase payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinbasePayload {
    /// Blue score of the block carrying the coinbase
    pub blue_score: u64,

    /// Subsidy of that block
    pub subsidy: u64,

    /// Miner payout template
    pub coinbase_data: CoinbaseData,
}

/// Stateless coinbase rules of a network
#[derive(Debug, Clone)]
pub struct CoinbaseManager {
    base_subsidy: u64,
    subsidy_halving_interval: u64,
    max_coinbase_script_len: usize,
    max_coinbase_extra_data_len: usize,
}

impl CoinbaseManager {
    /// Creates the coinbase rules for `params`
    pub fn new(params: &ConsensusParams) -> Self {
        Self {
            base_subsidy: params.base_subsidy,
            subsidy_halving_interval: params.subsidy_halving_interval,
            max_coinbase_script_len: params.max_coinbase_script_len,
            max_coinbase_extra_data_len: params.max_coinbase_extra_data_len,
        }
    }

    /// Expected coinbase of `block_hash` paying the miner per `coinbase_data`
    ///
    /// # Errors
    /// * [`CoinbaseError::UnknownBlock`] when the source has no merge set for the block
    /// * [`CoinbaseError::InvalidPayout`] when `coinbase_data` violates the limits
    /// * [`CoinbaseError::RewardOverflow`] when a reward sum overflows
    pub fn expected_coinbase_transaction<S: MergeSetSource + ?Sized>(
        &self,
        source: &S,
        block_hash: &Hash,
        coinbase_data: &CoinbaseData,
    ) -> CoinbaseResult<Transaction> {
        self.validate_coinbase_data(coinbase_data)?;

        let snapshot = source
            .merge_set(block_hash)
            .map_err(|e| CoinbaseError::MergeSetUnavailable(e.to_string()))?
            .ok_or(CoinbaseError::UnknownBlock(*block_hash))?;

        self.coinbase_for_merge_set(&snapshot, coinbase_data)
    }

    /// Coinbase for an already fetched merge set
    pub fn coinbase_for_merge_set(
        &self,
        snapshot: &MergeSetSnapshot,
        coinbase_data: &CoinbaseData,
    ) -> CoinbaseResult<Transaction> {
        self.validate_coinbase_data(coinbase_data)?;

        let mut outputs = Vec::with_capacity(snapshot.blues.len() + 1);
        for blue in sorted_unique(&snapshot.blues) {
            let reward = self.merged_block_reward(blue)?;
            if reward == 0 {
                continue;
            }
            outputs.push(TxOutput {
                value: reward,
                script_public_key: blue.script_public_key.clone(),
            });
        }

        let red_reward = sorted_unique(&snapshot.reds)
            .into_iter()
            .try_fold(0u64, |acc, red| {
                let reward = self.merged_block_reward(red)?;
                acc.checked_add(reward).ok_or(CoinbaseError::RewardOverflow)
            })?;
        if red_reward > 0 {
            outputs.push(TxOutput {
                value: red_reward,
                script_public_key: coinbase_data.script_public_key.clone(),
            });
        }

        outputs
            .iter()
            .try_fold(0u64, |acc, output| acc.checked_add(output.value))
            .ok_or(CoinbaseError::RewardOverflow)?;

        let subsidy = self.calc_block_subsidy(snapshot.blue_score);
        let payload = self.serialize_coinbase_payload(snapshot.blue_score, subsidy, coinbase_data)?;

        Ok(Transaction::new(
            COINBASE_TRANSACTION_VERSION,
            Vec::new(),
            outputs,
            0,
            SUBNETWORK_ID_COINBASE,
            0,
            payload,
        ))
    }

    /// Subsidy of a block with the given blue score
    pub fn calc_block_subsidy(&self, blue_score: u64) -> u64 {
        if self.subsidy_halving_interval == 0 {
            return self.base_subsidy;
        }

        let halvings = blue_score / self.subsidy_halving_interval;
        if halvings >= MAX_HALVINGS {
            0
        } else {
            self.base_subsidy >> halvings
        }
    }

    /// Checks miner payout data against the network limits
    pub fn validate_coinbase_data(&self, coinbase_data: &CoinbaseData) -> CoinbaseResult<()> {
        let script = &coinbase_data.script_public_key;

        if script.version > MAX_SCRIPT_PUBLIC_KEY_VERSION {
            return Err(CoinbaseError::InvalidPayout(format!(
                "unknown script public key version {}",
                script.version
            )));
        }

        let max_script_len = self.max_coinbase_script_len.min(u8::MAX as usize);
        if script.script.len() > max_script_len {
            return Err(CoinbaseError::InvalidPayout(format!(
                "script of {} bytes exceeds the limit of {}",
                script.script.len(),
                max_script_len
            )));
        }

        if coinbase_data.extra_data.len() > self.max_coinbase_extra_data_len {
            return Err(CoinbaseError::InvalidPayout(format!(
                "extra data of {} bytes exceeds the limit of {}",
                coinbase_data.extra_data.len(),
                self.max_coinbase_extra_data_len
            )));
        }

        Ok(())
    }

    /// Encodes a coinbase payload
    pub fn serialize_coinbase_payload(
        &self,
        blue_score: u64,
        subsidy: u64,
        coinbase_data: &CoinbaseData,
    ) -> CoinbaseResult<Vec<u8>> {
        self.validate_coinbase_data(coinbase_data)?;

        let script = &coinbase_data.script_public_key;
        let script_len = u8::try_from(script.script.len()).map_err(|_| {
            CoinbaseError::InvalidPayout(format!("script of {} bytes", script.script.len()))
        })?;

        let mut payload = Vec::with_capacity(
            PAYLOAD_FIXED_LEN + script.script.len() + coinbase_data.extra_data.len(),
        );
        payload.extend_from_slice(&blue_score.to_le_bytes());
        payload.extend_from_slice(&subsidy.to_le_bytes());
        payload.extend_from_slice(&script.version.to_le_bytes());
        payload.push(script_len);
        payload.extend_from_slice(&script.script);
        payload.extend_from_slice(&coinbase_data.extra_data);
        Ok(payload)
    }

    /// Decodes the payload of a coinbase transaction
    pub fn extract_coinbase_data(&self, coinbase: &Transaction) -> CoinbaseResult<CoinbasePayload> {
        if !coinbase.is_coinbase() {
            return Err(CoinbaseError::MalformedCoinbase(
                "transaction is not on the coinbase subnetwork".to_string(),
            ));
        }

        let payload = &coinbase.payload;
        if payload.len() < PAYLOAD_FIXED_LEN {
            return Err(CoinbaseError::MalformedCoinbase(format!(
                "payload of {} bytes is shorter than the {} byte header",
                payload.len(),
                PAYLOAD_FIXED_LEN
            )));
        }

        let blue_score = u64::from_le_bytes(read_array(&payload[0..8])?);
        let subsidy = u64::from_le_bytes(read_array(&payload[8..16])?);
        let version = u16::from_le_bytes(read_array(&payload[16..18])?);
        let script_len = payload[18] as usize;

        let script_end = PAYLOAD_FIXED_LEN + script_len;
        if payload.len() < script_end {
            return Err(CoinbaseError::MalformedCoinbase(format!(
                "script length {} runs past the payload end",
                script_len
            )));
        }

        let coinbase_data = CoinbaseData {
            script_public_key: ScriptPublicKey::new(
                version,
                payload[PAYLOAD_FIXED_LEN..script_end].to_vec(),
            ),
            extra_data: payload[script_end..].to_vec(),
        };

        Ok(CoinbasePayload {
            blue_score,
            subsidy,
            coinbase_data,
        })
    }

    /// Checks a submitted coinbase against the expected one for `block_hash`
    pub fn validate_coinbase<S: MergeSetSource + ?Sized>(
        &self,
        source: &S,
        block_hash: &Hash,
        coinbase: &Transaction,
    ) -> CoinbaseResult<()> {
        let payload = self.extract_coinbase_data(coinbase)?;
        let expected =
            self.expected_coinbase_transaction(source, block_hash, &payload.coinbase_data)?;
        ensure_identical(&expected, coinbase)
    }

    /// Checks a submitted coinbase against an already fetched merge set
    pub fn validate_coinbase_for_merge_set(
        &self,
        snapshot: &MergeSetSnapshot,
        coinbase: &Transaction,
    ) -> CoinbaseResult<()> {
        let payload = self.extract_coinbase_data(coinbase)?;
        let expected = self.coinbase_for_merge_set(snapshot, &payload.coinbase_data)?;
        ensure_identical(&expected, coinbase)
    }

    fn merged_block_reward(&self, block: &MergedBlock) -> CoinbaseResult<u64> {
        self.calc_block_subsidy(block.blue_score)
            .checked_add(block.total_fees)
            .ok_or(CoinbaseError::RewardOverflow)
    }
}

fn ensure_identical(expected: &Transaction, actual: &Transaction) -> CoinbaseResult<()> {
    if expected.to_bytes() != actual.to_bytes() {
        return Err(CoinbaseError::Mismatch {
            expected: expected.id(),
            actual: actual.id(),
        });
    }
    Ok(())
}

fn read_array<const N: usize>(bytes: &[u8]) -> CoinbaseResult<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| CoinbaseError::MalformedCoinbase("truncated payload field".to_string()))
}

/// Merged blocks ordered by hash with duplicates dropped
fn sorted_unique(blocks: &[MergedBlock]) -> Vec<&MergedBlock> {
    let mut sorted: Vec<&MergedBlock> = blocks.iter().collect();
    sorted.sort_by(|a, b| a.hash.cmp(&b.hash));
    sorted.dedup_by(|a, b| a.hash == b.hash);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ConsensusResult;
    use rand::seq::SliceRandom;
    use std::collections::HashMap;

    struct FixedSource(HashMap<Hash, MergeSetSnapshot>);

    impl MergeSetSource for FixedSource {
        fn merge_set(&self, block_hash: &Hash) -> ConsensusResult<Option<MergeSetSnapshot>> {
            Ok(self.0.get(block_hash).cloned())
        }
    }

    fn manager() -> CoinbaseManager {
        CoinbaseManager::new(&ConsensusParams::devnet())
    }

    fn merged(seed: u8, blue_score: u64, total_fees: u64) -> MergedBlock {
        MergedBlock {
            hash: [seed; 32],
            blue_score,
            total_fees,
            script_public_key: ScriptPublicKey::new(0, vec![seed; 3]),
        }
    }

    fn miner_data() -> CoinbaseData {
        CoinbaseData {
            script_public_key: ScriptPublicKey::new(0, vec![0xaa; 34]),
            extra_data: b"braid-miner/0.1".to_vec(),
        }
    }

    fn snapshot() -> MergeSetSnapshot {
        MergeSetSnapshot {
            blue_score: 12,
            blues: vec![merged(3, 9, 100), merged(1, 10, 0), merged(2, 11, 7)],
            reds: vec![merged(9, 8, 5), merged(8, 8, 0)],
        }
    }

    #[test]
    fn test_subsidy_schedule() {
        let manager = manager();
        let base = ConsensusParams::devnet().base_subsidy;
        let interval = ConsensusParams::devnet().subsidy_halving_interval;

        assert_eq!(manager.calc_block_subsidy(0), base);
        assert_eq!(manager.calc_block_subsidy(interval - 1), base);
        assert_eq!(manager.calc_block_subsidy(interval), base / 2);
        assert_eq!(manager.calc_block_subsidy(3 * interval), base / 8);
        assert_eq!(manager.calc_block_subsidy(64 * interval), 0);
        assert_eq!(manager.calc_block_subsidy(u64::MAX), 0);
    }

    #[test]
    fn test_outputs_follow_hash_order_and_reds_go_to_miner() {
        let manager = manager();
        let subsidy = ConsensusParams::devnet().base_subsidy;
        let tx = manager
            .coinbase_for_merge_set(&snapshot(), &miner_data())
            .unwrap();

        let values: Vec<u64> = tx.outputs.iter().map(|o| o.value).collect();
        assert_eq!(
            values,
            vec![subsidy, subsidy + 7, subsidy + 100, 2 * subsidy + 5]
        );

        let scripts: Vec<&[u8]> = tx
            .outputs
            .iter()
            .map(|o| o.script_public_key.script.as_slice())
            .collect();
        assert_eq!(scripts[0], &[1u8; 3][..]);
        assert_eq!(scripts[1], &[2u8; 3][..]);
        assert_eq!(scripts[2], &[3u8; 3][..]);
        assert_eq!(scripts[3], miner_data().script_public_key.script.as_slice());

        assert!(tx.is_coinbase());
        assert!(tx.inputs.is_empty());
        assert_eq!(tx.version, COINBASE_TRANSACTION_VERSION);
        assert_eq!(tx.lock_time, 0);
        assert_eq!(tx.gas, 0);
    }

    #[test]
    fn test_deterministic_under_input_order() {
        let manager = manager();
        let expected = manager
            .coinbase_for_merge_set(&snapshot(), &miner_data())
            .unwrap();
        assert_eq!(
            manager.coinbase_for_merge_set(&snapshot(), &miner_data()).unwrap(),
            expected
        );

        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let mut shuffled = snapshot();
            shuffled.blues.shuffle(&mut rng);
            shuffled.reds.shuffle(&mut rng);
            let tx = manager.coinbase_for_merge_set(&shuffled, &miner_data()).unwrap();
            assert_eq!(tx.to_bytes(), expected.to_bytes());
        }
    }

    #[test]
    fn test_duplicates_and_zero_rewards_are_dropped() {
        let mut params = ConsensusParams::devnet();
        params.subsidy_halving_interval = 1;
        let manager = CoinbaseManager::new(&params);

        let snapshot = MergeSetSnapshot {
            blue_score: 200,
            blues: vec![merged(1, 100, 0), merged(2, 100, 4), merged(2, 100, 4)],
            reds: vec![],
        };
        let tx = manager.coinbase_for_merge_set(&snapshot, &miner_data()).unwrap();

        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].value, 4);
    }

    #[test]
    fn test_reward_overflow() {
        let manager = manager();
        let snapshot = MergeSetSnapshot {
            blue_score: 1,
            blues: vec![merged(1, 0, u64::MAX)],
            reds: vec![],
        };
        assert_eq!(
            manager.coinbase_for_merge_set(&snapshot, &miner_data()),
            Err(CoinbaseError::RewardOverflow)
        );

        let snapshot = MergeSetSnapshot {
            blue_score: 1,
            blues: vec![merged(1, 0, u64::MAX / 2), merged(2, 0, u64::MAX / 2)],
            reds: vec![],
        };
        assert_eq!(
            manager.coinbase_for_merge_set(&snapshot, &miner_data()),
            Err(CoinbaseError::RewardOverflow)
        );
    }

    #[test]
    fn test_invalid_payout() {
        let manager = manager();

        let mut data = miner_data();
        data.script_public_key.script = vec![0; 151];
        assert!(matches!(
            manager.coinbase_for_merge_set(&snapshot(), &data),
            Err(CoinbaseError::InvalidPayout(_))
        ));

        let mut data = miner_data();
        data.extra_data = vec![0; 151];
        assert!(matches!(
            manager.validate_coinbase_data(&data),
            Err(CoinbaseError::InvalidPayout(_))
        ));

        let mut data = miner_data();
        data.script_public_key.version = MAX_SCRIPT_PUBLIC_KEY_VERSION + 1;
        assert!(matches!(
            manager.validate_coinbase_data(&data),
            Err(CoinbaseError::InvalidPayout(_))
        ));

        let mut data = miner_data();
        data.script_public_key.script = vec![0; 150];
        data.extra_data = vec![0; 150];
        assert!(manager.validate_coinbase_data(&data).is_ok());
    }

    #[test]
    fn test_unknown_block() {
        let manager = manager();
        let source = FixedSource(HashMap::new());
        assert_eq!(
            manager.expected_coinbase_transaction(&source, &[5u8; 32], &miner_data()),
            Err(CoinbaseError::UnknownBlock([5u8; 32]))
        );
    }

    #[test]
    fn test_extract_payload() {
        let manager = manager();
        let tx = manager
            .coinbase_for_merge_set(&snapshot(), &miner_data())
            .unwrap();

        let payload = manager.extract_coinbase_data(&tx).unwrap();
        assert_eq!(payload.blue_score, 12);
        assert_eq!(payload.subsidy, manager.calc_block_subsidy(12));
        assert_eq!(payload.coinbase_data, miner_data());

        let mut truncated = tx.clone();
        truncated.payload.truncate(PAYLOAD_FIXED_LEN + 2);
        assert!(matches!(
            manager.extract_coinbase_data(&truncated),
            Err(CoinbaseError::MalformedCoinbase(_))
        ));

        let mut not_coinbase = tx;
        not_coinbase.subnetwork_id = crate::types::SUBNETWORK_ID_NATIVE;
        assert!(manager.extract_coinbase_data(&not_coinbase).is_err());
    }

    #[test]
    fn test_validate_coinbase() {
        let manager = manager();
        let block_hash = [7u8; 32];
        let source = FixedSource(HashMap::from([(block_hash, snapshot())]));

        let expected = manager
            .expected_coinbase_transaction(&source, &block_hash, &miner_data())
            .unwrap();
        assert!(manager.validate_coinbase(&source, &block_hash, &expected).is_ok());

        let mut inflated = expected.clone();
        inflated.outputs[0].value += 1;
        assert!(matches!(
            manager.validate_coinbase(&source, &block_hash, &inflated),
            Err(CoinbaseError::Mismatch { .. })
        ));
    }
}
