// src/params.rs

//! Network parameters shared by consensus and the coinbase rules.

use serde::{Deserialize, Serialize};

/// Base units per coin
pub const SOMPI_PER_COIN: u64 = 100_000_000;

/// Consensus parameters of a network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Human readable network name
    pub network_name: String,

    /// Subsidy paid for a block with blue score zero
    pub base_subsidy: u64,

    /// Blue score distance between subsidy halvings
    pub subsidy_halving_interval: u64,

    /// Largest accepted miner payout script
    pub max_coinbase_script_len: usize,

    /// Largest accepted coinbase extra data
    pub max_coinbase_extra_data_len: usize,

    /// Compact difficulty target stamped on templates
    pub bits: u32,

    /// Genesis block timestamp in milliseconds
    pub genesis_timestamp: u64,

    /// Maximum transactions per block, coinbase included
    pub max_block_transactions: usize,
}

impl ConsensusParams {
    /// Parameters of the development network
    pub fn devnet() -> Self {
        Self {
            network_name: "braid-devnet".to_string(),
            base_subsidy: 50 * SOMPI_PER_COIN,
            subsidy_halving_interval: 210_000,
            max_coinbase_script_len: 150,
            max_coinbase_extra_data_len: 150,
            bits: 0x207f_ffff,
            genesis_timestamp: 1_700_000_000_000,
            max_block_transactions: 10_000,
        }
    }
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self::devnet()
    }
}
