// src/types.rs

//! Core type definitions using braid-crypto

use serde::{Deserialize, Serialize};
use std::fmt;

pub use braid_crypto::hash::blake3_hash as hash_bytes_to_hash;
pub use braid_crypto::HASH_SIZE;

/// 32-byte hash type
pub type Hash = [u8; 32];

/// Transaction identifier (BLAKE3 of the canonical encoding)
pub type TransactionId = Hash;

/// Unix timestamp in milliseconds
pub type Timestamp = u64;

/// Pseudo-hash addressing the virtual block, i.e. a block built on top of
/// all current tips
pub const VIRTUAL_BLOCK_HASH: Hash = [0xff; 32];

/// Converts hash to hex using braid-crypto
pub fn hash_to_hex(hash: &Hash) -> String {
    braid_crypto::hash::hash_to_hex(hash)
}

/// Parses hex to hash using braid-crypto
pub fn hex_to_hash(hex_str: &str) -> Option<Hash> {
    braid_crypto::hash::hex_to_hash(hex_str).ok()
}

/// Length of a subnetwork identifier in bytes
pub const SUBNETWORK_ID_SIZE: usize = 20;

/// Identifies the subnetwork a transaction belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubnetworkId(pub [u8; SUBNETWORK_ID_SIZE]);

/// Subnetwork of ordinary value transfers
pub const SUBNETWORK_ID_NATIVE: SubnetworkId = SubnetworkId([0u8; SUBNETWORK_ID_SIZE]);

/// Subnetwork reserved for coinbase transactions
pub const SUBNETWORK_ID_COINBASE: SubnetworkId = SubnetworkId([
    1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
]);

/// Subnetwork used to register new subnetworks
pub const SUBNETWORK_ID_REGISTRY: SubnetworkId = SubnetworkId([
    2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
]);

impl SubnetworkId {
    /// Built-in subnetworks are not subject to gas limits
    pub fn is_builtin(&self) -> bool {
        *self == SUBNETWORK_ID_NATIVE
            || *self == SUBNETWORK_ID_COINBASE
            || *self == SUBNETWORK_ID_REGISTRY
    }
}

impl fmt::Display for SubnetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
