// src/hash.rs

//! Hash functions for the Braid protocol.
//!
//! BLAKE3 is the only digest in use. Block and transaction identifiers,
//! merkle roots and message identifiers are all 32-byte BLAKE3 outputs.

use crate::errors::{CryptoError, Result};
use crate::{HASH_SIZE, ZERO_HASH};

/// Computes BLAKE3 hash of input data
///
/// # Arguments
/// * `data` - Input data to hash
///
/// # Returns
/// 32-byte hash digest
///
/// # Example
/// ```
/// use braid_crypto::hash::blake3_hash;
///
/// let hash = blake3_hash(b"Hello Braid");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn blake3_hash(data: &[u8]) -> [u8; HASH_SIZE] {
    *blake3::hash(data).as_bytes()
}

/// Converts a hash to hexadecimal string
pub fn hash_to_hex(hash: &[u8; HASH_SIZE]) -> String {
    hex::encode(hash)
}

/// Parses hexadecimal string to hash
///
/// # Arguments
/// * `hex_str` - 64-character hexadecimal string
///
/// # Returns
/// 32-byte hash array or error
pub fn hex_to_hash(hex_str: &str) -> Result<[u8; HASH_SIZE]> {
    if hex_str.len() != HASH_SIZE * 2 {
        return Err(CryptoError::InvalidHexLength {
            expected: HASH_SIZE * 2,
            actual: hex_str.len(),
        });
    }

    let bytes = hex::decode(hex_str).map_err(|e| CryptoError::HexDecode(e.to_string()))?;

    let mut hash = [0u8; HASH_SIZE];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}

/// Hashes multiple data chunks together
///
/// Equivalent to hashing the concatenation of `chunks` without allocating it.
pub fn hash_chunks(chunks: &[&[u8]]) -> [u8; HASH_SIZE] {
    let mut hasher = blake3::Hasher::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    *hasher.finalize().as_bytes()
}

/// Computes the merkle root over an ordered list of leaf digests
///
/// Pairs are hashed left to right; an odd leaf at the end of a level is
/// paired with itself. An empty list yields [`ZERO_HASH`].
pub fn merkle_root(leaves: &[[u8; HASH_SIZE]]) -> [u8; HASH_SIZE] {
    if leaves.is_empty() {
        return ZERO_HASH;
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).unwrap_or(&pair[0]);
                hash_chunks(&[&pair[0], right])
            })
            .collect();
    }
    level[0]
}
