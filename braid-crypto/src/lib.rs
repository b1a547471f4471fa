// src/lib.rs

//! # Braid Crypto
//!
//! Hashing primitives for the Braid BlockDAG node.
//!
//! Everything that is content-addressed in Braid (blocks, transactions,
//! network messages) is identified by a 32-byte BLAKE3 digest. This crate
//! owns that choice so the rest of the workspace never touches the hash
//! function directly.
//!
//! ## Example Usage
//!
//! ```rust
//! use braid_crypto::hash;
//!
//! let digest = hash::blake3_hash(b"Hello Braid");
//! let hex = hash::hash_to_hex(&digest);
//! assert_eq!(hash::hex_to_hash(&hex).unwrap(), digest);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod errors;
pub mod hash;

// Re-export commonly used types
pub use crate::errors::{CryptoError, Result};

/// Standard hash output size (32 bytes / 256 bits)
pub const HASH_SIZE: usize = 32;

/// The all-zero digest, used as the merkle root of an empty leaf set
pub const ZERO_HASH: [u8; HASH_SIZE] = [0u8; HASH_SIZE];
