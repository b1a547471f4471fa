// src/errors.rs

//! Error types for hashing helpers.

use thiserror::Error;

/// Main error type for cryptographic operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Hex string has the wrong length for a digest
    #[error("Invalid hex length: expected {expected}, got {actual}")]
    InvalidHexLength {
        /// Expected number of hex characters
        expected: usize,
        /// Number of hex characters received
        actual: usize,
    },

    /// Hex string contains non-hex characters
    #[error("Hex decode failed: {0}")]
    HexDecode(String),
}

/// Result type alias for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;
