// src/errors.rs

//! Error types for node operations.

use braid_core::ConsensusError;
use braid_index::IndexError;
use braid_network::NetworkError;
use thiserror::Error;

/// Main error type for node operations
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration error
    #[error("Config error: {0}")]
    ConfigError(String),

    /// Transport error
    #[error("Network error: {0}")]
    NetworkError(#[from] NetworkError),

    /// Consensus rejected an operation
    #[error("Consensus error: {0}")]
    ConsensusError(#[from] ConsensusError),

    /// Index error
    #[error("Index error: {0}")]
    IndexError(#[from] IndexError),

    /// Mempool error
    #[error("Mempool error: {0}")]
    MempoolError(String),

    /// RPC error
    #[error("RPC error: {0}")]
    RpcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Initialization error
    #[error("Initialization error: {0}")]
    InitializationError(String),
}

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, NodeError>;
