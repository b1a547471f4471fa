// src/errors.rs

//! Error types for the indexers.

use braid_core::{CoreError, TransactionId};
use thiserror::Error;

/// Main error type for index operations
#[derive(Debug, Error)]
pub enum IndexError {
    /// No record for the transaction
    #[error("Transaction not indexed: {}", hex::encode(.0))]
    NotFound(TransactionId),

    /// An indexer rejected an event; later indexers were skipped
    #[error("Indexer {indexer} failed: {source}")]
    IndexerFailure {
        /// Name of the failing indexer
        indexer: String,
        /// Error returned by the indexer
        source: Box<IndexError>,
    },

    /// Index state is unusable (poisoned lock)
    #[error("Index storage error: {0}")]
    StorageError(String),

    /// Snapshot could not be written or read
    #[error("Snapshot error: {0}")]
    SnapshotError(String),

    /// Underlying core failure
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        IndexError::SnapshotError(err.to_string())
    }
}

impl From<bincode::Error> for IndexError {
    fn from(err: bincode::Error) -> Self {
        IndexError::SnapshotError(err.to_string())
    }
}

/// Result type alias for index operations
pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = IndexError::NotFound([0xab; 32]);
        assert!(err.to_string().starts_with("Transaction not indexed: abab"));
    }

    #[test]
    fn test_indexer_failure_source() {
        let err = IndexError::IndexerFailure {
            indexer: "txindex".to_string(),
            source: Box::new(IndexError::StorageError("lock poisoned".to_string())),
        };
        assert_eq!(
            err.to_string(),
            "Indexer txindex failed: Index storage error: lock poisoned"
        );
        assert!(err.source().is_some());
    }
}
