// src/errors.rs

//! Error types for network operations.
//!
//! [`NetworkError::Timeout`] and [`NetworkError::RouteClosed`] are the two
//! outcomes a connection's owner is expected to handle; everything else
//! means the connection misbehaved or the transport failed.

use crate::message::MessageCommand;
use std::io;
use thiserror::Error;

/// Main error type for network operations
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Connection error
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A route operation did not complete in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The route was closed
    #[error("Route closed")]
    RouteClosed,

    /// A command is already served by another incoming route
    #[error("Command {0} already has an incoming route")]
    DuplicateRoute(MessageCommand),

    /// No incoming route accepts the command
    #[error("No route for command {0}")]
    UnroutedCommand(MessageCommand),

    /// Invalid message format
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Maximum connections reached
    #[error("Maximum connections reached")]
    MaxConnectionsReached,

    /// Shared state is unusable (poisoned lock)
    #[error("Internal network error: {0}")]
    Internal(String),
}

impl From<bincode::Error> for NetworkError {
    fn from(err: bincode::Error) -> Self {
        NetworkError::SerializationError(format!("Bincode error: {}", err))
    }
}

/// Result type alias for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NetworkError::ConnectionError("failed".to_string());
        assert_eq!(format!("{}", err), "Connection error: failed");

        let err = NetworkError::UnroutedCommand(MessageCommand::GetBlockCountRequest);
        assert_eq!(err.to_string(), "No route for command GetBlockCountRequest");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "not found");
        let net_err: NetworkError = io_err.into();
        assert!(matches!(net_err, NetworkError::IoError(_)));
    }
}
