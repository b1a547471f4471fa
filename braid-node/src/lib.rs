// src/lib.rs

//! # Braid Node
//!
//! RPC node for the Braid BlockDAG. It wires the development consensus,
//! the transaction index and the mempool behind a per-connection RPC
//! router.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Braid Node                    │
//! ├─────────────────────────────────────────┤
//! │  RPC Manager │  Mempool  │  Config      │
//! ├──────────────┴───────────┴──────────────┤
//! │           RPC Transport                 │
//! │         (braid-network)                 │
//! ├─────────────────────────────────────────┤
//! │  DAG Processor │ Transaction Index      │
//! │  (braid-core)  │  (braid-index)         │
//! ├─────────────────────────────────────────┤
//! │         Hashing                         │
//! │         (braid-crypto)                  │
//! └─────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod errors;
pub mod config;
pub mod mempool;
pub mod node;
pub mod rpc;
pub mod shutdown;

// Re-export commonly used types
pub use crate::errors::{NodeError, Result};
pub use crate::config::NodeConfig;
pub use crate::mempool::Mempool;
pub use crate::node::{BraidNode, NodeStats};
pub use crate::rpc::{RpcContext, RpcManager};
pub use crate::shutdown::{ShutdownReason, ShutdownSignal};

/// Node version
pub const NODE_VERSION: &str = env!("CARGO_PKG_VERSION");
