// src/lib.rs

//! # Braid Network
//!
//! RPC transport for the Braid node.
//!
//! This module provides:
//! - **Messages**: every request, response and notification as one enum
//! - **Routes**: bounded, closable, timeout-aware message queues
//! - **Routers**: per-connection fan-in of incoming commands and a single
//!   ordered outgoing route
//! - **Transport**: a TCP adapter with length-prefixed bincode frames
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use braid_network::{
//!     MessageCommand, NetAdapter, NetAdapterConfig, NetConnection, Router, RouterInitializer,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let initializer: RouterInitializer = Arc::new(
//!         |router: Arc<Router>, _connection: Arc<NetConnection>| -> braid_network::Result<()> {
//!             let _route = router.add_incoming_route(&[MessageCommand::GetBlockCountRequest])?;
//!             Ok(())
//!         },
//!     );
//!
//!     let adapter = NetAdapter::new(NetAdapterConfig::default(), initializer);
//!     let listener = adapter.bind().await.unwrap();
//!     adapter.run(listener, std::future::pending()).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod message;
pub mod netadapter;
pub mod payloads;
pub mod route;
pub mod router;

// Re-export commonly used types
pub use crate::connection::{
    read_message, write_message, AddressBook, ConnectionManager, NetConnection,
};
pub use crate::errors::{NetworkError, Result};
pub use crate::message::{Message, MessageCommand, MessageId, MessageType};
pub use crate::netadapter::{NetAdapter, NetAdapterConfig, RouterInitializer, RpcClient};
pub use crate::payloads::{
    BlockDagInfo, BlockTemplate, BlockVerbose, BlocksResult, ChainFromBlockResult, MempoolEntry,
    PeerInfo, RpcError, RpcResult, SubnetworkInfo, TransactionVerbose,
};
pub use crate::route::Route;
pub use crate::router::{RouteConfig, Router};

/// Default RPC port
pub const DEFAULT_RPC_PORT: u16 = 16110;

/// Maximum number of simultaneous RPC connections
pub const MAX_CONNECTIONS: usize = 128;

/// Messages buffered per route
pub const DEFAULT_ROUTE_CAPACITY: usize = 256;

/// Seconds an incoming route may stay idle before the connection is dropped
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;

/// Seconds a producer may wait for space on a full route
pub const DEFAULT_ENQUEUE_TIMEOUT_SECS: u64 = 30;

/// Connection timeout (seconds)
pub const CONNECTION_TIMEOUT_SECS: u64 = 10;

/// Maximum message size (bytes)
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;
