// src/rpc/mod.rs

//! RPC manager: the per-connection request loop.
//!
//! For every accepted connection the manager restricts an incoming route
//! to the commands of the handler registry, registers a notification
//! listener and spawns a loop that answers requests one at a time, in
//! arrival order. How the loop ended decides what happens next:
//! - a timeout drops only that connection
//! - a closed route is an ordinary disconnect
//! - anything else is fatal and shuts the node down
//!
//! The manager keeps the handle of every loop it spawned. On shutdown
//! [`RpcManager::join_workers`] refuses new connections and waits for the
//! running loops, so nothing answers requests after the node persists its
//! state.

pub mod context;
pub mod handlers;
pub mod notification_manager;

pub use self::context::RpcContext;
pub use self::handlers::{Handler, HandlerFuture, HandlerRegistry};
pub use self::notification_manager::{ListenerGuard, NotificationListener, NotificationManager};

use crate::errors::NodeError;
use crate::shutdown::ShutdownReason;
use braid_network::{
    MessageCommand, NetConnection, NetworkError, Route, Router, RouterInitializer,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Why a connection's request loop stopped
#[derive(Debug, Error)]
pub enum RpcManagerError {
    /// Dequeue or enqueue failed
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// A request reached the loop without a registered handler
    #[error("No handler for command {0}")]
    UnknownCommand(MessageCommand),

    /// A handler failed internally
    #[error("Handler for {command} failed: {source}")]
    Handler {
        /// Command being handled
        command: MessageCommand,
        /// Underlying failure
        #[source]
        source: NodeError,
    },
}

/// Classification of a finished request loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionExit {
    /// The connection stayed silent too long
    Timeout,

    /// The connection was closed
    Closed,

    /// The node violated an invariant
    Fatal(String),
}

impl ConnectionExit {
    /// Classifies the error that ended a loop
    pub fn classify(err: &RpcManagerError) -> Self {
        match err {
            RpcManagerError::Network(NetworkError::Timeout(_)) => ConnectionExit::Timeout,
            RpcManagerError::Network(NetworkError::RouteClosed) => ConnectionExit::Closed,
            other => ConnectionExit::Fatal(other.to_string()),
        }
    }
}

/// Request loops the manager has spawned
#[derive(Default)]
struct Workers {
    /// Set once the manager stops taking connections
    closed: bool,

    /// Running loops by router id
    running: HashMap<u64, (Arc<NetConnection>, JoinHandle<()>)>,
}

/// Serves RPC requests on every connection
pub struct RpcManager {
    context: Arc<RpcContext>,
    registry: Arc<HandlerRegistry>,
    workers: Mutex<Workers>,
}

impl RpcManager {
    /// Creates a manager over the full handler registry
    pub fn new(context: Arc<RpcContext>) -> Self {
        Self {
            context,
            registry: Arc::new(HandlerRegistry::new()),
            workers: Mutex::new(Workers::default()),
        }
    }

    /// Shared handler state
    pub fn context(&self) -> &Arc<RpcContext> {
        &self.context
    }

    /// Initializer to hand to the transport
    pub fn router_initializer(self: &Arc<Self>) -> RouterInitializer {
        let manager = self.clone();
        Arc::new(
            move |router: Arc<Router>, connection: Arc<NetConnection>| -> braid_network::Result<()> {
                manager.initialize_router(router, connection)
            },
        )
    }

    fn initialize_router(
        self: &Arc<Self>,
        router: Arc<Router>,
        connection: Arc<NetConnection>,
    ) -> braid_network::Result<()> {
        let mut workers = self
            .workers
            .lock()
            .map_err(|e| NetworkError::Internal(format!("Lock poisoned: {}", e)))?;
        if workers.closed {
            return Err(NetworkError::RouteClosed);
        }

        let route = router.add_incoming_route(&self.registry.commands())?;
        let guard = self
            .context
            .notification_manager
            .add_listener(router.clone())
            .map_err(|e| NetworkError::Internal(e.to_string()))?;

        let id = router.id();
        let manager = self.clone();
        let worker_connection = connection.clone();
        // The entry is inserted before the lock is released, so the loop
        // cannot remove it first
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let err = manager.handle_incoming_messages(&router, &route).await;
            manager.handle_error(err, &worker_connection);
            manager.finish_worker(id);
        });
        workers.running.insert(id, (connection, handle));

        Ok(())
    }

    fn finish_worker(&self, id: u64) {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running
            .remove(&id);
    }

    /// Number of request loops still running
    pub fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running
            .len()
    }

    /// Stops taking connections, then disconnects every running loop and
    /// waits for it to finish
    pub async fn join_workers(&self) {
        let running: Vec<(Arc<NetConnection>, JoinHandle<()>)> = {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            workers.closed = true;
            workers.running.drain().map(|(_, worker)| worker).collect()
        };

        let count = running.len();
        for (connection, handle) in running {
            connection.disconnect();
            if let Err(e) = handle.await {
                warn!("RPC loop for {} ended abnormally: {}", connection.address, e);
            }
        }
        info!("Joined {} RPC loops", count);
    }

    async fn handle_incoming_messages(&self, router: &Arc<Router>, route: &Route) -> RpcManagerError {
        loop {
            let request = match route.dequeue().await {
                Ok(request) => request,
                Err(e) => return e.into(),
            };

            let command = request.command();
            let handler = match self.registry.get(&command) {
                Some(handler) => handler,
                None => return RpcManagerError::UnknownCommand(command),
            };

            debug!("Handling {} on router {}", command, router.id());
            let response = match handler(self.context.as_ref(), router, request).await {
                Ok(response) => response,
                Err(source) => return RpcManagerError::Handler { command, source },
            };

            if let Err(e) = router.enqueue(response).await {
                return e.into();
            }
        }
    }

    fn handle_error(&self, err: RpcManagerError, connection: &NetConnection) {
        match ConnectionExit::classify(&err) {
            ConnectionExit::Timeout => {
                warn!("Got timeout from {}. Disconnecting...", connection.address);
                connection.disconnect();
            }
            ConnectionExit::Closed => {
                debug!("RPC connection {} closed", connection.address);
            }
            ConnectionExit::Fatal(reason) => {
                error!("RPC loop for {} failed: {}", connection.address, reason);
                connection.disconnect();
                self.context.shutdown.trigger(ShutdownReason::Fatal(reason));
            }
        }
    }
}
