// src/router.rs

//! Per-connection message router.
//!
//! A router owns the incoming routes of one connection, each restricted to
//! a set of commands, plus a single outgoing route shared by responses and
//! notifications. Whatever is enqueued first on the outgoing route is
//! written first.

use crate::errors::{NetworkError, Result};
use crate::message::{Message, MessageCommand};
use crate::route::Route;
use crate::{DEFAULT_ENQUEUE_TIMEOUT_SECS, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_ROUTE_CAPACITY};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

static NEXT_ROUTER_ID: AtomicU64 = AtomicU64::new(1);

/// Queue sizing and timeouts for a router's routes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteConfig {
    /// Messages buffered per route
    pub capacity: usize,

    /// How long an incoming route may stay idle before dequeue fails
    pub dequeue_timeout: Option<Duration>,

    /// How long a producer may wait for queue space
    pub enqueue_timeout: Option<Duration>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_ROUTE_CAPACITY,
            dequeue_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            enqueue_timeout: Some(Duration::from_secs(DEFAULT_ENQUEUE_TIMEOUT_SECS)),
        }
    }
}

/// Routes of one connection
pub struct Router {
    id: u64,
    config: RouteConfig,
    incoming: RwLock<HashMap<MessageCommand, Arc<Route>>>,
    outgoing: Arc<Route>,
    closed: AtomicBool,
}

impl Router {
    /// Creates a router with no incoming routes
    pub fn new(config: RouteConfig) -> Self {
        // The writer side waits on the outgoing route indefinitely
        let outgoing = Arc::new(Route::new(config.capacity, None, config.enqueue_timeout));

        Self {
            id: NEXT_ROUTER_ID.fetch_add(1, Ordering::Relaxed),
            config,
            incoming: RwLock::new(HashMap::new()),
            outgoing,
            closed: AtomicBool::new(false),
        }
    }

    /// Process-unique router id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Adds an incoming route that accepts exactly `commands`
    pub fn add_incoming_route(&self, commands: &[MessageCommand]) -> Result<Arc<Route>> {
        let mut incoming = self
            .incoming
            .write()
            .map_err(|e| NetworkError::Internal(format!("Lock poisoned: {}", e)))?;

        if let Some(command) = commands.iter().find(|command| incoming.contains_key(command)) {
            return Err(NetworkError::DuplicateRoute(*command));
        }

        let route = Arc::new(Route::new(
            self.config.capacity,
            self.config.dequeue_timeout,
            self.config.enqueue_timeout,
        ));
        for command in commands {
            incoming.insert(*command, route.clone());
        }

        debug!(
            "Router {} routes {} commands to a new incoming route",
            self.id,
            commands.len()
        );

        Ok(route)
    }

    /// Delivers a message read from the transport to its incoming route
    pub async fn route_incoming(&self, message: Message) -> Result<()> {
        let command = message.command();
        let route = {
            let incoming = self
                .incoming
                .read()
                .map_err(|e| NetworkError::Internal(format!("Lock poisoned: {}", e)))?;
            incoming
                .get(&command)
                .cloned()
                .ok_or(NetworkError::UnroutedCommand(command))?
        };

        route.enqueue(message).await
    }

    /// Route carrying responses and notifications to the transport
    pub fn outgoing_route(&self) -> &Arc<Route> {
        &self.outgoing
    }

    /// Queues a message for the transport
    pub async fn enqueue(&self, message: Message) -> Result<()> {
        self.outgoing.enqueue(message).await
    }

    /// Closes every route; returns `false` if the router was already closed
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.outgoing.close();
        match self.incoming.read() {
            Ok(incoming) => {
                for route in incoming.values() {
                    route.close();
                }
            }
            Err(poisoned) => {
                for route in poisoned.into_inner().values() {
                    route.close();
                }
            }
        }

        debug!("Router {} closed", self.id);
        true
    }

    /// Whether [`Router::close`] was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves once the router is closed
    pub async fn wait_closed(&self) {
        self.outgoing.wait_closed().await
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
