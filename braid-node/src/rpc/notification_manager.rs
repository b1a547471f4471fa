// src/rpc/notification_manager.rs

//! Delivery of asynchronous notifications to subscribed connections.
//!
//! Every connection registers a listener when its router is initialized;
//! the listener starts with no subscriptions and the notify handlers switch
//! them on. Fan-out snapshots the listener set and enqueues outside the
//! lock, so a slow connection never blocks registration.

use crate::errors::{NodeError, Result};
use braid_core::{Block, ChainChanges, Hash};
use braid_network::{Message, MessageType, NetworkError, Router};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Subscriptions of one connection
#[derive(Debug)]
pub struct NotificationListener {
    router: Arc<Router>,
    block_added: AtomicBool,
    chain_changed: AtomicBool,
    finality_conflicts: AtomicBool,
}

impl NotificationListener {
    fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            block_added: AtomicBool::new(false),
            chain_changed: AtomicBool::new(false),
            finality_conflicts: AtomicBool::new(false),
        }
    }

    /// Subscribes to block-added notifications
    pub fn propagate_block_added(&self) {
        self.block_added.store(true, Ordering::SeqCst);
    }

    /// Subscribes to chain-changed notifications
    pub fn propagate_chain_changed(&self) {
        self.chain_changed.store(true, Ordering::SeqCst);
    }

    /// Subscribes to finality conflict and resolution notifications
    pub fn propagate_finality_conflicts(&self) {
        self.finality_conflicts.store(true, Ordering::SeqCst);
    }

    fn wants(&self, notification: &MessageType) -> bool {
        let flag = match notification {
            MessageType::BlockAddedNotification { .. } => &self.block_added,
            MessageType::ChainChangedNotification { .. } => &self.chain_changed,
            MessageType::FinalityConflictNotification { .. }
            | MessageType::FinalityConflictResolvedNotification { .. } => {
                &self.finality_conflicts
            }
            _ => return false,
        };
        flag.load(Ordering::SeqCst)
    }
}

/// Registry of notification listeners keyed by router id
#[derive(Debug, Default)]
pub struct NotificationManager {
    listeners: RwLock<HashMap<u64, Arc<NotificationListener>>>,
}

/// Removes a listener when dropped
#[derive(Debug)]
pub struct ListenerGuard {
    manager: Arc<NotificationManager>,
    router_id: u64,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.manager.remove_listener(self.router_id);
    }
}

impl NotificationManager {
    /// Creates an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for `router`; it lives as long as the guard
    pub fn add_listener(self: &Arc<Self>, router: Arc<Router>) -> Result<ListenerGuard> {
        let router_id = router.id();
        let mut listeners = self
            .listeners
            .write()
            .map_err(|e| NodeError::RpcError(format!("Lock poisoned: {}", e)))?;
        listeners.insert(router_id, Arc::new(NotificationListener::new(router)));
        debug!("Added notification listener for router {}", router_id);

        Ok(ListenerGuard {
            manager: self.clone(),
            router_id,
        })
    }

    /// Unregisters the listener of a router
    pub fn remove_listener(&self, router_id: u64) {
        let mut listeners = match self.listeners.write() {
            Ok(listeners) => listeners,
            Err(poisoned) => poisoned.into_inner(),
        };
        if listeners.remove(&router_id).is_some() {
            debug!("Removed notification listener for router {}", router_id);
        }
    }

    /// Listener of a router
    pub fn listener(&self, router_id: u64) -> Result<Arc<NotificationListener>> {
        let listeners = self
            .listeners
            .read()
            .map_err(|e| NodeError::RpcError(format!("Lock poisoned: {}", e)))?;
        listeners.get(&router_id).cloned().ok_or_else(|| {
            NodeError::RpcError(format!("No notification listener for router {}", router_id))
        })
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or_default()
    }

    /// Announces a block that was added to the DAG
    pub async fn notify_block_added(&self, block: &Block) -> Result<usize> {
        self.notify(MessageType::BlockAddedNotification {
            block: block.clone(),
        })
        .await
    }

    /// Announces a move of the selected chain
    pub async fn notify_chain_changed(&self, changes: &ChainChanges) -> Result<usize> {
        self.notify(MessageType::ChainChangedNotification {
            changes: changes.clone(),
        })
        .await
    }

    /// Announces a block that violates finality
    pub async fn notify_finality_conflict(&self, violating_block_hash: Hash) -> Result<usize> {
        self.notify(MessageType::FinalityConflictNotification {
            violating_block_hash,
        })
        .await
    }

    /// Announces a resolved finality conflict
    pub async fn notify_finality_conflict_resolved(
        &self,
        finality_block_hash: Hash,
    ) -> Result<usize> {
        self.notify(MessageType::FinalityConflictResolvedNotification {
            finality_block_hash,
        })
        .await
    }

    /// Sends `notification` to every subscribed listener and returns how
    /// many accepted it
    async fn notify(&self, notification: MessageType) -> Result<usize> {
        let recipients: Vec<Arc<NotificationListener>> = {
            let listeners = self
                .listeners
                .read()
                .map_err(|e| NodeError::RpcError(format!("Lock poisoned: {}", e)))?;
            listeners
                .values()
                .filter(|listener| listener.wants(&notification))
                .cloned()
                .collect()
        };

        let mut delivered = 0;
        for listener in recipients {
            let router = &listener.router;
            match router.enqueue(Message::new(notification.clone())).await {
                Ok(()) => delivered += 1,
                Err(NetworkError::RouteClosed) => {}
                Err(NetworkError::Timeout(_)) => {
                    warn!(
                        "Router {} is not draining notifications. Disconnecting...",
                        router.id()
                    );
                    router.close();
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(delivered)
    }
}
