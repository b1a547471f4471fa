// src/node.rs

//! Main node orchestration.
//!
//! On a clean shutdown the node writes its block log and then a snapshot of
//! the transaction index tagged with the consensus checkpoint. On start the
//! log is replayed and the snapshot is only reused when its checkpoint
//! matches; otherwise the index is rebuilt from the log. Nothing is written
//! after a fatal shutdown.

use crate::rpc::{NotificationManager, RpcContext, RpcManager};
use crate::shutdown::{ShutdownReason, ShutdownSignal};
use crate::{Mempool, NodeConfig, NodeError, Result};
use braid_core::{ConsensusApi, DagProcessor, MemoryStorage};
use braid_index::{Indexer, IndexerManager, TxIndex};
use braid_network::{AddressBook, ConnectionManager, NetAdapter};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Main Braid node
pub struct BraidNode {
    /// Node configuration
    config: NodeConfig,

    /// Development consensus
    consensus: Arc<DagProcessor>,

    /// Transaction index, when enabled
    txindex: Option<Arc<TxIndex>>,

    /// Shared RPC state
    context: Arc<RpcContext>,

    /// Per-connection request loops
    rpc_manager: Arc<RpcManager>,

    /// RPC transport
    adapter: NetAdapter,
}

impl BraidNode {
    /// Creates a new Braid node
    pub fn new(config: NodeConfig) -> Result<Self> {
        info!("Initializing Braid node...");
        config.validate()?;

        let (consensus, txindex) = Self::restore(&config)?;

        let connections = Arc::new(RwLock::new(ConnectionManager::new(
            config.network.max_connections,
        )));
        let context = Arc::new(RpcContext {
            consensus: consensus.clone(),
            txindex: txindex.clone(),
            mempool: Mempool::new(config.mempool.max_size),
            connections: connections.clone(),
            address_book: Arc::new(RwLock::new(AddressBook::new())),
            notification_manager: Arc::new(NotificationManager::new()),
            shutdown: ShutdownSignal::new(),
        });

        let rpc_manager = Arc::new(RpcManager::new(context.clone()));
        let adapter = NetAdapter::with_connections(
            config.net_adapter_config(),
            connections,
            rpc_manager.router_initializer(),
        );

        info!(
            "✅ Braid node initialized on {} (genesis {})",
            config.consensus.network_name,
            hex::encode(consensus.selected_tip_hash()?)
        );

        Ok(Self {
            config,
            consensus,
            txindex,
            context,
            rpc_manager,
            adapter,
        })
    }

    /// Replays the block log and pairs the result with an index snapshot
    /// taken at the same checkpoint, rebuilding the index when there is none
    fn restore(config: &NodeConfig) -> Result<(Arc<DagProcessor>, Option<Arc<TxIndex>>)> {
        let blocks = DagProcessor::load_blocks(&config.consensus, &config.block_log_path())?;

        let mut dag = DagProcessor::new(config.consensus.clone(), MemoryStorage::new())?;
        if !config.index.enabled {
            dag.replay(blocks)?;
            return Ok((Arc::new(dag), None));
        }

        dag.replay(blocks.clone())?;
        let checkpoint = dag.checkpoint()?;
        let snapshot = match TxIndex::open_at_checkpoint(&config.snapshot_path(), &checkpoint) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Discarding transaction index snapshot: {}", e);
                None
            }
        };

        let txindex = match snapshot {
            Some(txindex) => {
                let txindex = Arc::new(txindex);
                dag.attach_event_sink(Arc::new(Self::indexer_manager(&txindex)));
                txindex
            }
            None => {
                info!("Rebuilding transaction index from {} blocks", blocks.len());
                let txindex = Arc::new(TxIndex::new());
                dag = DagProcessor::with_event_sink(
                    config.consensus.clone(),
                    MemoryStorage::new(),
                    Arc::new(Self::indexer_manager(&txindex)),
                )?;
                dag.replay(blocks)?;
                txindex
            }
        };

        Ok((Arc::new(dag), Some(txindex)))
    }

    fn indexer_manager(txindex: &Arc<TxIndex>) -> IndexerManager {
        let manager = IndexerManager::new(vec![txindex.clone() as Arc<dyn Indexer>]);
        info!("Indexers: {:?}", manager.indexer_names());
        manager
    }

    /// Binds the configured RPC address
    pub async fn bind(&self) -> Result<TcpListener> {
        Ok(self.adapter.bind().await?)
    }

    /// Serves RPC connections until the shutdown signal fires
    pub async fn serve(&self, listener: TcpListener) -> Result<ShutdownReason> {
        info!("🚀 Starting Braid node...");

        let shutdown = self.context.shutdown.clone();
        self.adapter
            .run(listener, async move {
                shutdown.wait().await;
            })
            .await?;
        self.rpc_manager.join_workers().await;

        let reason = self
            .context
            .shutdown
            .reason()
            .unwrap_or(ShutdownReason::Requested);
        if reason.is_fatal() {
            warn!("Not saving state after fatal shutdown");
        } else {
            self.persist();
        }

        info!("Braid node stopped: {}", reason);
        Ok(reason)
    }

    /// Binds and serves, stopping on Ctrl-C as well
    pub async fn run(&self) -> Result<ShutdownReason> {
        let listener = self.bind().await?;

        let shutdown = self.context.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.trigger(ShutdownReason::Interrupted);
            }
        });

        self.serve(listener).await
    }

    /// Writes the block log, then the index snapshot at the matching
    /// checkpoint
    fn persist(&self) {
        if let Err(e) = self.consensus.save_blocks(&self.config.block_log_path()) {
            warn!("Failed to save block log: {}", e);
            return;
        }

        let Some(txindex) = &self.txindex else {
            return;
        };

        let path = self.config.snapshot_path();
        let saved = self
            .consensus
            .checkpoint()
            .map_err(NodeError::from)
            .and_then(|checkpoint| Ok(txindex.save_snapshot(&path, checkpoint)?));
        match saved {
            Ok(()) => info!("Saved transaction index to {}", path.display()),
            Err(e) => warn!("Failed to save transaction index: {}", e),
        }
    }

    /// Node configuration
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Consensus
    pub fn consensus(&self) -> &Arc<DagProcessor> {
        &self.consensus
    }

    /// Transaction index, when enabled
    pub fn txindex(&self) -> Option<&Arc<TxIndex>> {
        self.txindex.as_ref()
    }

    /// Mempool
    pub fn mempool(&self) -> &Mempool {
        &self.context.mempool
    }

    /// Shutdown signal
    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.context.shutdown
    }

    /// Gets node statistics
    pub async fn stats(&self) -> Result<NodeStats> {
        let dag = self.consensus.get_stats()?;
        Ok(NodeStats {
            block_count: dag.total_blocks,
            tip_count: dag.current_tips,
            selected_chain_length: dag.selected_chain_length,
            mempool_size: self.context.mempool.size().await,
            connection_count: self.context.connections.read().await.connection_count(),
            notification_listeners: self.context.notification_manager.listener_count(),
        })
    }
}

/// Node statistics
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeStats {
    /// Blocks in the DAG
    pub block_count: usize,
    /// Current tips
    pub tip_count: usize,
    /// Selected chain length, genesis included
    pub selected_chain_length: usize,
    /// Pending transactions
    pub mempool_size: usize,
    /// Live RPC connections
    pub connection_count: usize,
    /// Registered notification listeners
    pub notification_listeners: usize,
}
