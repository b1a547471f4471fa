// src/config.rs

//! Node configuration.

use braid_core::ConsensusParams;
use braid_network::{NetAdapterConfig, RouteConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Block log file name inside the data directory
const BLOCK_LOG_FILE: &str = "blocks.bin";

/// Complete node configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// Network configuration
    pub network: NetworkConfig,

    /// RPC configuration
    pub rpc: RpcConfig,

    /// Consensus parameters
    pub consensus: ConsensusParams,

    /// Index configuration
    pub index: IndexConfig,

    /// Mempool configuration
    pub mempool: MempoolConfig,

    /// Data directory
    pub data_dir: PathBuf,

    /// Log filter used when `RUST_LOG` is not set
    pub log_filter: String,
}

/// Network configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    /// RPC listen address
    pub listen_addr: SocketAddr,

    /// Maximum simultaneous RPC connections
    pub max_connections: usize,
}

/// Per-connection RPC configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcConfig {
    /// Messages buffered per route
    pub route_capacity: usize,

    /// Seconds a connection may stay silent before it is dropped
    pub idle_timeout_secs: u64,

    /// Seconds a response or notification may wait for queue space
    pub enqueue_timeout_secs: u64,
}

/// Index configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexConfig {
    /// Maintain the transaction index
    pub enabled: bool,

    /// Snapshot written on shutdown, relative to the data directory
    pub snapshot_path: PathBuf,
}

/// Mempool configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MempoolConfig {
    /// Maximum number of pending transactions
    pub max_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig {
                listen_addr: SocketAddr::from(([127, 0, 0, 1], braid_network::DEFAULT_RPC_PORT)),
                max_connections: braid_network::MAX_CONNECTIONS,
            },
            rpc: RpcConfig {
                route_capacity: braid_network::DEFAULT_ROUTE_CAPACITY,
                idle_timeout_secs: braid_network::DEFAULT_IDLE_TIMEOUT_SECS,
                enqueue_timeout_secs: braid_network::DEFAULT_ENQUEUE_TIMEOUT_SECS,
            },
            consensus: ConsensusParams::devnet(),
            index: IndexConfig {
                enabled: true,
                snapshot_path: PathBuf::from("txindex.bin"),
            },
            mempool: MempoolConfig { max_size: 10_000 },
            data_dir: PathBuf::from(".braid-data"),
            log_filter: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Loads configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| crate::NodeError::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Saves configuration to file
    pub fn save_to_file(&self, path: &Path) -> crate::Result<()> {
        let contents = serde_json::to_string_pretty(self).map_err(|e| {
            crate::NodeError::ConfigError(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Rejects values the node cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.network.max_connections == 0 {
            return Err(crate::NodeError::ConfigError(
                "network.max_connections must be positive".to_string(),
            ));
        }
        if self.rpc.route_capacity == 0 {
            return Err(crate::NodeError::ConfigError(
                "rpc.route_capacity must be positive".to_string(),
            ));
        }
        if self.mempool.max_size == 0 {
            return Err(crate::NodeError::ConfigError(
                "mempool.max_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Route sizing and timeouts; a zero timeout disables it
    pub fn route_config(&self) -> RouteConfig {
        let secs = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));
        RouteConfig {
            capacity: self.rpc.route_capacity,
            dequeue_timeout: secs(self.rpc.idle_timeout_secs),
            enqueue_timeout: secs(self.rpc.enqueue_timeout_secs),
        }
    }

    /// Transport configuration
    pub fn net_adapter_config(&self) -> NetAdapterConfig {
        NetAdapterConfig {
            listen_addr: self.network.listen_addr,
            max_connections: self.network.max_connections,
            route: self.route_config(),
        }
    }

    /// Absolute location of the index snapshot
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.index.snapshot_path)
    }

    /// Location of the block log replayed at startup
    pub fn block_log_path(&self) -> PathBuf {
        self.data_dir.join(BLOCK_LOG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = NodeConfig::default();
        config.network.max_connections = 3;
        config.consensus.network_name = "braid-testnet".to_string();
        config.save_to_file(&path).unwrap();

        let loaded = NodeConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            NodeConfig::from_file(&path),
            Err(crate::NodeError::ConfigError(_))
        ));
    }

    #[test]
    fn test_validate() {
        let mut config = NodeConfig::default();
        assert!(config.validate().is_ok());

        config.rpc.route_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_route_config() {
        let mut config = NodeConfig::default();
        config.rpc.idle_timeout_secs = 0;
        config.rpc.enqueue_timeout_secs = 5;

        let route = config.route_config();
        assert_eq!(route.dequeue_timeout, None);
        assert_eq!(route.enqueue_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_snapshot_path_is_under_data_dir() {
        let config = NodeConfig::default();
        assert!(config.snapshot_path().starts_with(&config.data_dir));
        assert!(config.block_log_path().starts_with(&config.data_dir));
        assert_ne!(config.block_log_path(), config.snapshot_path());
    }
}
