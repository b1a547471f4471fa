// src/connection.rs

//! Connection bookkeeping and wire framing.
//!
//! Frames are a 4-byte big-endian length followed by the bincode encoding
//! of a [`Message`], never longer than [`MAX_MESSAGE_SIZE`].

use crate::errors::{NetworkError, Result};
use crate::message::Message;
use crate::payloads::PeerInfo;
use crate::router::Router;
use crate::MAX_MESSAGE_SIZE;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::info;

/// One live connection and its router
#[derive(Debug)]
pub struct NetConnection {
    /// Remote address
    pub address: SocketAddr,

    /// When the connection was established
    pub connected_at: DateTime<Utc>,

    /// Whether the remote side opened the connection
    pub is_inbound: bool,

    router: Arc<Router>,
    disconnected: AtomicBool,
}

impl NetConnection {
    /// Wraps a freshly accepted connection
    pub fn new(address: SocketAddr, is_inbound: bool, router: Arc<Router>) -> Self {
        Self {
            address,
            connected_at: Utc::now(),
            is_inbound,
            router,
            disconnected: AtomicBool::new(false),
        }
    }

    /// Connection id, shared with its router
    pub fn id(&self) -> u64 {
        self.router.id()
    }

    /// The connection's router
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Closes the router, which stops the reader and writer tasks.
    /// Returns `false` if the connection was already disconnected.
    pub fn disconnect(&self) -> bool {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return false;
        }

        info!("Disconnecting {} (connection {})", self.address, self.id());
        self.router.close();
        true
    }

    /// Checks if the connection is still up
    pub fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }

    /// Snapshot for RPC clients
    pub fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id(),
            address: self.address,
            connected_at: self.connected_at.timestamp_millis().max(0) as u64,
            is_inbound: self.is_inbound,
        }
    }
}

/// Registry of live connections
pub struct ConnectionManager {
    connections: HashMap<u64, Arc<NetConnection>>,
    max_connections: usize,
}

impl ConnectionManager {
    /// Creates a new connection manager
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            max_connections,
        }
    }

    /// Registers a connection
    pub fn add_connection(&mut self, connection: Arc<NetConnection>) -> Result<()> {
        if self.connections.contains_key(&connection.id()) {
            return Ok(());
        }

        if !self.can_accept_more() {
            return Err(NetworkError::MaxConnectionsReached);
        }

        self.connections.insert(connection.id(), connection);
        Ok(())
    }

    /// Forgets a connection
    pub fn remove_connection(&mut self, id: u64) -> Option<Arc<NetConnection>> {
        self.connections.remove(&id)
    }

    /// Gets a connection by id
    pub fn get_connection(&self, id: u64) -> Option<&Arc<NetConnection>> {
        self.connections.get(&id)
    }

    /// Connections that are still up, ordered by id
    pub fn connected(&self) -> Vec<Arc<NetConnection>> {
        let mut connected: Vec<_> = self
            .connections
            .values()
            .filter(|c| c.is_connected())
            .cloned()
            .collect();
        connected.sort_by_key(|c| c.id());
        connected
    }

    /// Gets number of live connections
    pub fn connection_count(&self) -> usize {
        self.connections.values().filter(|c| c.is_connected()).count()
    }

    /// Checks if we can accept more connections
    pub fn can_accept_more(&self) -> bool {
        self.connections.len() < self.max_connections
    }

    /// Disconnects everything
    pub fn disconnect_all(&self) {
        for connection in self.connections.values() {
            connection.disconnect();
        }
    }
}

/// Known peer addresses
#[derive(Debug, Default)]
pub struct AddressBook {
    addresses: BTreeMap<SocketAddr, bool>,
}

impl AddressBook {
    /// Creates an empty address book
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an address; a permanent entry stays permanent
    pub fn add(&mut self, address: SocketAddr, is_permanent: bool) {
        let permanent = self.addresses.entry(address).or_insert(false);
        *permanent |= is_permanent;
    }

    /// All known addresses, sorted
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.addresses.keys().copied().collect()
    }

    /// Addresses marked permanent
    pub fn permanent(&self) -> Vec<SocketAddr> {
        self.addresses
            .iter()
            .filter(|(_, permanent)| **permanent)
            .map(|(address, _)| *address)
            .collect()
    }

    /// Number of known addresses
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Whether no address is known
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// Writes one length-prefixed frame
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let data = message.to_bytes()?;

    if data.len() > MAX_MESSAGE_SIZE {
        return Err(NetworkError::InvalidMessage(format!(
            "Message too large: {} bytes",
            data.len()
        )));
    }

    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;

    Ok(())
}

/// Reads one length-prefixed frame
pub async fn read_message<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(NetworkError::InvalidMessage(format!(
            "Message too large: {} bytes",
            len
        )));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;

    Ok(Message::from_bytes(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use crate::router::RouteConfig;

    fn connection(port: u16) -> Arc<NetConnection> {
        Arc::new(NetConnection::new(
            format!("127.0.0.1:{}", port).parse().unwrap(),
            true,
            Arc::new(Router::new(RouteConfig::default())),
        ))
    }

    #[test]
    fn test_disconnect_once() {
        let conn = connection(1);
        assert!(conn.is_connected());
        assert!(conn.disconnect());
        assert!(!conn.disconnect());
        assert!(!conn.is_connected());
        assert!(conn.router().is_closed());
    }

    #[test]
    fn test_connection_manager_limits() {
        let mut manager = ConnectionManager::new(2);
        let a = connection(1);
        manager.add_connection(a.clone()).unwrap();
        manager.add_connection(a.clone()).unwrap();
        manager.add_connection(connection(2)).unwrap();

        assert!(matches!(
            manager.add_connection(connection(3)),
            Err(NetworkError::MaxConnectionsReached)
        ));
        assert_eq!(manager.connection_count(), 2);

        a.disconnect();
        assert_eq!(manager.connection_count(), 1);
        assert!(manager.remove_connection(a.id()).is_some());
        assert!(manager.can_accept_more());
    }

    #[test]
    fn test_peer_info() {
        let conn = connection(7);
        let info = conn.peer_info();
        assert_eq!(info.id, conn.id());
        assert_eq!(info.address.port(), 7);
        assert!(info.is_inbound);
    }

    #[test]
    fn test_address_book() {
        let mut book = AddressBook::new();
        let a: SocketAddr = "10.0.0.1:16110".parse().unwrap();
        let b: SocketAddr = "10.0.0.2:16110".parse().unwrap();

        book.add(b, false);
        book.add(a, true);
        book.add(a, false);

        assert_eq!(book.addresses(), vec![a, b]);
        assert_eq!(book.permanent(), vec![a]);
        assert_eq!(book.len(), 2);
    }

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let message = Message::new(MessageType::GetBlockCountResponse(Ok(42)));

        write_message(&mut client, &message).await.unwrap();
        assert_eq!(read_message(&mut server).await.unwrap(), message);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&((MAX_MESSAGE_SIZE as u32) + 1).to_be_bytes())
            .await
            .unwrap();

        assert!(matches!(
            read_message(&mut server).await,
            Err(NetworkError::InvalidMessage(_))
        ));
    }
}
