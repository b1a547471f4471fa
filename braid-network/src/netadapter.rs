// src/netadapter.rs

//! TCP transport for RPC connections.
//!
//! The adapter accepts connections, gives each one a [`Router`] and hands
//! the router to a caller-supplied initializer, which attaches incoming
//! routes and the tasks consuming them. Per connection it then runs:
//! - a reader that decodes frames and routes them by command
//! - a writer that drains the outgoing route onto the socket
//!
//! Either side failing, or the router being closed by its owner, tears the
//! whole connection down.

use crate::connection::{read_message, write_message, ConnectionManager, NetConnection};
use crate::errors::{NetworkError, Result};
use crate::message::{Message, MessageType};
use crate::router::{RouteConfig, Router};
use crate::{CONNECTION_TIMEOUT_SECS, DEFAULT_RPC_PORT, MAX_CONNECTIONS};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Called once per accepted connection, before any frame is read
pub type RouterInitializer =
    Arc<dyn Fn(Arc<Router>, Arc<NetConnection>) -> Result<()> + Send + Sync>;

/// Transport configuration
#[derive(Clone, Debug)]
pub struct NetAdapterConfig {
    /// Address to listen on
    pub listen_addr: SocketAddr,

    /// Maximum number of simultaneous connections
    pub max_connections: usize,

    /// Route sizing and timeouts for every connection
    pub route: RouteConfig,
}

impl Default for NetAdapterConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_RPC_PORT)),
            max_connections: MAX_CONNECTIONS,
            route: RouteConfig::default(),
        }
    }
}

/// Accepts RPC connections and pumps frames through their routers
pub struct NetAdapter {
    config: NetAdapterConfig,
    connections: Arc<RwLock<ConnectionManager>>,
    initializer: RouterInitializer,
}

impl NetAdapter {
    /// Creates an adapter; `initializer` runs for every accepted connection
    pub fn new(config: NetAdapterConfig, initializer: RouterInitializer) -> Self {
        let connections = Arc::new(RwLock::new(ConnectionManager::new(config.max_connections)));
        Self::with_connections(config, connections, initializer)
    }

    /// Creates an adapter that registers connections in an existing registry
    pub fn with_connections(
        config: NetAdapterConfig,
        connections: Arc<RwLock<ConnectionManager>>,
        initializer: RouterInitializer,
    ) -> Self {
        Self {
            config,
            connections,
            initializer,
        }
    }

    /// Registry of live connections
    pub fn connections(&self) -> Arc<RwLock<ConnectionManager>> {
        self.connections.clone()
    }

    /// Binds the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        info!("RPC listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accepts connections until `shutdown` resolves, then disconnects
    /// every remaining connection
    pub async fn run<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Accepted connection from {}", addr);
                        self.handle_new_connection(stream, addr);
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },

                _ = &mut shutdown => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        self.connections.read().await.disconnect_all();
        info!("RPC server stopped");
        Ok(())
    }

    /// Handles a new incoming connection
    fn handle_new_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let connections = self.connections.clone();
        let initializer = self.initializer.clone();
        let route_config = self.config.route.clone();

        tokio::spawn(async move {
            let router = Arc::new(Router::new(route_config));
            let connection = Arc::new(NetConnection::new(addr, true, router.clone()));

            {
                let mut manager = connections.write().await;
                if let Err(e) = manager.add_connection(connection.clone()) {
                    warn!("Rejecting connection from {}: {}", addr, e);
                    return;
                }
            }

            if let Err(e) = initializer(router.clone(), connection.clone()) {
                warn!("Failed to initialize router for {}: {}", addr, e);
                connection.disconnect();
                connections.write().await.remove_connection(connection.id());
                return;
            }

            info!("Connection {} established with {}", connection.id(), addr);

            let (reader, writer) = stream.into_split();
            let writer_handle = tokio::spawn(write_loop(writer, connection.clone()));
            read_loop(reader, &connection).await;

            connection.disconnect();
            if let Err(e) = writer_handle.await {
                warn!("Writer task for {} failed: {}", addr, e);
            }

            connections.write().await.remove_connection(connection.id());
            info!("Connection {} with {} closed", connection.id(), addr);
        });
    }
}

async fn read_loop(mut reader: OwnedReadHalf, connection: &NetConnection) {
    let router = connection.router();

    loop {
        let read = tokio::select! {
            read = read_message(&mut reader) => read,
            _ = router.wait_closed() => return,
        };

        match read {
            Ok(message) => {
                debug!(
                    "Routing {} ({}) from {}",
                    message.command(),
                    hex::encode(&message.id[..8]),
                    connection.address
                );
                if let Err(e) = router.route_incoming(message).await {
                    match e {
                        NetworkError::RouteClosed => {}
                        e => warn!("Dropping {}: {}", connection.address, e),
                    }
                    return;
                }
            }
            Err(NetworkError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("{} closed the connection", connection.address);
                return;
            }
            Err(e) => {
                warn!("Error receiving message from {}: {}", connection.address, e);
                return;
            }
        }
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, connection: Arc<NetConnection>) {
    let outgoing = connection.router().outgoing_route().clone();

    loop {
        match outgoing.dequeue().await {
            Ok(message) => {
                if let Err(e) = write_message(&mut writer, &message).await {
                    warn!("Error sending message to {}: {}", connection.address, e);
                    break;
                }
            }
            Err(NetworkError::RouteClosed) => break,
            Err(e) => {
                warn!("Outgoing route of {} failed: {}", connection.address, e);
                break;
            }
        }
    }

    connection.disconnect();
    let _ = writer.shutdown().await;
}

/// Minimal RPC client over the same framing
pub struct RpcClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl RpcClient {
    /// Connects to an RPC server
    pub async fn connect(address: SocketAddr) -> Result<Self> {
        let stream = timeout(
            Duration::from_secs(CONNECTION_TIMEOUT_SECS),
            TcpStream::connect(address),
        )
        .await
        .map_err(|_| NetworkError::Timeout(format!("Connection timeout to {}", address)))?
        .map_err(|e| NetworkError::ConnectionError(format!("Failed to connect: {}", e)))?;

        let (reader, writer) = stream.into_split();
        Ok(Self { reader, writer })
    }

    /// Sends a message without waiting for an answer
    pub async fn send(&mut self, message_type: MessageType) -> Result<()> {
        write_message(&mut self.writer, &Message::new(message_type)).await
    }

    /// Receives the next message
    pub async fn receive(&mut self) -> Result<Message> {
        read_message(&mut self.reader).await
    }

    /// Sends a request and waits for the next message
    pub async fn request(&mut self, message_type: MessageType) -> Result<Message> {
        self.send(message_type).await?;
        self.receive().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageCommand;

    fn echo_initializer() -> RouterInitializer {
        Arc::new(|router: Arc<Router>, _connection: Arc<NetConnection>| -> Result<()> {
            let route = router.add_incoming_route(&[MessageCommand::GetBlockCountRequest])?;
            tokio::spawn(async move {
                let mut count = 0u64;
                while route.dequeue().await.is_ok() {
                    count += 1;
                    let response = Message::new(MessageType::GetBlockCountResponse(Ok(count)));
                    if router.enqueue(response).await.is_err() {
                        break;
                    }
                }
            });
            Ok(())
        })
    }

    async fn start(config: NetAdapterConfig) -> (Arc<NetAdapter>, SocketAddr) {
        let adapter = Arc::new(NetAdapter::new(config, echo_initializer()));
        let listener = adapter.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = adapter.clone();
        tokio::spawn(async move { server.run(listener, std::future::pending()).await });

        (adapter, addr)
    }

    fn local_config() -> NetAdapterConfig {
        NetAdapterConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_requests_answered_in_order() {
        let (_adapter, addr) = start(local_config()).await;
        let mut client = RpcClient::connect(addr).await.unwrap();

        for _ in 0..3 {
            client.send(MessageType::GetBlockCountRequest).await.unwrap();
        }
        for expected in 1..=3u64 {
            let response = client.receive().await.unwrap();
            assert_eq!(
                response.message_type,
                MessageType::GetBlockCountResponse(Ok(expected))
            );
        }
    }

    #[tokio::test]
    async fn test_unrouted_command_disconnects() {
        let (adapter, addr) = start(local_config()).await;
        let mut client = RpcClient::connect(addr).await.unwrap();

        client.send(MessageType::ShutdownRequest).await.unwrap();
        assert!(client.receive().await.is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(adapter.connections().read().await.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_max_connections_enforced() {
        let (adapter, addr) = start(NetAdapterConfig {
            max_connections: 1,
            ..local_config()
        })
        .await;

        let mut first = RpcClient::connect(addr).await.unwrap();
        first
            .request(MessageType::GetBlockCountRequest)
            .await
            .unwrap();

        let mut second = RpcClient::connect(addr).await.unwrap();
        second.send(MessageType::GetBlockCountRequest).await.ok();
        assert!(second.receive().await.is_err());
        assert_eq!(adapter.connections().read().await.connection_count(), 1);
    }
}
