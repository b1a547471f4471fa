// tests/rpc.rs

//! End-to-end RPC tests against a node listening on a local port.

use braid_core::{CoinbaseData, ConsensusApi, Hash, ScriptPublicKey};
use braid_network::{MessageCommand, MessageType, RpcClient};
use braid_node::{BraidNode, NodeConfig, ShutdownReason};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

struct TestNode {
    node: Arc<BraidNode>,
    addr: SocketAddr,
    server: JoinHandle<braid_node::Result<ShutdownReason>>,
    _data_dir: TempDir,
}

async fn start(idle_timeout_secs: u64) -> TestNode {
    let data_dir = tempfile::tempdir().unwrap();
    let mut config = NodeConfig::default();
    config.network.listen_addr = "127.0.0.1:0".parse().unwrap();
    config.rpc.idle_timeout_secs = idle_timeout_secs;
    config.data_dir = data_dir.path().to_path_buf();

    let node = Arc::new(BraidNode::new(config).unwrap());
    let listener = node.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = {
        let node = node.clone();
        tokio::spawn(async move { node.serve(listener).await })
    };

    TestNode {
        node,
        addr,
        server,
        _data_dir: data_dir,
    }
}

fn miner() -> CoinbaseData {
    CoinbaseData {
        script_public_key: ScriptPublicKey::new(0, vec![0x51]),
        extra_data: b"integration".to_vec(),
    }
}

/// Mines a block through the RPC interface and returns its hash
async fn mine(client: &mut RpcClient) -> Hash {
    let block = match client
        .request(MessageType::GetBlockTemplateRequest {
            coinbase_data: miner(),
        })
        .await
        .unwrap()
        .message_type
    {
        MessageType::GetBlockTemplateResponse(Ok(template)) => template.block,
        other => panic!("unexpected response: {:?}", other),
    };

    match client
        .request(MessageType::SubmitBlockRequest { block })
        .await
        .unwrap()
        .message_type
    {
        MessageType::SubmitBlockResponse(Ok(hash)) => hash,
        other => panic!("unexpected response: {:?}", other),
    }
}

/// Sends one get-block request per hash before reading any response, then
/// checks the responses come back in the same order
async fn pipeline_get_blocks(addr: SocketAddr, hashes: Vec<Hash>) {
    let mut client = RpcClient::connect(addr).await.unwrap();
    for hash in &hashes {
        client
            .send(MessageType::GetBlockRequest {
                hash: *hash,
                include_transactions: false,
            })
            .await
            .unwrap();
    }

    for expected in hashes {
        match client.receive().await.unwrap().message_type {
            MessageType::GetBlockResponse(Ok(block)) => assert_eq!(block.hash, expected),
            other => panic!("unexpected response: {:?}", other),
        }
    }
}

async fn peer_count(client: &mut RpcClient) -> usize {
    match client
        .request(MessageType::GetConnectedPeerInfoRequest)
        .await
        .unwrap()
        .message_type
    {
        MessageType::GetConnectedPeerInfoResponse(Ok(peers)) => peers.len(),
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn test_requests_answered_in_order() {
    println!("\n=== Test: Requests Answered In Order ===");
    let node = start(0).await;
    let mut client = RpcClient::connect(node.addr).await.unwrap();

    client.send(MessageType::GetCurrentNetworkRequest).await.unwrap();
    client.send(MessageType::GetBlockCountRequest).await.unwrap();
    client.send(MessageType::GetSelectedTipHashRequest).await.unwrap();

    match client.receive().await.unwrap().message_type {
        MessageType::GetCurrentNetworkResponse(Ok(network)) => {
            assert_eq!(network, "braid-devnet")
        }
        other => panic!("unexpected response: {:?}", other),
    }
    assert_eq!(
        client.receive().await.unwrap().message_type,
        MessageType::GetBlockCountResponse(Ok(1))
    );
    assert_eq!(
        client.receive().await.unwrap().command(),
        MessageCommand::GetSelectedTipHashResponse
    );

    println!("✓ Three pipelined requests answered in order");
    node.node.shutdown_signal().trigger(ShutdownReason::Requested);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_clients_keep_their_own_order() {
    println!("\n=== Test: Concurrent Clients Keep Their Own Order ===");
    let node = start(0).await;
    let mut miner_client = RpcClient::connect(node.addr).await.unwrap();

    let mut hashes = vec![node.node.consensus().selected_tip_hash().unwrap()];
    for _ in 0..3 {
        hashes.push(mine(&mut miner_client).await);
    }
    println!("✓ Mined {} blocks", hashes.len() - 1);

    let forward = hashes.clone();
    let mut backward = hashes.clone();
    backward.reverse();
    let mut interleaved = hashes.clone();
    interleaved.rotate_left(2);

    let clients = tokio::join!(
        tokio::spawn(pipeline_get_blocks(node.addr, forward)),
        tokio::spawn(pipeline_get_blocks(node.addr, backward)),
        tokio::spawn(pipeline_get_blocks(node.addr, interleaved)),
    );
    clients.0.unwrap();
    clients.1.unwrap();
    clients.2.unwrap();
    println!("✓ Each client got its responses in its own request order");

    assert!(!node.node.shutdown_signal().is_triggered());
    node.node.shutdown_signal().trigger(ShutdownReason::Requested);
}

#[tokio::test]
async fn test_subscriber_notified_of_new_block() {
    println!("\n=== Test: Subscriber Notified Of New Block ===");
    let node = start(0).await;
    let mut miner_client = RpcClient::connect(node.addr).await.unwrap();
    let mut subscriber = RpcClient::connect(node.addr).await.unwrap();

    assert_eq!(
        subscriber
            .request(MessageType::NotifyBlockAddedRequest)
            .await
            .unwrap()
            .message_type,
        MessageType::NotifyBlockAddedResponse(Ok(()))
    );
    assert_eq!(
        subscriber
            .request(MessageType::NotifyChainChangedRequest)
            .await
            .unwrap()
            .message_type,
        MessageType::NotifyChainChangedResponse(Ok(()))
    );

    let block = match miner_client
        .request(MessageType::GetBlockTemplateRequest {
            coinbase_data: miner(),
        })
        .await
        .unwrap()
        .message_type
    {
        MessageType::GetBlockTemplateResponse(Ok(template)) => template.block,
        other => panic!("unexpected response: {:?}", other),
    };
    let hash = block.hash();

    assert_eq!(
        miner_client
            .request(MessageType::SubmitBlockRequest { block })
            .await
            .unwrap()
            .message_type,
        MessageType::SubmitBlockResponse(Ok(hash))
    );
    println!("✓ Block submitted");

    match subscriber.receive().await.unwrap().message_type {
        MessageType::BlockAddedNotification { block } => assert_eq!(block.hash(), hash),
        other => panic!("unexpected notification: {:?}", other),
    }
    match subscriber.receive().await.unwrap().message_type {
        MessageType::ChainChangedNotification { changes } => {
            assert!(changes.removed_chain_block_hashes.is_empty());
            assert_eq!(changes.added_chain_blocks.len(), 1);
            assert_eq!(changes.added_chain_blocks[0].hash, hash);
        }
        other => panic!("unexpected notification: {:?}", other),
    }
    println!("✓ Block-added and chain-changed notifications delivered");

    node.node.shutdown_signal().trigger(ShutdownReason::Requested);
}

#[tokio::test]
async fn test_idle_connection_dropped_alone() {
    println!("\n=== Test: Idle Connection Dropped Alone ===");
    let node = start(1).await;
    let mut idle = RpcClient::connect(node.addr).await.unwrap();
    let mut busy = RpcClient::connect(node.addr).await.unwrap();

    let mut peers = peer_count(&mut busy).await;
    for _ in 0..10 {
        if peers == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        peers = peer_count(&mut busy).await;
    }
    assert_eq!(peers, 2);

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(
            busy.request(MessageType::GetBlockCountRequest)
                .await
                .unwrap()
                .command(),
            MessageCommand::GetBlockCountResponse
        );
    }

    assert!(idle.receive().await.is_err());
    assert_eq!(peer_count(&mut busy).await, 1);
    println!("✓ Idle connection dropped, exactly one disconnect");

    assert_eq!(
        busy.request(MessageType::GetBlockCountRequest)
            .await
            .unwrap()
            .command(),
        MessageCommand::GetBlockCountResponse
    );
    assert!(!node.node.shutdown_signal().is_triggered());
    println!("✓ Busy connection and node unaffected");

    node.node.shutdown_signal().trigger(ShutdownReason::Requested);
}

#[tokio::test]
async fn test_shutdown_request_stops_node() {
    println!("\n=== Test: Shutdown Request Stops Node ===");
    let node = start(0).await;
    let mut client = RpcClient::connect(node.addr).await.unwrap();

    assert_eq!(
        client
            .request(MessageType::ShutdownRequest)
            .await
            .unwrap()
            .message_type,
        MessageType::ShutdownResponse(Ok(()))
    );

    let reason = tokio::time::timeout(Duration::from_secs(5), node.server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reason, ShutdownReason::Requested);
    assert!(node.node.config().block_log_path().exists());
    assert!(node.node.config().snapshot_path().exists());
    println!("✓ Node stopped and saved its blocks and transaction index");
}
