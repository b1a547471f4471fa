// src/message.rs

//! RPC message types and serialization.
//!
//! Every request, response and notification is a variant of
//! [`MessageType`]; [`MessageCommand`] is the payload-free tag used to route
//! a message to the right incoming route. Responses carry an
//! [`RpcResult`], so a request that fails for the client still gets exactly
//! one response.

use crate::payloads::{
    BlockDagInfo, BlockTemplate, BlockVerbose, BlocksResult, ChainFromBlockResult, MempoolEntry,
    PeerInfo, RpcError, RpcResult, SubnetworkInfo,
};
use braid_core::{Block, ChainChanges, CoinbaseData, Hash, SubnetworkId, Transaction, TransactionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Unique message identifier
pub type MessageId = [u8; 32];

/// Network message envelope
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique message ID (hash of content and timestamp)
    pub id: MessageId,

    /// Message type and payload
    pub message_type: MessageType,

    /// Milliseconds since the Unix epoch when the message was created
    pub timestamp: u64,
}

impl Message {
    /// Creates a new message
    pub fn new(message_type: MessageType) -> Self {
        let timestamp = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let id = Self::compute_id(&message_type, timestamp);

        Self {
            id,
            message_type,
            timestamp,
        }
    }

    /// Routing tag of the message
    pub fn command(&self) -> MessageCommand {
        self.message_type.command()
    }

    /// Computes message ID
    fn compute_id(message_type: &MessageType, timestamp: u64) -> MessageId {
        let payload =
            bincode::serialize(message_type).expect("Message serialization should never fail");
        braid_core::braid_crypto::hash::hash_chunks(&[&timestamp.to_le_bytes(), &payload])
    }

    /// Serializes message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserializes message from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Length of [`Message::to_bytes`] without encoding the message
    pub fn encoded_len(&self) -> Result<u64, bincode::Error> {
        bincode::serialized_size(self)
    }
}

impl From<MessageType> for Message {
    fn from(message_type: MessageType) -> Self {
        Message::new(message_type)
    }
}

/// Message payloads
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageType {
    /// Name of the network the node runs on
    GetCurrentNetworkRequest,
    /// Response to [`MessageType::GetCurrentNetworkRequest`]
    GetCurrentNetworkResponse(RpcResult<String>),

    /// Submit a mined block
    SubmitBlockRequest {
        /// Block to insert
        block: Block,
    },
    /// Hash of the accepted block
    SubmitBlockResponse(RpcResult<Hash>),

    /// Block template paying the given miner data
    GetBlockTemplateRequest {
        /// Miner payout template
        coinbase_data: CoinbaseData,
    },
    /// Response to [`MessageType::GetBlockTemplateRequest`]
    GetBlockTemplateResponse(RpcResult<BlockTemplate>),

    /// Subscribe to block-added notifications
    NotifyBlockAddedRequest,
    /// Subscription acknowledgement
    NotifyBlockAddedResponse(RpcResult<()>),

    /// Known peer addresses
    GetPeerAddressesRequest,
    /// Response to [`MessageType::GetPeerAddressesRequest`]
    GetPeerAddressesResponse(RpcResult<Vec<SocketAddr>>),

    /// Tip of the selected chain
    GetSelectedTipHashRequest,
    /// Response to [`MessageType::GetSelectedTipHashRequest`]
    GetSelectedTipHashResponse(RpcResult<Hash>),

    /// One mempool entry
    GetMempoolEntryRequest {
        /// Transaction to look up
        transaction_id: TransactionId,
    },
    /// Response to [`MessageType::GetMempoolEntryRequest`]
    GetMempoolEntryResponse(RpcResult<MempoolEntry>),

    /// All mempool entries
    GetMempoolEntriesRequest,
    /// Response to [`MessageType::GetMempoolEntriesRequest`]
    GetMempoolEntriesResponse(RpcResult<Vec<MempoolEntry>>),

    /// Currently connected RPC clients
    GetConnectedPeerInfoRequest,
    /// Response to [`MessageType::GetConnectedPeerInfoRequest`]
    GetConnectedPeerInfoResponse(RpcResult<Vec<PeerInfo>>),

    /// Record a peer address
    AddPeerRequest {
        /// Peer address
        address: SocketAddr,
        /// Keep the address across restarts
        is_permanent: bool,
    },
    /// Acknowledgement of [`MessageType::AddPeerRequest`]
    AddPeerResponse(RpcResult<()>),

    /// Submit a transaction to the mempool
    SubmitTransactionRequest {
        /// Transaction to submit
        transaction: Transaction,
    },
    /// Id of the accepted transaction
    SubmitTransactionResponse(RpcResult<TransactionId>),

    /// Subscribe to selected-chain notifications
    NotifyChainChangedRequest,
    /// Subscription acknowledgement
    NotifyChainChangedResponse(RpcResult<()>),

    /// A block with consensus data
    GetBlockRequest {
        /// Block hash
        hash: Hash,
        /// Include per-transaction acceptance data
        include_transactions: bool,
    },
    /// Response to [`MessageType::GetBlockRequest`]
    GetBlockResponse(RpcResult<BlockVerbose>),

    /// Subnetwork registration data
    GetSubnetworkRequest {
        /// Subnetwork to look up
        subnetwork_id: SubnetworkId,
    },
    /// Response to [`MessageType::GetSubnetworkRequest`]
    GetSubnetworkResponse(RpcResult<SubnetworkInfo>),

    /// Selected chain changes since a block
    GetChainFromBlockRequest {
        /// Starting block, genesis when `None`
        start_hash: Option<Hash>,
        /// Include the added chain blocks themselves
        include_blocks: bool,
    },
    /// Response to [`MessageType::GetChainFromBlockRequest`]
    GetChainFromBlockResponse(RpcResult<ChainFromBlockResult>),

    /// Blocks processed after a block
    GetBlocksRequest {
        /// Exclusive lower bound, first block when `None`
        low_hash: Option<Hash>,
        /// Include the blocks themselves
        include_blocks: bool,
    },
    /// Response to [`MessageType::GetBlocksRequest`]
    GetBlocksResponse(RpcResult<BlocksResult>),

    /// Number of processed blocks
    GetBlockCountRequest,
    /// Response to [`MessageType::GetBlockCountRequest`]
    GetBlockCountResponse(RpcResult<u64>),

    /// Summary of the DAG
    GetBlockDagInfoRequest,
    /// Response to [`MessageType::GetBlockDagInfoRequest`]
    GetBlockDagInfoResponse(RpcResult<BlockDagInfo>),

    /// Resolve a finality conflict
    ResolveFinalityConflictRequest {
        /// Block to keep final
        finality_block_hash: Hash,
    },
    /// Acknowledgement of [`MessageType::ResolveFinalityConflictRequest`]
    ResolveFinalityConflictResponse(RpcResult<()>),

    /// Subscribe to finality conflict notifications
    NotifyFinalityConflictsRequest,
    /// Subscription acknowledgement
    NotifyFinalityConflictsResponse(RpcResult<()>),

    /// Stop the node
    ShutdownRequest,
    /// Acknowledgement of [`MessageType::ShutdownRequest`]
    ShutdownResponse(RpcResult<()>),

    /// A block was added to the DAG
    BlockAddedNotification {
        /// The added block
        block: Block,
    },

    /// The selected chain moved
    ChainChangedNotification {
        /// Removed and added chain blocks
        changes: ChainChanges,
    },

    /// A block violates finality
    FinalityConflictNotification {
        /// Offending block
        violating_block_hash: Hash,
    },

    /// A finality conflict was resolved
    FinalityConflictResolvedNotification {
        /// Block kept final
        finality_block_hash: Hash,
    },
}

impl MessageType {
    /// Replaces the result carried by a response with `error`
    ///
    /// Requests and notifications come back unchanged.
    pub fn into_error_response(self, error: RpcError) -> MessageType {
        use MessageType as M;

        match self {
            M::GetCurrentNetworkResponse(_) => M::GetCurrentNetworkResponse(Err(error)),
            M::SubmitBlockResponse(_) => M::SubmitBlockResponse(Err(error)),
            M::GetBlockTemplateResponse(_) => M::GetBlockTemplateResponse(Err(error)),
            M::NotifyBlockAddedResponse(_) => M::NotifyBlockAddedResponse(Err(error)),
            M::GetPeerAddressesResponse(_) => M::GetPeerAddressesResponse(Err(error)),
            M::GetSelectedTipHashResponse(_) => M::GetSelectedTipHashResponse(Err(error)),
            M::GetMempoolEntryResponse(_) => M::GetMempoolEntryResponse(Err(error)),
            M::GetMempoolEntriesResponse(_) => M::GetMempoolEntriesResponse(Err(error)),
            M::GetConnectedPeerInfoResponse(_) => M::GetConnectedPeerInfoResponse(Err(error)),
            M::AddPeerResponse(_) => M::AddPeerResponse(Err(error)),
            M::SubmitTransactionResponse(_) => M::SubmitTransactionResponse(Err(error)),
            M::NotifyChainChangedResponse(_) => M::NotifyChainChangedResponse(Err(error)),
            M::GetBlockResponse(_) => M::GetBlockResponse(Err(error)),
            M::GetSubnetworkResponse(_) => M::GetSubnetworkResponse(Err(error)),
            M::GetChainFromBlockResponse(_) => M::GetChainFromBlockResponse(Err(error)),
            M::GetBlocksResponse(_) => M::GetBlocksResponse(Err(error)),
            M::GetBlockCountResponse(_) => M::GetBlockCountResponse(Err(error)),
            M::GetBlockDagInfoResponse(_) => M::GetBlockDagInfoResponse(Err(error)),
            M::ResolveFinalityConflictResponse(_) => M::ResolveFinalityConflictResponse(Err(error)),
            M::NotifyFinalityConflictsResponse(_) => M::NotifyFinalityConflictsResponse(Err(error)),
            M::ShutdownResponse(_) => M::ShutdownResponse(Err(error)),
            other => other,
        }
    }

    /// Routing tag of the payload
    pub fn command(&self) -> MessageCommand {
        use MessageCommand as C;
        use MessageType as M;

        match self {
            M::GetCurrentNetworkRequest => C::GetCurrentNetworkRequest,
            M::GetCurrentNetworkResponse(_) => C::GetCurrentNetworkResponse,
            M::SubmitBlockRequest { .. } => C::SubmitBlockRequest,
            M::SubmitBlockResponse(_) => C::SubmitBlockResponse,
            M::GetBlockTemplateRequest { .. } => C::GetBlockTemplateRequest,
            M::GetBlockTemplateResponse(_) => C::GetBlockTemplateResponse,
            M::NotifyBlockAddedRequest => C::NotifyBlockAddedRequest,
            M::NotifyBlockAddedResponse(_) => C::NotifyBlockAddedResponse,
            M::GetPeerAddressesRequest => C::GetPeerAddressesRequest,
            M::GetPeerAddressesResponse(_) => C::GetPeerAddressesResponse,
            M::GetSelectedTipHashRequest => C::GetSelectedTipHashRequest,
            M::GetSelectedTipHashResponse(_) => C::GetSelectedTipHashResponse,
            M::GetMempoolEntryRequest { .. } => C::GetMempoolEntryRequest,
            M::GetMempoolEntryResponse(_) => C::GetMempoolEntryResponse,
            M::GetMempoolEntriesRequest => C::GetMempoolEntriesRequest,
            M::GetMempoolEntriesResponse(_) => C::GetMempoolEntriesResponse,
            M::GetConnectedPeerInfoRequest => C::GetConnectedPeerInfoRequest,
            M::GetConnectedPeerInfoResponse(_) => C::GetConnectedPeerInfoResponse,
            M::AddPeerRequest { .. } => C::AddPeerRequest,
            M::AddPeerResponse(_) => C::AddPeerResponse,
            M::SubmitTransactionRequest { .. } => C::SubmitTransactionRequest,
            M::SubmitTransactionResponse(_) => C::SubmitTransactionResponse,
            M::NotifyChainChangedRequest => C::NotifyChainChangedRequest,
            M::NotifyChainChangedResponse(_) => C::NotifyChainChangedResponse,
            M::GetBlockRequest { .. } => C::GetBlockRequest,
            M::GetBlockResponse(_) => C::GetBlockResponse,
            M::GetSubnetworkRequest { .. } => C::GetSubnetworkRequest,
            M::GetSubnetworkResponse(_) => C::GetSubnetworkResponse,
            M::GetChainFromBlockRequest { .. } => C::GetChainFromBlockRequest,
            M::GetChainFromBlockResponse(_) => C::GetChainFromBlockResponse,
            M::GetBlocksRequest { .. } => C::GetBlocksRequest,
            M::GetBlocksResponse(_) => C::GetBlocksResponse,
            M::GetBlockCountRequest => C::GetBlockCountRequest,
            M::GetBlockCountResponse(_) => C::GetBlockCountResponse,
            M::GetBlockDagInfoRequest => C::GetBlockDagInfoRequest,
            M::GetBlockDagInfoResponse(_) => C::GetBlockDagInfoResponse,
            M::ResolveFinalityConflictRequest { .. } => C::ResolveFinalityConflictRequest,
            M::ResolveFinalityConflictResponse(_) => C::ResolveFinalityConflictResponse,
            M::NotifyFinalityConflictsRequest => C::NotifyFinalityConflictsRequest,
            M::NotifyFinalityConflictsResponse(_) => C::NotifyFinalityConflictsResponse,
            M::ShutdownRequest => C::ShutdownRequest,
            M::ShutdownResponse(_) => C::ShutdownResponse,
            M::BlockAddedNotification { .. } => C::BlockAddedNotification,
            M::ChainChangedNotification { .. } => C::ChainChangedNotification,
            M::FinalityConflictNotification { .. } => C::FinalityConflictNotification,
            M::FinalityConflictResolvedNotification { .. } => {
                C::FinalityConflictResolvedNotification
            }
        }
    }
}

/// Payload-free message tag
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageCommand {
    GetCurrentNetworkRequest,
    GetCurrentNetworkResponse,
    SubmitBlockRequest,
    SubmitBlockResponse,
    GetBlockTemplateRequest,
    GetBlockTemplateResponse,
    NotifyBlockAddedRequest,
    NotifyBlockAddedResponse,
    GetPeerAddressesRequest,
    GetPeerAddressesResponse,
    GetSelectedTipHashRequest,
    GetSelectedTipHashResponse,
    GetMempoolEntryRequest,
    GetMempoolEntryResponse,
    GetMempoolEntriesRequest,
    GetMempoolEntriesResponse,
    GetConnectedPeerInfoRequest,
    GetConnectedPeerInfoResponse,
    AddPeerRequest,
    AddPeerResponse,
    SubmitTransactionRequest,
    SubmitTransactionResponse,
    NotifyChainChangedRequest,
    NotifyChainChangedResponse,
    GetBlockRequest,
    GetBlockResponse,
    GetSubnetworkRequest,
    GetSubnetworkResponse,
    GetChainFromBlockRequest,
    GetChainFromBlockResponse,
    GetBlocksRequest,
    GetBlocksResponse,
    GetBlockCountRequest,
    GetBlockCountResponse,
    GetBlockDagInfoRequest,
    GetBlockDagInfoResponse,
    ResolveFinalityConflictRequest,
    ResolveFinalityConflictResponse,
    NotifyFinalityConflictsRequest,
    NotifyFinalityConflictsResponse,
    ShutdownRequest,
    ShutdownResponse,
    BlockAddedNotification,
    ChainChangedNotification,
    FinalityConflictNotification,
    FinalityConflictResolvedNotification,
}

impl MessageCommand {
    /// Whether the command is an asynchronous notification
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            MessageCommand::BlockAddedNotification
                | MessageCommand::ChainChangedNotification
                | MessageCommand::FinalityConflictNotification
                | MessageCommand::FinalityConflictResolvedNotification
        )
    }

    /// Whether the command is a request
    pub fn is_request(&self) -> bool {
        format!("{:?}", self).ends_with("Request")
    }
}

impl fmt::Display for MessageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::RpcError;

    #[test]
    fn test_message_creation() {
        let msg = Message::new(MessageType::GetBlockCountRequest);
        assert_eq!(msg.command(), MessageCommand::GetBlockCountRequest);
        assert!(msg.timestamp > 0);
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::new(MessageType::GetBlockRequest {
            hash: [3u8; 32],
            include_transactions: true,
        });
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(Message::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_response_carries_rpc_error() {
        let msg = Message::new(MessageType::GetSelectedTipHashResponse(Err(RpcError::new(
            "not synced",
        ))));
        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        match decoded.message_type {
            MessageType::GetSelectedTipHashResponse(Err(err)) => {
                assert_eq!(err.message, "not synced")
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_command_classification() {
        assert!(MessageCommand::ShutdownRequest.is_request());
        assert!(!MessageCommand::ShutdownResponse.is_request());
        assert!(MessageCommand::ChainChangedNotification.is_notification());
        assert!(!MessageCommand::ChainChangedNotification.is_request());
        assert_eq!(MessageCommand::AddPeerRequest.to_string(), "AddPeerRequest");
    }

    #[test]
    fn test_into_error_response() {
        let response = MessageType::GetBlockCountResponse(Ok(7));
        assert_eq!(
            response.into_error_response(RpcError::new("too big")),
            MessageType::GetBlockCountResponse(Err(RpcError::new("too big")))
        );

        let request = MessageType::GetBlockCountRequest;
        assert_eq!(
            request.clone().into_error_response(RpcError::new("ignored")),
            request
        );
    }

    #[test]
    fn test_encoded_len_matches_bytes() {
        let msg = Message::new(MessageType::GetBlocksRequest {
            low_hash: Some([1u8; 32]),
            include_blocks: false,
        });
        assert_eq!(msg.encoded_len().unwrap(), msg.to_bytes().unwrap().len() as u64);
    }

    #[test]
    fn test_message_ids_differ_by_payload() {
        let a = Message::new(MessageType::GetBlockCountRequest);
        let b = Message::new(MessageType::GetBlockDagInfoRequest);
        assert_ne!(a.id, b.id);
    }
}
