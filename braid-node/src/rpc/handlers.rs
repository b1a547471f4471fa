// src/rpc/handlers.rs

//! One handler per RPC request command.
//!
//! A handler turns one request into exactly one response. Failures the
//! client should see travel inside the response as an [`RpcError`]; an
//! `Err` from a handler means the node itself is broken and ends the
//! connection's loop.

use crate::errors::{NodeError, Result};
use crate::rpc::context::RpcContext;
use crate::shutdown::ShutdownReason;
use braid_core::{ConsensusError, Hash, TransactionId};
use braid_index::IndexError;
use braid_network::{
    BlockDagInfo, BlockTemplate, BlockVerbose, BlocksResult, ChainFromBlockResult, Message,
    MessageCommand, MessageType, NetworkError, RpcError, RpcResult, Router, SubnetworkInfo,
    TransactionVerbose, MAX_MESSAGE_SIZE,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Future returned by a handler
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Message>> + Send + 'a>>;

/// Request handler
pub type Handler = for<'a> fn(&'a RpcContext, &'a Arc<Router>, Message) -> HandlerFuture<'a>;

/// Most blocks returned by one get-blocks or get-chain-from-block request
pub const MAX_BLOCKS_PER_REQUEST: usize = 100;

/// Delay between acknowledging a shutdown request and acting on it
pub const SHUTDOWN_DELAY: Duration = Duration::from_millis(100);

/// Immutable map from request command to handler
pub struct HandlerRegistry {
    handlers: HashMap<MessageCommand, Handler>,
}

impl HandlerRegistry {
    /// Registry of every supported request
    pub fn new() -> Self {
        let entries: [(MessageCommand, Handler); 21] = [
            (MessageCommand::GetCurrentNetworkRequest, handle_get_current_network),
            (MessageCommand::SubmitBlockRequest, handle_submit_block),
            (MessageCommand::GetBlockTemplateRequest, handle_get_block_template),
            (MessageCommand::NotifyBlockAddedRequest, handle_notify_block_added),
            (MessageCommand::GetPeerAddressesRequest, handle_get_peer_addresses),
            (MessageCommand::GetSelectedTipHashRequest, handle_get_selected_tip_hash),
            (MessageCommand::GetMempoolEntryRequest, handle_get_mempool_entry),
            (MessageCommand::GetMempoolEntriesRequest, handle_get_mempool_entries),
            (MessageCommand::GetConnectedPeerInfoRequest, handle_get_connected_peer_info),
            (MessageCommand::AddPeerRequest, handle_add_peer),
            (MessageCommand::SubmitTransactionRequest, handle_submit_transaction),
            (MessageCommand::NotifyChainChangedRequest, handle_notify_chain_changed),
            (MessageCommand::GetBlockRequest, handle_get_block),
            (MessageCommand::GetSubnetworkRequest, handle_get_subnetwork),
            (MessageCommand::GetChainFromBlockRequest, handle_get_chain_from_block),
            (MessageCommand::GetBlocksRequest, handle_get_blocks),
            (MessageCommand::GetBlockCountRequest, handle_get_block_count),
            (MessageCommand::GetBlockDagInfoRequest, handle_get_block_dag_info),
            (MessageCommand::ResolveFinalityConflictRequest, handle_resolve_finality_conflict),
            (MessageCommand::NotifyFinalityConflictsRequest, handle_notify_finality_conflicts),
            (MessageCommand::ShutdownRequest, handle_shutdown),
        ];

        Self {
            handlers: entries.into_iter().collect(),
        }
    }

    /// Handler of a command
    pub fn get(&self, command: &MessageCommand) -> Option<Handler> {
        self.handlers.get(command).copied()
    }

    /// Commands with a handler, sorted
    pub fn commands(&self) -> Vec<MessageCommand> {
        let mut commands: Vec<_> = self.handlers.keys().copied().collect();
        commands.sort();
        commands
    }

    /// Number of handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn unexpected(command: MessageCommand) -> NodeError {
    NodeError::RpcError(format!("Handler received unexpected {}", command))
}

fn respond(message_type: MessageType) -> Result<Message> {
    respond_within(message_type, MAX_MESSAGE_SIZE)
}

/// Wraps a response, replacing its result with an error when the encoded
/// message would not fit in a `limit` byte frame
fn respond_within(message_type: MessageType, limit: usize) -> Result<Message> {
    let message = Message::new(message_type);
    let size = message.encoded_len().map_err(NetworkError::from)?;
    if size <= limit as u64 {
        return Ok(message);
    }

    warn!(
        "{} of {} bytes exceeds the {} byte message limit",
        message.command(),
        size,
        limit
    );
    let error = RpcError::new(format!(
        "Response too large: {} bytes, limit is {}",
        size, limit
    ));
    Ok(Message::new(message.message_type.into_error_response(error)))
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Accepting block of a transaction according to the index
fn accepting_block(context: &RpcContext, tx_id: &TransactionId) -> RpcResult<Option<Hash>> {
    let txindex = context
        .txindex
        .as_ref()
        .ok_or_else(|| RpcError::new("The transaction index is disabled"))?;

    match txindex.block_that_accepted_tx(tx_id) {
        Ok(hash) => Ok(Some(hash)),
        Err(IndexError::NotFound(_)) => Ok(None),
        Err(e) => Err(RpcError::new(e.to_string())),
    }
}

fn handle_get_current_network<'a>(
    context: &'a RpcContext,
    _router: &'a Arc<Router>,
    _request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let network = context.consensus.params().network_name.clone();
        respond(MessageType::GetCurrentNetworkResponse(Ok(network)))
    })
}

fn handle_submit_block<'a>(
    context: &'a RpcContext,
    _router: &'a Arc<Router>,
    request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let block = match request.message_type {
            MessageType::SubmitBlockRequest { block } => block,
            other => return Err(unexpected(other.command())),
        };

        if !context.consensus.is_synced() {
            return respond(MessageType::SubmitBlockResponse(Err(RpcError::new(
                "Block not submitted - node is not synced",
            ))));
        }

        let hash = block.hash();
        let consensus = context.consensus.clone();
        let submitted = block.clone();
        let inserted = tokio::task::spawn_blocking(move || {
            consensus.validate_and_insert_block(submitted)
        })
        .await
        .map_err(|e| NodeError::RpcError(format!("Block insertion task failed: {}", e)))?;

        let result = match inserted {
            Ok(insertion) => {
                info!("Accepted block {} via RPC", hex::encode(hash));
                context.on_block_inserted(&block, &insertion).await;
                Ok(hash)
            }
            Err(ConsensusError::Indexing(reason)) => {
                error!("Block {} rejected by indexers: {}", hex::encode(hash), reason);
                Err(RpcError::new(format!("Block rejected: indexing failed: {}", reason)))
            }
            Err(e) => {
                warn!("Rejected block {}: {}", hex::encode(hash), e);
                Err(RpcError::new(format!("Block rejected: {}", e)))
            }
        };

        respond(MessageType::SubmitBlockResponse(result))
    })
}

fn handle_get_block_template<'a>(
    context: &'a RpcContext,
    _router: &'a Arc<Router>,
    request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let coinbase_data = match request.message_type {
            MessageType::GetBlockTemplateRequest { coinbase_data } => coinbase_data,
            other => return Err(unexpected(other.command())),
        };

        let limit = context
            .consensus
            .params()
            .max_block_transactions
            .saturating_sub(1);
        let transactions = context.mempool.transactions_for_template(limit).await;

        let result = context
            .consensus
            .build_block_template(&coinbase_data, transactions, now_millis())
            .map(|block| BlockTemplate {
                block,
                is_synced: context.consensus.is_synced(),
            })
            .map_err(RpcError::from);

        respond(MessageType::GetBlockTemplateResponse(result))
    })
}

fn handle_notify_block_added<'a>(
    context: &'a RpcContext,
    router: &'a Arc<Router>,
    _request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        context
            .notification_manager
            .listener(router.id())?
            .propagate_block_added();
        respond(MessageType::NotifyBlockAddedResponse(Ok(())))
    })
}

fn handle_get_peer_addresses<'a>(
    context: &'a RpcContext,
    _router: &'a Arc<Router>,
    _request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let addresses = context.address_book.read().await.addresses();
        respond(MessageType::GetPeerAddressesResponse(Ok(addresses)))
    })
}

fn handle_get_selected_tip_hash<'a>(
    context: &'a RpcContext,
    _router: &'a Arc<Router>,
    _request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let result = context.consensus.selected_tip_hash().map_err(RpcError::from);
        respond(MessageType::GetSelectedTipHashResponse(result))
    })
}

fn handle_get_mempool_entry<'a>(
    context: &'a RpcContext,
    _router: &'a Arc<Router>,
    request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let transaction_id = match request.message_type {
            MessageType::GetMempoolEntryRequest { transaction_id } => transaction_id,
            other => return Err(unexpected(other.command())),
        };

        let result = context
            .mempool
            .get_entry(&transaction_id)
            .await
            .ok_or_else(|| {
                RpcError::new(format!(
                    "Transaction {} was not found in the mempool",
                    hex::encode(transaction_id)
                ))
            });
        respond(MessageType::GetMempoolEntryResponse(result))
    })
}

fn handle_get_mempool_entries<'a>(
    context: &'a RpcContext,
    _router: &'a Arc<Router>,
    _request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let entries = context.mempool.entries().await;
        respond(MessageType::GetMempoolEntriesResponse(Ok(entries)))
    })
}

fn handle_get_connected_peer_info<'a>(
    context: &'a RpcContext,
    _router: &'a Arc<Router>,
    _request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let infos = context
            .connections
            .read()
            .await
            .connected()
            .iter()
            .map(|connection| connection.peer_info())
            .collect();
        respond(MessageType::GetConnectedPeerInfoResponse(Ok(infos)))
    })
}

fn handle_add_peer<'a>(
    context: &'a RpcContext,
    _router: &'a Arc<Router>,
    request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let (address, is_permanent) = match request.message_type {
            MessageType::AddPeerRequest {
                address,
                is_permanent,
            } => (address, is_permanent),
            other => return Err(unexpected(other.command())),
        };

        context.address_book.write().await.add(address, is_permanent);
        info!("Added peer address {} (permanent: {})", address, is_permanent);
        respond(MessageType::AddPeerResponse(Ok(())))
    })
}

fn handle_submit_transaction<'a>(
    context: &'a RpcContext,
    _router: &'a Arc<Router>,
    request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let transaction = match request.message_type {
            MessageType::SubmitTransactionRequest { transaction } => transaction,
            other => return Err(unexpected(other.command())),
        };

        let tx_id = transaction.id();
        if let Ok(Some(accepting)) = accepting_block(context, &tx_id) {
            return respond(MessageType::SubmitTransactionResponse(Err(RpcError::new(
                format!(
                    "Transaction {} is already accepted by block {}",
                    hex::encode(tx_id),
                    hex::encode(accepting)
                ),
            ))));
        }

        let result = context
            .mempool
            .add_transaction(transaction)
            .await
            .map_err(|e| RpcError::new(format!("Rejected transaction {}: {}", hex::encode(tx_id), e)));
        respond(MessageType::SubmitTransactionResponse(result))
    })
}

fn handle_notify_chain_changed<'a>(
    context: &'a RpcContext,
    router: &'a Arc<Router>,
    _request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        context
            .notification_manager
            .listener(router.id())?
            .propagate_chain_changed();
        respond(MessageType::NotifyChainChangedResponse(Ok(())))
    })
}

fn handle_get_block<'a>(
    context: &'a RpcContext,
    _router: &'a Arc<Router>,
    request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let (hash, include_transactions) = match request.message_type {
            MessageType::GetBlockRequest {
                hash,
                include_transactions,
            } => (hash, include_transactions),
            other => return Err(unexpected(other.command())),
        };

        let result = (|| -> RpcResult<BlockVerbose> {
            let block = context.consensus.get_block(&hash)?;
            let info = context.consensus.block_info(&hash)?;
            let transaction_ids = block.transaction_ids();

            let transactions = if include_transactions {
                transaction_ids
                    .iter()
                    .map(|tx_id| {
                        Ok(TransactionVerbose {
                            transaction_id: *tx_id,
                            accepting_block: accepting_block(context, tx_id)?,
                        })
                    })
                    .collect::<RpcResult<Vec<_>>>()?
            } else {
                Vec::new()
            };

            Ok(BlockVerbose {
                hash,
                header: block.header,
                blue_score: info.blue_score,
                selected_parent: info.selected_parent,
                merge_set: info.merge_set,
                is_chain_block: info.is_chain_block,
                transaction_ids,
                transactions,
            })
        })();

        respond(MessageType::GetBlockResponse(result))
    })
}

fn handle_get_subnetwork<'a>(
    context: &'a RpcContext,
    _router: &'a Arc<Router>,
    request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let subnetwork_id = match request.message_type {
            MessageType::GetSubnetworkRequest { subnetwork_id } => subnetwork_id,
            other => return Err(unexpected(other.command())),
        };

        let result = match context.consensus.subnetwork_gas_limit(&subnetwork_id) {
            Ok(Some(gas_limit)) => Ok(SubnetworkInfo {
                subnetwork_id,
                gas_limit,
            }),
            Ok(None) => Err(RpcError::new(format!(
                "Subnetwork {} not found",
                subnetwork_id
            ))),
            Err(e) => Err(e.into()),
        };
        respond(MessageType::GetSubnetworkResponse(result))
    })
}

fn handle_get_chain_from_block<'a>(
    context: &'a RpcContext,
    _router: &'a Arc<Router>,
    request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let (start_hash, include_blocks) = match request.message_type {
            MessageType::GetChainFromBlockRequest {
                start_hash,
                include_blocks,
            } => (start_hash, include_blocks),
            other => return Err(unexpected(other.command())),
        };

        let result = (|| -> RpcResult<ChainFromBlockResult> {
            let mut changes = context.consensus.chain_from_block(start_hash)?;
            // Clients continue from the last returned hash
            changes.added_chain_blocks.truncate(MAX_BLOCKS_PER_REQUEST);
            let blocks = if include_blocks {
                changes
                    .added_chain_blocks
                    .iter()
                    .map(|chain_block| context.consensus.get_block(&chain_block.hash))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            } else {
                Vec::new()
            };

            Ok(ChainFromBlockResult {
                removed_chain_block_hashes: changes.removed_chain_block_hashes,
                added_chain_blocks: changes.added_chain_blocks,
                blocks,
            })
        })();

        respond(MessageType::GetChainFromBlockResponse(result))
    })
}

fn handle_get_blocks<'a>(
    context: &'a RpcContext,
    _router: &'a Arc<Router>,
    request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let (low_hash, include_blocks) = match request.message_type {
            MessageType::GetBlocksRequest {
                low_hash,
                include_blocks,
            } => (low_hash, include_blocks),
            other => return Err(unexpected(other.command())),
        };

        let result = (|| -> RpcResult<BlocksResult> {
            let hashes = context
                .consensus
                .blocks_after(low_hash, MAX_BLOCKS_PER_REQUEST)?;
            let blocks = if include_blocks {
                hashes
                    .iter()
                    .map(|hash| context.consensus.get_block(hash))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            } else {
                Vec::new()
            };
            Ok(BlocksResult { hashes, blocks })
        })();

        respond(MessageType::GetBlocksResponse(result))
    })
}

fn handle_get_block_count<'a>(
    context: &'a RpcContext,
    _router: &'a Arc<Router>,
    _request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let result = context.consensus.block_count().map_err(RpcError::from);
        respond(MessageType::GetBlockCountResponse(result))
    })
}

fn handle_get_block_dag_info<'a>(
    context: &'a RpcContext,
    _router: &'a Arc<Router>,
    _request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let consensus = &context.consensus;
        let result = (|| -> RpcResult<BlockDagInfo> {
            Ok(BlockDagInfo {
                network_name: consensus.params().network_name.clone(),
                block_count: consensus.block_count()?,
                tip_hashes: consensus.tips()?,
                selected_tip_hash: consensus.selected_tip_hash()?,
                virtual_blue_score: consensus.virtual_blue_score()?,
            })
        })();
        respond(MessageType::GetBlockDagInfoResponse(result))
    })
}

fn handle_resolve_finality_conflict<'a>(
    context: &'a RpcContext,
    _router: &'a Arc<Router>,
    request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let finality_block_hash = match request.message_type {
            MessageType::ResolveFinalityConflictRequest {
                finality_block_hash,
            } => finality_block_hash,
            other => return Err(unexpected(other.command())),
        };

        let result = match context
            .consensus
            .resolve_finality_conflict(&finality_block_hash)
        {
            Ok(()) => {
                context
                    .notification_manager
                    .notify_finality_conflict_resolved(finality_block_hash)
                    .await?;
                Ok(())
            }
            Err(e) => Err(RpcError::from(e)),
        };
        respond(MessageType::ResolveFinalityConflictResponse(result))
    })
}

fn handle_notify_finality_conflicts<'a>(
    context: &'a RpcContext,
    router: &'a Arc<Router>,
    _request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        context
            .notification_manager
            .listener(router.id())?
            .propagate_finality_conflicts();
        respond(MessageType::NotifyFinalityConflictsResponse(Ok(())))
    })
}

fn handle_shutdown<'a>(
    context: &'a RpcContext,
    router: &'a Arc<Router>,
    _request: Message,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        warn!("Shutdown requested over RPC by router {}", router.id());

        // Let the acknowledgement reach the client first
        let shutdown = context.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SHUTDOWN_DELAY).await;
            shutdown.trigger(ShutdownReason::Requested);
        });

        respond(MessageType::ShutdownResponse(Ok(())))
    })
}
