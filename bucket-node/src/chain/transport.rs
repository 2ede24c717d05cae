//! Ledger transport abstraction
//!
//! [`LedgerTransport`] is the set of RPC calls the client needs from a ledger
//! node. The WebSocket implementation lives in [`super::ws`]; the in-memory
//! ledger in [`super::mock`] implements the same trait for tests.

use std::sync::Arc;

use async_trait::async_trait;
use bucket_core::{StorageKey, H256};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::error::Result;

/// Versions that a signature commits to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeVersion {
    pub spec_version: u32,
    pub transaction_version: u32,
}

/// Subset of a block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub number: u64,
    pub parent_hash: H256,
}

/// Node liveness report (`system_health`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHealth {
    pub peers: u64,
    pub is_syncing: bool,
    pub should_have_peers: bool,
}

/// Transaction pool status update
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TxStatus {
    Future,
    Ready,
    Broadcast(Vec<String>),
    InBlock(H256),
    Retracted(H256),
    FinalityTimeout(H256),
    Finalized(H256),
    Usurped(H256),
    Dropped,
    Invalid,
}

impl TxStatus {
    /// Block the transaction was included in, if this update reports one
    pub fn included_in(&self) -> Option<H256> {
        match self {
            TxStatus::InBlock(hash) | TxStatus::Finalized(hash) => Some(*hash),
            _ => None,
        }
    }

    /// Pool gave up on the transaction
    pub fn is_rejection(&self) -> bool {
        matches!(self, TxStatus::Usurped(_) | TxStatus::Dropped | TxStatus::Invalid)
    }
}

/// Live status stream for one submitted transaction
///
/// Status updates and subscription failures arrive on separate channels so
/// that a waiter can tell them apart. The subscription must be released with
/// [`LedgerTransport::unsubscribe`] once the waiter is done; see
/// [`SubscriptionGuard`].
#[derive(Debug)]
pub struct StatusSubscription {
    pub id: String,
    pub statuses: mpsc::UnboundedReceiver<TxStatus>,
    pub errors: mpsc::UnboundedReceiver<String>,
}

/// RPC surface of a ledger node
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    /// SCALE-encoded runtime metadata
    async fn metadata(&self) -> Result<Vec<u8>>;

    async fn genesis_hash(&self) -> Result<H256>;

    async fn runtime_version(&self) -> Result<RuntimeVersion>;

    /// Raw storage value, at the latest block or at `at`
    async fn storage(&self, key: &StorageKey, at: Option<H256>) -> Result<Option<Vec<u8>>>;

    /// Hash of block `number`, or of the best block when `None`
    async fn block_hash(&self, number: Option<u64>) -> Result<Option<H256>>;

    /// Header of block `hash`, or of the best block when `None`
    async fn header(&self, hash: Option<H256>) -> Result<Option<Header>>;

    async fn health(&self) -> Result<NodeHealth>;

    async fn submit_and_watch(&self, extrinsic: Vec<u8>) -> Result<StatusSubscription>;

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()>;
}

/// Opens transports to ledger endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Arc<dyn LedgerTransport>>;
}

/// Releases a status subscription exactly once
///
/// [`release`](Self::release) unsubscribes and waits for the node to
/// acknowledge. If the guard is dropped without being released (the waiting
/// future was cancelled) the unsubscribe is spawned onto the current runtime.
pub struct SubscriptionGuard {
    transport: Arc<dyn LedgerTransport>,
    id: Option<String>,
}

impl SubscriptionGuard {
    pub fn new(transport: Arc<dyn LedgerTransport>, id: String) -> Self {
        Self {
            transport,
            id: Some(id),
        }
    }

    pub async fn release(mut self) {
        if let Some(id) = self.id.take() {
            if let Err(e) = self.transport.unsubscribe(&id).await {
                warn!(subscription = %id, error = %e, "Failed to unsubscribe");
            }
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        debug!(subscription = %id, "Releasing abandoned subscription");
        let transport = self.transport.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = transport.unsubscribe(&id).await {
                        warn!(subscription = %id, error = %e, "Failed to unsubscribe");
                    }
                });
            }
            Err(_) => warn!(subscription = %id, "No runtime to release subscription"),
        }
    }
}
