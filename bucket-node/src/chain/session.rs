//! Ledger session
//!
//! A [`Session`] owns the live transport to one ledger node together with the
//! facts every other component needs: decoded metadata, genesis hash, runtime
//! version and the storage key of the block event log. One session is shared
//! (via `Arc`) by every reader, builder and engine in the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bucket_core::{storage_key, Metadata, StorageKey, H256};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::error::{ChainError, Result};
use super::transport::{Connector, LedgerTransport, RuntimeVersion};
use super::types::names;
use crate::metrics as node_metrics;

/// Facts fetched once per connection and cached
#[derive(Debug, Clone)]
pub struct SessionFacts {
    pub metadata: Arc<Metadata>,
    pub genesis_hash: H256,
    pub runtime_version: RuntimeVersion,
    pub event_log_key: StorageKey,
}

impl SessionFacts {
    fn event_log_key(metadata: &Metadata) -> Result<StorageKey> {
        storage_key(metadata, names::SYSTEM, names::SYSTEM_EVENTS, &[])
            .map_err(|e| ChainError::connection(format!("metadata lacks the event log: {}", e)))
    }

    async fn fetch(transport: &dyn LedgerTransport) -> Result<Self> {
        let genesis_hash = transport.genesis_hash().await?;
        let runtime_version = transport.runtime_version().await?;
        let metadata = Self::fetch_metadata(transport).await?;
        let event_log_key = Self::event_log_key(&metadata)?;
        Ok(Self {
            metadata: Arc::new(metadata),
            genesis_hash,
            runtime_version,
            event_log_key,
        })
    }

    async fn fetch_metadata(transport: &dyn LedgerTransport) -> Result<Metadata> {
        let bytes = transport.metadata().await?;
        Metadata::from_bytes(&bytes)
            .map_err(|e| ChainError::connection(format!("undecodable metadata: {}", e)))
    }
}

/// Shared connection to the ledger
pub struct Session {
    connector: Arc<dyn Connector>,
    addresses: Vec<String>,
    transport: RwLock<Arc<dyn LedgerTransport>>,
    address: RwLock<String>,
    facts: RwLock<Arc<SessionFacts>>,
    healthy: AtomicBool,
}

impl Session {
    /// Connect to a single endpoint and fetch the session facts
    ///
    /// Any failure, including undecodable metadata, is a connection error.
    pub async fn connect(connector: Arc<dyn Connector>, address: &str) -> Result<Self> {
        Self::connect_any(connector, &[address.to_string()]).await
    }

    /// Try each endpoint in order until one connects
    pub async fn connect_any(connector: Arc<dyn Connector>, addresses: &[String]) -> Result<Self> {
        if addresses.is_empty() {
            return Err(ChainError::Config("no rpc addresses configured".to_string()));
        }

        let mut last_err = None;
        for address in addresses {
            match Self::open(connector.as_ref(), address).await {
                Ok((transport, facts)) => {
                    info!(
                        address = %address,
                        genesis = %facts.genesis_hash,
                        spec_version = facts.runtime_version.spec_version,
                        "Ledger session established"
                    );
                    node_metrics::set_session_healthy(true);
                    return Ok(Self {
                        connector,
                        addresses: addresses.to_vec(),
                        transport: RwLock::new(transport),
                        address: RwLock::new(address.clone()),
                        facts: RwLock::new(Arc::new(facts)),
                        healthy: AtomicBool::new(true),
                    });
                }
                Err(e) => {
                    warn!(address = %address, error = %e, "Failed to connect to ledger node");
                    last_err = Some(e);
                }
            }
        }

        let err = last_err.unwrap_or_else(|| ChainError::connection("no endpoint reachable"));
        Err(match err {
            ChainError::Config(msg) => ChainError::Config(msg),
            other => ChainError::connection(other.to_string()),
        })
    }

    async fn open(
        connector: &dyn Connector,
        address: &str,
    ) -> Result<(Arc<dyn LedgerTransport>, SessionFacts)> {
        let transport = connector.connect(address).await?;
        let facts = SessionFacts::fetch(transport.as_ref()).await?;
        Ok((transport, facts))
    }

    pub fn transport(&self) -> Arc<dyn LedgerTransport> {
        self.transport.read().clone()
    }

    pub fn facts(&self) -> Arc<SessionFacts> {
        self.facts.read().clone()
    }

    pub fn metadata(&self) -> Arc<Metadata> {
        self.facts.read().metadata.clone()
    }

    pub fn address(&self) -> String {
        self.address.read().clone()
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
        node_metrics::set_session_healthy(healthy);
    }

    /// Ask the node for its health; updates and returns the health flag
    pub async fn health_check(&self) -> bool {
        let transport = self.transport();
        let healthy = match transport.health().await {
            Ok(health) => {
                debug!(peers = health.peers, syncing = health.is_syncing, "Ledger node healthy");
                true
            }
            Err(e) => {
                warn!(address = %self.address(), error = %e, "Ledger health check failed");
                false
            }
        };
        self.set_healthy(healthy);
        healthy
    }

    /// Replace the transport with a new connection to `address`
    ///
    /// Cached metadata survives when the node serves the same chain and the
    /// runtime spec version is unchanged. A different genesis hash means the
    /// endpoint is misconfigured; the current transport is kept.
    pub async fn reconnect(&self, address: &str) -> Result<()> {
        let transport = self.connector.connect(address).await?;
        let genesis_hash = transport.genesis_hash().await?;

        let current = self.facts();
        if genesis_hash != current.genesis_hash {
            return Err(ChainError::Config(format!(
                "{} serves chain {}, expected {}",
                address, genesis_hash, current.genesis_hash
            )));
        }

        let runtime_version = transport.runtime_version().await?;
        let facts = if runtime_version.spec_version == current.runtime_version.spec_version {
            SessionFacts {
                runtime_version,
                ..(*current).clone()
            }
        } else {
            info!(
                old = current.runtime_version.spec_version,
                new = runtime_version.spec_version,
                "Runtime upgraded, refetching metadata"
            );
            let metadata = SessionFacts::fetch_metadata(transport.as_ref()).await?;
            SessionFacts {
                event_log_key: SessionFacts::event_log_key(&metadata)?,
                metadata: Arc::new(metadata),
                genesis_hash,
                runtime_version,
            }
        };

        *self.transport.write() = transport;
        *self.facts.write() = Arc::new(facts);
        *self.address.write() = address.to_string();
        self.set_healthy(true);
        node_metrics::record_reconnect();

        info!(address = %address, "Ledger session reconnected");
        Ok(())
    }

    /// Reconnect to the first configured endpoint that accepts
    pub async fn reconnect_any(&self) -> Result<String> {
        let mut last_err = ChainError::connection("no endpoint reachable");
        for address in &self.addresses {
            match self.reconnect(address).await {
                Ok(()) => return Ok(address.clone()),
                Err(e @ ChainError::Config(_)) => {
                    warn!(address = %address, error = %e, "Endpoint serves another chain");
                    last_err = e;
                }
                Err(e) => {
                    warn!(address = %address, error = %e, "Reconnect failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Re-read the runtime version and refresh metadata if the runtime changed
    ///
    /// Returns whether the metadata was replaced.
    pub async fn refresh(&self) -> Result<bool> {
        let transport = self.transport();
        let runtime_version = transport.runtime_version().await?;
        let current = self.facts();

        if runtime_version == current.runtime_version {
            return Ok(false);
        }

        let replaced = runtime_version.spec_version != current.runtime_version.spec_version;
        let facts = if replaced {
            let metadata = SessionFacts::fetch_metadata(transport.as_ref()).await?;
            SessionFacts {
                event_log_key: SessionFacts::event_log_key(&metadata)?,
                metadata: Arc::new(metadata),
                genesis_hash: current.genesis_hash,
                runtime_version,
            }
        } else {
            SessionFacts {
                runtime_version,
                ..(*current).clone()
            }
        };
        *self.facts.write() = Arc::new(facts);

        if replaced {
            info!(
                spec_version = runtime_version.spec_version,
                "Session metadata refreshed"
            );
        }
        Ok(replaced)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address())
            .field("healthy", &self.is_healthy())
            .finish()
    }
}
