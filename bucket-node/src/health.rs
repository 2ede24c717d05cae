//! Session watchdog for the bucket storage miner
//!
//! Periodically checks the ledger session, reconnects across the configured
//! endpoints when the node stops answering, and publishes the result to the
//! shared [`HealthState`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainClient, ConfirmationOutcome, Session};
use crate::metrics::{HealthState, NodeMetrics};

/// Health checker that keeps the ledger session alive
pub struct SessionWatchdog {
    session: Arc<Session>,
    state: Arc<RwLock<HealthState>>,
    metrics: Option<NodeMetrics>,
    check_interval: Duration,
}

impl SessionWatchdog {
    /// Create a new watchdog
    pub fn new(session: Arc<Session>, state: Arc<RwLock<HealthState>>) -> Self {
        Self {
            session,
            state,
            metrics: None,
            check_interval: Duration::from_secs(30),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_metrics(mut self, metrics: NodeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start the health check loop
    pub async fn run(&self) {
        info!(
            address = %self.session.address(),
            interval_secs = self.check_interval.as_secs(),
            "Starting session watchdog"
        );

        let mut interval = tokio::time::interval(self.check_interval);

        loop {
            interval.tick().await;
            self.check_once().await;
        }
    }

    /// Run one check and recovery round; returns whether the session is usable
    pub async fn check_once(&self) -> bool {
        let mut session_ok = self.session.health_check().await;

        if !session_ok {
            match self.session.reconnect_any().await {
                Ok(address) => {
                    // A fresh connection can still sit on a node that does not answer
                    session_ok = self.session.health_check().await;
                    if session_ok {
                        info!(address = %address, "Session recovered");
                    } else {
                        warn!(address = %address, "Reconnected but ledger node is unhealthy");
                    }
                }
                Err(e) => {
                    error!(error = %e, "No ledger endpoint reachable");
                }
            }
        }

        let synced = if session_ok { self.check_sync().await } else { false };

        {
            let mut state = self.state.write().await;
            state.update(session_ok, synced);
        }

        debug!(session_ok = session_ok, synced = synced, "Health check completed");
        session_ok
    }

    async fn check_sync(&self) -> bool {
        let transport = self.session.transport();
        match transport.health().await {
            Ok(health) => {
                if health.is_syncing {
                    warn!(peers = health.peers, "Ledger node is still syncing");
                }
                if let Some(metrics) = &self.metrics {
                    if let Ok(Some(header)) = transport.header(None).await {
                        metrics.update_block_height(header.number);
                    }
                }
                !health.is_syncing
            }
            Err(_) => false,
        }
    }
}

/// Periodically claim rewards when some are available
pub struct RewardClaimer {
    client: Arc<ChainClient>,
    metrics: Option<NodeMetrics>,
    interval: Duration,
}

impl RewardClaimer {
    pub fn new(client: Arc<ChainClient>, interval: Duration) -> Self {
        Self {
            client,
            metrics: None,
            interval,
        }
    }

    pub fn with_metrics(mut self, metrics: NodeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            interval.tick().await;
            self.claim_once().await;
        }
    }

    /// One claim attempt; failures are logged and retried next round
    pub async fn claim_once(&self) {
        if let Some(metrics) = &self.metrics {
            if let Ok(info) = self.client.reward_info(self.client.account()).await {
                metrics.update_claimable(info.total_rewards_currently_available);
            }
        }

        match self.client.claim_if_available().await {
            Ok(Some(outcome @ ConfirmationOutcome::Confirmed(_))) => {
                info!(outcome = %outcome, "Rewards claimed");
            }
            Ok(Some(outcome)) => {
                warn!(outcome = %outcome, "Reward claim did not confirm");
            }
            Ok(None) => debug!("No rewards to claim"),
            Err(e) => warn!(error = %e, "Reward claim failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{MockConnector, MockLedger};

    async fn session(connector: &MockConnector) -> Arc<Session> {
        let addrs = vec!["mock://a".to_string(), "mock://b".to_string()];
        Arc::new(
            Session::connect_any(Arc::new(connector.clone()), &addrs)
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_healthy_session() {
        let ledger = MockLedger::new();
        let connector = MockConnector::new(ledger.clone());
        let state = Arc::new(RwLock::new(HealthState::default()));
        let watchdog = SessionWatchdog::new(session(&connector).await, state.clone());

        assert!(watchdog.check_once().await);
        assert!(state.read().await.is_healthy);
    }

    #[tokio::test]
    async fn test_unhealthy_session_reconnects() {
        let ledger = MockLedger::new();
        let connector = MockConnector::new(ledger.clone());
        let session = session(&connector).await;
        let state = Arc::new(RwLock::new(HealthState::default()));
        let watchdog = SessionWatchdog::new(session.clone(), state.clone());

        // Node stops answering; reconnecting reaches the same silent node
        ledger.set_healthy(false);
        assert!(!watchdog.check_once().await);
        assert!(!state.read().await.session_ok);
        assert!(!state.read().await.is_healthy);
        assert!(!session.is_healthy());
        assert_eq!(connector.connections().len(), 2);

        connector.set_refused("mock://a", true);
        connector.set_refused("mock://b", true);
        assert!(!watchdog.check_once().await);
        assert!(!state.read().await.session_ok);
        assert!(!session.is_healthy());

        connector.set_refused("mock://b", false);
        assert!(!watchdog.check_once().await);
        assert_eq!(session.address(), "mock://b");

        ledger.set_healthy(true);
        assert!(watchdog.check_once().await);
        assert!(state.read().await.session_ok);
        assert!(state.read().await.is_healthy);
        assert!(session.is_healthy());
    }
}
