//! Prometheus metrics for the bucket storage miner
//!
//! Exposes session health, submission outcomes and chain progress.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// Metric names as constants
pub mod names {
    // Session metrics
    pub const SESSION_HEALTHY: &str = "bucket_session_healthy";
    pub const RECONNECTS_TOTAL: &str = "bucket_reconnects_total";

    // Submission metrics
    pub const SUBMISSIONS_TOTAL: &str = "bucket_submissions_total";
    pub const CONFIRMATION_DURATION: &str = "bucket_confirmation_seconds";

    // Chain metrics
    pub const BLOCK_HEIGHT: &str = "bucket_block_height";
    pub const REWARDS_CLAIMABLE: &str = "bucket_rewards_claimable_units";

    // Node metrics
    pub const NODE_UP: &str = "bucket_node_up";
    pub const NODE_START_TIME: &str = "bucket_node_start_time_seconds";
}

/// Initialize metric descriptions
pub fn init_metrics() {
    describe_gauge!(
        names::SESSION_HEALTHY,
        "Whether the ledger session is healthy (1) or not (0)"
    );
    describe_counter!(
        names::RECONNECTS_TOTAL,
        "Number of successful ledger reconnects"
    );

    describe_counter!(
        names::SUBMISSIONS_TOTAL,
        "Submitted transactions by confirmation outcome"
    );
    describe_histogram!(
        names::CONFIRMATION_DURATION,
        "Time from submission to confirmation outcome in seconds"
    );

    describe_gauge!(names::BLOCK_HEIGHT, "Best block height seen by the miner");
    describe_gauge!(
        names::REWARDS_CLAIMABLE,
        "Rewards currently claimable by this miner, in chain units"
    );

    describe_gauge!(names::NODE_UP, "Whether the miner is up (1) or down (0)");
    describe_gauge!(
        names::NODE_START_TIME,
        "Unix timestamp when the miner started"
    );
}

pub fn set_session_healthy(healthy: bool) {
    gauge!(names::SESSION_HEALTHY).set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_reconnect() {
    counter!(names::RECONNECTS_TOTAL).increment(1);
}

/// Record one finished submission under its outcome label
pub fn record_submission(outcome: &'static str, elapsed: Duration) {
    counter!(names::SUBMISSIONS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::CONFIRMATION_DURATION, "outcome" => outcome).record(elapsed.as_secs_f64());
}

/// Per-account metrics recorder
#[derive(Clone)]
pub struct NodeMetrics {
    account: String,
    start_time: std::time::Instant,
}

impl NodeMetrics {
    /// Create a new metrics recorder for the miner account
    pub fn new(account: impl Into<String>) -> Self {
        let metrics = Self {
            account: account.into(),
            start_time: std::time::Instant::now(),
        };

        gauge!(names::NODE_UP, "account" => metrics.account.clone()).set(1.0);
        let started = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        gauge!(names::NODE_START_TIME, "account" => metrics.account.clone()).set(started);

        metrics
    }

    pub fn update_block_height(&self, height: u64) {
        gauge!(names::BLOCK_HEIGHT, "account" => self.account.clone()).set(height as f64);
    }

    pub fn update_claimable(&self, units: u128) {
        gauge!(names::REWARDS_CLAIMABLE, "account" => self.account.clone()).set(units as f64);
    }

    /// Mark node as down
    pub fn mark_down(&self) {
        gauge!(names::NODE_UP, "account" => self.account.clone()).set(0.0);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// HTTP server for metrics endpoint
pub struct MetricsServer {
    handle: PrometheusHandle,
    addr: SocketAddr,
}

impl MetricsServer {
    /// Create a new metrics server
    pub fn new(port: u16) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

        let builder = PrometheusBuilder::new();
        let handle = builder.install_recorder()?;

        Ok(Self { handle, addr })
    }

    /// Start the metrics HTTP server
    pub async fn start(
        self,
        health_path: String,
        metrics_path: String,
        health_state: Arc<RwLock<HealthState>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};

        let handle = self.handle;

        let health_handler = {
            let state = health_state.clone();
            move || {
                let state = state.clone();
                async move {
                    let health = state.read().await;
                    if health.is_healthy {
                        (StatusCode::OK, "OK").into_response()
                    } else {
                        (StatusCode::SERVICE_UNAVAILABLE, "UNHEALTHY").into_response()
                    }
                }
            }
        };

        let metrics_handler = move || {
            let handle = handle.clone();
            async move { handle.render() }
        };

        let app = Router::new()
            .route(&health_path, get(health_handler))
            .route(&metrics_path, get(metrics_handler));

        info!(addr = %self.addr, "Starting metrics server");

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Health state served on the health endpoint
#[derive(Debug, Clone)]
pub struct HealthState {
    pub is_healthy: bool,
    pub session_ok: bool,
    pub synced: bool,
    pub last_check: std::time::Instant,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            is_healthy: true,
            session_ok: true,
            synced: true,
            last_check: std::time::Instant::now(),
        }
    }
}

impl HealthState {
    /// Update health state
    pub fn update(&mut self, session_ok: bool, synced: bool) {
        self.session_ok = session_ok;
        self.synced = synced;
        self.is_healthy = session_ok && synced;
        self.last_check = std::time::Instant::now();
    }
}
