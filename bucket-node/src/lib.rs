//! Bucket Storage Miner Library
//!
//! Provides the components a storage miner needs to talk to the ledger:
//! - Configuration management
//! - Ledger session, state queries, call signing and submission
//! - Prometheus metrics and health checking
//! - Session watchdog and periodic reward claims

pub mod chain;
pub mod config;
pub mod health;
pub mod metrics;

pub use config::{ChainSettings, ConfigError, MetricsSettings, MinerSettings, NodeConfig};

pub use chain::{ChainClient, ChainError, ConfirmationOutcome};
pub use health::{RewardClaimer, SessionWatchdog};
pub use metrics::{init_metrics, HealthState, MetricsServer, NodeMetrics};
