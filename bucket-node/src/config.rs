//! Configuration management for the bucket storage miner
//!
//! Supports loading from TOML files and environment variables.

use std::path::{Path, PathBuf};

use bucket_core::AccountId32;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::types::DEFAULT_TX_TIMEOUT_SECS;
use crate::chain::EraPolicy;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Complete node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Ledger connection and signing
    #[serde(default)]
    pub chain: ChainSettings,

    /// Miner registration parameters
    #[serde(default)]
    pub miner: MinerSettings,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsSettings,
}

impl NodeConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain.rpc_addrs.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one rpc address is required".to_string(),
            ));
        }
        for addr in &self.chain.rpc_addrs {
            if !(addr.starts_with("ws://") || addr.starts_with("wss://")) {
                return Err(ConfigError::ValidationError(format!(
                    "rpc address must be ws:// or wss://: {}",
                    addr
                )));
            }
        }

        if self.chain.tx_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "tx_timeout_secs cannot be 0".to_string(),
            ));
        }

        if let EraPolicy::Mortal { period } = self.chain.era {
            if !(4..=65536).contains(&period) {
                return Err(ConfigError::ValidationError(format!(
                    "mortal era period must be within 4..=65536, got {}",
                    period
                )));
            }
        }

        self.chain.income_account()?;

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::ValidationError(
                "metrics port cannot be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Override config with CLI arguments
    pub fn with_overrides(mut self, rpc_addr: Option<String>, metrics_port: Option<u16>) -> Self {
        if let Some(addr) = rpc_addr {
            self.chain.rpc_addrs = vec![addr];
        }
        if let Some(port) = metrics_port {
            self.metrics.port = port;
        }
        self
    }

    /// Apply environment variable overrides to all settings
    pub fn with_env_overrides(mut self) -> Self {
        self.chain = self.chain.with_env_overrides();

        // Service address override (for Docker/cloud networking)
        if let Ok(addr) = std::env::var("BUCKET_SERVICE_ADDR") {
            self.miner.service_addr = addr;
        }

        self
    }
}

/// Ledger connection and signing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    /// WebSocket RPC endpoints, tried in order
    #[serde(default = "default_rpc_addrs")]
    pub rpc_addrs: Vec<String>,

    /// Hex-encoded 32-byte signing seed
    #[serde(default)]
    pub signing_seed: Option<String>,

    /// Sr25519 secret URI (`<mnemonic>//hard/soft///password`), used when no seed is given
    #[serde(default)]
    pub secret_uri: Option<String>,

    /// JSON keypair file, used when neither a seed nor a secret URI is given
    #[serde(default)]
    pub keypair_path: Option<PathBuf>,

    /// Account receiving rewards (SS58 or hex)
    #[serde(default)]
    pub income_account: Option<String>,

    /// Network prefix for displayed addresses
    #[serde(default = "default_ss58_prefix")]
    pub ss58_prefix: u16,

    /// Time to wait for a transaction to be included
    #[serde(default = "default_tx_timeout")]
    pub tx_timeout_secs: u64,

    /// Time to wait for a single RPC reply
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Interval between session health checks
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,

    #[serde(default)]
    pub era: EraPolicy,

    /// Tip paid with every transaction, in chain units
    #[serde(default)]
    pub tip: u64,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            rpc_addrs: default_rpc_addrs(),
            signing_seed: None,
            secret_uri: None,
            keypair_path: None,
            income_account: None,
            ss58_prefix: default_ss58_prefix(),
            tx_timeout_secs: default_tx_timeout(),
            request_timeout_secs: default_request_timeout(),
            health_interval_secs: default_health_interval(),
            era: EraPolicy::default(),
            tip: 0,
        }
    }
}

impl ChainSettings {
    /// Parsed income account, if configured
    pub fn income_account(&self) -> Result<Option<AccountId32>, ConfigError> {
        self.income_account
            .as_deref()
            .map(|s| {
                s.parse::<AccountId32>().map_err(|e| {
                    ConfigError::ValidationError(format!("invalid income account {}: {}", s, e))
                })
            })
            .transpose()
    }

    /// Check if a signing key is configured
    pub fn has_signing_key(&self) -> bool {
        self.signing_seed.is_some() || self.secret_uri.is_some() || self.keypair_path.is_some()
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(addrs) = std::env::var("BUCKET_RPC_ADDRS") {
            let addrs: Vec<String> = addrs
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !addrs.is_empty() {
                self.rpc_addrs = addrs;
            }
        }
        if let Ok(seed) = std::env::var("BUCKET_SIGNING_SEED") {
            self.signing_seed = Some(seed);
        }
        if let Ok(uri) = std::env::var("BUCKET_SECRET_URI") {
            self.secret_uri = Some(uri);
        }
        if let Ok(path) = std::env::var("BUCKET_KEYPAIR_PATH") {
            self.keypair_path = Some(PathBuf::from(path));
        }
        if let Ok(account) = std::env::var("BUCKET_INCOME_ACCOUNT") {
            self.income_account = Some(account);
        }
        if let Ok(timeout) = std::env::var("BUCKET_TX_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.tx_timeout_secs = secs;
            }
        }
        self
    }
}

fn default_rpc_addrs() -> Vec<String> {
    vec![
        "wss://testnet-rpc0.cess.cloud/ws/".to_string(),
        "wss://testnet-rpc1.cess.cloud/ws/".to_string(),
    ]
}

fn default_ss58_prefix() -> u16 {
    bucket_core::types::DEFAULT_SS58_PREFIX
}

fn default_tx_timeout() -> u64 {
    DEFAULT_TX_TIMEOUT_SECS
}

fn default_request_timeout() -> u64 {
    15
}

fn default_health_interval() -> u64 {
    30
}

/// Miner registration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerSettings {
    /// Address storage clients reach this miner on (`ip:port`)
    #[serde(default)]
    pub service_addr: String,

    /// Collateral pledged at registration, in whole tokens
    #[serde(default = "default_pledge_tokens")]
    pub pledge_tokens: u64,
}

impl Default for MinerSettings {
    fn default() -> Self {
        Self {
            service_addr: String::new(),
            pledge_tokens: default_pledge_tokens(),
        }
    }
}

fn default_pledge_tokens() -> u64 {
    2_000
}

/// Metrics and monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Enable Prometheus metrics endpoint
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics HTTP server port
    #[serde(default = "default_metrics_port")]
    pub port: u16,

    /// Health check endpoint path
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Metrics endpoint path
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
            health_path: default_health_path(),
            metrics_path: default_metrics_path(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.chain.rpc_addrs.len(), 2);
        assert_eq!(config.chain.tx_timeout_secs, 30);
        assert_eq!(config.chain.era, EraPolicy::Immortal);
        assert_eq!(config.metrics.port, 9090);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [chain]
            rpc_addrs = ["ws://127.0.0.1:9944"]
            signing_seed = "0x0101010101010101010101010101010101010101010101010101010101010101"
            tx_timeout_secs = 12
            era = { kind = "mortal", period = 64 }

            [miner]
            service_addr = "10.0.0.1:15001"
            pledge_tokens = 4000

            [metrics]
            enabled = false
        "#;

        let config: NodeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.chain.rpc_addrs, vec!["ws://127.0.0.1:9944".to_string()]);
        assert_eq!(config.chain.tx_timeout_secs, 12);
        assert_eq!(config.chain.era, EraPolicy::Mortal { period: 64 });
        assert_eq!(config.chain.request_timeout_secs, 15);
        assert!(config.chain.has_signing_key());
        assert_eq!(config.miner.pledge_tokens, 4000);
        assert!(!config.metrics.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_secret_uri_from_toml() {
        let toml = r#"
            [chain]
            secret_uri = "//Alice"
        "#;

        let config: NodeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.chain.secret_uri.as_deref(), Some("//Alice"));
        assert!(config.chain.signing_seed.is_none());
        assert!(config.chain.has_signing_key());
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[chain]\nrpc_addrs = [\"ws://node:9944\"]").unwrap();

        let config = NodeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.chain.rpc_addrs, vec!["ws://node:9944".to_string()]);

        let fallback = NodeConfig::load_or_default("/nonexistent/bucket.toml");
        assert_eq!(fallback.chain.rpc_addrs, default_rpc_addrs());
    }

    #[test]
    fn test_config_validation() {
        let mut config = NodeConfig::default();
        config.chain.rpc_addrs = vec!["http://node:9933".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = NodeConfig::default();
        config.chain.tx_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.chain.income_account = Some("not-an-account".to_string());
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.chain.era = EraPolicy::Mortal { period: 1 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_income_account_parsing() {
        let account = AccountId32([7u8; 32]);
        let settings = ChainSettings {
            income_account: Some(account.to_ss58(42)),
            ..Default::default()
        };
        assert_eq!(settings.income_account().unwrap(), Some(account));
        assert_eq!(ChainSettings::default().income_account().unwrap(), None);
    }

    #[test]
    fn test_config_overrides() {
        let config = NodeConfig::default()
            .with_overrides(Some("ws://override:9944".to_string()), Some(9100));

        assert_eq!(config.chain.rpc_addrs, vec!["ws://override:9944".to_string()]);
        assert_eq!(config.metrics.port, 9100);
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("BUCKET_RPC_ADDRS", "ws://a:9944, ws://b:9944");
        std::env::set_var("BUCKET_TX_TIMEOUT_SECS", "45");
        let settings = ChainSettings::default().with_env_overrides();
        std::env::remove_var("BUCKET_RPC_ADDRS");
        std::env::remove_var("BUCKET_TX_TIMEOUT_SECS");

        assert_eq!(
            settings.rpc_addrs,
            vec!["ws://a:9944".to_string(), "ws://b:9944".to_string()]
        );
        assert_eq!(settings.tx_timeout_secs, 45);
    }
}
