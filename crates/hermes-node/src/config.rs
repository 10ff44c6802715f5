//! Node configuration loading and management.

use anyhow::Context;
use hermes_core::{Address, ChannelSnapshot, HermesConfig, Identity, RetrySettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Full configuration for the Hermes node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HermesNodeConfig {
    /// Settler settings.
    #[serde(default)]
    pub settlement: SettlementConfig,

    /// Identities owned by this node.
    #[serde(default)]
    pub identities: IdentitiesConfig,

    /// Seed data for the in-process ledger.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// API server settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Hermes address, hex with optional 0x prefix.
    #[serde(default = "default_hermes_address")]
    pub hermes_address: String,
    /// Fraction of the available balance at or below which to settle.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Settlement window in milliseconds.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdentitiesConfig {
    /// Local identity addresses loaded on node start.
    #[serde(default)]
    pub local: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LedgerConfig {
    /// Hermes fee in basis points.
    #[serde(default)]
    pub fee_bps: u16,
    /// Channels opened at startup.
    #[serde(default)]
    pub channels: Vec<ChannelSeed>,
}

/// A channel known to the ledger at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSeed {
    pub identity: String,
    pub balance: u64,
    #[serde(default)]
    pub settled: u64,
    pub stake: u64,
    #[serde(default = "default_true")]
    pub registered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API listen address.
    #[serde(default = "default_api_addr")]
    pub listen_addr: String,
    /// API port.
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the data directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_hermes_address() -> String {
    Address::default().to_string()
}
fn default_threshold() -> f64 {
    0.1
}
fn default_max_wait_ms() -> u64 {
    600_000
}
fn default_queue_capacity() -> usize {
    32
}
fn default_retry_initial_ms() -> u64 {
    1_000
}
fn default_retry_max_ms() -> u64 {
    30_000
}
fn default_retry_multiplier() -> f64 {
    2.0
}
fn default_retry_jitter() -> f64 {
    0.1
}
fn default_true() -> bool {
    true
}
fn default_api_addr() -> String {
    "127.0.0.1".into()
}
fn default_api_port() -> u16 {
    9101
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            hermes_address: default_hermes_address(),
            threshold: default_threshold(),
            max_wait_ms: default_max_wait_ms(),
            queue_capacity: default_queue_capacity(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
            retry_multiplier: default_retry_multiplier(),
            retry_jitter: default_retry_jitter(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_api_addr(),
            port: default_api_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ChannelSeed {
    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot::new(
            self.balance as u128,
            self.settled as u128,
            self.stake as u128,
        )
    }
}

impl HermesNodeConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: HermesNodeConfig = toml::from_str(&contents)
                .with_context(|| format!("invalid config file {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the current config to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Build and validate the settler configuration.
    pub fn hermes_config(&self) -> anyhow::Result<HermesConfig> {
        let s = &self.settlement;
        let hermes_address: Address = s
            .hermes_address
            .parse()
            .with_context(|| format!("invalid hermes address {:?}", s.hermes_address))?;

        let config = HermesConfig {
            hermes_address,
            threshold: s.threshold,
            max_wait_for_settlement: Duration::from_millis(s.max_wait_ms),
            settle_queue_capacity: s.queue_capacity,
            retry: RetrySettings {
                initial_interval: Duration::from_millis(s.retry_initial_ms),
                max_interval: Duration::from_millis(s.retry_max_ms),
                multiplier: s.retry_multiplier,
                jitter: s.retry_jitter,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn local_identities(&self) -> anyhow::Result<Vec<Identity>> {
        self.identities
            .local
            .iter()
            .map(|raw| Identity::new(raw.as_str()).with_context(|| format!("invalid identity {:?}", raw)))
            .collect()
    }

    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.listen_addr, self.api.port)
    }
}
