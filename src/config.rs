//! Application configuration
//!
//! Everything the core needs is passed in explicitly through these structs;
//! nothing reads the environment or holds credentials in a global.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Slack between the transfer timeout and the stale-reservation threshold
const STALE_MARGIN_MS: u64 = 5_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub msisdn: MsisdnConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// PostgreSQL connection URL for the ledger and transfer records
    #[serde(default)]
    pub postgres_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    /// "hourly", "daily", anything else never rotates
    pub rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "bundle_settlement.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
        }
    }
}

/// Settlement gateway endpoint and dealer credentials
#[derive(Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    /// Dealer MSISDN the bundles are debited from upstream
    pub dealer_msisdn: String,
    /// Product code sent with every transfer
    #[serde(default = "default_product_code")]
    pub product_code: String,
    #[serde(default = "default_balance_timeout_ms")]
    pub balance_timeout_ms: u64,
    #[serde(default = "default_transfer_timeout_ms")]
    pub transfer_timeout_ms: u64,
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,
}

fn default_product_code() -> String {
    "DATA".to_string()
}

fn default_balance_timeout_ms() -> u64 {
    5_000
}

fn default_transfer_timeout_ms() -> u64 {
    30_000
}

fn default_status_timeout_ms() -> u64 {
    5_000
}

impl ProviderConfig {
    pub fn balance_timeout(&self) -> Duration {
        Duration::from_millis(self.balance_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }
}

// Keep the password out of logs.
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"***")
            .field("dealer_msisdn", &self.dealer_msisdn)
            .field("product_code", &self.product_code)
            .field("balance_timeout_ms", &self.balance_timeout_ms)
            .field("transfer_timeout_ms", &self.transfer_timeout_ms)
            .field("status_timeout_ms", &self.status_timeout_ms)
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TransferConfig {
    /// Smallest amount (MB) the provider accepts
    pub min_amount: i64,
    /// Namespace prefix for generated idempotency keys
    pub key_prefix: String,
    /// How long `submit` waits for a terminal answer before returning Pending
    pub submit_wait_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            min_amount: 50,
            key_prefix: "BDL".to_string(),
            submit_wait_ms: 35_000,
        }
    }
}

impl TransferConfig {
    pub fn submit_wait(&self) -> Duration {
        Duration::from_millis(self.submit_wait_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReconciliationConfig {
    /// How often the worker scans for unresolved transfers
    pub scan_interval_secs: u64,
    /// How long a ProviderUnknown transfer waits before its first status check
    pub grace_period_secs: u64,
    /// Reserved transfers older than this are presumed orphaned by a crash
    pub stale_reserved_secs: u64,
    /// First backoff delay; doubles per attempt
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    /// Status checks before a transfer is escalated to manual review
    pub max_attempts: u32,
    pub batch_size: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            grace_period_secs: 60,
            stale_reserved_secs: 300,
            base_backoff_secs: 30,
            max_backoff_secs: 3_600,
            max_attempts: 8,
            batch_size: 100,
        }
    }
}

impl ReconciliationConfig {
    /// Delay before reconciliation attempt number `attempts + 1`
    pub fn backoff(&self, attempts: u32) -> Duration {
        let factor = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
        let secs = self
            .base_backoff_secs
            .saturating_mul(factor)
            .min(self.max_backoff_secs);
        Duration::from_secs(secs)
    }
}

/// Dialing plan used by the phone normalizer
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MsisdnConfig {
    pub country_code: String,
    pub trunk_prefix: char,
    /// First five digits of known carrier ranges (advisory)
    pub carrier_prefixes: Vec<String>,
}

impl Default for MsisdnConfig {
    fn default() -> Self {
        Self {
            country_code: "233".to_string(),
            trunk_prefix: '0',
            carrier_prefixes: [
                "23320", "23324", "23325", "23326", "23327", "23350", "23353", "23354", "23355",
                "23356", "23357", "23359",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Transfer submissions allowed per account per window
    pub max_submissions: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_submissions: 30,
            window_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer.min_amount <= 0 {
            return Err(ConfigError::Invalid(
                "transfer.min_amount must be positive".to_string(),
            ));
        }
        if self.reconciliation.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "reconciliation.max_attempts must be at least 1".to_string(),
            ));
        }
        // A send still in flight must never look orphaned to recovery
        let stale_ms = self.reconciliation.stale_reserved_secs.saturating_mul(1_000);
        if stale_ms <= self.provider.transfer_timeout_ms + STALE_MARGIN_MS {
            return Err(ConfigError::Invalid(format!(
                "reconciliation.stale_reserved_secs ({}s) must exceed provider.transfer_timeout_ms ({}ms) by more than {}ms",
                self.reconciliation.stale_reserved_secs,
                self.provider.transfer_timeout_ms,
                STALE_MARGIN_MS
            )));
        }
        if !self.msisdn.country_code.chars().all(|c| c.is_ascii_digit())
            || self.msisdn.country_code.is_empty()
        {
            return Err(ConfigError::Invalid(format!(
                "msisdn.country_code must be digits: {}",
                self.msisdn.country_code
            )));
        }
        Ok(())
    }
}
