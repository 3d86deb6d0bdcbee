//! Configuration - Type-safe, validated config
//!
//! Loads from `config.toml`. Secrets come from the environment (optionally a
//! `.env` file), never from the TOML.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::core::{Error, Result};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub exchange: ExchangeConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// GraphQL query/mutation endpoint
    pub graphql_endpoint: String,

    /// Real-time endpoint
    pub websocket_endpoint: String,

    /// API key sent with every request (loaded from env if not provided)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Pairs to stream, by local name (e.g. "PDEX-USDT" with the alias below)
    #[serde(default)]
    pub trading_pairs: Vec<String>,

    /// Prefix of generated client order ids
    #[serde(default = "default_client_order_id_prefix")]
    pub client_order_id_prefix: String,

    /// Numeric asset id → local ticker, e.g. "1" = "USDT"
    #[serde(default)]
    pub asset_aliases: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between polling passes
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Bounded wait for an exchange order id, in seconds
    #[serde(default = "default_exchange_id_timeout")]
    pub exchange_id_timeout_secs: u64,

    /// Consecutive not-found results before an order is marked failed
    #[serde(default = "default_not_found_threshold")]
    pub not_found_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Session is torn down after this long without any inbound frame
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Per-channel handler queue depth
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

fn default_client_order_id_prefix() -> String {
    "ALPH".to_string()
}
fn default_poll_interval() -> u64 {
    10
}
fn default_exchange_id_timeout() -> u64 {
    10
}
fn default_not_found_threshold() -> u32 {
    3
}
fn default_idle_timeout() -> u64 {
    60
}
fn default_channel_buffer() -> usize {
    1024
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            graphql_endpoint: "http://127.0.0.1:8080/graphql".to_string(),
            websocket_endpoint: "ws://127.0.0.1:8080/graphql/realtime".to_string(),
            api_key: None,
            trading_pairs: vec!["PDEX-1".to_string()],
            client_order_id_prefix: default_client_order_id_prefix(),
            asset_aliases: HashMap::new(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            exchange_id_timeout_secs: default_exchange_id_timeout(),
            not_found_threshold: default_not_found_threshold(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn exchange_id_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_id_timeout_secs)
    }
}

impl StreamConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location (project root config.toml).
    pub fn load_default() -> Self {
        let candidates = [
            "config.toml",
            concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml"),
        ];

        for path in &candidates {
            match Self::load(Path::new(path)) {
                Ok(cfg) => {
                    tracing::info!("Loaded config from {}", path);
                    return cfg;
                }
                Err(e) => tracing::debug!("Skipping {}: {}", path, e),
            }
        }

        tracing::warn!("No config.toml found, using defaults");
        Self::default()
    }

    fn validate(&self) -> Result<()> {
        if self.sync.poll_interval_secs == 0 {
            return Err(Error::Config("sync.poll_interval_secs must be >= 1".into()));
        }
        if self.sync.not_found_threshold == 0 {
            return Err(Error::Config("sync.not_found_threshold must be >= 1".into()));
        }
        if self.stream.idle_timeout_secs == 0 {
            return Err(Error::Config("stream.idle_timeout_secs must be >= 1".into()));
        }
        if self.stream.channel_buffer == 0 {
            return Err(Error::Config("stream.channel_buffer must be >= 1".into()));
        }
        if self.exchange.client_order_id_prefix.len() >= crate::codec::CLIENT_ORDER_ID_MAX_LEN {
            return Err(Error::Config("exchange.client_order_id_prefix is too long".into()));
        }
        Ok(())
    }

    /// API key from the config, falling back to `PDEX_API_KEY`.
    pub fn api_key(&self) -> Option<String> {
        self.exchange
            .api_key
            .clone()
            .or_else(|| std::env::var("PDEX_API_KEY").ok())
    }
}

/// Signing seed from `PDEX_SIGNING_SEED` (hex or base64), after loading `.env`.
pub fn signing_seed_from_env() -> Result<String> {
    let _ = dotenv::dotenv();
    std::env::var("PDEX_SIGNING_SEED")
        .map_err(|_| Error::Config("PDEX_SIGNING_SEED is not set".into()))
}
