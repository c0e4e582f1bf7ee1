//! Configuration parsing for the price hub.
//!
//! A hub is built from a [`HubConfig`]. The runner reads a single JSON file
//! holding logging metadata, the hub settings, the watchlists to subscribe,
//! and optional portfolio holdings to value.
//!
//! # Example config
//!
//! ```json
//! {
//!   "TickHub": { "module_name": "tickhub", "log_path": "/tmp/log" },
//!   "hub": {
//!     "endpoint_url": "wss://prices.example.com/ws",
//!     "max_reconnect_attempts": 5,
//!     "reconnect_delay_ms": 1000,
//!     "missing_change": "preserve"
//!   },
//!   "watchlists": [{ "name": "home", "symbols": ["btc", "eth"] }],
//!   "holdings": [{ "symbol": "btc", "quantity": 0.5, "average_buy_price": 60000 }]
//! }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::HubError;
use crate::types::{BackoffPolicy, Holding, MissingChangePolicy};

/// Top-level runner config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Module metadata (name, log path).
    #[serde(rename = "TickHub")]
    pub tick_hub: Option<ModuleMeta>,

    /// Hub construction options.
    pub hub: HubConfig,

    /// Symbol groups, one subscriber each.
    #[serde(default)]
    pub watchlists: Vec<WatchlistConfig>,

    /// Portfolio positions to value against live prices.
    #[serde(default)]
    pub holdings: Vec<Holding>,

    /// Seconds between portfolio reports (default: 30).
    pub report_interval_sec: Option<u64>,
}

impl AppConfig {
    /// Returns the module name, defaulting to `"tickhub"`.
    pub fn module_name(&self) -> String {
        self.tick_hub.as_ref().and_then(|m| m.module_name.clone()).unwrap_or_else(|| "tickhub".to_string())
    }

    /// Returns the log path.
    pub fn log_path(&self) -> Option<String> {
        self.tick_hub.as_ref().and_then(|m| m.log_path.clone())
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_sec.unwrap_or(30).max(1))
    }
}

/// Module metadata block.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
}

/// A named set of symbols that one consumer watches.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchlistConfig {
    pub name: String,
    pub symbols: Vec<String>,
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30_000
}

/// Options supplied at hub construction.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// WebSocket URL of the price stream (`ws://` or `wss://`).
    pub endpoint_url: String,

    /// Reconnect attempts per outage before giving up (default: 5).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Delay between reconnect attempts in milliseconds (default: 1000).
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Delay growth between attempts (default: fixed).
    #[serde(default)]
    pub backoff: BackoffPolicy,

    /// Cap for exponential backoff in milliseconds (default: 30000).
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Keep-alive ping interval in seconds. No pings when unset.
    pub ping_interval_sec: Option<u64>,

    /// Extra HTTP headers for the WebSocket handshake.
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,

    /// What to do with updates that carry a price but no change field.
    #[serde(default)]
    pub missing_change: MissingChangePolicy,
}

impl HubConfig {
    /// Config with defaults for everything but the endpoint.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            backoff: BackoffPolicy::default(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            ping_interval_sec: None,
            extra_headers: HashMap::new(),
            missing_change: MissingChangePolicy::default(),
        }
    }

    /// Check the endpoint scheme and delay settings.
    pub fn validate(&self) -> Result<(), HubError> {
        let url = url::Url::parse(&self.endpoint_url)
            .map_err(|e| HubError::Config(format!("invalid endpoint_url '{}': {e}", self.endpoint_url)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(HubError::Config(format!("endpoint_url must use ws:// or wss://, got '{}'", url.scheme())));
        }
        if self.reconnect_delay_ms == 0 {
            return Err(HubError::Config("reconnect_delay_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms.max(self.reconnect_delay_ms))
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        self.ping_interval_sec.filter(|s| *s > 0).map(Duration::from_secs)
    }
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    config.hub.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_defaults() {
        let cfg: HubConfig = serde_json::from_str(r#"{"endpoint_url":"wss://example.com/ws"}"#).unwrap();
        assert_eq!(cfg.max_reconnect_attempts, 5);
        assert_eq!(cfg.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(cfg.backoff, BackoffPolicy::Fixed);
        assert_eq!(cfg.missing_change, MissingChangePolicy::Preserve);
        assert!(cfg.ping_interval().is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_http_endpoint() {
        let cfg = HubConfig::new("https://example.com");
        assert!(matches!(cfg.validate(), Err(HubError::Config(_))));
        assert!(HubConfig::new("not a url").validate().is_err());
    }

    #[test]
    fn rejects_zero_delay() {
        let mut cfg = HubConfig::new("ws://127.0.0.1:9000");
        cfg.reconnect_delay_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn app_config_parses() {
        let json = r#"{
            "TickHub": { "module_name": "demo" },
            "hub": { "endpoint_url": "ws://localhost:8080", "missing_change": "zero" },
            "watchlists": [{ "name": "home", "symbols": ["btc", "eth"] }],
            "holdings": [{ "symbol": "btc", "quantity": 0.5, "average_buy_price": 60000 }]
        }"#;
        let cfg: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.module_name(), "demo");
        assert_eq!(cfg.hub.missing_change, MissingChangePolicy::Zero);
        assert_eq!(cfg.watchlists[0].symbols.len(), 2);
        assert_eq!(cfg.holdings[0].symbol.as_str(), "BTC");
        assert_eq!(cfg.report_interval(), Duration::from_secs(30));
    }
}
