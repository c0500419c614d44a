//! Application configuration
//!
//! Values are layered, highest priority first:
//! 1. Environment variables prefixed with `SPOTBOT__` (`SPOTBOT__BINANCE__API_KEY`)
//! 2. The TOML file passed on the command line
//! 3. Defaults below

use config::{Config, Environment as EnvSource, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{BotError, Result};
use crate::models::DEFAULT_QUOTE_CURRENCY;

/// Where orders go
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Offline replay against the local gateway
    #[default]
    Simulation,
    Testnet,
    Mainnet,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub env: Environment,
    #[serde(default = "default_quote_currency")]
    pub quote_currency: String,
    #[serde(default)]
    pub strategy: StrategySettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub binance: BinanceSettings,
    #[serde(default)]
    pub replay: ReplaySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategySettings {
    #[serde(rename = "type", default = "default_strategy_type")]
    pub strategy_type: String,
    #[serde(default)]
    pub props: HashMap<String, String>,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            strategy_type: default_strategy_type(),
            props: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_tick_channel_size")]
    pub tick_channel_size: usize,
    #[serde(default = "default_ack_channel_size")]
    pub ack_channel_size: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            tick_channel_size: default_tick_channel_size(),
            ack_channel_size: default_ack_channel_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for BinanceSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            rest_url: default_rest_url(),
            ws_url: default_ws_url(),
            recv_window_ms: default_recv_window_ms(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

impl BinanceSettings {
    /// Public testnet endpoints, used when `env = "testnet"` and no URL was set
    pub fn testnet(self) -> Self {
        let rest_url = if self.rest_url == default_rest_url() {
            "https://testnet.binance.vision".to_string()
        } else {
            self.rest_url
        };
        let ws_url = if self.ws_url == default_ws_url() {
            "wss://testnet.binance.vision/ws".to_string()
        } else {
            self.ws_url
        };
        Self {
            rest_url,
            ws_url,
            ..self
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplaySettings {
    /// Starting wallet of the simulated account
    #[serde(default = "default_initial_balances")]
    pub initial_balances: HashMap<String, Decimal>,
    /// Price history CSV files; when empty, synthetic series are generated
    #[serde(default)]
    pub price_files: Vec<String>,
    /// Ticks per asset for synthetic series
    #[serde(default = "default_synthetic_ticks")]
    pub synthetic_ticks: usize,
    /// Opening price per asset for synthetic series
    #[serde(default = "default_start_prices")]
    pub start_prices: HashMap<String, Decimal>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            initial_balances: default_initial_balances(),
            price_files: Vec::new(),
            synthetic_ticks: default_synthetic_ticks(),
            start_prices: default_start_prices(),
            seed: None,
        }
    }
}

impl ReplaySettings {
    /// Balances keyed by upper case asset
    pub fn balances(&self) -> HashMap<String, Decimal> {
        upper_keys(&self.initial_balances)
    }

    pub fn opening_prices(&self) -> HashMap<String, Decimal> {
        upper_keys(&self.start_prices)
    }
}

fn upper_keys(map: &HashMap<String, Decimal>) -> HashMap<String, Decimal> {
    map.iter()
        .map(|(k, v)| (k.to_uppercase(), *v))
        .collect()
}

fn default_quote_currency() -> String {
    DEFAULT_QUOTE_CURRENCY.to_string()
}

fn default_strategy_type() -> String {
    "PTS".to_string()
}

fn default_tick_channel_size() -> usize {
    64
}

fn default_ack_channel_size() -> usize {
    1024
}

fn default_rest_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_ws_url() -> String {
    "wss://stream.binance.com:9443/ws".to_string()
}

fn default_recv_window_ms() -> u64 {
    5000
}

fn default_requests_per_minute() -> u32 {
    600
}

fn default_initial_balances() -> HashMap<String, Decimal> {
    HashMap::from([
        ("USDT".to_string(), Decimal::new(1000, 0)),
        ("BTC".to_string(), Decimal::new(5, 2)),
        ("ETH".to_string(), Decimal::new(1, 0)),
    ])
}

fn default_synthetic_ticks() -> usize {
    500
}

fn default_start_prices() -> HashMap<String, Decimal> {
    HashMap::from([
        ("BTC".to_string(), Decimal::new(40000, 0)),
        ("ETH".to_string(), Decimal::new(2500, 0)),
    ])
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.quote_currency.trim().is_empty() {
            return Err(BotError::Configuration(
                "quote_currency must not be empty".to_string(),
            ));
        }
        if self.pipeline.tick_channel_size == 0 || self.pipeline.ack_channel_size == 0 {
            return Err(BotError::Configuration(
                "pipeline channel sizes must be positive".to_string(),
            ));
        }
        if self.env != Environment::Simulation
            && (self.binance.api_key.is_empty() || self.binance.secret_key.is_empty())
        {
            return Err(BotError::Configuration(
                "binance api_key and secret_key are required outside simulation".to_string(),
            ));
        }
        if self.binance.requests_per_minute == 0 {
            return Err(BotError::Configuration(
                "binance requests_per_minute must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from an optional file and the environment
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    dotenvy::dotenv().ok();

    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if !Path::new(path).exists() {
            return Err(BotError::Configuration(format!(
                "config file {} does not exist",
                path
            )));
        }
        builder = builder.add_source(File::with_name(path));
    }

    builder = builder.add_source(
        EnvSource::with_prefix("SPOTBOT")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let mut config: AppConfig = builder.build()?.try_deserialize()?;
    config.quote_currency = config.quote_currency.trim().to_uppercase();
    config.validate()?;

    if config.env == Environment::Testnet {
        config.binance = config.binance.testnet();
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid_simulation() {
        let config = load_config(None).unwrap();
        assert_eq!(config.env, Environment::Simulation);
        assert_eq!(config.quote_currency, "USDT");
        assert_eq!(config.pipeline.tick_channel_size, 64);
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join(format!("spotbot-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
quote_currency = "busd"

[strategy]
type = "DTS"

[strategy.props]
buyThreshold = "3"

[pipeline]
ack_channel_size = 8

[replay]
synthetic_ticks = 42
"#
        )
        .unwrap();

        let config = load_config(path.to_str()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.quote_currency, "BUSD");
        assert_eq!(config.strategy.strategy_type, "DTS");
        assert_eq!(config.pipeline.ack_channel_size, 8);
        assert_eq!(config.pipeline.tick_channel_size, 64);
        assert_eq!(config.replay.synthetic_ticks, 42);
        assert!(config
            .strategy
            .props
            .keys()
            .any(|k| k.eq_ignore_ascii_case("buyThreshold")));
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let result = load_config(Some("/definitely/not/here.toml"));
        assert!(matches!(result, Err(BotError::Configuration(_))));
    }

    #[test]
    fn test_live_env_requires_credentials() {
        let config = AppConfig {
            env: Environment::Mainnet,
            quote_currency: "USDT".to_string(),
            strategy: StrategySettings::default(),
            pipeline: PipelineSettings::default(),
            database_url: None,
            redis_url: None,
            binance: BinanceSettings::default(),
            replay: ReplaySettings::default(),
        };
        assert!(matches!(config.validate(), Err(BotError::Configuration(_))));
    }

    #[test]
    fn test_testnet_overrides_default_urls_only() {
        let settings = BinanceSettings {
            ws_url: "wss://custom".to_string(),
            ..BinanceSettings::default()
        }
        .testnet();
        assert_eq!(settings.rest_url, "https://testnet.binance.vision");
        assert_eq!(settings.ws_url, "wss://custom");
    }
}
