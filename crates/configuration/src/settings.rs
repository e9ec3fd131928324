use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::ConfigError;

/// `TRADING_MODE` from the environment. `Live` requires the exchange API key
/// pair to be present; `Paper` runs against the simulated gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradingMode {
    Paper,
    Live,
}

/// The exchange API key pair, required when `trading_mode = Live`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub key: String,
    pub secret: String,
}

/// Chat-platform credentials for the operator notifier. Absence disables
/// outbound alerts but never the bot itself — `TelegramAlerter::new` already
/// treats an empty token/chat_id as "not configured".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub chat_id: String,
}

/// The root, env-var-driven configuration for the trading control plane.
/// Loaded once at startup by [`crate::load_config`] and validated before any
/// component is constructed.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub trading_mode: TradingMode,
    #[serde(default = "default_paper_balance")]
    pub paper_initial_balance: Decimal,
    pub exchange_api: Option<ApiConfig>,

    #[serde(default = "default_max_position_size")]
    pub max_position_size: Decimal,
    #[serde(default = "default_kelly_fraction")]
    pub kelly_fraction: Decimal,
    #[serde(default = "default_take_profit_min")]
    pub take_profit_min: Decimal,
    #[serde(default = "default_take_profit_max")]
    pub take_profit_max: Decimal,
    #[serde(default = "default_stop_loss_percent")]
    pub stop_loss_percent: Decimal,
    #[serde(default = "default_panic_threshold")]
    pub panic_threshold: Decimal,

    pub ml_model_path: PathBuf,
    #[serde(default = "default_ml_threshold")]
    pub ml_threshold: Decimal,

    /// Comma-separated symbols the fetch/scan jobs watch, e.g. `BTC/USDT,ETH/USDT`.
    #[serde(default = "default_watched_symbols")]
    pub watched_symbols: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_ohlcv_fetch_limit")]
    pub ohlcv_fetch_limit: u32,
    /// Hours between on-chain metric refreshes; absent disables the job
    /// entirely (§4.8 — "interval(hours=4) (when configured)").
    #[serde(default)]
    pub onchain_refresh_hours: Option<u64>,

    #[serde(default = "default_control_surface_url")]
    pub control_surface_url: String,
    pub database_url: String,
    #[serde(default = "default_ledger_snapshot_path")]
    pub ledger_snapshot_path: PathBuf,

    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file_path: Option<PathBuf>,

    #[serde(default)]
    pub telegram: TelegramConfig,
    pub webhook_secret: String,
    #[serde(default = "default_webhook_bind_addr")]
    pub webhook_bind_addr: SocketAddr,
}

fn default_paper_balance() -> Decimal {
    dec!(10000)
}
fn default_max_position_size() -> Decimal {
    dec!(0.1)
}
fn default_kelly_fraction() -> Decimal {
    dec!(0.5)
}
fn default_take_profit_min() -> Decimal {
    dec!(0.02)
}
fn default_take_profit_max() -> Decimal {
    dec!(0.10)
}
fn default_stop_loss_percent() -> Decimal {
    dec!(0.05)
}
fn default_panic_threshold() -> Decimal {
    dec!(0.80)
}
fn default_ml_threshold() -> Decimal {
    dec!(0.6)
}
fn default_watched_symbols() -> String {
    "BTC/USDT".to_string()
}
fn default_timeframe() -> String {
    "1m".to_string()
}
fn default_ohlcv_fetch_limit() -> u32 {
    200
}
fn default_control_surface_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_ledger_snapshot_path() -> PathBuf {
    PathBuf::from("data/ledger_snapshot.json")
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_webhook_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

impl Settings {
    /// Cross-field validation that `config::Environment` cannot express:
    /// `Live` mode is nothing without exchange credentials. Fatal at
    /// startup (§6, §7 `ConfigurationError`).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trading_mode == TradingMode::Live && self.exchange_api.is_none() {
            return Err(ConfigError::validation(
                "TRADING_MODE=LIVE requires EXCHANGE_API__KEY and EXCHANGE_API__SECRET",
            ));
        }
        if self.kelly_fraction <= Decimal::ZERO || self.kelly_fraction > Decimal::ONE {
            return Err(ConfigError::validation("KELLY_FRACTION must be in (0, 1]"));
        }
        if self.max_position_size <= Decimal::ZERO || self.max_position_size > Decimal::ONE {
            return Err(ConfigError::validation("MAX_POSITION_SIZE must be in (0, 1]"));
        }
        Ok(())
    }

    /// `watched_symbols` split on commas, trimmed, with empty entries dropped.
    pub fn symbols(&self) -> Vec<String> {
        self.watched_symbols
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// `Some(period)` when an on-chain refresh cadence is configured,
    /// `None` to leave the job unregistered (§4.8).
    pub fn onchain_refresh_interval(&self) -> Option<std::time::Duration> {
        self.onchain_refresh_hours.map(|h| std::time::Duration::from_secs(h * 3600))
    }
}
