//! Configuration management for the IV spread monitor.
//!
//! Loads settings from an optional config file, `.env`, and `IVARB__*`
//! environment variables. The result is validated once and then shared
//! read-only with every component.

mod instruments;

pub use instruments::{
    contract_code, contract_month, default_instruments, InstrumentRegistry, InstrumentSpec,
    MarketLeg, Thresholds,
};

use crate::error::ConfigError;
use chrono::NaiveTime;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Polling cadence, throttling and position-lifetime rules
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Volatility data source settings
    #[serde(default)]
    pub sources: SourcesConfig,
    /// Position store location
    #[serde(default)]
    pub store: StoreConfig,
    /// Telegram delivery (log-only when unset)
    #[serde(default)]
    pub telegram: TelegramConfig,
    /// Instrument catalogue
    #[serde(default = "default_instruments")]
    pub instruments: Vec<InstrumentSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between polling cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Minimum seconds between two signals for the same instrument
    #[serde(default = "default_min_signal_interval")]
    pub min_signal_interval_secs: u64,
    /// Close positions this many days before option expiry
    #[serde(default = "default_expiry_lead_days")]
    pub expiry_lead_days: i64,
    /// Close positions held at least this many days
    #[serde(default = "default_max_holding_days")]
    pub max_holding_days: i64,
    /// IANA time zone the trading windows are expressed in
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Trading sessions; a window whose end precedes its start wraps midnight
    #[serde(default = "default_trading_hours")]
    pub trading_hours: Vec<TradingWindow>,
    /// Skip Saturdays and Sundays entirely
    #[serde(default = "default_skip_weekends")]
    pub skip_weekends: bool,
}

/// A daily trading session, `HH:MM` in the configured time zone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TradingWindow {
    #[serde(deserialize_with = "deserialize_hhmm")]
    pub start: NaiveTime,
    #[serde(deserialize_with = "deserialize_hhmm")]
    pub end: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Per-request timeout for every data source
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Number of daily returns in the historical volatility window
    #[serde(default = "default_hv_window")]
    pub hv_window: usize,
    /// Yahoo-style options/chart API base URL
    #[serde(default = "default_yahoo_base_url")]
    pub yahoo_base_url: String,
    /// Sina-style domestic futures K-line base URL
    #[serde(default = "default_sina_base_url")]
    pub sina_base_url: String,
    /// Sina-style domestic commodity option board base URL
    #[serde(default = "default_sina_options_base_url")]
    pub sina_options_base_url: String,
    /// Discount rate used when inverting option prices to implied volatility
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    /// User agent sent to scraped pages
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Position store file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token obtained from BotFather
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Target chat ID
    #[serde(default)]
    pub chat_id: Option<String>,
    /// Bot API base URL
    #[serde(default = "default_telegram_api")]
    pub api_base_url: String,
}

// Default value functions
fn default_poll_interval() -> u64 {
    300 // 5 minutes
}

fn default_min_signal_interval() -> u64 {
    1800 // 30 minutes
}

fn default_expiry_lead_days() -> i64 {
    7
}

fn default_max_holding_days() -> i64 {
    21
}

fn default_timezone() -> String {
    "Asia/Shanghai".to_string()
}

fn default_trading_hours() -> Vec<TradingWindow> {
    let hm = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap_or_default();
    vec![
        // Day session
        TradingWindow {
            start: hm(9, 0),
            end: hm(15, 0),
        },
        // Night session, runs past midnight
        TradingWindow {
            start: hm(21, 0),
            end: hm(1, 0),
        },
    ]
}

fn default_skip_weekends() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    15
}

fn default_hv_window() -> usize {
    20
}

fn default_yahoo_base_url() -> String {
    "https://query2.finance.yahoo.com".to_string()
}

fn default_sina_base_url() -> String {
    "https://stock2.finance.sina.com.cn".to_string()
}

fn default_sina_options_base_url() -> String {
    "https://stock.finance.sina.com.cn".to_string()
}

fn default_risk_free_rate() -> f64 {
    0.02
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36"
        .to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/positions.json")
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

fn deserialize_hhmm<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_hhmm(&raw).map_err(serde::de::Error::custom)
}

fn parse_hhmm(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
        .map_err(|e| format!("invalid time {raw:?}, expected HH:MM ({e})"))
}

impl Config {
    /// Load configuration from `.env`, the config file and environment variables.
    ///
    /// Without an explicit path, an optional `config.{toml,yaml,json}` in the
    /// working directory is used.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name("config").required(false),
        };

        let mut config: Config = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::default().separator("__").prefix("IVARB"))
            .build()?
            .try_deserialize()?;

        // Plain variable names are accepted too, matching the usual bot setup
        if config.telegram.bot_token.is_none() {
            config.telegram.bot_token = std::env::var("TELEGRAM_BOT_TOKEN").ok();
        }
        if config.telegram.chat_id.is_none() {
            config.telegram.chat_id = std::env::var("TELEGRAM_CHAT_ID").ok();
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.poll_interval_secs == 0 {
            return Err(ConfigError::invalid("monitor", "poll_interval_secs must be > 0"));
        }
        if self.monitor.expiry_lead_days < 0 || self.monitor.max_holding_days <= 0 {
            return Err(ConfigError::invalid(
                "monitor",
                "expiry_lead_days must be >= 0 and max_holding_days > 0",
            ));
        }
        self.monitor
            .timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| ConfigError::invalid("monitor.timezone", e.to_string()))?;

        if self.sources.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "sources",
                "request_timeout_secs must be > 0",
            ));
        }
        if self.sources.hv_window < 2 {
            return Err(ConfigError::invalid("sources", "hv_window must be at least 2"));
        }
        if !(0.0..1.0).contains(&self.sources.risk_free_rate) {
            return Err(ConfigError::invalid(
                "sources",
                "risk_free_rate must be within [0, 1)",
            ));
        }

        if self.telegram.bot_token.is_some() != self.telegram.chat_id.is_some() {
            return Err(ConfigError::invalid(
                "telegram",
                "bot_token and chat_id must be set together",
            ));
        }

        if self.instruments.is_empty() {
            return Err(ConfigError::invalid("instruments", "no instruments configured"));
        }

        // Registry construction performs per-instrument validation
        InstrumentRegistry::new(self.instruments.clone()).map(|_| ())
    }

    /// Build the read-only instrument registry.
    pub fn registry(&self) -> Result<InstrumentRegistry, ConfigError> {
        InstrumentRegistry::new(self.instruments.clone())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            sources: SourcesConfig::default(),
            store: StoreConfig::default(),
            telegram: TelegramConfig::default(),
            instruments: default_instruments(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            min_signal_interval_secs: default_min_signal_interval(),
            expiry_lead_days: default_expiry_lead_days(),
            max_holding_days: default_max_holding_days(),
            timezone: default_timezone(),
            trading_hours: default_trading_hours(),
            skip_weekends: default_skip_weekends(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            hv_window: default_hv_window(),
            yahoo_base_url: default_yahoo_base_url(),
            sina_base_url: default_sina_base_url(),
            sina_options_base_url: default_sina_options_base_url(),
            risk_free_rate: default_risk_free_rate(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base_url: default_telegram_api(),
        }
    }
}
