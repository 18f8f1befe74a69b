//! Configuration types

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub const PAPER_API_URL: &str = "https://paper-api.alpaca.markets";
pub const LIVE_API_URL: &str = "https://api.alpaca.markets";
pub const DATA_API_URL: &str = "https://data.alpaca.markets";
pub const DATA_STREAM_URL: &str = "wss://stream.data.alpaca.markets";
pub const API_VERSION: &str = "v2";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Broker connection configuration
    #[serde(default)]
    pub alpaca: AlpacaConfig,
    /// Long-short equity strategy
    #[serde(default)]
    pub long_short: LongShortConfig,
    /// Single-symbol mean reversion strategy
    #[serde(default)]
    pub mean_reversion: MeanReversionConfig,
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
}

/// Broker connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlpacaConfig {
    /// API key id
    #[serde(default)]
    pub key_id: Option<String>,
    /// API secret key
    #[serde(default)]
    pub secret_key: Option<String>,
    /// OAuth bearer token; takes precedence over the key pair
    #[serde(default)]
    pub oauth: Option<String>,
    /// Trade against the paper environment when no base URL is given
    #[serde(default = "default_paper")]
    pub paper: bool,
    /// Trading API base URL; derived from `paper` when unset
    #[serde(default)]
    pub base_url: Option<String>,
    /// Market data REST base URL
    #[serde(default = "default_data_url")]
    pub data_url: String,
    /// Market data stream base URL
    #[serde(default = "default_stream_url")]
    pub stream_url: String,
    /// Trading API version path segment
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Market data feed (`iex` or `sip`)
    #[serde(default = "default_feed")]
    pub feed: String,
}

impl AlpacaConfig {
    /// Trading API base URL, honoring an explicit override before `paper`
    pub fn resolved_base_url(&self) -> String {
        match &self.base_url {
            Some(url) if !url.is_empty() => url.clone(),
            _ if self.paper => PAPER_API_URL.to_string(),
            _ => LIVE_API_URL.to_string(),
        }
    }

    /// Credentials from whichever of OAuth or key pair is configured
    pub fn credentials(&self) -> Option<ApiCredentials> {
        if let Some(token) = self.oauth.as_ref().filter(|t| !t.is_empty()) {
            return Some(ApiCredentials::OAuth(token.clone()));
        }
        match (&self.key_id, &self.secret_key) {
            (Some(key_id), Some(secret_key)) => {
                Some(ApiCredentials::key_pair(key_id.clone(), secret_key.clone()))
            }
            _ => None,
        }
    }
}

impl Default for AlpacaConfig {
    fn default() -> Self {
        Self {
            key_id: None,
            secret_key: None,
            oauth: None,
            paper: default_paper(),
            base_url: None,
            data_url: default_data_url(),
            stream_url: default_stream_url(),
            api_version: default_api_version(),
            feed: default_feed(),
        }
    }
}

fn default_paper() -> bool {
    true
}

fn default_data_url() -> String {
    DATA_API_URL.to_string()
}

fn default_stream_url() -> String {
    DATA_STREAM_URL.to_string()
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_feed() -> String {
    "iex".to_string()
}

/// Long-short equity strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongShortConfig {
    /// Symbols ranked every cycle
    #[serde(default = "default_universe")]
    pub universe: Vec<String>,
    /// Fraction of equity allocated to the short bucket
    #[serde(default = "default_short_fraction")]
    pub short_fraction: Decimal,
    /// Number of one-minute bars used for the percent change ranking
    #[serde(default = "default_lookback_bars")]
    pub lookback_bars: u32,
    /// Seconds between rebalance ticks (also the market-open poll interval)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_seconds: u64,
    /// Liquidate everything when the close is nearer than this
    #[serde(default = "default_wind_down_minutes")]
    pub wind_down_minutes: i64,
    /// Pause after liquidating before the next session starts
    #[serde(default = "default_resume_after_minutes")]
    pub resume_after_minutes: u64,
}

impl Default for LongShortConfig {
    fn default() -> Self {
        Self {
            universe: default_universe(),
            short_fraction: default_short_fraction(),
            lookback_bars: default_lookback_bars(),
            tick_interval_seconds: default_tick_interval(),
            wind_down_minutes: default_wind_down_minutes(),
            resume_after_minutes: default_resume_after_minutes(),
        }
    }
}

fn default_universe() -> Vec<String> {
    [
        "DOMO", "TLRY", "SQ", "MRO", "AAPL", "GM", "SNAP", "SHOP", "SPLK", "BA", "AMZN", "SUI",
        "SUN", "TSLA", "CGC", "SPWR", "NIO", "CAT", "MSFT", "PANW", "OKTA", "TWTR", "TM", "RTN",
        "ATVI", "GS", "BAC", "MS", "TWLO", "QCOM",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_short_fraction() -> Decimal {
    dec!(0.30)
}

fn default_lookback_bars() -> u32 {
    10
}

fn default_tick_interval() -> u64 {
    60
}

fn default_wind_down_minutes() -> i64 {
    15
}

fn default_resume_after_minutes() -> u64 {
    15
}

/// Mean reversion strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeanReversionConfig {
    /// Symbol traded
    #[serde(default = "default_mr_symbol")]
    pub symbol: String,
    /// Number of one-minute closes in the running average
    #[serde(default = "default_window")]
    pub window: u32,
    /// Scale applied to the relative discount when sizing the target
    #[serde(default = "default_share_multiplier")]
    pub share_multiplier: Decimal,
    /// Seconds between ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval_seconds: u64,
    #[serde(default = "default_wind_down_minutes")]
    pub wind_down_minutes: i64,
    #[serde(default = "default_resume_after_minutes")]
    pub resume_after_minutes: u64,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            symbol: default_mr_symbol(),
            window: default_window(),
            share_multiplier: default_share_multiplier(),
            tick_interval_seconds: default_tick_interval(),
            wind_down_minutes: default_wind_down_minutes(),
            resume_after_minutes: default_resume_after_minutes(),
        }
    }
}

fn default_mr_symbol() -> String {
    "AAPL".to_string()
}

fn default_window() -> u32 {
    20
}

fn default_share_multiplier() -> Decimal {
    dec!(200)
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Heartbeat/ping interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

/// API credentials for authenticated requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCredentials {
    /// Key id and secret sent as headers
    KeyPair { key_id: String, secret_key: String },
    /// OAuth access token sent as a bearer token
    OAuth(String),
}

impl ApiCredentials {
    pub fn key_pair(key_id: String, secret_key: String) -> Self {
        Self::KeyPair { key_id, secret_key }
    }
}
