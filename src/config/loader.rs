//! Configuration loader

use config::{Config, Environment, File};
use std::path::Path;

use super::types::{AlpacaConfig, AppConfig, API_VERSION, DATA_API_URL, DATA_STREAM_URL};
use crate::common::errors::{ClientError, Result};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with APP_, `__` between sections)
/// 2. Configuration file (TOML format)
/// 3. Default values
///
/// Broker credentials missing from both sources are filled in from the
/// conventional `APCA_*` variables afterwards.
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("APP")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder
        .build()
        .map_err(|e| ClientError::Configuration(e.to_string()))?;

    let mut app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ClientError::Configuration(e.to_string()))?;

    apply_broker_env(&mut app_config.alpaca, |name| std::env::var(name).ok());
    Ok(app_config)
}

/// Load configuration from environment variables only
pub fn load_from_env() -> Result<AppConfig> {
    // Try to load from .env file
    dotenvy::dotenv().ok();

    let mut alpaca = AlpacaConfig::default();
    apply_broker_env(&mut alpaca, |name| std::env::var(name).ok());

    Ok(AppConfig {
        alpaca,
        ..AppConfig::default()
    })
}

/// Fill unset broker fields from `APCA_*` variables
///
/// Fields with a built-in default count as unset while they still hold it.
fn apply_broker_env<F>(alpaca: &mut AlpacaConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if alpaca.key_id.is_none() {
        alpaca.key_id = lookup("APCA_API_KEY_ID");
    }
    if alpaca.secret_key.is_none() {
        alpaca.secret_key = lookup("APCA_API_SECRET_KEY");
    }
    if alpaca.oauth.is_none() {
        alpaca.oauth = lookup("APCA_API_OAUTH").filter(|t| !t.is_empty());
    }
    if alpaca.base_url.is_none() {
        alpaca.base_url = lookup("APCA_API_BASE_URL");
    }
    fill_default(&mut alpaca.data_url, DATA_API_URL, lookup("APCA_DATA_BASE_URL"));
    fill_default(&mut alpaca.stream_url, DATA_STREAM_URL, lookup("APCA_API_STREAM_URL"));
    fill_default(&mut alpaca.api_version, API_VERSION, lookup("APCA_API_VERSION"));
}

fn fill_default(field: &mut String, default: &str, value: Option<String>) {
    if field.as_str() == default {
        if let Some(value) = value {
            *field = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_broker_env_fills_only_missing_fields() {
        let env: HashMap<&str, &str> = [
            ("APCA_API_KEY_ID", "env-key"),
            ("APCA_API_SECRET_KEY", "env-secret"),
            ("APCA_API_BASE_URL", "http://env-base"),
            ("APCA_API_VERSION", "v3"),
        ]
        .into_iter()
        .collect();

        let mut alpaca = AlpacaConfig {
            key_id: Some("file-key".into()),
            ..AlpacaConfig::default()
        };
        apply_broker_env(&mut alpaca, |name| env.get(name).map(|v| v.to_string()));

        assert_eq!(alpaca.key_id.as_deref(), Some("file-key"));
        assert_eq!(alpaca.secret_key.as_deref(), Some("env-secret"));
        assert_eq!(alpaca.resolved_base_url(), "http://env-base");
        assert_eq!(alpaca.api_version, "v3");
        assert!(alpaca.oauth.is_none());
    }

    #[test]
    fn test_explicit_urls_beat_broker_env() {
        let env: HashMap<&str, &str> = [
            ("APCA_DATA_BASE_URL", "http://env-data"),
            ("APCA_API_STREAM_URL", "ws://env-stream"),
            ("APCA_API_VERSION", "v3"),
        ]
        .into_iter()
        .collect();

        let mut alpaca = AlpacaConfig {
            data_url: "http://explicit-data".into(),
            stream_url: "ws://explicit-stream".into(),
            api_version: "v1".into(),
            ..AlpacaConfig::default()
        };
        apply_broker_env(&mut alpaca, |name| env.get(name).map(|v| v.to_string()));

        assert_eq!(alpaca.data_url, "http://explicit-data");
        assert_eq!(alpaca.stream_url, "ws://explicit-stream");
        assert_eq!(alpaca.api_version, "v1");

        let mut defaults = AlpacaConfig::default();
        apply_broker_env(&mut defaults, |name| env.get(name).map(|v| v.to_string()));
        assert_eq!(defaults.data_url, "http://env-data");
        assert_eq!(defaults.stream_url, "ws://env-stream");
    }

    #[test]
    fn test_load_config_with_missing_file_uses_defaults() {
        let config = load_config(Some("does-not-exist.toml")).unwrap();
        assert_eq!(config.long_short.lookback_bars, 10);
        assert_eq!(config.mean_reversion.window, 20);
        assert_eq!(config.alpaca.feed, "iex");
    }
}
