//! Configuration: process settings from the environment plus the typed
//! per-list / per-destination settings store.

pub mod settings;
pub mod store;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

pub use settings::{DestinationSettings, SettingsFile, normalize_list_name};
pub use store::{ConfigStore, MemoryConfigStore, Setting, SettingKey, SettingValue};

/// Process-level configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub trello_api_key: SecretString,
    pub trello_token: SecretString,
    pub trello_api_base: String,
    /// Seconds between poll cycles.
    pub poll_interval_secs: u64,
    /// Per-request timeout for board fetches.
    pub http_timeout: Duration,
    /// Optional JSON settings file seeding the settings store.
    pub settings_path: Option<PathBuf>,
    /// Without a bot token, notifications go to the log.
    pub telegram_bot_token: Option<SecretString>,
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &str| {
            var(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
        };

        let trello_api_key = SecretString::from(required("TRELLO_API_KEY")?);
        let trello_token = SecretString::from(required("TRELLO_TOKEN")?);

        let trello_api_base =
            var("TRELLO_API_BASE").unwrap_or_else(|| "https://api.trello.com".to_string());

        let poll_interval_secs = parse_secs(&var, "BOARD_MONITOR_POLL_SECS", 30)?;
        let http_timeout_secs = parse_secs(&var, "BOARD_MONITOR_HTTP_TIMEOUT_SECS", 20)?;

        let settings_path = var("BOARD_MONITOR_SETTINGS")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let telegram_bot_token = var("TELEGRAM_BOT_TOKEN")
            .filter(|v| !v.is_empty())
            .map(SecretString::from);

        Ok(Self {
            trello_api_key,
            trello_token,
            trello_api_base,
            poll_interval_secs,
            http_timeout: Duration::from_secs(http_timeout_secs),
            settings_path,
            telegram_bot_token,
        })
    }
}

fn parse_secs(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(raw) => match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(secs),
            _ => Err(ConfigError::InvalidValue {
                key: name.to_string(),
                message: format!("'{raw}' is not a positive number of seconds"),
            }),
        },
    }
}
