use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::db::retry::{Backoff, RetryPolicy};

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the CSV tables (overrides the `./data` default).
    pub data_dir: Option<PathBuf>,
    /// Skip the remote sync entirely and use local tables as-is.
    pub offline: bool,
    /// Write synced rows back to the local dynamic tables.
    pub persist_sync: bool,
    /// Remote popularity store.
    pub remote: RemoteConfig,
    /// Connection retry policy.
    pub retry: RetryConfig,
}

/// Remote store location and credential lookup.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RemoteConfig {
    /// Directory containing the remote database file.
    pub server: String,
    /// Database name; the file is `<server>/<database>.db`.
    pub database: String,
    pub user: String,
    /// Environment variable holding the secret credential.
    pub secret_var: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            server: "remote".to_string(),
            database: "SpotifyRockDB".to_string(),
            user: "sqladmin".to_string(),
            secret_var: "PASSWORD".to_string(),
        }
    }
}

/// Retry settings for remote connection setup.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds (initial delay for exponential backoff).
    pub delay_ms: u64,
    pub backoff: Backoff,
    /// Upper bound on the delay for exponential backoff.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            delay_ms: 1000,
            backoff: Backoff::Fixed,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            delay: Duration::from_millis(self.delay_ms),
            backoff: self.backoff,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/rockpulse/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Resolve the data directory: config value, else `./data`.
    pub fn resolve_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("data"))
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
