//! Configuration loading using Figment.
//!
//! Configuration is merged from:
//! 1. a TOML file (`config/bridgebrain.toml` by default; a missing file is fine)
//! 2. environment variables prefixed with `BRIDGEBRAIN_`, nested with `__`
//!
//! Every field has a default matching the values the bridge monitor has always
//! shipped with, so running without any configuration works.
//!
//! # Example
//! ```no_run
//! use bridgebrain::config::BridgeConfig;
//!
//! let config = BridgeConfig::load()?;
//! config.validate()?;
//! println!("Logging to {}", config.storage.log_path.display());
//! # Ok::<(), bridgebrain::error::BridgeError>(())
//! ```
//!
//! Override from the environment:
//! `BRIDGEBRAIN_SERIAL__BAUD_RATE=115200 bridgebrain run`

use crate::error::{AppResult, BridgeError};
use crate::history::MAX_HISTORY;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/bridgebrain.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Name and logging
    pub application: ApplicationConfig,
    /// Serial link and discovery
    pub serial: SerialConfig,
    /// In-memory window
    pub history: HistoryConfig,
    /// Durable log
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "BridgeBrain".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Serial link and device discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate the controller board transmits at
    pub baud_rate: u32,
    /// Read timeout in milliseconds; a timeout is an idle read, not an error
    pub read_timeout_ms: u64,
    /// Delay before retrying discovery after any failure, in milliseconds
    pub retry_delay_ms: u64,
    /// Case-sensitive substrings identifying the controller in a port description
    pub identity_markers: Vec<String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            read_timeout_ms: 1000,
            retry_delay_ms: 3000,
            identity_markers: vec!["Arduino".to_string(), "CH340".to_string()],
        }
    }
}

impl SerialConfig {
    /// `read_timeout_ms` as a `Duration`.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// `retry_delay_ms` as a `Duration`.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// In-memory history window settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of records kept for live queries
    pub max_records: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_records: MAX_HISTORY,
        }
    }
}

/// Durable log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the CSV log every record is appended to
    pub log_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("bridge_data.csv"),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(BridgeConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("BRIDGEBRAIN_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(BridgeError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(BridgeError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.serial.baud_rate == 0 {
            return Err(BridgeError::Configuration(
                "serial.baud_rate must be positive".to_string(),
            ));
        }

        if self.serial.read_timeout_ms == 0 {
            return Err(BridgeError::Configuration(
                "serial.read_timeout_ms must be positive".to_string(),
            ));
        }

        if self.serial.retry_delay_ms == 0 {
            return Err(BridgeError::Configuration(
                "serial.retry_delay_ms must be positive".to_string(),
            ));
        }

        if self
            .serial
            .identity_markers
            .iter()
            .all(|marker| marker.is_empty())
        {
            return Err(BridgeError::Configuration(
                "serial.identity_markers needs at least one non-empty marker".to_string(),
            ));
        }

        if self.history.max_records == 0 {
            return Err(BridgeError::Configuration(
                "history.max_records must be positive".to_string(),
            ));
        }

        if self.storage.log_path.as_os_str().is_empty() {
            return Err(BridgeError::Configuration(
                "storage.log_path must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_match_shipped_values() {
        let config = BridgeConfig::default();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.read_timeout(), Duration::from_secs(1));
        assert_eq!(config.serial.retry_delay(), Duration::from_secs(3));
        assert_eq!(config.serial.identity_markers, vec!["Arduino", "CH340"]);
        assert_eq!(config.history.max_records, MAX_HISTORY);
        assert_eq!(config.storage.log_path, PathBuf::from("bridge_data.csv"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let config = BridgeConfig::load_from("does-not-exist.toml").unwrap();
            assert_eq!(config.serial.baud_rate, 9600);
            Ok(())
        });
    }

    #[test]
    fn file_and_env_are_merged() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "bridge.toml",
                r#"
                [serial]
                baud_rate = 115200
                identity_markers = ["Nano"]

                [storage]
                log_path = "logs/bridge.csv"
                "#,
            )?;
            jail.set_env("BRIDGEBRAIN_HISTORY__MAX_RECORDS", "50");

            let config = BridgeConfig::load_from("bridge.toml").unwrap();
            assert_eq!(config.serial.baud_rate, 115200);
            assert_eq!(config.serial.identity_markers, vec!["Nano"]);
            assert_eq!(config.serial.read_timeout_ms, 1000);
            assert_eq!(config.history.max_records, 50);
            assert_eq!(config.storage.log_path, PathBuf::from("logs/bridge.csv"));
            Ok(())
        });
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut config = BridgeConfig::default();
        config.application.log_level = "verbose".to_string();
        assert!(matches!(
            config.validate(),
            Err(BridgeError::Configuration(_))
        ));
    }

    #[test]
    fn zero_history_is_rejected() {
        let mut config = BridgeConfig::default();
        config.history.max_records = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_retry_delay_is_rejected() {
        let mut config = BridgeConfig::default();
        config.serial.retry_delay_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retry_delay_ms"));
    }

    #[test]
    fn blank_markers_are_rejected() {
        let mut config = BridgeConfig::default();
        config.serial.identity_markers = vec![String::new()];
        assert!(config.validate().is_err());
    }
}
