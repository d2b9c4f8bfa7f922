//! Configuration file support for bleflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (BLEFLASH_*)
//! 3. Local config file (./bleflash.toml)
//! 4. Global config file (~/.config/bleflash/config.toml)

use crate::CliError;
use bleflash::UpdateConfig;
use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the local configuration file.
pub const LOCAL_CONFIG: &str = "bleflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Update tunables; unset values keep the library defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateSection {
    /// Retries after the first attempt.
    pub max_attempts: Option<usize>,
    /// Budget for one page acknowledgement.
    pub response_timeout_ms: Option<u64>,
    /// Wait before reconnecting after the erase.
    pub reconnect_settle_ms: Option<u64>,
    /// Wait after the reset command.
    pub reset_settle_ms: Option<u64>,
    /// Budget for one write confirmation.
    pub write_timeout_ms: Option<u64>,
}

/// Remote firmware source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    /// Base URL that firmware file names are resolved against.
    pub base_url: Option<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Update tunables.
    #[serde(default)]
    pub update: UpdateSection,
    /// Firmware source.
    #[serde(default)]
    pub source: SourceConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// Unlike the implicit files, an explicit file must exist and parse.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Cannot read config file {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content).map_err(|e| {
            CliError::Config(format!("Invalid TOML in config file {}: {e}", path.display()))
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse TOML config {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "bleflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        let update = other.update;
        if update.max_attempts.is_some() {
            self.update.max_attempts = update.max_attempts;
        }
        if update.response_timeout_ms.is_some() {
            self.update.response_timeout_ms = update.response_timeout_ms;
        }
        if update.reconnect_settle_ms.is_some() {
            self.update.reconnect_settle_ms = update.reconnect_settle_ms;
        }
        if update.reset_settle_ms.is_some() {
            self.update.reset_settle_ms = update.reset_settle_ms;
        }
        if update.write_timeout_ms.is_some() {
            self.update.write_timeout_ms = update.write_timeout_ms;
        }

        if other.source.base_url.is_some() {
            self.source.base_url = other.source.base_url;
        }
    }

    /// Library tunables with this file's overrides applied.
    pub fn update_config(&self) -> UpdateConfig {
        let mut config = UpdateConfig::default();
        let update = &self.update;
        if let Some(max_attempts) = update.max_attempts {
            config = config.with_max_attempts(max_attempts);
        }
        if let Some(ms) = update.response_timeout_ms {
            config = config.with_response_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = update.reconnect_settle_ms {
            config = config.with_reconnect_settle(Duration::from_millis(ms));
        }
        if let Some(ms) = update.reset_settle_ms {
            config = config.with_reset_settle(Duration::from_millis(ms));
        }
        if let Some(ms) = update.write_timeout_ms {
            config = config.with_write_timeout(Duration::from_millis(ms));
        }
        config
    }

    /// Remember `serial` as the preferred port in the local config file.
    pub fn remember_port(&mut self, serial: &str) -> anyhow::Result<()> {
        self.remember_port_in(Path::new(LOCAL_CONFIG), serial)
    }

    fn remember_port_in(&mut self, path: &Path, serial: &str) -> anyhow::Result<()> {
        let mut local = Self::load_from_file(path).unwrap_or_default();
        local.connection.serial = Some(serial.to_string());

        let content = toml::to_string_pretty(&local)?;
        fs::write(path, content)?;
        info!("Saved port {serial} to {}", path.display());

        self.connection.serial = Some(serial.to_string());
        Ok(())
    }
}
