// Updater Configuration
// Loads and saves updater configuration from/to a JSON file

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::update::UpdateError;

/// Configuration file name
const CONFIG_FILE_NAME: &str = "update_config.json";

/// Directory under the home directory holding the configuration
const CONFIG_DIR_NAME: &str = ".update-flow";

/// How the controller waits for a cancelled flow to settle before re-checking
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettleMode {
    /// Sleep for the settle delay, whatever the state does meanwhile
    FixedDelay,
    /// Wait for the state to reach idle, giving up after the settle delay
    WaitForIdle,
}

/// Resolved settle behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleStrategy {
    FixedDelay(Duration),
    WaitForIdle { timeout: Duration },
}

/// Configuration for the updater
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Appcast feed consumed by the update service
    pub feed_url: String,

    /// Update channel (stable, tip)
    pub channel: String,

    /// Whether the service checks in the background without being asked
    pub automatic_checks: bool,

    /// Background check interval in seconds
    pub check_interval_secs: u64,

    /// Delay between cancelling a stale flow and issuing a new check
    pub settle_delay_ms: u64,

    /// How the settle delay is applied
    pub settle_strategy: SettleMode,

    /// Base URL for release notes of tagged versions
    pub release_notes_url: String,

    /// Base URL for commit builds
    pub commit_url: String,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            feed_url: "https://example.com/appcast.xml".to_string(),
            channel: "stable".to_string(),
            automatic_checks: true,
            check_interval_secs: 3600,
            settle_delay_ms: 100,
            settle_strategy: SettleMode::FixedDelay,
            release_notes_url: "https://example.com/release-notes".to_string(),
            commit_url: "https://example.com/commit".to_string(),
        }
    }
}

impl UpdaterConfig {
    pub fn settle(&self) -> SettleStrategy {
        let delay = Duration::from_millis(self.settle_delay_ms);
        match self.settle_strategy {
            SettleMode::FixedDelay => SettleStrategy::FixedDelay(delay),
            SettleMode::WaitForIdle => SettleStrategy::WaitForIdle { timeout: delay },
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Reject settings the update service cannot work with
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.feed_url.trim().is_empty() {
            return Err(UpdateError::ConfigError("feed_url is empty".to_string()));
        }
        if self.automatic_checks && self.check_interval_secs == 0 {
            return Err(UpdateError::ConfigError(
                "check_interval_secs must be positive when automatic checks are on".to_string(),
            ));
        }
        Ok(())
    }
}

/// Get the configuration file path
/// Stores in the home directory: ~/.update-flow/update_config.json
pub fn get_config_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// Load configuration from the default location
/// Returns default config if the file is missing or unreadable
pub fn load_config() -> UpdaterConfig {
    let config_path = get_config_path();

    if !config_path.exists() {
        log::info!("[UpdateConfig] Config file not found, using defaults");
        return UpdaterConfig::default();
    }

    match load_config_from(&config_path) {
        Ok(config) => {
            log::info!("[UpdateConfig] Loaded config from {:?}", config_path);
            config
        }
        Err(e) => {
            log::warn!("[UpdateConfig] {}, using defaults", e);
            UpdaterConfig::default()
        }
    }
}

/// Load configuration from a specific file
pub fn load_config_from(path: &Path) -> Result<UpdaterConfig, UpdateError> {
    let content = fs::read_to_string(path)
        .map_err(|e| UpdateError::FileSystem(format!("Failed to read config: {}", e)))?;

    let config: UpdaterConfig = serde_json::from_str(&content)
        .map_err(|e| UpdateError::ParseError(format!("Failed to parse config: {}", e)))?;

    config.validate()?;
    Ok(config)
}

/// Save configuration to the default location
pub fn save_config(config: &UpdaterConfig) -> Result<(), UpdateError> {
    save_config_to(config, &get_config_path())
}

/// Save configuration to a specific file
pub fn save_config_to(config: &UpdaterConfig, path: &Path) -> Result<(), UpdateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            UpdateError::FileSystem(format!("Failed to create config directory: {}", e))
        })?;
    }

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| UpdateError::ParseError(format!("Failed to serialize config: {}", e)))?;

    fs::write(path, json)
        .map_err(|e| UpdateError::FileSystem(format!("Failed to write config: {}", e)))?;

    log::info!("[UpdateConfig] Saved config to {:?}", path);
    Ok(())
}

/// Create default config file if it doesn't exist
pub fn ensure_config_exists() -> Result<PathBuf, UpdateError> {
    let config_path = get_config_path();

    if !config_path.exists() {
        save_config_to(&UpdaterConfig::default(), &config_path)?;
        log::info!("[UpdateConfig] Created default config at {:?}", config_path);
    }

    Ok(config_path)
}
