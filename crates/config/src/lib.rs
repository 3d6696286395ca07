//! CloudSync Configuration System
//!
//! Loads, validates and persists the TOML configuration file. Every
//! section implements the `ConfigSection` trait.
//!
//! - **Graceful degradation**: Invalid values are reported as warnings on load
//! - **Atomic writes**: Config files are never left in a corrupted state
//! - **Stable identity**: The device id is generated once and persisted
//!
//! # Example
//!
//! ```rust,no_run
//! use cloudsync_config::{Config, ConfigManager};
//!
//! let manager = ConfigManager::new().expect("Failed to initialize config");
//! let config = manager.load().unwrap_or_else(|e| {
//!     eprintln!("Config error: {}, using defaults", e);
//!     Config::default()
//! });
//!
//! println!("Sync every {} minutes", config.sync.interval_minutes);
//! ```

mod error;
mod manager;
mod persistence;
mod validation;

// Config sections
pub mod app_config;
mod broker_config;
mod cloud_config;
mod device_config;
mod host_config;
mod sync_settings;

pub use error::{ConfigError, ConfigResult, ValidationError};
pub use manager::ConfigManager;
pub use validation::{ConfigSection, Validator};

// Re-export config sections
pub use app_config::{AppConfig, LogLevel};
pub use broker_config::BrokerConfig;
pub use cloud_config::{CloudConfig, CloudProvider};
pub use device_config::DeviceConfig;
pub use host_config::HostConfig;
pub use sync_settings::SyncSettings;

use serde::{Deserialize, Serialize};

/// Current config file format version
pub const CONFIG_VERSION: u32 = 1;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Config file format version
    pub version: u32,

    /// Application-level settings
    pub app: AppConfig,

    /// Identity of this device
    pub device: DeviceConfig,

    /// What to synchronize
    pub sync: SyncSettings,

    /// Snapshot storage
    pub cloud: CloudConfig,

    /// Event broker
    pub broker: BrokerConfig,

    /// Host media center
    pub host: HostConfig,
}

impl Config {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the entire configuration
    ///
    /// Returns all validation errors found across all sections.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let results = [
            self.app.validate(),
            self.device.validate(),
            self.sync.validate(),
            self.cloud.validate(),
            self.broker.validate(),
            self.host.validate(),
        ];
        for result in results {
            if let Err(mut e) = result {
                errors.append(&mut e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Merges this config with another, preferring values from `other`
    pub fn merge(&mut self, other: Config) {
        self.app.merge(other.app);
        self.device.merge(other.device);
        self.sync.merge(other.sync);
        self.cloud.merge(other.cloud);
        self.broker.merge(other.broker);
        self.host.merge(other.host);
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            app: AppConfig::default(),
            device: DeviceConfig::default(),
            sync: SyncSettings::default(),
            cloud: CloudConfig::default(),
            broker: BrokerConfig::default(),
            host: HostConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_version_is_set() {
        let config = Config::new();
        assert_eq!(config.version, CONFIG_VERSION);
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::new();
        let mut override_config = Config::new();
        override_config.sync.interval_minutes = 15;
        override_config.device.device_id = "cloudsync_den".to_string();

        base.merge(override_config);
        assert_eq!(base.sync.interval_minutes, 15);
        assert_eq!(base.device.device_id, "cloudsync_den");
    }

    #[test]
    fn test_validation_collects_every_section() {
        let mut config = Config::new();
        config.sync.interval_minutes = 0;
        config.broker.enabled = true;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "sync.interval_minutes"));
        assert!(errors.iter().any(|e| e.field == "broker.host"));
    }
}
