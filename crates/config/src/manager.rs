//! Configuration manager - main API for config operations

use crate::persistence::ConfigPersistence;
use crate::{Config, ConfigError, ConfigResult, LogLevel};
use cloudsync_core::DeviceId;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.toml";

/// Main configuration manager
///
/// Resolves the config file location, loads it with environment overrides,
/// and makes sure the device keeps a stable identifier across restarts.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    persistence: ConfigPersistence,
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Creates a new config manager using the default config directory
    ///
    /// - Linux: `~/.config/cloudsync/`
    /// - macOS: `~/Library/Application Support/cloudsync/`
    /// - Windows: `%APPDATA%\cloudsync\`
    pub fn new() -> ConfigResult<Self> {
        let config_dir = Self::project_dirs()?.config_dir().to_path_buf();
        Self::with_directory(config_dir)
    }

    /// Creates a config manager with a custom config directory
    pub fn with_directory(config_dir: PathBuf) -> ConfigResult<Self> {
        let persistence = ConfigPersistence::new(config_dir.join(CONFIG_FILE));

        Ok(Self {
            persistence,
            config_dir,
        })
    }

    /// Creates a config manager for an explicit config file
    pub fn with_file(config_path: &Path) -> ConfigResult<Self> {
        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ConfigError::PathResolutionError {
                reason: format!("{} has no parent directory", config_path.display()),
            })?;

        Ok(Self {
            persistence: ConfigPersistence::new(config_path.to_path_buf()),
            config_dir,
        })
    }

    fn project_dirs() -> ConfigResult<ProjectDirs> {
        ProjectDirs::from("", "", "cloudsync").ok_or_else(|| ConfigError::PathResolutionError {
            reason: "Could not determine user home directory".to_string(),
        })
    }

    /// Returns the config directory path
    pub fn config_dir(&self) -> &PathBuf {
        &self.config_dir
    }

    /// Returns the full config file path
    pub fn config_path(&self) -> &Path {
        self.persistence.path()
    }

    /// Directory for the local store and tracking index
    ///
    /// Uses `app.data_dir` when set, else the platform data directory.
    pub fn data_dir(&self, config: &Config) -> ConfigResult<PathBuf> {
        if let Some(dir) = &config.app.data_dir {
            return Ok(dir.clone());
        }
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    /// Loads the configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file is corrupted, returns an error.
    pub fn load(&self) -> ConfigResult<Config> {
        self.persistence.load()
    }

    /// Loads the configuration, falling back to defaults on any error
    pub fn load_or_default(&self) -> Config {
        match self.load() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to load config: {}, using defaults", e);
                Config::default()
            }
        }
    }

    /// Saves the configuration to file
    pub fn save(&self, config: &Config) -> ConfigResult<()> {
        self.persistence.save(config)
    }

    /// Updates the configuration using a closure
    ///
    /// ```rust,no_run
    /// # use cloudsync_config::ConfigManager;
    /// # let manager = ConfigManager::new().unwrap();
    /// manager.update(|config| {
    ///     config.sync.userdata = true;
    /// }).expect("Failed to update config");
    /// ```
    pub fn update<F>(&self, update_fn: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.load()?;
        update_fn(&mut config);
        self.save(&config)
    }

    /// Writes a default config file with a fresh device id if none exists
    ///
    /// Returns Ok(true) if a new file was created, Ok(false) if one already exists.
    pub fn initialize(&self) -> ConfigResult<bool> {
        if self.config_path().exists() {
            log::info!(
                "Config file already exists at {}",
                self.config_path().display()
            );
            return Ok(false);
        }

        self.persistence
            .generate_default(DeviceId::generate().as_str())?;
        Ok(true)
    }

    /// Resets the configuration to defaults, keeping the device identity
    pub fn reset(&self) -> ConfigResult<()> {
        let current = self.load_or_default();
        let mut config = Config::default();
        config.device = current.device;
        self.save(&config)
    }

    /// Validates the current configuration file
    ///
    /// Returns all validation errors found, or Ok if valid.
    pub fn validate(&self) -> ConfigResult<Vec<String>> {
        let config = self.load()?;

        match config.validate() {
            Ok(()) => Ok(Vec::new()),
            Err(errors) => Ok(errors.iter().map(|e| e.to_string()).collect()),
        }
    }

    /// Loads the configuration and persists a device id if it has none
    ///
    /// The id must not change between runs, otherwise the self-echo filter
    /// would treat this device's own retained messages as foreign.
    pub fn load_with_device_id(&self) -> ConfigResult<Config> {
        let mut config = self.load()?;
        if config.device.ensure_id() {
            log::info!("Assigned device id {}", config.device.device_id);
            self.save(&config)?;
        }
        self.apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Loads the configuration with environment variable overrides
    ///
    /// Variables follow the pattern `CLOUDSYNC_SECTION_FIELD`, e.g.
    /// `CLOUDSYNC_BROKER_HOST=mqtt.example.com`. Overrides are never saved.
    pub fn load_with_env_overrides(&self) -> ConfigResult<Config> {
        let mut config = self.load()?;
        self.apply_env_overrides(&mut config)?;
        Ok(config)
    }

    fn apply_env_overrides(&self, config: &mut Config) -> ConfigResult<()> {
        if let Some(id) = env_string("CLOUDSYNC_DEVICE_ID") {
            config.device.device_id = id;
        }
        if let Some(token) = env_string("CLOUDSYNC_CLOUD_ACCESS_TOKEN") {
            config.cloud.access_token = token;
        }
        if let Some(folder) = env_string("CLOUDSYNC_CLOUD_FOLDER") {
            config.cloud.folder = folder;
        }
        if let Some(host) = env_string("CLOUDSYNC_BROKER_HOST") {
            config.broker.host = host;
        }
        if let Some(port) = env_string("CLOUDSYNC_BROKER_PORT") {
            config.broker.port = port.parse().map_err(|_| ConfigError::InvalidOverride {
                variable: "CLOUDSYNC_BROKER_PORT".to_string(),
                value: port.clone(),
                reason: "not a port number".to_string(),
            })?;
        }
        if let Some(password) = env_string("CLOUDSYNC_BROKER_PASSWORD") {
            config.broker.password = password;
        }
        if let Some(url) = env_string("CLOUDSYNC_HOST_RPC_URL") {
            config.host.rpc_url = url;
        }
        if let Some(level) = env_string("CLOUDSYNC_APP_LOG_LEVEL") {
            config.app.log_level =
                level
                    .parse::<LogLevel>()
                    .map_err(|reason| ConfigError::InvalidOverride {
                        variable: "CLOUDSYNC_APP_LOG_LEVEL".to_string(),
                        value: level.clone(),
                        reason,
                    })?;
        }

        if let Err(errors) = config.validate() {
            log::warn!(
                "Config validation warnings after env overrides: {:?}",
                errors
            );
        }

        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
