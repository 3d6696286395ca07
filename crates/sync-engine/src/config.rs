// crates/sync-engine/src/config.rs
//! Per-cycle sync configuration

use crate::error::{SyncError, SyncResult};
use cloudsync_config::Config;
use cloudsync_core::{ConflictStrategy, DeviceId};
use cloudsync_database::STORE_FILE;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the change tracker index in the data directory
pub const TRACKER_FILE: &str = "tracked_files.json";

/// Settings every sync component reads
///
/// Built from the loaded configuration and handed to components by
/// reference; nothing in the engine reads configuration on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Device identifier stamped on every published event
    pub device_id: DeviceId,
    /// Human-readable name announced in status messages
    pub device_name: String,
    /// Conflict resolution strategy
    pub strategy: ConflictStrategy,
    pub watched: bool,
    pub resume: bool,
    pub favorites: bool,
    pub userdata: bool,
    /// Whether a snapshot store is configured
    pub cloud_enabled: bool,
    /// Whether an event broker is configured
    pub broker_enabled: bool,
    /// Gzip mirrored files on the remote
    pub compression: bool,
    /// Upper bound for one storage operation, backup handling included
    pub transfer_timeout: Duration,
    /// Time between snapshot cycles
    pub snapshot_interval: Duration,
    /// Time between favorites polls
    pub favorites_poll: Duration,
    /// Time between host state polls
    pub host_poll: Duration,
    /// Tracked files are re-synced after this long even when unchanged
    pub force_resync: Duration,
    /// How long a received favorite title is held back from re-publishing
    pub anti_loop_grace: Duration,
    /// Directory holding the local store and the tracker index
    pub data_dir: PathBuf,
}

impl SyncConfig {
    /// Creates a configuration with default timings and everything enabled
    pub fn new(device_id: DeviceId, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_id,
            device_name: String::new(),
            strategy: ConflictStrategy::Newer,
            watched: true,
            resume: true,
            favorites: true,
            userdata: false,
            cloud_enabled: true,
            broker_enabled: true,
            compression: true,
            transfer_timeout: Duration::from_secs(60),
            snapshot_interval: Duration::from_secs(5 * 60),
            favorites_poll: Duration::from_secs(5),
            host_poll: Duration::from_secs(30),
            force_resync: Duration::from_secs(24 * 3600),
            anti_loop_grace: Duration::from_secs(10),
            data_dir: data_dir.into(),
        }
    }

    /// Builds the sync view of a loaded configuration
    ///
    /// The device id must already be assigned; see
    /// `ConfigManager::load_with_device_id`.
    pub fn from_config(config: &Config, data_dir: impl Into<PathBuf>) -> SyncResult<Self> {
        let device_id = config
            .device
            .id()
            .ok_or_else(|| SyncError::Config("device id is not set".to_string()))?;
        let sync = &config.sync;

        Ok(Self {
            device_id,
            device_name: config.device.name.clone(),
            strategy: sync.conflict_strategy,
            watched: sync.watched,
            resume: sync.resume,
            favorites: sync.favorites,
            userdata: sync.userdata,
            cloud_enabled: config.cloud.enabled,
            broker_enabled: config.broker.enabled,
            compression: config.cloud.compression,
            // a download may fall back to the backup copy
            transfer_timeout: Duration::from_secs(config.cloud.timeout_secs.max(1) * 2),
            snapshot_interval: Duration::from_secs(sync.interval_minutes.max(1) * 60),
            favorites_poll: Duration::from_secs(sync.favorites_poll_secs.max(1)),
            host_poll: Duration::from_secs(sync.host_poll_secs.max(1)),
            force_resync: Duration::from_secs(sync.force_resync_hours * 3600),
            anti_loop_grace: Duration::from_secs(sync.anti_loop_grace_secs),
            data_dir: data_dir.into(),
        })
    }

    /// This configuration with the per-cycle settings of `other`
    ///
    /// Identity, the data directory and which collaborators exist keep the
    /// values of `self`; changing those takes a restart.
    pub fn with_cycle_settings(&self, other: &SyncConfig) -> Self {
        Self {
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
            cloud_enabled: self.cloud_enabled,
            broker_enabled: self.broker_enabled,
            data_dir: self.data_dir.clone(),
            ..other.clone()
        }
    }

    /// Location of the local state store
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE)
    }

    /// Location of the change tracker index
    pub fn tracker_path(&self) -> PathBuf {
        self.data_dir.join(TRACKER_FILE)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// True when any file-level category is enabled
    pub fn syncs_files(&self) -> bool {
        self.favorites || self.userdata
    }
}
