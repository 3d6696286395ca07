// crates/sync-engine/src/lib.rs
//! Cross-device synchronization engine
//!
//! Keeps watched state, resume points, favorites and selected userdata files
//! consistent across devices running the same media host:
//! - Snapshot sync through a cloud storage provider
//! - Event sync over a publish/subscribe broker
//! - Conflict resolution with a configurable strategy
//! - File change tracking and per-file transfer
//!
//! # Example
//!
//! ```no_run
//! use cloudsync_config::ConfigManager;
//! use cloudsync_sync_engine::{SyncOutcome, SyncService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::new()?;
//! let config = manager.load_with_device_id()?;
//! let data_dir = manager.data_dir(&config)?;
//!
//! let service = SyncService::build(&config, data_dir).await?;
//! if let SyncOutcome::Completed(report) = service.sync_now().await {
//!     println!("{}", report);
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod conflict;
mod context;
mod error;
mod events;
mod files;
mod locks;
mod monitor;
pub mod protocol;
mod service;
mod snapshot;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod tracker;
mod types;
mod watcher;

pub use config::{SyncConfig, TRACKER_FILE};
pub use conflict::{ConflictKind, ConflictRecord, ConflictResolver, ConflictSummary, Winner};
pub use context::SyncContext;
pub use error::{SyncError, SyncResult};
pub use events::{EventSyncManager, Received};
pub use files::{
    synced_files, FileAction, FileSync, FileSyncReport, SyncedFile, FAVORITES_CATEGORY,
    USERDATA_FILES,
};
pub use locks::{FileLocks, WriteFlag, WriteGuard};
pub use monitor::{publish_pulled, pull_host_state, HostMonitor, PullReport};
pub use protocol::{DeviceStatus, Envelope, Topic, TopicClass};
pub use service::{
    build_host, build_storage, mqtt_settings, ServiceParts, ServiceStatus, SyncService,
};
pub use snapshot::SnapshotSyncManager;
pub use tracker::{hash_file, ChangeReason, ChangeTracker, TrackedFile, TrackerStats};
pub use types::{PeerInfo, SyncOutcome, SyncPhase, SyncReport};
pub use watcher::FavoritesWatcher;
