// crates/sync-engine/src/service.rs
//! The long-running sync service
//!
//! Wires the host, storage and broker collaborators to the snapshot and
//! event managers and drives them from a one-second tick.

use crate::config::SyncConfig;
use crate::conflict::{ConflictResolver, ConflictSummary};
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::events::EventSyncManager;
use crate::monitor::HostMonitor;
use crate::protocol::{status_payload, status_topic, DeviceStatus};
use crate::snapshot::SnapshotSyncManager;
use crate::tracker::{ChangeTracker, TrackerStats};
use crate::types::{PeerInfo, SyncOutcome, SyncPhase};
use crate::watcher::FavoritesWatcher;
use cloudsync_config::{CloudProvider, Config, ConfigManager};
use cloudsync_core::{AppError, CloudStorage, EventBus, MediaHost, MessageHandler};
use cloudsync_database::queries::{
    count_resume, count_watched, pending_host_resume, pending_host_watched,
};
use cloudsync_database::{open_store, DbPool};
use cloudsync_network::{
    DropboxSettings, DropboxStorage, FolderStorage, KodiHost, KodiSettings, MqttBus,
    MqttSettings, Will,
};
use cloudsync_resilience::RetryPolicy;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Main loop resolution; shutdown is observed within one tick
const TICK: Duration = Duration::from_secs(1);

/// How long shutdown waits for a running snapshot cycle or the broker
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Collaborators for [`SyncService::from_parts`]
pub struct ServiceParts {
    pub config: SyncConfig,
    pub pool: DbPool,
    pub host: Arc<dyn MediaHost>,
    pub storage: Option<Arc<dyn CloudStorage>>,
    pub bus: Option<Arc<dyn EventBus>>,
}

/// Snapshot of the service state for `cloudsync status`
#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub device_id: String,
    pub phase: SyncPhase,
    pub watched_rows: i64,
    pub resume_rows: i64,
    /// Rows waiting to be written to the host
    pub pending_host_rows: usize,
    pub tracked: TrackerStats,
    pub conflicts: ConflictSummary,
    pub broker_connected: bool,
    pub peers: Vec<PeerInfo>,
    pub store_recreated: bool,
}

pub struct SyncService {
    config: SyncConfig,
    ctx: SyncContext,
    tracker: ChangeTracker,
    snapshot: Arc<SnapshotSyncManager>,
    events: Option<Arc<EventSyncManager>>,
    monitor: Option<HostMonitor>,
    watcher: Option<FavoritesWatcher>,
    mqtt: Option<Arc<MqttBus>>,
    store_recreated: bool,
    source: Option<ConfigManager>,
}

impl SyncService {
    /// Builds the service from the loaded configuration
    ///
    /// Probes the host once for its directories and opens (or recreates) the
    /// local store. Nothing connects to the broker until [`run`](Self::run).
    pub async fn build(config: &Config, data_dir: PathBuf) -> SyncResult<Self> {
        let sync_config = SyncConfig::from_config(config, data_dir)?;
        let host: Arc<dyn MediaHost> = Arc::new(build_host(config)?);
        let storage = build_storage(config)?;

        let opened = open_store(sync_config.store_path()).await?;
        if opened.recreated {
            log::warn!(
                "Local store at {} was corrupt and has been recreated; it will refill from the host and the remote snapshot",
                sync_config.store_path().display()
            );
        }

        let mqtt = if config.broker.enabled {
            Some(Arc::new(MqttBus::new(mqtt_settings(config, &sync_config)?)))
        } else {
            None
        };
        let bus = mqtt.clone().map(|bus| bus as Arc<dyn EventBus>);

        let mut service = Self::from_parts(ServiceParts {
            config: sync_config,
            pool: opened.pool,
            host,
            storage,
            bus,
        })
        .await?;
        service.mqtt = mqtt;
        service.store_recreated = opened.recreated;
        Ok(service)
    }

    /// Assembles the service from ready collaborators
    pub async fn from_parts(parts: ServiceParts) -> SyncResult<Self> {
        let ServiceParts {
            config,
            pool,
            host,
            storage,
            bus,
        } = parts;

        let paths = host.probe_paths().await?;
        log::info!(
            "Using {} userdata at {}",
            host.name(),
            paths.userdata_dir.display()
        );

        let resolver = ConflictResolver::new(config.strategy);
        let ctx = SyncContext::new(pool, host, paths, resolver);
        let tracker = ChangeTracker::open(config.tracker_path(), config.force_resync);

        let events = bus
            .filter(|_| config.broker_enabled)
            .map(|bus| Arc::new(EventSyncManager::new(&config, ctx.clone(), bus)));

        let mut snapshot = SnapshotSyncManager::new(ctx.clone(), storage, tracker.clone());
        if let Some(events) = &events {
            snapshot = snapshot.with_events(Arc::clone(events));
        }

        let monitor = events
            .as_ref()
            .map(|events| HostMonitor::new(ctx.clone(), Arc::clone(events)));
        let watcher = events.as_ref().filter(|_| config.favorites).map(|events| {
            FavoritesWatcher::new(Arc::clone(&ctx.host), Arc::clone(events), ctx.writes.clone())
        });

        Ok(Self {
            config,
            ctx,
            tracker,
            snapshot: Arc::new(snapshot),
            events,
            monitor,
            watcher,
            mqtt: None,
            store_recreated: false,
            source: None,
        })
    }

    /// Re-reads `manager`'s file before every cycle
    ///
    /// Intervals, toggles and the conflict strategy follow the file. The
    /// device identity, data directory and the enabled transports keep their
    /// startup values until the service restarts.
    pub fn reload_from(mut self, manager: ConfigManager) -> Self {
        self.source = Some(manager);
        self
    }

    /// Settings for the next cycle
    ///
    /// Falls back to the startup settings when the file cannot be read or
    /// fails validation.
    pub fn cycle_config(&self) -> SyncConfig {
        let Some(manager) = &self.source else {
            return self.config.clone();
        };
        let loaded = match manager.load_with_env_overrides() {
            Ok(loaded) => loaded,
            Err(e) => {
                log::warn!("Using startup settings, cannot reload configuration: {}", e);
                return self.config.clone();
            }
        };
        if let Err(errors) = loaded.validate() {
            log::warn!(
                "Using startup settings, {} has {} problem(s)",
                manager.config_path().display(),
                errors.len()
            );
            return self.config.clone();
        }
        let fresh = match SyncConfig::from_config(&loaded, self.config.data_dir()) {
            Ok(fresh) => self.config.with_cycle_settings(&fresh),
            Err(e) => {
                log::warn!("Using startup settings: {}", e);
                return self.config.clone();
            }
        };

        if fresh.strategy != self.ctx.resolver.strategy() {
            match self.ctx.resolver.set_strategy(fresh.strategy) {
                Ok(()) => log::info!("Conflict strategy is now {:?}", fresh.strategy),
                Err(e) => log::warn!("Cannot switch conflict strategy: {}", e),
            }
        }
        fresh
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn pool(&self) -> &DbPool {
        &self.ctx.pool
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.ctx.resolver
    }

    pub fn events(&self) -> Option<&Arc<EventSyncManager>> {
        self.events.as_ref()
    }

    /// True when the store failed its integrity check at open
    pub fn store_recreated(&self) -> bool {
        self.store_recreated
    }

    /// Runs one snapshot cycle now
    pub async fn sync_now(&self) -> SyncOutcome {
        self.snapshot.sync(&self.cycle_config()).await
    }

    /// One favorites poll, if the watcher is enabled
    pub async fn poll_favorites(&self) -> SyncResult<usize> {
        match &self.watcher {
            Some(watcher) => watcher.poll().await,
            None => Ok(0),
        }
    }

    /// One host state poll, if the event path is enabled
    pub async fn poll_host(&self) -> SyncResult<usize> {
        match &self.monitor {
            Some(monitor) => Ok(monitor.poll(&self.cycle_config()).await?.changed()),
            None => Ok(0),
        }
    }

    pub async fn status(&self) -> SyncResult<ServiceStatus> {
        let pool = &self.ctx.pool;
        let pending = pending_host_watched(pool).await?.len() + pending_host_resume(pool).await?.len();
        Ok(ServiceStatus {
            device_id: self.config.device_id.to_string(),
            phase: self.snapshot.phase(),
            watched_rows: count_watched(pool).await?,
            resume_rows: count_resume(pool).await?,
            pending_host_rows: pending,
            tracked: self.tracker.stats()?,
            conflicts: self.ctx.resolver.summary()?,
            broker_connected: self.events.as_ref().is_some_and(|e| e.is_connected()),
            peers: self.events.as_ref().map(|e| e.peers()).unwrap_or_default(),
            store_recreated: self.store_recreated,
        })
    }

    /// Removes a favorite on this device only
    pub async fn remove_favorite(&self, title: &str) -> SyncResult<bool> {
        let file = self.ctx.paths.favourites_file();
        let _lock = self.ctx.locks.lock(&file).await;
        let _writing = self.ctx.writes.begin();
        let removed = self.ctx.host.remove_favorite(title).await?;
        if removed {
            log::info!("Removed favorite {:?} on this device", title);
        }
        Ok(removed)
    }

    /// Connects to the broker, republishes every local favorite, disconnects
    pub async fn publish_favorites(&self, wait: Duration) -> SyncResult<usize> {
        let events = self
            .events
            .as_ref()
            .ok_or_else(|| SyncError::Config("the event broker is disabled".to_string()))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let broker = self.spawn_broker(stop_rx);

        let deadline = Instant::now() + wait;
        while !events.is_connected() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let result = if events.is_connected() {
            let published = events.publish_all_favorites().await;
            events.publish_status(DeviceStatus::Offline).await;
            published
        } else {
            Err(AppError::ConnectionLost {
                message: format!("no broker session within {:?}", wait),
            }
            .into())
        };

        let _ = stop_tx.send(true);
        if let Some(task) = broker {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, task).await;
        }
        result
    }

    /// Runs until `shutdown` turns true or its sender is dropped
    ///
    /// A snapshot cycle runs at startup and then every interval. Host and
    /// favorites polls run while the event path is enabled. Cycles run as
    /// tasks so a slow transfer never delays shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> SyncResult<()> {
        let (broker_stop, broker_stop_rx) = watch::channel(false);
        let broker = self.spawn_broker(broker_stop_rx);

        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut settings = self.config.clone();
        let start = Instant::now();
        let mut next_snapshot = start;
        let mut next_host_poll = start + settings.host_poll;
        let mut next_favorites_poll = start;
        let mut snapshot_job: Option<JoinHandle<()>> = None;
        let mut host_job: Option<JoinHandle<()>> = None;
        let mut favorites_job: Option<JoinHandle<()>> = None;

        log::info!(
            "Sync service running as {} (snapshot every {:?})",
            settings.device_id,
            settings.snapshot_interval
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
            let now = Instant::now();

            if now >= next_snapshot && is_idle(&snapshot_job) {
                settings = self.cycle_config();
                next_snapshot = now + settings.snapshot_interval;
                let snapshot = Arc::clone(&self.snapshot);
                let config = settings.clone();
                snapshot_job = Some(tokio::spawn(async move {
                    snapshot.sync(&config).await;
                }));
            }

            if let Some(monitor) = &self.monitor {
                if now >= next_host_poll && is_idle(&host_job) {
                    next_host_poll = now + settings.host_poll;
                    let monitor = monitor.clone();
                    let config = settings.clone();
                    host_job = Some(tokio::spawn(async move {
                        if let Err(e) = monitor.poll(&config).await {
                            log::warn!("Host poll failed: {}", e);
                        }
                    }));
                }
            }

            if let Some(watcher) = &self.watcher {
                if now >= next_favorites_poll && is_idle(&favorites_job) {
                    next_favorites_poll = now + settings.favorites_poll;
                    let watcher = watcher.clone();
                    favorites_job = Some(tokio::spawn(async move {
                        if let Err(e) = watcher.poll().await {
                            log::debug!("Favorites poll failed: {}", e);
                        }
                    }));
                }
            }
        }

        log::info!("Sync service stopping");
        for job in [host_job, favorites_job].into_iter().flatten() {
            job.abort();
        }
        if let Some(job) = snapshot_job {
            let abort = job.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, job).await.is_err() {
                log::warn!("Snapshot cycle still running at shutdown, abandoning it");
                abort.abort();
            }
        }

        if let Some(events) = &self.events {
            if events.is_connected() {
                events.publish_status(DeviceStatus::Offline).await;
            }
        }
        let _ = broker_stop.send(true);
        if let Some(task) = broker {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                log::warn!("Broker connection did not close within {:?}", SHUTDOWN_GRACE);
            }
        }
        log::info!("Sync service stopped");
        Ok(())
    }

    fn spawn_broker(&self, stop: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        let mqtt = Arc::clone(self.mqtt.as_ref()?);
        let handler: Arc<dyn MessageHandler> = Arc::clone(self.events.as_ref()?) as Arc<dyn MessageHandler>;
        Some(tokio::spawn(async move {
            if let Err(e) = mqtt.run(handler, stop).await {
                log::error!("Broker connection task failed: {}", e);
            }
        }))
    }
}

fn is_idle(job: &Option<JoinHandle<()>>) -> bool {
    job.as_ref().map_or(true, JoinHandle::is_finished)
}

/// The Kodi host described by the `[host]` section
pub fn build_host(config: &Config) -> SyncResult<KodiHost> {
    let mut settings = KodiSettings::new(&config.host.rpc_url)
        .with_credentials(&config.host.username, &config.host.password);
    if let Some(dir) = &config.host.userdata_dir {
        settings = settings.with_userdata_dir(dir);
    }
    KodiHost::new(settings).map_err(|e| AppError::from(e).into())
}

/// The snapshot store described by the `[cloud]` section, if enabled
pub fn build_storage(config: &Config) -> SyncResult<Option<Arc<dyn CloudStorage>>> {
    let cloud = &config.cloud;
    if !cloud.enabled {
        return Ok(None);
    }
    let storage: Arc<dyn CloudStorage> = match cloud.provider {
        CloudProvider::Dropbox => {
            if cloud.access_token.trim().is_empty() {
                return Err(SyncError::Config(
                    "cloud.access_token is required for the dropbox provider".to_string(),
                ));
            }
            let mut settings = DropboxSettings::new(cloud.access_token.trim(), &cloud.folder);
            settings.transfer_timeout = Duration::from_secs(cloud.timeout_secs.max(1));
            settings.metadata_timeout = Duration::from_secs(cloud.metadata_timeout_secs.max(1));
            Arc::new(DropboxStorage::new(settings).map_err(AppError::from)?)
        }
        CloudProvider::Folder => Arc::new(FolderStorage::new(&cloud.folder)),
    };
    Ok(Some(storage))
}

/// Broker settings with a unique session id and the offline last-will
pub fn mqtt_settings(config: &Config, sync: &SyncConfig) -> SyncResult<MqttSettings> {
    let broker = &config.broker;
    let device = sync.device_id.as_str();
    let mut settings = MqttSettings::new(
        &broker.host,
        broker.port,
        MqttSettings::session_client_id(device),
    );
    settings.username = broker.username.clone();
    settings.password = broker.password.clone();
    settings.use_tls = broker.use_tls;
    settings.keep_alive = Duration::from_secs(broker.keep_alive_secs.max(5));
    settings.reconnect = RetryPolicy::unbounded()
        .with_initial_delay(Duration::from_secs(broker.reconnect_initial_secs.max(1)))
        .with_max_delay(Duration::from_secs(broker.reconnect_max_secs.max(1)));
    settings.last_will = Some(Will {
        topic: status_topic(device),
        payload: status_payload(device, &sync.device_name, DeviceStatus::Offline)?,
    });
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Config {
        let mut config = Config::default();
        config.device.device_id = "cloudsync_test".to_string();
        config
    }

    #[test]
    fn test_storage_follows_provider() {
        let mut config = configured();
        config.cloud.enabled = false;
        assert!(build_storage(&config).unwrap().is_none());

        config.cloud.enabled = true;
        config.cloud.provider = CloudProvider::Folder;
        config.cloud.folder = "/mnt/nas/cloudsync".to_string();
        assert_eq!(build_storage(&config).unwrap().unwrap().provider(), "folder");

        config.cloud.provider = CloudProvider::Dropbox;
        config.cloud.access_token = "  ".to_string();
        assert!(matches!(build_storage(&config), Err(SyncError::Config(_))));

        config.cloud.access_token = "sl.token".to_string();
        assert_eq!(build_storage(&config).unwrap().unwrap().provider(), "dropbox");
    }

    #[test]
    fn test_mqtt_settings_carry_offline_will() {
        let mut config = configured();
        config.broker.host = "broker.example.com".to_string();
        config.broker.reconnect_max_secs = 30;
        let sync = SyncConfig::from_config(&config, "/tmp").unwrap();

        let settings = mqtt_settings(&config, &sync).unwrap();
        assert!(settings.client_id.starts_with("cloudsync_test_session_"));
        assert_eq!(settings.host, "broker.example.com");

        let will = settings.last_will.unwrap();
        assert_eq!(will.topic, "cloudsync/devices/cloudsync_test/status");
        let payload: serde_json::Value = serde_json::from_slice(&will.payload).unwrap();
        assert_eq!(payload["content"]["status"], "offline");
        assert_eq!(payload["device_id"], "cloudsync_test");
    }

    #[test]
    fn test_build_host_uses_override() {
        let mut config = configured();
        config.host.userdata_dir = Some(PathBuf::from("/srv/kodi/userdata"));
        assert_eq!(build_host(&config).unwrap().name(), "kodi");
    }
}
