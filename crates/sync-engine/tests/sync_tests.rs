// crates/sync-engine/tests/sync_tests.rs
//! Integration tests for sync engine

use async_trait::async_trait;
use cloudsync_config::ConfigManager;
use cloudsync_core::transport::{COMPRESSED_SUFFIX, SNAPSHOT_NAME};
use cloudsync_core::{
    ActionDescriptor, AppError, CloudStorage, ConflictStrategy, ContentId, DeviceId,
    FavoriteEntry, MediaKind, ResumePoint, Timestamp, WatchedItem,
};
use cloudsync_database::open_in_memory;
use cloudsync_network::MemoryStorage;
use cloudsync_sync_engine::protocol::{
    favorite_added_topic, resume_topic, status_topic, watched_topic, StatusContent,
};
use cloudsync_sync_engine::testing::{HostCall, MemoryBroker, MemoryBus, MemoryHost};
use cloudsync_sync_engine::{
    ChangeReason, ChangeTracker, ConflictResolver, DeviceStatus, Envelope, Received,
    ServiceParts, SyncConfig, SyncOutcome, SyncService, Winner,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

struct Device {
    _dir: TempDir,
    host: MemoryHost,
    bus: MemoryBus,
    service: SyncService,
}

impl Device {
    async fn connect(&self, broker: &MemoryBroker) {
        let events = self.service.events().expect("broker enabled").clone();
        broker.connect(&self.bus, events).await;
    }

    fn favourites(&self) -> std::path::PathBuf {
        self.host.paths().favourites_file()
    }
}

async fn device_with(
    name: &str,
    storage: &MemoryStorage,
    broker: &MemoryBroker,
    configure: impl FnOnce(&mut SyncConfig),
) -> Device {
    device_on(name, Arc::new(storage.clone()), broker, configure).await
}

async fn device_on(
    name: &str,
    storage: Arc<dyn CloudStorage>,
    broker: &MemoryBroker,
    configure: impl FnOnce(&mut SyncConfig),
) -> Device {
    let dir = TempDir::new().unwrap();
    let host = MemoryHost::new(dir.path().join("userdata"));
    let mut config = SyncConfig::new(DeviceId::from_string(name), dir.path().join("data"));
    config.device_name = name.to_string();
    configure(&mut config);

    let bus = broker.bus(name);
    let service = SyncService::from_parts(ServiceParts {
        config,
        pool: open_in_memory().await.unwrap(),
        host: Arc::new(host.clone()),
        storage: Some(storage),
        bus: Some(Arc::new(bus.clone())),
    })
    .await
    .unwrap();

    Device {
        _dir: dir,
        host,
        bus,
        service,
    }
}

async fn device(name: &str, storage: &MemoryStorage, broker: &MemoryBroker) -> Device {
    device_with(name, storage, broker, |_| {}).await
}

fn heat() -> ContentId {
    ContentId::new("imdb", "tt001")
}

fn ronin() -> ContentId {
    ContentId::new("imdb", "tt002")
}

fn movie(id: ContentId, title: &str, count: u32) -> WatchedItem {
    WatchedItem::new(id, MediaKind::Movie, title, count)
}

fn favorite(title: &str, path: &str) -> FavoriteEntry {
    FavoriteEntry::new(title, ActionDescriptor::parse(&format!("PlayMedia(\"{}\")", path)))
}

/// Storage whose downloads fail while `failing` is set; uploads still work
#[derive(Clone)]
struct FlakyStorage {
    inner: MemoryStorage,
    failing: Arc<AtomicBool>,
}

impl FlakyStorage {
    fn new(inner: &MemoryStorage) -> Self {
        Self {
            inner: inner.clone(),
            failing: Arc::new(AtomicBool::new(true)),
        }
    }

    fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl CloudStorage for FlakyStorage {
    fn provider(&self) -> &str {
        "flaky"
    }

    async fn upload(&self, name: &str, bytes: &[u8]) -> bool {
        self.inner.upload(name, bytes).await
    }

    async fn try_download(&self, name: &str) -> cloudsync_core::Result<Option<Vec<u8>>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::StorageUnavailable {
                provider: "flaky".to_string(),
                reason: "read timed out".to_string(),
            });
        }
        self.inner.try_download(name).await
    }

    async fn exists(&self, name: &str) -> bool {
        self.inner.exists(name).await
    }

    async fn create_folder(&self) -> bool {
        self.inner.create_folder().await
    }
}

fn completed(outcome: SyncOutcome) -> cloudsync_sync_engine::SyncReport {
    match outcome {
        SyncOutcome::Completed(report) => report,
        SyncOutcome::Skipped => panic!("sync was skipped"),
    }
}

#[tokio::test]
async fn test_snapshot_sync_is_idempotent() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let a = device("device_a", &storage, &broker).await;
    a.host.add_item(movie(heat(), "Heat", 1));

    let first = completed(a.service.sync_now().await);
    assert!(!first.remote_found);
    assert_eq!(first.pulled_watched, 1);
    assert!(first.snapshot_uploaded);
    assert!(storage.get(SNAPSHOT_NAME).is_some());

    let second = completed(a.service.sync_now().await);
    assert!(second.remote_found);
    assert_eq!(second.total_changes(), 0);
    assert!(!second.snapshot_uploaded);
    assert!(second.is_clean(), "errors: {:?}", second.errors);
    assert!(a.host.calls().is_empty());
}

#[tokio::test]
async fn test_disjoint_additions_converge() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let a = device("device_a", &storage, &broker).await;
    let b = device("device_b", &storage, &broker).await;
    for host in [&a.host, &b.host] {
        host.add_item(movie(heat(), "Heat", 0));
        host.add_item(movie(ronin(), "Ronin", 0));
    }
    a.host.set_play_count(&heat(), 1);
    b.host.set_play_count(&ronin(), 1);

    completed(a.service.sync_now().await);
    let b_report = completed(b.service.sync_now().await);
    assert_eq!(b_report.merged_watched, 1);
    assert_eq!(b_report.pushed_watched, 1);
    assert!(b_report.snapshot_uploaded);

    let a_report = completed(a.service.sync_now().await);
    assert_eq!(a_report.merged_watched, 1);
    assert_eq!(a_report.pushed_watched, 1);

    for host in [&a.host, &b.host] {
        assert_eq!(host.item(&heat()).unwrap().play_count, 1);
        assert_eq!(host.item(&ronin()).unwrap().play_count, 1);
    }

    // both sides settled
    assert_eq!(completed(a.service.sync_now().await).total_changes(), 0);
    assert_eq!(completed(b.service.sync_now().await).total_changes(), 0);
}

#[tokio::test]
async fn test_snapshot_skips_items_missing_from_library() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let a = device("device_a", &storage, &broker).await;
    let b = device("device_b", &storage, &broker).await;
    a.host.add_item(movie(heat(), "Heat", 3));

    completed(a.service.sync_now().await);
    let report = completed(b.service.sync_now().await);
    assert_eq!(report.merged_watched, 1);
    assert_eq!(report.pushed_watched, 0);
    assert!(report.is_clean());
    assert_eq!(b.service.status().await.unwrap().pending_host_rows, 1);

    // the item shows up after a library scan
    b.host.add_item(movie(heat(), "Heat", 0));
    let report = completed(b.service.sync_now().await);
    assert_eq!(report.pushed_watched, 1);
    assert_eq!(b.host.item(&heat()).unwrap().play_count, 3);
}

#[test]
fn test_newer_strategy_tie_keeps_local() {
    let resolver = ConflictResolver::new(ConflictStrategy::Newer);
    let at = Timestamp::from_millis(1_700_000_000_000);
    let local = movie(heat(), "Heat", 1).with_last_change(at);
    let remote = movie(heat(), "Heat", 2).with_last_change(at);
    assert_eq!(resolver.resolve_watched(Some(&local), Some(&remote)), Winner::Local);

    let later = movie(heat(), "Heat", 2).with_last_change(Timestamp::from_millis(at.as_millis() + 1));
    assert_eq!(resolver.resolve_watched(Some(&local), Some(&later)), Winner::Remote);
}

#[test]
fn test_manual_strategy_records_conflicts() {
    let resolver = ConflictResolver::new(ConflictStrategy::Manual);
    let local = movie(heat(), "Heat", 1).with_last_change(Timestamp::from_millis(2_000));
    let remote = movie(heat(), "Heat", 4).with_last_change(Timestamp::from_millis(1_000));

    assert_eq!(resolver.resolve_watched(Some(&local), Some(&remote)), Winner::Local);
    let pending = resolver.pending_conflicts().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].key, "imdb:tt001");

    // agreeing sides are not a conflict
    resolver.resolve_watched(Some(&local), Some(&local));
    assert_eq!(resolver.summary().unwrap().total, 1);
    assert_eq!(resolver.clear_pending().unwrap(), 1);
    assert!(resolver.pending_conflicts().unwrap().is_empty());
}

#[tokio::test]
async fn test_further_resume_position_wins_over_newer_stamp() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let b = device_with("device_b", &storage, &broker, |c| c.strategy = ConflictStrategy::Local).await;
    b.host.add_file(
        ResumePoint::new("/nas/movies/heat.mkv", MediaKind::Movie, 120.0, 6000.0)
            .with_content_id(heat()),
    );
    b.connect(&broker).await;
    assert_eq!(b.service.poll_host().await.unwrap(), 1);

    let remote = ResumePoint::new("/mnt/media/heat.mkv", MediaKind::Movie, 300.0, 6000.0)
        .with_content_id(heat())
        .with_last_change(Timestamp::from_millis(1_000));
    let payload = Envelope::new("device_a", &remote).to_bytes().unwrap();
    let events = b.service.events().unwrap();

    let received = events.handle_message(&resume_topic(&remote), &payload).await.unwrap();
    assert_eq!(received, Received::Applied);
    assert_eq!(b.host.file("/nas/movies/heat.mkv").unwrap().position_seconds, 300.0);

    // a point behind ours never wins
    let behind = ResumePoint::new("/mnt/media/heat.mkv", MediaKind::Movie, 60.0, 6000.0)
        .with_content_id(heat());
    let payload = Envelope::new("device_a", &behind).to_bytes().unwrap();
    let received = events.handle_message(&resume_topic(&behind), &payload).await.unwrap();
    assert_eq!(received, Received::NoChange);
}

#[test]
fn test_resume_progress_beats_every_strategy() {
    let at = Timestamp::from_millis(1_700_000_000_000);
    let local = ResumePoint::new("/movies/heat.mkv", MediaKind::Movie, 300.0, 6000.0).with_last_change(at);
    let remote = ResumePoint::new("/movies/heat.mkv", MediaKind::Movie, 120.0, 6000.0).with_last_change(at);
    for strategy in ConflictStrategy::ALL {
        let resolver = ConflictResolver::new(strategy);
        assert_eq!(
            resolver.resolve_resume(Some(&local), Some(&remote)),
            Winner::Local,
            "strategy {}",
            strategy
        );
        assert_eq!(
            resolver.resolve_resume(Some(&remote), Some(&local)),
            Winner::Remote,
            "strategy {}",
            strategy
        );
    }
}

#[tokio::test]
async fn test_snapshot_carries_later_play_count_back() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let a = device("device_a", &storage, &broker).await;
    let b = device("device_b", &storage, &broker).await;
    a.host.add_item(movie(heat(), "Heat", 1));
    b.host.add_item(movie(heat(), "Heat", 0));

    completed(a.service.sync_now().await);
    completed(b.service.sync_now().await);
    assert_eq!(b.host.item(&heat()).unwrap().play_count, 1);

    tokio::time::sleep(Duration::from_millis(5)).await;
    b.host.set_play_count(&heat(), 2);
    let report = completed(b.service.sync_now().await);
    assert_eq!(report.pulled_watched, 1);
    assert!(report.snapshot_uploaded);

    let report = completed(a.service.sync_now().await);
    assert_eq!(report.merged_watched, 1);
    assert_eq!(a.host.item(&heat()).unwrap().play_count, 2);
}

#[tokio::test]
async fn test_change_seen_by_host_poll_reaches_snapshot() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let a = device("device_a", &storage, &broker).await;
    let b = device("device_b", &storage, &broker).await;
    a.host.add_item(movie(heat(), "Heat", 1));
    b.host.add_item(movie(heat(), "Heat", 0));

    completed(a.service.sync_now().await);
    completed(b.service.sync_now().await);

    // the event path records the change before the next snapshot cycle
    tokio::time::sleep(Duration::from_millis(5)).await;
    a.host.set_play_count(&heat(), 2);
    assert_eq!(a.service.poll_host().await.unwrap(), 1);

    let report = completed(a.service.sync_now().await);
    assert_eq!(report.pulled_watched, 0);
    assert!(report.snapshot_uploaded);

    completed(b.service.sync_now().await);
    assert_eq!(b.host.item(&heat()).unwrap().play_count, 2);
}

#[tokio::test]
async fn test_change_from_failed_cycle_is_uploaded_later() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let a = device("device_a", &storage, &broker).await;
    let b = device("device_b", &storage, &broker).await;
    a.host.add_item(movie(heat(), "Heat", 1));
    b.host.add_item(movie(heat(), "Heat", 0));
    completed(a.service.sync_now().await);

    tokio::time::sleep(Duration::from_millis(5)).await;
    a.host.set_play_count(&heat(), 2);
    storage.set_offline(true);
    let report = completed(a.service.sync_now().await);
    assert_eq!(report.pulled_watched, 1);
    assert!(!report.snapshot_uploaded);
    assert!(report.errors.iter().any(|e| e.starts_with("download:")));

    storage.set_offline(false);
    let report = completed(a.service.sync_now().await);
    assert_eq!(report.pulled_watched, 0);
    assert!(report.snapshot_uploaded);

    completed(b.service.sync_now().await);
    assert_eq!(b.host.item(&heat()).unwrap().play_count, 2);
}

#[tokio::test]
async fn test_unreachable_storage_is_not_seeded() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let a = device("device_a", &storage, &broker).await;
    a.host.add_item(movie(heat(), "Heat", 1));
    a.host.add_item(movie(ronin(), "Ronin", 0));
    completed(a.service.sync_now().await);
    let seeded = storage.get(SNAPSHOT_NAME).unwrap();

    let flaky = FlakyStorage::new(&storage);
    let b = device_on("device_b", Arc::new(flaky.clone()), &broker, |_| {}).await;
    b.host.add_item(movie(heat(), "Heat", 0));
    b.host.add_item(movie(ronin(), "Ronin", 1));

    let report = completed(b.service.sync_now().await);
    assert!(!report.remote_found);
    assert!(!report.snapshot_uploaded);
    assert!(report.errors.iter().any(|e| e.starts_with("download:")));
    assert_eq!(storage.get(SNAPSHOT_NAME).unwrap(), seeded);

    flaky.recover();
    let report = completed(b.service.sync_now().await);
    assert!(report.remote_found);
    assert!(report.snapshot_uploaded);
    assert_eq!(b.host.item(&heat()).unwrap().play_count, 1);

    completed(a.service.sync_now().await);
    assert_eq!(a.host.item(&heat()).unwrap().play_count, 1);
    assert_eq!(a.host.item(&ronin()).unwrap().play_count, 1);
}

#[tokio::test]
async fn test_rows_missing_from_remote_are_uploaded_again() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let a = device("device_a", &storage, &broker).await;
    let b = device("device_b", &storage, &broker).await;
    a.host.add_item(movie(heat(), "Heat", 1));
    a.host.add_item(movie(ronin(), "Ronin", 0));
    b.host.add_item(movie(heat(), "Heat", 0));
    b.host.add_item(movie(ronin(), "Ronin", 1));

    completed(a.service.sync_now().await);
    let seeded = storage.get(SNAPSHOT_NAME).unwrap();
    assert!(completed(b.service.sync_now().await).snapshot_uploaded);

    // another writer puts back the snapshot from before b's upload
    storage.put(SNAPSHOT_NAME, &seeded);
    let report = completed(b.service.sync_now().await);
    assert_eq!(report.total_changes(), 0);
    assert!(report.snapshot_uploaded);

    completed(a.service.sync_now().await);
    assert_eq!(a.host.item(&ronin()).unwrap().play_count, 1);
}

#[tokio::test]
async fn test_service_follows_config_file_between_cycles() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let a = device("device_a", &storage, &broker).await;
    a.host.add_item(movie(heat(), "Heat", 1));

    let config_dir = TempDir::new().unwrap();
    let config_path = config_dir.path().join("config.toml");
    let manager = ConfigManager::with_file(&config_path).unwrap();
    manager
        .update(|c| {
            c.device.device_id = "renamed_device".to_string();
            c.sync.watched = false;
            c.sync.conflict_strategy = ConflictStrategy::Remote;
        })
        .unwrap();
    let service = a.service.reload_from(manager.clone());

    let report = completed(service.sync_now().await);
    assert_eq!(report.pulled_watched, 0);
    assert_eq!(service.resolver().strategy(), ConflictStrategy::Remote);
    assert_eq!(service.cycle_config().device_id.as_str(), "device_a");

    manager.update(|c| c.sync.watched = true).unwrap();
    let report = completed(service.sync_now().await);
    assert_eq!(report.pulled_watched, 1);

    std::fs::write(&config_path, "[sync\nwatched = ").unwrap();
    let fallback = service.cycle_config();
    assert_eq!(&fallback, service.config());
}

#[test]
fn test_tracker_detects_same_size_edit() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("favourites.xml");
    std::fs::write(&path, b"<favourites>aaa</favourites>").unwrap();
    let tracker = ChangeTracker::open(dir.path().join("tracked_files.json"), Duration::from_secs(3600));

    assert_eq!(tracker.has_changed(&path, "favorites"), (true, ChangeReason::NoTrackingData));
    tracker.mark_synced(&path, "favorites").unwrap();
    assert_eq!(tracker.has_changed(&path, "favorites"), (false, ChangeReason::NoChanges));

    let mtime = std::fs::metadata(&path).unwrap().modified().unwrap();
    std::fs::write(&path, b"<favourites>bbb</favourites>").unwrap();
    std::fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(mtime)
        .unwrap();
    assert_eq!(tracker.has_changed(&path, "favorites"), (true, ChangeReason::ContentChanged));

    // the index survives a restart
    tracker.mark_synced(&path, "favorites").unwrap();
    let reopened = ChangeTracker::open(dir.path().join("tracked_files.json"), Duration::from_secs(3600));
    assert_eq!(reopened.has_changed(&path, "favorites"), (false, ChangeReason::NoChanges));
}

#[tokio::test]
async fn test_received_favorite_is_not_echoed_back() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let a = device("device_a", &storage, &broker).await;
    let b = device("device_b", &storage, &broker).await;
    a.connect(&broker).await;
    b.connect(&broker).await;
    assert_eq!(b.service.poll_favorites().await.unwrap(), 0);

    tokio::time::pause();
    let foo = favorite("Foo", "/movies/foo.mkv");
    assert!(a.service.events().unwrap().publish_favorite(&foo).await);
    assert_eq!(b.host.calls(), vec![HostCall::AddFavorite { title: "Foo".to_string() }]);

    // the watcher sees Foo as new but it came from a peer
    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(b.service.poll_favorites().await.unwrap(), 0);
    assert_eq!(broker.published_on(&favorite_added_topic()).len(), 1);

    // a genuine addition after the window goes out
    tokio::time::advance(Duration::from_secs(6)).await;
    b.host.user_add_favorite(favorite("Bar", "/movies/bar.mkv")).await.unwrap();
    assert_eq!(b.service.poll_favorites().await.unwrap(), 1);

    let published = broker.published_on(&favorite_added_topic());
    assert_eq!(published.len(), 2);
    assert_eq!(published[1].client_id, "device_b");
    assert_eq!(published[1].json()["content"]["title"], "Bar");
    assert!(a.host.calls().contains(&HostCall::AddFavorite { title: "Bar".to_string() }));
}

#[tokio::test]
async fn test_own_events_never_touch_the_host() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let a = device("device_a", &storage, &broker).await;
    a.host.add_item(movie(heat(), "Heat", 0));
    a.connect(&broker).await;

    let events = a.service.events().unwrap();
    assert!(events.publish_watched(&movie(heat(), "Heat", 5)).await);
    assert!(events.publish_favorite(&favorite("Foo", "/movies/foo.mkv")).await);

    assert!(a.host.calls().is_empty());
    assert_eq!(a.host.item(&heat()).unwrap().play_count, 0);

    let payload = Envelope::new("device_a", &movie(heat(), "Heat", 5)).to_bytes().unwrap();
    let received = events.handle_message(&watched_topic(&heat()), &payload).await.unwrap();
    assert_eq!(received, Received::SelfEcho);
}

#[tokio::test]
async fn test_watched_changes_travel_both_ways() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let a = device("device_a", &storage, &broker).await;
    let b = device("device_b", &storage, &broker).await;
    for host in [&a.host, &b.host] {
        host.add_item(movie(heat(), "Heat", 0));
    }
    a.connect(&broker).await;
    b.connect(&broker).await;

    a.host.play(&heat());
    assert_eq!(a.service.poll_host().await.unwrap(), 1);
    assert_eq!(b.host.item(&heat()).unwrap().play_count, 1);
    assert_eq!(b.service.poll_host().await.unwrap(), 0, "applied state is not re-published");

    tokio::time::sleep(Duration::from_millis(5)).await;
    b.host.set_play_count(&heat(), 2);
    assert_eq!(b.service.poll_host().await.unwrap(), 1);
    assert_eq!(a.host.item(&heat()).unwrap().play_count, 2);
    assert_eq!(a.service.poll_host().await.unwrap(), 0);

    assert_eq!(broker.published_on("cloudsync/watched/+").len(), 2);
}

#[tokio::test]
async fn test_favourites_file_upload_then_download_with_backup() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let a = device("device_a", &storage, &broker).await;
    let b = device("device_b", &storage, &broker).await;

    a.host.user_add_favorite(favorite("Foo", "/movies/foo.mkv")).await.unwrap();
    a.host.user_add_favorite(favorite("Bar", "/movies/bar.mkv")).await.unwrap();
    let report = completed(a.service.sync_now().await);
    assert_eq!(report.files_uploaded, 1);
    assert!(storage.get(&format!("favourites.xml{}", COMPRESSED_SUFFIX)).is_some());
    assert_eq!(a.host.refresh_count(), 1);

    b.host.user_add_favorite(favorite("Baz", "/movies/baz.mkv")).await.unwrap();
    let report = completed(b.service.sync_now().await);
    assert_eq!(report.files_downloaded, 1);
    assert_eq!(
        std::fs::read(a.favourites()).unwrap(),
        std::fs::read(b.favourites()).unwrap()
    );
    assert_eq!(b.host.refresh_count(), 1);

    let backups: Vec<_> = std::fs::read_dir(b.host.paths().userdata_dir.clone())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("favourites.xml.backup."))
        .collect();
    assert_eq!(backups.len(), 1);

    // unchanged file is not transferred again
    let report = completed(b.service.sync_now().await);
    assert_eq!(report.files_downloaded + report.files_uploaded, 0);
}

#[tokio::test]
async fn test_concurrent_sync_is_skipped() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let a = device("device_a", &storage, &broker).await;
    a.host.add_item(movie(heat(), "Heat", 1));

    let (first, second) = tokio::join!(a.service.sync_now(), a.service.sync_now());
    let skipped = [&first, &second]
        .iter()
        .filter(|o| matches!(o, SyncOutcome::Skipped))
        .count();
    assert_eq!(skipped, 1);
    assert!(matches!(a.service.sync_now().await, SyncOutcome::Completed(_)));
}

#[tokio::test]
async fn test_peers_are_tracked_and_stale_status_dropped() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let a = device("device_a", &storage, &broker).await;
    let b = device("device_b", &storage, &broker).await;
    a.connect(&broker).await;
    b.connect(&broker).await;

    let peers = a.service.events().unwrap().peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].device_id, "device_b");
    assert_eq!(peers[0].status, DeviceStatus::Online);
    // b learned about a from the retained status
    assert_eq!(b.service.events().unwrap().peers()[0].device_id, "device_a");

    let events = a.service.events().unwrap();
    let old = Timestamp::now().as_millis() - 6 * 60 * 1000;
    let stale_online = Envelope {
        device_id: "device_c".to_string(),
        timestamp: old,
        content: StatusContent {
            status: DeviceStatus::Online,
            name: "c".to_string(),
        },
    };
    let topic = status_topic("device_c");
    let received = events
        .handle_message(&topic, &stale_online.to_bytes().unwrap())
        .await
        .unwrap();
    assert_eq!(received, Received::Stale);

    // an old last-will still marks the device offline
    let will = Envelope {
        content: StatusContent {
            status: DeviceStatus::Offline,
            name: "c".to_string(),
        },
        ..stale_online
    };
    let received = events.handle_message(&topic, &will.to_bytes().unwrap()).await.unwrap();
    assert_eq!(received, Received::Peer);
    assert_eq!(events.peers().len(), 2);
}

#[tokio::test]
async fn test_unusable_and_disabled_favorites_are_rejected() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let a = device("device_a", &storage, &broker).await;
    let b = device_with("device_b", &storage, &broker, |c| c.favorites = false).await;

    let script = FavoriteEntry::new("Script", ActionDescriptor::parse("RunScript(script.foo)"));
    let payload = Envelope::new("device_x", &script).to_bytes().unwrap();
    let received = a
        .service
        .events()
        .unwrap()
        .handle_message(&favorite_added_topic(), &payload)
        .await
        .unwrap();
    assert_eq!(received, Received::Rejected);

    let valid = favorite("Foo", "smb://nas/movies/foo.mkv");
    let payload = Envelope::new("device_x", &valid).to_bytes().unwrap();
    let received = b
        .service
        .events()
        .unwrap()
        .handle_message(&favorite_added_topic(), &payload)
        .await
        .unwrap();
    assert_eq!(received, Received::Disabled);
    assert!(a.host.calls().is_empty());
    assert!(b.host.calls().is_empty());
}

#[tokio::test]
async fn test_remove_favorite_stays_local() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let a = device("device_a", &storage, &broker).await;
    a.connect(&broker).await;
    a.host.user_add_favorite(favorite("Foo", "/movies/foo.mkv")).await.unwrap();
    broker.clear_published();

    assert!(a.service.remove_favorite("Foo").await.unwrap());
    assert!(!a.service.remove_favorite("Foo").await.unwrap());
    assert!(broker.published_on(&favorite_added_topic()).is_empty());
}

#[tokio::test]
async fn test_run_loop_syncs_and_stops() {
    let storage = MemoryStorage::new();
    let broker = MemoryBroker::new();
    let a = device_with("device_a", &storage, &broker, |c| c.broker_enabled = false).await;
    a.host.add_item(movie(heat(), "Heat", 1));
    assert!(a.service.events().is_none());

    let service = Arc::new(a.service);
    let (stop, stopped) = watch::channel(false);
    let runner = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.run(stopped).await })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    stop.send(true).unwrap();
    runner.await.unwrap().unwrap();

    assert!(storage.get(SNAPSHOT_NAME).is_some());
    let status = service.status().await.unwrap();
    assert_eq!(status.watched_rows, 1);
    assert!(!status.broker_connected);
}
