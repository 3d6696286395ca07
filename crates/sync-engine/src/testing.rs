// crates/sync-engine/src/testing.rs
//! In-process stand-ins for the host and the broker
//!
//! Several engines can share one [`MemoryBroker`] and act as separate devices
//! in a single test. [`MemoryHost`] keeps its favorites in a real
//! `favourites.xml` under its userdata directory so file sync sees them.

use crate::protocol::topic_matches;
use async_trait::async_trait;
use cloudsync_core::favorites::{add_missing, parse_favourites, remove_by_title, render_favourites};
use cloudsync_core::{
    AppError, ContentId, Delivery, EventBus, FavoriteEntry, HostPaths, MediaHost, MediaKind,
    MessageHandler, ResumePoint, Result, Timestamp, WatchedItem,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A write the engine made to a [`MemoryHost`]
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    SetPlaycount { id: ContentId, play_count: u32 },
    SetResume { file_path: String, position_seconds: f64 },
    AddFavorite { title: String },
    RemoveFavorite { title: String },
    RefreshFavorites,
}

#[derive(Default)]
struct HostState {
    /// Every library item, watched or not
    library: BTreeMap<ContentId, WatchedItem>,
    /// Every playable file by path; position 0 means no resume point
    files: BTreeMap<String, ResumePoint>,
    calls: Vec<HostCall>,
    unavailable: bool,
}

/// `MediaHost` backed by memory and a favourites file on disk
#[derive(Clone)]
pub struct MemoryHost {
    paths: HostPaths,
    state: Arc<Mutex<HostState>>,
}

impl MemoryHost {
    pub fn new(userdata_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: HostPaths::new(userdata_dir),
            state: Arc::new(Mutex::new(HostState::default())),
        }
    }

    pub fn paths(&self) -> &HostPaths {
        &self.paths
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<()> {
        if self.state().unavailable {
            return Err(AppError::HostUnavailable {
                reason: "host is not running".to_string(),
            });
        }
        Ok(())
    }

    /// Makes every call fail as if the host were not running
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Adds a library item as the user's library scan would
    pub fn add_item(&self, item: WatchedItem) {
        self.state().library.insert(item.id.clone(), item);
    }

    /// Adds a playable file; a non-zero position is an existing resume point
    pub fn add_file(&self, point: ResumePoint) {
        self.state().files.insert(point.file_path.clone(), point);
    }

    /// The user finishes playing `id`
    pub fn play(&self, id: &ContentId) {
        if let Some(item) = self.state().library.get_mut(id) {
            item.play_count += 1;
            item.last_played = Some(
                chrono::Utc::now()
                    .format(cloudsync_core::types::LAST_PLAYED_FORMAT)
                    .to_string(),
            );
        }
    }

    /// The user marks `id` with a play count directly
    pub fn set_play_count(&self, id: &ContentId, play_count: u32) {
        if let Some(item) = self.state().library.get_mut(id) {
            item.play_count = play_count;
        }
    }

    /// The user stops playback of `file_path` at `position`
    pub fn stop_at(&self, file_path: &str, position: f64) {
        if let Some(point) = self.state().files.get_mut(file_path) {
            point.position_seconds = position;
        }
    }

    /// The user adds a favorite through the host UI
    pub async fn user_add_favorite(&self, entry: FavoriteEntry) -> Result<()> {
        let mut entries = self.read_favourites().await?;
        add_missing(&mut entries, std::slice::from_ref(&entry));
        self.write_favourites(&entries).await
    }

    pub fn item(&self, id: &ContentId) -> Option<WatchedItem> {
        self.state().library.get(id).cloned()
    }

    pub fn file(&self, file_path: &str) -> Option<ResumePoint> {
        self.state().files.get(file_path).cloned()
    }

    /// Writes the engine made, oldest first
    pub fn calls(&self) -> Vec<HostCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn refresh_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| **c == HostCall::RefreshFavorites)
            .count()
    }

    fn record(&self, call: HostCall) {
        self.state().calls.push(call);
    }

    async fn read_favourites(&self) -> Result<Vec<FavoriteEntry>> {
        let path = self.paths.favourites_file();
        match tokio::fs::read_to_string(&path).await {
            Ok(xml) => parse_favourites(&xml),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(AppError::io_at(&path, e)),
        }
    }

    async fn write_favourites(&self, entries: &[FavoriteEntry]) -> Result<()> {
        let path = self.paths.favourites_file();
        tokio::fs::create_dir_all(&self.paths.userdata_dir)
            .await
            .map_err(|e| AppError::io_at(&self.paths.userdata_dir, e))?;
        tokio::fs::write(&path, render_favourites(entries))
            .await
            .map_err(|e| AppError::io_at(&path, e))
    }
}

#[async_trait]
impl MediaHost for MemoryHost {
    fn name(&self) -> &str {
        "memory"
    }

    async fn probe_paths(&self) -> Result<HostPaths> {
        self.check_available()?;
        Ok(self.paths.clone())
    }

    async fn watched_movies(&self) -> Result<Vec<WatchedItem>> {
        self.check_available()?;
        Ok(self
            .state()
            .library
            .values()
            .filter(|i| i.kind == MediaKind::Movie && i.play_count > 0)
            .cloned()
            .collect())
    }

    async fn watched_episodes(&self) -> Result<Vec<WatchedItem>> {
        self.check_available()?;
        Ok(self
            .state()
            .library
            .values()
            .filter(|i| i.kind == MediaKind::Episode && i.play_count > 0)
            .cloned()
            .collect())
    }

    async fn resume_points(&self) -> Result<Vec<ResumePoint>> {
        self.check_available()?;
        Ok(self
            .state()
            .files
            .values()
            .filter(|p| p.position_seconds > 0.0)
            .cloned()
            .collect())
    }

    async fn set_playcount(&self, item: &WatchedItem) -> Result<()> {
        self.check_available()?;
        {
            let mut state = self.state();
            let Some(target) = state.library.get_mut(&item.id) else {
                return Err(AppError::HostItemNotFound {
                    kind: item.kind.to_string(),
                    identifier: item.id.to_string(),
                });
            };
            target.play_count = item.play_count;
            target.last_played = item.last_played.clone();
        }
        self.record(HostCall::SetPlaycount {
            id: item.id.clone(),
            play_count: item.play_count,
        });
        Ok(())
    }

    async fn set_resume(&self, point: &ResumePoint) -> Result<()> {
        self.check_available()?;
        let file_path = {
            let mut state = self.state();
            let by_id = point.content_id.as_ref().and_then(|id| {
                state
                    .files
                    .values()
                    .find(|f| f.content_id.as_ref() == Some(id))
                    .map(|f| f.file_path.clone())
            });
            let key = by_id.unwrap_or_else(|| point.file_path.clone());
            let Some(target) = state.files.get_mut(&key) else {
                return Err(AppError::HostItemNotFound {
                    kind: point.kind.to_string(),
                    identifier: point.file_path.clone(),
                });
            };
            target.position_seconds = point.position_seconds;
            target.total_seconds = point.total_seconds;
            key
        };
        self.record(HostCall::SetResume {
            file_path,
            position_seconds: point.position_seconds,
        });
        Ok(())
    }

    async fn favorites(&self) -> Result<Vec<FavoriteEntry>> {
        self.check_available()?;
        self.read_favourites().await
    }

    async fn add_favorite(&self, entry: &FavoriteEntry) -> Result<()> {
        self.check_available()?;
        let mut entries = self.read_favourites().await?;
        if add_missing(&mut entries, std::slice::from_ref(entry)) > 0 {
            self.write_favourites(&entries).await?;
        }
        self.record(HostCall::AddFavorite {
            title: entry.title.clone(),
        });
        Ok(())
    }

    async fn remove_favorite(&self, title: &str) -> Result<bool> {
        self.check_available()?;
        let mut entries = self.read_favourites().await?;
        let removed = remove_by_title(&mut entries, title);
        if removed {
            self.write_favourites(&entries).await?;
            self.record(HostCall::RemoveFavorite {
                title: title.to_string(),
            });
        }
        Ok(removed)
    }

    async fn refresh_favorites(&self) -> Result<()> {
        self.check_available()?;
        self.record(HostCall::RefreshFavorites);
        Ok(())
    }
}

/// A message as the broker saw it
#[derive(Debug, Clone)]
pub struct Published {
    pub client_id: String,
    pub topic: String,
    pub payload: Vec<u8>,
    pub delivery: Delivery,
    pub at: Timestamp,
}

impl Published {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

struct Session {
    client_id: String,
    filters: Vec<String>,
    handler: Arc<dyn MessageHandler>,
}

#[derive(Default)]
struct BrokerState {
    sessions: Vec<Session>,
    retained: BTreeMap<String, Vec<u8>>,
    published: Vec<Published>,
}

/// An in-process broker; every connected bus receives what matches its
/// subscriptions, its own publications included
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A disconnected bus for `client_id`
    pub fn bus(&self, client_id: &str) -> MemoryBus {
        MemoryBus {
            client_id: client_id.to_string(),
            broker: self.clone(),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connects `bus`: subscribes the handler, replays retained messages,
    /// then runs its connect hook
    pub async fn connect(&self, bus: &MemoryBus, handler: Arc<dyn MessageHandler>) {
        let filters = handler.subscriptions();
        let retained: Vec<(String, Vec<u8>)> = {
            let mut state = self.state();
            state.sessions.retain(|s| s.client_id != bus.client_id);
            state.sessions.push(Session {
                client_id: bus.client_id.clone(),
                filters: filters.clone(),
                handler: Arc::clone(&handler),
            });
            state
                .retained
                .iter()
                .filter(|(topic, _)| filters.iter().any(|f| topic_matches(f, topic)))
                .map(|(topic, payload)| (topic.clone(), payload.clone()))
                .collect()
        };
        bus.connected.store(true, Ordering::SeqCst);
        for (topic, payload) in retained {
            handler.on_message(&topic, &payload).await;
        }
        handler.on_connected().await;
    }

    pub fn disconnect(&self, bus: &MemoryBus) {
        bus.connected.store(false, Ordering::SeqCst);
        self.state().sessions.retain(|s| s.client_id != bus.client_id);
    }

    /// Delivers a message as if an outside client had published it
    pub async fn inject(&self, topic: &str, payload: &[u8]) {
        self.deliver(topic, payload).await;
    }

    /// Every publication so far, oldest first
    pub fn published(&self) -> Vec<Published> {
        self.state().published.clone()
    }

    pub fn published_on(&self, filter: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| topic_matches(filter, &p.topic))
            .collect()
    }

    pub fn retained(&self, topic: &str) -> Option<Vec<u8>> {
        self.state().retained.get(topic).cloned()
    }

    pub fn clear_published(&self) {
        self.state().published.clear();
    }

    async fn deliver(&self, topic: &str, payload: &[u8]) {
        let handlers: Vec<Arc<dyn MessageHandler>> = self
            .state()
            .sessions
            .iter()
            .filter(|s| s.filters.iter().any(|f| topic_matches(f, topic)))
            .map(|s| Arc::clone(&s.handler))
            .collect();
        for handler in handlers {
            handler.on_message(topic, payload).await;
        }
    }
}

/// One client's view of a [`MemoryBroker`]
#[derive(Clone)]
pub struct MemoryBus {
    client_id: String,
    broker: MemoryBroker,
    connected: Arc<AtomicBool>,
}

impl MemoryBus {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>, delivery: Delivery) -> Result<()> {
        if !self.is_connected() {
            return Err(AppError::ConnectionLost {
                message: format!("{} is not connected", self.client_id),
            });
        }
        {
            let mut state = self.broker.state();
            if delivery.retain {
                if payload.is_empty() {
                    state.retained.remove(topic);
                } else {
                    state.retained.insert(topic.to_string(), payload.clone());
                }
            }
            state.published.push(Published {
                client_id: self.client_id.clone(),
                topic: topic.to_string(),
                payload: payload.clone(),
                delivery,
                at: Timestamp::now(),
            });
        }
        self.broker.deliver(topic, &payload).await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
