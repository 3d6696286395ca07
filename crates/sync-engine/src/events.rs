// crates/sync-engine/src/events.rs
//! Event sync: per-item changes over the publish/subscribe broker
//!
//! Incoming messages pass a self-echo filter and a staleness filter before
//! they reach the host. Favorites received from peers are remembered for a
//! short grace window so the local favorites watcher does not echo them
//! back as new additions.

use crate::config::SyncConfig;
use crate::conflict::Winner;
use crate::context::{localize, resume_label, SyncContext};
use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    self, favorite_added_topic, parse_topic, resume_topic, status_payload, status_topic,
    watched_topic, DeviceStatus, Envelope, EnvelopeHeader, StatusContent, Topic, TopicClass,
};
use crate::types::PeerInfo;
use async_trait::async_trait;
use cloudsync_core::{
    AppError, DeviceId, EventBus, FavoriteEntry, MessageHandler, ResumePoint, Timestamp,
    WatchedItem,
};
use cloudsync_database::queries::{
    get_watched, mark_changed, record_host_resume, record_host_watched, upsert_resume, upsert_watched,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// What became of one received message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// Topic outside the protocol
    Unknown,
    /// Published by this device
    SelfEcho,
    /// Older than its class expiry
    Stale,
    /// Category switched off in the configuration
    Disabled,
    /// Favorite action not usable on this device
    Rejected,
    /// Local state already wins or matches
    NoChange,
    /// Written to the local store; the host does not know the item
    StoredOnly,
    /// Written to the host (and the store for watched/resume)
    Applied,
    /// Peer status updated
    Peer,
}

/// Applies remote events and publishes local ones
pub struct EventSyncManager {
    device_id: DeviceId,
    device_name: String,
    watched: bool,
    resume: bool,
    favorites: bool,
    anti_loop_grace: Duration,
    ctx: SyncContext,
    bus: Arc<dyn EventBus>,
    /// Favorite titles received from peers, with their arrival time
    received_favorites: Mutex<HashMap<String, Instant>>,
    peers: Mutex<HashMap<String, PeerInfo>>,
}

impl EventSyncManager {
    pub fn new(config: &SyncConfig, ctx: SyncContext, bus: Arc<dyn EventBus>) -> Self {
        Self {
            device_id: config.device_id.clone(),
            device_name: config.device_name.clone(),
            watched: config.watched,
            resume: config.resume,
            favorites: config.favorites,
            anti_loop_grace: config.anti_loop_grace,
            ctx,
            bus,
            received_favorites: Mutex::new(HashMap::new()),
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn is_connected(&self) -> bool {
        self.bus.is_connected()
    }

    /// Runs one message through the receive pipeline
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> SyncResult<Received> {
        let Some(topic) = parse_topic(topic) else {
            return Ok(Received::Unknown);
        };
        let header = EnvelopeHeader::from_bytes(payload)?;
        if header.device_id == self.device_id.as_str() {
            return Ok(Received::SelfEcho);
        }
        // a last-will is stamped at connect time, so offline never goes stale
        if header.is_stale(topic.class(), Timestamp::now()) && !is_offline_status(&topic, payload) {
            log::debug!("Dropping stale {:?} event from {}", topic.class(), header.device_id);
            return Ok(Received::Stale);
        }

        match topic {
            Topic::Watched(_) if !self.watched => Ok(Received::Disabled),
            Topic::Resume(_) if !self.resume => Ok(Received::Disabled),
            Topic::FavoriteAdded if !self.favorites => Ok(Received::Disabled),
            Topic::Watched(_) => {
                let envelope = Envelope::<WatchedItem>::from_bytes(payload)?;
                self.apply_watched(envelope).await
            }
            Topic::Resume(_) => {
                let envelope = Envelope::<ResumePoint>::from_bytes(payload)?;
                self.apply_resume(envelope).await
            }
            Topic::FavoriteAdded => {
                let envelope = Envelope::<FavoriteEntry>::from_bytes(payload)?;
                self.apply_favorite(envelope.content).await
            }
            Topic::Status { .. } => {
                let envelope = Envelope::<StatusContent>::from_bytes(payload)?;
                self.track_peer(envelope)?;
                Ok(Received::Peer)
            }
        }
    }

    async fn apply_watched(&self, envelope: Envelope<WatchedItem>) -> SyncResult<Received> {
        let sent_at = envelope.sent_at();
        let mut remote = envelope.content;
        if remote.last_change_at.is_unset() {
            remote.last_change_at = sent_at;
        }

        let local = get_watched(&self.ctx.pool, &remote.id).await?;
        if self.ctx.resolver.resolve_watched(local.as_ref(), Some(&remote)) == Winner::Local {
            return Ok(Received::NoChange);
        }
        upsert_watched(&self.ctx.pool, &remote).await?;
        mark_changed(&self.ctx.pool).await?;

        let _writing = self.ctx.writes.begin();
        match self.ctx.host.set_playcount(&remote).await {
            Ok(()) => {
                record_host_watched(&self.ctx.pool, &remote).await?;
                log::info!(
                    "Applied watched state of {} from {}: play count {}",
                    remote.id,
                    envelope.device_id,
                    remote.play_count
                );
                Ok(Received::Applied)
            }
            Err(AppError::HostItemNotFound { .. }) => {
                log::debug!("{} is not in the local library", remote.id);
                Ok(Received::StoredOnly)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_resume(&self, envelope: Envelope<ResumePoint>) -> SyncResult<Received> {
        let sent_at = envelope.sent_at();
        let mut remote = envelope.content;
        if !remote.is_meaningful() {
            return Ok(Received::NoChange);
        }
        if remote.last_change_at.is_unset() {
            remote.last_change_at = sent_at;
        }

        let local = self.ctx.local_resume_for(&remote).await?;
        if self.ctx.resolver.resolve_resume(local.as_ref(), Some(&remote)) == Winner::Local {
            return Ok(Received::NoChange);
        }
        let point = localize(&remote, local.as_ref());
        upsert_resume(&self.ctx.pool, &point).await?;
        mark_changed(&self.ctx.pool).await?;

        let _writing = self.ctx.writes.begin();
        match self.ctx.host.set_resume(&point).await {
            Ok(()) => {
                record_host_resume(&self.ctx.pool, &point).await?;
                log::info!(
                    "Applied resume point of {} from {}: {:.0}s",
                    resume_label(&point),
                    envelope.device_id,
                    point.position_seconds
                );
                Ok(Received::Applied)
            }
            Err(AppError::HostItemNotFound { .. }) => {
                log::debug!("{} is not in the local library", resume_label(&point));
                Ok(Received::StoredOnly)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_favorite(&self, entry: FavoriteEntry) -> SyncResult<Received> {
        if entry.title.trim().is_empty() || !entry.action.is_portable() {
            log::warn!(
                "Ignoring favorite {:?}: {}",
                entry.title,
                AppError::InvalidFavoriteAction {
                    action: entry.action.to_command(),
                }
            );
            return Ok(Received::Rejected);
        }
        self.remember_received(&entry.title);

        let favourites_file = self.ctx.paths.favourites_file();
        let _lock = self.ctx.locks.lock(&favourites_file).await;
        let _writing = self.ctx.writes.begin();

        let existing = self.ctx.host.favorites().await?;
        if existing.iter().any(|e| e.title == entry.title) {
            return Ok(Received::NoChange);
        }
        self.ctx.host.add_favorite(&entry).await?;
        log::info!("Added favorite {:?} from a peer", entry.title);
        Ok(Received::Applied)
    }

    fn track_peer(&self, envelope: Envelope<StatusContent>) -> SyncResult<()> {
        let mut peers = self
            .peers
            .lock()
            .map_err(|_| SyncError::Custom("Lock poisoned".to_string()))?;
        let previous = peers.insert(
            envelope.device_id.clone(),
            PeerInfo {
                device_id: envelope.device_id.clone(),
                name: envelope.content.name.clone(),
                status: envelope.content.status,
                last_seen: Timestamp::from_millis(envelope.timestamp),
            },
        );
        if previous.map(|p| p.status) != Some(envelope.content.status) {
            log::info!("Device {} is {:?}", envelope.device_id, envelope.content.status);
        }
        Ok(())
    }

    /// Devices seen through their status messages
    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .peers
            .lock()
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default();
        peers.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        peers
    }

    fn remember_received(&self, title: &str) {
        if let Ok(mut received) = self.received_favorites.lock() {
            received.insert(title.to_string(), Instant::now());
        }
    }

    /// True while `title` is inside the grace window of a received favorite
    ///
    /// Expired entries are purged on the way.
    pub fn recently_received(&self, title: &str) -> bool {
        let Ok(mut received) = self.received_favorites.lock() else {
            return false;
        };
        let grace = self.anti_loop_grace;
        received.retain(|_, at| at.elapsed() < grace);
        received.contains_key(title)
    }

    /// Publishes a watched state change
    pub async fn publish_watched(&self, item: &WatchedItem) -> bool {
        self.publish(&watched_topic(&item.id), TopicClass::Watched, item)
            .await
    }

    /// Publishes a new resume position
    pub async fn publish_resume(&self, point: &ResumePoint) -> bool {
        if !point.is_meaningful() {
            return false;
        }
        self.publish(&resume_topic(point), TopicClass::Resume, point)
            .await
    }

    /// Publishes a locally added favorite
    ///
    /// Titles received from a peer within the grace window are not
    /// published back.
    pub async fn publish_favorite(&self, entry: &FavoriteEntry) -> bool {
        if self.recently_received(&entry.title) {
            log::debug!("Not re-publishing favorite {:?} received from a peer", entry.title);
            return false;
        }
        self.publish(&favorite_added_topic(), TopicClass::Favorites, entry)
            .await
    }

    /// Republishes every local favorite as an add event
    pub async fn publish_all_favorites(&self) -> SyncResult<usize> {
        let favorites = self.ctx.host.favorites().await?;
        let mut published = 0;
        for entry in &favorites {
            if self
                .publish(&favorite_added_topic(), TopicClass::Favorites, entry)
                .await
            {
                published += 1;
            }
        }
        log::info!("Published {} of {} favorites", published, favorites.len());
        Ok(published)
    }

    /// Publishes this device's retained status
    pub async fn publish_status(&self, status: DeviceStatus) -> bool {
        let payload = match status_payload(self.device_id.as_str(), &self.device_name, status) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("Cannot encode status: {}", e);
                return false;
            }
        };
        self.send(
            &status_topic(self.device_id.as_str()),
            TopicClass::Status,
            payload,
        )
        .await
    }

    async fn publish<T: Serialize>(&self, topic: &str, class: TopicClass, content: &T) -> bool {
        let payload = match Envelope::new(self.device_id.as_str(), content).to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("Cannot encode event for {}: {}", topic, e);
                return false;
            }
        };
        self.send(topic, class, payload).await
    }

    async fn send(&self, topic: &str, class: TopicClass, payload: Vec<u8>) -> bool {
        match self.bus.publish(topic, payload, class.delivery()).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Dropping event for {}: {}", topic, e);
                false
            }
        }
    }
}

fn is_offline_status(topic: &Topic, payload: &[u8]) -> bool {
    matches!(topic, Topic::Status { .. })
        && Envelope::<StatusContent>::from_bytes(payload)
            .is_ok_and(|e| e.content.status == DeviceStatus::Offline)
}

#[async_trait]
impl MessageHandler for EventSyncManager {
    fn subscriptions(&self) -> Vec<String> {
        protocol::subscriptions()
    }

    async fn on_connected(&self) {
        self.publish_status(DeviceStatus::Online).await;
    }

    async fn on_message(&self, topic: &str, payload: &[u8]) {
        match self.handle_message(topic, payload).await {
            Ok(received) => log::debug!("{}: {:?}", topic, received),
            Err(e) => log::warn!("Failed to handle message on {}: {}", topic, e),
        }
    }
}
