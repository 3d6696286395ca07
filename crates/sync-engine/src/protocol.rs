// crates/sync-engine/src/protocol.rs
//! Event protocol: topics, envelopes and delivery classes

use crate::error::{SyncError, SyncResult};
use cloudsync_core::types::sanitize_topic_level;
use cloudsync_core::{ContentId, Delivery, QosLevel, ResumePoint, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// First level of every topic
pub const TOPIC_ROOT: &str = "cloudsync";

const STATUS_EXPIRY: Duration = Duration::from_secs(5 * 60);
const STATE_EXPIRY: Duration = Duration::from_secs(7 * 24 * 3600);

/// Message classes, each with its own delivery rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicClass {
    Status,
    Watched,
    Resume,
    Favorites,
}

impl TopicClass {
    /// How messages of this class are published
    pub fn delivery(&self) -> Delivery {
        Delivery {
            qos: QosLevel::AtLeastOnce,
            retain: matches!(self, Self::Status),
            expiry: self.expiry(),
        }
    }

    /// Messages older than this are dropped on receipt
    pub fn expiry(&self) -> Option<Duration> {
        match self {
            Self::Status => Some(STATUS_EXPIRY),
            Self::Watched | Self::Resume => Some(STATE_EXPIRY),
            Self::Favorites => None,
        }
    }
}

/// A topic the engine understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    Watched(String),
    Resume(String),
    FavoriteAdded,
    Status { device: String },
}

impl Topic {
    pub fn class(&self) -> TopicClass {
        match self {
            Self::Watched(_) => TopicClass::Watched,
            Self::Resume(_) => TopicClass::Resume,
            Self::FavoriteAdded => TopicClass::Favorites,
            Self::Status { .. } => TopicClass::Status,
        }
    }
}

/// `cloudsync/watched/{id}`
pub fn watched_topic(id: &ContentId) -> String {
    format!("{}/watched/{}", TOPIC_ROOT, id.topic_id())
}

/// `cloudsync/resume/{id}`
///
/// Points without a content identity are addressed by a hash of their path.
pub fn resume_topic(point: &ResumePoint) -> String {
    let id = match &point.content_id {
        Some(id) => id.topic_id(),
        None => path_topic_id(&point.file_path),
    };
    format!("{}/resume/{}", TOPIC_ROOT, id)
}

/// `cloudsync/favorites/add`
pub fn favorite_added_topic() -> String {
    format!("{}/favorites/add", TOPIC_ROOT)
}

/// `cloudsync/devices/{device}/status`
pub fn status_topic(device_id: &str) -> String {
    format!("{}/devices/{}/status", TOPIC_ROOT, sanitize_topic_level(device_id))
}

/// First 16 hex characters of the SHA-256 of a file path
pub fn path_topic_id(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(16);
    id
}

/// Filters every device subscribes to
pub fn subscriptions() -> Vec<String> {
    vec![
        format!("{}/watched/+", TOPIC_ROOT),
        format!("{}/resume/+", TOPIC_ROOT),
        format!("{}/favorites/+", TOPIC_ROOT),
        format!("{}/devices/+/status", TOPIC_ROOT),
    ]
}

/// Classifies a received topic; unknown topics yield `None`
pub fn parse_topic(topic: &str) -> Option<Topic> {
    let levels: Vec<&str> = topic.split('/').collect();
    match levels.as_slice() {
        [root, "watched", id] if *root == TOPIC_ROOT && !id.is_empty() => {
            Some(Topic::Watched((*id).to_string()))
        }
        [root, "resume", id] if *root == TOPIC_ROOT && !id.is_empty() => {
            Some(Topic::Resume((*id).to_string()))
        }
        [root, "favorites", "add"] if *root == TOPIC_ROOT => Some(Topic::FavoriteAdded),
        [root, "devices", device, "status"] if *root == TOPIC_ROOT && !device.is_empty() => {
            Some(Topic::Status {
                device: (*device).to_string(),
            })
        }
        _ => None,
    }
}

/// Matches a topic against a subscription filter with `+` and `#` wildcards
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Wire wrapper around every event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Publishing device
    pub device_id: String,
    /// Publish time in epoch milliseconds
    pub timestamp: i64,
    pub content: T,
}

impl<T> Envelope<T> {
    /// Wraps `content` stamped with the current time
    pub fn new(device_id: impl Into<String>, content: T) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp: Timestamp::now().as_millis(),
            content,
        }
    }

    pub fn sent_at(&self) -> Timestamp {
        Timestamp::from_millis(self.timestamp)
    }

    /// True when the envelope is older than its class allows at `now`
    pub fn is_stale(&self, class: TopicClass, now: Timestamp) -> bool {
        expired(class, self.sent_at(), now)
    }
}

impl<T: Serialize> Envelope<T> {
    pub fn to_bytes(&self) -> SyncResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    pub fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| SyncError::InvalidData(format!("malformed envelope: {}", e)))
    }
}

/// Only the sender of an envelope, for filtering before the content is parsed
#[derive(Debug, Deserialize)]
pub struct EnvelopeHeader {
    pub device_id: String,
    pub timestamp: i64,
}

impl EnvelopeHeader {
    pub fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| SyncError::InvalidData(format!("malformed envelope: {}", e)))
    }

    pub fn is_stale(&self, class: TopicClass, now: Timestamp) -> bool {
        expired(class, Timestamp::from_millis(self.timestamp), now)
    }
}

fn expired(class: TopicClass, sent: Timestamp, now: Timestamp) -> bool {
    match class.expiry() {
        Some(expiry) => now.millis_since(sent) > expiry.as_millis() as u64,
        None => false,
    }
}

/// Device presence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

/// Content of a device status message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusContent {
    pub status: DeviceStatus,
    /// Human-readable device name, if configured
    #[serde(default)]
    pub name: String,
}

/// Serialized status envelope, also used as the broker last-will
pub fn status_payload(device_id: &str, name: &str, status: DeviceStatus) -> SyncResult<Vec<u8>> {
    Envelope::new(
        device_id,
        StatusContent {
            status,
            name: name.to_string(),
        },
    )
    .to_bytes()
}
