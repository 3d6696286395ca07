//! Watched state of movies and episodes

use crate::types::{ContentId, MediaKind, Timestamp};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Text format the host uses for last-played times
pub const LAST_PLAYED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Playback state of one movie or episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedItem {
    pub id: ContentId,
    pub kind: MediaKind,
    pub title: String,
    pub play_count: u32,
    /// Host-formatted last played time, see [`LAST_PLAYED_FORMAT`]
    pub last_played: Option<String>,
    /// Local logical change stamp; unset for values read straight from the host
    pub last_change_at: Timestamp,
}

impl WatchedItem {
    /// Creates an item with no last-played time and no change stamp
    pub fn new(id: ContentId, kind: MediaKind, title: impl Into<String>, play_count: u32) -> Self {
        Self {
            id,
            kind,
            title: title.into(),
            play_count,
            last_played: None,
            last_change_at: Timestamp::default(),
        }
    }

    /// Sets the host-formatted last played time
    pub fn with_last_played(mut self, last_played: impl Into<String>) -> Self {
        let value = last_played.into();
        self.last_played = if value.trim().is_empty() { None } else { Some(value) };
        self
    }

    /// Sets the change stamp
    pub fn with_last_change(mut self, at: Timestamp) -> Self {
        self.last_change_at = at;
        self
    }

    /// True when the synced values match, ignoring title and change stamp
    pub fn same_state(&self, other: &WatchedItem) -> bool {
        self.play_count == other.play_count && self.last_played == other.last_played
    }

    /// Parses the last played time, if present and well-formed
    pub fn last_played_at(&self) -> Option<Timestamp> {
        let raw = self.last_played.as_deref()?;
        NaiveDateTime::parse_from_str(raw.trim(), LAST_PLAYED_FORMAT)
            .ok()
            .map(|dt| Timestamp::from_millis(dt.and_utc().timestamp_millis()))
    }

    /// Returns true if the item has been played at least once
    pub fn is_watched(&self) -> bool {
        self.play_count > 0
    }
}
