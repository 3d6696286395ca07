//! Device identity

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const PREFIX: &str = "cloudsync_";

/// Identifier of one replica, carried in every published envelope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Generates a random `cloudsync_<8 hex>` identifier
    pub fn generate() -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self(format!("{}{}", PREFIX, &uuid[..8]))
    }

    /// Derives an identifier from a human device name
    pub fn from_name(name: &str) -> Option<Self> {
        let cleaned = crate::types::sanitize_topic_level(name.trim()).to_lowercase();
        if cleaned.trim_matches('_').is_empty() {
            return None;
        }
        Some(Self(format!("{}{}", PREFIX, cleaned)))
    }

    /// Wraps an existing identifier
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_prefixed_and_unique() {
        let a = DeviceId::generate();
        let b = DeviceId::generate();
        assert!(a.as_str().starts_with("cloudsync_"));
        assert_eq!(a.as_str().len(), "cloudsync_".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_name() {
        let id = DeviceId::from_name("Living Room").expect("id");
        assert_eq!(id.as_str(), "cloudsync_living_room");
        assert!(DeviceId::from_name("  ").is_none());
    }
}
