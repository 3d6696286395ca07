//! Device identity section

use crate::validation::{ConfigSection, ValidationError};
use cloudsync_core::types::sanitize_topic_level;
use cloudsync_core::DeviceId;
use serde::{Deserialize, Serialize};

/// Identity of this replica
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct DeviceConfig {
    /// Identifier carried in every published event; generated on first run
    pub device_id: String,

    /// Human-readable name, used to derive the identifier when set
    pub name: String,
}

impl DeviceConfig {
    /// Returns true once an identifier has been assigned
    pub fn has_id(&self) -> bool {
        !self.device_id.trim().is_empty()
    }

    /// Assigns an identifier if none is set; returns true if one was assigned
    pub fn ensure_id(&mut self) -> bool {
        if self.has_id() {
            return false;
        }
        let id = DeviceId::from_name(&self.name).unwrap_or_else(DeviceId::generate);
        self.device_id = id.to_string();
        true
    }

    /// The configured identifier, if any
    pub fn id(&self) -> Option<DeviceId> {
        if self.has_id() {
            Some(DeviceId::from_string(self.device_id.trim()))
        } else {
            None
        }
    }
}

impl ConfigSection for DeviceConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        // The id becomes one topic level, so it must survive sanitizing unchanged
        if self.has_id() && sanitize_topic_level(&self.device_id) != self.device_id {
            return Err(vec![ValidationError::with_value(
                "device.device_id",
                "may only contain letters, digits, '.', '_' and '-'",
                &self.device_id,
            )]);
        }
        Ok(())
    }

    fn merge(&mut self, other: Self) {
        if other.has_id() {
            self.device_id = other.device_id;
        }
        if !other.name.is_empty() {
            self.name = other.name;
        }
    }

    fn section_name(&self) -> &'static str {
        "device"
    }
}
