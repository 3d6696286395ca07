//! What to synchronize and how often

use crate::validation::{ConfigSection, ValidationError, Validator};
use cloudsync_core::ConflictStrategy;
use serde::{Deserialize, Serialize};

/// Synchronization behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncSettings {
    /// Synchronize watched flags and play counts
    pub watched: bool,

    /// Synchronize resume positions
    pub resume: bool,

    /// Synchronize the favorites list (add-only)
    pub favorites: bool,

    /// Mirror the allow-listed userdata configuration files
    pub userdata: bool,

    /// How conflicting values are settled
    pub conflict_strategy: ConflictStrategy,

    /// Minutes between snapshot cycles
    pub interval_minutes: u64,

    /// Seconds between favorites polls
    pub favorites_poll_secs: u64,

    /// Seconds between host watched/resume polls
    pub host_poll_secs: u64,

    /// Hours after which a tracked file is re-synced even if unchanged
    pub force_resync_hours: u64,

    /// Seconds a received favorite is shielded from re-publishing
    pub anti_loop_grace_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            watched: true,
            resume: true,
            favorites: true,
            userdata: false,
            conflict_strategy: ConflictStrategy::Newer,
            interval_minutes: 5,
            favorites_poll_secs: 5,
            host_poll_secs: 30,
            force_resync_hours: 24,
            anti_loop_grace_secs: 10,
        }
    }
}

impl ConfigSection for SyncSettings {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let results = vec![
            Validator::in_range(self.interval_minutes, 1, 1440, "sync.interval_minutes"),
            Validator::in_range(self.favorites_poll_secs, 1, 3600, "sync.favorites_poll_secs"),
            Validator::in_range(self.host_poll_secs, 5, 3600, "sync.host_poll_secs"),
            Validator::in_range(self.force_resync_hours, 1, 720, "sync.force_resync_hours"),
            Validator::in_range(self.anti_loop_grace_secs, 1, 300, "sync.anti_loop_grace_secs"),
        ];

        Validator::collect_errors(results)
    }

    fn merge(&mut self, other: Self) {
        *self = other;
    }

    fn section_name(&self) -> &'static str {
        "sync"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SyncSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.conflict_strategy, ConflictStrategy::Newer);
        assert_eq!(settings.interval_minutes, 5);
        assert_eq!(settings.anti_loop_grace_secs, 10);
        assert_eq!(settings.force_resync_hours, 24);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let settings = SyncSettings {
            interval_minutes: 0,
            ..SyncSettings::default()
        };
        let errors = settings.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "sync.interval_minutes");
    }
}
