// crates/sync-engine/src/types.rs
//! Sync cycle reports and peer state

use crate::protocol::DeviceStatus;
use cloudsync_core::Timestamp;
use std::fmt;

/// Stage of the snapshot cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    Downloading,
    Merging,
    Pulling,
    Pushing,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Downloading => "downloading",
            Self::Merging => "merging",
            Self::Pulling => "pulling",
            Self::Pushing => "pushing",
        };
        f.write_str(name)
    }
}

/// What one snapshot cycle changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// A remote snapshot was downloaded and readable
    pub remote_found: bool,
    pub merged_watched: usize,
    pub merged_resume: usize,
    pub files_uploaded: usize,
    pub files_downloaded: usize,
    pub pulled_watched: usize,
    pub pulled_resume: usize,
    pub pushed_watched: usize,
    pub pushed_resume: usize,
    pub snapshot_uploaded: bool,
    /// Step failures that were logged and skipped
    pub errors: Vec<String>,
}

impl SyncReport {
    /// True when the local store changed during merge or pull
    pub fn store_changed(&self) -> bool {
        self.merged_watched + self.merged_resume + self.pulled_watched + self.pulled_resume > 0
    }

    pub fn total_changes(&self) -> usize {
        self.merged_watched
            + self.merged_resume
            + self.files_uploaded
            + self.files_downloaded
            + self.pulled_watched
            + self.pulled_resume
            + self.pushed_watched
            + self.pushed_resume
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "merged {}/{}, pulled {}/{}, pushed {}/{} (watched/resume), files up {} down {}",
            self.merged_watched,
            self.merged_resume,
            self.pulled_watched,
            self.pulled_resume,
            self.pushed_watched,
            self.pushed_resume,
            self.files_uploaded,
            self.files_downloaded
        )?;
        if self.snapshot_uploaded {
            f.write_str(", snapshot uploaded")?;
        }
        if !self.errors.is_empty() {
            write!(f, ", {} errors", self.errors.len())?;
        }
        Ok(())
    }
}

/// Result of a snapshot trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another cycle was already running
    Skipped,
    Completed(SyncReport),
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Skipped => None,
            Self::Completed(report) => Some(report),
        }
    }
}

/// Another device seen through its status messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub device_id: String,
    pub name: String,
    pub status: DeviceStatus,
    /// When the peer published the status
    pub last_seen: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let mut report = SyncReport::default();
        assert!(!report.store_changed());
        assert_eq!(report.total_changes(), 0);

        report.files_downloaded = 1;
        assert!(!report.store_changed());

        report.merged_watched = 2;
        report.pushed_watched = 2;
        assert!(report.store_changed());
        assert_eq!(report.total_changes(), 5);
    }

    #[test]
    fn test_report_display() {
        let report = SyncReport {
            merged_watched: 1,
            snapshot_uploaded: true,
            errors: vec!["upload failed".to_string()],
            ..Default::default()
        };
        let text = report.to_string();
        assert!(text.contains("merged 1/0"));
        assert!(text.contains("snapshot uploaded"));
        assert!(text.contains("1 errors"));
    }

    #[test]
    fn test_outcome_report() {
        assert!(SyncOutcome::Skipped.report().is_none());
        let outcome = SyncOutcome::Completed(SyncReport::default());
        assert!(outcome.report().unwrap().is_clean());
        assert_eq!(SyncPhase::default(), SyncPhase::Idle);
        assert_eq!(SyncPhase::Pulling.to_string(), "pulling");
    }
}
