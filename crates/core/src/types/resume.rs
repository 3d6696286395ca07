//! In-progress playback positions

use crate::types::{ContentId, MediaKind, Timestamp};
use serde::{Deserialize, Serialize};

/// Positions closer than this are the same position
pub const POSITION_TOLERANCE_SECS: f64 = 0.5;

/// Playback position for one file, keyed by its path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub file_path: String,
    pub content_id: Option<ContentId>,
    pub kind: MediaKind,
    pub title: String,
    pub position_seconds: f64,
    pub total_seconds: f64,
    pub last_change_at: Timestamp,
}

impl ResumePoint {
    /// Creates a resume point without identity or change stamp
    pub fn new(
        file_path: impl Into<String>,
        kind: MediaKind,
        position_seconds: f64,
        total_seconds: f64,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            content_id: None,
            kind,
            title: String::new(),
            position_seconds,
            total_seconds,
            last_change_at: Timestamp::default(),
        }
    }

    /// Attaches a content identity
    pub fn with_content_id(mut self, id: ContentId) -> Self {
        self.content_id = Some(id);
        self
    }

    /// Sets the display title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Sets the change stamp
    pub fn with_last_change(mut self, at: Timestamp) -> Self {
        self.last_change_at = at;
        self
    }

    /// A resume point only means something while the position is positive
    pub fn is_meaningful(&self) -> bool {
        self.position_seconds > 0.0
    }

    /// True when both positions are within tolerance
    pub fn same_state(&self, other: &ResumePoint) -> bool {
        (self.position_seconds - other.position_seconds).abs() < POSITION_TOLERANCE_SECS
            && (self.total_seconds - other.total_seconds).abs() < POSITION_TOLERANCE_SECS
    }

    /// True when this point is strictly further along than `other`
    pub fn is_ahead_of(&self, other: &ResumePoint) -> bool {
        self.position_seconds - other.position_seconds >= POSITION_TOLERANCE_SECS
    }

    /// Fraction watched in `0.0..=1.0`, zero when the total is unknown
    pub fn progress(&self) -> f64 {
        if self.total_seconds <= 0.0 {
            return 0.0;
        }
        (self.position_seconds / self.total_seconds).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meaningful_only_when_positive() {
        assert!(ResumePoint::new("/m/a.mkv", MediaKind::Movie, 12.0, 100.0).is_meaningful());
        assert!(!ResumePoint::new("/m/a.mkv", MediaKind::Movie, 0.0, 100.0).is_meaningful());
    }

    #[test]
    fn test_position_comparison_uses_tolerance() {
        let a = ResumePoint::new("/m/a.mkv", MediaKind::Movie, 300.0, 5400.0);
        let b = ResumePoint::new("/m/a.mkv", MediaKind::Movie, 300.2, 5400.0);
        let c = ResumePoint::new("/m/a.mkv", MediaKind::Movie, 120.0, 5400.0);
        assert!(a.same_state(&b));
        assert!(!b.is_ahead_of(&a));
        assert!(a.is_ahead_of(&c));
        assert!(!c.is_ahead_of(&a));
    }

    #[test]
    fn test_progress() {
        let p = ResumePoint::new("/m/a.mkv", MediaKind::Movie, 50.0, 200.0);
        assert_eq!(p.progress(), 0.25);
        assert_eq!(ResumePoint::new("x", MediaKind::Movie, 5.0, 0.0).progress(), 0.0);
    }
}
