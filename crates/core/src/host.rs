//! The host media application as seen by the sync core

use crate::error::Result;
use crate::favorites::FAVOURITES_FILE;
use crate::types::{FavoriteEntry, ResumePoint, WatchedItem};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Host directories, resolved once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    /// The host profile's userdata directory (favorites, sources, ...)
    pub userdata_dir: PathBuf,
}

impl HostPaths {
    /// Creates paths rooted at a userdata directory
    pub fn new(userdata_dir: impl Into<PathBuf>) -> Self {
        Self {
            userdata_dir: userdata_dir.into(),
        }
    }

    /// Location of the favorites file
    pub fn favourites_file(&self) -> PathBuf {
        self.userdata_dir.join(FAVOURITES_FILE)
    }

    /// Location of a configuration file in userdata
    pub fn userdata_file(&self, name: impl AsRef<Path>) -> PathBuf {
        self.userdata_dir.join(name)
    }
}

/// Operations the sync core needs from the host application
///
/// Item lookups by content identity scan all items of that kind; hosts are
/// not assumed to index external ids.
#[async_trait]
pub trait MediaHost: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Resolves host directories; called once at startup
    async fn probe_paths(&self) -> Result<HostPaths>;

    /// Movies with a play count above zero
    async fn watched_movies(&self) -> Result<Vec<WatchedItem>>;

    /// Episodes with a play count above zero
    async fn watched_episodes(&self) -> Result<Vec<WatchedItem>>;

    /// Files with a positive resume position
    async fn resume_points(&self) -> Result<Vec<ResumePoint>>;

    /// Sets play count and last played time of the item with `item.id`
    ///
    /// Returns `AppError::HostItemNotFound` when no item has that identity.
    async fn set_playcount(&self, item: &WatchedItem) -> Result<()>;

    /// Sets the resume position of the item behind `point`
    async fn set_resume(&self, point: &ResumePoint) -> Result<()>;

    /// The current favorites list
    async fn favorites(&self) -> Result<Vec<FavoriteEntry>>;

    /// Adds one favorite
    async fn add_favorite(&self, entry: &FavoriteEntry) -> Result<()>;

    /// Removes a favorite by title by rewriting the favorites file
    ///
    /// Returns false when no entry had that title.
    async fn remove_favorite(&self, title: &str) -> Result<bool>;

    /// Asks the host to reload its favorites view; best effort
    async fn refresh_favorites(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_paths() {
        let paths = HostPaths::new("/home/kodi/.kodi/userdata");
        assert_eq!(
            paths.favourites_file(),
            PathBuf::from("/home/kodi/.kodi/userdata/favourites.xml")
        );
        assert_eq!(
            paths.userdata_file("sources.xml"),
            PathBuf::from("/home/kodi/.kodi/userdata/sources.xml")
        );
    }
}
