//! Cloud storage in a local directory
//!
//! Works with any folder another tool keeps in sync (a network share, a
//! desktop sync client's directory, a USB stick moved between devices).

use async_trait::async_trait;
use cloudsync_core::transport::backup_name;
use cloudsync_core::{AppError, CloudStorage, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// `CloudStorage` rooted at a directory
#[derive(Debug, Clone)]
pub struct FolderStorage {
    root: PathBuf,
}

impl FolderStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory holding the remote files
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a remote name (`userdata/sources.xml`) to a path under the root
    ///
    /// Returns `None` for names that would escape the root.
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let mut path = self.root.clone();
        for segment in name.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return None;
            }
            path.push(segment);
        }
        Some(path)
    }

    fn write_with_backup(root: &Path, target: &Path, backup: &Path, bytes: &[u8]) -> io::Result<()> {
        let dir = target.parent().unwrap_or(root);
        fs::create_dir_all(dir)?;

        if target.exists() {
            match fs::remove_file(backup) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            fs::rename(target, backup)?;
        }

        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(target).map_err(|e| e.error)?;
        Ok(())
    }

    fn read_with_fallback(target: &Path, backup: &Path) -> io::Result<Option<Vec<u8>>> {
        match fs::read(target) {
            Ok(bytes) => return Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        match fs::read(backup) {
            Ok(bytes) => {
                log::info!("{} missing, restoring from {}", target.display(), backup.display());
                if let Err(e) = fs::copy(backup, target) {
                    log::warn!("Could not restore {}: {}", target.display(), e);
                }
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl CloudStorage for FolderStorage {
    fn provider(&self) -> &str {
        "folder"
    }

    async fn upload(&self, name: &str, bytes: &[u8]) -> bool {
        let (Some(target), Some(backup)) = (self.resolve(name), self.resolve(&backup_name(name))) else {
            log::error!("Refusing to upload to invalid name {:?}", name);
            return false;
        };
        let root = self.root.clone();
        let bytes = bytes.to_vec();
        let result = tokio::task::spawn_blocking(move || {
            Self::write_with_backup(&root, &target, &backup, &bytes)
        })
        .await;

        match result {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                log::error!("Upload of {} to {} failed: {}", name, self.root.display(), e);
                false
            }
            Err(e) => {
                log::error!("Upload task for {} failed: {}", name, e);
                false
            }
        }
    }

    async fn try_download(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let (Some(target), Some(backup)) = (self.resolve(name), self.resolve(&backup_name(name))) else {
            log::error!("Refusing to download invalid name {:?}", name);
            return Ok(None);
        };
        let result =
            tokio::task::spawn_blocking(move || Self::read_with_fallback(&target, &backup)).await;

        let reason = match result {
            Ok(Ok(bytes)) => return Ok(bytes),
            Ok(Err(e)) => format!("reading {} under {}: {}", name, self.root.display(), e),
            Err(e) => format!("download task for {}: {}", name, e),
        };
        Err(AppError::StorageUnavailable {
            provider: self.provider().to_string(),
            reason,
        })
    }

    async fn exists(&self, name: &str) -> bool {
        match self.resolve(name) {
            Some(path) => tokio::fs::metadata(path).await.is_ok(),
            None => false,
        }
    }

    async fn create_folder(&self) -> bool {
        match tokio::fs::create_dir_all(&self.root).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("Cannot create sync folder {}: {}", self.root.display(), e);
                false
            }
        }
    }
}
