// crates/sync-engine/src/files.rs
//! File-level sync of the favorites file and mirrored host configuration
//!
//! Files are exchanged whole. A file the tracker reports unchanged is not
//! touched; otherwise local and remote content are compared under the
//! path's lock and the resolver picks the copy both sides end up with.

use crate::config::SyncConfig;
use crate::conflict::{ConflictResolver, Winner};
use crate::error::{SyncError, SyncResult};
use crate::locks::{FileLocks, WriteFlag};
use crate::tracker::ChangeTracker;
use cloudsync_core::favorites::FAVOURITES_FILE;
use cloudsync_core::transport::{COMPRESSED_SUFFIX, USERDATA_PREFIX};
use cloudsync_core::{CloudStorage, HostPaths, MediaHost};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Tracker category of the favorites file
pub const FAVORITES_CATEGORY: &str = "favorites";

/// Host configuration files mirrored under `userdata/`
pub const USERDATA_FILES: [&str; 7] = [
    "sources.xml",
    "passwords.xml",
    "mediasources.xml",
    "advancedsettings.xml",
    "profiles.xml",
    "RssFeeds.xml",
    "upnpserver.xml",
];

/// A local file and where it lives remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedFile {
    pub local: PathBuf,
    /// Remote name without the compression suffix
    pub remote: String,
    pub category: String,
}

impl SyncedFile {
    pub fn is_favorites(&self) -> bool {
        self.category == FAVORITES_CATEGORY
    }
}

/// Files covered by the enabled categories
pub fn synced_files(config: &SyncConfig, paths: &HostPaths) -> Vec<SyncedFile> {
    let mut files = Vec::new();
    if config.favorites {
        files.push(SyncedFile {
            local: paths.favourites_file(),
            remote: FAVOURITES_FILE.to_string(),
            category: FAVORITES_CATEGORY.to_string(),
        });
    }
    if config.userdata {
        for name in USERDATA_FILES {
            let remote = format!("{}{}", USERDATA_PREFIX, name);
            files.push(SyncedFile {
                local: paths.userdata_file(name),
                category: remote.clone(),
                remote,
            });
        }
    }
    files
}

/// What happened to one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    /// Tracker reported no change
    Skipped,
    /// Neither side has content
    Missing,
    /// Both sides already agree
    Unchanged,
    Uploaded,
    Downloaded,
    Failed,
}

/// Per-run counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileSyncReport {
    pub uploaded: usize,
    pub downloaded: usize,
    pub failed: usize,
}

/// Exchanges tracked files with cloud storage
#[derive(Clone)]
pub struct FileSync {
    storage: Arc<dyn CloudStorage>,
    host: Arc<dyn MediaHost>,
    tracker: ChangeTracker,
    resolver: ConflictResolver,
    locks: FileLocks,
    writes: WriteFlag,
}

impl FileSync {
    pub fn new(
        storage: Arc<dyn CloudStorage>,
        host: Arc<dyn MediaHost>,
        tracker: ChangeTracker,
        resolver: ConflictResolver,
        locks: FileLocks,
        writes: WriteFlag,
    ) -> Self {
        Self {
            storage,
            host,
            tracker,
            resolver,
            locks,
            writes,
        }
    }

    /// Syncs every file of the enabled categories
    pub async fn sync_all(&self, config: &SyncConfig, paths: &HostPaths) -> FileSyncReport {
        let mut report = FileSyncReport::default();
        for file in synced_files(config, paths) {
            match self.sync_file(config, &file).await {
                FileAction::Uploaded => report.uploaded += 1,
                FileAction::Downloaded => report.downloaded += 1,
                FileAction::Failed => report.failed += 1,
                _ => {}
            }
        }
        report
    }

    /// Syncs one file; errors are logged and reported as `Failed`
    pub async fn sync_file(&self, config: &SyncConfig, file: &SyncedFile) -> FileAction {
        let (changed, reason) = self.tracker.has_changed(&file.local, &file.category);
        if !changed {
            return FileAction::Skipped;
        }
        log::debug!("Syncing {} ({})", file.remote, reason);

        let action = {
            let _lock = self.locks.lock(&file.local).await;
            match self.exchange(config, file).await {
                Ok(action) => action,
                Err(e) => {
                    log::error!("File sync of {} failed: {}", file.remote, e);
                    FileAction::Failed
                }
            }
        };

        if file.is_favorites() && matches!(action, FileAction::Uploaded | FileAction::Downloaded) {
            if let Err(e) = self.host.refresh_favorites().await {
                log::debug!("Favorites refresh failed: {}", e);
            }
        }
        action
    }

    async fn exchange(&self, config: &SyncConfig, file: &SyncedFile) -> SyncResult<FileAction> {
        let local = read_optional(&file.local).await?;
        let remote_name = remote_name(&file.remote, config.compression);
        let remote = match self.storage.try_download(&remote_name).await {
            Ok(remote) => remote,
            Err(e) => {
                log::warn!("Cannot fetch {}, leaving it for the next cycle: {}", remote_name, e);
                return Ok(FileAction::Failed);
            }
        };
        let remote = match remote {
            Some(bytes) if config.compression => match decompress(&bytes) {
                Ok(plain) => Some(plain),
                Err(e) => {
                    log::warn!("Remote {} is not valid gzip, ignoring it: {}", remote_name, e);
                    None
                }
            },
            other => other,
        };

        let has_local = local.as_deref().is_some_and(|b| !b.is_empty());
        let has_remote = remote.as_deref().is_some_and(|b| !b.is_empty());
        if !has_local && !has_remote {
            return Ok(FileAction::Missing);
        }
        if local == remote {
            self.tracker.mark_synced(&file.local, &file.category)?;
            return Ok(FileAction::Unchanged);
        }

        match self
            .resolver
            .resolve_file(&file.remote, local.as_deref(), remote.as_deref())
        {
            Winner::Local => {
                let bytes = local.unwrap_or_default();
                let payload = if config.compression {
                    compress(&bytes).map_err(|e| SyncError::io(&file.local, e))?
                } else {
                    bytes
                };
                if !self.storage.upload(&remote_name, &payload).await {
                    return Ok(FileAction::Failed);
                }
                self.tracker.mark_synced(&file.local, &file.category)?;
                log::info!("Uploaded {}", file.remote);
                Ok(FileAction::Uploaded)
            }
            Winner::Remote => {
                let bytes = remote.unwrap_or_default();
                let _writing = self.writes.begin();
                if has_local {
                    backup_local(&file.local).await?;
                }
                write_atomic(&file.local, bytes).await?;
                self.tracker.mark_synced(&file.local, &file.category)?;
                log::info!("Downloaded {}", file.remote);
                Ok(FileAction::Downloaded)
            }
        }
    }
}

/// Remote name with the compression suffix when enabled
pub fn remote_name(name: &str, compression: bool) -> String {
    if compression {
        format!("{}{}", name, COMPRESSED_SUFFIX)
    } else {
        name.to_string()
    }
}

pub fn compress(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

pub fn decompress(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

async fn read_optional(path: &Path) -> SyncResult<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SyncError::io(path, e)),
    }
}

/// Copies `path` to `<path>.backup.<UTC timestamp>` next to it
async fn backup_local(path: &Path) -> SyncResult<PathBuf> {
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let mut backup = path.as_os_str().to_owned();
    backup.push(format!(".backup.{}", stamp));
    let backup = PathBuf::from(backup);
    tokio::fs::copy(path, &backup)
        .await
        .map_err(|e| SyncError::io(&backup, e))?;
    log::debug!("Backed up {} to {}", path.display(), backup.display());
    Ok(backup)
}

/// Replaces `path` through a temp file in the same directory
pub(crate) async fn write_atomic(path: &Path, bytes: Vec<u8>) -> SyncResult<()> {
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> SyncResult<()> {
        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir).map_err(|e| SyncError::io(&dir, e))?;
        let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| SyncError::io(&dir, e))?;
        temp.write_all(&bytes)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| SyncError::io(&target, e))?;
        temp.persist(&target)
            .map_err(|e| SyncError::io(&target, e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| SyncError::Custom(format!("write task failed: {}", e)))?
}
