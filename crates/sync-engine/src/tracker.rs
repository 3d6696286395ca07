// crates/sync-engine/src/tracker.rs
//! Change tracking for synchronized files
//!
//! Remembers the fingerprint each file had when it was last transferred so a
//! sync cycle can skip files nobody touched.

use crate::error::{SyncError, SyncResult};
use cloudsync_core::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

/// Fingerprint of a file at its last successful transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedFile {
    pub path: String,
    /// Modification time in epoch milliseconds
    pub mtime: i64,
    pub size: u64,
    /// SHA-256 of the content, lowercase hex
    pub content_hash: String,
    /// Epoch milliseconds
    pub last_synced_at: i64,
    /// Free-form label, e.g. `favorites` or `userdata/sources.xml`
    pub category: String,
}

/// Why a file does or does not need syncing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    FileNotExists,
    FileInfoError,
    NoTrackingData,
    MtimeSizeChanged,
    HashCalculationError,
    ContentChanged,
    ForceSync24h,
    NoChanges,
}

impl ChangeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileNotExists => "file_not_exists",
            Self::FileInfoError => "file_info_error",
            Self::NoTrackingData => "no_tracking_data",
            Self::MtimeSizeChanged => "mtime_size_changed",
            Self::HashCalculationError => "hash_calculation_error",
            Self::ContentChanged => "content_changed",
            Self::ForceSync24h => "force_sync_24h",
            Self::NoChanges => "no_changes",
        }
    }
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked file counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub total: usize,
    pub by_category: BTreeMap<String, usize>,
}

/// Persistent index of tracked files
///
/// The index is a JSON map from path to [`TrackedFile`], rewritten
/// atomically after every mutation.
#[derive(Clone)]
pub struct ChangeTracker {
    index_path: PathBuf,
    force_resync: Duration,
    files: Arc<Mutex<HashMap<String, TrackedFile>>>,
}

impl ChangeTracker {
    /// Loads the index at `index_path`
    ///
    /// A missing index starts empty. An unreadable one is logged and
    /// replaced on the next write, which re-syncs every file once.
    pub fn open(index_path: impl Into<PathBuf>, force_resync: Duration) -> Self {
        let index_path = index_path.into();
        let files = match fs::read(&index_path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(files) => files,
                Err(e) => {
                    log::warn!(
                        "Tracker index {} is unreadable, starting fresh: {}",
                        index_path.display(),
                        e
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                log::warn!("Cannot read tracker index {}: {}", index_path.display(), e);
                HashMap::new()
            }
        };

        Self {
            index_path,
            force_resync,
            files: Arc::new(Mutex::new(files)),
        }
    }

    /// Decides whether `path` needs syncing
    ///
    /// Never fails: any error reading the file reports it as changed.
    pub fn has_changed(&self, path: &Path, category: &str) -> (bool, ChangeReason) {
        self.has_changed_at(path, category, Timestamp::now())
    }

    /// [`has_changed`](Self::has_changed) against an explicit clock
    pub fn has_changed_at(
        &self,
        path: &Path,
        category: &str,
        now: Timestamp,
    ) -> (bool, ChangeReason) {
        let (changed, reason) = self.evaluate(path, now);
        log::debug!(
            "{} [{}]: {} ({})",
            path.display(),
            category,
            if changed { "changed" } else { "unchanged" },
            reason
        );
        (changed, reason)
    }

    fn evaluate(&self, path: &Path, now: Timestamp) -> (bool, ChangeReason) {
        if !path.exists() {
            return (true, ChangeReason::FileNotExists);
        }
        let (mtime, size) = match file_info(path) {
            Ok(info) => info,
            Err(_) => return (true, ChangeReason::FileInfoError),
        };
        let Some(tracked) = self.get(path) else {
            return (true, ChangeReason::NoTrackingData);
        };
        if tracked.mtime != mtime || tracked.size != size {
            return (true, ChangeReason::MtimeSizeChanged);
        }
        match hash_file(path) {
            Ok(hash) if hash != tracked.content_hash => {
                return (true, ChangeReason::ContentChanged);
            }
            Ok(_) => {}
            Err(_) => return (true, ChangeReason::HashCalculationError),
        }
        let since_sync = now.millis_since(Timestamp::from_millis(tracked.last_synced_at));
        if since_sync > self.force_resync.as_millis() as u64 {
            return (true, ChangeReason::ForceSync24h);
        }
        (false, ChangeReason::NoChanges)
    }

    /// Records the current fingerprint of `path` after a transfer
    ///
    /// A file that vanished in between is logged and skipped.
    pub fn mark_synced(&self, path: &Path, category: &str) -> SyncResult<()> {
        self.mark_synced_at(path, category, Timestamp::now())
    }

    /// [`mark_synced`](Self::mark_synced) against an explicit clock
    pub fn mark_synced_at(&self, path: &Path, category: &str, now: Timestamp) -> SyncResult<()> {
        let (mtime, size) = match file_info(path) {
            Ok(info) => info,
            Err(e) => {
                log::warn!("Cannot mark {} as synced: {}", path.display(), e);
                return Ok(());
            }
        };
        let content_hash = hash_file(path).map_err(|e| SyncError::io(path, e))?;
        let key = key(path);
        let record = TrackedFile {
            path: key.clone(),
            mtime,
            size,
            content_hash,
            last_synced_at: now.as_millis(),
            category: category.to_string(),
        };

        let mut files = self.lock()?;
        files.insert(key, record);
        self.persist(&files)
    }

    /// Drops the record for `path`; returns true if one existed
    pub fn remove(&self, path: &Path) -> SyncResult<bool> {
        let mut files = self.lock()?;
        if files.remove(&key(path)).is_none() {
            return Ok(false);
        }
        self.persist(&files)?;
        Ok(true)
    }

    /// Removes records whose file no longer exists; returns how many
    pub fn cleanup_orphans(&self) -> SyncResult<usize> {
        let mut files = self.lock()?;
        let before = files.len();
        files.retain(|path, _| Path::new(path).exists());
        let removed = before - files.len();
        if removed > 0 {
            log::info!("Removed {} orphaned tracker entries", removed);
            self.persist(&files)?;
        }
        Ok(removed)
    }

    /// The record for `path`, if tracked
    pub fn get(&self, path: &Path) -> Option<TrackedFile> {
        self.files
            .lock()
            .ok()
            .and_then(|files| files.get(&key(path)).cloned())
    }

    pub fn stats(&self) -> SyncResult<TrackerStats> {
        let files = self.lock()?;
        let mut stats = TrackerStats {
            total: files.len(),
            ..Default::default()
        };
        for file in files.values() {
            *stats.by_category.entry(file.category.clone()).or_insert(0) += 1;
        }
        Ok(stats)
    }

    fn lock(&self) -> SyncResult<std::sync::MutexGuard<'_, HashMap<String, TrackedFile>>> {
        self.files
            .lock()
            .map_err(|_| SyncError::Custom("Lock poisoned".to_string()))
    }

    fn persist(&self, files: &HashMap<String, TrackedFile>) -> SyncResult<()> {
        let dir = match self.index_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| SyncError::io(&dir, e))?;

        let json = serde_json::to_vec_pretty(files)?;
        let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| SyncError::io(&dir, e))?;
        temp.write_all(&json)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| SyncError::io(temp.path(), e))?;
        temp.persist(&self.index_path)
            .map_err(|e| SyncError::io(&self.index_path, e.error))?;
        Ok(())
    }
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn file_info(path: &Path) -> io::Result<(i64, u64)> {
    let metadata = fs::metadata(path)?;
    let mtime = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Ok((mtime, metadata.len()))
}

/// SHA-256 of a file's content as lowercase hex
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
