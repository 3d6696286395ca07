//! Cloud storage held in process memory
//!
//! Clones share the same contents, so two engines in one test can act as two
//! devices syncing through one remote.

use async_trait::async_trait;
use cloudsync_core::transport::backup_name;
use cloudsync_core::{AppError, CloudStorage, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Shared {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    offline: AtomicBool,
}

/// In-memory `CloudStorage`
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail as if the provider were unreachable
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::SeqCst);
    }

    /// Raw contents of `name`, without the backup fallback
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files().get(name).cloned()
    }

    /// Stores `bytes` under `name` without keeping a backup
    pub fn put(&self, name: &str, bytes: &[u8]) {
        self.files().insert(name.to_string(), bytes.to_vec());
    }

    /// Deletes `name` only
    pub fn remove(&self, name: &str) -> bool {
        self.files().remove(name).is_some()
    }

    /// Names of all stored files, sorted
    pub fn names(&self) -> Vec<String> {
        self.files().keys().cloned().collect()
    }

    fn is_offline(&self) -> bool {
        self.shared.offline.load(Ordering::SeqCst)
    }

    fn files(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // A poisoned map still holds consistent bytes; keep using it
        self.shared
            .files
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CloudStorage for MemoryStorage {
    fn provider(&self) -> &str {
        "memory"
    }

    async fn upload(&self, name: &str, bytes: &[u8]) -> bool {
        if self.is_offline() {
            log::warn!("memory storage offline, upload of {} dropped", name);
            return false;
        }
        let mut files = self.files();
        if let Some(previous) = files.remove(name) {
            files.insert(backup_name(name), previous);
        }
        files.insert(name.to_string(), bytes.to_vec());
        true
    }

    async fn try_download(&self, name: &str) -> Result<Option<Vec<u8>>> {
        if self.is_offline() {
            return Err(AppError::StorageUnavailable {
                provider: self.provider().to_string(),
                reason: format!("offline, download of {} dropped", name),
            });
        }
        let mut files = self.files();
        if let Some(bytes) = files.get(name) {
            return Ok(Some(bytes.clone()));
        }
        let Some(restored) = files.get(&backup_name(name)).cloned() else {
            return Ok(None);
        };
        log::info!("{} missing, restored from backup", name);
        files.insert(name.to_string(), restored.clone());
        Ok(Some(restored))
    }

    async fn exists(&self, name: &str) -> bool {
        !self.is_offline() && self.files().contains_key(name)
    }

    async fn create_folder(&self) -> bool {
        !self.is_offline()
    }
}
