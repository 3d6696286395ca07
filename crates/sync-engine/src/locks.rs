// crates/sync-engine/src/locks.rs
//! Coordination between the snapshot and event paths

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// One async mutex per file path
///
/// Serializes read, decide and write on the same file across tasks.
#[derive(Clone, Default)]
pub struct FileLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `path`
    pub async fn lock(&self, path: &Path) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(path.to_path_buf()).or_default())
        };
        entry.lock_owned().await
    }

    /// True while some task holds the lock for `path`
    pub fn is_locked(&self, path: &Path) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .get(path)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

/// Set while the engine itself is writing to the host
///
/// Pollers skip their cycle while it is set so they do not mistake the
/// engine's own writes for user changes.
#[derive(Clone, Default)]
pub struct WriteFlag {
    active: Arc<AtomicUsize>,
}

impl WriteFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a write in progress until the guard is dropped
    pub fn begin(&self) -> WriteGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        WriteGuard {
            active: Arc::clone(&self.active),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }
}

/// Clears its share of the [`WriteFlag`] on drop
pub struct WriteGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_path_is_serialized() {
        let locks = FileLocks::new();
        let path = Path::new("/userdata/favourites.xml");

        let guard = locks.lock(path).await;
        assert!(locks.is_locked(path));

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(Path::new("/userdata/favourites.xml")).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(!locks.is_locked(path));
    }

    #[tokio::test]
    async fn test_different_paths_do_not_block() {
        let locks = FileLocks::new();
        let _a = locks.lock(Path::new("/a")).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock(Path::new("/b"))).await;
        assert!(b.is_ok());
    }

    #[test]
    fn test_write_flag_nests() {
        let flag = WriteFlag::new();
        assert!(!flag.is_active());
        let outer = flag.begin();
        let inner = flag.begin();
        drop(inner);
        assert!(flag.is_active());
        drop(outer);
        assert!(!flag.is_active());
    }
}
