// crates/sync-engine/src/watcher.rs
//! Favorites watcher
//!
//! Polls the host favorites list and publishes titles that were not there
//! on the previous poll. Removals are local-only and never published.

use crate::error::{SyncError, SyncResult};
use crate::events::EventSyncManager;
use crate::locks::WriteFlag;
use cloudsync_core::MediaHost;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct FavoritesWatcher {
    host: Arc<dyn MediaHost>,
    events: Arc<EventSyncManager>,
    writes: WriteFlag,
    /// Titles seen on the last poll; `None` until the first poll
    known: Arc<Mutex<Option<HashSet<String>>>>,
}

impl FavoritesWatcher {
    pub fn new(host: Arc<dyn MediaHost>, events: Arc<EventSyncManager>, writes: WriteFlag) -> Self {
        Self {
            host,
            events,
            writes,
            known: Arc::new(Mutex::new(None)),
        }
    }

    /// One poll; returns how many new favorites were published
    ///
    /// The first poll only records the current titles.
    pub async fn poll(&self) -> SyncResult<usize> {
        if self.writes.is_active() {
            return Ok(0);
        }
        let current = self.host.favorites().await?;

        let added: Vec<_> = {
            let mut known = self
                .known
                .lock()
                .map_err(|_| SyncError::Custom("Lock poisoned".to_string()))?;
            let titles: HashSet<String> = current.iter().map(|e| e.title.clone()).collect();
            let added = match known.as_ref() {
                Some(previous) => current
                    .iter()
                    .filter(|e| !previous.contains(&e.title))
                    .cloned()
                    .collect(),
                None => {
                    log::debug!("Watching {} favorites", titles.len());
                    Vec::new()
                }
            };
            *known = Some(titles);
            added
        };

        let mut published = 0;
        for entry in &added {
            log::info!("New local favorite {:?}", entry.title);
            if self.events.publish_favorite(entry).await {
                published += 1;
            }
        }
        Ok(published)
    }
}
