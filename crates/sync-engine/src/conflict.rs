// crates/sync-engine/src/conflict.rs
//! Conflict detection and resolution

use crate::error::{SyncError, SyncResult};
use cloudsync_core::{ConflictStrategy, ResumePoint, Timestamp, WatchedItem};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Number of records `summary` lists
const RECENT_LIMIT: usize = 10;

/// Side that won a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
}

/// What a conflict was about
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Watched,
    Resume,
    File,
}

/// Both sides of a conflict, kept for review under the manual strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub kind: ConflictKind,
    /// Content identity, file path or remote file name
    pub key: String,
    pub local: serde_json::Value,
    pub remote: serde_json::Value,
    pub timestamp: Timestamp,
}

/// Pending conflict counts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConflictSummary {
    pub total: usize,
    pub by_kind: BTreeMap<ConflictKind, usize>,
    /// Most recent records, oldest first
    pub recent: Vec<ConflictRecord>,
}

/// Decides which side of a replicated value wins
///
/// Identical values are never a conflict and a missing side always yields
/// the other one, whatever the strategy. Ties go to the local side.
#[derive(Clone)]
pub struct ConflictResolver {
    strategy: Arc<Mutex<ConflictStrategy>>,
    pending: Arc<Mutex<Vec<ConflictRecord>>>,
}

impl ConflictResolver {
    /// Creates a resolver with the given strategy
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self {
            strategy: Arc::new(Mutex::new(strategy)),
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
            .lock()
            .map(|s| *s)
            .unwrap_or(ConflictStrategy::Newer)
    }

    pub fn set_strategy(&self, strategy: ConflictStrategy) -> SyncResult<()> {
        let mut current = self
            .strategy
            .lock()
            .map_err(|_| SyncError::Custom("Lock poisoned".to_string()))?;
        *current = strategy;
        Ok(())
    }

    /// Resolves a watched item
    pub fn resolve_watched(
        &self,
        local: Option<&WatchedItem>,
        remote: Option<&WatchedItem>,
    ) -> Winner {
        let (local, remote) = match (local, remote) {
            (Some(l), Some(r)) => (l, r),
            (None, Some(_)) => return Winner::Remote,
            _ => return Winner::Local,
        };
        if local.same_state(remote) {
            return Winner::Local;
        }

        let strategy = self.strategy();
        if strategy == ConflictStrategy::Manual {
            self.record(ConflictKind::Watched, local.id.as_str(), json!(local), json!(remote));
        }
        match strategy {
            ConflictStrategy::Local => Winner::Local,
            ConflictStrategy::Remote => Winner::Remote,
            ConflictStrategy::Newer | ConflictStrategy::Manual => newer(compare_watched(local, remote)),
        }
    }

    /// Resolves a resume point
    ///
    /// Points at position zero count as absent. A point strictly further
    /// along wins under every strategy.
    pub fn resolve_resume(
        &self,
        local: Option<&ResumePoint>,
        remote: Option<&ResumePoint>,
    ) -> Winner {
        let local = local.filter(|p| p.is_meaningful());
        let remote = remote.filter(|p| p.is_meaningful());
        let (local, remote) = match (local, remote) {
            (Some(l), Some(r)) => (l, r),
            (None, Some(_)) => return Winner::Remote,
            _ => return Winner::Local,
        };
        if local.same_state(remote) {
            return Winner::Local;
        }

        let strategy = self.strategy();
        if strategy == ConflictStrategy::Manual {
            self.record(ConflictKind::Resume, &local.file_path, json!(local), json!(remote));
        }
        if remote.is_ahead_of(local) {
            return Winner::Remote;
        }
        if local.is_ahead_of(remote) {
            return Winner::Local;
        }
        match strategy {
            ConflictStrategy::Local => Winner::Local,
            ConflictStrategy::Remote => Winner::Remote,
            ConflictStrategy::Newer | ConflictStrategy::Manual => {
                newer(remote.last_change_at.cmp(&local.last_change_at))
            }
        }
    }

    /// Resolves a mirrored file; `newer` prefers the longer content
    pub fn resolve_file(&self, name: &str, local: Option<&[u8]>, remote: Option<&[u8]>) -> Winner {
        let local = local.filter(|b| !b.is_empty());
        let remote = remote.filter(|b| !b.is_empty());
        let (local, remote) = match (local, remote) {
            (Some(l), Some(r)) => (l, r),
            (None, Some(_)) => return Winner::Remote,
            _ => return Winner::Local,
        };
        if local == remote {
            return Winner::Local;
        }

        let strategy = self.strategy();
        if strategy == ConflictStrategy::Manual {
            self.record(
                ConflictKind::File,
                name,
                json!({ "size": local.len() }),
                json!({ "size": remote.len() }),
            );
        }
        match strategy {
            ConflictStrategy::Local => Winner::Local,
            ConflictStrategy::Remote => Winner::Remote,
            ConflictStrategy::Newer | ConflictStrategy::Manual => {
                newer(remote.len().cmp(&local.len()))
            }
        }
    }

    /// Conflicts recorded under the manual strategy, oldest first
    pub fn pending_conflicts(&self) -> SyncResult<Vec<ConflictRecord>> {
        let pending = self
            .pending
            .lock()
            .map_err(|_| SyncError::Custom("Lock poisoned".to_string()))?;
        Ok(pending.clone())
    }

    /// Forgets all recorded conflicts; returns how many there were
    pub fn clear_pending(&self) -> SyncResult<usize> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| SyncError::Custom("Lock poisoned".to_string()))?;
        let count = pending.len();
        pending.clear();
        Ok(count)
    }

    pub fn summary(&self) -> SyncResult<ConflictSummary> {
        let pending = self.pending_conflicts()?;
        let mut summary = ConflictSummary {
            total: pending.len(),
            ..Default::default()
        };
        for record in &pending {
            *summary.by_kind.entry(record.kind).or_insert(0) += 1;
        }
        let skip = pending.len().saturating_sub(RECENT_LIMIT);
        summary.recent = pending.into_iter().skip(skip).collect();
        Ok(summary)
    }

    fn record(
        &self,
        kind: ConflictKind,
        key: &str,
        local: serde_json::Value,
        remote: serde_json::Value,
    ) {
        log::info!("Conflict on {:?} {} queued for review", kind, key);
        if let Ok(mut pending) = self.pending.lock() {
            pending.push(ConflictRecord {
                kind,
                key: key.to_string(),
                local,
                remote,
                timestamp: Timestamp::now(),
            });
        }
    }
}

/// Maps "remote compared to local" onto a winner; ties stay local
fn newer(remote_vs_local: Ordering) -> Winner {
    if remote_vs_local == Ordering::Greater {
        Winner::Remote
    } else {
        Winner::Local
    }
}

/// Orders remote against local by change stamp, then last played, then count
fn compare_watched(local: &WatchedItem, remote: &WatchedItem) -> Ordering {
    if !local.last_change_at.is_unset() && !remote.last_change_at.is_unset() {
        return remote.last_change_at.cmp(&local.last_change_at);
    }
    match (local.last_played_at(), remote.last_played_at()) {
        (Some(l), Some(r)) => r.cmp(&l),
        _ => remote.play_count.cmp(&local.play_count),
    }
}
