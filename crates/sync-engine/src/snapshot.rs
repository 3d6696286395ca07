// crates/sync-engine/src/snapshot.rs
//! Snapshot sync: reconciliation through cloud storage
//!
//! One cycle downloads the remote snapshot, merges it into the local store,
//! syncs the tracked files, pulls host changes, then pushes the merged state
//! to the host and uploads a fresh snapshot. Every step catches its own
//! failures; a cycle never rolls back what earlier steps did.

use crate::config::SyncConfig;
use crate::conflict::Winner;
use crate::context::{localize, SyncContext};
use crate::error::{SyncError, SyncResult};
use crate::events::EventSyncManager;
use crate::files::FileSync;
use crate::monitor::{publish_pulled, pull_host_state};
use crate::tracker::ChangeTracker;
use crate::types::{SyncOutcome, SyncPhase, SyncReport};
use cloudsync_core::transport::SNAPSHOT_NAME;
use cloudsync_core::types::POSITION_TOLERANCE_SECS;
use cloudsync_core::{AppError, CloudStorage, ContentId, ResumePoint, WatchedItem};
use cloudsync_database::queries::{
    count_resume, count_watched, get_watched, list_resume, list_watched, mark_changed,
    mark_uploaded, pending_host_resume, pending_host_watched, record_host_resume,
    record_host_watched, upload_state, upsert_resume, upsert_watched,
};
use cloudsync_database::{export_snapshot, read_snapshot, RemoteSnapshot};
use cloudsync_resilience::with_timeout;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Runs snapshot cycles, one at a time
pub struct SnapshotSyncManager {
    ctx: SyncContext,
    storage: Option<Arc<dyn CloudStorage>>,
    files: Option<FileSync>,
    events: Option<Arc<EventSyncManager>>,
    in_progress: AtomicBool,
    phase: Mutex<SyncPhase>,
}

impl SnapshotSyncManager {
    /// Creates the manager; without storage only the host pull and push run
    ///
    /// Tracker entries for files that no longer exist are dropped here.
    pub fn new(
        ctx: SyncContext,
        storage: Option<Arc<dyn CloudStorage>>,
        tracker: ChangeTracker,
    ) -> Self {
        match tracker.cleanup_orphans() {
            Ok(0) => {}
            Ok(removed) => log::debug!("Dropped {} stale tracker entries", removed),
            Err(e) => log::warn!("Tracker cleanup failed: {}", e),
        }
        let files = storage.as_ref().map(|storage| {
            FileSync::new(
                Arc::clone(storage),
                Arc::clone(&ctx.host),
                tracker,
                ctx.resolver.clone(),
                ctx.locks.clone(),
                ctx.writes.clone(),
            )
        });
        Self {
            ctx,
            storage,
            files,
            events: None,
            in_progress: AtomicBool::new(false),
            phase: Mutex::new(SyncPhase::Idle),
        }
    }

    /// Publishes host changes found during the pull step through `events`
    pub fn with_events(mut self, events: Arc<EventSyncManager>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase.lock().map(|p| *p).unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Runs one cycle, or returns `Skipped` if one is already running
    pub async fn sync(&self, config: &SyncConfig) -> SyncOutcome {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::info!("Snapshot sync already running, skipping trigger");
            return SyncOutcome::Skipped;
        }
        let _running = RunningGuard { manager: self };

        log::info!("Snapshot sync started");
        let mut report = SyncReport::default();

        self.set_phase(SyncPhase::Downloading);
        let remote = self.download(config).await;
        report.remote_found = matches!(remote, Remote::Found(_));
        if let Remote::Unreachable(reason) = &remote {
            report.errors.push(format!("download: {}", reason));
        }

        self.set_phase(SyncPhase::Merging);
        if let Remote::Found(snapshot) = &remote {
            if let Err(e) = self.merge(config, snapshot, &mut report).await {
                log::error!("Merge failed: {}", e);
                report.errors.push(format!("merge: {}", e));
            }
        }
        if let Some(files) = self.files.as_ref().filter(|_| config.cloud_enabled) {
            let file_report = files.sync_all(config, &self.ctx.paths).await;
            report.files_uploaded = file_report.uploaded;
            report.files_downloaded = file_report.downloaded;
            if file_report.failed > 0 {
                report
                    .errors
                    .push(format!("files: {} transfers failed", file_report.failed));
            }
        }

        self.set_phase(SyncPhase::Pulling);
        match pull_host_state(&self.ctx, config).await {
            Ok(pulled) => {
                report.pulled_watched = pulled.watched.len();
                report.pulled_resume = pulled.resume.len();
                report.errors.extend(pulled.errors.iter().cloned());
                if let Some(events) = &self.events {
                    if pulled.changed() > 0 {
                        publish_pulled(events, &pulled).await;
                    }
                }
            }
            Err(e) => {
                log::error!("Host pull failed: {}", e);
                report.errors.push(format!("pull: {}", e));
            }
        }

        match self.plan_push(&report, &remote).await {
            Ok(plan) if plan.host || plan.upload => {
                self.set_phase(SyncPhase::Pushing);
                self.push(config, &mut report, plan).await;
            }
            Ok(_) => log::debug!("Nothing to push"),
            Err(e) => report.errors.push(format!("push check: {}", e)),
        }

        log::info!("Snapshot sync finished: {}", report);
        SyncOutcome::Completed(report)
    }

    fn set_phase(&self, phase: SyncPhase) {
        if let Ok(mut current) = self.phase.lock() {
            *current = phase;
        }
    }

    async fn download(&self, config: &SyncConfig) -> Remote {
        let Some(storage) = self.storage.as_ref().filter(|_| config.cloud_enabled) else {
            return Remote::Disabled;
        };
        let bytes = match with_timeout(config.transfer_timeout, storage.try_download(SNAPSHOT_NAME)).await {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => {
                log::info!("No remote snapshot on {}", storage.provider());
                return Remote::Absent;
            }
            Ok(Err(e)) => {
                log::warn!("Snapshot download failed, not uploading this cycle: {}", e);
                return Remote::Unreachable(e.to_string());
            }
            Err(e) => {
                log::warn!("Snapshot download gave up, not uploading this cycle: {}", e);
                return Remote::Unreachable(e.to_string());
            }
        };
        match read_snapshot(&bytes).await {
            Ok(snapshot) => {
                log::debug!(
                    "Remote snapshot: {} watched, {} resume",
                    snapshot.watched.len(),
                    snapshot.resume.len()
                );
                Remote::Found(snapshot)
            }
            Err(e) => {
                // the upload replaces it; the provider keeps the old copy
                log::warn!("Remote snapshot is unreadable, ignoring it: {}", e);
                Remote::Absent
            }
        }
    }

    /// Merges remote rows; only rows the remote side wins are written
    ///
    /// Local rows the snapshot lacks or carries an older value of mark the
    /// store for upload.
    async fn merge(
        &self,
        config: &SyncConfig,
        snapshot: &RemoteSnapshot,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let resolver = &self.ctx.resolver;
        let pool = &self.ctx.pool;
        let mut ahead = 0;

        if config.watched {
            for remote in &snapshot.watched {
                let local = get_watched(pool, &remote.id).await?;
                match resolver.resolve_watched(local.as_ref(), Some(remote)) {
                    Winner::Remote => {
                        upsert_watched(pool, remote).await?;
                        report.merged_watched += 1;
                    }
                    Winner::Local => {
                        if local.as_ref().is_some_and(|l| watched_ahead(l, remote)) {
                            ahead += 1;
                        }
                    }
                }
            }
            let remote_ids: HashSet<&ContentId> = snapshot.watched.iter().map(|w| &w.id).collect();
            ahead += list_watched(pool)
                .await?
                .iter()
                .filter(|w| !remote_ids.contains(&w.id))
                .count();
        }
        if config.resume {
            for remote in snapshot.resume.iter().filter(|p| p.is_meaningful()) {
                let local = self.ctx.local_resume_for(remote).await?;
                match resolver.resolve_resume(local.as_ref(), Some(remote)) {
                    Winner::Remote => {
                        upsert_resume(pool, &localize(remote, local.as_ref())).await?;
                        report.merged_resume += 1;
                    }
                    Winner::Local => {
                        if local.as_ref().is_some_and(|l| resume_ahead(l, remote)) {
                            ahead += 1;
                        }
                    }
                }
            }
            ahead += list_resume(pool)
                .await?
                .iter()
                .filter(|l| l.is_meaningful())
                .filter(|l| !snapshot.resume.iter().any(|r| same_resume(l, r)))
                .count();
        }

        if ahead > 0 {
            log::debug!("{} local rows are ahead of the remote snapshot", ahead);
            mark_changed(pool).await?;
        }
        Ok(())
    }

    async fn plan_push(&self, report: &SyncReport, remote: &Remote) -> SyncResult<PushPlan> {
        let pool = &self.ctx.pool;
        let host = report.store_changed()
            || !pending_host_watched(pool).await?.is_empty()
            || !pending_host_resume(pool).await?.is_empty();

        let upload = match remote {
            Remote::Disabled | Remote::Unreachable(_) => false,
            Remote::Found(_) => report.store_changed() || upload_state(pool).await?.needs_upload(),
            Remote::Absent => {
                // first device to sync seeds the remote
                count_watched(pool).await? + count_resume(pool).await? > 0
            }
        };
        Ok(PushPlan { host, upload })
    }

    async fn push(&self, config: &SyncConfig, report: &mut SyncReport, plan: PushPlan) {
        if plan.host {
            if let Err(e) = self.push_to_host(config, report).await {
                log::error!("Host push failed: {}", e);
                report.errors.push(format!("host push: {}", e));
            }
        }
        if plan.upload {
            match self.upload(config).await {
                Ok(Some(true)) => report.snapshot_uploaded = true,
                Ok(Some(false)) => report.errors.push("upload: storage refused the snapshot".to_string()),
                Ok(None) => {}
                Err(e) => {
                    log::error!("Snapshot upload failed: {}", e);
                    report.errors.push(format!("upload: {}", e));
                }
            }
        }
    }

    /// Applies rows the host has not seen yet
    async fn push_to_host(&self, config: &SyncConfig, report: &mut SyncReport) -> SyncResult<()> {
        let pool = &self.ctx.pool;
        let host = &self.ctx.host;
        let _writing = self.ctx.writes.begin();

        if config.watched {
            for item in pending_host_watched(pool).await? {
                match host.set_playcount(&item).await {
                    Ok(()) => {
                        record_host_watched(pool, &item).await?;
                        report.pushed_watched += 1;
                    }
                    Err(AppError::HostItemNotFound { .. }) => {
                        log::debug!("{} is not in the local library", item.id);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        if config.resume {
            for point in pending_host_resume(pool).await? {
                match host.set_resume(&point).await {
                    Ok(()) => {
                        record_host_resume(pool, &point).await?;
                        report.pushed_resume += 1;
                    }
                    Err(AppError::HostItemNotFound { .. }) => {
                        log::debug!("{} is not in the local library", point.file_path);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// Uploads a fresh export; `None` when no storage is configured
    async fn upload(&self, config: &SyncConfig) -> SyncResult<Option<bool>> {
        let Some(storage) = self.storage.as_ref().filter(|_| config.cloud_enabled) else {
            return Ok(None);
        };
        let exported_at = upload_state(&self.ctx.pool).await?.changes;
        let bytes = export_snapshot(&self.ctx.pool).await?;
        let uploaded = with_timeout(config.transfer_timeout, storage.upload(SNAPSHOT_NAME, &bytes))
            .await
            .map_err(|e| SyncError::Custom(format!("snapshot upload: {}", e)))?;
        if uploaded {
            mark_uploaded(&self.ctx.pool, exported_at).await?;
            log::info!("Uploaded snapshot ({} bytes) to {}", bytes.len(), storage.provider());
        }
        Ok(Some(uploaded))
    }
}

/// What the downloading step found
enum Remote {
    /// Cloud sync is off or has no storage
    Disabled,
    /// The provider answered that there is no snapshot
    Absent,
    /// The provider could not be reached; nothing may be uploaded over it
    Unreachable(String),
    Found(RemoteSnapshot),
}

#[derive(Debug, Clone, Copy)]
struct PushPlan {
    host: bool,
    upload: bool,
}

/// The local value differs and carries the later change
fn watched_ahead(local: &WatchedItem, remote: &WatchedItem) -> bool {
    (local.play_count != remote.play_count || local.last_played != remote.last_played)
        && local.last_change_at > remote.last_change_at
}

fn resume_ahead(local: &ResumePoint, remote: &ResumePoint) -> bool {
    let moved = (local.position_seconds - remote.position_seconds).abs() >= POSITION_TOLERANCE_SECS;
    moved
        && (local.position_seconds > remote.position_seconds
            || local.last_change_at > remote.last_change_at)
}

fn same_resume(local: &ResumePoint, remote: &ResumePoint) -> bool {
    local.file_path == remote.file_path
        || (local.content_id.is_some() && local.content_id == remote.content_id)
}

/// Clears the in-progress flag and returns to idle, also on early exit
struct RunningGuard<'a> {
    manager: &'a SnapshotSyncManager,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.manager.set_phase(SyncPhase::Idle);
        self.manager.in_progress.store(false, Ordering::SeqCst);
    }
}
