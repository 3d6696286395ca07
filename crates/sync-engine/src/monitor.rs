// crates/sync-engine/src/monitor.rs
//! Host state polling
//!
//! The host has no push notifications for playback changes, so its watched
//! and resume state is read periodically and diffed against the values last
//! seen. Changes land in the local store and, when an event path is
//! running, are published to peers.

use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::events::EventSyncManager;
use cloudsync_core::{ResumePoint, WatchedItem};
use cloudsync_database::queries::{
    get_resume, get_watched, observe_host_resume, observe_host_watched,
};
use std::sync::Arc;

/// Rows changed by one pull
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullReport {
    pub watched: Vec<WatchedItem>,
    pub resume: Vec<ResumePoint>,
    /// Host reads that failed and were skipped
    pub errors: Vec<String>,
}

impl PullReport {
    pub fn changed(&self) -> usize {
        self.watched.len() + self.resume.len()
    }
}

/// Reads host state into the store; returns the rows that changed
///
/// Each changed row is returned as stored, with its fresh change stamp.
pub async fn pull_host_state(ctx: &SyncContext, config: &SyncConfig) -> SyncResult<PullReport> {
    let mut report = PullReport::default();

    if config.watched {
        let mut items = Vec::new();
        match ctx.host.watched_movies().await {
            Ok(movies) => items.extend(movies),
            Err(e) => report.errors.push(format!("reading watched movies: {}", e)),
        }
        match ctx.host.watched_episodes().await {
            Ok(episodes) => items.extend(episodes),
            Err(e) => report.errors.push(format!("reading watched episodes: {}", e)),
        }
        for item in &items {
            if observe_host_watched(&ctx.pool, item).await? {
                if let Some(stored) = get_watched(&ctx.pool, &item.id).await? {
                    report.watched.push(stored);
                }
            }
        }
    }

    if config.resume {
        match ctx.host.resume_points().await {
            Ok(points) => {
                for point in &points {
                    if observe_host_resume(&ctx.pool, point).await? {
                        if let Some(stored) = get_resume(&ctx.pool, &point.file_path).await? {
                            report.resume.push(stored);
                        }
                    }
                }
            }
            Err(e) => report.errors.push(format!("reading resume points: {}", e)),
        }
    }

    for error in &report.errors {
        log::warn!("Host pull incomplete, {}", error);
    }
    Ok(report)
}

/// Publishes every row of a pull
pub async fn publish_pulled(events: &EventSyncManager, report: &PullReport) -> usize {
    let mut published = 0;
    for item in &report.watched {
        if events.publish_watched(item).await {
            published += 1;
        }
    }
    for point in &report.resume {
        if events.publish_resume(point).await {
            published += 1;
        }
    }
    published
}

/// Periodic host poller feeding the event path
#[derive(Clone)]
pub struct HostMonitor {
    ctx: SyncContext,
    events: Arc<EventSyncManager>,
}

impl HostMonitor {
    pub fn new(ctx: SyncContext, events: Arc<EventSyncManager>) -> Self {
        Self { ctx, events }
    }

    /// One poll; skipped while the engine itself writes to the host
    pub async fn poll(&self, config: &SyncConfig) -> SyncResult<PullReport> {
        if self.ctx.writes.is_active() {
            log::debug!("Host write in progress, skipping host poll");
            return Ok(PullReport::default());
        }
        let report = pull_host_state(&self.ctx, config).await?;
        if report.changed() > 0 {
            let published = publish_pulled(&self.events, &report).await;
            log::info!(
                "Host changes: {} watched, {} resume ({} published)",
                report.watched.len(),
                report.resume.len(),
                published
            );
        }
        Ok(report)
    }
}
