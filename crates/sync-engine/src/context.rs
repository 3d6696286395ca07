// crates/sync-engine/src/context.rs
//! Collaborators shared by the snapshot and event paths

use crate::conflict::ConflictResolver;
use crate::locks::{FileLocks, WriteFlag};
use cloudsync_core::{ContentId, HostPaths, MediaHost, ResumePoint};
use cloudsync_database::queries::{find_resume_by_content, get_resume};
use cloudsync_database::DbPool;
use std::sync::Arc;

/// Everything both managers write through
#[derive(Clone)]
pub struct SyncContext {
    pub pool: DbPool,
    pub host: Arc<dyn MediaHost>,
    pub paths: HostPaths,
    pub resolver: ConflictResolver,
    pub locks: FileLocks,
    pub writes: WriteFlag,
}

impl SyncContext {
    pub fn new(
        pool: DbPool,
        host: Arc<dyn MediaHost>,
        paths: HostPaths,
        resolver: ConflictResolver,
    ) -> Self {
        Self {
            pool,
            host,
            paths,
            resolver,
            locks: FileLocks::new(),
            writes: WriteFlag::new(),
        }
    }

    /// The local row a remote resume point competes with
    ///
    /// Rows are keyed by path, but devices often mount the same library under
    /// different paths, so a row with the same content identity counts too.
    pub(crate) async fn local_resume_for(
        &self,
        remote: &ResumePoint,
    ) -> cloudsync_core::Result<Option<ResumePoint>> {
        if let Some(local) = get_resume(&self.pool, &remote.file_path).await? {
            return Ok(Some(local));
        }
        match &remote.content_id {
            Some(id) => find_resume_by_content(&self.pool, id).await,
            None => Ok(None),
        }
    }
}

/// A remote point rewritten onto the local row's path
pub(crate) fn localize(remote: &ResumePoint, local: Option<&ResumePoint>) -> ResumePoint {
    let mut point = remote.clone();
    if let Some(local) = local {
        point.file_path = local.file_path.clone();
        if point.content_id.is_none() {
            point.content_id = local.content_id.clone();
        }
    }
    point
}

/// Identity used in logs for a resume point
pub(crate) fn resume_label(point: &ResumePoint) -> String {
    point
        .content_id
        .as_ref()
        .map(ContentId::to_string)
        .unwrap_or_else(|| point.file_path.clone())
}
