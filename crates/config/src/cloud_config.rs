//! Cloud storage section

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};

/// Which storage backend holds the snapshot
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    /// Dropbox HTTP API with a pre-provisioned access token
    Dropbox,
    /// A local or mounted directory (NAS share, synced folder)
    Folder,
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudProvider::Dropbox => write!(f, "dropbox"),
            CloudProvider::Folder => write!(f, "folder"),
        }
    }
}

/// Snapshot storage settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CloudConfig {
    /// Use cloud storage for snapshot sync
    pub enabled: bool,

    /// Storage backend
    pub provider: CloudProvider,

    /// Dropbox access token
    pub access_token: String,

    /// Remote root for Dropbox, or the directory for the folder provider
    pub folder: String,

    /// Gzip mirrored files before upload
    pub compression: bool,

    /// Timeout for uploads and downloads, in seconds
    pub timeout_secs: u64,

    /// Timeout for metadata calls, in seconds
    pub metadata_timeout_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: CloudProvider::Dropbox,
            access_token: String::new(),
            folder: "/CloudSync".to_string(),
            compression: true,
            timeout_secs: 30,
            metadata_timeout_secs: 10,
        }
    }
}

impl ConfigSection for CloudConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut results = vec![
            Validator::in_range(self.timeout_secs, 1, 300, "cloud.timeout_secs"),
            Validator::in_range(
                self.metadata_timeout_secs,
                1,
                120,
                "cloud.metadata_timeout_secs",
            ),
            Validator::not_empty(&self.folder, "cloud.folder"),
        ];

        if self.enabled && self.provider == CloudProvider::Dropbox {
            results.push(Validator::not_empty(&self.access_token, "cloud.access_token"));
        }

        Validator::collect_errors(results)
    }

    fn merge(&mut self, other: Self) {
        *self = other;
    }

    fn section_name(&self) -> &'static str {
        "cloud"
    }
}
