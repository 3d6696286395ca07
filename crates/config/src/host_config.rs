//! Host application section

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How to reach the media center
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,

    /// HTTP user name
    pub username: String,

    /// HTTP password
    pub password: String,

    /// Userdata directory; probed from well-known locations when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userdata_dir: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8080/jsonrpc".to_string(),
            username: "kodi".to_string(),
            password: String::new(),
            userdata_dir: None,
        }
    }
}

impl ConfigSection for HostConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let results = vec![
            Validator::not_empty(&self.rpc_url, "host.rpc_url"),
            Validator::starts_with_any(&self.rpc_url, &["http://", "https://"], "host.rpc_url"),
        ];

        Validator::collect_errors(results)
    }

    fn merge(&mut self, other: Self) {
        let userdata_dir = other.userdata_dir.or_else(|| self.userdata_dir.take());
        *self = Self {
            userdata_dir,
            ..other
        };
    }

    fn section_name(&self) -> &'static str {
        "host"
    }
}
