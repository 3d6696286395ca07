//! Dropbox HTTP API v2 storage
//!
//! Uses a pre-provisioned access token; token refresh and OAuth flows are
//! left to the user's Dropbox app console.

use crate::client::{Client, ClientConfig};
use crate::error::{NetworkError, NetworkResult};
use async_trait::async_trait;
use cloudsync_core::transport::backup_name;
use cloudsync_core::{AppError, CloudStorage, Result as CoreResult};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const API_URL: &str = "https://api.dropboxapi.com/2";
const CONTENT_URL: &str = "https://content.dropboxapi.com/2";

/// Connection settings for `DropboxStorage`
#[derive(Debug, Clone)]
pub struct DropboxSettings {
    pub access_token: String,
    /// Remote root, e.g. `/CloudSync`
    pub folder: String,
    /// Timeout for uploads and downloads
    pub transfer_timeout: Duration,
    /// Timeout for metadata, move and folder calls
    pub metadata_timeout: Duration,
}

impl DropboxSettings {
    pub fn new(access_token: impl Into<String>, folder: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            folder: folder.into(),
            transfer_timeout: Duration::from_secs(30),
            metadata_timeout: Duration::from_secs(10),
        }
    }
}

/// `CloudStorage` backed by a Dropbox app folder
pub struct DropboxStorage {
    transfer: Client,
    metadata: Client,
    token: String,
    root: String,
    api_url: String,
    content_url: String,
    folder_ready: AtomicBool,
}

impl DropboxStorage {
    pub fn new(settings: DropboxSettings) -> NetworkResult<Self> {
        Self::with_endpoints(settings, API_URL, CONTENT_URL)
    }

    /// Creates a client against custom API endpoints
    pub fn with_endpoints(
        settings: DropboxSettings,
        api_url: impl Into<String>,
        content_url: impl Into<String>,
    ) -> NetworkResult<Self> {
        Ok(Self {
            transfer: Client::with_config(ClientConfig::single_attempt(settings.transfer_timeout))?,
            metadata: Client::with_config(ClientConfig::single_attempt(settings.metadata_timeout))?,
            token: settings.access_token,
            root: normalize_root(&settings.folder),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            content_url: content_url.into().trim_end_matches('/').to_string(),
            folder_ready: AtomicBool::new(false),
        })
    }

    /// Full Dropbox path of a remote name
    pub fn remote_path(&self, name: &str) -> String {
        format!("{}/{}", self.root, name.trim_start_matches('/'))
    }

    /// Display name of the account owning the token
    ///
    /// Used to check the credentials without touching any file.
    pub async fn account_name(&self) -> NetworkResult<String> {
        let url = format!("{}/users/get_current_account", self.api_url);
        let response = self
            .metadata
            .send(|http| http.post(&url).bearer_auth(&self.token))
            .await?;
        let account: Value = response.json().await?;
        account
            .pointer("/name/display_name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| NetworkError::UnexpectedResponse {
                method: "users/get_current_account".to_string(),
                reason: "missing display name".to_string(),
            })
    }

    async fn rpc(&self, endpoint: &str, body: Value) -> NetworkResult<Value> {
        let url = format!("{}/{}", self.api_url, endpoint);
        let response = self
            .metadata
            .send(|http| http.post(&url).bearer_auth(&self.token).json(&body))
            .await?;
        Ok(response.json().await?)
    }

    async fn put(&self, name: &str, bytes: &[u8]) -> NetworkResult<()> {
        let url = format!("{}/files/upload", self.content_url);
        let arg = api_arg(&json!({
            "path": self.remote_path(name),
            "mode": "overwrite",
            "mute": true,
        }));
        self.transfer
            .send(|http| {
                http.post(&url)
                    .bearer_auth(&self.token)
                    .header("Dropbox-API-Arg", arg.as_str())
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(bytes.to_vec())
            })
            .await?;
        Ok(())
    }

    async fn fetch(&self, name: &str) -> NetworkResult<Option<Vec<u8>>> {
        let url = format!("{}/files/download", self.content_url);
        let arg = api_arg(&json!({ "path": self.remote_path(name) }));
        let result = self
            .transfer
            .send(|http| {
                http.post(&url)
                    .bearer_auth(&self.token)
                    .header("Dropbox-API-Arg", arg.as_str())
            })
            .await;

        match result {
            Ok(response) => Ok(Some(response.bytes().await?.to_vec())),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Moves the current file to its backup name, replacing an older backup
    async fn rotate_backup(&self, name: &str) {
        let backup = self.remote_path(&backup_name(name));
        if let Err(e) = self.rpc("files/delete_v2", json!({ "path": backup })).await {
            if !is_not_found(&e) {
                log::debug!("Could not delete {}: {}", backup, e);
            }
        }
        let moved = self
            .rpc(
                "files/move_v2",
                json!({
                    "from_path": self.remote_path(name),
                    "to_path": backup,
                    "autorename": false,
                }),
            )
            .await;
        if let Err(e) = moved {
            if !is_not_found(&e) {
                log::debug!("Could not back up {}: {}", name, e);
            }
        }
    }

    async fn ensure_folder(&self) -> NetworkResult<()> {
        if self.folder_ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        match self
            .rpc("files/create_folder_v2", json!({ "path": self.root, "autorename": false }))
            .await
        {
            Ok(_) => {}
            Err(NetworkError::Status { status: 409, .. }) => {}
            Err(e) => return Err(e),
        }
        self.folder_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unavailable(&self, err: NetworkError) -> AppError {
        AppError::StorageUnavailable {
            provider: "dropbox".to_string(),
            reason: err.to_string(),
        }
    }

    fn log_failure(&self, operation: &str, name: &str, err: &NetworkError) {
        if err.is_unauthorized() {
            log::error!("Dropbox rejected the access token during {} of {}", operation, name);
        } else {
            log::error!("Dropbox {} of {} failed: {}", operation, name, err);
        }
    }
}

#[async_trait]
impl CloudStorage for DropboxStorage {
    fn provider(&self) -> &str {
        "dropbox"
    }

    async fn upload(&self, name: &str, bytes: &[u8]) -> bool {
        if let Err(e) = self.ensure_folder().await {
            self.log_failure("folder check", name, &e);
            return false;
        }
        self.rotate_backup(name).await;
        match self.put(name, bytes).await {
            Ok(()) => {
                log::debug!("Uploaded {} ({} bytes)", name, bytes.len());
                true
            }
            Err(e) => {
                self.log_failure("upload", name, &e);
                false
            }
        }
    }

    async fn try_download(&self, name: &str) -> CoreResult<Option<Vec<u8>>> {
        match self.fetch(name).await {
            Ok(Some(bytes)) => return Ok(Some(bytes)),
            Ok(None) => {}
            Err(e) => {
                self.log_failure("download", name, &e);
                return Err(self.unavailable(e));
            }
        }

        let backup = backup_name(name);
        match self.fetch(&backup).await {
            Ok(Some(bytes)) => {
                log::info!("{} missing on Dropbox, restoring from {}", name, backup);
                if let Err(e) = self.put(name, &bytes).await {
                    self.log_failure("restore", name, &e);
                }
                Ok(Some(bytes))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.log_failure("download", &backup, &e);
                Err(self.unavailable(e))
            }
        }
    }

    async fn exists(&self, name: &str) -> bool {
        match self
            .rpc("files/get_metadata", json!({ "path": self.remote_path(name) }))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                if !is_not_found(&e) {
                    self.log_failure("metadata", name, &e);
                }
                false
            }
        }
    }

    async fn create_folder(&self) -> bool {
        match self.ensure_folder().await {
            Ok(()) => true,
            Err(e) => {
                self.log_failure("folder creation", &self.root, &e);
                false
            }
        }
    }
}

fn normalize_root(folder: &str) -> String {
    let trimmed = folder.trim().trim_matches('/');
    format!("/{}", trimmed)
}

/// True for Dropbox's "path not found" answers
fn is_not_found(err: &NetworkError) -> bool {
    match err {
        NetworkError::Status { status: 404, .. } => true,
        NetworkError::Status { status: 409, body } => body.contains("not_found"),
        _ => false,
    }
}

/// Encodes a `Dropbox-API-Arg` header value
///
/// HTTP headers must be ASCII, so every other character is written as a
/// JSON `\uXXXX` escape (surrogate pairs above the BMP).
fn api_arg(value: &Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}
