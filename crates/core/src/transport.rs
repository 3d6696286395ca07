//! Cloud storage and publish/subscribe transports

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Remote name of the relational snapshot
pub const SNAPSHOT_NAME: &str = "cloudsync.db";

/// Prefix for mirrored host configuration files
pub const USERDATA_PREFIX: &str = "userdata/";

/// Suffix of compressed remote files
pub const COMPRESSED_SUFFIX: &str = ".gz";

/// Name of the backup kept when `name` is overwritten
///
/// The `old_` prefix goes on the last path segment:
/// `userdata/sources.xml` becomes `userdata/old_sources.xml`.
pub fn backup_name(name: &str) -> String {
    match name.rsplit_once('/') {
        Some((dir, file)) => format!("{}/old_{}", dir, file),
        None => format!("old_{}", name),
    }
}

/// Passive remote storage holding the snapshot and mirrored files
///
/// Every call fails closed: errors are logged by the implementation and
/// reported as `false`/`None`, never raised past the sync layer. Only
/// `try_download` reports a transport failure, so callers that must not
/// mistake an unreachable provider for an empty one can tell them apart.
#[async_trait]
pub trait CloudStorage: Send + Sync {
    /// Provider name for logs
    fn provider(&self) -> &str;

    /// Stores `bytes` under `name`, keeping the previous version as `old_<name>`
    async fn upload(&self, name: &str, bytes: &[u8]) -> bool;

    /// Fetches `name`, falling back to `old_<name>` when it is missing
    ///
    /// `Ok(None)` when neither exists, `Err` when the provider could not
    /// answer.
    async fn try_download(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Fail-closed form of `try_download`
    async fn download(&self, name: &str) -> Option<Vec<u8>> {
        match self.try_download(name).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Download of {} from {} failed: {}", name, self.provider(), e);
                None
            }
        }
    }

    /// Checks whether `name` exists
    async fn exists(&self, name: &str) -> bool;

    /// Ensures the sync folder exists
    async fn create_folder(&self) -> bool;
}

/// Delivery guarantee requested from the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// How a message is delivered and how long it stays relevant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub qos: QosLevel,
    pub retain: bool,
    /// Receivers drop messages older than this
    pub expiry: Option<Duration>,
}

/// Outbound side of the publish/subscribe broker
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes one payload
    async fn publish(&self, topic: &str, payload: Vec<u8>, delivery: Delivery) -> Result<()>;

    /// True while a broker session is up
    fn is_connected(&self) -> bool;
}

/// Inbound side of the publish/subscribe broker
///
/// Called once per message from the broker connection task. Implementations
/// catch their own failures so one bad message cannot stop the loop.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Topic filters to subscribe to after every (re)connect
    fn subscriptions(&self) -> Vec<String>;

    /// A broker session was established
    async fn on_connected(&self);

    /// A message arrived on a subscribed topic
    async fn on_message(&self, topic: &str, payload: &[u8]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_name() {
        assert_eq!(backup_name("cloudsync.db"), "old_cloudsync.db");
        assert_eq!(
            backup_name("userdata/sources.xml.gz"),
            "userdata/old_sources.xml.gz"
        );
    }
}
