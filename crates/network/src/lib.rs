// crates/network/src/lib.rs
//! Transports for CloudSync
//!
//! An HTTP client with retry and circuit breaking, the cloud storage
//! providers, the Kodi JSON-RPC host and the MQTT event bus.

mod client;
mod dropbox;
mod error;
mod folder;
mod kodi;
mod memory;
mod mqtt;

pub use client::{Client, ClientConfig};
pub use dropbox::{DropboxSettings, DropboxStorage};
pub use error::{NetworkError, NetworkResult};
pub use folder::FolderStorage;
pub use kodi::{candidate_userdata_dirs, KodiHost, KodiSettings};
pub use memory::MemoryStorage;
pub use mqtt::{MqttBus, MqttSettings, Will};
