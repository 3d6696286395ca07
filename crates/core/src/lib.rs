//! Shared domain model for CloudSync
//!
//! Types replicated between devices, the common error type, the favorites
//! file codec, and the traits the sync engine uses to reach the host
//! application, cloud storage and the event broker.

pub mod error;
pub mod favorites;
pub mod host;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use error::{AppError, ErrorSeverity, RecoveryAction, Result};
pub use host::{HostPaths, MediaHost};
pub use transport::{CloudStorage, Delivery, EventBus, MessageHandler, QosLevel};
pub use types::{
    ActionDescriptor, ConflictStrategy, ContentId, DeviceId, FavoriteEntry, MediaKind,
    ResumePoint, Timestamp, WatchedItem,
};
