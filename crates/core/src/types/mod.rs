//! Domain types for CloudSync
//!
//! This module contains the replicated data model:
//! - `content`: Content identity and media kinds
//! - `watched`: Watched state per item
//! - `resume`: Resume positions per file
//! - `favorite`: Favorites entries and action descriptors
//! - `device`: Device identity
//! - `strategy`: Conflict resolution strategies
//! - `common`: Timestamps and validation

mod common;
mod content;
mod device;
mod favorite;
mod resume;
mod strategy;
mod watched;

pub use common::{Timestamp, Validator};
pub use content::{sanitize_topic_level, ContentId, MediaKind};
pub use device::DeviceId;
pub use favorite::{ActionDescriptor, FavoriteEntry, KNOWN_PROTOCOLS};
pub use resume::{ResumePoint, POSITION_TOLERANCE_SECS};
pub use strategy::ConflictStrategy;
pub use watched::{WatchedItem, LAST_PLAYED_FORMAT};
