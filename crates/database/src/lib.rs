//! CloudSync Local State Store
//!
//! The device's merged view of watched items and resume points, kept in
//! SQLite through sqlx. Every row also remembers the value last seen on the
//! host, which is how pulls detect local changes and pushes find the rows
//! the host has not received yet.

pub mod connection;
pub mod migrations;
pub mod queries;
pub mod snapshot;

pub use connection::{open_in_memory, open_store, DbPool, OpenedStore, STORE_FILE};
pub use migrations::{current_version, optimize, run_migrations, verify_integrity};
pub use snapshot::{export_snapshot, read_snapshot, RemoteSnapshot};
