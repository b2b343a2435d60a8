//! SQLite-backed key-value cache.
//!
//! Entries carry a TTL and an access time. Reads never see expired entries,
//! a background job sweeps them out, and a write that finds the database
//! full evicts the least recently used fraction once before trying again.
//!
//! - [`connection`] owns the SQLite connection, pragmas and file lifecycle
//! - [`entries`] holds one statement per entry operation
//! - [`engine`] implements the cache semantics against [`EntryStore`]
//! - [`maintenance`] runs the periodic expiry sweep
//! - [`Cache`] ties them together

pub mod clock;
pub mod connection;
pub mod engine;
pub mod entries;
mod handle;
pub mod maintenance;
pub mod migrations;
pub mod store;

pub use crate::Error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::{CacheDb, StorageOptions};
pub use engine::{CacheEngine, EngineOptions};
pub use entries::{CacheEntry, PurgeOutcome};
pub use handle::Cache;
pub use maintenance::{Maintenance, MaintenanceState};
pub use store::EntryStore;
