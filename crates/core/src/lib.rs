//! Embedded key-value cache on top of SQLite.
//!
//! This crate provides:
//! - [`Cache`], a TTL cache with LRU eviction when the database fills up
//! - Layered configuration via [`CacheConfig`]
//! - A small interval scheduler for background maintenance
//! - Unified error types

pub mod cache;
pub mod config;
pub mod error;
pub mod schedule;

pub use cache::{Cache, CacheEntry, Clock, ManualClock, PurgeOutcome, SystemClock};
pub use config::{CacheConfig, ConfigError};
pub use error::Error;
