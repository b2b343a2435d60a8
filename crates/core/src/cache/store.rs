//! The storage seam the cache engine is written against.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use super::connection::CacheDb;
use super::entries::{CacheEntry, PurgeOutcome};
use crate::Error;

/// Entry-level storage operations.
///
/// [`CacheDb`] is the production implementation; tests wrap it to inject
/// failures. Implementations must tag errors with [`Error::with_op`] so
/// storage-full conditions surface as [`Error::StorageFull`].
#[async_trait]
pub trait EntryStore: Send + Sync + 'static {
    async fn upsert(
        &self, key: &str, value: &[u8], now: DateTime<FixedOffset>, expires_at: DateTime<FixedOffset>,
    ) -> Result<(), Error>;

    async fn get_live(&self, key: &str, now: DateTime<FixedOffset>) -> Result<Option<Vec<u8>>, Error>;

    async fn touch(&self, key: &str, now: DateTime<FixedOffset>) -> Result<(), Error>;

    async fn delete(&self, key: &str) -> Result<u64, Error>;

    async fn count(&self) -> Result<u64, Error>;

    async fn delete_expired(&self, now: DateTime<FixedOffset>) -> Result<u64, Error>;

    async fn purge_lru(&self, fraction: f64, timeout: Duration) -> Result<PurgeOutcome, Error>;

    async fn inspect(&self, key: &str, now: DateTime<FixedOffset>, tz: FixedOffset)
    -> Result<Option<CacheEntry>, Error>;
}

#[async_trait]
impl EntryStore for CacheDb {
    async fn upsert(
        &self, key: &str, value: &[u8], now: DateTime<FixedOffset>, expires_at: DateTime<FixedOffset>,
    ) -> Result<(), Error> {
        self.upsert_entry(key, value, now, expires_at).await
    }

    async fn get_live(&self, key: &str, now: DateTime<FixedOffset>) -> Result<Option<Vec<u8>>, Error> {
        self.get_live_value(key, now).await
    }

    async fn touch(&self, key: &str, now: DateTime<FixedOffset>) -> Result<(), Error> {
        self.touch_entry(key, now).await
    }

    async fn delete(&self, key: &str) -> Result<u64, Error> {
        self.delete_entry(key).await
    }

    async fn count(&self) -> Result<u64, Error> {
        self.count_entries().await
    }

    async fn delete_expired(&self, now: DateTime<FixedOffset>) -> Result<u64, Error> {
        CacheDb::delete_expired(self, now).await
    }

    async fn purge_lru(&self, fraction: f64, timeout: Duration) -> Result<PurgeOutcome, Error> {
        CacheDb::purge_lru(self, fraction, timeout).await
    }

    async fn inspect(
        &self, key: &str, now: DateTime<FixedOffset>, tz: FixedOffset,
    ) -> Result<Option<CacheEntry>, Error> {
        self.get_entry(key, now, tz).await
    }
}
