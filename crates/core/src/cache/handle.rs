//! The cache handle applications hold.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::clock::{Clock, SystemClock};
use super::connection::{CacheDb, StorageOptions};
use super::engine::{CacheEngine, EngineOptions};
use super::entries::{CacheEntry, PurgeOutcome};
use super::maintenance::Maintenance;
use crate::Error;
use crate::config::CacheConfig;

/// An open cache.
///
/// Opening starts a background sweep of expired entries that runs until
/// [`close`](Self::close) or [`destroy`](Self::destroy). Dropping the handle
/// without either halts the sweep but leaves the connection to close on its
/// own.
pub struct Cache {
    engine: Arc<CacheEngine<CacheDb>>,
    maintenance: Maintenance,
    config: CacheConfig,
}

impl Cache {
    /// Open (or create) the database at `config.db_path`.
    pub async fn open(config: CacheConfig) -> Result<Self, Error> {
        Self::open_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Like [`open`](Self::open) with a caller-supplied time source.
    pub async fn open_with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        config.validate()?;
        let db = CacheDb::open(&config.db_path, &StorageOptions::from(&config)).await?;
        Self::assemble(db, config, clock)
    }

    /// A throwaway cache backed by an in-memory database, on a caller-supplied
    /// time source. `db_path` is ignored.
    pub async fn open_in_memory(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        config.validate()?;
        let db = CacheDb::open_in_memory(&StorageOptions::from(&config)).await?;
        Self::assemble(db, config, clock)
    }

    fn assemble(db: CacheDb, config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        let options = EngineOptions::try_from(&config)?;
        let engine = Arc::new(CacheEngine::new(db, clock, options));
        let maintenance = Maintenance::new(Arc::clone(&engine), config.sync_interval())?;
        maintenance.start();

        info!(
            path = ?engine.store().path(),
            sync_interval_secs = config.sync_interval_secs,
            timezone = %options.timezone,
            "cache opened"
        );
        Ok(Self { engine, maintenance, config })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store `value` under `key` for `ttl`, purging once if the database is full.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), Error> {
        self.engine.set(key, value, ttl, &CancellationToken::new()).await
    }

    /// [`set`](Self::set) that gives up before purging, or before retrying,
    /// once `cancel` fires.
    pub async fn set_with_cancel(
        &self, key: &str, value: &[u8], ttl: Duration, cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.engine.set(key, value, ttl, cancel).await
    }

    /// Value for `key`, or `None` when absent or expired.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        self.engine.get(key).await
    }

    pub async fn del(&self, key: &str) -> Result<(), Error> {
        self.engine.del(key).await
    }

    /// Evict the least recently used `fraction` of entries.
    pub async fn purge(&self, fraction: f64) -> Result<PurgeOutcome, Error> {
        self.engine.purge(fraction, &CancellationToken::new()).await
    }

    /// [`purge`](Self::purge) that does nothing if `cancel` has already fired.
    pub async fn purge_with_cancel(&self, fraction: f64, cancel: &CancellationToken) -> Result<PurgeOutcome, Error> {
        self.engine.purge(fraction, cancel).await
    }

    /// Sweep expired entries now instead of waiting for the next tick.
    pub async fn reclaim_expired(&self) -> Result<u64, Error> {
        self.engine.reclaim_expired().await
    }

    /// Stored rows, including expired ones not yet swept.
    pub async fn len(&self) -> Result<u64, Error> {
        self.engine.len().await
    }

    pub async fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len().await? == 0)
    }

    pub async fn inspect(&self, key: &str) -> Result<Option<CacheEntry>, Error> {
        self.engine.inspect(key).await
    }

    pub fn maintenance_task_count(&self) -> usize {
        self.maintenance.active_task_count()
    }

    /// Stop maintenance and close the database. Data stays on disk.
    pub async fn close(self) -> Result<(), Error> {
        self.maintenance.stop().await;
        self.engine.store().close().await?;
        info!("cache closed");
        Ok(())
    }

    /// Stop maintenance, close the database and delete its files.
    pub async fn destroy(self) -> Result<(), Error> {
        self.maintenance.stop().await;
        self.engine.store().destroy().await?;
        info!(path = ?self.config.db_path, "cache destroyed");
        Ok(())
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        self.maintenance.halt();
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    use super::*;
    use crate::cache::clock::ManualClock;

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap())
    }

    async fn memory_cache(clock: &ManualClock) -> Cache {
        Cache::open_in_memory(CacheConfig::default(), Arc::new(clock.clone())).await.unwrap()
    }

    #[tokio::test]
    async fn test_session_expires() {
        let clock = clock();
        let cache = memory_cache(&clock).await;

        cache.set("session:1", b"abc", Duration::from_secs(10)).await.unwrap();
        assert_eq!(cache.get("session:1").await.unwrap().as_deref(), Some(&b"abc"[..]));

        clock.advance(ChronoDuration::seconds(11));
        assert!(cache.get("session:1").await.unwrap().is_none());
        cache.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_starts_maintenance() {
        let clock = clock();
        let cache = memory_cache(&clock).await;
        assert_eq!(cache.maintenance_task_count(), 1);
        cache.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let config = CacheConfig { purge_percent: 1.5, ..CacheConfig::default() };
        let result = Cache::open_in_memory(config, Arc::new(clock())).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_purge_with_cancelled_token() {
        let clock = clock();
        let cache = memory_cache(&clock).await;
        cache.set("k", b"v", Duration::from_secs(60)).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = cache.purge_with_cancel(1.0, &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert_eq!(cache.len().await.unwrap(), 1);
        cache.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_validates_fraction() {
        let clock = clock();
        let cache = memory_cache(&clock).await;
        assert!(matches!(cache.purge(-0.1).await, Err(Error::InvalidInput(_))));
        assert!(cache.is_empty().await.unwrap());
        cache.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_token_only_gates_remediation() {
        let clock = clock();
        let cache = memory_cache(&clock).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        cache.set_with_cancel("k", b"v", Duration::from_secs(60), &cancel).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some(&b"v"[..]));
        cache.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_destroy_removes_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");
        let config = CacheConfig { db_path: path.clone(), ..CacheConfig::default() };

        let cache = Cache::open_with_clock(config, Arc::new(clock())).await.unwrap();
        cache.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        assert!(path.exists());

        cache.destroy().await.unwrap();
        assert!(!path.exists());
    }
}
