//! Cache lifecycle and eviction.
//!
//! The engine turns Set/Get/Del into entry statements, evicts the least
//! recently used fraction of entries when the database fills up, and deletes
//! expired entries on request. It holds no lock of its own: the store
//! serialises statements, and purge runs inside a store transaction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::entries::{CacheEntry, PurgeOutcome};
use super::store::EntryStore;
use crate::Error;
use crate::config::{CacheConfig, ConfigError};

/// Number of entries a purge of `fraction` removes from `total`.
pub fn entries_to_purge(total: u64, fraction: f64) -> u64 {
    ((total as f64) * fraction).floor().clamp(0.0, total as f64) as u64
}

fn check_fraction(fraction: f64) -> Result<(), Error> {
    if fraction.is_finite() && (0.0..=1.0).contains(&fraction) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid purge fraction: {fraction}")))
    }
}

/// Engine knobs derived from [`CacheConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    pub timezone: FixedOffset,
    /// Fraction evicted when a write hits a full database.
    pub purge_fraction: f64,
    pub purge_timeout: Duration,
}

impl TryFrom<&CacheConfig> for EngineOptions {
    type Error = ConfigError;

    fn try_from(config: &CacheConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            timezone: config.timezone_offset()?,
            purge_fraction: config.purge_percent,
            purge_timeout: config.purge_timeout(),
        })
    }
}

pub struct CacheEngine<S> {
    store: S,
    clock: Arc<dyn Clock>,
    options: EngineOptions,
}

impl<S: EntryStore> CacheEngine<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>, options: EngineOptions) -> Self {
        Self { store, clock, options }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current instant in the configured timezone.
    pub fn now(&self) -> DateTime<FixedOffset> {
        self.clock.now().with_timezone(&self.options.timezone)
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// A write that fails because the database is full triggers exactly one
    /// purge of the configured fraction followed by exactly one more write.
    /// The second write's error, full or not, goes back to the caller. If
    /// `cancel` fires before the purge or before the retry, the remaining
    /// steps are skipped.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration, cancel: &CancellationToken) -> Result<(), Error> {
        let first = match self.write(key, value, ttl).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_storage_full() => e,
            Err(e) => return Err(e),
        };

        if cancel.is_cancelled() {
            return Err(Error::Cancelled("set"));
        }
        warn!(key, error = %first, "storage full, purging before retry");
        self.purge(self.options.purge_fraction, cancel).await?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled("set"));
        }
        self.write(key, value, ttl)
            .await
            .inspect_err(|e| warn!(key, error = %e, "write failed after purge"))
    }

    async fn write(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), Error> {
        let now = self.now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| Error::InvalidInput(format!("ttl out of range: {ttl:?}")))?;

        self.store.upsert(key, value, now, expires_at).await?;
        debug!(key, bytes = value.len(), expires_at = %expires_at, "set");
        Ok(())
    }

    /// Value for `key`, or `None` when the key is absent or expired.
    ///
    /// A hit refreshes the entry's access time. Failing to do so is logged
    /// and otherwise ignored.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let now = self.now();
        let Some(value) = self.store.get_live(key, now).await? else {
            debug!(key, "miss");
            return Ok(None);
        };

        if let Err(e) = self.store.touch(key, now).await {
            warn!(key, error = %e, "failed to record access");
        }
        debug!(key, "hit");
        Ok(Some(value))
    }

    /// Remove `key`. Missing keys are not an error.
    pub async fn del(&self, key: &str) -> Result<(), Error> {
        let deleted = self.store.delete(key).await?;
        debug!(key, deleted, "del");
        Ok(())
    }

    /// Evict `floor(count * fraction)` least recently accessed entries and
    /// reclaim their space.
    pub async fn purge(&self, fraction: f64, cancel: &CancellationToken) -> Result<PurgeOutcome, Error> {
        check_fraction(fraction)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled("purge"));
        }

        let started = Instant::now();
        let outcome = self.store.purge_lru(fraction, self.options.purge_timeout).await?;
        info!(
            fraction,
            total = outcome.total,
            deleted = outcome.deleted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "purged least recently used entries"
        );
        Ok(outcome)
    }

    /// Delete every entry whose expiry is at or before now.
    pub async fn reclaim_expired(&self) -> Result<u64, Error> {
        let deleted = self.store.delete_expired(self.now()).await?;
        if deleted > 0 {
            info!(deleted, "reclaimed expired entries");
        } else {
            debug!("no expired entries");
        }
        Ok(deleted)
    }

    /// Stored rows, counting expired ones until they are swept.
    pub async fn len(&self) -> Result<u64, Error> {
        self.store.count().await
    }

    /// Full entry for a live key, timestamps in the configured timezone.
    pub async fn inspect(&self, key: &str) -> Result<Option<CacheEntry>, Error> {
        self.store.inspect(key, self.now(), self.options.timezone).await
    }
}
