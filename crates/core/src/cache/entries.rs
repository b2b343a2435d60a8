//! Cache entry statements.
//!
//! One parameterized statement per logical operation against the
//! `cache_entries` table. Timestamps are bound as Unix epoch milliseconds;
//! callers hand in zoned `DateTime`s and get zoned values back.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use super::connection::CacheDb;
use super::engine::entries_to_purge;
use crate::Error;
use chrono::{DateTime, FixedOffset, TimeZone};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, TransactionBehavior};

/// Gap between interrupts while a timed-out purge unwinds.
const INTERRUPT_RESEND: Duration = Duration::from_millis(1);

/// A stored cache entry with its bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub created_at: DateTime<FixedOffset>,
    pub expires_at: DateTime<FixedOffset>,
    pub last_accessed_at: DateTime<FixedOffset>,
}

/// Result of an LRU purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PurgeOutcome {
    /// Entries present when the purge transaction started.
    pub total: u64,
    /// Entries removed.
    pub deleted: u64,
}

/// Count every row, expired or not.
pub(crate) fn count_entries(conn: &rusqlite::Connection) -> rusqlite::Result<u64> {
    conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get::<_, i64>(0))
        .map(|n| n as u64)
}

/// Delete the `limit` least recently accessed rows.
pub(crate) fn delete_oldest(conn: &rusqlite::Connection, limit: u64) -> rusqlite::Result<u64> {
    let deleted = conn.execute(
        "DELETE FROM cache_entries WHERE key IN (
            SELECT key FROM cache_entries ORDER BY last_accessed_at ASC LIMIT ?1
        )",
        params![limit as i64],
    )?;
    Ok(deleted as u64)
}

fn purge_in_transaction(conn: &mut rusqlite::Connection, fraction: f64) -> Result<PurgeOutcome, Error> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let total = count_entries(&tx)?;
    let target = entries_to_purge(total, fraction);
    if target == 0 {
        tx.commit()?;
        return Ok(PurgeOutcome { total, deleted: 0 });
    }

    let deleted = delete_oldest(&tx, target)?;
    tx.commit()?;

    // VACUUM refuses to run inside a transaction; it runs on the same
    // connection call so nothing can write between the commit and the rebuild.
    conn.execute_batch("VACUUM;")?;

    Ok(PurgeOutcome { total, deleted })
}

fn from_millis(ms: i64, tz: &FixedOffset) -> rusqlite::Result<DateTime<FixedOffset>> {
    tz.timestamp_millis_opt(ms).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            format!("timestamp out of range: {ms}").into(),
        )
    })
}

impl CacheDb {
    /// Insert or update an entry.
    ///
    /// On conflict the value, expiry and access time are replaced in one
    /// statement; `created_at` keeps the first insert's time.
    pub async fn upsert_entry(
        &self, key: &str, value: &[u8], now: DateTime<FixedOffset>, expires_at: DateTime<FixedOffset>,
    ) -> Result<(), Error> {
        let key = key.to_string();
        let value = value.to_vec();
        let now = now.timestamp_millis();
        let expires_at = expires_at.timestamp_millis();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO cache_entries (key, value, created_at, expires_at, last_accessed_at)
                     VALUES (?1, ?2, ?3, ?4, ?3)
                     ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        expires_at = excluded.expires_at,
                        last_accessed_at = excluded.last_accessed_at",
                    params![key, value, now, expires_at],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| Error::from(e).with_op("upsert entry"))
    }

    /// Get the value for a key if it has not expired at `now`.
    pub async fn get_live_value(&self, key: &str, now: DateTime<FixedOffset>) -> Result<Option<Vec<u8>>, Error> {
        let key = key.to_string();
        let now = now.timestamp_millis();
        self.conn
            .call(move |conn| -> Result<Option<Vec<u8>>, Error> {
                let value = conn
                    .query_row(
                        "SELECT value FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
                        params![key, now],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await
            .map_err(|e| Error::from(e).with_op("get entry"))
    }

    /// Record an access.
    pub async fn touch_entry(&self, key: &str, now: DateTime<FixedOffset>) -> Result<(), Error> {
        let key = key.to_string();
        let now = now.timestamp_millis();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute("UPDATE cache_entries SET last_accessed_at = ?1 WHERE key = ?2", params![now, key])?;
                Ok(())
            })
            .await
            .map_err(|e| Error::from(e).with_op("touch entry"))
    }

    /// Delete a key. Returns the number of rows removed (0 or 1).
    pub async fn delete_entry(&self, key: &str) -> Result<u64, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                Ok(count as u64)
            })
            .await
            .map_err(|e| Error::from(e).with_op("delete entry"))
    }

    /// Number of stored rows, including expired ones not yet swept.
    pub async fn count_entries(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> { Ok(count_entries(conn)?) })
            .await
            .map_err(|e| Error::from(e).with_op("count entries"))
    }

    /// Delete every entry with `expires_at <= now`.
    ///
    /// Returns the number of deleted entries.
    pub async fn delete_expired(&self, now: DateTime<FixedOffset>) -> Result<u64, Error> {
        let now = now.timestamp_millis();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM cache_entries WHERE expires_at <= ?1", params![now])?;
                Ok(count as u64)
            })
            .await
            .map_err(|e| Error::from(e).with_op("delete expired entries"))
    }

    /// Full row for a live key, with timestamps rendered in `tz`.
    pub async fn get_entry(
        &self, key: &str, now: DateTime<FixedOffset>, tz: FixedOffset,
    ) -> Result<Option<CacheEntry>, Error> {
        let key = key.to_string();
        let now = now.timestamp_millis();
        self.conn
            .call(move |conn| -> Result<Option<CacheEntry>, Error> {
                let entry = conn
                    .query_row(
                        "SELECT key, value, created_at, expires_at, last_accessed_at
                         FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
                        params![key, now],
                        |row| {
                            Ok(CacheEntry {
                                key: row.get(0)?,
                                value: row.get(1)?,
                                created_at: from_millis(row.get(2)?, &tz)?,
                                expires_at: from_millis(row.get(3)?, &tz)?,
                                last_accessed_at: from_millis(row.get(4)?, &tz)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(entry)
            })
            .await
            .map_err(|e| Error::from(e).with_op("inspect entry"))
    }

    /// Evict `floor(count * fraction)` least recently accessed entries and
    /// vacuum, bounded by `timeout`.
    ///
    /// Counting and deleting share one immediate transaction. If the deadline
    /// passes while the work is running, the running statement is
    /// interrupted, the transaction rolls back and `Error::PurgeTimeout` is
    /// returned.
    pub async fn purge_lru(&self, fraction: f64, timeout: Duration) -> Result<PurgeOutcome, Error> {
        let deadline = Instant::now() + timeout;
        let purging = Arc::clone(&self.purging);

        let work = self.conn.call(move |conn| -> Result<PurgeOutcome, Error> {
            // The flag goes up before the deadline check: once the timer side
            // sees it down, this closure is bound to observe the deadline.
            purging.store(true, Ordering::SeqCst);
            if Instant::now() >= deadline {
                purging.store(false, Ordering::SeqCst);
                return Err(Error::PurgeTimeout(timeout));
            }
            let outcome = purge_in_transaction(conn, fraction);
            purging.store(false, Ordering::SeqCst);
            outcome
        });
        tokio::pin!(work);

        if let Ok(result) = tokio::time::timeout(timeout, &mut work).await {
            return result.map_err(|e| Error::from(e).with_op("purge entries"));
        }

        tracing::warn!(timeout_ms = timeout.as_millis() as u64, "purge deadline exceeded");
        // An interrupt sent between statements is a no-op in SQLite, so keep
        // sending until the connection thread has unwound.
        let mut resend = tokio::time::interval(INTERRUPT_RESEND);
        loop {
            tokio::select! {
                result = &mut work => {
                    return match result {
                        Ok(outcome) => Ok(outcome),
                        Err(_) => Err(Error::PurgeTimeout(timeout)),
                    };
                }
                _ = resend.tick() => {
                    self.interrupt_purge();
                }
            }
        }
    }
}
