//! Unified error types for litecache.
//!
//! Display strings carry a stable upper-case code prefix so callers and
//! log pipelines can match on the category without parsing the rest.

use std::time::Duration;

use tokio_rusqlite::rusqlite;

use crate::config::ConfigError;

/// Unified error type for the cache.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., purge fraction outside `[0, 1]`).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// No live entry for the given key.
    ///
    /// [`crate::Cache::get`] reports misses as `Ok(None)`; this variant is for
    /// surfaces that have to turn a miss into a failure.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// The store refused a write because the database reached its size limit.
    #[error("STORAGE_FULL: {op}: {source}")]
    StorageFull {
        op: &'static str,
        #[source]
        source: tokio_rusqlite::Error,
    },

    /// A storage operation failed.
    #[error("CACHE_ERROR: {op}: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: tokio_rusqlite::Error,
    },

    /// Database operation failed outside of a named operation.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A purge ran past its deadline and was rolled back.
    #[error("PURGE_TIMEOUT: purge exceeded {0:?}")]
    PurgeTimeout(Duration),

    /// The caller's cancellation token fired before the operation could proceed.
    #[error("CANCELLED: {0}")]
    Cancelled(&'static str),

    /// Configuration was rejected.
    #[error("CONFIG_ERROR: {0}")]
    Config(#[from] ConfigError),

    /// Filesystem operation on the database file failed.
    #[error("IO_ERROR: {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Scheduler misuse (registering after stop, zero interval).
    #[error("SCHEDULE_ERROR: {0}")]
    Schedule(String),
}

impl Error {
    /// Tag a raw database error with the operation that produced it.
    ///
    /// This is also where storage-full conditions are split out from other
    /// storage failures. Errors that already carry context pass through.
    pub fn with_op(self, op: &'static str) -> Self {
        match self {
            Error::Database(source) if is_full(&source) => Error::StorageFull { op, source },
            Error::Database(source) => Error::Storage { op, source },
            other => other,
        }
    }

    /// Whether this error means the database has no room left for the write.
    pub fn is_storage_full(&self) -> bool {
        match self {
            Error::StorageFull { .. } => true,
            Error::Database(source) | Error::Storage { source, .. } => is_full(source),
            _ => false,
        }
    }
}

fn is_full(err: &tokio_rusqlite::Error) -> bool {
    if matches!(err, tokio_rusqlite::Error::Error(inner) if inner.sqlite_error_code() == Some(rusqlite::ErrorCode::DiskFull))
    {
        return true;
    }

    let message = err.to_string();
    message.contains("database or disk is full") || message.contains("disk is full")
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

#[cfg(test)]
pub(crate) fn disk_full() -> Error {
    let inner = rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
        Some("database or disk is full".to_string()),
    );
    Error::from(inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::CacheMiss("session:1".to_string());
        assert!(err.to_string().contains("CACHE_MISS"));
        assert!(err.to_string().contains("session:1"));
    }

    #[test]
    fn test_with_op_classifies_full() {
        let err = disk_full().with_op("upsert entry");
        assert!(matches!(err, Error::StorageFull { op: "upsert entry", .. }));
        assert!(err.is_storage_full());
        assert!(err.to_string().starts_with("STORAGE_FULL: upsert entry"));
    }

    #[test]
    fn test_with_op_keeps_generic_errors_apart() {
        let err = Error::from(rusqlite::Error::QueryReturnedNoRows).with_op("get entry");
        assert!(matches!(err, Error::Storage { op: "get entry", .. }));
        assert!(!err.is_storage_full());
    }

    #[test]
    fn test_full_detected_from_message_text() {
        let inner = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
            Some("database or disk is full".to_string()),
        );
        assert!(Error::from(inner).is_storage_full());
    }

    #[test]
    fn test_with_op_passes_through_tagged_errors() {
        let err = Error::InvalidInput("bad".into()).with_op("purge");
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
