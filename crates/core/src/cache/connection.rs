//! Database connection management with pragma configuration.
//!
//! This module handles opening the SQLite database, applying the sizing and
//! durability pragmas (WAL mode, page size, cache size, size ceiling), and
//! running migrations. It also owns the file-level lifecycle: vacuum, close,
//! and destroy.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::migrations;
use crate::Error;
use crate::config::CacheConfig;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::InterruptHandle;

/// Store-level tuning applied once when the database is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageOptions {
    pub page_size: u32,
    /// `PRAGMA cache_size`, in pages.
    pub cache_size_pages: u64,
    /// `PRAGMA max_page_count`; the database reports "full" past this.
    pub max_page_count: u64,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for StorageOptions {
    fn from(config: &CacheConfig) -> Self {
        Self {
            page_size: config.page_size,
            cache_size_pages: config.cache_size_pages(),
            max_page_count: config.max_page_count(),
        }
    }
}

impl StorageOptions {
    /// Pragma batch in application order.
    ///
    /// `page_size` has to come before WAL is switched on; a WAL database
    /// cannot change its page size afterwards.
    fn pragmas(&self) -> String {
        format!(
            "PRAGMA page_size={};
             PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA temp_store=MEMORY;
             PRAGMA cache_size={};
             PRAGMA max_page_count={};",
            self.page_size, self.cache_size_pages, self.max_page_count
        )
    }
}

/// Cache database handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations on a
/// background thread. Clones share that thread, so statements from every
/// clone are serialised.
#[derive(Clone)]
pub struct CacheDb {
    pub(crate) conn: Connection,
    path: Option<PathBuf>,
    interrupt: Arc<InterruptHandle>,
    /// Set while a purge is executing on the connection thread, so a timed
    /// out purge never interrupts somebody else's statement.
    pub(crate) purging: Arc<AtomicBool>,
}

impl fmt::Debug for CacheDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheDb").field("path", &self.path).finish_non_exhaustive()
    }
}

impl CacheDb {
    /// Open a database at the specified path.
    ///
    /// Creates missing parent directories and the file itself, applies
    /// pragmas, and runs any pending migrations.
    pub async fn open(path: impl AsRef<Path>, options: &StorageOptions) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| Error::Io { op: "create database directory", source })?;
        }

        let conn = Connection::open(&path).await.map_err(|e| Error::Database(e.into()))?;
        Self::configure(conn, Some(path), options).await
    }

    /// Open an in-memory database for testing.
    ///
    /// Creates a temporary in-memory SQLite database with the same
    /// pragma configuration as file-based databases.
    pub async fn open_in_memory(options: &StorageOptions) -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Self::configure(conn, None, options).await
    }

    async fn configure(conn: Connection, path: Option<PathBuf>, options: &StorageOptions) -> Result<Self, Error> {
        let pragmas = options.pragmas();
        let interrupt = conn
            .call(move |conn| {
                conn.execute_batch(&pragmas)?;
                Ok(conn.get_interrupt_handle())
            })
            .await
            .map_err(|e| Error::Database(e).with_op("configure pragmas"))?;

        migrations::run(&conn).await?;

        tracing::debug!(?path, page_size = options.page_size, "cache database ready");

        Ok(Self { conn, path, interrupt: Arc::new(interrupt), purging: Arc::new(AtomicBool::new(false)) })
    }

    /// Location of the database file; `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Rebuild the database file to release pages freed by deletes.
    pub async fn vacuum(&self) -> Result<(), Error> {
        self.conn
            .call(|conn| conn.execute_batch("VACUUM;"))
            .await
            .map_err(|e| Error::Database(e).with_op("vacuum"))
    }

    /// Abort the statement a purge is currently running, if any.
    pub(crate) fn interrupt_purge(&self) -> bool {
        if self.purging.load(Ordering::SeqCst) {
            self.interrupt.interrupt();
            return true;
        }
        false
    }

    /// Close the connection. Data stays on disk.
    pub async fn close(&self) -> Result<(), Error> {
        match self.conn.clone().close().await {
            Ok(()) | Err(tokio_rusqlite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(Error::Database(e).with_op("close database")),
        }
    }

    /// Close the connection and delete the database file with its WAL and
    /// shared-memory sidecars.
    ///
    /// This is irreversible.
    pub async fn destroy(&self) -> Result<(), Error> {
        self.close().await?;

        let Some(path) = &self.path else {
            return Ok(());
        };

        tokio::fs::remove_file(path)
            .await
            .map_err(|source| Error::Io { op: "remove database file", source })?;

        for suffix in ["-wal", "-shm"] {
            let mut sidecar = path.clone().into_os_string();
            sidecar.push(suffix);
            match tokio::fs::remove_file(&sidecar).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(Error::Io { op: "remove database sidecar", source }),
            }
        }

        tracing::info!(path = %path.display(), "cache database destroyed");
        Ok(())
    }
}
