//! Cache configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (LITECACHE_*)
//! 2. TOML config file (if LITECACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

const MIB: u64 = 1024 * 1024;

/// Cache configuration.
///
/// Immutable once handed to [`crate::Cache::open`]; each cache owns its copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Path to the SQLite database file.
    ///
    /// Set via LITECACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Seconds between background sweeps of expired entries.
    ///
    /// Set via LITECACHE_SYNC_INTERVAL_SECS environment variable.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Timezone used for timestamps: `UTC`, `Z`, or a fixed offset like `+02:00`.
    ///
    /// Set via LITECACHE_TIMEZONE environment variable.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Fraction of entries evicted when the database is full, in `[0, 1]`.
    ///
    /// Set via LITECACHE_PURGE_PERCENT environment variable.
    #[serde(default = "default_purge_percent")]
    pub purge_percent: f64,

    /// Upper bound for a single purge transaction in milliseconds.
    ///
    /// Set via LITECACHE_PURGE_TIMEOUT_MS environment variable.
    #[serde(default = "default_purge_timeout_ms")]
    pub purge_timeout_ms: u64,

    /// SQLite page size in bytes.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Memory given to SQLite's page cache, in bytes.
    #[serde(default = "default_cache_size_bytes")]
    pub cache_size_bytes: u64,

    /// Ceiling for the database file, in bytes.
    #[serde(default = "default_max_db_size_bytes")]
    pub max_db_size_bytes: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./litecache.db")
}

fn default_sync_interval_secs() -> u64 {
    60
}

fn default_timezone() -> String {
    "UTC".into()
}

fn default_purge_percent() -> f64 {
    0.2
}

fn default_purge_timeout_ms() -> u64 {
    30_000
}

fn default_page_size() -> u32 {
    4096
}

fn default_cache_size_bytes() -> u64 {
    64 * MIB
}

fn default_max_db_size_bytes() -> u64 {
    512 * MIB
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            sync_interval_secs: default_sync_interval_secs(),
            timezone: default_timezone(),
            purge_percent: default_purge_percent(),
            purge_timeout_ms: default_purge_timeout_ms(),
            page_size: default_page_size(),
            cache_size_bytes: default_cache_size_bytes(),
            max_db_size_bytes: default_max_db_size_bytes(),
        }
    }
}

impl CacheConfig {
    /// Interval between expiry sweeps.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Purge deadline as Duration for use with tokio.
    pub fn purge_timeout(&self) -> Duration {
        Duration::from_millis(self.purge_timeout_ms)
    }

    /// Parse the configured timezone.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the value is neither `UTC`/`Z` nor a
    /// fixed offset.
    pub fn timezone_offset(&self) -> Result<FixedOffset, ConfigError> {
        let tz = self.timezone.trim();
        if tz.eq_ignore_ascii_case("utc") || tz == "Z" {
            return Ok(Utc.fix());
        }
        tz.parse::<FixedOffset>().map_err(|e| ConfigError::Invalid {
            field: "timezone".into(),
            reason: format!("expected UTC or an offset like +02:00 ({e})"),
        })
    }

    /// Page cache size expressed in pages, as `PRAGMA cache_size` expects.
    pub fn cache_size_pages(&self) -> u64 {
        self.cache_size_bytes / u64::from(self.page_size)
    }

    /// Database ceiling expressed in pages, as `PRAGMA max_page_count` expects.
    pub fn max_page_count(&self) -> u64 {
        self.max_db_size_bytes / u64::from(self.page_size)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `LITECACHE_`
    /// 2. TOML file from `LITECACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("LITECACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(Env::prefixed("LITECACHE_").ignore(&["CONFIG_FILE"]));

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./litecache.db"));
        assert_eq!(config.sync_interval_secs, 60);
        assert_eq!(config.timezone, "UTC");
        assert_eq!(config.purge_percent, 0.2);
        assert_eq!(config.purge_timeout_ms, 30_000);
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.cache_size_bytes, 64 * MIB);
        assert_eq!(config.max_db_size_bytes, 512 * MIB);
    }

    #[test]
    fn test_durations() {
        let config = CacheConfig::default();
        assert_eq!(config.sync_interval(), Duration::from_secs(60));
        assert_eq!(config.purge_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_page_math() {
        let config = CacheConfig::default();
        assert_eq!(config.cache_size_pages(), 16_384);
        assert_eq!(config.max_page_count(), 131_072);
    }

    #[test]
    fn test_timezone_offset() {
        let utc = CacheConfig::default();
        assert_eq!(utc.timezone_offset().unwrap().local_minus_utc(), 0);

        let plus_two = CacheConfig { timezone: "+02:00".into(), ..Default::default() };
        assert_eq!(plus_two.timezone_offset().unwrap().local_minus_utc(), 7200);

        let bogus = CacheConfig { timezone: "Mars/Olympus".into(), ..Default::default() };
        assert!(matches!(bogus.timezone_offset(), Err(ConfigError::Invalid { field, .. }) if field == "timezone"));
    }

    #[test]
    fn test_load_layers() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "litecache.toml",
                r#"
                    db_path = "/tmp/from-file.db"
                    purge_percent = 0.5
                "#,
            )?;
            jail.set_env("LITECACHE_CONFIG_FILE", "litecache.toml");
            jail.set_env("LITECACHE_PURGE_PERCENT", "0.3");
            jail.set_env("LITECACHE_SYNC_INTERVAL_SECS", "5");

            let config = CacheConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.db_path, PathBuf::from("/tmp/from-file.db"));
            assert_eq!(config.purge_percent, 0.3);
            assert_eq!(config.sync_interval_secs, 5);
            assert_eq!(config.page_size, 4096);
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LITECACHE_PURGE_PERCENT", "1.5");
            let result = CacheConfig::load();
            assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "purge_percent"));
            Ok(())
        });
    }
}
