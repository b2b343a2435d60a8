//! Configuration validation rules.
//!
//! Everything here runs before the database is touched, so a bad value never
//! leaves a half-initialised file behind.

use crate::config::CacheConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid { field: field.into(), reason: reason.into() }
    }
}

impl CacheConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `purge_percent` is not within `[0, 1]`
    /// - `purge_timeout_ms` or `sync_interval_secs` is 0
    /// - `page_size` is not a power of two between 512 and 65536
    /// - `cache_size_bytes` or `max_db_size_bytes` is smaller than one page
    /// - `timezone` cannot be parsed
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.purge_percent.is_finite() || !(0.0..=1.0).contains(&self.purge_percent) {
            return Err(ConfigError::invalid("purge_percent", "must be between 0 and 1"));
        }

        if self.purge_timeout_ms == 0 {
            return Err(ConfigError::invalid("purge_timeout_ms", "must be greater than 0"));
        }

        if self.sync_interval_secs == 0 {
            return Err(ConfigError::invalid("sync_interval_secs", "must be greater than 0"));
        }

        if !self.page_size.is_power_of_two() || !(512..=65_536).contains(&self.page_size) {
            return Err(ConfigError::invalid("page_size", "must be a power of two between 512 and 65536"));
        }

        let page = u64::from(self.page_size);
        if self.cache_size_bytes < page {
            return Err(ConfigError::invalid("cache_size_bytes", "must hold at least one page"));
        }
        if self.max_db_size_bytes < page {
            return Err(ConfigError::invalid("max_db_size_bytes", "must hold at least one page"));
        }

        self.timezone_offset()?;

        if self.max_db_size_bytes < self.cache_size_bytes {
            tracing::warn!(
                cache_size_bytes = self.cache_size_bytes,
                max_db_size_bytes = self.max_db_size_bytes,
                "page cache is larger than the database ceiling"
            );
        }

        Ok(())
    }
}
