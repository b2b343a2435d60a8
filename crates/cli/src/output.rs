//! Human and JSON rendering of command results.

use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};
use litecache_core::CacheEntry;
use serde::Serialize;

/// An entry with its value shown as text.
#[derive(Debug, Serialize)]
pub struct EntryView {
    pub key: String,
    pub value: String,
    pub bytes: usize,
    pub created_at: DateTime<FixedOffset>,
    pub expires_at: DateTime<FixedOffset>,
    pub last_accessed_at: DateTime<FixedOffset>,
}

impl From<CacheEntry> for EntryView {
    fn from(entry: CacheEntry) -> Self {
        Self {
            bytes: entry.value.len(),
            value: String::from_utf8_lossy(&entry.value).into_owned(),
            key: entry.key,
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            last_accessed_at: entry.last_accessed_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Report {
    Stored { key: String, ttl_secs: u64 },
    Value { key: String, value: String },
    Deleted { key: String },
    Entry(EntryView),
    Purged { total: u64, deleted: u64 },
    Swept { deleted: u64 },
    Count { entries: u64 },
    Destroyed { path: PathBuf },
}

impl Report {
    pub fn render(&self, json: bool) -> serde_json::Result<String> {
        if json {
            return serde_json::to_string(self);
        }
        Ok(match self {
            Report::Stored { key, ttl_secs } => format!("stored {key} (ttl {ttl_secs}s)"),
            Report::Value { value, .. } => value.clone(),
            Report::Deleted { key } => format!("deleted {key}"),
            Report::Entry(entry) => format!(
                "key:          {}\nbytes:        {}\ncreated:      {}\nexpires:      {}\nlast access:  {}\nvalue:        {}",
                entry.key,
                entry.bytes,
                entry.created_at.to_rfc3339(),
                entry.expires_at.to_rfc3339(),
                entry.last_accessed_at.to_rfc3339(),
                entry.value
            ),
            Report::Purged { total, deleted } => format!("purged {deleted} of {total} entries"),
            Report::Swept { deleted } => format!("removed {deleted} expired entries"),
            Report::Count { entries } => entries.to_string(),
            Report::Destroyed { path } => format!("destroyed {}", path.display()),
        })
    }
}
