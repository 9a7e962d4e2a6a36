//! Cache entries and their expiration/access metadata

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A stored cache entry
///
/// `value` holds the serialized JSON payload exactly as it sits on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Namespace partition
    pub category: String,

    /// Caller-supplied key, unique within its category
    pub key: String,

    /// Serialized payload
    pub value: String,

    /// Entry metadata
    pub metadata: EntryMetadata,
}

impl CacheEntry {
    /// Deserialize the payload into `T`
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.value)
    }
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// When the entry was written
    pub created_at: DateTime<Utc>,

    /// When the entry stops being live; `None` never expires
    pub expires_at: Option<DateTime<Utc>>,

    /// Last successful read, `None` until the first hit
    pub last_accessed_at: Option<DateTime<Utc>>,

    /// Byte length of the serialized payload
    pub size_bytes: u64,
}

impl EntryMetadata {
    /// Metadata for a payload written at `created_at` with an optional TTL
    pub fn new(created_at: DateTime<Utc>, ttl: Option<Duration>, size_bytes: u64) -> Self {
        Self {
            created_at,
            expires_at: ttl.map(|ttl| expiration(created_at, ttl)),
            last_accessed_at: None,
            size_bytes,
        }
    }
}

/// Compute `created_at + ttl`, saturating at the far future
pub(crate) fn expiration(created_at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| created_at.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Storage representation: microseconds since the Unix epoch
pub(crate) fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(micros)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
