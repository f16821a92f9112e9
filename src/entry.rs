//! Stored record and value model.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cached value.
///
/// Only [`CacheValue::Bytes`] is a compressible payload. Text and JSON values
/// are always stored as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CacheValue {
    /// Opaque bytes, usually pre-serialized by the caller.
    Bytes(Vec<u8>),
    /// A UTF-8 string.
    Text(String),
    /// A structured document.
    Json(serde_json::Value),
}

impl CacheValue {
    /// Borrow the raw bytes if this is a byte payload.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CacheValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Whether this value is a JSON `null`.
    pub fn is_null(&self) -> bool {
        matches!(self, CacheValue::Json(serde_json::Value::Null))
    }

    /// Approximate payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            CacheValue::Bytes(b) => b.len(),
            CacheValue::Text(s) => s.len(),
            CacheValue::Json(v) => v.to_string().len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(v: Vec<u8>) -> Self {
        CacheValue::Bytes(v)
    }
}

impl From<&[u8]> for CacheValue {
    fn from(v: &[u8]) -> Self {
        CacheValue::Bytes(v.to_vec())
    }
}

impl From<String> for CacheValue {
    fn from(v: String) -> Self {
        CacheValue::Text(v)
    }
}

impl From<&str> for CacheValue {
    fn from(v: &str) -> Self {
        CacheValue::Text(v.to_string())
    }
}

impl From<serde_json::Value> for CacheValue {
    fn from(v: serde_json::Value) -> Self {
        CacheValue::Json(v)
    }
}

/// One stored record.
///
/// `expire_at` is absolute: TTLs are converted at write time, never stored
/// as durations. `ttl` is only populated for
/// [`ExpiryStrategy::PlatformTimestamp`](crate::config::ExpiryStrategy::PlatformTimestamp),
/// where the platform expires documents from a per-document seconds field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: CacheValue,
    pub expire_at: DateTime<Utc>,
    pub compressed: bool,
    pub ttl: Option<i64>,
}

impl CacheEntry {
    /// Build an uncompressed entry expiring `ttl` from `now`.
    pub fn new(key: impl Into<String>, value: CacheValue, ttl: Duration, now: DateTime<Utc>) -> Self {
        CacheEntry {
            key: key.into(),
            value,
            expire_at: expire_at(now, ttl),
            compressed: false,
            ttl: None,
        }
    }

    /// Whether the entry is logically dead at `now`.
    ///
    /// An entry expiring exactly at `now` is already expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_at <= now
    }

    /// Whether the entry is logically dead right now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Absolute expiry for a write at `now` with the given TTL.
pub fn expire_at(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    // Durations beyond chrono's range saturate to the far future.
    ChronoDuration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Whole seconds for the per-document TTL field, rounded up, at least 1.
pub fn ttl_seconds(ttl: Duration) -> i64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    i64::try_from(secs.max(1)).unwrap_or(i64::MAX)
}
