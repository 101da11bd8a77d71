use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;

/// A persisted TTL record: one per key with an active TTL.
///
/// Records are stored as JSON under their own key in the TTL record store,
/// so the expiration index can be rebuilt exactly after a restart. The key
/// inside the record must round-trip byte-identically for that rebuild to
/// re-derive the same index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlRecord {
    /// The cache key this record belongs to
    pub key: Vec<u8>,
    /// Creation timestamp, unix seconds
    pub create_time: i64,
    /// Time-to-live in seconds
    pub ttl: i64,
    /// Absolute expiry timestamp; always `create_time + ttl`
    pub expired_time: i64,
}

impl TtlRecord {
    /// Creates a record with `expired_time` derived from `create_time + ttl`.
    pub fn new(key: Vec<u8>, create_time: i64, ttl: i64) -> Self {
        Self {
            key,
            create_time,
            ttl,
            expired_time: create_time + ttl,
        }
    }

    /// Checks whether this record is expired at the given unix timestamp.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expired_time < now
    }

    /// The composite key this record sorts under in the expiration index.
    pub(crate) fn index_key(&self) -> IndexKey {
        IndexKey {
            expired_time: self.expired_time,
            key: self.key.clone(),
        }
    }

    /// Serializes the record for persistence.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserializes a persisted record.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Ordering key for the expiration index: expiry timestamp first, then the
/// raw key bytes. The derived `Ord` compares fields in declaration order,
/// which gives a deterministic global eviction order even when several keys
/// expire in the same second.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct IndexKey {
    pub(crate) expired_time: i64,
    pub(crate) key: Vec<u8>,
}

/// Current wall-clock time as unix seconds.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
