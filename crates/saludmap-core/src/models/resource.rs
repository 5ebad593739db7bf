//! Cached network resources (tile imagery, API responses, static assets).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cache partition a resource belongs to. Each partition has its own
/// directory in the store and its own eviction rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Tiles,
    Api,
    Static,
}

impl Partition {
    pub const ALL: [Partition; 3] = [Partition::Tiles, Partition::Api, Partition::Static];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Partition::Tiles => "tiles",
            Partition::Api => "api",
            Partition::Static => "static",
        }
    }

    /// Whether `clean_old_tiles` sweeps this partition. API responses have
    /// their own max age.
    pub fn is_evictable(&self) -> bool {
        matches!(self, Partition::Tiles | Partition::Static)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Request URL the payload was fetched from.
    pub key: String,
    pub partition: Partition,
    pub content_type: Option<String>,
    pub stored_at: DateTime<Utc>,
    pub payload: Vec<u8>,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        partition: Partition,
        content_type: Option<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            key: key.into(),
            partition,
            content_type,
            stored_at: super::now_millis(),
            payload,
        }
    }
}
