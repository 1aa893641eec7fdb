// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persisted shapes of the image table and its stats.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One binary asset materialized on this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageCacheEntry {
    pub remote_id: String,
    /// Owned by this entry; deleting the entry deletes the file
    pub local_path: String,
    pub size_bytes: u64,
    pub last_access: i64,
    pub downloaded_at: i64,
}

impl ImageCacheEntry {
    pub fn new(remote_id: String, local_path: String, size_bytes: u64, now: i64) -> Self {
        Self {
            remote_id,
            local_path,
            size_bytes,
            last_access: now,
            downloaded_at: now,
        }
    }
}

/// The image table, keyed by remote id.
pub type ImageTable = BTreeMap<String, ImageCacheEntry>;

/// Aggregate counters for one image table.
///
/// Derived from the table after every mutation; eviction never reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_bytes: u64,
    pub entry_count: usize,
    #[serde(default)]
    pub last_cleanup_at: i64,
}

impl CacheStats {
    /// Recount bytes and entries from `table`, keeping `last_cleanup_at`.
    #[must_use]
    pub fn recomputed(self, table: &ImageTable) -> Self {
        Self {
            total_bytes: table.values().map(|e| e.size_bytes).sum(),
            entry_count: table.len(),
            last_cleanup_at: self.last_cleanup_at,
        }
    }
}
