// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache reads, periodic cleanup, and reset.

use tracing::{debug, info};

use crate::cache::CacheStats;
use crate::record::Record;
use crate::storage::traits::SyncError;

use super::{CleanupReport, PaginationCursor, SyncEngine};

impl SyncEngine {
    /// Cached records for `owner_group`, without touching the network.
    ///
    /// Refreshes `last_access` on everything returned.
    pub fn cached(&self, owner_group: &str) -> Vec<Record> {
        self.records.touch_all(owner_group, self.now())
    }

    #[must_use]
    pub fn cursor(&self, owner_group: &str) -> PaginationCursor {
        self.session(owner_group).cursor
    }

    #[must_use]
    pub fn image_stats(&self, owner_group: &str) -> CacheStats {
        self.images.stats(owner_group)
    }

    /// Local path for one asset, downloading it if needed.
    pub async fn materialize_asset(&self, owner_group: &str, remote_id: &str) -> Result<String, SyncError> {
        self.images.materialize(owner_group, remote_id, self.now()).await
    }

    /// Evict records and images idle past the retention period.
    #[tracing::instrument(skip(self), fields(collection = %self.config.collection))]
    pub async fn cleanup(&self, owner_group: &str, now: i64) -> CleanupReport {
        let retention = self.config.retention_period();

        let records_evicted = self.records.evict_expired(owner_group, now, retention);
        let images = self.images.evict_expired(owner_group, now, retention).await;
        self.images.mark_cleanup(owner_group, now);

        let report = CleanupReport {
            records_evicted,
            images_evicted: images.entries,
            bytes_freed: images.bytes_freed,
        };
        info!(owner_group, %report, "Cache cleanup complete");
        crate::metrics::record_operation(&self.config.collection, "cleanup", "success");
        report
    }

    /// Run [`cleanup`](Self::cleanup) if the last one is older than the
    /// cleanup interval.
    pub async fn maybe_cleanup(&self, owner_group: &str) -> Option<CleanupReport> {
        let now = self.now();
        let last = self.images.stats(owner_group).last_cleanup_at;
        let interval = i64::try_from(self.config.cleanup_interval().as_millis()).unwrap_or(i64::MAX);

        if now.saturating_sub(last) < interval {
            debug!(owner_group, last_cleanup_at = last, "Cleanup not due");
            return None;
        }
        Some(self.cleanup(owner_group, now).await)
    }

    /// Forget everything cached for `owner_group`: records, images, session.
    pub async fn clear(&self, owner_group: &str) {
        self.records.clear(owner_group);
        let images = self.images.clear(owner_group).await;
        self.sessions.remove(owner_group);
        info!(owner_group, images, "Cleared local cache");
    }
}
