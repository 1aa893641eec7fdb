// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Read path: head fetch, staleness check, load-more, asset materialization.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::cache::RecordCache;
use crate::metrics::LatencyTimer;
use crate::record::Record;
use crate::storage::traits::SyncError;

use super::{staleness, PaginationCursor, SyncEngine, SyncMode};

fn error_kind(err: &SyncError) -> &'static str {
    match err {
        SyncError::RemoteUnavailable(_) => "unavailable",
        SyncError::RemoteRejected(_) => "rejected",
        _ => "local",
    }
}

impl SyncEngine {
    // ═══════════════════════════════════════════════════════════════════════════
    // API: Sync
    // ═══════════════════════════════════════════════════════════════════════════

    /// Bring the local view of `owner_group` in line with the remote store.
    ///
    /// Returns the session view: the head page after `FirstLoad`/`Refresh`,
    /// head page plus every further page after `LoadMore`.
    ///
    /// - A call made while another sync is running returns `Ok(vec![])`
    ///   without fetching or moving the cursor.
    /// - A failed head fetch falls back to the cached records.
    /// - A failed `LoadMore` returns the error; the cursor stays put.
    #[tracing::instrument(skip(self), fields(collection = %self.config.collection))]
    pub async fn sync(&self, owner_group: &str, mode: SyncMode) -> Result<Vec<Record>, SyncError> {
        let Ok(_in_flight) = self.sync_guard.try_lock() else {
            debug!(owner_group, %mode, "Sync already in flight, skipping");
            crate::metrics::record_sync(&self.config.collection, mode.as_str(), "busy");
            return Ok(Vec::new());
        };
        let _timer = LatencyTimer::new(&self.config.collection, "sync");

        if !mode.is_head() {
            return self.load_more(owner_group).await;
        }
        if mode == SyncMode::FirstLoad {
            self.maybe_cleanup(owner_group).await;
        }
        self.sync_head(owner_group, mode).await
    }

    async fn sync_head(&self, owner_group: &str, mode: SyncMode) -> Result<Vec<Record>, SyncError> {
        let page_size = self.config.page_size;
        let query = self.page_query(owner_group, 0);

        let page = match self.remote.query(&query).await {
            Ok(page) => page,
            Err(e) => {
                warn!(owner_group, %mode, error = %e, "Head fetch failed, serving cached records");
                crate::metrics::record_error(&self.config.collection, "sync", error_kind(&e));
                crate::metrics::record_sync(&self.config.collection, mode.as_str(), "fallback");

                let cached = self.records.load(owner_group);
                let cursor = PaginationCursor::after_fallback(cached.len(), page_size);
                self.set_session(owner_group, cached.clone(), cursor);
                return Ok(cached);
            }
        };
        crate::metrics::record_fetched(&self.config.collection, page.len());

        let now = self.now();
        let cursor = PaginationCursor::after_head(page.len(), page_size);
        let cached = self.records.load(owner_group);
        let verdict = staleness::assess(&page, &cached, page_size, self.config.sort_order);
        debug!(owner_group, %mode, fetched = page.len(), cached = cached.len(), %verdict, "Head page fetched");

        let view = if verdict.is_stale() {
            self.apply_stale_page(owner_group, page, cached, now).await
        } else {
            self.apply_fresh_page(owner_group, page, now).await
        };

        let outcome = if verdict.is_stale() { "stale" } else { "fresh" };
        crate::metrics::record_sync(&self.config.collection, mode.as_str(), outcome);
        self.set_session(owner_group, view.clone(), cursor);
        Ok(view)
    }

    /// The page carries changes: merge it into the cache.
    async fn apply_stale_page(
        &self,
        owner_group: &str,
        mut page: Vec<Record>,
        cached: Vec<Record>,
        now: i64,
    ) -> Vec<Record> {
        for record in &mut page {
            record.last_access = now;
        }
        if self.config.has_assets {
            self.attach_assets(owner_group, &mut page, now).await;
        }
        self.records.save(owner_group, RecordCache::merge(page.clone(), cached));
        page
    }

    /// The cache already reflects the page: no merge, only access times.
    async fn apply_fresh_page(&self, owner_group: &str, mut page: Vec<Record>, now: i64) -> Vec<Record> {
        for record in &mut page {
            record.last_access = now;
        }
        if self.config.has_assets {
            self.attach_assets(owner_group, &mut page, now).await;
        }
        let ids: HashSet<&str> = page.iter().filter_map(Record::id).collect();
        self.records.touch_ids(owner_group, &ids, now);
        page
    }

    async fn load_more(&self, owner_group: &str) -> Result<Vec<Record>, SyncError> {
        let page_size = self.config.page_size;
        let session = self.session(owner_group);
        let mode = SyncMode::LoadMore;

        if !session.cursor.has_more {
            debug!(owner_group, skip = session.cursor.skip, "No more pages");
            crate::metrics::record_sync(&self.config.collection, mode.as_str(), "exhausted");
            return Ok(session.view);
        }

        let query = self.page_query(owner_group, session.cursor.skip);
        let mut page = self.remote.query(&query).await.map_err(|e| {
            warn!(owner_group, skip = session.cursor.skip, error = %e, "Load more failed");
            crate::metrics::record_error(&self.config.collection, "load_more", error_kind(&e));
            crate::metrics::record_sync(&self.config.collection, mode.as_str(), "error");
            e
        })?;
        crate::metrics::record_fetched(&self.config.collection, page.len());

        let now = self.now();
        for record in &mut page {
            record.last_access = now;
        }
        if self.config.has_assets {
            self.attach_assets(owner_group, &mut page, now).await;
        }
        self.records.append(owner_group, page.clone());

        let cursor = session.cursor.advanced(page.len(), page_size);
        debug!(owner_group, fetched = page.len(), skip = cursor.skip, has_more = cursor.has_more, "Loaded more");

        let mut view = session.view;
        view.extend(page);
        crate::metrics::record_sync(&self.config.collection, mode.as_str(), "appended");
        self.set_session(owner_group, view.clone(), cursor);
        Ok(view)
    }

    /// Fill in `local_path` for every asset of `records`.
    ///
    /// Assets already in the image table are reused (and touched) as long
    /// as their file still exists; anything else is downloaded. A failed
    /// materialization leaves the asset without a local path.
    pub(super) async fn attach_assets(&self, owner_group: &str, records: &mut [Record], now: i64) {
        for record in records.iter_mut() {
            for asset in &mut record.asset_refs {
                asset.local_path = match self.images.materialize(owner_group, &asset.remote_id, now).await {
                    Ok(path) => Some(path),
                    Err(e) => {
                        warn!(owner_group, remote_id = %asset.remote_id, error = %e, "Asset unavailable");
                        None
                    }
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::harness;
    use super::*;
    use crate::config::EngineConfig;
    use crate::record::AssetRef;

    fn rec(id: &str, ts: i64) -> Record {
        Record::new("g", ts).with_id(id)
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().filter_map(Record::id).collect()
    }

    fn small_pages() -> EngineConfig {
        EngineConfig {
            page_size: 2,
            ..EngineConfig::new("plans", "plans")
        }
    }

    #[tokio::test]
    async fn test_first_load_then_load_more() {
        let h = harness(small_pages());
        h.remote.seed(rec("a", 100));
        h.remote.seed(rec("b", 90));
        h.remote.seed(rec("c", 80));

        let view = h.engine.sync("g", SyncMode::FirstLoad).await.unwrap();
        assert_eq!(ids(&view), vec!["a", "b"]);
        assert_eq!(h.engine.cursor("g"), PaginationCursor { skip: 2, has_more: true });

        let view = h.engine.sync("g", SyncMode::LoadMore).await.unwrap();
        assert_eq!(ids(&view), vec!["a", "b", "c"]);
        assert_eq!(h.engine.cursor("g"), PaginationCursor { skip: 3, has_more: false });

        // exhausted: no further fetch
        let queries = h.remote.query_count();
        let view = h.engine.sync("g", SyncMode::LoadMore).await.unwrap();
        assert_eq!(view.len(), 3);
        assert_eq!(h.remote.query_count(), queries);

        // load-more page was persisted
        assert_eq!(ids(&h.engine.records.load("g")), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_stale_page_is_merged_with_cache() {
        let h = harness(small_pages());
        h.engine.records.save("g", vec![rec("a", 100), rec("b", 90)]);
        h.remote.seed(rec("x", 300));
        h.remote.seed(rec("a", 100));

        let view = h.engine.sync("g", SyncMode::Refresh).await.unwrap();

        assert_eq!(ids(&view), vec!["x", "a"]);
        assert_eq!(ids(&h.engine.records.load("g")), vec!["x", "a", "b"]);
        assert!(view.iter().all(|r| r.last_access == 1_000_000));
    }

    #[tokio::test]
    async fn test_fresh_page_skips_merge() {
        let h = harness(small_pages());
        let mut cached_a = rec("a", 100).with_field("title", serde_json::json!("local"));
        cached_a.last_access = 1;
        h.engine.records.save("g", vec![cached_a, rec("b", 90)]);
        h.remote.seed(rec("a", 100).with_field("title", serde_json::json!("remote")));
        h.remote.seed(rec("b", 90));

        let view = h.engine.sync("g", SyncMode::Refresh).await.unwrap();

        assert_eq!(view[0].payload["title"], "remote");
        // cache content untouched, only access time refreshed
        let cached = h.engine.records.load("g");
        assert_eq!(cached[0].payload["title"], "local");
        assert_eq!(cached[0].last_access, 1_000_000);
    }

    #[tokio::test]
    async fn test_head_fetch_failure_serves_cache() {
        let h = harness(small_pages());
        h.engine.records.save("g", vec![rec("a", 100), rec("b", 90), rec("c", 80)]);
        h.remote.set_offline(true);

        let view = h.engine.sync("g", SyncMode::FirstLoad).await.unwrap();

        assert_eq!(ids(&view), vec!["a", "b", "c"]);
        assert_eq!(h.engine.cursor("g"), PaginationCursor { skip: 3, has_more: true });
    }

    #[tokio::test]
    async fn test_load_more_failure_keeps_cursor() {
        let h = harness(small_pages());
        h.remote.seed(rec("a", 100));
        h.remote.seed(rec("b", 90));
        h.remote.seed(rec("c", 80));
        h.engine.sync("g", SyncMode::FirstLoad).await.unwrap();

        h.remote.set_offline(true);
        let result = h.engine.sync("g", SyncMode::LoadMore).await;

        assert!(matches!(result, Err(SyncError::RemoteUnavailable(_))));
        assert_eq!(h.engine.cursor("g"), PaginationCursor { skip: 2, has_more: true });
    }

    #[tokio::test]
    async fn test_busy_engine_returns_empty() {
        let h = harness(small_pages());
        h.remote.seed(rec("a", 100));

        let _held = h.engine.sync_guard.try_lock().unwrap();
        let view = h.engine.sync("g", SyncMode::FirstLoad).await.unwrap();

        assert!(view.is_empty());
        assert_eq!(h.remote.query_count(), 0);
        assert!(h.engine.is_syncing());
    }

    #[tokio::test]
    async fn test_assets_materialized_on_stale_page() {
        let h = harness(EngineConfig {
            has_assets: true,
            ..small_pages()
        });
        h.binary.put_object("cloud://p1", 64);
        h.remote.seed(rec("a", 100).with_asset(AssetRef::remote("cloud://p1")));

        let view = h.engine.sync("g", SyncMode::FirstLoad).await.unwrap();

        let path = view[0].asset_refs[0].local_path.clone().unwrap();
        assert!(h.fs.contains(&path));
        assert_eq!(h.engine.records.load("g")[0].local_path_for("cloud://p1"), Some(path.as_str()));
        assert_eq!(h.engine.image_stats("g").total_bytes, 64);
    }

    #[tokio::test]
    async fn test_fresh_page_reuses_cached_paths() {
        let h = harness(EngineConfig {
            has_assets: true,
            ..small_pages()
        });
        h.binary.put_object("cloud://p1", 64);
        h.remote.seed(rec("a", 100).with_asset(AssetRef::remote("cloud://p1")));
        h.engine.sync("g", SyncMode::FirstLoad).await.unwrap();
        assert_eq!(h.binary.download_count(), 1);

        h.set_now(2_000_000);
        let view = h.engine.sync("g", SyncMode::Refresh).await.unwrap();

        assert!(view[0].asset_refs[0].local_path.is_some());
        assert_eq!(h.binary.download_count(), 1);
        assert_eq!(
            h.engine.images.entry("g", "cloud://p1").unwrap().last_access,
            2_000_000
        );
    }

    #[tokio::test]
    async fn test_missing_asset_leaves_record_without_path() {
        let h = harness(EngineConfig {
            has_assets: true,
            ..small_pages()
        });
        h.remote.seed(rec("a", 100).with_asset(AssetRef::remote("cloud://gone")));

        let view = h.engine.sync("g", SyncMode::FirstLoad).await.unwrap();

        assert_eq!(view.len(), 1);
        assert!(view[0].asset_refs[0].local_path.is_none());
    }

    #[tokio::test]
    async fn test_assets_ignored_without_flag() {
        let h = harness(small_pages());
        h.binary.put_object("cloud://p1", 64);
        h.remote.seed(rec("a", 100).with_asset(AssetRef::remote("cloud://p1")));

        let view = h.engine.sync("g", SyncMode::FirstLoad).await.unwrap();

        assert!(view[0].asset_refs[0].local_path.is_none());
        assert_eq!(h.binary.download_count(), 0);
    }
}
