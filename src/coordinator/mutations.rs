// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write path: publish, update, delete.
//!
//! Remote failures are returned to the caller; nothing here retries. Local
//! cache writes after a successful remote call are best-effort.

use std::collections::HashSet;
use std::path::Path;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::metrics::LatencyTimer;
use crate::record::{AssetRef, Record};
use crate::storage::traits::SyncError;

use super::SyncEngine;

fn file_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

impl SyncEngine {
    // ═══════════════════════════════════════════════════════════════════════════
    // API: Mutations
    // ═══════════════════════════════════════════════════════════════════════════

    /// Upload `local_assets`, insert `record` remotely and cache it.
    ///
    /// Each local file becomes an [`AssetRef`] and is moved into permanent
    /// local storage, so the publishing device never downloads its own
    /// uploads. If any upload or the insert fails, objects already uploaded
    /// are deleted again (best-effort) and the error is returned.
    ///
    /// Returns the stored record with its new id and local asset paths.
    #[tracing::instrument(skip(self, record, local_assets), fields(collection = %self.config.collection, assets = local_assets.len()))]
    pub async fn publish(
        &self,
        owner_group: &str,
        record: Record,
        local_assets: &[String],
    ) -> Result<Record, SyncError> {
        let _timer = LatencyTimer::new(&self.config.collection, "publish");
        let now = self.now();

        let mut uploaded: Vec<(String, String)> = Vec::with_capacity(local_assets.len());
        for local_path in local_assets {
            let hint = format!("{}/{}/{}", self.config.collection, owner_group, file_name(local_path));
            match self.binary.upload(local_path, &hint).await {
                Ok(remote_id) => uploaded.push((local_path.clone(), remote_id)),
                Err(e) => {
                    warn!(owner_group, path = %local_path, error = %e, "Asset upload failed");
                    self.discard_uploads(&uploaded).await;
                    crate::metrics::record_operation(&self.config.collection, "publish", "error");
                    return Err(e);
                }
            }
        }

        let mut record = record;
        record.strip_core_fields();
        record.id = None;
        record.owner_group = owner_group.to_string();
        record.last_access = now;
        if record.sort_timestamp == 0 {
            record.sort_timestamp = now;
        }
        if self.config.timestamp_field != self.config.sort_field {
            record.payload.insert(self.config.timestamp_field.clone(), json!(now));
        }
        record
            .asset_refs
            .extend(uploaded.iter().map(|(_, remote_id)| AssetRef::remote(remote_id.clone())));

        let id = match self.remote.insert(&record.for_remote()).await {
            Ok(id) => id,
            Err(e) => {
                warn!(owner_group, error = %e, "Remote insert failed");
                self.discard_uploads(&uploaded).await;
                crate::metrics::record_operation(&self.config.collection, "publish", "error");
                return Err(e);
            }
        };
        record.id = Some(id.clone());

        for (local_path, remote_id) in &uploaded {
            match self.fs.save(local_path).await {
                Ok(saved) => {
                    let path = saved.path.clone();
                    self.images.insert_local(owner_group, remote_id, saved, now).await;
                    if let Some(asset) = record.asset_refs.iter_mut().find(|a| &a.remote_id == remote_id) {
                        asset.local_path = Some(path);
                    }
                }
                Err(e) => warn!(owner_group, path = %local_path, error = %e, "Could not keep uploaded file locally"),
            }
        }

        self.records.prepend(owner_group, record.clone());
        let order = self.config.sort_order;
        self.update_view(owner_group, |view| {
            view.insert(0, record.clone());
            order.sort(view);
        });

        info!(owner_group, id = %id, assets = uploaded.len(), "Published record");
        crate::metrics::record_operation(&self.config.collection, "publish", "success");
        Ok(record)
    }

    async fn discard_uploads(&self, uploaded: &[(String, String)]) {
        if uploaded.is_empty() {
            return;
        }
        let ids: Vec<String> = uploaded.iter().map(|(_, id)| id.clone()).collect();
        if let Err(e) = self.binary.delete(&ids).await {
            warn!(count = ids.len(), error = %e, "Failed to roll back uploaded assets");
        }
    }

    /// Apply a field patch remotely, then to the cached copy and the view.
    ///
    /// The configured timestamp field is stamped with the current time.
    /// Returns the patched cached record, or `None` if it was not cached.
    #[tracing::instrument(skip(self, patch), fields(collection = %self.config.collection))]
    pub async fn update(
        &self,
        owner_group: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<Option<Record>, SyncError> {
        let _timer = LatencyTimer::new(&self.config.collection, "update");
        let now = self.now();

        if let Err(e) = Record::check_patch(&patch, &self.config.sort_field) {
            warn!(owner_group, id, error = %e, "Rejected patch");
            crate::metrics::record_operation(&self.config.collection, "update", "error");
            return Err(e);
        }
        let mut patch = patch;
        patch.insert(self.config.timestamp_field.clone(), json!(now));

        if let Err(e) = self.remote.update_by_id(id, &patch).await {
            warn!(owner_group, id, error = %e, "Remote update failed");
            crate::metrics::record_operation(&self.config.collection, "update", "error");
            return Err(e);
        }

        let patched = self.records.patch(owner_group, id, &patch, now);
        let sort_field = self.config.sort_field.clone();
        let order = self.config.sort_order;
        self.update_view(owner_group, |view| {
            if let Some(record) = view.iter_mut().find(|r| r.id() == Some(id)) {
                record.apply_patch(&patch, &sort_field);
                record.last_access = now;
                order.sort(view);
            }
        });

        debug!(owner_group, id, cached = patched.is_some(), "Updated record");
        crate::metrics::record_operation(&self.config.collection, "update", "success");
        Ok(patched)
    }

    /// Delete a record remotely and drop it locally.
    ///
    /// Its assets are taken from `record` when given, otherwise from the
    /// cached copy. An asset still referenced by another cached record of
    /// the same owner group is kept; the rest are deleted from the binary
    /// store (failures ignored) and from local storage.
    #[tracing::instrument(skip(self, record), fields(collection = %self.config.collection))]
    pub async fn delete(
        &self,
        owner_group: &str,
        id: &str,
        record: Option<&Record>,
    ) -> Result<(), SyncError> {
        let _timer = LatencyTimer::new(&self.config.collection, "delete");

        if let Err(e) = self.remote.delete_by_id(id).await {
            warn!(owner_group, id, error = %e, "Remote delete failed");
            crate::metrics::record_operation(&self.config.collection, "delete", "error");
            return Err(e);
        }

        let removed = self.records.remove(owner_group, id);
        let mut assets: Vec<String> = record
            .or(removed.as_ref())
            .map(|r| r.asset_refs.iter().map(|a| a.remote_id.clone()).collect())
            .unwrap_or_default();
        let mut seen = HashSet::new();
        assets.retain(|a| seen.insert(a.clone()));

        if !assets.is_empty() {
            let remaining = self.records.load(owner_group);
            let shared: HashSet<&str> = remaining
                .iter()
                .flat_map(|r| r.asset_refs.iter().map(|a| a.remote_id.as_str()))
                .collect();
            let (kept, orphaned): (Vec<String>, Vec<String>) =
                assets.into_iter().partition(|a| shared.contains(a.as_str()));

            if !kept.is_empty() {
                debug!(owner_group, id, kept = kept.len(), "Assets still referenced, keeping");
            }
            if !orphaned.is_empty() {
                if let Err(e) = self.binary.delete(&orphaned).await {
                    warn!(owner_group, id, error = %e, "Remote asset delete failed, ignoring");
                }
                for remote_id in &orphaned {
                    self.images.remove(owner_group, remote_id).await;
                }
            }
        }

        self.update_view(owner_group, |view| view.retain(|r| r.id() != Some(id)));

        info!(owner_group, id, "Deleted record");
        crate::metrics::record_operation(&self.config.collection, "delete", "success");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::harness;
    use super::super::SyncMode;
    use super::*;
    use crate::config::EngineConfig;
    use crate::record::SortOrder;

    fn assets_config() -> EngineConfig {
        EngineConfig {
            has_assets: true,
            ..EngineConfig::new("moments", "moments")
        }
    }

    #[tokio::test]
    async fn test_publish_assigns_id_and_caches() {
        let h = harness(EngineConfig::new("plans", "plans"));

        let published = h
            .engine
            .publish("g", Record::new("", 0).with_field("title", json!("Hike")), &[])
            .await
            .unwrap();

        let id = published.id().unwrap().to_string();
        assert_eq!(published.owner_group, "g");
        assert_eq!(published.sort_timestamp, 1_000_000);
        assert_eq!(published.payload["updatedAt"], 1_000_000);
        assert_eq!(h.engine.records.load("g")[0].id(), Some(id.as_str()));
        assert_eq!(h.remote.get(&id).unwrap().payload["title"], "Hike");
    }

    #[tokio::test]
    async fn test_publish_keeps_explicit_sort_timestamp() {
        let h = harness(EngineConfig::new("plans", "plans"));
        let published = h.engine.publish("g", Record::new("g", 42), &[]).await.unwrap();
        assert_eq!(published.sort_timestamp, 42);
    }

    #[tokio::test]
    async fn test_publish_does_not_stamp_sort_field_as_payload() {
        let h = harness(EngineConfig {
            timestamp_field: "createdAt".into(),
            ..EngineConfig::new("plans", "plans")
        });
        let published = h.engine.publish("g", Record::new("g", 0), &[]).await.unwrap();
        assert!(published.payload.get("createdAt").is_none());
    }

    #[tokio::test]
    async fn test_publish_with_assets_keeps_local_copy() {
        let h = harness(assets_config());
        let local = h.fs.create_temp(128);

        let published = h.engine.publish("g", Record::new("g", 0), &[local]).await.unwrap();

        let asset = &published.asset_refs[0];
        assert!(asset.remote_id.starts_with("cloud://moments/g/"));
        let path = asset.local_path.clone().unwrap();
        assert!(h.fs.contains(&path));
        assert!(h.binary.contains(&asset.remote_id));
        assert_eq!(h.engine.image_stats("g").total_bytes, 128);

        // publish-then-load never downloads its own upload
        h.engine.sync("g", SyncMode::FirstLoad).await.unwrap();
        assert_eq!(h.binary.download_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_rolls_back_uploads_on_failure() {
        let h = harness(assets_config());
        let good = h.fs.create_temp(10);
        let missing = "mem://tmp/does-not-exist".to_string();

        let result = h.engine.publish("g", Record::new("g", 0), &[good, missing]).await;

        assert!(matches!(result, Err(SyncError::AssetMissing(_))));
        assert!(h.remote.is_empty());
        assert!(h.engine.records.load("g").is_empty());
    }

    #[tokio::test]
    async fn test_publish_insert_failure_is_returned() {
        let h = harness(EngineConfig::new("plans", "plans"));
        h.remote.set_offline(true);

        let result = h.engine.publish("g", Record::new("g", 0), &[]).await;

        assert!(matches!(result, Err(SyncError::RemoteUnavailable(_))));
        assert!(h.engine.records.load("g").is_empty());
    }

    #[tokio::test]
    async fn test_publish_prepends_to_view() {
        let h = harness(EngineConfig::new("plans", "plans"));
        h.remote.seed(Record::new("g", 10).with_id("old"));
        h.engine.sync("g", SyncMode::FirstLoad).await.unwrap();

        let published = h.engine.publish("g", Record::new("g", 0), &[]).await.unwrap();

        let view = h.engine.session("g").view;
        assert_eq!(view[0].id(), published.id());
        assert_eq!(view.len(), 2);
    }

    #[tokio::test]
    async fn test_publish_keeps_ascending_view_sorted() {
        let h = harness(EngineConfig {
            page_size: 5,
            sort_order: SortOrder::Ascending,
            ..EngineConfig::new("plans", "plans")
        });
        h.remote.seed(Record::new("g", 100).with_id("a"));
        h.remote.seed(Record::new("g", 200).with_id("b"));
        h.engine.sync("g", SyncMode::FirstLoad).await.unwrap();

        let published = h.engine.publish("g", Record::new("g", 0), &[]).await.unwrap();
        // exhausted cursor: LoadMore hands back the session view as-is
        let view = h.engine.sync("g", SyncMode::LoadMore).await.unwrap();

        let stamps: Vec<i64> = view.iter().map(|r| r.sort_timestamp).collect();
        assert_eq!(stamps, vec![100, 200, 1_000_000]);
        assert_eq!(view[2].id(), published.id());
        let cached: Vec<i64> = h.engine.records.load("g").iter().map(|r| r.sort_timestamp).collect();
        assert_eq!(cached, stamps);
    }

    #[tokio::test]
    async fn test_update_rejects_core_field_patch() {
        let h = harness(EngineConfig::new("plans", "plans"));
        h.remote.seed(Record::new("g", 20).with_id("a"));
        h.remote.seed(Record::new("g", 10).with_id("b"));
        h.engine.sync("g", SyncMode::FirstLoad).await.unwrap();

        let patch = json!({"lastAccess": "yesterday"});
        let result = h.engine.update("g", "a", patch.as_object().unwrap().clone()).await;

        assert_eq!(result, Err(SyncError::InvalidPatch("lastAccess".into())));
        assert_eq!(h.engine.records.load("g").len(), 2);
        // never sent remotely
        assert!(!h.remote.get("a").unwrap().payload.contains_key("updatedAt"));
    }

    #[tokio::test]
    async fn test_publish_drops_core_names_from_payload() {
        let h = harness(EngineConfig::new("plans", "plans"));
        let mut record = Record::new("g", 0);
        record.payload.insert("ownerGroup".into(), json!(42));
        h.engine.publish("g", record, &[]).await.unwrap();

        let cached = h.engine.records.load("g");
        assert_eq!(cached.len(), 1);
        assert!(!cached[0].payload.contains_key("ownerGroup"));
    }

    #[tokio::test]
    async fn test_update_patches_cache_and_view() {
        let h = harness(EngineConfig::new("plans", "plans"));
        h.remote.seed(Record::new("g", 20).with_id("a"));
        h.remote.seed(Record::new("g", 10).with_id("b"));
        h.engine.sync("g", SyncMode::FirstLoad).await.unwrap();

        let patch = json!({"title": "renamed", "createdAt": 30});
        let patched = h
            .engine
            .update("g", "b", patch.as_object().unwrap().clone())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(patched.payload["title"], "renamed");
        assert_eq!(patched.payload["updatedAt"], 1_000_000);
        assert_eq!(h.engine.records.load("g")[0].id(), Some("b"));
        assert_eq!(h.engine.session("g").view[0].id(), Some("b"));
        assert_eq!(h.remote.get("b").unwrap().payload["title"], "renamed");
    }

    #[tokio::test]
    async fn test_update_uncached_record() {
        let h = harness(EngineConfig::new("plans", "plans"));
        h.remote.seed(Record::new("g", 20).with_id("a"));

        let patched = h.engine.update("g", "a", Map::new()).await.unwrap();

        assert!(patched.is_none());
        assert_eq!(h.remote.get("a").unwrap().payload["updatedAt"], 1_000_000);
    }

    #[tokio::test]
    async fn test_update_rejected() {
        let h = harness(EngineConfig::new("plans", "plans"));
        let result = h.engine.update("g", "ghost", Map::new()).await;
        assert!(matches!(result, Err(SyncError::RemoteRejected(_))));
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_assets() {
        let h = harness(assets_config());
        let local = h.fs.create_temp(16);
        let published = h.engine.publish("g", Record::new("g", 0), &[local]).await.unwrap();
        let id = published.id().unwrap().to_string();
        let asset = published.asset_refs[0].clone();

        h.engine.delete("g", &id, None).await.unwrap();

        assert!(h.remote.get(&id).is_none());
        assert!(h.engine.records.load("g").is_empty());
        assert!(!h.binary.contains(&asset.remote_id));
        assert!(!h.fs.contains(asset.local_path.as_deref().unwrap()));
        assert_eq!(h.engine.image_stats("g").entry_count, 0);
    }

    #[tokio::test]
    async fn test_delete_keeps_shared_assets() {
        let h = harness(assets_config());
        h.binary.put_object("cloud://shared", 8);
        let shared = AssetRef::remote("cloud://shared");
        h.remote.seed(Record::new("g", 20).with_id("a").with_asset(shared.clone()));
        h.remote.seed(Record::new("g", 10).with_id("b").with_asset(shared));
        h.engine.sync("g", SyncMode::FirstLoad).await.unwrap();

        h.engine.delete("g", "a", None).await.unwrap();

        assert!(h.binary.contains("cloud://shared"));
        assert!(h.engine.images.entry("g", "cloud://shared").is_some());
        assert_eq!(h.engine.session("g").view.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_uses_explicit_record_when_uncached() {
        let h = harness(assets_config());
        h.binary.put_object("cloud://x", 8);
        let record = Record::new("g", 1).with_id("a").with_asset(AssetRef::remote("cloud://x"));
        h.remote.seed(record.clone());

        h.engine.delete("g", "a", Some(&record)).await.unwrap();

        assert!(!h.binary.contains("cloud://x"));
    }

    #[tokio::test]
    async fn test_delete_failure_keeps_local_state() {
        let h = harness(EngineConfig::new("plans", "plans"));
        h.remote.seed(Record::new("g", 20).with_id("a"));
        h.engine.sync("g", SyncMode::FirstLoad).await.unwrap();
        h.remote.set_offline(true);

        let result = h.engine.delete("g", "a", None).await;

        assert!(result.is_err());
        assert_eq!(h.engine.records.load("g").len(), 1);
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("/photos/2024/beach.jpg"), "beach.jpg");
        assert_eq!(file_name("mem://tmp/3"), "3");
    }
}
