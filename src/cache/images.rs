// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local materializations of binary assets.
//!
//! The table maps remote id → [`ImageCacheEntry`] and lives next to an
//! aggregate [`CacheStats`] object in the PersistentKv. Every change goes
//! through [`ImageCacheTable::mutate`]: a short synchronous section that
//! reloads the table, applies the change, and writes table and stats back.
//! No `.await` happens while it runs, so concurrent inserts for different
//! ids never overwrite each other.
//!
//! Downloads for the *same* id are collapsed: the first caller takes a
//! per-key in-flight lock, later callers wait on it and then find the entry
//! already present.
//!
//! ```text
//! materialize(g, id)
//!   ├─ entry present & file exists ──► touch, return path
//!   ├─ entry present & file gone ────► drop entry (self-heal)
//!   └─ in-flight lock(g, id)
//!        ├─ re-check table ──────────► reuse path
//!        └─ download → save → make room → insert
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use super::entry::{CacheStats, ImageCacheEntry, ImageTable};
use crate::config::EngineConfig;
use crate::eviction::{capacity, retention, ImageEvictionPlan};
use crate::storage::traits::{BinaryStore, FileSystem, PersistentKv, SavedFile, SyncError};

/// Entries and bytes removed by one eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionOutcome {
    pub entries: usize,
    pub bytes_freed: u64,
}

type InflightKey = (String, String);

pub struct ImageCacheTable {
    config: Arc<EngineConfig>,
    kv: Arc<dyn PersistentKv>,
    fs: Arc<dyn FileSystem>,
    binary: Arc<dyn BinaryStore>,
    write_lock: Mutex<()>,
    inflight: Mutex<HashMap<InflightKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ImageCacheTable {
    pub fn new(
        config: Arc<EngineConfig>,
        kv: Arc<dyn PersistentKv>,
        fs: Arc<dyn FileSystem>,
        binary: Arc<dyn BinaryStore>,
    ) -> Self {
        Self {
            config,
            kv,
            fs,
            binary,
            write_lock: Mutex::new(()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Persistence
    // ═══════════════════════════════════════════════════════════════════════

    fn load_table(&self, owner_group: &str) -> ImageTable {
        let key = self.config.image_table_key(owner_group);
        match self.kv.get(&key) {
            Ok(None) => ImageTable::new(),
            Ok(Some(value)) => match serde_json::from_value::<ImageTable>(value) {
                Ok(table) => table,
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding corrupt image table");
                    crate::metrics::record_corrupt_cache(&self.config.collection, "images");
                    if let Err(e) = self.kv.remove(&key) {
                        warn!(key = %key, error = %e, "Failed to remove corrupt image table");
                    }
                    ImageTable::new()
                }
            },
            Err(e) => {
                warn!(key = %key, error = %e, "Image table read failed, treating as empty");
                ImageTable::new()
            }
        }
    }

    fn load_stats(&self, owner_group: &str) -> CacheStats {
        let key = self.config.stats_key(owner_group);
        match self.kv.get(&key) {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(key = %key, error = %e, "Discarding corrupt cache stats");
                crate::metrics::record_corrupt_cache(&self.config.collection, "stats");
                CacheStats::default()
            }),
            Ok(None) => CacheStats::default(),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache stats read failed");
                CacheStats::default()
            }
        }
    }

    fn write(&self, key: &str, value: Result<Value, serde_json::Error>) {
        let result = value
            .map_err(|e| SyncError::Local(e.to_string()))
            .and_then(|v| self.kv.set(key, &v));
        if let Err(e) = result {
            warn!(key = %key, error = %e, "Image cache write failed");
            crate::metrics::record_error(&self.config.collection, "image_cache_write", "kv");
        }
    }

    fn persist(&self, owner_group: &str, table: &ImageTable, stats: CacheStats) -> CacheStats {
        let stats = stats.recomputed(table);
        self.write(&self.config.image_table_key(owner_group), serde_json::to_value(table));
        self.write(&self.config.stats_key(owner_group), serde_json::to_value(stats));
        crate::metrics::set_image_cache_bytes(&self.config.collection, stats.total_bytes);
        crate::metrics::set_image_cache_entries(&self.config.collection, stats.entry_count);
        stats
    }

    /// Read-modify-write of one owner group's table.
    ///
    /// Must stay synchronous: the write lock is a blocking mutex.
    fn mutate<R>(&self, owner_group: &str, f: impl FnOnce(&mut ImageTable) -> R) -> R {
        let _guard = self.write_lock.lock();
        let mut table = self.load_table(owner_group);
        let before = table.clone();
        let result = f(&mut table);
        if table != before {
            let stats = self.load_stats(owner_group);
            self.persist(owner_group, &table, stats);
        }
        result
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lookups
    // ═══════════════════════════════════════════════════════════════════════

    #[must_use]
    pub fn entry(&self, owner_group: &str, remote_id: &str) -> Option<ImageCacheEntry> {
        self.load_table(owner_group).remove(remote_id)
    }

    /// Aggregate stats, recounted from the table.
    #[must_use]
    pub fn stats(&self, owner_group: &str) -> CacheStats {
        self.load_stats(owner_group)
            .recomputed(&self.load_table(owner_group))
    }

    /// Refresh `last_access`; `false` when the id has no entry.
    pub fn touch(&self, owner_group: &str, remote_id: &str, now: i64) -> bool {
        self.mutate(owner_group, |table| match table.get_mut(remote_id) {
            Some(entry) => {
                entry.last_access = now;
                true
            }
            None => false,
        })
    }

    /// Path of a live entry, touched. A dangling entry is removed.
    async fn lookup_live(&self, owner_group: &str, remote_id: &str, now: i64) -> Option<String> {
        let entry = self.entry(owner_group, remote_id)?;
        if self.fs.exists(&entry.local_path).await {
            self.touch(owner_group, remote_id, now);
            crate::metrics::record_image_lookup(&self.config.collection, "hit");
            return Some(entry.local_path);
        }

        let missing = SyncError::AssetMissing(entry.local_path.clone());
        warn!(owner_group, remote_id, error = %missing, "Cached file vanished, dropping entry");
        crate::metrics::record_image_lookup(&self.config.collection, "stale");
        self.mutate(owner_group, |table| {
            if table.get(remote_id).is_some_and(|e| e.local_path == entry.local_path) {
                table.remove(remote_id);
            }
        });
        None
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Materialization
    // ═══════════════════════════════════════════════════════════════════════

    /// Local path for `remote_id`, downloading it if needed.
    #[tracing::instrument(skip(self), fields(collection = %self.config.collection))]
    pub async fn materialize(
        &self,
        owner_group: &str,
        remote_id: &str,
        now: i64,
    ) -> Result<String, SyncError> {
        if let Some(path) = self.lookup_live(owner_group, remote_id, now).await {
            return Ok(path);
        }

        let key = (owner_group.to_string(), remote_id.to_string());
        let lock = {
            let mut map = self.inflight.lock();
            Arc::clone(
                map.entry(key.clone())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };

        let result = {
            let _inflight = lock.lock().await;
            // another caller may have finished the download while we waited
            match self.lookup_live(owner_group, remote_id, now).await {
                Some(path) => Ok(path),
                None => self.download(owner_group, remote_id, now).await,
            }
        };

        {
            let mut map = self.inflight.lock();
            // map + our clone: nobody else is waiting
            if map.get(&key).is_some_and(|l| Arc::strong_count(l) <= 2) {
                map.remove(&key);
            }
        }
        result
    }

    async fn download(&self, owner_group: &str, remote_id: &str, now: i64) -> Result<String, SyncError> {
        crate::metrics::record_image_lookup(&self.config.collection, "miss");

        let temp = self.binary.download(remote_id).await.map_err(|e| {
            crate::metrics::record_error(&self.config.collection, "download", "binary_store");
            e
        })?;
        let saved = self.fs.save(&temp).await?;
        crate::metrics::record_download(&self.config.collection, saved.size_bytes);
        debug!(owner_group, remote_id, size_bytes = saved.size_bytes, "Downloaded asset");

        let path = saved.path.clone();
        self.insert_local(owner_group, remote_id, saved, now).await;
        Ok(path)
    }

    /// Record an asset that is already on local storage.
    ///
    /// Makes room first when the table would exceed
    /// `image_cache_max_bytes`; if that is not possible the insert still
    /// happens.
    pub async fn insert_local(&self, owner_group: &str, remote_id: &str, saved: SavedFile, now: i64) {
        let current = self.stats(owner_group).total_bytes;
        let needed = capacity::overflow(current, saved.size_bytes, self.config.image_cache_max_bytes);
        if needed > 0 {
            let outcome = self.evict_for_space(owner_group, needed).await;
            if outcome.bytes_freed < needed {
                let err = SyncError::CapacityExceeded {
                    needed,
                    freed: outcome.bytes_freed,
                };
                warn!(owner_group, remote_id, error = %err, "Image cache over budget");
            }
        }

        let entry = ImageCacheEntry::new(remote_id.to_string(), saved.path, saved.size_bytes, now);
        let replaced = self.mutate(owner_group, |table| table.insert(remote_id.to_string(), entry.clone()));

        if let Some(old) = replaced.filter(|old| old.local_path != entry.local_path) {
            self.delete_file(&old.local_path).await;
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Eviction
    // ═══════════════════════════════════════════════════════════════════════

    async fn delete_file(&self, path: &str) {
        match self.fs.delete(path).await {
            Ok(()) => {}
            Err(SyncError::AssetMissing(_)) => debug!(path, "Evicted file was already gone"),
            Err(e) => warn!(path, error = %e, "Failed to delete cached file"),
        }
    }

    /// Commit a plan computed against the current table, then delete its files.
    async fn apply(
        &self,
        owner_group: &str,
        reason: &str,
        plan_for: impl FnOnce(&ImageTable) -> ImageEvictionPlan,
    ) -> EvictionOutcome {
        let plan = self.mutate(owner_group, |table| {
            let plan = plan_for(table);
            if !plan.is_empty() {
                *table = plan.kept.clone();
            }
            plan
        });
        if plan.is_empty() {
            return EvictionOutcome::default();
        }

        for path in plan.files_to_delete() {
            self.delete_file(path).await;
        }

        let outcome = EvictionOutcome {
            entries: plan.evicted.len(),
            bytes_freed: plan.bytes_freed(),
        };
        debug!(
            owner_group,
            reason,
            entries = outcome.entries,
            bytes_freed = outcome.bytes_freed,
            "Evicted images"
        );
        crate::metrics::record_eviction(
            &self.config.collection,
            "images",
            reason,
            outcome.entries,
            outcome.bytes_freed,
        );
        outcome
    }

    /// Drop every entry idle past `retention`, deleting its file.
    pub async fn evict_expired(&self, owner_group: &str, now: i64, period: Duration) -> EvictionOutcome {
        self.apply(owner_group, "retention", |table| {
            retention::plan_expired_images(table, now, period)
        })
        .await
    }

    /// Drop least recently used entries until `needed_bytes` are reclaimed
    /// or the table is empty.
    pub async fn evict_for_space(&self, owner_group: &str, needed_bytes: u64) -> EvictionOutcome {
        self.apply(owner_group, "capacity", |table| {
            capacity::plan_for_space(table, needed_bytes)
        })
        .await
    }

    /// Remove one entry and its file.
    pub async fn remove(&self, owner_group: &str, remote_id: &str) -> Option<ImageCacheEntry> {
        let removed = self.mutate(owner_group, |table| table.remove(remote_id))?;
        self.delete_file(&removed.local_path).await;
        Some(removed)
    }

    pub fn mark_cleanup(&self, owner_group: &str, now: i64) {
        let _guard = self.write_lock.lock();
        let table = self.load_table(owner_group);
        let stats = CacheStats {
            last_cleanup_at: now,
            ..self.load_stats(owner_group)
        };
        self.persist(owner_group, &table, stats);
    }

    /// Forget the whole table, deleting every file. Returns entries removed.
    pub async fn clear(&self, owner_group: &str) -> usize {
        let entries: Vec<ImageCacheEntry> = {
            let _guard = self.write_lock.lock();
            let table = self.load_table(owner_group);
            for key in [
                self.config.image_table_key(owner_group),
                self.config.stats_key(owner_group),
            ] {
                if let Err(e) = self.kv.remove(&key) {
                    warn!(key = %key, error = %e, "Failed to clear image cache key");
                }
            }
            table.into_values().collect()
        };
        for entry in &entries {
            self.delete_file(&entry.local_path).await;
        }
        crate::metrics::set_image_cache_bytes(&self.config.collection, 0);
        crate::metrics::set_image_cache_entries(&self.config.collection, 0);
        entries.len()
    }
}
