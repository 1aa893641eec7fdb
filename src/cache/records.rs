// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local mirror of a remote collection, one bucket per owner group.
//!
//! Each bucket is a JSON array stored at `{prefix}_{ownerGroup}`. The
//! bucket is always written sorted, deduplicated by id, and truncated to
//! the newest `page_size × max_cached_pages` records.
//!
//! Storage failures never escape this type: a corrupt or unreadable bucket
//! reads as empty (forcing a full refetch), a failed write is logged and the
//! in-memory result is still returned to the caller.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::eviction::retention::partition_expired_records;
use crate::record::Record;
use crate::storage::traits::{PersistentKv, SyncError};

pub struct RecordCache {
    config: Arc<EngineConfig>,
    kv: Arc<dyn PersistentKv>,
}

impl RecordCache {
    pub fn new(config: Arc<EngineConfig>, kv: Arc<dyn PersistentKv>) -> Self {
        Self { config, kv }
    }

    /// Read a bucket, sorted by the configured order.
    ///
    /// A stored value that is not an array of records is discarded.
    pub fn load(&self, owner_group: &str) -> Vec<Record> {
        let key = self.config.records_key(owner_group);
        let value = match self.kv.get(&key) {
            Ok(Some(value)) => value,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(key = %key, error = %e, "Record cache read failed, treating as empty");
                crate::metrics::record_error(&self.config.collection, "cache_read", "kv");
                return Vec::new();
            }
        };

        match Self::decode(&key, value) {
            Ok(mut records) => {
                self.config.sort_order.sort(&mut records);
                records
            }
            Err(e) => {
                warn!(error = %e, "Discarding corrupt record cache");
                crate::metrics::record_corrupt_cache(&self.config.collection, "records");
                if let Err(e) = self.kv.remove(&key) {
                    warn!(key = %key, error = %e, "Failed to remove corrupt record cache");
                }
                Vec::new()
            }
        }
    }

    fn decode(key: &str, value: Value) -> Result<Vec<Record>, SyncError> {
        if !value.is_array() {
            return Err(SyncError::LocalCorrupt {
                key: key.to_string(),
                reason: "expected an array of records".into(),
            });
        }
        serde_json::from_value(value).map_err(|e| SyncError::LocalCorrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// Last-writer-wins merge: `incoming` first, then every `existing`
    /// record whose id does not appear in `incoming`.
    ///
    /// Relative order inside each group is preserved. Records without an
    /// id never collide. A repeated id inside `incoming` keeps its first
    /// occurrence.
    #[must_use]
    pub fn merge(incoming: Vec<Record>, existing: Vec<Record>) -> Vec<Record> {
        let mut seen: HashSet<String> = HashSet::with_capacity(incoming.len());
        let mut merged = Vec::with_capacity(incoming.len() + existing.len());

        for record in incoming {
            if let Some(id) = record.id() {
                if !seen.insert(id.to_string()) {
                    continue;
                }
            }
            merged.push(record);
        }
        merged.extend(
            existing
                .into_iter()
                .filter(|r| r.id().map_or(true, |id| !seen.contains(id))),
        );
        merged
    }

    /// Persist a bucket; returns what was actually retained.
    ///
    /// Keeps the newest `max_cached_records()` by `sort_timestamp`, then
    /// sorts in the configured order. Duplicate ids keep their first
    /// occurrence.
    pub fn save(&self, owner_group: &str, records: Vec<Record>) -> Vec<Record> {
        let mut retained = Self::merge(records, Vec::new());

        let limit = self.config.max_cached_records();
        if retained.len() > limit {
            // newest first, stable so equal timestamps keep caller order
            retained.sort_by(|a, b| b.sort_timestamp.cmp(&a.sort_timestamp));
            let dropped = retained.len() - limit;
            retained.truncate(limit);
            debug!(owner_group, dropped, limit, "Truncated record cache");
        }
        self.config.sort_order.sort(&mut retained);

        let key = self.config.records_key(owner_group);
        match serde_json::to_value(&retained) {
            Ok(value) => {
                if let Err(e) = self.kv.set(&key, &value) {
                    warn!(key = %key, error = %e, "Record cache write failed; cache may be stale");
                    crate::metrics::record_error(&self.config.collection, "cache_write", "kv");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "Record cache serialization failed"),
        }
        crate::metrics::set_cached_records(&self.config.collection, retained.len());
        retained
    }

    /// Remove every record idle past `retention`; returns how many went.
    pub fn evict_expired(&self, owner_group: &str, now: i64, retention: Duration) -> usize {
        let records = self.load(owner_group);
        if records.is_empty() {
            return 0;
        }
        let (kept, expired) = partition_expired_records(records, now, retention);
        if !expired.is_empty() {
            self.save(owner_group, kept);
            debug!(owner_group, evicted = expired.len(), "Evicted expired records");
            crate::metrics::record_eviction(
                &self.config.collection,
                "records",
                "retention",
                expired.len(),
                0,
            );
        }
        expired.len()
    }

    /// Add records whose id is not cached yet, after the existing ones.
    pub fn append(&self, owner_group: &str, records: Vec<Record>) -> Vec<Record> {
        let existing = self.load(owner_group);
        self.save(owner_group, Self::merge(existing, records))
    }

    /// Put `record` at the head of the bucket, replacing any same-id copy.
    pub fn prepend(&self, owner_group: &str, record: Record) -> Vec<Record> {
        let existing = self.load(owner_group);
        self.save(owner_group, Self::merge(vec![record], existing))
    }

    /// Field-merge `patch` into the cached record with `id`.
    pub fn patch(
        &self,
        owner_group: &str,
        id: &str,
        patch: &Map<String, Value>,
        now: i64,
    ) -> Option<Record> {
        let mut records = self.load(owner_group);
        let record = records.iter_mut().find(|r| r.id() == Some(id))?;
        record.apply_patch(patch, &self.config.sort_field);
        record.last_access = now;
        let patched = record.clone();
        self.save(owner_group, records);
        Some(patched)
    }

    /// Remove the cached record with `id`, returning it.
    pub fn remove(&self, owner_group: &str, id: &str) -> Option<Record> {
        let mut records = self.load(owner_group);
        let index = records.iter().position(|r| r.id() == Some(id))?;
        let removed = records.remove(index);
        self.save(owner_group, records);
        Some(removed)
    }

    /// Cache-first read: returns the bucket with `last_access` refreshed.
    pub fn touch_all(&self, owner_group: &str, now: i64) -> Vec<Record> {
        let mut records = self.load(owner_group);
        if records.is_empty() {
            return records;
        }
        for record in &mut records {
            record.last_access = now;
        }
        self.save(owner_group, records)
    }

    /// Refresh `last_access` for the cached records whose id is in `ids`.
    pub fn touch_ids(&self, owner_group: &str, ids: &HashSet<&str>, now: i64) {
        let mut records = self.load(owner_group);
        let mut touched = 0usize;
        for record in &mut records {
            if record.id().is_some_and(|id| ids.contains(id)) {
                record.last_access = now;
                touched += 1;
            }
        }
        if touched > 0 {
            self.save(owner_group, records);
        }
    }

    pub fn clear(&self, owner_group: &str) {
        let key = self.config.records_key(owner_group);
        if let Err(e) = self.kv.remove(&key) {
            warn!(key = %key, error = %e, "Failed to clear record cache");
        }
    }
}
