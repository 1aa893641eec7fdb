// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory collaborators.
//!
//! Full implementations of every collaborator trait, backed by `DashMap`
//! and `parking_lot` locks. Useful for tests, demos, and hosts that keep
//! the cache purely in memory.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::record::Record;
use super::traits::{
    BinaryStore, FileSystem, PersistentKv, RemoteCollection, RemoteQuery, SavedFile, SyncError,
};

// ═══════════════════════════════════════════════════════════════════════════
// PersistentKv
// ═══════════════════════════════════════════════════════════════════════════

pub struct MemoryKv {
    data: DashMap<String, Value>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistentKv for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<Value>, SyncError> {
        Ok(self.data.get(key).map(|r| r.value().clone()))
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), SyncError> {
        self.data.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.data.remove(key);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FileSystem
// ═══════════════════════════════════════════════════════════════════════════

/// Files are just `path → size` entries.
pub struct MemoryFileSystem {
    files: DashMap<String, u64>,
    next_id: AtomicU64,
}

impl MemoryFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a temporary file of `size_bytes`; returns its path.
    pub fn create_temp(&self, size_bytes: u64) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let path = format!("mem://tmp/{n}");
        self.files.insert(path.clone(), size_bytes);
        path
    }

    /// Drop a file without going through the trait (simulates the OS
    /// purging app storage).
    pub fn purge(&self, path: &str) -> bool {
        self.files.remove(path).is_some()
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    #[must_use]
    pub fn size_of(&self, path: &str) -> Option<u64> {
        self.files.get(path).map(|r| *r.value())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn save(&self, temp_path: &str) -> Result<SavedFile, SyncError> {
        let (_, size_bytes) = self
            .files
            .remove(temp_path)
            .ok_or_else(|| SyncError::Local(format!("no such file: {temp_path}")))?;
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let path = format!("mem://saved/{n}");
        self.files.insert(path.clone(), size_bytes);
        Ok(SavedFile { path, size_bytes })
    }

    async fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    async fn delete(&self, path: &str) -> Result<(), SyncError> {
        self.files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| SyncError::AssetMissing(path.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BinaryStore
// ═══════════════════════════════════════════════════════════════════════════

/// Objects are `remote_id → size`; downloads land as temp files on the
/// shared [`MemoryFileSystem`].
pub struct MemoryBinaryStore {
    objects: DashMap<String, u64>,
    fs: Arc<MemoryFileSystem>,
    next_id: AtomicU64,
    downloads: AtomicUsize,
}

impl MemoryBinaryStore {
    #[must_use]
    pub fn new(fs: Arc<MemoryFileSystem>) -> Self {
        Self {
            objects: DashMap::new(),
            fs,
            next_id: AtomicU64::new(1),
            downloads: AtomicUsize::new(0),
        }
    }

    /// Seed an object directly (as if another device uploaded it).
    pub fn put_object(&self, remote_id: impl Into<String>, size_bytes: u64) {
        self.objects.insert(remote_id.into(), size_bytes);
    }

    #[must_use]
    pub fn contains(&self, remote_id: &str) -> bool {
        self.objects.contains_key(remote_id)
    }

    /// Number of completed downloads so far.
    #[must_use]
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BinaryStore for MemoryBinaryStore {
    async fn upload(&self, local_path: &str, remote_hint: &str) -> Result<String, SyncError> {
        let size = self
            .fs
            .size_of(local_path)
            .ok_or_else(|| SyncError::AssetMissing(local_path.to_string()))?;
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let remote_id = format!("cloud://{remote_hint}#{n}");
        self.objects.insert(remote_id.clone(), size);
        Ok(remote_id)
    }

    async fn download(&self, remote_id: &str) -> Result<String, SyncError> {
        let size = self
            .objects
            .get(remote_id)
            .map(|r| *r.value())
            .ok_or_else(|| SyncError::AssetMissing(remote_id.to_string()))?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(self.fs.create_temp(size))
    }

    async fn delete(&self, remote_ids: &[String]) -> Result<(), SyncError> {
        for id in remote_ids {
            self.objects.remove(id);
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RemoteCollection
// ═══════════════════════════════════════════════════════════════════════════

/// A remote collection held in memory.
///
/// Queries filter by owner group and payload equality, order by
/// `sort_timestamp`, then apply skip/limit. `set_offline(true)` makes every
/// call fail with [`SyncError::RemoteUnavailable`].
pub struct MemoryRemoteCollection {
    records: RwLock<Vec<Record>>,
    sort_field: String,
    next_id: AtomicU64,
    offline: AtomicBool,
    queries: AtomicUsize,
}

impl MemoryRemoteCollection {
    /// `sort_field` is the patch key that maps onto `sort_timestamp`.
    #[must_use]
    pub fn new(sort_field: impl Into<String>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            sort_field: sort_field.into(),
            next_id: AtomicU64::new(1),
            offline: AtomicBool::new(false),
            queries: AtomicUsize::new(0),
        }
    }

    /// Store a record as-is (must carry an id).
    pub fn seed(&self, record: Record) {
        let mut records = self.records.write();
        if let Some(id) = record.id() {
            records.retain(|r| r.id() != Some(id));
        }
        records.push(record.for_remote());
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of `query` calls made so far (including failed ones).
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Record> {
        self.records.read().iter().find(|r| r.id() == Some(id)).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn check_online(&self) -> Result<(), SyncError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(SyncError::RemoteUnavailable("remote collection is offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteCollection for MemoryRemoteCollection {
    async fn query(&self, query: &RemoteQuery) -> Result<Vec<Record>, SyncError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let mut matching: Vec<Record> = self
            .records
            .read()
            .iter()
            .filter(|r| r.owner_group == query.owner_group && r.matches(&query.filter))
            .cloned()
            .collect();
        query.sort_order.sort(&mut matching);
        Ok(matching.into_iter().skip(query.skip).take(query.limit).collect())
    }

    async fn insert(&self, record: &Record) -> Result<String, SyncError> {
        self.check_online()?;
        if record.owner_group.is_empty() {
            return Err(SyncError::RemoteRejected("owner group is required".into()));
        }
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = format!("rec-{n}");
        let mut stored = record.for_remote();
        stored.id = Some(id.clone());
        self.records.write().push(stored);
        Ok(id)
    }

    async fn update_by_id(&self, id: &str, patch: &Map<String, Value>) -> Result<(), SyncError> {
        self.check_online()?;
        let mut records = self.records.write();
        let record = records
            .iter_mut()
            .find(|r| r.id() == Some(id))
            .ok_or_else(|| SyncError::RemoteRejected(format!("no record with id {id}")))?;
        record.apply_patch(patch, &self.sort_field);
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), SyncError> {
        self.check_online()?;
        self.records.write().retain(|r| r.id() != Some(id));
        Ok(())
    }
}
