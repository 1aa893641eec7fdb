// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine coordinator.
//!
//! The [`SyncEngine`] ties together all components for one collection:
//! - the remote paged store ([`RemoteCollection`])
//! - the local record cache ([`RecordCache`])
//! - the image table with materialized assets ([`ImageCacheTable`])
//! - a per-owner-group session view and pagination cursor
//!
//! # Sync flow
//!
//! ```text
//! sync(g, FirstLoad|Refresh)
//!   ├─ busy? ───────────────────────────────► Ok([])
//!   ├─ query(skip 0) fails ─────────────────► cached records (fallback)
//!   ├─ page vs cache: stale ────────────────► merge, materialize, save
//!   └─ page vs cache: fresh ────────────────► reuse cached paths, touch
//!
//! sync(g, LoadMore)
//!   ├─ !has_more ───────────────────────────► view unchanged
//!   └─ query(skip cursor) ──────────────────► append to view + cache
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use collection_sync::{EngineConfig, Record, SyncEngine, SyncMode};
//! use collection_sync::storage::memory::{
//!     MemoryBinaryStore, MemoryFileSystem, MemoryKv, MemoryRemoteCollection,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let remote = Arc::new(MemoryRemoteCollection::new("createdAt"));
//! remote.seed(Record::new("pair-1", 100).with_id("a"));
//!
//! let fs = Arc::new(MemoryFileSystem::new());
//! let engine = SyncEngine::new(
//!     EngineConfig::new("plans", "plans"),
//!     remote,
//!     Arc::new(MemoryBinaryStore::new(fs.clone())),
//!     fs,
//!     Arc::new(MemoryKv::new()),
//! )
//! .expect("valid config");
//!
//! let view = engine.sync("pair-1", SyncMode::FirstLoad).await.unwrap();
//! assert_eq!(view[0].id(), Some("a"));
//! # }
//! ```

mod types;
mod staleness;
mod sync;
mod mutations;
mod maintenance;

pub use types::{CleanupReport, PaginationCursor, Staleness, SyncMode};
pub use staleness::assess as assess_staleness;

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::cache::{ImageCacheTable, RecordCache};
use crate::config::EngineConfig;
use crate::record::{now_millis, Record};
use crate::storage::traits::{
    BinaryStore, FileSystem, PersistentKv, RemoteCollection, RemoteQuery, SyncError,
};

/// Source of "now" in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// What the host currently shows for one owner group.
#[derive(Debug, Clone, Default)]
pub(crate) struct Session {
    pub(crate) view: Vec<Record>,
    pub(crate) cursor: PaginationCursor,
}

/// Cache-first synchronization of one remote collection.
///
/// # Thread Safety
///
/// The engine is `Send + Sync`; share it behind an `Arc`. At most one
/// [`sync`](Self::sync) runs at a time per instance, a concurrent call
/// returns an empty result immediately instead of queueing.
pub struct SyncEngine {
    pub(super) config: Arc<EngineConfig>,
    pub(super) remote: Arc<dyn RemoteCollection>,
    pub(super) binary: Arc<dyn BinaryStore>,
    pub(super) fs: Arc<dyn FileSystem>,
    pub(super) records: RecordCache,
    pub(super) images: ImageCacheTable,
    /// Session view and cursor per owner group
    pub(super) sessions: DashMap<String, Session>,
    /// Held for the duration of a sync; `try_lock` only
    pub(super) sync_guard: tokio::sync::Mutex<()>,
    pub(super) clock: Clock,
}

impl SyncEngine {
    /// Build an engine for one collection.
    ///
    /// Fails with [`SyncError::InvalidConfig`] when the configuration is
    /// unusable.
    pub fn new(
        config: EngineConfig,
        remote: Arc<dyn RemoteCollection>,
        binary: Arc<dyn BinaryStore>,
        fs: Arc<dyn FileSystem>,
        kv: Arc<dyn PersistentKv>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let config = Arc::new(config);

        info!(
            collection = %config.collection,
            page_size = config.page_size,
            has_assets = config.has_assets,
            sort = %config.sort_order,
            "Sync engine created"
        );

        Ok(Self {
            records: RecordCache::new(Arc::clone(&config), Arc::clone(&kv)),
            images: ImageCacheTable::new(
                Arc::clone(&config),
                kv,
                Arc::clone(&fs),
                Arc::clone(&binary),
            ),
            config,
            remote,
            binary,
            fs,
            sessions: DashMap::new(),
            sync_guard: tokio::sync::Mutex::new(()),
            clock: Arc::new(now_millis),
        })
    }

    /// Replace the wall clock (epoch millis).
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether a sync is running right now.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.sync_guard.try_lock().is_err()
    }

    pub(super) fn now(&self) -> i64 {
        (self.clock)()
    }

    pub(super) fn page_query(&self, owner_group: &str, skip: usize) -> RemoteQuery {
        RemoteQuery {
            owner_group: owner_group.to_string(),
            filter: self.config.filter.clone(),
            sort_field: self.config.sort_field.clone(),
            sort_order: self.config.sort_order,
            skip,
            limit: self.config.page_size,
        }
    }

    pub(super) fn session(&self, owner_group: &str) -> Session {
        self.sessions
            .get(owner_group)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    pub(super) fn set_session(&self, owner_group: &str, view: Vec<Record>, cursor: PaginationCursor) {
        self.sessions
            .insert(owner_group.to_string(), Session { view, cursor });
    }

    /// Apply `f` to the session view, if the owner group has one.
    pub(super) fn update_view(&self, owner_group: &str, f: impl FnOnce(&mut Vec<Record>)) {
        if let Some(mut session) = self.sessions.get_mut(owner_group) {
            f(&mut session.view);
        }
    }
}
