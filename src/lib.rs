// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Collection Sync
//!
//! A cache-first synchronization engine for paged remote collections.
//!
//! ## Architecture
//!
//! One [`SyncEngine`] serves one remote collection. Records are partitioned
//! by owner group; every query, cache bucket and image table is scoped by it.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SyncEngine                           │
//! │  • sync(FirstLoad | Refresh | LoadMore)                     │
//! │  • publish / update / delete                                │
//! │  • one sync in flight per instance                          │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                      │
//!          ▼                    ▼                      ▼
//! ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────────┐
//! │ RemoteCollection │ │   RecordCache    │ │   ImageCacheTable    │
//! │  paged queries   │ │  dedup, sorted,  │ │  remoteId → local    │
//! │  insert/update/  │ │  bounded mirror  │ │  file, LRU + idle    │
//! │  delete          │ │  per owner group │ │  eviction            │
//! └──────────────────┘ └──────────────────┘ └──────────────────────┘
//!                               │                 │          │
//!                               ▼                 ▼          ▼
//!                        ┌──────────────┐  ┌────────────┐ ┌─────────────┐
//!                        │ PersistentKv │  │ FileSystem │ │ BinaryStore │
//!                        └──────────────┘  └────────────┘ └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use collection_sync::{EngineConfig, Record, SyncEngine, SyncMode};
//! use collection_sync::storage::memory::{
//!     MemoryBinaryStore, MemoryFileSystem, MemoryKv, MemoryRemoteCollection,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), collection_sync::SyncError> {
//! let config = EngineConfig {
//!     page_size: 2,
//!     ..EngineConfig::new("plans", "planCache")
//! };
//!
//! let remote = Arc::new(MemoryRemoteCollection::new("createdAt"));
//! let fs = Arc::new(MemoryFileSystem::new());
//! let engine = SyncEngine::new(
//!     config,
//!     remote.clone(),
//!     Arc::new(MemoryBinaryStore::new(fs.clone())),
//!     fs,
//!     Arc::new(MemoryKv::new()),
//! )?;
//!
//! // Publish a record (the store assigns the id)
//! let plan = Record::new("pair-1", 0).with_field("title", json!("Museum day"));
//! let published = engine.publish("pair-1", plan, &[]).await?;
//!
//! // Cache-first read of the owner group
//! let view = engine.sync("pair-1", SyncMode::FirstLoad).await?;
//! assert_eq!(view[0].id(), published.id());
//!
//! // Next page, if any
//! let view = engine.sync("pair-1", SyncMode::LoadMore).await?;
//! assert_eq!(view.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Staleness check**: a head page that matches the cache skips merge and downloads
//! - **Bounded cache**: newest `page_size × max_cached_pages` records per owner group
//! - **Asset materialization**: downloads once, de-duplicates concurrent requests
//! - **Eviction**: idle-time retention for records and images, LRU for image bytes
//! - **Offline fallback**: a failed head fetch serves the cached records
//! - **Reference-counted deletes**: shared assets survive while still referenced
//!
//! ## Modules
//!
//! - [`coordinator`]: The main [`SyncEngine`]
//! - [`cache`]: Record cache and image table
//! - [`eviction`]: Pure retention and capacity planning
//! - [`storage`]: Collaborator traits plus memory and disk implementations
//! - [`resilience`]: Retry helper and collaborator timeouts
//! - [`metrics`]: `metrics` facade instrumentation

pub mod config;
pub mod record;
pub mod storage;
pub mod cache;
pub mod eviction;
pub mod resilience;
pub mod coordinator;
pub mod metrics;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::EngineConfig;
pub use record::{now_millis, AssetRef, Record, SortOrder};
pub use coordinator::{Clock, CleanupReport, PaginationCursor, Staleness, SyncEngine, SyncMode};
pub use cache::{CacheStats, EvictionOutcome, ImageCacheEntry};
pub use eviction::ImageEvictionPlan;
pub use storage::traits::{
    BinaryStore, FileSystem, PersistentKv, RemoteCollection, RemoteQuery, SavedFile, SyncError,
};
pub use resilience::retry::{retry, RetryConfig};
pub use resilience::timeout::{TimeoutBinaryStore, TimeoutRemote};
pub use metrics::LatencyTimer;
