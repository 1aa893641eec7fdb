// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for one engine instance (one collection).
//!
//! # Example
//!
//! ```
//! use collection_sync::{EngineConfig, SortOrder};
//!
//! // Minimal config (uses defaults)
//! let config = EngineConfig::new("moments", "moments");
//! assert_eq!(config.page_size, 20);
//! assert_eq!(config.retention_days, 30);
//!
//! // Collection with images, oldest first
//! let config = EngineConfig {
//!     has_assets: true,
//!     sort_order: SortOrder::Ascending,
//!     page_size: 10,
//!     ..EngineConfig::new("plans", "plans")
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::record::{is_core_field, SortOrder};
use crate::storage::traits::SyncError;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for a sync engine instance.
///
/// `collection` and `cache_prefix` are required; everything else has a
/// default. The configuration is fixed once the engine is built.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Remote collection name (used for upload hints and logging)
    pub collection: String,

    /// Prefix of every PersistentKv key written by this instance
    pub cache_prefix: String,

    /// Records per remote page (default: 20)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Pages worth of records kept in the local cache (default: 10)
    #[serde(default = "default_max_cached_pages")]
    pub max_cached_pages: usize,

    /// Records and images idle longer than this are evicted (default: 30 days)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Minimum gap between automatic cleanups (default: 2 days)
    #[serde(default = "default_cleanup_interval_days")]
    pub cleanup_interval_days: u32,

    /// Whether records carry binary assets that should be materialized
    #[serde(default)]
    pub has_assets: bool,

    /// Remote field the collection is ordered by
    #[serde(default = "default_sort_field")]
    pub sort_field: String,

    #[serde(default)]
    pub sort_order: SortOrder,

    /// Payload field stamped with the current time on publish and update
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,

    /// Extra equality filter applied to every remote query
    #[serde(default)]
    pub filter: Map<String, Value>,

    /// Upper bound for materialized image bytes per owner group (default: 100 MB)
    #[serde(default = "default_image_cache_max_bytes")]
    pub image_cache_max_bytes: u64,
}

fn default_page_size() -> usize { 20 }
fn default_max_cached_pages() -> usize { 10 }
fn default_retention_days() -> u32 { 30 }
fn default_cleanup_interval_days() -> u32 { 2 }
fn default_sort_field() -> String { "createdAt".to_string() }
fn default_timestamp_field() -> String { "updatedAt".to_string() }
fn default_image_cache_max_bytes() -> u64 { 100 * 1024 * 1024 } // 100 MB

impl EngineConfig {
    /// Config for `collection` with every optional field at its default.
    pub fn new(collection: impl Into<String>, cache_prefix: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            cache_prefix: cache_prefix.into(),
            page_size: default_page_size(),
            max_cached_pages: default_max_cached_pages(),
            retention_days: default_retention_days(),
            cleanup_interval_days: default_cleanup_interval_days(),
            has_assets: false,
            sort_field: default_sort_field(),
            sort_order: SortOrder::default(),
            timestamp_field: default_timestamp_field(),
            filter: Map::new(),
            image_cache_max_bytes: default_image_cache_max_bytes(),
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.collection.trim().is_empty() {
            return Err(SyncError::InvalidConfig("collection name is empty".into()));
        }
        if self.cache_prefix.trim().is_empty() {
            return Err(SyncError::InvalidConfig("cache prefix is empty".into()));
        }
        if self.page_size == 0 {
            return Err(SyncError::InvalidConfig("page_size must be at least 1".into()));
        }
        if self.max_cached_pages == 0 {
            return Err(SyncError::InvalidConfig("max_cached_pages must be at least 1".into()));
        }
        if self.sort_field.is_empty() {
            return Err(SyncError::InvalidConfig("sort_field is empty".into()));
        }
        if is_core_field(&self.timestamp_field) {
            return Err(SyncError::InvalidConfig(format!(
                "timestamp_field '{}' collides with a core record field",
                self.timestamp_field
            )));
        }
        Ok(())
    }

    /// Most records the local cache retains per owner group.
    #[must_use]
    pub fn max_cached_records(&self) -> usize {
        self.page_size.saturating_mul(self.max_cached_pages)
    }

    #[must_use]
    pub fn retention_period(&self) -> Duration {
        DAY * self.retention_days
    }

    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        DAY * self.cleanup_interval_days
    }

    pub(crate) fn records_key(&self, owner_group: &str) -> String {
        format!("{}_{}", self.cache_prefix, owner_group)
    }

    pub(crate) fn image_table_key(&self, owner_group: &str) -> String {
        format!("{}_imageCache_{}", self.cache_prefix, owner_group)
    }

    pub(crate) fn stats_key(&self, owner_group: &str) -> String {
        format!("{}_cacheStats_{}", self.cache_prefix, owner_group)
    }
}
