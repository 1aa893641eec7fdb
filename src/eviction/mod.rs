// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Eviction planning for the record cache and the image table.
//!
//! Every function here is pure: it takes `(now, entries, thresholds)` and
//! returns a plan describing what to keep and what to drop. Applying the
//! plan (deleting files, writing the table back) is the caller's job, so
//! the policies are testable without a clock or a file system.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Eviction Module                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  retention.rs   - Idle-time eviction                         │
//! │  └─ partition_expired_records: records idle past retention   │
//! │  └─ plan_expired_images: image entries idle past retention   │
//! ├──────────────────────────────────────────────────────────────┤
//! │  capacity.rs    - Size-bounded eviction                      │
//! │  └─ plan_for_space: oldest last_access first until freed     │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod retention;
pub mod capacity;

use crate::cache::entry::{ImageCacheEntry, ImageTable};

/// Outcome of planning an image eviction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageEvictionPlan {
    /// Entries that stay in the table
    pub kept: ImageTable,
    /// Entries to remove (their files must be deleted)
    pub evicted: Vec<ImageCacheEntry>,
}

impl ImageEvictionPlan {
    #[must_use]
    pub fn bytes_freed(&self) -> u64 {
        self.evicted.iter().map(|e| e.size_bytes).sum()
    }

    pub fn files_to_delete(&self) -> impl Iterator<Item = &str> {
        self.evicted.iter().map(|e| e.local_path.as_str())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty()
    }
}
