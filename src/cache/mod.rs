// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local persistence: the record cache and the image table.
//!
//! Both live in the host's [`PersistentKv`](crate::PersistentKv) under keys
//! derived from the collection's cache prefix and the owner group:
//!
//! | Key                                  | Shape                          |
//! |--------------------------------------|--------------------------------|
//! | `{prefix}_{ownerGroup}`              | array of records               |
//! | `{prefix}_imageCache_{ownerGroup}`   | object remoteId → entry        |
//! | `{prefix}_cacheStats_{ownerGroup}`   | `{totalBytes, entryCount, ..}` |

pub mod entry;
pub mod images;
pub mod records;

pub use entry::{CacheStats, ImageCacheEntry, ImageTable};
pub use images::{EvictionOutcome, ImageCacheTable};
pub use records::RecordCache;
