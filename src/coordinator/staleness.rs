// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::HashSet;

use crate::record::{Record, SortOrder};

use super::Staleness;

/// Decide whether a freshly fetched head page invalidates the cache.
///
/// Checks in order: empty cache, a newer first record, an id absent from
/// the first `page_size` cached records. Anything else is fresh.
#[must_use]
pub fn assess(page: &[Record], cached: &[Record], page_size: usize, order: SortOrder) -> Staleness {
    let Some(cached_head) = cached.first() else {
        return Staleness::EmptyCache;
    };

    if let Some(first) = page.first() {
        if order.is_newer(first.sort_timestamp, cached_head.sort_timestamp) {
            return Staleness::NewerHead;
        }
    }

    let known: HashSet<&str> = cached.iter().take(page_size).filter_map(Record::id).collect();
    if page.iter().any(|r| r.id().map_or(true, |id| !known.contains(id))) {
        return Staleness::UnknownId;
    }

    Staleness::Fresh
}
