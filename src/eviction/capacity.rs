// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use crate::cache::entry::{ImageCacheEntry, ImageTable};

use super::ImageEvictionPlan;

/// Plan evictions that reclaim at least `needed_bytes`.
///
/// Entries go oldest `last_access` first (ties broken by remote id) until
/// enough bytes are freed or the table is empty. The plan may free less
/// than requested; callers compare against [`ImageEvictionPlan::bytes_freed`].
#[must_use]
pub fn plan_for_space(table: &ImageTable, needed_bytes: u64) -> ImageEvictionPlan {
    if needed_bytes == 0 {
        return ImageEvictionPlan {
            kept: table.clone(),
            evicted: Vec::new(),
        };
    }

    let mut by_age: Vec<&ImageCacheEntry> = table.values().collect();
    by_age.sort_by(|a, b| {
        a.last_access
            .cmp(&b.last_access)
            .then_with(|| a.remote_id.cmp(&b.remote_id))
    });

    let mut plan = ImageEvictionPlan {
        kept: table.clone(),
        evicted: Vec::new(),
    };
    let mut freed = 0u64;
    for entry in by_age {
        if freed >= needed_bytes {
            break;
        }
        plan.kept.remove(&entry.remote_id);
        freed = freed.saturating_add(entry.size_bytes);
        plan.evicted.push(entry.clone());
    }
    plan
}

/// Bytes by which inserting `incoming` would overshoot `max_bytes`.
#[must_use]
pub fn overflow(current_bytes: u64, incoming: u64, max_bytes: u64) -> u64 {
    current_bytes.saturating_add(incoming).saturating_sub(max_bytes)
}
