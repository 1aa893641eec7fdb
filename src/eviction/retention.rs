// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retention (idle-time) eviction.
//!
//! An item is expired iff its `last_access` is strictly before
//! `now - retention`.

use std::time::Duration;

use crate::cache::entry::ImageTable;
use crate::record::Record;

use super::ImageEvictionPlan;

/// Oldest `last_access` that is still retained.
#[must_use]
pub fn expiry_threshold(now: i64, retention: Duration) -> i64 {
    let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
    now.saturating_sub(retention_ms)
}

#[inline]
#[must_use]
pub fn is_expired(last_access: i64, threshold: i64) -> bool {
    last_access < threshold
}

/// Split records into `(kept, expired)`, preserving order in both.
#[must_use]
pub fn partition_expired_records(
    records: Vec<Record>,
    now: i64,
    retention: Duration,
) -> (Vec<Record>, Vec<Record>) {
    let threshold = expiry_threshold(now, retention);
    records
        .into_iter()
        .partition(|r| !is_expired(r.last_access, threshold))
}

/// Plan removal of every image entry idle past `retention`.
#[must_use]
pub fn plan_expired_images(table: &ImageTable, now: i64, retention: Duration) -> ImageEvictionPlan {
    let threshold = expiry_threshold(now, retention);
    let mut plan = ImageEvictionPlan::default();
    for (remote_id, entry) in table {
        if is_expired(entry.last_access, threshold) {
            plan.evicted.push(entry.clone());
        } else {
            plan.kept.insert(remote_id.clone(), entry.clone());
        }
    }
    plan
}
