// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync engine coordinator.

/// What a [`sync`](super::SyncEngine::sync) call should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// First view of an owner group in this session (also runs periodic cleanup)
    FirstLoad,
    /// Re-fetch the head page (pull-to-refresh)
    Refresh,
    /// Fetch the next page after the cursor
    LoadMore,
}

impl SyncMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FirstLoad => "first_load",
            Self::Refresh => "refresh",
            Self::LoadMore => "load_more",
        }
    }

    /// Whether this mode fetches the head page.
    #[must_use]
    pub fn is_head(self) -> bool {
        matches!(self, Self::FirstLoad | Self::Refresh)
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FirstLoad => write!(f, "FirstLoad"),
            Self::Refresh => write!(f, "Refresh"),
            Self::LoadMore => write!(f, "LoadMore"),
        }
    }
}

/// Where the next `LoadMore` starts.
///
/// Reset by every head fetch; advanced only by a successful `LoadMore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationCursor {
    /// Remote offset of the next page
    pub skip: usize,
    /// Whether the last page came back full
    pub has_more: bool,
}

impl Default for PaginationCursor {
    fn default() -> Self {
        Self {
            skip: 0,
            has_more: true,
        }
    }
}

impl PaginationCursor {
    /// Cursor after a head page of `len` records.
    #[must_use]
    pub fn after_head(len: usize, page_size: usize) -> Self {
        Self {
            skip: len,
            has_more: len == page_size,
        }
    }

    /// Cursor after serving `cached_len` records from the local cache.
    #[must_use]
    pub fn after_fallback(cached_len: usize, page_size: usize) -> Self {
        Self {
            skip: cached_len,
            has_more: cached_len >= page_size,
        }
    }

    /// Cursor after a further page of `len` records.
    #[must_use]
    pub fn advanced(self, len: usize, page_size: usize) -> Self {
        Self {
            skip: self.skip + len,
            has_more: len == page_size,
        }
    }
}

/// Verdict of comparing a fetched head page against the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Nothing cached for the owner group
    EmptyCache,
    /// The page starts with a record newer than the cached head
    NewerHead,
    /// The page holds an id missing from the cached head page
    UnknownId,
    /// The cache already reflects the page
    Fresh,
}

impl Staleness {
    #[must_use]
    pub fn is_stale(self) -> bool {
        !matches!(self, Self::Fresh)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmptyCache => "empty_cache",
            Self::NewerHead => "newer_head",
            Self::UnknownId => "unknown_id",
            Self::Fresh => "fresh",
        }
    }
}

impl std::fmt::Display for Staleness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one cleanup pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub records_evicted: usize,
    pub images_evicted: usize,
    pub bytes_freed: u64,
}

impl std::fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "records={}, images={}, bytes={}",
            self.records_evicted, self.images_evicted, self.bytes_freed
        )
    }
}
