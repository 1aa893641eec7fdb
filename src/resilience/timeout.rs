// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Deadline wrappers for the remote collaborators.
//!
//! A call that exceeds its deadline fails with
//! [`SyncError::RemoteUnavailable`], which the engine already treats as a
//! transport failure (cache fallback on reads, surfaced on writes).

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;

use crate::record::Record;
use crate::storage::traits::{BinaryStore, RemoteCollection, RemoteQuery, SyncError};

async fn with_deadline<T>(
    boundary: &'static str,
    operation: &'static str,
    deadline: Duration,
    fut: impl Future<Output = Result<T, SyncError>>,
) -> Result<T, SyncError> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(boundary, operation, ?deadline, "Collaborator call timed out");
            crate::metrics::record_timeout(boundary, operation);
            Err(SyncError::RemoteUnavailable(format!(
                "{boundary}.{operation} timed out after {deadline:?}"
            )))
        }
    }
}

/// [`RemoteCollection`] with a per-call deadline.
pub struct TimeoutRemote<R> {
    inner: R,
    deadline: Duration,
}

impl<R: RemoteCollection> TimeoutRemote<R> {
    pub fn new(inner: R, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: RemoteCollection> RemoteCollection for TimeoutRemote<R> {
    async fn query(&self, query: &RemoteQuery) -> Result<Vec<Record>, SyncError> {
        with_deadline("remote", "query", self.deadline, self.inner.query(query)).await
    }

    async fn insert(&self, record: &Record) -> Result<String, SyncError> {
        with_deadline("remote", "insert", self.deadline, self.inner.insert(record)).await
    }

    async fn update_by_id(&self, id: &str, patch: &Map<String, Value>) -> Result<(), SyncError> {
        with_deadline("remote", "update", self.deadline, self.inner.update_by_id(id, patch)).await
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), SyncError> {
        with_deadline("remote", "delete", self.deadline, self.inner.delete_by_id(id)).await
    }
}

/// [`BinaryStore`] with a per-call deadline.
///
/// Uploads and downloads move whole files, so they usually want a longer
/// deadline than document queries.
pub struct TimeoutBinaryStore<B> {
    inner: B,
    deadline: Duration,
}

impl<B: BinaryStore> TimeoutBinaryStore<B> {
    pub fn new(inner: B, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B: BinaryStore> BinaryStore for TimeoutBinaryStore<B> {
    async fn upload(&self, local_path: &str, remote_hint: &str) -> Result<String, SyncError> {
        with_deadline("binary", "upload", self.deadline, self.inner.upload(local_path, remote_hint)).await
    }

    async fn download(&self, remote_id: &str) -> Result<String, SyncError> {
        with_deadline("binary", "download", self.deadline, self.inner.download(remote_id)).await
    }

    async fn delete(&self, remote_ids: &[String]) -> Result<(), SyncError> {
        with_deadline("binary", "delete", self.deadline, self.inner.delete(remote_ids)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SortOrder;
    use crate::storage::memory::MemoryRemoteCollection;

    struct StuckRemote;

    #[async_trait]
    impl RemoteCollection for StuckRemote {
        async fn query(&self, _query: &RemoteQuery) -> Result<Vec<Record>, SyncError> {
            std::future::pending().await
        }
        async fn insert(&self, _record: &Record) -> Result<String, SyncError> {
            std::future::pending().await
        }
        async fn update_by_id(&self, _id: &str, _patch: &Map<String, Value>) -> Result<(), SyncError> {
            std::future::pending().await
        }
        async fn delete_by_id(&self, _id: &str) -> Result<(), SyncError> {
            std::future::pending().await
        }
    }

    fn query() -> RemoteQuery {
        RemoteQuery {
            owner_group: "g".into(),
            filter: Map::new(),
            sort_field: "createdAt".into(),
            sort_order: SortOrder::Descending,
            skip: 0,
            limit: 20,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_call_becomes_unavailable() {
        let remote = TimeoutRemote::new(StuckRemote, Duration::from_secs(5));

        let result = remote.query(&query()).await;

        match result {
            Err(SyncError::RemoteUnavailable(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let inner = MemoryRemoteCollection::new("createdAt");
        inner.seed(Record::new("g", 1).with_id("a"));
        let remote = TimeoutRemote::new(inner, Duration::from_secs(5));

        let page = remote.query(&query()).await.unwrap();

        assert_eq!(page.len(), 1);
        assert_eq!(remote.inner().query_count(), 1);
    }
}
