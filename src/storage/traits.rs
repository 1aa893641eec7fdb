// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Collaborator interfaces and the engine error type.
//!
//! The engine never talks to a network or a disk directly. Everything it
//! needs is behind one of four traits:
//!
//! - [`RemoteCollection`]: the paged document store
//! - [`BinaryStore`]: upload/download/delete of binary objects
//! - [`PersistentKv`]: synchronous local key → JSON storage
//! - [`FileSystem`]: moving downloads into permanent storage

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::record::{Record, SortOrder};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("Remote store rejected the request: {0}")]
    RemoteRejected(String),
    #[error("Local cache value for '{key}' is corrupt: {reason}")]
    LocalCorrupt {
        key: String,
        reason: String,
    },
    #[error("Asset '{0}' is missing")]
    AssetMissing(String),
    #[error("Cache capacity exceeded: needed {needed} bytes, freed {freed}")]
    CapacityExceeded {
        needed: u64,
        freed: u64,
    },
    #[error("Local storage error: {0}")]
    Local(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Patch may not set locally managed field '{0}'")]
    InvalidPatch(String),
}

impl SyncError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_))
    }
}

/// A bounded, ordered page request against a remote collection.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteQuery {
    pub owner_group: String,
    /// Extra equality filter on payload fields
    pub filter: Map<String, Value>,
    pub sort_field: String,
    pub sort_order: SortOrder,
    pub skip: usize,
    pub limit: usize,
}

/// A file that has been moved into permanent local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    pub path: String,
    pub size_bytes: u64,
}

#[async_trait]
pub trait RemoteCollection: Send + Sync {
    /// Fetch one page of records for the query's owner group.
    async fn query(&self, query: &RemoteQuery) -> Result<Vec<Record>, SyncError>;

    /// Insert a record; returns the id assigned by the store.
    async fn insert(&self, record: &Record) -> Result<String, SyncError>;

    async fn update_by_id(&self, id: &str, patch: &Map<String, Value>) -> Result<(), SyncError>;

    async fn delete_by_id(&self, id: &str) -> Result<(), SyncError>;
}

#[async_trait]
pub trait BinaryStore: Send + Sync {
    /// Upload a local file; returns the remote identifier.
    async fn upload(&self, local_path: &str, remote_hint: &str) -> Result<String, SyncError>;

    /// Download to a temporary local path.
    async fn download(&self, remote_id: &str) -> Result<String, SyncError>;

    async fn delete(&self, remote_ids: &[String]) -> Result<(), SyncError>;
}

/// Synchronous local key-value storage holding JSON values.
pub trait PersistentKv: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, SyncError>;
    fn set(&self, key: &str, value: &Value) -> Result<(), SyncError>;
    fn remove(&self, key: &str) -> Result<(), SyncError>;
}

#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Move a temporary file into permanent storage.
    async fn save(&self, temp_path: &str) -> Result<SavedFile, SyncError>;

    async fn exists(&self, path: &str) -> bool;

    async fn delete(&self, path: &str) -> Result<(), SyncError>;
}

// Shared handles forward, so wrappers like `TimeoutRemote` can hold an `Arc`.

#[async_trait]
impl<T: RemoteCollection + ?Sized> RemoteCollection for Arc<T> {
    async fn query(&self, query: &RemoteQuery) -> Result<Vec<Record>, SyncError> {
        (**self).query(query).await
    }
    async fn insert(&self, record: &Record) -> Result<String, SyncError> {
        (**self).insert(record).await
    }
    async fn update_by_id(&self, id: &str, patch: &Map<String, Value>) -> Result<(), SyncError> {
        (**self).update_by_id(id, patch).await
    }
    async fn delete_by_id(&self, id: &str) -> Result<(), SyncError> {
        (**self).delete_by_id(id).await
    }
}

#[async_trait]
impl<T: BinaryStore + ?Sized> BinaryStore for Arc<T> {
    async fn upload(&self, local_path: &str, remote_hint: &str) -> Result<String, SyncError> {
        (**self).upload(local_path, remote_hint).await
    }
    async fn download(&self, remote_id: &str) -> Result<String, SyncError> {
        (**self).download(remote_id).await
    }
    async fn delete(&self, remote_ids: &[String]) -> Result<(), SyncError> {
        (**self).delete(remote_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(SyncError::RemoteUnavailable("timeout".into()).is_transient());
        assert!(!SyncError::RemoteRejected("bad field".into()).is_transient());
        assert!(!SyncError::AssetMissing("cloud://x".into()).is_transient());
        assert!(!SyncError::Local("disk full".into()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::LocalCorrupt {
            key: "plans_pair-1".into(),
            reason: "expected array".into(),
        };
        assert_eq!(
            err.to_string(),
            "Local cache value for 'plans_pair-1' is corrupt: expected array"
        );

        let err = SyncError::CapacityExceeded { needed: 100, freed: 40 };
        assert_eq!(err.to_string(), "Cache capacity exceeded: needed 100 bytes, freed 40");
    }
}
