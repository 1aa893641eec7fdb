// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Disk-backed collaborators.
//!
//! - [`DiskFileSystem`]: moves downloads under a root directory (tokio::fs)
//! - [`FileKv`]: one JSON file per key under a directory

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::traits::{FileSystem, PersistentKv, SavedFile, SyncError};

fn local_err(context: &str, err: std::io::Error) -> SyncError {
    SyncError::Local(format!("{context}: {err}"))
}

pub struct DiskFileSystem {
    root: PathBuf,
}

impl DiskFileSystem {
    /// Create the root directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| local_err("create cache root", e))?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl FileSystem for DiskFileSystem {
    async fn save(&self, temp_path: &str) -> Result<SavedFile, SyncError> {
        let extension = Path::new(temp_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        let target = self.root.join(format!("{}{}", uuid::Uuid::new_v4(), extension));

        // rename fails across devices; fall back to copy + remove
        if tokio::fs::rename(temp_path, &target).await.is_err() {
            tokio::fs::copy(temp_path, &target)
                .await
                .map_err(|e| local_err("copy into cache", e))?;
            if let Err(e) = tokio::fs::remove_file(temp_path).await {
                debug!(path = %temp_path, error = %e, "Temp file left behind after copy");
            }
        }

        let size_bytes = tokio::fs::metadata(&target)
            .await
            .map_err(|e| local_err("stat saved file", e))?
            .len();
        Ok(SavedFile {
            path: target.to_string_lossy().into_owned(),
            size_bytes,
        })
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn delete(&self, path: &str) -> Result<(), SyncError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SyncError::AssetMissing(path.to_string()))
            }
            Err(e) => Err(local_err("delete cached file", e)),
        }
    }
}

/// Key-value storage with one `<key>.json` file per key.
pub struct FileKv {
    dir: PathBuf,
}

impl FileKv {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| local_err("create kv dir", e))?;
        Ok(Self { dir })
    }

    /// Percent-encode every byte outside `[A-Za-z0-9_-]`, so distinct keys
    /// never share a file.
    fn path_for(&self, key: &str) -> PathBuf {
        let mut safe = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
                safe.push(char::from(byte));
            } else {
                safe.push_str(&format!("%{byte:02X}"));
            }
        }
        self.dir.join(format!("{safe}.json"))
    }
}

impl PersistentKv for FileKv {
    fn get(&self, key: &str) -> Result<Option<Value>, SyncError> {
        let path = self.path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(local_err("read kv file", e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| SyncError::LocalCorrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), SyncError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(value).map_err(|e| SyncError::Local(e.to_string()))?;
        std::fs::write(&tmp, bytes).map_err(|e| local_err("write kv file", e))?;
        std::fs::rename(&tmp, &path).map_err(|e| local_err("commit kv file", e))
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(local_err("remove kv file", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unique_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("collection_sync_{}_{}", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_file_kv_roundtrip() {
        let dir = unique_dir("kv");
        let kv = FileKv::new(&dir).unwrap();

        assert_eq!(kv.get("plans_pair-1").unwrap(), None);

        kv.set("plans_pair-1", &json!([{"id": "a"}])).unwrap();
        assert_eq!(kv.get("plans_pair-1").unwrap(), Some(json!([{"id": "a"}])));

        kv.remove("plans_pair-1").unwrap();
        assert_eq!(kv.get("plans_pair-1").unwrap(), None);
        assert!(kv.remove("plans_pair-1").is_ok());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_file_kv_sanitizes_keys() {
        let dir = unique_dir("kv_keys");
        let kv = FileKv::new(&dir).unwrap();

        kv.set("../escape/attempt", &json!(1)).unwrap();

        assert_eq!(kv.get("../escape/attempt").unwrap(), Some(json!(1)));
        assert!(kv.path_for("../escape/attempt").starts_with(&dir));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_file_kv_distinct_keys_never_share_a_file() {
        let dir = unique_dir("kv_collide");
        let kv = FileKv::new(&dir).unwrap();

        kv.set("plans_pair.1", &json!(["one"])).unwrap();
        kv.set("plans_pair:1", &json!(["two"])).unwrap();
        kv.set("plans_pair%2E1", &json!(["three"])).unwrap();

        assert_eq!(kv.get("plans_pair.1").unwrap(), Some(json!(["one"])));
        assert_eq!(kv.get("plans_pair:1").unwrap(), Some(json!(["two"])));
        assert_eq!(kv.get("plans_pair%2E1").unwrap(), Some(json!(["three"])));
        assert_eq!(
            kv.path_for("plans_pair.1").file_name().unwrap(),
            "plans_pair%2E1.json"
        );

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_file_kv_garbage_is_corrupt() {
        let dir = unique_dir("kv_garbage");
        let kv = FileKv::new(&dir).unwrap();
        std::fs::write(kv.path_for("bad"), b"{not json").unwrap();

        assert!(matches!(kv.get("bad"), Err(SyncError::LocalCorrupt { .. })));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_disk_fs_save_exists_delete() {
        let root = unique_dir("fs");
        let fs = DiskFileSystem::new(root.join("images")).unwrap();
        let temp = root.join("download.jpg");
        std::fs::write(&temp, vec![7u8; 321]).unwrap();

        let saved = fs.save(temp.to_str().unwrap()).await.unwrap();

        assert_eq!(saved.size_bytes, 321);
        assert!(saved.path.ends_with(".jpg"));
        assert!(fs.exists(&saved.path).await);
        assert!(!fs.exists(temp.to_str().unwrap()).await);

        fs.delete(&saved.path).await.unwrap();
        assert!(!fs.exists(&saved.path).await);
        assert!(matches!(fs.delete(&saved.path).await, Err(SyncError::AssetMissing(_))));

        let _ = std::fs::remove_dir_all(root);
    }
}
