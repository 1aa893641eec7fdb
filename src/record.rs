// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record data structure.
//!
//! A [`Record`] is one document of a remote collection as the engine sees it:
//! a small typed core (id, owner group, sort timestamp, local access time,
//! asset references) plus an open payload map carrying the collection's own
//! fields.
//!
//! # Example
//!
//! ```
//! use collection_sync::{Record, SortOrder};
//! use serde_json::json;
//!
//! let record = Record::new("pair-42", 1_700_000_000_000)
//!     .with_field("title", json!("Picnic at the lake"));
//!
//! assert!(record.id.is_none()); // not yet published
//! assert_eq!(record.payload["title"], "Picnic at the lake");
//! assert!(SortOrder::Descending.is_newer(200, 100));
//! ```

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::storage::traits::SyncError;

/// Persisted names of the typed core fields.
pub const CORE_FIELDS: [&str; 5] = ["id", "ownerGroup", "sortTimestamp", "lastAccess", "assetRefs"];

/// True when `key` names a typed core field rather than a payload field.
#[must_use]
pub fn is_core_field(key: &str) -> bool {
    CORE_FIELDS.contains(&key)
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Ordering of a collection by its sort field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[serde(rename = "asc", alias = "ascending")]
    Ascending,
    #[default]
    #[serde(rename = "desc", alias = "descending")]
    Descending,
}

impl SortOrder {
    /// Compare two records' timestamps so that sorting yields this order.
    #[must_use]
    pub fn compare(self, a: i64, b: i64) -> Ordering {
        match self {
            Self::Ascending => a.cmp(&b),
            Self::Descending => b.cmp(&a),
        }
    }

    /// True when `candidate` would sort strictly before `head`.
    ///
    /// For a descending collection this means "more recent"; for an
    /// ascending one it means "earlier".
    #[must_use]
    pub fn is_newer(self, candidate: i64, head: i64) -> bool {
        self.compare(candidate, head) == Ordering::Less
    }

    /// Stable sort of records by `sort_timestamp` in this order.
    pub fn sort(self, records: &mut [Record]) {
        records.sort_by(|a, b| self.compare(a.sort_timestamp, b.sort_timestamp));
    }
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ascending => write!(f, "asc"),
            Self::Descending => write!(f, "desc"),
        }
    }
}

/// Reference from a record to a binary object in the [`BinaryStore`](crate::BinaryStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRef {
    /// Opaque identifier issued by the binary store
    pub remote_id: String,
    /// Local materialization, if this device has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
}

impl AssetRef {
    pub fn remote(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            local_path: None,
        }
    }
}

/// One cached document of a remote collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Remote identifier; `None` until the store has accepted the record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Partition key; every query and cache bucket is scoped by it
    pub owner_group: String,
    /// Value of the collection's configured sort field (epoch millis)
    pub sort_timestamp: i64,
    /// Local-only access time (epoch millis), drives retention eviction
    #[serde(default)]
    pub last_access: i64,
    /// Binary objects this record points at
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub asset_refs: Vec<AssetRef>,
    /// Collection-specific fields
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Record {
    /// Create an unpublished record with an empty payload.
    pub fn new(owner_group: impl Into<String>, sort_timestamp: i64) -> Self {
        Self {
            id: None,
            owner_group: owner_group.into(),
            sort_timestamp,
            last_access: 0,
            asset_refs: Vec::new(),
            payload: Map::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set a payload field. Core field names are ignored.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if !is_core_field(&key) {
            self.payload.insert(key, value);
        }
        self
    }

    #[must_use]
    pub fn with_asset(mut self, asset: AssetRef) -> Self {
        self.asset_refs.push(asset);
        self
    }

    /// Id as `&str`, if published.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Copy of this record as it should be sent to the remote store.
    ///
    /// Local-only state (access time, local asset paths) is stripped.
    #[must_use]
    pub fn for_remote(&self) -> Record {
        let mut remote = self.clone();
        remote.last_access = 0;
        for asset in &mut remote.asset_refs {
            asset.local_path = None;
        }
        remote
    }

    /// Local path materialized for `remote_id`, if any.
    #[must_use]
    pub fn local_path_for(&self, remote_id: &str) -> Option<&str> {
        self.asset_refs
            .iter()
            .find(|a| a.remote_id == remote_id)
            .and_then(|a| a.local_path.as_deref())
    }

    /// Reject a patch that names a core field other than `sort_field`.
    ///
    /// Core fields are managed locally; a payload key with one of their
    /// names would shadow the typed field when the record is persisted.
    pub fn check_patch(patch: &Map<String, Value>, sort_field: &str) -> Result<(), SyncError> {
        match patch.keys().find(|key| *key != sort_field && is_core_field(key)) {
            Some(key) => Err(SyncError::InvalidPatch(key.clone())),
            None => Ok(()),
        }
    }

    /// Field-merge a patch into this record.
    ///
    /// The key named `sort_field` updates `sort_timestamp` (integers only);
    /// core field names are skipped; every other key lands in the payload.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>, sort_field: &str) {
        for (key, value) in patch {
            if key == sort_field {
                if let Some(ts) = value.as_i64() {
                    self.sort_timestamp = ts;
                }
                continue;
            }
            if is_core_field(key) {
                continue;
            }
            self.payload.insert(key.clone(), value.clone());
        }
    }

    /// Drop payload keys that collide with core field names.
    pub fn strip_core_fields(&mut self) {
        self.payload.retain(|key, _| !is_core_field(key));
    }

    /// True when every `(key, value)` of `filter` equals the payload field.
    #[must_use]
    pub fn matches(&self, filter: &Map<String, Value>) -> bool {
        filter
            .iter()
            .all(|(key, value)| self.payload.get(key) == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_record() {
        let record = Record::new("pair-1", 100);

        assert!(record.id.is_none());
        assert_eq!(record.owner_group, "pair-1");
        assert_eq!(record.sort_timestamp, 100);
        assert_eq!(record.last_access, 0);
        assert!(record.asset_refs.is_empty());
        assert!(record.payload.is_empty());
    }

    #[test]
    fn test_sort_order_compare() {
        let mut records = vec![
            Record::new("g", 90).with_id("b"),
            Record::new("g", 100).with_id("a"),
            Record::new("g", 80).with_id("c"),
        ];

        SortOrder::Descending.sort(&mut records);
        let ids: Vec<_> = records.iter().filter_map(Record::id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        SortOrder::Ascending.sort(&mut records);
        let ids: Vec<_> = records.iter().filter_map(Record::id).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_is_newer_follows_order() {
        assert!(SortOrder::Descending.is_newer(101, 100));
        assert!(!SortOrder::Descending.is_newer(100, 100));
        assert!(SortOrder::Ascending.is_newer(99, 100));
        assert!(!SortOrder::Ascending.is_newer(101, 100));
    }

    #[test]
    fn test_serialize_flattens_payload() {
        let record = Record::new("pair-1", 100)
            .with_id("r1")
            .with_field("title", json!("Dinner"));

        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["id"], "r1");
        assert_eq!(value["ownerGroup"], "pair-1");
        assert_eq!(value["sortTimestamp"], 100);
        assert_eq!(value["title"], "Dinner");
        // empty asset list is omitted
        assert!(value.get("assetRefs").is_none());
    }

    #[test]
    fn test_deserialize_roundtrip_keeps_payload() {
        let value = json!({
            "id": "r1",
            "ownerGroup": "pair-1",
            "sortTimestamp": 5,
            "lastAccess": 7,
            "assetRefs": [{"remoteId": "cloud://x", "localPath": "/tmp/x"}],
            "title": "Movie night",
            "rating": 4
        });

        let record: Record = serde_json::from_value(value).unwrap();

        assert_eq!(record.id(), Some("r1"));
        assert_eq!(record.last_access, 7);
        assert_eq!(record.local_path_for("cloud://x"), Some("/tmp/x"));
        assert_eq!(record.payload.len(), 2);
        assert_eq!(record.payload["rating"], 4);
    }

    #[test]
    fn test_for_remote_strips_local_state() {
        let mut record = Record::new("pair-1", 100).with_asset(AssetRef {
            remote_id: "cloud://a".into(),
            local_path: Some("/local/a.jpg".into()),
        });
        record.last_access = 12345;

        let remote = record.for_remote();

        assert_eq!(remote.last_access, 0);
        assert!(remote.asset_refs[0].local_path.is_none());
        // original untouched
        assert_eq!(record.last_access, 12345);
    }

    #[test]
    fn test_apply_patch_routes_sort_field() {
        let mut record = Record::new("pair-1", 100).with_field("title", json!("old"));

        let patch = json!({"title": "new", "createdAt": 250, "note": null});
        record.apply_patch(patch.as_object().unwrap(), "createdAt");

        assert_eq!(record.sort_timestamp, 250);
        assert_eq!(record.payload["title"], "new");
        assert_eq!(record.payload["note"], Value::Null);
        assert!(!record.payload.contains_key("createdAt"));
    }

    #[test]
    fn test_core_field_patch_is_rejected() {
        let patch = json!({"title": "x", "lastAccess": "yesterday"});
        assert_eq!(
            Record::check_patch(patch.as_object().unwrap(), "createdAt"),
            Err(SyncError::InvalidPatch("lastAccess".into()))
        );

        // the sort field is allowed even when it shares a core name
        let patch = json!({"sortTimestamp": 5});
        assert!(Record::check_patch(patch.as_object().unwrap(), "sortTimestamp").is_ok());
    }

    #[test]
    fn test_core_fields_never_reach_payload() {
        let mut record = Record::new("pair-1", 100)
            .with_id("a")
            .with_field("ownerGroup", json!("intruder"));
        let patch = json!({"lastAccess": "yesterday", "id": 7, "assetRefs": 1, "title": "kept"});

        record.apply_patch(patch.as_object().unwrap(), "createdAt");

        assert_eq!(record.payload.len(), 1);
        assert_eq!(record.payload["title"], "kept");
        let json = serde_json::to_value(&record).unwrap();
        let decoded: Record = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_strip_core_fields() {
        let mut record = Record::new("pair-1", 100);
        record.payload.insert("sortTimestamp".into(), json!("soon"));
        record.payload.insert("title".into(), json!("t"));

        record.strip_core_fields();

        assert_eq!(record.payload.keys().collect::<Vec<_>>(), vec!["title"]);
    }

    #[test]
    fn test_apply_patch_ignores_non_integer_sort_value() {
        let mut record = Record::new("pair-1", 100);
        let patch = json!({"createdAt": "yesterday"});

        record.apply_patch(patch.as_object().unwrap(), "createdAt");

        assert_eq!(record.sort_timestamp, 100);
    }

    #[test]
    fn test_matches_filter() {
        let record = Record::new("pair-1", 1)
            .with_field("kind", json!("recipe"))
            .with_field("done", json!(false));

        let yes = json!({"kind": "recipe"});
        let no = json!({"kind": "movie"});

        assert!(record.matches(yes.as_object().unwrap()));
        assert!(!record.matches(no.as_object().unwrap()));
        assert!(record.matches(&Map::new()));
    }

    #[test]
    fn test_now_millis_is_recent() {
        let now = now_millis();
        assert!(now > 1_600_000_000_000);
    }
}
