//! Namespace metadata document and its store.
//!
//! The underlying store has no namespace concept, so namespace existence
//! lives in a single JSON document at a well-known key inside the shared
//! bucket. Entries are soft-deleted: removal stamps `deletedAt` instead of
//! dropping the entry, which keeps history and makes recreation idempotent.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::s3::{ClientError, Result, StorageClient};

/// Well-known key of the metadata document inside the shared bucket.
pub const META_KEY: &str = "meta.json";

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// One namespace's lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamespaceEntry {
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "deletedAt", skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

/// The metadata document.
///
/// Wire shape is fixed by earlier deployments: a top-level `createdAt`
/// string with namespace entries as flattened sibling keys, so the document
/// round-trips as `{"createdAt": "...", "fizz": {"createdAt": "..."}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetaDoc {
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(flatten)]
    namespaces: BTreeMap<String, NamespaceEntry>,
}

impl MetaDoc {
    pub fn new() -> Self {
        Self {
            created_at: now_iso(),
            namespaces: BTreeMap::new(),
        }
    }

    /// A namespace exists when its entry is present and not soft-deleted.
    pub fn namespace_exists(&self, name: &str) -> bool {
        match self.namespaces.get(name) {
            None => false,
            Some(entry) => entry.deleted_at.is_none(),
        }
    }

    /// Record a namespace as live, dropping any prior soft-delete marker.
    pub fn insert_namespace(&mut self, name: &str) {
        self.namespaces.insert(
            name.to_string(),
            NamespaceEntry {
                created_at: now_iso(),
                deleted_at: None,
            },
        );
    }

    /// Stamp a namespace as soft-deleted. No-op for unknown names.
    pub fn mark_deleted(&mut self, name: &str) {
        if let Some(entry) = self.namespaces.get_mut(name) {
            entry.deleted_at = Some(now_iso());
        }
    }

    /// Names of all live namespaces, soft-deleted entries excluded.
    pub fn live_namespaces(&self) -> Vec<String> {
        self.namespaces
            .iter()
            .filter(|(_, entry)| entry.deleted_at.is_none())
            .map(|(name, _)| name.clone())
            .collect()
    }

    #[cfg(test)]
    pub fn entry(&self, name: &str) -> Option<&NamespaceEntry> {
        self.namespaces.get(name)
    }
}

impl Default for MetaDoc {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner of all reads and writes of the metadata document.
///
/// The underlying store offers no conditional writes, so `get`/`save` is
/// plain read-modify-write: last writer wins. Mutating callers serialize on
/// [`MetaStore::lock`] within this process; concurrent writers in other
/// processes can still lose updates, which is a documented gap rather than
/// something this layer pretends to solve.
pub struct MetaStore {
    client: Arc<dyn StorageClient>,
    bucket: String,
    write_lock: Mutex<()>,
}

impl MetaStore {
    pub fn new(client: Arc<dyn StorageClient>, bucket: String) -> Self {
        Self {
            client,
            bucket,
            write_lock: Mutex::new(()),
        }
    }

    /// Serialize metadata mutations within this process. Held across the
    /// whole read-modify-write cycle of a mutating operation.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Check that the shared bucket exists, creating it when the head check
    /// reports not-found. Other head failures propagate.
    pub async fn find_or_create_bucket(&self) -> Result<()> {
        match self.client.head_bucket(&self.bucket).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!(bucket = %self.bucket, "creating shared bucket");
                self.client.create_bucket(&self.bucket).await
            }
            Err(err) => Err(err),
        }
    }

    /// Fetch the metadata document, creating bucket and document on first
    /// access. A missing-key fetch initializes `{createdAt: now}` and
    /// persists it; any other fetch failure propagates.
    pub async fn get_meta(&self) -> Result<MetaDoc> {
        self.find_or_create_bucket().await?;

        match self.client.get_object(&self.bucket, META_KEY).await {
            Ok(body) => serde_json::from_slice(&body)
                .map_err(|e| ClientError::Decode(format!("malformed metadata document: {}", e))),
            Err(err) if err.is_missing_key() => {
                debug!(bucket = %self.bucket, "initializing metadata document");
                let doc = MetaDoc::new();
                self.save_meta(&doc).await?;
                Ok(doc)
            }
            Err(err) => Err(err),
        }
    }

    /// Overwrite the metadata document. No version check - last writer wins.
    pub async fn save_meta(&self, doc: &MetaDoc) -> Result<()> {
        let body = serde_json::to_vec(doc)
            .map_err(|e| ClientError::Decode(format!("metadata encode failed: {}", e)))?;
        self.client
            .put_object(&self.bucket, META_KEY, Bytes::from(body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape_round_trips() {
        let json = r#"{
            "createdAt": "2024-03-01T10:00:00.000Z",
            "fizz": {"createdAt": "2024-03-02T10:00:00.000Z"},
            "buzz": {"createdAt": "2024-03-03T10:00:00.000Z", "deletedAt": "2024-03-04T10:00:00.000Z"}
        }"#;

        let doc: MetaDoc = serde_json::from_str(json).unwrap();
        assert_eq!(doc.created_at, "2024-03-01T10:00:00.000Z");
        assert!(doc.namespace_exists("fizz"));
        assert!(!doc.namespace_exists("buzz"));

        let out = serde_json::to_value(&doc).unwrap();
        assert_eq!(out["createdAt"], "2024-03-01T10:00:00.000Z");
        assert_eq!(out["fizz"]["createdAt"], "2024-03-02T10:00:00.000Z");
        // deletedAt is kept on the wire for history
        assert_eq!(out["buzz"]["deletedAt"], "2024-03-04T10:00:00.000Z");
        // a live entry serializes with no deletedAt field at all
        assert!(out["fizz"].get("deletedAt").is_none());
    }

    #[test]
    fn test_unknown_namespace_does_not_exist() {
        let doc = MetaDoc::new();
        assert!(!doc.namespace_exists("ghost"));
    }

    #[test]
    fn test_recreate_clears_soft_delete() {
        let mut doc = MetaDoc::new();
        doc.insert_namespace("fizz");
        doc.mark_deleted("fizz");
        assert!(!doc.namespace_exists("fizz"));

        doc.insert_namespace("fizz");
        assert!(doc.namespace_exists("fizz"));
        assert!(doc.entry("fizz").unwrap().deleted_at.is_none());
    }

    #[test]
    fn test_live_namespaces_excludes_deleted() {
        let mut doc = MetaDoc::new();
        doc.insert_namespace("fizz");
        doc.insert_namespace("buzz");
        doc.mark_deleted("buzz");

        let live = doc.live_namespaces();
        assert_eq!(live, vec!["fizz"]);
    }
}
