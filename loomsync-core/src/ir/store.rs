//! Content-addressed, versioned persistence of IR documents.
//!
//! Mirrors the staging discipline the rest of the workspace uses for
//! shared on-disk state (write to a sibling temp file, then rename into
//! place) so a crash mid-write can never leave a torn record behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

use super::{Digest, IrDocument};
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: u64,
    pub digest: Digest,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrRecord {
    pub id: String,
    pub version: u64,
    pub digest: Digest,
    pub body: IrDocument,
    pub stored_at: DateTime<Utc>,
    pub history: Vec<HistoryEntry>,
}

/// Persistence contract for IR documents, keyed by the stable id derived
/// in [`crate::ir::derive_id`].
#[async_trait]
pub trait IrStore: Send + Sync + std::fmt::Debug {
    async fn store(&self, id: &str, body: IrDocument) -> Result<u64>;
    async fn load(&self, id: &str) -> Result<Option<IrRecord>>;
    async fn current_version(&self, id: &str) -> Result<u64>;
    async fn history(&self, id: &str) -> Result<Vec<HistoryEntry>>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn has_changed(&self, id: &str, body: &IrDocument) -> Result<bool>;
}

/// Filesystem-backed `IrStore`. Lays out `<root>/<id>.json` for the current
/// record and `<root>/<id>.history.json` for the append-only history index,
/// matching spec.md §6's persisted state layout.
pub struct FsIrStore {
    root: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for FsIrStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsIrStore")
            .field("root", &self.root)
            .field("locked_ids", &self.locks.len())
            .finish()
    }
}

impl FsIrStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize(id)))
    }

    fn history_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.history.json", sanitize(id)))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!(
            "{}.tmp-{}",
            path.extension().and_then(|e| e.to_str()).unwrap_or("json"),
            uuid::Uuid::new_v4()
        ));
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_record(&self, id: &str) -> Result<Option<IrRecord>> {
        let path = self.record_path(id);
        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CoreError::Io(e)),
        };
        match serde_json::from_slice::<IrRecord>(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                let quarantine = path.with_extension(format!("json.quarantine.{}", Utc::now().timestamp_millis()));
                warn!(id, error = %e, quarantine = %quarantine.display(), "quarantining unreadable IR record");
                let _ = fs::rename(&path, &quarantine).await;
                Err(CoreError::NotFound(id.to_string()))
            }
        }
    }

    async fn read_history(&self, id: &str) -> Result<Vec<HistoryEntry>> {
        let path = self.history_path(id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(CoreError::Io(e)),
        }
    }
}

#[async_trait]
impl IrStore for FsIrStore {
    async fn store(&self, id: &str, body: IrDocument) -> Result<u64> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let digest = body.digest();
        if let Some(current) = self.read_record(id).await? {
            if current.digest == digest {
                return Ok(current.version);
            }
        }

        let mut history = self.read_history(id).await?;
        let version = history.last().map(|h| h.version).unwrap_or(0) + 1;
        let stored_at = Utc::now();
        history.push(HistoryEntry {
            version,
            digest: digest.clone(),
            stored_at,
        });

        let record = IrRecord {
            id: id.to_string(),
            version,
            digest,
            body,
            stored_at,
            history: history.clone(),
        };

        self.write_atomic(&self.history_path(id), &serde_json::to_vec_pretty(&history)?)
            .await?;
        self.write_atomic(&self.record_path(id), &serde_json::to_vec_pretty(&record)?)
            .await?;

        Ok(version)
    }

    async fn load(&self, id: &str) -> Result<Option<IrRecord>> {
        self.read_record(id).await
    }

    async fn current_version(&self, id: &str) -> Result<u64> {
        Ok(self.read_record(id).await?.map(|r| r.version).unwrap_or(0))
    }

    async fn history(&self, id: &str) -> Result<Vec<HistoryEntry>> {
        self.read_history(id).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        for path in [self.record_path(id), self.history_path(id)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CoreError::Io(e)),
            }
        }
        Ok(())
    }

    async fn has_changed(&self, id: &str, body: &IrDocument) -> Result<bool> {
        match self.read_record(id).await? {
            Some(current) => Ok(current.digest != body.digest()),
            None => Ok(true),
        }
    }
}

/// An in-memory `IrStore` used by tests that don't need durability, and by
/// the sync engine's conversion cache invalidation tests.
#[derive(Debug, Default)]
pub struct InMemoryIrStore {
    records: Mutex<HashMap<String, IrRecord>>,
}

impl InMemoryIrStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IrStore for InMemoryIrStore {
    async fn store(&self, id: &str, body: IrDocument) -> Result<u64> {
        let mut records = self.records.lock().await;
        let digest = body.digest();
        if let Some(current) = records.get(id) {
            if current.digest == digest {
                return Ok(current.version);
            }
        }
        let history = records
            .get(id)
            .map(|r| r.history.clone())
            .unwrap_or_default();
        let version = history.last().map(|h| h.version).unwrap_or(0) + 1;
        let stored_at = Utc::now();
        let mut history = history;
        history.push(HistoryEntry {
            version,
            digest: digest.clone(),
            stored_at,
        });
        records.insert(
            id.to_string(),
            IrRecord {
                id: id.to_string(),
                version,
                digest,
                body,
                stored_at,
                history,
            },
        );
        Ok(version)
    }

    async fn load(&self, id: &str) -> Result<Option<IrRecord>> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn current_version(&self, id: &str) -> Result<u64> {
        Ok(self.records.lock().await.get(id).map(|r| r.version).unwrap_or(0))
    }

    async fn history(&self, id: &str) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .records
            .lock()
            .await
            .get(id)
            .map(|r| r.history.clone())
            .unwrap_or_default())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.records.lock().await.remove(id);
        Ok(())
    }

    async fn has_changed(&self, id: &str, body: &IrDocument) -> Result<bool> {
        let records = self.records.lock().await;
        Ok(match records.get(id) {
            Some(current) => current.digest != body.digest(),
            None => true,
        })
    }
}

fn sanitize(id: &str) -> String {
    id.replace(':', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Framework, IrDocumentMetadata};
    use std::collections::BTreeMap;

    fn doc(prop: &str) -> IrDocument {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "root".to_string(),
            crate::ir::IrNode {
                id: "root".to_string(),
                node_type: "View".to_string(),
                properties: BTreeMap::from([(
                    "title".to_string(),
                    serde_json::json!(prop),
                )]),
                children: vec![],
                metadata: None,
            },
        );
        IrDocument {
            schema_version: "1".to_string(),
            metadata: IrDocumentMetadata {
                framework: Framework::A,
                source_path: "Home.tsx".to_string(),
                generated_at: Utc::now(),
            },
            roots: vec!["root".to_string()],
            nodes,
        }
    }

    #[tokio::test]
    async fn repeated_store_with_equal_digest_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsIrStore::new(dir.path());
        let v1 = store.store("a:home", doc("hi")).await.unwrap();
        let v2 = store.store("a:home", doc("hi")).await.unwrap();
        assert_eq!(v1, v2);
        assert_eq!(store.history("a:home").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_with_changed_digest_bumps_version_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsIrStore::new(dir.path());
        let v1 = store.store("a:home", doc("hi")).await.unwrap();
        let v2 = store.store("a:home", doc("bye")).await.unwrap();
        assert_eq!(v1, 1);
        assert_eq!(v2, 2);
        assert_eq!(store.history("a:home").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn has_changed_matches_digest_equality() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsIrStore::new(dir.path());
        store.store("a:home", doc("hi")).await.unwrap();
        assert!(!store.has_changed("a:home", &doc("hi")).await.unwrap());
        assert!(store.has_changed("a:home", &doc("bye")).await.unwrap());
    }

    #[tokio::test]
    async fn missing_record_reports_not_found_and_quarantines() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsIrStore::new(dir.path());
        store.store("a:home", doc("hi")).await.unwrap();
        tokio::fs::write(store.record_path("a:home"), b"not json")
            .await
            .unwrap();
        let err = store.load("a:home").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        let quarantined = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains("quarantine"));
        assert!(quarantined, "expected a quarantine copy of the corrupted record");
    }

    #[tokio::test]
    async fn delete_removes_record_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsIrStore::new(dir.path());
        store.store("a:home", doc("hi")).await.unwrap();
        store.delete("a:home").await.unwrap();
        assert!(store.load("a:home").await.unwrap().is_none());
        assert!(store.history("a:home").await.unwrap().is_empty());
    }
}
