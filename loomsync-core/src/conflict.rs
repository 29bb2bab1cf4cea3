//! Cross-framework simultaneous-edit detection and conflict persistence (C4).
//!
//! The detector is stateless with respect to the rest of the pipeline: it
//! takes event/mtime/history inputs and returns a decision. Persisting the
//! resulting [`ConflictRecord`] and notifying subscribers are the caller's
//! job (the sync engine), keeping the watcher → queue → engine → detector
//! graph a one-way flow of channels instead of a callback cycle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;

use crate::error::Result;
use crate::ir::store::HistoryEntry;
use crate::ir::Framework;
use crate::watch::FileChangeEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Timestamp,
    Version,
    Both,
}

impl ConflictKind {
    fn combine(a: Option<ConflictKind>, b: bool) -> Option<ConflictKind> {
        match (a, b) {
            (Some(ConflictKind::Timestamp), true) => Some(ConflictKind::Both),
            (Some(existing), false) => Some(existing),
            (None, true) => Some(ConflictKind::Version),
            (None, false) => None,
            (Some(ConflictKind::Version), true) | (Some(ConflictKind::Both), _) => {
                Some(ConflictKind::Both)
            }
            (Some(other), _) => Some(other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: String,
    pub path_a: PathBuf,
    pub path_b: PathBuf,
    pub timestamp_a: DateTime<Utc>,
    pub timestamp_b: DateTime<Utc>,
    pub ir_version_at_detection: u64,
    pub detected_at: DateTime<Utc>,
    pub resolved: bool,
}

struct RecentEvent {
    framework: Framework,
    observed_at: Instant,
}

/// Keeps a short-lived map of recently observed paths and combines the
/// three signals from spec.md §4.4 into a single decision.
pub struct ConflictDetector {
    window: StdDuration,
    recent: Mutex<HashMap<PathBuf, RecentEvent>>,
}

impl ConflictDetector {
    pub fn new(window: StdDuration) -> Self {
        Self {
            window,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Record `event` and report whether `mirrored_path` (the opposite
    /// side's path for the same logical id) was touched within the window.
    pub async fn observe_proximity(&self, event: &FileChangeEvent, mirrored_path: &Path) -> bool {
        let now = Instant::now();
        let mut recent = self.recent.lock().await;
        recent.retain(|_, entry| now.duration_since(entry.observed_at) <= self.window);

        let proximity = recent
            .get(mirrored_path)
            .map(|entry| entry.framework != event.framework)
            .unwrap_or(false);

        recent.insert(
            event.path.clone(),
            RecentEvent {
                framework: event.framework,
                observed_at: now,
            },
        );
        proximity
    }

    /// Compare the two files' modification times; within the window
    /// indicates a possible simultaneous edit.
    pub fn mtime_conflict(path_a: &Path, path_b: &Path, window: StdDuration) -> bool {
        let (Ok(meta_a), Ok(meta_b)) = (std::fs::metadata(path_a), std::fs::metadata(path_b)) else {
            return false;
        };
        let (Ok(mtime_a), Ok(mtime_b)) = (meta_a.modified(), meta_b.modified()) else {
            return false;
        };
        let delta = if mtime_a >= mtime_b {
            mtime_a.duration_since(mtime_b)
        } else {
            mtime_b.duration_since(mtime_a)
        };
        delta.map(|d| d <= window).unwrap_or(false)
    }

    /// More than one history entry for `id` within the window signals churn
    /// from both sides rather than a single settled edit.
    pub fn version_churn_conflict(history: &[HistoryEntry], window: StdDuration) -> bool {
        let window = Duration::from_std(window).unwrap_or(Duration::zero());
        let cutoff = Utc::now() - window;
        history.iter().filter(|entry| entry.stored_at >= cutoff).count() > 1
    }

    /// Combine proximity, mtime, and version-churn signals for one event
    /// into a conflict decision. Returns `None` when no signal fired.
    pub async fn detect(
        &self,
        event: &FileChangeEvent,
        mirrored_path: &Path,
        history: &[HistoryEntry],
    ) -> Option<ConflictKind> {
        let proximity = self.observe_proximity(event, mirrored_path).await;
        let mtime = proximity && Self::mtime_conflict(&event.path, mirrored_path, self.window);
        let churn = Self::version_churn_conflict(history, self.window);

        if !proximity && !churn {
            return None;
        }
        let timestamp_signal = proximity || mtime;
        ConflictKind::combine(timestamp_signal.then_some(ConflictKind::Timestamp), churn)
    }
}

/// Persistence contract for conflict records, backed by a single
/// `conflicts.json` array per spec.md §6.
#[async_trait::async_trait]
pub trait ConflictStore: Send + Sync {
    async fn record(&self, record: ConflictRecord) -> Result<()>;
    async fn list(&self) -> Result<Vec<ConflictRecord>>;
    async fn mark_resolved(&self, id: &str, detected_at: DateTime<Utc>) -> Result<()>;
}

pub struct FsConflictStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FsConflictStore {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: storage_dir.into().join("conflicts.json"),
            lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<Vec<ConflictRecord>> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, records: &[ConflictRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, serde_json::to_vec_pretty(records)?).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConflictStore for FsConflictStore {
    async fn record(&self, record: ConflictRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        records.push(record);
        self.write_all(&records).await
    }

    async fn list(&self) -> Result<Vec<ConflictRecord>> {
        self.read_all().await
    }

    async fn mark_resolved(&self, id: &str, detected_at: DateTime<Utc>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        for record in records
            .iter_mut()
            .filter(|r| r.id == id && r.detected_at == detected_at)
        {
            record.resolved = true;
        }
        self.write_all(&records).await
    }
}

/// Broadcasts newly detected conflicts to whatever is subscribed (e.g. an
/// HTTP notification endpoint); the detector itself never depends on this.
pub fn conflict_channel(capacity: usize) -> (broadcast::Sender<ConflictRecord>, broadcast::Receiver<ConflictRecord>) {
    broadcast::channel(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(framework: Framework, path: &str) -> FileChangeEvent {
        FileChangeEvent {
            kind: crate::watch::ChangeKind::Modified,
            path: PathBuf::from(path),
            framework,
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn proximity_fires_only_for_the_opposite_side() {
        let detector = ConflictDetector::new(StdDuration::from_secs(5));
        let a = event(Framework::A, "/root/a/home");
        let b = event(Framework::B, "/root/b/home");

        assert!(!detector.observe_proximity(&a, Path::new("/root/b/home")).await);
        assert!(detector.observe_proximity(&b, Path::new("/root/a/home")).await);
    }

    #[tokio::test]
    async fn version_churn_requires_more_than_one_recent_entry() {
        let now = Utc::now();
        let history = vec![
            HistoryEntry {
                version: 1,
                digest: crate::ir::Digest::of(b"a"),
                stored_at: now,
            },
            HistoryEntry {
                version: 2,
                digest: crate::ir::Digest::of(b"b"),
                stored_at: now,
            },
        ];
        assert!(ConflictDetector::version_churn_conflict(
            &history,
            StdDuration::from_secs(5)
        ));
        assert!(!ConflictDetector::version_churn_conflict(
            &history[..1],
            StdDuration::from_secs(5)
        ));
    }

    #[tokio::test]
    async fn detect_combines_proximity_and_churn_into_both() {
        let detector = ConflictDetector::new(StdDuration::from_secs(5));
        let a = event(Framework::A, "/root/a/home");
        detector.observe_proximity(&event(Framework::B, "/root/b/home"), Path::new("/root/a/home")).await;

        let now = Utc::now();
        let history = vec![
            HistoryEntry { version: 1, digest: crate::ir::Digest::of(b"a"), stored_at: now },
            HistoryEntry { version: 2, digest: crate::ir::Digest::of(b"b"), stored_at: now },
        ];
        let result = detector.detect(&a, Path::new("/root/b/home"), &history).await;
        assert_eq!(result, Some(ConflictKind::Both));
    }

    #[tokio::test]
    async fn fs_conflict_store_round_trips_and_marks_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsConflictStore::new(dir.path());
        let detected_at = Utc::now();
        store
            .record(ConflictRecord {
                id: "a:home".to_string(),
                path_a: PathBuf::from("/root/a/home.tsx"),
                path_b: PathBuf::from("/root/b/home.dart"),
                timestamp_a: detected_at,
                timestamp_b: detected_at,
                ir_version_at_detection: 3,
                detected_at,
                resolved: false,
            })
            .await
            .unwrap();
        store.mark_resolved("a:home", detected_at).await.unwrap();
        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].resolved);
    }
}
