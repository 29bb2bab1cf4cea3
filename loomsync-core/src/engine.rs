//! Resolves queued changes through converter, IR store, and generator;
//! routes by development mode (C5).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::conflict::{ConflictDetector, ConflictKind, ConflictRecord, ConflictStore};
use crate::error::{CoreError, Result};
use crate::ir::store::IrStore;
use crate::ir::{derive_id, Framework, IrDocument};
use crate::mode::ModeController;
use crate::paths::PathMirror;
use crate::queue::QueuedChange;
use crate::watch::ChangeKind;

/// The two converter/generator collaborators the engine treats as external
/// (spec.md §1): one pair of functions per direction, plus test-file
/// recognition so test sources can degrade to stub generation instead of
/// failing outright.
#[async_trait]
pub trait SourceConverter: Send + Sync {
    async fn source_to_ir(&self, framework: Framework, path: &Path) -> Result<IrDocument>;
    async fn ir_to_source(&self, body: &IrDocument, target_path: &Path) -> Result<()>;
    fn is_test_file(&self, path: &Path) -> bool;
    /// Best-effort stub generation for a test file the converter doesn't
    /// fully support, preserving the round-trip contract in degraded form.
    async fn generate_test_stub(&self, framework: Framework, source_path: &Path, target_path: &Path) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    mtime: Option<SystemTime>,
    size: u64,
}

/// Caches the last successful `SourceToIR` result per path, keyed by
/// `(mtime, size)` so an untouched file never pays conversion cost twice.
#[derive(Debug, Default)]
pub struct ConversionCache {
    entries: DashMap<PathBuf, (CacheKey, IrDocument)>,
}

impl ConversionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key_for(path: &Path) -> CacheKey {
        let meta = std::fs::metadata(path).ok();
        CacheKey {
            mtime: meta.as_ref().and_then(|m| m.modified().ok()),
            size: meta.map(|m| m.len()).unwrap_or(0),
        }
    }

    fn get(&self, path: &Path) -> Option<IrDocument> {
        let key = Self::key_for(path);
        self.entries
            .get(path)
            .filter(|entry| entry.0 == key)
            .map(|entry| entry.1.clone())
    }

    fn put(&self, path: &Path, body: IrDocument) {
        self.entries.insert(path.to_path_buf(), (Self::key_for(path), body));
    }

    fn invalidate(&self, path: &Path) {
        self.entries.remove(path);
    }
}

#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Removed { id: String },
    TestStub { id: String, target_path: PathBuf },
    SkippedReadOnly { path: PathBuf, framework: Framework },
    Unchanged { id: String },
    Synced { id: String, version: u64, target_path: PathBuf },
    Conflict { id: String, kind: ConflictKind },
    Failed { path: PathBuf, error: String },
}

/// Wires together the IR store, mode controller, path mirror, optional
/// conflict detection, and the external converter to turn one batch of
/// queued changes into per-event outcomes.
pub struct SyncEngine {
    mode: ModeController,
    paths: PathMirror,
    ir_store: Arc<dyn IrStore>,
    converter: Arc<dyn SourceConverter>,
    cache: ConversionCache,
    id_locks: DashMap<String, Arc<Mutex<()>>>,
    conflict_detector: Option<Arc<ConflictDetector>>,
    conflict_store: Option<Arc<dyn ConflictStore>>,
    conflict_tx: Option<broadcast::Sender<ConflictRecord>>,
    /// When a batch has at least this many events, events for distinct ids
    /// run concurrently instead of strictly in arrival order.
    parallel_threshold: usize,
}

impl SyncEngine {
    pub fn new(
        mode: ModeController,
        paths: PathMirror,
        ir_store: Arc<dyn IrStore>,
        converter: Arc<dyn SourceConverter>,
    ) -> Self {
        Self {
            mode,
            paths,
            ir_store,
            converter,
            cache: ConversionCache::new(),
            id_locks: DashMap::new(),
            conflict_detector: None,
            conflict_store: None,
            conflict_tx: None,
            parallel_threshold: 8,
        }
    }

    pub fn with_conflict_detection(
        mut self,
        detector: Arc<ConflictDetector>,
        store: Arc<dyn ConflictStore>,
        tx: broadcast::Sender<ConflictRecord>,
    ) -> Self {
        self.conflict_detector = Some(detector);
        self.conflict_store = Some(store);
        self.conflict_tx = Some(tx);
        self
    }

    fn id_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.id_locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn process_batch(&self, batch: Vec<QueuedChange>) -> Vec<SyncOutcome> {
        if batch.len() >= self.parallel_threshold {
            let futures = batch.into_iter().map(|q| self.process_one(q));
            futures::future::join_all(futures).await
        } else {
            let mut results = Vec::with_capacity(batch.len());
            for queued in batch {
                results.push(self.process_one(queued).await);
            }
            results
        }
    }

    async fn process_one(&self, queued: QueuedChange) -> SyncOutcome {
        let event = queued.event;
        let framework = event.framework;
        let path = event.path.clone();

        let relative = match self.relative_path(&path, framework) {
            Ok(rel) => rel,
            Err(e) => return SyncOutcome::Failed { path, error: e.to_string() },
        };
        let id = derive_id(framework, &relative);
        let lock = self.id_lock(&id);
        let _guard = lock.lock().await;

        if event.kind == ChangeKind::Removed {
            return self.handle_removed(&id, &path, framework).await;
        }

        if self.converter.is_test_file(&path) {
            return self.handle_test_file(&id, &path, framework).await;
        }

        if self.mode.is_read_only(framework) {
            warn!(path = %path.display(), %framework, "ignoring change on read-only side");
            return SyncOutcome::SkippedReadOnly { path, framework };
        }

        if let Some(outcome) = self.check_conflict(&id, &event).await {
            return outcome;
        }

        self.convert_and_regenerate(&id, &path, framework).await
    }

    fn relative_path(&self, path: &Path, framework: Framework) -> Result<PathBuf> {
        let root = match framework {
            Framework::A => &self.paths.root_a,
            Framework::B => &self.paths.root_b,
        };
        path.strip_prefix(root)
            .map(Path::to_path_buf)
            .map_err(|_| CoreError::Invariant(format!("{} is not under its framework root", path.display())))
    }

    async fn handle_removed(&self, id: &str, path: &Path, framework: Framework) -> SyncOutcome {
        self.cache.invalidate(path);
        if let Err(e) = self.ir_store.delete(id).await {
            return SyncOutcome::Failed { path: path.to_path_buf(), error: e.to_string() };
        }
        if let Ok(mirrored) = self.paths.mirror(path, framework) {
            let _ = tokio::fs::remove_file(&mirrored).await;
        }
        info!(id, "removed source deleted IR record and mirrored file");
        SyncOutcome::Removed { id: id.to_string() }
    }

    async fn handle_test_file(&self, id: &str, path: &Path, framework: Framework) -> SyncOutcome {
        let target = match self.paths.mirror(path, framework) {
            Ok(t) => t,
            Err(e) => return SyncOutcome::Failed { path: path.to_path_buf(), error: e.to_string() },
        };
        match self.converter.source_to_ir(framework, path).await {
            Ok(body) => {
                if let Err(e) = self.ir_store.store(id, body.clone()).await {
                    return SyncOutcome::Failed { path: path.to_path_buf(), error: e.to_string() };
                }
                if let Some(parent) = target.parent() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
                if let Err(e) = self.converter.ir_to_source(&body, &target).await {
                    return SyncOutcome::Failed { path: path.to_path_buf(), error: e.to_string() };
                }
                SyncOutcome::Synced { id: id.to_string(), version: 0, target_path: target }
            }
            Err(e) if e.kind() == crate::error::ErrorKind::Parse => {
                if let Some(parent) = target.parent() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
                match self.converter.generate_test_stub(framework, path, &target).await {
                    Ok(()) => SyncOutcome::TestStub { id: id.to_string(), target_path: target },
                    Err(e) => SyncOutcome::Failed { path: path.to_path_buf(), error: e.to_string() },
                }
            }
            Err(e) => SyncOutcome::Failed { path: path.to_path_buf(), error: e.to_string() },
        }
    }

    async fn check_conflict(&self, id: &str, event: &crate::watch::FileChangeEvent) -> Option<SyncOutcome> {
        let detector = self.conflict_detector.as_ref()?;
        if !self.mode.conflict_detection_enabled() {
            return None;
        }
        let mirrored = self.paths.mirror(&event.path, event.framework).ok()?;
        let history = self.ir_store.history(id).await.unwrap_or_default();
        let kind = detector.detect(event, &mirrored, &history).await?;

        let (path_a, path_b) = match event.framework {
            Framework::A => (event.path.clone(), mirrored.clone()),
            Framework::B => (mirrored.clone(), event.path.clone()),
        };
        let record = ConflictRecord {
            id: id.to_string(),
            path_a,
            path_b,
            timestamp_a: event.observed_at,
            timestamp_b: event.observed_at,
            ir_version_at_detection: history.last().map(|h| h.version).unwrap_or(0),
            detected_at: Utc::now(),
            resolved: false,
        };
        if let Some(store) = &self.conflict_store {
            if let Err(e) = store.record(record.clone()).await {
                warn!(id, error = %e, "failed to persist conflict record");
            }
        }
        if let Some(tx) = &self.conflict_tx {
            let _ = tx.send(record);
        }
        Some(SyncOutcome::Conflict { id: id.to_string(), kind })
    }

    async fn convert_and_regenerate(&self, id: &str, path: &Path, framework: Framework) -> SyncOutcome {
        let body = if let Some(cached) = self.cache.get(path) {
            cached
        } else {
            match self.converter.source_to_ir(framework, path).await {
                Ok(body) => {
                    self.cache.put(path, body.clone());
                    body
                }
                Err(e) => return SyncOutcome::Failed { path: path.to_path_buf(), error: e.to_string() },
            }
        };

        match self.ir_store.has_changed(id, &body).await {
            Ok(false) => return SyncOutcome::Unchanged { id: id.to_string() },
            Ok(true) => {}
            Err(e) => return SyncOutcome::Failed { path: path.to_path_buf(), error: e.to_string() },
        }

        let version = match self.ir_store.store(id, body.clone()).await {
            Ok(v) => v,
            Err(e) => return SyncOutcome::Failed { path: path.to_path_buf(), error: e.to_string() },
        };

        let target = match self.paths.mirror(path, framework) {
            Ok(t) => t,
            Err(e) => return SyncOutcome::Failed { path: path.to_path_buf(), error: e.to_string() },
        };
        if let Some(parent) = target.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return SyncOutcome::Failed { path: path.to_path_buf(), error: e.to_string() };
            }
        }
        if let Err(e) = self.converter.ir_to_source(&body, &target).await {
            return SyncOutcome::Failed { path: path.to_path_buf(), error: e.to_string() };
        }

        SyncOutcome::Synced { id: id.to_string(), version, target_path: target }
    }
}

/// Conflict window default (spec.md §4.4).
pub const DEFAULT_CONFLICT_WINDOW: Duration = Duration::from_secs(5);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::store::InMemoryIrStore;
    use crate::ir::IrDocumentMetadata;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubConverter {
        calls: AtomicUsize,
        fail_parse_for: Option<PathBuf>,
    }

    fn doc() -> IrDocument {
        IrDocument {
            schema_version: "1".into(),
            metadata: IrDocumentMetadata {
                framework: Framework::A,
                source_path: "Home.tsx".into(),
                generated_at: Utc::now(),
            },
            roots: vec![],
            nodes: BTreeMap::new(),
        }
    }

    #[async_trait]
    impl SourceConverter for StubConverter {
        async fn source_to_ir(&self, _framework: Framework, path: &Path) -> Result<IrDocument> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_parse_for.as_deref() == Some(path) {
                return Err(CoreError::Parse { path: path.display().to_string(), reason: "unsupported".into() });
            }
            Ok(doc())
        }
        async fn ir_to_source(&self, _body: &IrDocument, target_path: &Path) -> Result<()> {
            if let Some(parent) = target_path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            std::fs::write(target_path, b"generated").map_err(CoreError::Io)
        }
        fn is_test_file(&self, path: &Path) -> bool {
            path.to_string_lossy().contains(".test.")
        }
        async fn generate_test_stub(&self, _framework: Framework, _source_path: &Path, target_path: &Path) -> Result<()> {
            if let Some(parent) = target_path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            std::fs::write(target_path, b"stub").map_err(CoreError::Io)
        }
    }

    fn engine(root: &Path, converter: StubConverter) -> SyncEngine {
        let paths = PathMirror::new(root.join("a"), root.join("b"));
        SyncEngine::new(
            ModeController::new(crate::mode::Mode::Universal),
            paths,
            Arc::new(InMemoryIrStore::new()),
            Arc::new(converter),
        )
    }

    fn change(root: &Path, rel: &str) -> QueuedChange {
        let event = crate::watch::FileChangeEvent {
            kind: ChangeKind::Modified,
            path: root.join("a").join(rel),
            framework: Framework::A,
            observed_at: Utc::now(),
        };
        let priority = crate::queue::PriorityRules::default().classify(&event.path);
        let enqueued_at = event.observed_at;
        QueuedChange::new(event, priority, enqueued_at)
    }

    #[tokio::test]
    async fn unchanged_digest_skips_regeneration() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/Home.tsx"), b"x").unwrap();
        let converter = StubConverter { calls: AtomicUsize::new(0), fail_parse_for: None };
        let engine = engine(dir.path(), converter);

        let outcome_1 = engine.process_batch(vec![change(dir.path(), "Home.tsx")]).await;
        assert!(matches!(outcome_1[0], SyncOutcome::Synced { .. }));

        let outcome_2 = engine.process_batch(vec![change(dir.path(), "Home.tsx")]).await;
        assert!(matches!(outcome_2[0], SyncOutcome::Unchanged { .. }));
    }

    #[tokio::test]
    async fn unsupported_test_conversion_falls_back_to_stub() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        let test_path = dir.path().join("a/Home.test.tsx");
        std::fs::write(&test_path, b"x").unwrap();
        let converter = StubConverter { calls: AtomicUsize::new(0), fail_parse_for: Some(test_path.clone()) };
        let engine = engine(dir.path(), converter);

        let outcome = engine.process_batch(vec![change(dir.path(), "Home.test.tsx")]).await;
        assert!(matches!(outcome[0], SyncOutcome::TestStub { .. }));
    }

    #[tokio::test]
    async fn read_only_side_is_skipped_without_conversion() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/Home.tsx"), b"x").unwrap();
        let paths = PathMirror::new(dir.path().join("a"), dir.path().join("b"));
        let engine = SyncEngine::new(
            ModeController::new(crate::mode::Mode::BFirst),
            paths,
            Arc::new(InMemoryIrStore::new()),
            Arc::new(StubConverter { calls: AtomicUsize::new(0), fail_parse_for: None }),
        );
        let outcome = engine.process_batch(vec![change(dir.path(), "Home.tsx")]).await;
        assert!(matches!(outcome[0], SyncOutcome::SkippedReadOnly { .. }));
    }
}
