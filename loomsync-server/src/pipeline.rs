//! Wires the authoring domain together: file watcher -> change queue ->
//! sync engine, with conflict detection enabled in `universal` mode
//! (spec.md §5's "authoring domain" scheduling description).
//!
//! This is the file-change pipeline's composition root; [`crate::main`]
//! only needs [`spawn`] and the config it was built from.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use loomsync_config::model::Config;
use loomsync_core::conflict::{conflict_channel, ConflictDetector, ConflictRecord, FsConflictStore};
use loomsync_core::engine::SyncEngine;
use loomsync_core::ir::store::FsIrStore;
use loomsync_core::ir::Framework;
use loomsync_core::mode::ModeController;
use loomsync_core::paths::{NamingConvention, PathMirror};
use loomsync_core::queue::{ChangeQueue, ChangeQueueConfig};
use loomsync_core::watch::{FileWatcher, FsWatchConfig};

use crate::converter::PlaintextConverter;

fn path_mirror_from_config(config: &Config) -> PathMirror {
    let mut mirror = PathMirror::new(config.root_a.clone(), config.root_b.clone());
    mirror.naming_b = NamingConvention::from(config.naming_conventions.file_naming);
    mirror.naming_a = NamingConvention::from(config.naming_conventions.component_naming);
    mirror
}

/// Starts the watcher, the change queue's batching loop, and the sync
/// engine's batch consumer as background tasks. Returns a receiver for
/// detected conflicts so a caller can wire notifications without the
/// engine depending on them directly (spec.md §9's "stateless detector").
pub fn spawn(config: Arc<Config>, storage_dir: PathBuf) -> tokio::sync::broadcast::Receiver<ConflictRecord> {
    let mode = ModeController::new(config.mode.into());
    let paths = path_mirror_from_config(&config);
    let ir_store = Arc::new(FsIrStore::new(storage_dir.join("ir")));
    let converter = Arc::new(PlaintextConverter::default());

    let mut engine = SyncEngine::new(mode, paths, ir_store.clone(), converter);

    let (conflict_tx, conflict_rx) = conflict_channel(64);
    if mode.conflict_detection_enabled() {
        let detector = Arc::new(ConflictDetector::new(Duration::from_secs(5)));
        let conflict_store = Arc::new(FsConflictStore::new(storage_dir.clone()));
        engine = engine.with_conflict_detection(detector, conflict_store, conflict_tx.clone());
    }
    let engine = Arc::new(engine);

    if !config.sync.enabled {
        info!("sync.enabled is false, authoring pipeline not started");
        return conflict_rx;
    }

    let mut ignore_patterns = FsWatchConfig::default().ignore_patterns;
    ignore_patterns.extend(config.sync.exclude_patterns.iter().cloned());
    let watch_config = FsWatchConfig {
        debounce_window: Duration::from_millis(config.sync.debounce_ms),
        ignore_patterns,
        ..FsWatchConfig::default()
    };

    let (_watcher, mut event_rx, mut error_rx) = FileWatcher::spawn(
        vec![(Framework::A, config.root_a.clone()), (Framework::B, config.root_b.clone())],
        watch_config,
    );
    // Dropping `_watcher` would stop watching, so it's leaked into the
    // spawned task's closure to keep the `notify::RecommendedWatcher`s alive
    // for the rest of the process.
    std::mem::forget(_watcher);

    let (queue, mut overflow_rx) = ChangeQueue::new(ChangeQueueConfig::default());
    let queue = Arc::new(queue);

    let enqueue_queue = queue.clone();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            enqueue_queue.enqueue(event).await;
        }
    });

    tokio::spawn(async move {
        while let Some(error) = error_rx.recv().await {
            warn!(framework = %error.framework, message = %error.message, "file watcher error");
        }
    });

    tokio::spawn(async move {
        while let Some(overflow) = overflow_rx.recv().await {
            warn!(path = %overflow.dropped_path.display(), "change queue overflow, oldest event dropped");
        }
    });

    let (batch_tx, mut batch_rx) = tokio::sync::mpsc::channel(8);
    let batching_queue = queue.clone();
    tokio::spawn(async move {
        batching_queue.run(batch_tx).await;
    });

    tokio::spawn(async move {
        while let Some(batch) = batch_rx.recv().await {
            let outcomes = engine.process_batch(batch).await;
            for outcome in outcomes {
                log_outcome(&outcome);
            }
        }
    });

    conflict_rx
}

fn log_outcome(outcome: &loomsync_core::engine::SyncOutcome) {
    use loomsync_core::engine::SyncOutcome::*;
    match outcome {
        Synced { id, version, target_path } => {
            info!(%id, version, target = %target_path.display(), "synced");
        }
        Unchanged { id } => {
            tracing::debug!(%id, "no change after digest comparison");
        }
        Removed { id } => {
            info!(%id, "source removed, mirrored file deleted");
        }
        TestStub { id, target_path } => {
            info!(%id, target = %target_path.display(), "generated degraded test stub");
        }
        SkippedReadOnly { path, framework } => {
            warn!(path = %path.display(), %framework, "ignored change on read-only side");
        }
        Conflict { id, kind } => {
            warn!(%id, ?kind, "simultaneous edit detected, sync skipped pending resolution");
        }
        Failed { path, error } => {
            warn!(path = %path.display(), %error, "sync failed");
        }
    }
}
