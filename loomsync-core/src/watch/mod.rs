//! Per-framework path watching with write-coalescing and path filters (C2).
//!
//! The debounce/stability bookkeeping is kept independent of the OS-level
//! `notify` backend so it can be driven synthetically in tests (see
//! [`Debouncer::ingest`]); [`FileWatcher`] wires a real `notify` watcher per
//! root into the same pipeline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use regex::RegexSet;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::ir::Framework;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    /// `added+modified -> modified`; any `removed` supersedes whatever came
    /// before it for the same path.
    fn coalesce(self, next: ChangeKind) -> ChangeKind {
        match (self, next) {
            (_, ChangeKind::Removed) => ChangeKind::Removed,
            (ChangeKind::Removed, other) => other,
            (_, next) => next,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub framework: Framework,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WatchError {
    pub framework: Framework,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct FsWatchConfig {
    /// Minimum time since a path's first pending edit before it can flush.
    pub debounce_window: Duration,
    /// Minimum quiet time (no further edits) before a path flushes.
    pub stability_window: Duration,
    /// How often the internal ticker checks for paths ready to flush.
    pub tick_interval: Duration,
    /// Regex patterns matched against the path's string form; matches are ignored.
    pub ignore_patterns: Vec<String>,
}

impl Default for FsWatchConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(100),
            stability_window: Duration::from_millis(50),
            tick_interval: Duration::from_millis(10),
            ignore_patterns: vec![
                r"(^|/)\.git/".to_string(),
                r"(^|/)node_modules/".to_string(),
                r"(^|/)(build|dist|target)/".to_string(),
            ],
        }
    }
}

struct PendingEntry {
    kind: ChangeKind,
    framework: Framework,
    first_seen: Instant,
    last_seen: Instant,
}

/// OS-independent coalescing engine. Raw edits are fed in via [`ingest`],
/// ready events are read back via [`try_recv_ready`] / polled by the ticker.
pub struct Debouncer {
    config: FsWatchConfig,
    ignore: RegexSet,
    pending: Mutex<HashMap<PathBuf, PendingEntry>>,
}

impl Debouncer {
    pub fn new(config: FsWatchConfig) -> Self {
        let ignore = RegexSet::new(&config.ignore_patterns).expect("valid ignore patterns");
        Self {
            config,
            ignore,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignore.is_match(&path.to_string_lossy())
    }

    /// Feed a raw filesystem edit into the coalescing window.
    pub async fn ingest(&self, path: PathBuf, kind: ChangeKind, framework: Framework) {
        if self.is_ignored(&path) {
            return;
        }
        let now = Instant::now();
        let mut pending = self.pending.lock().await;
        pending
            .entry(path)
            .and_modify(|entry| {
                entry.kind = entry.kind.coalesce(kind);
                entry.last_seen = now;
            })
            .or_insert(PendingEntry {
                kind,
                framework,
                first_seen: now,
                last_seen: now,
            });
    }

    /// Drain every path whose debounce and stability windows have both
    /// elapsed, returning them as emittable events.
    pub async fn drain_ready(&self) -> Vec<FileChangeEvent> {
        let now = Instant::now();
        let mut pending = self.pending.lock().await;
        let ready_paths: Vec<PathBuf> = pending
            .iter()
            .filter(|(_, entry)| {
                now.duration_since(entry.first_seen) >= self.config.debounce_window
                    && now.duration_since(entry.last_seen) >= self.config.stability_window
            })
            .map(|(path, _)| path.clone())
            .collect();

        let mut events = Vec::with_capacity(ready_paths.len());
        for path in ready_paths {
            if let Some(entry) = pending.remove(&path) {
                events.push(FileChangeEvent {
                    kind: entry.kind,
                    path,
                    framework: entry.framework,
                    observed_at: Utc::now(),
                });
            }
        }
        events
    }
}

/// Watches two framework roots and drives a [`Debouncer`], surfacing
/// coalesced [`FileChangeEvent`]s on `events` and backend errors on `errors`
/// without terminating the watcher task.
pub struct FileWatcher {
    // Kept alive for the lifetime of the watcher; dropping these stops
    // watching the corresponding root.
    _watchers: Vec<RecommendedWatcher>,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("roots", &self._watchers.len())
            .finish()
    }
}

impl FileWatcher {
    /// Start watching `roots` (one path per framework), spawning the ticker
    /// and forwarding coalesced events into the returned channel.
    pub fn spawn(
        roots: Vec<(Framework, PathBuf)>,
        config: FsWatchConfig,
    ) -> (Self, mpsc::UnboundedReceiver<FileChangeEvent>, mpsc::UnboundedReceiver<WatchError>) {
        let debouncer = Arc::new(Debouncer::new(config.clone()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        let mut watchers = Vec::new();
        for (framework, root) in roots {
            let debouncer = debouncer.clone();
            let error_tx = error_tx.clone();
            let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Event>();

            let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let _ = raw_tx.send(event);
                }
                Err(e) => {
                    let _ = error_tx.send(WatchError {
                        framework,
                        message: e.to_string(),
                    });
                }
            });

            let mut watcher = match watcher {
                Ok(w) => w,
                Err(e) => {
                    error!(root = %root.display(), error = %e, "failed to create watcher");
                    continue;
                }
            };

            if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
                warn!(root = %root.display(), error = %e, "failed to watch root");
                continue;
            }

            let debouncer_for_task = debouncer.clone();
            tokio::spawn(async move {
                while let Some(event) = raw_rx.recv().await {
                    for path in event.paths.clone() {
                        if let Some(kind) = classify(&event.kind) {
                            debug!(?path, ?kind, "raw fs event");
                            debouncer_for_task.ingest(path, kind, framework).await;
                        }
                    }
                }
            });

            watchers.push(watcher);
        }

        let ticker_debouncer = debouncer.clone();
        let tick_interval = config.tick_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            loop {
                interval.tick().await;
                for event in ticker_debouncer.drain_ready().await {
                    if event_tx.send(event).is_err() {
                        return;
                    }
                }
            }
        });

        (
            Self {
                _watchers: watchers,
            },
            event_rx,
            error_rx,
        )
    }

}

fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Added),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> FsWatchConfig {
        FsWatchConfig {
            debounce_window: Duration::from_millis(100),
            stability_window: Duration::from_millis(50),
            tick_interval: Duration::from_millis(10),
            ignore_patterns: FsWatchConfig::default().ignore_patterns,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_edits_coalesce_to_a_single_modified_event() {
        let debouncer = Debouncer::new(test_config());
        let path = PathBuf::from("/root/a/Home.tsx");

        debouncer.ingest(path.clone(), ChangeKind::Added, Framework::A).await;
        tokio::time::advance(Duration::from_millis(10)).await;
        debouncer.ingest(path.clone(), ChangeKind::Modified, Framework::A).await;

        // Not yet quiet for stability_window, nothing should drain.
        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(debouncer.drain_ready().await.is_empty());

        // Now quiet long enough and past the debounce window.
        tokio::time::advance(Duration::from_millis(120)).await;
        let drained = debouncer.drain_ready().await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].kind, ChangeKind::Modified);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_supersedes_prior_edits() {
        let debouncer = Debouncer::new(test_config());
        let path = PathBuf::from("/root/a/Home.tsx");
        debouncer.ingest(path.clone(), ChangeKind::Modified, Framework::A).await;
        debouncer.ingest(path.clone(), ChangeKind::Removed, Framework::A).await;
        tokio::time::advance(Duration::from_millis(200)).await;
        let drained = debouncer.drain_ready().await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].kind, ChangeKind::Removed);
    }

    #[tokio::test(start_paused = true)]
    async fn ignored_paths_never_enter_the_pending_map() {
        let debouncer = Debouncer::new(test_config());
        debouncer
            .ingest(PathBuf::from("/root/a/node_modules/x.js"), ChangeKind::Added, Framework::A)
            .await;
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(debouncer.drain_ready().await.is_empty());
    }
}
