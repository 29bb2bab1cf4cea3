//! Priority/debounce/batch/deduplicate file-change events (C3).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::RegexSet;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::warn;

use crate::watch::FileChangeEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    High = 0,
    Normal = 1,
    Low = 2,
}

/// Path heuristics used to derive a [`Priority`] for an incoming event.
/// Entry points sort first so a developer's edit to `App.tsx` reaches
/// devices before a same-batch edit to an unrelated test fixture.
#[derive(Debug, Clone)]
pub struct PriorityRules {
    high: RegexSet,
    low: RegexSet,
}

impl Default for PriorityRules {
    fn default() -> Self {
        Self {
            high: RegexSet::new([r"(^|/)(index|main|app|App)\.[a-zA-Z0-9]+$"]).unwrap(),
            low: RegexSet::new([
                r"\.(test|spec)\.[a-zA-Z0-9]+$",
                r"(^|/)(docs?|__tests__)/",
                r"\.md$",
            ])
            .unwrap(),
        }
    }
}

impl PriorityRules {
    pub fn classify(&self, path: &std::path::Path) -> Priority {
        let s = path.to_string_lossy();
        if self.high.is_match(&s) {
            Priority::High
        } else if self.low.is_match(&s) {
            Priority::Low
        } else {
            Priority::Normal
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuedChange {
    pub event: FileChangeEvent,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    pub(crate) sequence: u64,
}

impl QueuedChange {
    /// Construct a change outside the normal enqueue path (tests, and
    /// reconnection replay where a synthetic change carries no real queue
    /// position).
    pub fn new(event: FileChangeEvent, priority: Priority, enqueued_at: DateTime<Utc>) -> Self {
        Self { event, priority, enqueued_at, sequence: 0 }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeQueueConfig {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub max_queue_size: usize,
}

impl Default for ChangeQueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay: Duration::from_millis(200),
            max_queue_size: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueOverflow {
    pub dropped_path: PathBuf,
}

struct Inner {
    items: Vec<QueuedChange>,
    next_sequence: u64,
}

/// Stable priority queue with debounced batch cutting and last-wins
/// deduplication before dispatch.
pub struct ChangeQueue {
    config: ChangeQueueConfig,
    rules: PriorityRules,
    inner: Mutex<Inner>,
    notify: Notify,
    overflow_tx: mpsc::UnboundedSender<QueueOverflow>,
}

impl ChangeQueue {
    pub fn new(config: ChangeQueueConfig) -> (Self, mpsc::UnboundedReceiver<QueueOverflow>) {
        let (overflow_tx, overflow_rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                rules: PriorityRules::default(),
                inner: Mutex::new(Inner {
                    items: Vec::new(),
                    next_sequence: 0,
                }),
                notify: Notify::new(),
                overflow_tx,
            },
            overflow_rx,
        )
    }

    pub async fn enqueue(&self, event: FileChangeEvent) {
        let priority = self.rules.classify(&event.path);
        let mut inner = self.inner.lock().await;
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        let queued = QueuedChange {
            event,
            priority,
            enqueued_at: Utc::now(),
            sequence,
        };

        let insert_at = inner
            .items
            .binary_search_by(|existing| {
                (existing.priority, existing.enqueued_at).cmp(&(queued.priority, queued.enqueued_at))
            })
            .unwrap_or_else(|pos| pos);
        inner.items.insert(insert_at, queued);

        if inner.items.len() > self.config.max_queue_size {
            if let Some((idx, _)) = inner
                .items
                .iter()
                .enumerate()
                .min_by_key(|(_, q)| q.sequence)
            {
                let dropped = inner.items.remove(idx);
                warn!(path = %dropped.event.path.display(), "change queue over capacity, dropping oldest event");
                let _ = self.overflow_tx.send(QueueOverflow {
                    dropped_path: dropped.event.path,
                });
            }
        }

        let ready = inner.items.len() >= self.config.batch_size;
        drop(inner);
        if ready {
            self.notify.notify_one();
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Cut one batch: take every currently queued item, then deduplicate by
    /// path keeping the latest event per path (last-wins) while leaving the
    /// surviving event at its original relative position.
    async fn flush(&self) -> Vec<QueuedChange> {
        let mut inner = self.inner.lock().await;
        let items = std::mem::take(&mut inner.items);
        drop(inner);
        dedup_last_wins(items)
    }

    /// Run the batching loop, sending cut batches to `batch_tx` until the
    /// queue is dropped or the channel closes. Exactly one batch is ever in
    /// flight: the loop does not cut the next batch until the previous send
    /// completes, so a slow consumer naturally exerts backpressure while new
    /// events keep accumulating for the follow-up batch.
    pub async fn run(&self, batch_tx: mpsc::Sender<Vec<QueuedChange>>) {
        loop {
            let timeout = tokio::time::sleep(self.config.batch_delay);
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = timeout => {}
            }

            if self.is_empty().await {
                continue;
            }

            let batch = self.flush().await;
            if batch.is_empty() {
                continue;
            }
            if batch_tx.send(batch).await.is_err() {
                return;
            }
        }
    }
}

fn dedup_last_wins(items: Vec<QueuedChange>) -> Vec<QueuedChange> {
    let mut first_index_by_path: HashMap<PathBuf, usize> = HashMap::new();
    let mut latest_by_path: HashMap<PathBuf, QueuedChange> = HashMap::new();
    for (idx, item) in items.into_iter().enumerate() {
        first_index_by_path.entry(item.event.path.clone()).or_insert(idx);
        latest_by_path.insert(item.event.path.clone(), item);
    }
    let mut surviving: Vec<(usize, QueuedChange)> = latest_by_path
        .into_iter()
        .map(|(path, item)| (first_index_by_path[&path], item))
        .collect();
    surviving.sort_by_key(|(idx, _)| *idx);
    surviving.into_iter().map(|(_, item)| item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Framework;
    use crate::watch::ChangeKind;

    fn event(path: &str) -> FileChangeEvent {
        FileChangeEvent {
            kind: ChangeKind::Modified,
            path: PathBuf::from(path),
            framework: Framework::A,
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn entry_points_are_prioritized_high() {
        let (queue, _overflow) = ChangeQueue::new(ChangeQueueConfig::default());
        queue.enqueue(event("src/components/Widget.tsx")).await;
        queue.enqueue(event("src/App.tsx")).await;
        let batch = queue.flush().await;
        assert_eq!(batch[0].event.path, PathBuf::from("src/App.tsx"));
        assert_eq!(batch[0].priority, Priority::High);
    }

    #[tokio::test]
    async fn last_wins_dedup_keeps_latest_event_in_original_position() {
        let (queue, _overflow) = ChangeQueue::new(ChangeQueueConfig::default());
        queue.enqueue(event("a.tsx")).await;
        queue.enqueue(event("b.tsx")).await;
        let mut removed = event("a.tsx");
        removed.kind = ChangeKind::Removed;
        queue.enqueue(removed).await;

        let batch = queue.flush().await;
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].event.path, PathBuf::from("a.tsx"));
        assert_eq!(batch[0].event.kind, ChangeKind::Removed);
    }

    #[tokio::test]
    async fn overflow_drops_the_oldest_event_and_warns() {
        let (queue, mut overflow) = ChangeQueue::new(ChangeQueueConfig {
            max_queue_size: 1,
            ..ChangeQueueConfig::default()
        });
        queue.enqueue(event("first.tsx")).await;
        queue.enqueue(event("second.tsx")).await;
        assert_eq!(queue.len().await, 1);
        let dropped = overflow.try_recv().unwrap();
        assert_eq!(dropped.dropped_path, PathBuf::from("first.tsx"));
    }
}
