//! Batches and coalesces outbound updates per session, assigning strictly
//! monotonic sequence numbers and tracking acks (C10).
//!
//! Grounded on the same "single writer task per connection" shape as the
//! teacher's websocket handler: here the writer is a per-session 50ms
//! coalescing timer instead of a per-connection mpsc forwarder, because one
//! session fans out to many devices and they must all see the same
//! sequence.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use loomsync_core::ir::IrDocument;

use crate::delta::{DeltaPolicy, SchemaDelta, UpdateShape};
use crate::protocol::{Frame, MessageType, UpdateKind, UpdatePayload};
use crate::session::{Session, SessionRegistry};

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub coalesce_window: Duration,
    pub policy: DeltaPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { coalesce_window: Duration::from_millis(50), policy: DeltaPolicy::default() }
    }
}

/// One session's batching state: at most one pending-batch timer runs at a
/// time, and a push that lands while one is already pending just replaces
/// the pending document (spec.md §4.10's coalescing contract).
struct PendingBatch {
    latest: IrDocument,
    timer_running: bool,
}

/// Coalesces bursts of `pushUpdate` calls into a single flush per session
/// every `coalesce_window`, and exposes `pushUpdateImmediate` for callers
/// that need to bypass batching (e.g. the first update after a device
/// reconnects).
pub struct UpdateDispatcher {
    registry: Arc<SessionRegistry>,
    config: DispatcherConfig,
    pending: DashMap<String, Arc<Mutex<PendingBatch>>>,
}

impl UpdateDispatcher {
    pub fn new(registry: Arc<SessionRegistry>, config: DispatcherConfig) -> Arc<Self> {
        Arc::new(Self { registry, config, pending: DashMap::new() })
    }

    /// Queue `document` for `session_id`, coalescing with a document
    /// already pending. Spawns the flush timer the first time a batch
    /// opens for this session.
    pub fn push_update(self: &Arc<Self>, session_id: &str, document: IrDocument) {
        let slot = self
            .pending
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PendingBatch { latest: document.clone(), timer_running: false })))
            .clone();

        let dispatcher = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let mut batch = slot.lock().await;
            batch.latest = document;
            if batch.timer_running {
                return;
            }
            batch.timer_running = true;
            drop(batch);

            let window = dispatcher.config.coalesce_window;
            let slot = slot.clone();
            tokio::spawn(async move {
                sleep(window).await;
                let mut batch = slot.lock().await;
                batch.timer_running = false;
                let document = batch.latest.clone();
                drop(batch);
                dispatcher.flush(&session_id, document).await;
            });
        });
    }

    /// Flush `document` to `session_id` immediately, bypassing the
    /// coalescing window. Used for a device's first update after it
    /// (re)connects, which always gets a full snapshot (spec.md §8).
    pub async fn push_update_immediate(self: &Arc<Self>, session_id: &str, document: IrDocument) {
        self.flush(session_id, document).await;
    }

    async fn flush(&self, session_id: &str, next: IrDocument) {
        let Some(session) = self.registry.get_session(session_id) else {
            warn!(session_id, "dropping flush for unknown session");
            return;
        };

        let prior = session.current_ir.read().await.clone();

        // Decide the update shape (and whether there's anything to send at
        // all) before consuming a sequence number — an unchanged document
        // must not bump `nextSequence` since no frame goes out for it.
        enum Shape {
            Full,
            Incremental(SchemaDelta),
        }
        let shape = match &prior {
            None => Shape::Full,
            Some(prior_doc) => {
                let delta = SchemaDelta::compute(prior_doc, &next);
                if delta.is_empty() {
                    debug!(session_id, "flush skipped: no schema changes");
                    return;
                }
                match self.config.policy.decide(prior_doc, &next, &delta) {
                    UpdateShape::Incremental => Shape::Incremental(delta),
                    UpdateShape::Full => Shape::Full,
                }
            }
        };

        let sequence_number = session.next_sequence();
        let payload = match shape {
            Shape::Full => UpdatePayload {
                sequence_number,
                kind: UpdateKind::Full,
                preserve_state: false,
                schema: Some(next.clone()),
                delta: None,
            },
            Shape::Incremental(delta) => UpdatePayload {
                sequence_number,
                kind: UpdateKind::Incremental,
                preserve_state: true,
                schema: None,
                delta: Some(delta),
            },
        };

        *session.current_ir.write().await = Some(next);

        let frame = Frame::new(
            MessageType::Update,
            session_id,
            serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null),
        );
        session.broadcast(frame).await;
    }

    /// Record a device's ack of `sequence_number` (spec.md §3's
    /// `lastAckedSequence` invariant).
    pub async fn record_ack(&self, session: &Session, connection_id: &str, sequence_number: u64) {
        if let Some(device) = session.devices.get(connection_id) {
            device.record_ack(sequence_number).await;
        }
    }

    /// A newly (re)connecting device always gets the full current schema,
    /// never a delta against state it may not hold (spec.md §8).
    pub async fn resync(&self, session: &Session, connection_id: &str) {
        let Some(current) = session.current_ir.read().await.clone() else { return };
        let sequence_number = session.current_sequence();
        let payload = UpdatePayload {
            sequence_number,
            kind: UpdateKind::Full,
            preserve_state: false,
            schema: Some(current),
            delta: None,
        };
        let frame = Frame::new(
            MessageType::Update,
            &session.id,
            serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null),
        );
        if let Some(device) = session.devices.get(connection_id) {
            if let Err(e) = device.send(frame).await {
                warn!(connection_id, error = %e, "failed to resync device");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRegistryConfig;
    use chrono::Utc;
    use loomsync_core::ir::{Framework, IrDocumentMetadata, IrNode};
    use std::collections::BTreeMap;

    fn doc(nodes: Vec<(&str, &str)>) -> IrDocument {
        let nodes: BTreeMap<String, IrNode> = nodes
            .into_iter()
            .map(|(id, prop)| {
                (
                    id.to_string(),
                    IrNode {
                        id: id.to_string(),
                        node_type: "View".to_string(),
                        properties: BTreeMap::from([("title".to_string(), serde_json::json!(prop))]),
                        children: vec![],
                        metadata: None,
                    },
                )
            })
            .collect();
        IrDocument {
            schema_version: "1".to_string(),
            metadata: IrDocumentMetadata { framework: Framework::A, source_path: "Home.tsx".to_string(), generated_at: Utc::now() },
            roots: nodes.keys().cloned().collect(),
            nodes,
        }
    }

    #[tokio::test]
    async fn first_update_for_a_session_is_always_full() {
        let registry = SessionRegistry::new(SessionRegistryConfig::default());
        let session = registry.create_session();
        let dispatcher = UpdateDispatcher::new(registry, DispatcherConfig::default());

        dispatcher.push_update_immediate(&session.id, doc(vec![("a", "1")])).await;
        let current = session.current_ir.read().await.clone();
        assert!(current.is_some());
        assert_eq!(session.current_sequence(), 1);
    }

    #[tokio::test]
    async fn coalescing_collapses_a_burst_into_one_flush() {
        let registry = SessionRegistry::new(SessionRegistryConfig::default());
        let session = registry.create_session();
        let dispatcher = UpdateDispatcher::new(registry, DispatcherConfig::default());

        dispatcher.push_update(&session.id, doc(vec![("a", "1")]));
        dispatcher.push_update(&session.id, doc(vec![("a", "2")]));
        dispatcher.push_update(&session.id, doc(vec![("a", "3")]));

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(session.current_sequence(), 1);
        let current = session.current_ir.read().await.clone().unwrap();
        assert_eq!(current.nodes["a"].properties["title"], serde_json::json!("3"));
    }

    #[tokio::test]
    async fn unchanged_document_does_not_bump_sequence() {
        let registry = SessionRegistry::new(SessionRegistryConfig::default());
        let session = registry.create_session();
        let dispatcher = UpdateDispatcher::new(registry, DispatcherConfig::default());

        let document = doc(vec![("a", "1")]);
        dispatcher.push_update_immediate(&session.id, document.clone()).await;
        dispatcher.push_update_immediate(&session.id, document).await;

        assert_eq!(session.current_sequence(), 1);
    }
}
