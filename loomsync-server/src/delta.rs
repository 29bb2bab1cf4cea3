//! Computes schema deltas between two IR bodies and decides full vs
//! incremental update shape (C9).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use loomsync_core::ir::{IrDocument, IrNode};

/// `added`/`modified`/`removed` relative to a prior IR body of the same id
/// (spec.md §3).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDelta {
    pub added: Vec<IrNode>,
    pub modified: Vec<IrNode>,
    pub removed: Vec<String>,
}

impl SchemaDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    /// Build an ordered node-id map for `doc` keyed by each node's stable id,
    /// and diff it against `prior`'s, per spec.md §4.9.
    pub fn compute(prior: &IrDocument, next: &IrDocument) -> Self {
        let mut delta = SchemaDelta::default();
        for (id, node) in &next.nodes {
            match prior.nodes.get(id) {
                None => delta.added.push(node.clone()),
                Some(prior_node) if prior_node != node => delta.modified.push(node.clone()),
                Some(_) => {}
            }
        }
        for id in prior.nodes.keys() {
            if !next.nodes.contains_key(id) {
                delta.removed.push(id.clone());
            }
        }
        delta
    }

    /// Apply `add ∪ modified ∪ remove` (in that order, by id) to `base`,
    /// the inverse of [`SchemaDelta::compute`]. Used by the round-trip law
    /// in spec.md §8: applying a delta computed against B to B reproduces
    /// the document the delta was computed from.
    pub fn apply(&self, base: &IrDocument) -> IrDocument {
        let mut nodes: BTreeMap<String, IrNode> = base.nodes.clone();
        for node in &self.added {
            nodes.insert(node.id.clone(), node.clone());
        }
        for node in &self.modified {
            nodes.insert(node.id.clone(), node.clone());
        }
        for id in &self.removed {
            nodes.remove(id);
        }
        let mut doc = base.clone();
        doc.nodes = nodes;
        doc
    }

    fn encoded_size(&self) -> usize {
        serde_json::to_vec(self).map(|b| b.len()).unwrap_or(usize::MAX)
    }
}

/// The fraction of a document's node count a delta may touch, and still be
/// considered "small" (spec.md §4.9's configured fraction).
#[derive(Debug, Clone, Copy)]
pub struct DeltaPolicy {
    pub max_change_fraction: f64,
}

impl Default for DeltaPolicy {
    fn default() -> Self {
        Self { max_change_fraction: 0.3 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateShape {
    Full,
    Incremental,
}

impl DeltaPolicy {
    /// Decide incremental vs full per spec.md §4.9: the delta's change count
    /// must be below the configured fraction of the node count *and* its
    /// encoded size must be smaller than the full document's.
    pub fn decide(&self, prior: &IrDocument, next: &IrDocument, delta: &SchemaDelta) -> UpdateShape {
        let node_count = next.node_count().max(prior.node_count()).max(1);
        let fraction_ok =
            (delta.change_count() as f64) < self.max_change_fraction * node_count as f64;
        let size_ok = delta.encoded_size() < next.canonical_bytes().len();
        if fraction_ok && size_ok {
            UpdateShape::Incremental
        } else {
            UpdateShape::Full
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loomsync_core::ir::{Framework, IrDocumentMetadata};
    use std::collections::BTreeMap;

    fn node(id: &str, prop: &str) -> IrNode {
        IrNode {
            id: id.to_string(),
            node_type: "View".to_string(),
            properties: BTreeMap::from([("title".to_string(), serde_json::json!(prop))]),
            children: vec![],
            metadata: None,
        }
    }

    fn doc_with(nodes: Vec<IrNode>) -> IrDocument {
        let roots = nodes.iter().map(|n| n.id.clone()).collect();
        IrDocument {
            schema_version: "1".to_string(),
            metadata: IrDocumentMetadata {
                framework: Framework::A,
                source_path: "Home.tsx".to_string(),
                generated_at: Utc::now(),
            },
            roots,
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
        }
    }

    #[test]
    fn compute_reports_added_modified_removed() {
        let prior = doc_with(vec![node("a", "1"), node("b", "1")]);
        let next = doc_with(vec![node("a", "2"), node("c", "1")]);
        let delta = SchemaDelta::compute(&prior, &next);
        assert_eq!(delta.modified.len(), 1);
        assert_eq!(delta.modified[0].id, "a");
        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.added[0].id, "c");
        assert_eq!(delta.removed, vec!["b".to_string()]);
    }

    #[test]
    fn apply_reproduces_the_document_the_delta_was_computed_from() {
        let prior = doc_with((0..10).map(|i| node(&format!("n{i}"), "1")).collect());
        let mut next_nodes: Vec<IrNode> = (0..10).map(|i| node(&format!("n{i}"), "1")).collect();
        next_nodes[0].properties.insert("title".into(), serde_json::json!("changed"));
        let next = doc_with(next_nodes);

        let delta = SchemaDelta::compute(&prior, &next);
        let applied = delta.apply(&prior);
        assert_eq!(applied.nodes, next.nodes);
    }

    #[test]
    fn small_change_is_incremental_large_change_is_full() {
        let prior = doc_with((0..10).map(|i| node(&format!("n{i}"), "1")).collect());

        let mut small_next_nodes: Vec<IrNode> = (0..10).map(|i| node(&format!("n{i}"), "1")).collect();
        small_next_nodes[0].properties.insert("title".into(), serde_json::json!("changed"));
        let small_next = doc_with(small_next_nodes);
        let small_delta = SchemaDelta::compute(&prior, &small_next);
        assert_eq!(
            DeltaPolicy::default().decide(&prior, &small_next, &small_delta),
            UpdateShape::Incremental
        );

        let large_next = doc_with((0..10).map(|i| node(&format!("n{i}"), "changed")).collect());
        let large_delta = SchemaDelta::compute(&prior, &large_next);
        assert_eq!(
            DeltaPolicy::default().decide(&prior, &large_next, &large_delta),
            UpdateShape::Full
        );
    }
}
