//! Default `SourceToIR`/`IRToSource` collaborator wired into `loomsyncd`.
//!
//! Spec.md §1 treats the real per-framework parsers and code generators as
//! external collaborators the core only consumes through
//! [`loomsync_core::engine::SourceConverter`]. This module is the daemon's
//! stand-in for that plugin until a real React/Flutter/etc. adapter is
//! wired in: it round-trips a source file's raw text through a single-node
//! IR document, which is enough to exercise the full file-change pipeline,
//! the IR store, and conflict detection end to end without depending on a
//! third-party parser.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use regex::RegexSet;

use loomsync_core::engine::SourceConverter;
use loomsync_core::error::{CoreError, Result};
use loomsync_core::ir::{Framework, IrDocument, IrDocumentMetadata, IrNode};

/// Recognizes well-known test-file suffixes (spec.md §4.5's routing to a
/// degraded stub-generation path).
fn test_suffix_patterns() -> RegexSet {
    RegexSet::new([r"\.(test|spec)\.[a-zA-Z0-9]+$", r"(^|/)(__tests__)/"]).expect("valid test-suffix patterns")
}

pub struct PlaintextConverter {
    test_patterns: RegexSet,
}

impl Default for PlaintextConverter {
    fn default() -> Self {
        Self { test_patterns: test_suffix_patterns() }
    }
}

#[async_trait]
impl SourceConverter for PlaintextConverter {
    async fn source_to_ir(&self, framework: Framework, path: &Path) -> Result<IrDocument> {
        let bytes = tokio::fs::read(path).await.map_err(CoreError::Io)?;
        let content = String::from_utf8(bytes)
            .map_err(|e| CoreError::Parse { path: path.display().to_string(), reason: e.to_string() })?;

        let mut properties = BTreeMap::new();
        properties.insert("content".to_string(), serde_json::json!(content));

        let mut nodes = BTreeMap::new();
        nodes.insert(
            "root".to_string(),
            IrNode { id: "root".to_string(), node_type: "Source".to_string(), properties, children: vec![], metadata: None },
        );

        Ok(IrDocument {
            schema_version: "1".to_string(),
            metadata: IrDocumentMetadata {
                framework,
                source_path: path.display().to_string(),
                generated_at: Utc::now(),
            },
            roots: vec!["root".to_string()],
            nodes,
        })
    }

    async fn ir_to_source(&self, body: &IrDocument, target_path: &Path) -> Result<()> {
        let content = body
            .nodes
            .get("root")
            .and_then(|node| node.properties.get("content"))
            .and_then(|value| value.as_str())
            .unwrap_or("");
        tokio::fs::write(target_path, content).await.map_err(CoreError::Io)
    }

    fn is_test_file(&self, path: &Path) -> bool {
        self.test_patterns.is_match(&path.to_string_lossy())
    }

    async fn generate_test_stub(&self, framework: Framework, source_path: &Path, target_path: &Path) -> Result<()> {
        let stub = format!(
            "// generated stub: {} test file {} has no supported conversion\n",
            framework,
            source_path.display()
        );
        tokio::fs::write(target_path, stub).await.map_err(CoreError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_plain_text_content() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("Home.tsx");
        tokio::fs::write(&source, "export const Home = () => null;").await.unwrap();

        let converter = PlaintextConverter::default();
        let body = converter.source_to_ir(Framework::A, &source).await.unwrap();

        let target = dir.path().join("home.dart");
        converter.ir_to_source(&body, &target).await.unwrap();
        let round_tripped = tokio::fs::read_to_string(&target).await.unwrap();
        assert_eq!(round_tripped, "export const Home = () => null;");
    }

    #[test]
    fn recognizes_test_suffixes() {
        let converter = PlaintextConverter::default();
        assert!(converter.is_test_file(Path::new("Home.test.tsx")));
        assert!(converter.is_test_file(Path::new("src/__tests__/Home.tsx")));
        assert!(!converter.is_test_file(Path::new("Home.tsx")));
    }
}
