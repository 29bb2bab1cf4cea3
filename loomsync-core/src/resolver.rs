//! Applies a chosen conflict resolution, regenerates the opposite side, and
//! manages timestamped backups (C11).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::conflict::{ConflictRecord, ConflictStore};
use crate::engine::SourceConverter;
use crate::error::{CoreError, Result};
use crate::ir::store::IrStore;
use crate::ir::Framework;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionChoice {
    UseA,
    UseB,
    ManualMerge,
    Skip,
}

#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub created_at_epoch_ms: i64,
}

pub struct Resolver {
    ir_store: Arc<dyn IrStore>,
    converter: Arc<dyn SourceConverter>,
    conflict_store: Arc<dyn ConflictStore>,
}

impl Resolver {
    pub fn new(
        ir_store: Arc<dyn IrStore>,
        converter: Arc<dyn SourceConverter>,
        conflict_store: Arc<dyn ConflictStore>,
    ) -> Self {
        Self { ir_store, converter, conflict_store }
    }

    pub async fn resolve(&self, record: &ConflictRecord, choice: ResolutionChoice) -> Result<()> {
        match choice {
            ResolutionChoice::UseA => self.apply(record, Framework::A, &record.path_a, &record.path_b).await,
            ResolutionChoice::UseB => self.apply(record, Framework::B, &record.path_b, &record.path_a).await,
            ResolutionChoice::ManualMerge => {
                backup(&record.path_a)?;
                backup(&record.path_b)?;
                info!(id = %record.id, "conflict marked pending manual merge; backups created for both sides");
                Ok(())
            }
            ResolutionChoice::Skip => {
                info!(id = %record.id, "conflict left unresolved by operator choice");
                Ok(())
            }
        }
    }

    /// Called after an operator inspects a `manual-merge` conflict and picks
    /// the side of truth; behaves exactly like `use-<side>`.
    pub async fn resolve_manual_merge(&self, record: &ConflictRecord, side: Framework) -> Result<()> {
        match side {
            Framework::A => self.resolve(record, ResolutionChoice::UseA).await,
            Framework::B => self.resolve(record, ResolutionChoice::UseB).await,
        }
    }

    async fn apply(
        &self,
        record: &ConflictRecord,
        source_side: Framework,
        source_path: &Path,
        target_path: &Path,
    ) -> Result<()> {
        backup(target_path)?;
        let body = self.converter.source_to_ir(source_side, source_path).await?;
        self.ir_store.store(&record.id, body.clone()).await?;
        if let Some(parent) = target_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.converter.ir_to_source(&body, target_path).await?;
        self.conflict_store.mark_resolved(&record.id, record.detected_at).await?;
        info!(id = %record.id, side = %source_side, "conflict resolved, opposite side regenerated");
        Ok(())
    }
}

/// Create a timestamped backup of `path` alongside the original:
/// `<base>.backup.<epochMs>.<ext>`.
pub fn backup(path: &Path) -> Result<BackupEntry> {
    if !path.exists() {
        return Err(CoreError::NotFound(path.display().to_string()));
    }
    let epoch_ms = Utc::now().timestamp_millis();
    let backup_path = backup_path_for(path, epoch_ms);
    std::fs::copy(path, &backup_path).map_err(CoreError::Io)?;
    Ok(BackupEntry { path: backup_path, created_at_epoch_ms: epoch_ms })
}

fn backup_path_for(path: &Path, epoch_ms: i64) -> PathBuf {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("backup");
    let mut name = format!("{stem}.backup.{epoch_ms}");
    if !ext.is_empty() {
        name.push('.');
        name.push_str(ext);
    }
    path.with_file_name(name)
}

/// Most-recent-first list of backups that exist alongside `path`.
pub fn list_backups(path: &Path) -> Result<Vec<BackupEntry>> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("").to_string();
    let prefix = format!("{stem}.backup.");

    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(CoreError::Io)? {
        let entry = entry.map_err(CoreError::Io)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(rest) = name.strip_prefix(&prefix) {
            let epoch_str = rest.split('.').next().unwrap_or("");
            if let Ok(epoch_ms) = epoch_str.parse::<i64>() {
                entries.push(BackupEntry { path: entry.path(), created_at_epoch_ms: epoch_ms });
            }
        }
    }
    entries.sort_by(|a, b| b.created_at_epoch_ms.cmp(&a.created_at_epoch_ms));
    Ok(entries)
}

/// Remove all but the `keep` most recent backups of `path`.
pub fn cleanup_backups(path: &Path, keep: usize) -> Result<()> {
    let backups = list_backups(path)?;
    for entry in backups.into_iter().skip(keep) {
        let _ = std::fs::remove_file(&entry.path);
    }
    Ok(())
}

/// Restore `path` from a specific backup entry (a plain copy).
pub fn restore(path: &Path, backup: &BackupEntry) -> Result<()> {
    std::fs::copy(&backup.path, path).map_err(CoreError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_path_includes_epoch_and_extension() {
        let path = Path::new("/root/a/Home.tsx");
        let backup_path = backup_path_for(path, 1_700_000_000_000);
        assert_eq!(backup_path, PathBuf::from("/root/a/Home.backup.1700000000000.tsx"));
    }

    #[test]
    fn list_backups_is_most_recent_first_and_cleanup_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("Home.tsx");
        std::fs::write(&original, b"v1").unwrap();

        for epoch in [100, 300, 200] {
            std::fs::write(backup_path_for(&original, epoch), b"backup").unwrap();
        }

        let backups = list_backups(&original).unwrap();
        let epochs: Vec<i64> = backups.iter().map(|b| b.created_at_epoch_ms).collect();
        assert_eq!(epochs, vec![300, 200, 100]);

        cleanup_backups(&original, 1).unwrap();
        let remaining = list_backups(&original).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].created_at_epoch_ms, 300);
    }

    #[test]
    fn restore_copies_backup_content_back_to_original() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("Home.tsx");
        std::fs::write(&original, b"current").unwrap();
        let backup_entry = backup(&original).unwrap();
        std::fs::write(&original, b"corrupted").unwrap();
        restore(&original, &backup_entry).unwrap();
        assert_eq!(std::fs::read_to_string(&original).unwrap(), "current");
    }
}
