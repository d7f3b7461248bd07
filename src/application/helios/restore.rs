//! File-level restore substrate: stable versions are retained as snapshot
//! directories, and a rollback copies the retained tree back over the
//! target directory.

use crate::domain::ports::VersionRestorer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

pub struct SnapshotDirRestorer {
    /// Holds one subdirectory per retained version id
    snapshot_root: PathBuf,
    /// Directory the retained tree is copied back into
    restore_target: PathBuf,
}

impl SnapshotDirRestorer {
    pub fn new(snapshot_root: impl Into<PathBuf>, restore_target: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_root: snapshot_root.into(),
            restore_target: restore_target.into(),
        }
    }

    /// Retains the current target tree under the given version id
    pub async fn retain(&self, version_id: &str) -> Result<()> {
        let destination = self.snapshot_root.join(version_id);
        fs::create_dir_all(&destination)
            .await
            .context("Failed to create snapshot directory")?;
        copy_tree(&self.restore_target, &destination).await?;
        info!(
            "SnapshotDirRestorer: retained {} at {}",
            version_id,
            destination.display()
        );
        Ok(())
    }
}

#[async_trait]
impl VersionRestorer for SnapshotDirRestorer {
    async fn restore(&self, version_id: &str) -> Result<()> {
        let source = self.snapshot_root.join(version_id);
        if !source.is_dir() {
            anyhow::bail!(
                "no retained snapshot for version {} at {}",
                version_id,
                source.display()
            );
        }

        fs::create_dir_all(&self.restore_target)
            .await
            .context("Failed to create restore target")?;
        copy_tree(&source, &self.restore_target).await?;

        info!(
            "SnapshotDirRestorer: restored {} into {}",
            version_id,
            self.restore_target.display()
        );
        Ok(())
    }
}

/// Recursive copy, regular files and directories only
async fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    let mut stack = vec![(from.to_path_buf(), to.to_path_buf())];

    while let Some((source_dir, target_dir)) = stack.pop() {
        fs::create_dir_all(&target_dir).await.with_context(|| {
            format!("Failed to create directory {}", target_dir.display())
        })?;

        let mut entries = fs::read_dir(&source_dir)
            .await
            .with_context(|| format!("Failed to read {}", source_dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let source = entry.path();
            let target = target_dir.join(entry.file_name());
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                stack.push((source, target));
            } else if file_type.is_file() {
                fs::copy(&source, &target).await.with_context(|| {
                    format!("Failed to copy {} -> {}", source.display(), target.display())
                })?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.unwrap();
        }
        fs::write(path, content).await.unwrap();
    }

    #[tokio::test]
    async fn test_retain_then_restore_roundtrip() {
        let root = std::env::temp_dir().join(format!("helios-restore-{}", uuid::Uuid::new_v4()));
        let snapshots = root.join("snapshots");
        let target = root.join("live");

        write(&target.join("engine.toml"), "threshold = 0.15").await;
        write(&target.join("weights/categories.toml"), "ai_ml = 0.25").await;

        let restorer = SnapshotDirRestorer::new(&snapshots, &target);
        restorer.retain("v1.1").await.unwrap();

        // The live tree drifts, then the rollback restores it
        write(&target.join("engine.toml"), "threshold = 0.01").await;
        restorer.restore("v1.1").await.unwrap();

        let restored = fs::read_to_string(target.join("engine.toml")).await.unwrap();
        assert_eq!(restored, "threshold = 0.15");
        let nested = fs::read_to_string(target.join("weights/categories.toml"))
            .await
            .unwrap();
        assert_eq!(nested, "ai_ml = 0.25");

        fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_unknown_version_fails() {
        let root = std::env::temp_dir().join(format!("helios-restore-{}", uuid::Uuid::new_v4()));
        let restorer = SnapshotDirRestorer::new(root.join("snapshots"), root.join("live"));

        let err = restorer.restore("v9.9").await.unwrap_err();
        assert!(err.to_string().contains("no retained snapshot"));
    }
}
