//! Backup manager for self-extension writes

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use super::BACKUP_DIR;

/// Manages `.backup/` copies inside one bundle
///
/// Backups are named `<filename>.<unix-ts>`; a retention policy keeps
/// only the newest `keep_count` per original filename.
pub struct BackupManager {
    backup_dir: PathBuf,
    keep_count: usize,
}

impl BackupManager {
    pub fn new(bundle_dir: impl AsRef<Path>, keep_count: usize) -> Self {
        Self {
            backup_dir: bundle_dir.as_ref().join(BACKUP_DIR),
            keep_count: keep_count.max(1),
        }
    }

    /// Copy a file into the backup directory; returns the backup path
    ///
    /// A missing original is not an error (nothing to back up).
    pub fn backup_file(&self, path: &Path) -> std::io::Result<Option<PathBuf>> {
        if !path.exists() {
            return Ok(None);
        }
        fs::create_dir_all(&self.backup_dir)?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string());
        let mut backup_path = self.backup_dir.join(format!("{}.{}", filename, Utc::now().timestamp()));
        // Same-second collisions get a counter suffix
        let mut counter = 1;
        while backup_path.exists() {
            backup_path = self
                .backup_dir
                .join(format!("{}.{}.{}", filename, Utc::now().timestamp(), counter));
            counter += 1;
        }

        fs::copy(path, &backup_path)?;
        debug!(original = %path.display(), backup = %backup_path.display(), "BackupManager::backup_file: copied");
        Ok(Some(backup_path))
    }

    /// Restore a backup over its original location
    pub fn restore(&self, backup_path: &Path, original: &Path) -> std::io::Result<()> {
        fs::copy(backup_path, original)?;
        info!("[Backup] Restored {} from {}", original.display(), backup_path.display());
        Ok(())
    }

    /// Backups for one original filename, newest first
    pub fn backups_for(&self, filename: &str) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.backup_dir) else {
            return Vec::new();
        };
        let prefix = format!("{}.", filename);
        let mut backups: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().starts_with(&prefix))
                    .unwrap_or(false)
            })
            .collect();
        backups.sort();
        backups.reverse();
        backups
    }

    /// Drop all but the newest `keep_count` backups per filename
    pub fn apply_retention(&self, filename: &str) -> std::io::Result<usize> {
        let backups = self.backups_for(filename);
        let mut removed = 0;
        for stale in backups.iter().skip(self.keep_count) {
            fs::remove_file(stale)?;
            removed += 1;
        }
        if removed > 0 {
            debug!(%filename, removed, "BackupManager::apply_retention: pruned");
        }
        Ok(removed)
    }
}
