//! Backup catalog: what backups exist on disk, newest first.
//!
//! A scan rebuilds the whole list from the configured slot directories.
//! Faults confined to one directory or one sidecar are logged and skipped;
//! they never fail the scan.

pub mod record;
pub mod sidecar;

pub use record::{size_label, BackupRecord};
pub use sidecar::SidecarMetadata;

use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::CatalogConfig;
use crate::process::{run_to_completion, CommandLine, Launcher, ToolInvocation};

/// `rm -f <path>`
pub fn delete_argv(path: &Path) -> Vec<String> {
    vec![
        "rm".to_string(),
        "-f".to_string(),
        path.to_string_lossy().into_owned(),
    ]
}

/// Deletion through the privilege wrapper, bypassing the slot tool.
pub fn delete_command(tool: &ToolInvocation, path: &Path) -> CommandLine {
    tool.direct(&delete_argv(path), true)
}

#[derive(Debug, Clone)]
pub struct BackupCatalog {
    config: CatalogConfig,
    records: Vec<BackupRecord>,
}

impl BackupCatalog {
    pub fn new(config: CatalogConfig) -> Self {
        Self {
            config,
            records: Vec::new(),
        }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Replace the catalog with what is on disk now. Returns the record count.
    pub fn scan(&mut self) -> usize {
        let mut records = Vec::new();
        let mut seen = HashSet::new();

        for dir in &self.config.directories {
            if !dir.is_dir() {
                debug!("Backup directory {} does not exist, skipping", dir.display());
                continue;
            }

            let slot = slot_name(dir, &self.config.slot_prefix);
            for entry in self.artifacts(dir) {
                let record = self.build_record(&entry, &slot);
                if seen.insert(record.path.clone()) {
                    records.push(record);
                }
            }
        }

        // Stable: equal timestamps keep enumeration order.
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        info!("Catalog scan found {} backup(s)", records.len());
        self.records = records;
        self.records.len()
    }

    fn artifacts(&self, dir: &Path) -> Vec<DirEntry> {
        let extension = self.config.artifact_extension.as_str();

        WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == extension))
            .collect()
    }

    fn build_record(&self, entry: &DirEntry, slot: &str) -> BackupRecord {
        let path = std::path::absolute(entry.path()).unwrap_or_else(|_| entry.path().to_path_buf());

        let (size_bytes, modified) = match entry.metadata() {
            Ok(metadata) => (
                metadata.len(),
                metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            ),
            Err(e) => {
                warn!("Cannot stat {}: {}", path.display(), e);
                (0, SystemTime::UNIX_EPOCH)
            }
        };

        let sidecar = SidecarMetadata::load(&SidecarMetadata::path_for(
            &path,
            &self.config.sidecar_extension,
        ));

        BackupRecord {
            path,
            slot: slot.to_string(),
            timestamp: DateTime::<Local>::from(modified),
            size_bytes,
            is_full_backup: sidecar.is_full_backup,
        }
    }

    /// Newest first.
    pub fn records(&self) -> &[BackupRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BackupRecord> {
        self.records.get(index)
    }

    pub fn remove_at(&mut self, index: usize) -> Option<BackupRecord> {
        if index < self.records.len() {
            Some(self.records.remove(index))
        } else {
            None
        }
    }

    pub fn remove_path(&mut self, path: &Path) -> Option<BackupRecord> {
        let index = self.records.iter().position(|r| r.path == path)?;
        self.remove_at(index)
    }

    /// Delete every backup older than `days`. Returns how many were removed.
    pub async fn prune_older_than(
        &mut self,
        days: u32,
        launcher: &dyn Launcher,
        tool: &ToolInvocation,
        timeout: Duration,
        stop: &CancellationToken,
    ) -> usize {
        let cutoff = Local::now() - chrono::Duration::days(i64::from(days));
        self.prune_before(cutoff, launcher, tool, timeout, stop).await
    }

    /// Each qualifying record gets its own privileged delete. Only a zero exit
    /// removes the record; a failure leaves it and moves on. Walks from the
    /// highest index down so removals never shift unvisited entries.
    /// Once `stop` fires no further deletion is started.
    pub async fn prune_before(
        &mut self,
        cutoff: DateTime<Local>,
        launcher: &dyn Launcher,
        tool: &ToolInvocation,
        timeout: Duration,
        stop: &CancellationToken,
    ) -> usize {
        let mut removed = 0;

        for index in (0..self.records.len()).rev() {
            if self.records[index].timestamp >= cutoff {
                continue;
            }
            if stop.is_cancelled() {
                info!("Pruning stopped with {} backup(s) removed", removed);
                break;
            }

            let path = self.records[index].path.clone();
            let outcome = run_to_completion(launcher, &delete_command(tool, &path), timeout).await;

            if outcome.success() {
                info!("Pruned backup {}", path.display());
                self.records.remove(index);
                removed += 1;
            } else {
                warn!(
                    "Failed to prune {} ({:?}): {}",
                    path.display(),
                    outcome.status,
                    outcome.combined_output.trim()
                );
            }
        }

        removed
    }
}

/// `slot_a` -> `a`. The prefix length is stripped whatever its content.
fn slot_name(dir: &Path, prefix: &str) -> String {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.chars().skip(prefix.chars().count()).collect()
}
