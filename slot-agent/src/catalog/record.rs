//! Backup records and their display helpers.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;

/// One backup artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    /// Absolute path, unique within a catalog
    pub path: PathBuf,

    /// Slot the backup was taken from
    pub slot: String,

    /// Modification time of the artifact
    pub timestamp: DateTime<Local>,

    /// Artifact size; 0 means unknown
    pub size_bytes: u64,

    /// From the sidecar metadata, false when absent
    pub is_full_backup: bool,
}

impl BackupRecord {
    pub fn size_label(&self) -> String {
        size_label(self.size_bytes)
    }

    pub fn timestamp_label(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Human-readable size with one fractional digit, `"Unknown"` for 0.
pub fn size_label(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "Unknown".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.1} {}", size, UNITS[unit_index])
}
