//! Sidecar metadata stored next to each backup artifact.
//!
//! The sidecar is a JSON object sharing the artifact's base name. Only
//! `is_full_backup` is recognized; a missing or malformed sidecar reads as
//! the default rather than failing the scan.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::utils::errors::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SidecarMetadata {
    pub is_full_backup: bool,
}

impl SidecarMetadata {
    /// `backup.sfs` -> `backup.json`
    pub fn path_for(artifact: &Path, extension: &str) -> PathBuf {
        artifact.with_extension(extension)
    }

    /// Strict parse. Non-object documents and non-boolean values read as
    /// `false`; only invalid JSON is an error.
    pub fn parse(content: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(content)?;
        let is_full_backup = doc
            .as_object()
            .and_then(|obj| obj.get("is_full_backup"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(Self { is_full_backup })
    }

    /// Lenient load used during catalog scans.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                debug!("No sidecar at {}: {}", path.display(), e);
                return Self::default();
            }
        };

        Self::parse(&content).unwrap_or_else(|e| {
            warn!("Ignoring malformed sidecar {}: {}", path.display(), e);
            Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_path_for_replaces_last_extension() {
        let path = SidecarMetadata::path_for(Path::new("/b/slot_a/2024-01-01.tar.sfs"), "json");
        assert_eq!(path, PathBuf::from("/b/slot_a/2024-01-01.tar.json"));
    }

    #[test]
    fn test_parse_variants() {
        assert!(SidecarMetadata::parse(r#"{"is_full_backup": true, "other": 1}"#).unwrap().is_full_backup);
        assert!(!SidecarMetadata::parse(r#"{"is_full_backup": false}"#).unwrap().is_full_backup);
        assert!(!SidecarMetadata::parse(r#"{"is_full_backup": "yes"}"#).unwrap().is_full_backup);
        assert!(!SidecarMetadata::parse(r#"{}"#).unwrap().is_full_backup);
        assert!(!SidecarMetadata::parse(r#"[true]"#).unwrap().is_full_backup);
        assert!(SidecarMetadata::parse("{not json").is_err());
    }

    #[test]
    fn test_load_never_fails() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let missing = dir.path().join("missing.json");
        assert_eq!(SidecarMetadata::load(&missing), SidecarMetadata::default());

        let broken = dir.path().join("broken.json");
        fs::write(&broken, b"{\"is_full_backup\": tru")?;
        assert_eq!(SidecarMetadata::load(&broken), SidecarMetadata::default());

        let good = dir.path().join("good.json");
        fs::write(&good, br#"{"is_full_backup": true}"#)?;
        assert!(SidecarMetadata::load(&good).is_full_backup);
        Ok(())
    }
}
