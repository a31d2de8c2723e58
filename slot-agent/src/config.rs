//! Configuration management for the slot agent.
//!
//! Loads configuration from a TOML file. Every section has defaults, so a
//! partial file only needs to name what it changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::errors::{AgentError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// External slot management tool
    #[serde(default = "default_tool_program")]
    pub program: String,

    /// Privilege-elevation wrapper; `None` runs everything unprivileged
    #[serde(default = "default_privilege_wrapper")]
    pub privilege_wrapper: Option<String>,

    /// Fallback source for the system version string
    #[serde(default = "default_release_file")]
    pub release_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Backup directories, one per slot
    #[serde(default = "default_backup_directories")]
    pub directories: Vec<PathBuf>,

    /// Extension of backup artifacts (without the dot)
    #[serde(default = "default_artifact_extension")]
    pub artifact_extension: String,

    /// Extension of sidecar metadata files (without the dot)
    #[serde(default = "default_sidecar_extension")]
    pub sidecar_extension: String,

    /// Prefix stripped from a directory name to obtain the slot name
    #[serde(default = "default_slot_prefix")]
    pub slot_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Per-deletion timeout while pruning old backups
    #[serde(default = "default_prune_secs")]
    pub prune_secs: u64,

    /// Short status probes (current slot, tool lookup)
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,

    /// Full `status --json` probe
    #[serde(default = "default_status_secs")]
    pub status_secs: u64,

    /// Time between SIGTERM and SIGKILL when cancelling
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_tool_program() -> String {
    "obsidianctl".to_string()
}

fn default_privilege_wrapper() -> Option<String> {
    Some("pkexec".to_string())
}

fn default_release_file() -> PathBuf {
    PathBuf::from("/etc/obsidianos-release")
}

fn default_backup_directories() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/var/backups/obsidianctl/slot_a"),
        PathBuf::from("/var/backups/obsidianctl/slot_b"),
    ]
}

fn default_artifact_extension() -> String {
    "sfs".to_string()
}

fn default_sidecar_extension() -> String {
    "json".to_string()
}

fn default_slot_prefix() -> String {
    "slot_".to_string()
}

fn default_prune_secs() -> u64 {
    30
}

fn default_probe_secs() -> u64 {
    3
}

fn default_status_secs() -> u64 {
    5
}

fn default_cancel_grace_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: default_tool_program(),
            privilege_wrapper: default_privilege_wrapper(),
            release_file: default_release_file(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            directories: default_backup_directories(),
            artifact_extension: default_artifact_extension(),
            sidecar_extension: default_sidecar_extension(),
            slot_prefix: default_slot_prefix(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            prune_secs: default_prune_secs(),
            probe_secs: default_probe_secs(),
            status_secs: default_status_secs(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl TimeoutConfig {
    pub fn prune(&self) -> Duration {
        Duration::from_secs(self.prune_secs)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    pub fn status(&self) -> Duration {
        Duration::from_secs(self.status_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.tool.program.trim().is_empty() {
            return Err(AgentError::Config("tool.program must not be empty".into()));
        }
        if self.catalog.artifact_extension.is_empty() {
            return Err(AgentError::Config(
                "catalog.artifact_extension must not be empty".into(),
            ));
        }
        Ok(())
    }
}
