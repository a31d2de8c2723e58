//! System status probes: which slot is booted and what version runs.
//!
//! Probes are short, unprivileged and bounded. Nothing here is fatal; a
//! probe that fails leaves its field empty.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::TimeoutConfig;
use crate::process::{run_to_completion, CommandLine, Launcher, ToolInvocation};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub current_slot: Option<String>,
    pub version: Option<String>,
}

/// `which <tool>` exits 0.
pub async fn tool_available(
    launcher: &dyn Launcher,
    tool: &ToolInvocation,
    timeouts: &TimeoutConfig,
) -> bool {
    let cmd = CommandLine::new("which", vec![tool.program().to_string()]);
    let available = run_to_completion(launcher, &cmd, timeouts.probe()).await.success();
    if !available {
        warn!("`{}` was not found in PATH", tool.program());
    }
    available
}

/// `tool current-slot`, trimmed stdout on success.
pub async fn current_slot(
    launcher: &dyn Launcher,
    tool: &ToolInvocation,
    timeouts: &TimeoutConfig,
) -> Option<String> {
    let cmd = tool.command("current-slot", &[], false);
    let outcome = run_to_completion(launcher, &cmd, timeouts.probe()).await;
    if outcome.success() {
        Some(outcome.stdout.trim().to_string())
    } else {
        debug!("current-slot probe failed: {:?}", outcome.status);
        None
    }
}

/// `tool status --json`, falling back to `current-slot` and the release
/// file when the JSON form is unavailable.
pub async fn probe_status(
    launcher: &dyn Launcher,
    tool: &ToolInvocation,
    release_file: &Path,
    timeouts: &TimeoutConfig,
) -> SystemStatus {
    let cmd = tool.command("status", &["--json".to_string()], false);
    let outcome = run_to_completion(launcher, &cmd, timeouts.status()).await;

    if outcome.success() {
        return parse_status(outcome.stdout.trim()).unwrap_or_default();
    }

    debug!("status --json failed ({:?}), using fallbacks", outcome.status);
    SystemStatus {
        current_slot: current_slot(launcher, tool, timeouts).await,
        version: read_release_file(release_file),
    }
}

/// `None` when the document is not a JSON object.
pub fn parse_status(json: &str) -> Option<SystemStatus> {
    let doc: Value = match serde_json::from_str(json) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Unparseable status output: {}", e);
            return None;
        }
    };
    let obj = doc.as_object()?;
    let field = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);

    Some(SystemStatus {
        current_slot: field("current_slot"),
        version: field("version"),
    })
}

fn read_release_file(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content.trim().to_string()),
        Err(e) => {
            debug!("Cannot read {}: {}", path.display(), e);
            None
        }
    }
}
