//! External process invocation.
//!
//! Everything above this module talks to child processes through the
//! [`Launcher`] seam: a launch returns a [`RunHandle`] whose events arrive on a
//! single ordered channel, `Output` chunks first and exactly one terminal
//! event last.
//! - [`CommandRunner`] is the tokio-backed launcher used in production
//! - [`blocking::run_to_completion`] drives one launch to its end with a deadline

pub mod blocking;
pub mod runner;

pub use blocking::run_to_completion;
pub use runner::CommandRunner;

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ToolConfig;

/// A fully assembled program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Assembles command lines for the slot tool, optionally through the
/// privilege-elevation wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    program: String,
    privilege_wrapper: Option<String>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>, privilege_wrapper: Option<String>) -> Self {
        Self {
            program: program.into(),
            privilege_wrapper: privilege_wrapper.filter(|w| !w.trim().is_empty()),
        }
    }

    /// An empty `privilege_wrapper` in the config disables elevation.
    pub fn from_config(config: &ToolConfig) -> Self {
        Self::new(config.program.clone(), config.privilege_wrapper.clone())
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn privilege_wrapper(&self) -> Option<&str> {
        self.privilege_wrapper.as_deref()
    }

    /// `wrapper tool subcommand args...` or `tool subcommand args...`.
    pub fn command(&self, subcommand: &str, args: &[String], privileged: bool) -> CommandLine {
        let mut argv = Vec::with_capacity(args.len() + 2);
        argv.push(subcommand.to_string());
        argv.extend(args.iter().cloned());

        match self.wrapper_for(privileged) {
            Some(wrapper) => {
                argv.insert(0, self.program.clone());
                CommandLine::new(wrapper, argv)
            }
            None => CommandLine::new(self.program.clone(), argv),
        }
    }

    /// Runs `argv` as its own program, bypassing the tool.
    pub fn direct(&self, argv: &[String], privileged: bool) -> CommandLine {
        match (self.wrapper_for(privileged), argv.split_first()) {
            (Some(wrapper), _) => CommandLine::new(wrapper, argv.to_vec()),
            (None, Some((program, rest))) => CommandLine::new(program.clone(), rest.to_vec()),
            (None, None) => CommandLine::new(String::new(), Vec::new()),
        }
    }

    fn wrapper_for(&self, privileged: bool) -> Option<String> {
        if privileged {
            self.privilege_wrapper.clone()
        } else {
            None
        }
    }
}

/// Which OS stream a chunk was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: StreamKind,
    pub text: String,
}

/// Why a process never produced an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchFailure {
    /// Program or privilege wrapper missing or not executable
    NotFound,
    /// Terminated by a signal
    Crashed,
    TimedOut,
    Unknown,
}

impl LaunchFailure {
    pub fn from_spawn_error(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => Self::NotFound,
            std::io::ErrorKind::TimedOut => Self::TimedOut,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not-found",
            Self::Crashed => "crashed",
            Self::TimedOut => "timed-out",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LaunchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Output(OutputChunk),
    Finished(i32),
    LaunchFailed(LaunchFailure),
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunEvent::Output(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Exited(i32),
    LaunchFailed(LaunchFailure),
}

/// Terminal result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Both streams, in arrival order
    pub combined_output: String,
    pub stdout: String,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.status == RunStatus::Exited(0)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            RunStatus::Exited(code) => Some(code),
            RunStatus::LaunchFailed(_) => None,
        }
    }
}

/// Producer side of a run: output and terminal events go in here.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<RunEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    /// Returns false once the consumer is gone.
    pub fn send(&self, event: RunEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Consumer side of a run.
pub struct RunHandle {
    events: mpsc::UnboundedReceiver<RunEvent>,
    cancel: CancellationToken,
}

impl RunHandle {
    /// Next event in emission order; `None` once every producer is gone.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Request termination. Never blocks; the launcher escalates on its own.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Create a connected sink/handle pair.
pub fn run_channel() -> (EventSink, RunHandle) {
    let (tx, events) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    (
        EventSink {
            tx,
            cancel: cancel.clone(),
        },
        RunHandle { events, cancel },
    )
}

/// Spawns processes and hands back their event stream.
pub trait Launcher: Send + Sync {
    fn launch(&self, command: &CommandLine) -> RunHandle;
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory launcher that replays scripted events.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct ScriptedLauncher {
        scripts: Mutex<VecDeque<Vec<RunEvent>>>,
        launched: Mutex<Vec<CommandLine>>,
    }

    impl ScriptedLauncher {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue the events the next launch will emit.
        pub fn push(&self, events: Vec<RunEvent>) {
            self.scripts.lock().unwrap().push_back(events);
        }

        pub fn launched(&self) -> Vec<CommandLine> {
            self.launched.lock().unwrap().clone()
        }
    }

    impl Launcher for ScriptedLauncher {
        fn launch(&self, command: &CommandLine) -> RunHandle {
            self.launched.lock().unwrap().push(command.clone());
            let (sink, handle) = run_channel();
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| vec![RunEvent::Finished(0)]);
            for event in script {
                sink.send(event);
            }
            handle
        }
    }

    pub fn out(text: &str) -> RunEvent {
        RunEvent::Output(OutputChunk {
            stream: StreamKind::Stdout,
            text: text.to_string(),
        })
    }

    pub fn err(text: &str) -> RunEvent {
        RunEvent::Output(OutputChunk {
            stream: StreamKind::Stderr,
            text: text.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_privileged_command_goes_through_wrapper() {
        let tool = ToolInvocation::new("obsidianctl", Some("pkexec".into()));
        let cmd = tool.command("backup-slot", &args(&["a", "--full-backup"]), true);
        assert_eq!(cmd.program, "pkexec");
        assert_eq!(cmd.args, args(&["obsidianctl", "backup-slot", "a", "--full-backup"]));
    }

    #[test]
    fn test_unprivileged_command_runs_tool_directly() {
        let tool = ToolInvocation::new("obsidianctl", Some("pkexec".into()));
        let cmd = tool.command("current-slot", &[], false);
        assert_eq!(cmd.program, "obsidianctl");
        assert_eq!(cmd.args, args(&["current-slot"]));
        assert_eq!(cmd.to_string(), "obsidianctl current-slot");
    }

    #[test]
    fn test_missing_wrapper_falls_back_to_tool() {
        let tool = ToolInvocation::new("obsidianctl", Some("  ".into()));
        assert!(tool.privilege_wrapper().is_none());
        let cmd = tool.command("switch", &args(&["b"]), true);
        assert_eq!(cmd.program, "obsidianctl");
        assert_eq!(cmd.args, args(&["switch", "b"]));
    }

    #[test]
    fn test_direct_bypasses_tool() {
        let tool = ToolInvocation::new("obsidianctl", Some("pkexec".into()));
        let argv = args(&["rm", "-f", "/var/backups/x.sfs"]);
        let cmd = tool.direct(&argv, true);
        assert_eq!(cmd.program, "pkexec");
        assert_eq!(cmd.args, argv);

        let plain = ToolInvocation::new("obsidianctl", None).direct(&argv, true);
        assert_eq!(plain.program, "rm");
        assert_eq!(plain.args, args(&["-f", "/var/backups/x.sfs"]));
    }

    #[test]
    fn test_spawn_error_classification() {
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let other = std::io::Error::from(std::io::ErrorKind::InvalidInput);
        assert_eq!(LaunchFailure::from_spawn_error(&missing), LaunchFailure::NotFound);
        assert_eq!(LaunchFailure::from_spawn_error(&denied), LaunchFailure::NotFound);
        assert_eq!(LaunchFailure::from_spawn_error(&other), LaunchFailure::Unknown);
    }

    #[tokio::test]
    async fn test_run_channel_preserves_order() {
        let (sink, mut handle) = run_channel();
        sink.send(testing::out("one"));
        sink.send(testing::err("two"));
        sink.send(RunEvent::Finished(3));
        drop(sink);

        assert_eq!(handle.next_event().await, Some(testing::out("one")));
        assert_eq!(handle.next_event().await, Some(testing::err("two")));
        let last = handle.next_event().await.unwrap();
        assert!(last.is_terminal());
        assert_eq!(handle.next_event().await, None);
    }
}
