//! Bounded run-to-completion for maintenance invocations.
//!
//! Pruning and status probes are not streamed to observers. They run one at
//! a time, each under its own deadline.

use std::time::Duration;
use tracing::warn;

use super::{CommandLine, LaunchFailure, Launcher, RunEvent, RunOutcome, RunStatus, StreamKind};

/// Launch `command` and wait for its terminal event, at most `timeout`.
///
/// A run that overstays its deadline is cancelled and reported as
/// `LaunchFailed(TimedOut)` once the process has actually ended.
pub async fn run_to_completion(
    launcher: &dyn Launcher,
    command: &CommandLine,
    timeout: Duration,
) -> RunOutcome {
    let mut handle = launcher.launch(command);
    let deadline = tokio::time::Instant::now() + timeout;
    let mut combined_output = String::new();
    let mut stdout = String::new();

    let status = loop {
        match tokio::time::timeout_at(deadline, handle.next_event()).await {
            Ok(Some(RunEvent::Output(chunk))) => {
                if chunk.stream == StreamKind::Stdout {
                    stdout.push_str(&chunk.text);
                }
                combined_output.push_str(&chunk.text);
            }
            Ok(Some(RunEvent::Finished(code))) => break RunStatus::Exited(code),
            Ok(Some(RunEvent::LaunchFailed(reason))) => break RunStatus::LaunchFailed(reason),
            Ok(None) => break RunStatus::LaunchFailed(LaunchFailure::Unknown),
            Err(_) => {
                warn!("`{}` exceeded {:?}, cancelling", command, timeout);
                handle.cancel();
                // The launcher bounds this with its own grace and drain limits.
                while let Some(event) = handle.next_event().await {
                    if event.is_terminal() {
                        break;
                    }
                }
                break RunStatus::LaunchFailed(LaunchFailure::TimedOut);
            }
        }
    };

    RunOutcome {
        status,
        combined_output,
        stdout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::{err, out, ScriptedLauncher};

    #[tokio::test]
    async fn test_collects_stdout_separately() {
        let launcher = ScriptedLauncher::new();
        launcher.push(vec![out("b\n"), err("warning\n"), RunEvent::Finished(0)]);

        let cmd = CommandLine::new("obsidianctl", vec!["current-slot".into()]);
        let outcome = run_to_completion(&launcher, &cmd, Duration::from_secs(1)).await;

        assert!(outcome.success());
        assert_eq!(outcome.stdout, "b\n");
        assert_eq!(outcome.combined_output, "b\nwarning\n");
    }

    #[tokio::test]
    async fn test_launch_failure_has_no_exit_code() {
        let launcher = ScriptedLauncher::new();
        launcher.push(vec![RunEvent::LaunchFailed(LaunchFailure::NotFound)]);

        let cmd = CommandLine::new("pkexec", vec!["rm".into()]);
        let outcome = run_to_completion(&launcher, &cmd, Duration::from_secs(1)).await;

        assert_eq!(outcome.exit_code(), None);
        assert_eq!(outcome.status, RunStatus::LaunchFailed(LaunchFailure::NotFound));
    }

    #[tokio::test]
    async fn test_stream_without_terminal_event_is_unknown() {
        let launcher = ScriptedLauncher::new();
        launcher.push(vec![out("partial")]);

        let cmd = CommandLine::new("obsidianctl", vec![]);
        let outcome = run_to_completion(&launcher, &cmd, Duration::from_secs(1)).await;

        assert_eq!(outcome.status, RunStatus::LaunchFailed(LaunchFailure::Unknown));
        assert_eq!(outcome.combined_output, "partial");
    }
}
