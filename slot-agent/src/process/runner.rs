//! Tokio-backed process launcher.
//!
//! Each launch spawns one supervising task plus one reader task per output
//! stream. Both readers feed the same channel, so callers see a single
//! ordered sequence of chunks. The terminal event is sent only after the
//! readers have drained their pipes.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{
    run_channel, CommandLine, EventSink, LaunchFailure, Launcher, OutputChunk, RunEvent,
    RunHandle, StreamKind,
};

const READ_CHUNK: usize = 8 * 1024;

/// Upper bound on draining pipes after the child exits. A grandchild that
/// inherited the pipes can otherwise keep them open forever.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct CommandRunner {
    cancel_grace: Duration,
}

impl CommandRunner {
    /// `cancel_grace` is the wait between SIGTERM and SIGKILL.
    pub fn new(cancel_grace: Duration) -> Self {
        Self { cancel_grace }
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl Launcher for CommandRunner {
    fn launch(&self, command: &CommandLine) -> RunHandle {
        let (sink, handle) = run_channel();

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match cmd.spawn() {
            Ok(child) => {
                info!("Started `{}` (pid {:?})", command, child.id());
                tokio::spawn(supervise(child, sink, self.cancel_grace));
            }
            Err(e) => {
                error!("Failed to start `{}`: {}", command, e);
                sink.send(RunEvent::LaunchFailed(LaunchFailure::from_spawn_error(&e)));
            }
        }

        handle
    }
}

async fn supervise(mut child: Child, sink: EventSink, grace: Duration) {
    let readers: Vec<JoinHandle<()>> = [
        child
            .stdout
            .take()
            .map(|out| tokio::spawn(pump(out, StreamKind::Stdout, sink.clone()))),
        child
            .stderr
            .take()
            .map(|err| tokio::spawn(pump(err, StreamKind::Stderr, sink.clone()))),
    ]
    .into_iter()
    .flatten()
    .collect();

    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = sink.cancellation().cancelled() => None,
    };

    let status = match exited {
        Some(status) => status,
        None => terminate(&mut child, grace).await,
    };

    for mut reader in readers {
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut reader).await.is_err() {
            warn!("Output pipe still open {:?} after exit, abandoning it", DRAIN_TIMEOUT);
            reader.abort();
        }
    }

    sink.send(terminal_event(status));
}

fn terminal_event(status: std::io::Result<ExitStatus>) -> RunEvent {
    match status {
        Ok(status) => match status.code() {
            Some(code) => {
                debug!("Process exited with code {}", code);
                RunEvent::Finished(code)
            }
            None => {
                warn!("Process terminated by signal: {}", status);
                RunEvent::LaunchFailed(LaunchFailure::Crashed)
            }
        },
        Err(e) => {
            error!("Failed to wait for process: {}", e);
            RunEvent::LaunchFailed(LaunchFailure::Unknown)
        }
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL.
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Some(pid) = child.id() {
        info!("Sending SIGTERM to pid {}", pid);
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!("Failed to signal pid {}: {}", pid, e);
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("Process ignored SIGTERM for {:?}, killing", grace);
            child.kill().await?;
            child.wait().await
        }
    }
}

async fn pump<R>(mut reader: R, stream: StreamKind, sink: EventSink)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut pending = Vec::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let text = take_utf8(&mut pending, false);
                if !text.is_empty() && !sink.send(RunEvent::Output(OutputChunk { stream, text })) {
                    return;
                }
            }
            Err(e) => {
                debug!("Read from {:?} failed: {}", stream, e);
                break;
            }
        }
    }

    let text = take_utf8(&mut pending, true);
    if !text.is_empty() {
        sink.send(RunEvent::Output(OutputChunk { stream, text }));
    }
}

/// Decode the complete UTF-8 prefix of `pending`, leaving an unfinished
/// trailing sequence in place for the next read. Invalid bytes become
/// U+FFFD; at `eof` so does an unfinished tail.
fn take_utf8(pending: &mut Vec<u8>, eof: bool) -> String {
    let mut text = String::new();
    let mut rest: &[u8] = pending;

    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                text.push_str(valid);
                rest = &[];
                break;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                text.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[len..];
                    }
                    None if eof => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        rest = &[];
                        break;
                    }
                    None => {
                        rest = after;
                        break;
                    }
                }
            }
        }
    }

    let remainder = rest.to_vec();
    *pending = remainder;
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::run_to_completion;
    use crate::process::RunStatus;
    use std::time::Instant;

    fn sh(script: &str) -> CommandLine {
        CommandLine::new("/bin/sh", vec!["-c".to_string(), script.to_string()])
    }

    async fn collect(handle: &mut RunHandle) -> (String, RunEvent) {
        let mut output = String::new();
        while let Some(event) = handle.next_event().await {
            match event {
                RunEvent::Output(chunk) => output.push_str(&chunk.text),
                terminal => return (output, terminal),
            }
        }
        panic!("stream ended without a terminal event");
    }

    #[tokio::test]
    async fn test_merges_both_streams_before_exit() {
        let runner = CommandRunner::default();
        let mut handle = runner.launch(&sh("echo out; echo err 1>&2; exit 4"));
        let (output, terminal) = collect(&mut handle).await;

        assert!(output.contains("out\n"));
        assert!(output.contains("err\n"));
        assert_eq!(terminal, RunEvent::Finished(4));
        assert_eq!(handle.next_event().await, None);
    }

    #[tokio::test]
    async fn test_trailing_output_is_flushed() {
        let runner = CommandRunner::default();
        let mut handle = runner.launch(&sh("printf 'no newline at end'"));
        let (output, terminal) = collect(&mut handle).await;

        assert_eq!(output, "no newline at end");
        assert_eq!(terminal, RunEvent::Finished(0));
    }

    #[tokio::test]
    async fn test_missing_program_is_not_found() {
        let runner = CommandRunner::default();
        let mut handle = runner.launch(&CommandLine::new(
            "/nonexistent/slot-tool-for-tests",
            vec![],
        ));
        assert_eq!(
            handle.next_event().await,
            Some(RunEvent::LaunchFailed(LaunchFailure::NotFound))
        );
    }

    #[test]
    fn test_take_utf8_keeps_split_sequence() {
        let mut pending = b"caf\xc3".to_vec();
        assert_eq!(take_utf8(&mut pending, false), "caf");
        assert_eq!(pending, b"\xc3");

        pending.extend_from_slice(b"\xa9!");
        assert_eq!(take_utf8(&mut pending, false), "\u{e9}!");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_take_utf8_replaces_invalid_bytes() {
        let mut pending = b"a\xffb".to_vec();
        assert_eq!(take_utf8(&mut pending, false), "a\u{fffd}b");

        let mut tail = b"x\xe2\x82".to_vec();
        assert_eq!(take_utf8(&mut tail, false), "x");
        assert_eq!(take_utf8(&mut tail, true), "\u{fffd}");
        assert!(tail.is_empty());
    }

    #[tokio::test]
    async fn test_multibyte_char_across_read_boundary() {
        let runner = CommandRunner::default();
        let script = format!(
            "head -c {} /dev/zero | tr '\\0' a; printf '\\303\\251'",
            READ_CHUNK - 1
        );
        let outcome = run_to_completion(&runner, &sh(&script), Duration::from_secs(5)).await;

        assert!(outcome.success());
        assert!(!outcome.stdout.contains(char::REPLACEMENT_CHARACTER));
        assert_eq!(outcome.stdout.len(), READ_CHUNK + 1);
        assert!(outcome.stdout.ends_with('\u{e9}'));
    }

    #[tokio::test]
    async fn test_signal_death_is_crash() {
        let runner = CommandRunner::default();
        let mut handle = runner.launch(&sh("kill -KILL $$"));
        let (_, terminal) = collect(&mut handle).await;
        assert_eq!(terminal, RunEvent::LaunchFailed(LaunchFailure::Crashed));
    }

    #[tokio::test]
    async fn test_cancel_escalates_to_kill() {
        let runner = CommandRunner::new(Duration::from_millis(200));
        // Ignores SIGTERM so only SIGKILL ends it.
        let mut handle = runner.launch(&sh("trap '' TERM; while true; do sleep 0.05; done"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = Instant::now();
        handle.cancel();
        let (_, terminal) = collect(&mut handle).await;

        assert_eq!(terminal, RunEvent::LaunchFailed(LaunchFailure::Crashed));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_tool_runs_through_wrapper() -> std::io::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let tool_path = dir.path().join("slotctl");
        std::fs::write(&tool_path, "echo \"tool:$*\"\nexit 3\n")?;

        // `/bin/sh` stands in for the wrapper and reads the tool as a script.
        let tool = crate::process::ToolInvocation::new(
            tool_path.to_string_lossy(),
            Some("/bin/sh".to_string()),
        );
        let cmd = tool.command("switch", &["b".to_string()], true);
        let outcome = run_to_completion(&CommandRunner::default(), &cmd, Duration::from_secs(5)).await;

        assert_eq!(outcome.status, RunStatus::Exited(3));
        assert_eq!(outcome.stdout, "tool:switch b\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_timed_out_run_is_dead_on_return() -> std::io::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let ticks = dir.path().join("ticks");
        let script = format!(
            "trap '' TERM; while true; do echo tick >> '{}'; sleep 0.05; done",
            ticks.display()
        );

        let runner = CommandRunner::new(Duration::from_millis(300));
        let outcome = run_to_completion(&runner, &sh(&script), Duration::from_millis(200)).await;
        assert_eq!(outcome.status, RunStatus::LaunchFailed(LaunchFailure::TimedOut));

        let at_return = std::fs::metadata(&ticks)?.len();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(std::fs::metadata(&ticks)?.len(), at_return);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_to_completion_times_out() {
        let runner = CommandRunner::new(Duration::from_millis(100));
        let outcome = run_to_completion(&runner, &sh("sleep 5"), Duration::from_millis(200)).await;
        assert_eq!(outcome.status, RunStatus::LaunchFailed(LaunchFailure::TimedOut));
        assert!(!outcome.success());
    }
}
