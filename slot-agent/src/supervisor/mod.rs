//! Operation supervisor.
//!
//! Owns at most one running operation at a time. Requests made while busy
//! are dropped without side effects. Runner events are pulled one at a time
//! on `&mut self`, so two events of the same run are never handled
//! concurrently. Every terminal event returns the supervisor to idle.

pub mod operation;
pub mod policy;
pub mod progress;

pub use operation::{EnvironmentOptions, Operation, OperationKind};
pub use policy::{FinishPolicy, FollowUp};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::{BackupCatalog, BackupRecord};
use crate::config::{Config, TimeoutConfig};
use crate::events::{Notifier, SupervisorEvent};
use crate::observable::Observable;
use crate::process::{
    CommandLine, CommandRunner, LaunchFailure, Launcher, RunEvent, RunHandle, ToolInvocation,
};
use crate::system::{self, SystemStatus};
use crate::utils::errors::{AgentError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Running(OperationKind),
}

struct ActiveOperation {
    operation: Operation,
    handle: RunHandle,
}

pub struct OperationSupervisor {
    launcher: Arc<dyn Launcher>,
    tool: ToolInvocation,
    timeouts: TimeoutConfig,
    release_file: PathBuf,
    catalog: BackupCatalog,
    active: Option<ActiveOperation>,
    busy: Observable<bool>,
    output: Observable<String>,
    current_slot: Observable<Option<String>>,
    notifier: Notifier,
}

impl OperationSupervisor {
    pub fn new(config: &Config, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            launcher,
            tool: ToolInvocation::from_config(&config.tool),
            timeouts: config.timeouts.clone(),
            release_file: config.tool.release_file.clone(),
            catalog: BackupCatalog::new(config.catalog.clone()),
            active: None,
            busy: Observable::new(false),
            output: Observable::default(),
            current_slot: Observable::new(None),
            notifier: Notifier::new(),
        }
    }

    /// Supervisor backed by real processes.
    pub fn with_command_runner(config: &Config) -> Self {
        let runner = CommandRunner::new(config.timeouts.cancel_grace());
        Self::new(config, Arc::new(runner))
    }

    pub fn state(&self) -> SupervisorState {
        match &self.active {
            Some(active) => SupervisorState::Running(active.operation.kind),
            None => SupervisorState::Idle,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn busy(&self) -> &Observable<bool> {
        &self.busy
    }

    pub fn output(&self) -> &Observable<String> {
        &self.output
    }

    pub fn current_slot(&self) -> &Observable<Option<String>> {
        &self.current_slot
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.notifier.subscribe()
    }

    pub fn tool(&self) -> &ToolInvocation {
        &self.tool
    }

    /// Snapshot of the catalog, newest first.
    pub fn backups(&self) -> Vec<BackupRecord> {
        self.catalog.records().to_vec()
    }

    pub fn backup(&self, index: usize) -> Option<BackupRecord> {
        self.catalog.get(index).cloned()
    }

    pub fn clear_output(&self) {
        self.output.set(String::new());
    }

    /// Start `operation` unless another one is running.
    ///
    /// Returns false, with nothing spawned and no state touched, when busy.
    /// An operation whose target path is empty is also refused; that one is
    /// reported as a failure.
    pub fn request_operation(&mut self, operation: Operation) -> bool {
        if let Some(active) = &self.active {
            warn!(
                "Ignoring {} request: {} ({}) is still running",
                operation.kind, active.operation.kind, active.operation.id
            );
            return false;
        }
        if let Some(message) = operation.missing_target() {
            warn!("Refusing {} ({}): empty target path", operation.kind, operation.id);
            self.fail_input(message);
            return false;
        }

        let command = self.command_for(&operation);
        info!(
            "Starting {} ({}): {}",
            operation.kind, operation.id, command
        );

        self.busy.set(true);
        self.output.set(String::new());
        self.notifier.publish(SupervisorEvent::OperationStarted {
            kind: operation.kind,
        });

        let handle = self.launcher.launch(&command);
        self.active = Some(ActiveOperation { operation, handle });
        true
    }

    fn command_for(&self, operation: &Operation) -> CommandLine {
        match operation.kind.subcommand() {
            Some(subcommand) => {
                self.tool
                    .command(subcommand, &operation.arguments, operation.privileged)
            }
            None => self.tool.direct(&operation.arguments, operation.privileged),
        }
    }

    /// Restore the catalog entry at `index` onto `target_slot`.
    pub fn restore_backup(&mut self, index: usize, target_slot: &str) -> Result<bool> {
        let path = self.selected_path(index)?;
        Ok(self.request_operation(Operation::restore_backup(target_slot, &path)))
    }

    /// Delete the catalog entry at `index`. The entry leaves the catalog only
    /// if the deletion exits 0.
    pub fn delete_backup(&mut self, index: usize) -> Result<bool> {
        let path = self.selected_path(index)?;
        Ok(self.request_operation(Operation::delete_backup(&path)))
    }

    /// Apply an update image; the image must be an existing regular file.
    pub fn update_from_file(&mut self, slot: &str, image: &Path) -> Result<bool> {
        if image.as_os_str().is_empty() || !image.is_file() {
            self.fail_input("Please select a valid system image file.");
            return Err(AgentError::InvalidInput(format!(
                "not a file: {}",
                image.display()
            )));
        }
        Ok(self.request_operation(Operation::update_from_file(slot, image)))
    }

    fn selected_path(&self, index: usize) -> Result<PathBuf> {
        match self.catalog.get(index) {
            Some(record) if !record.path.as_os_str().is_empty() => Ok(record.path.clone()),
            _ => {
                self.fail_input("Invalid backup selection.");
                Err(AgentError::InvalidSelection(index))
            }
        }
    }

    fn fail_input(&self, message: &str) {
        self.notifier.publish(SupervisorEvent::OperationFailed {
            title: policy::ERROR_TITLE.to_string(),
            message: message.to_string(),
        });
    }

    /// Ask the running process to terminate. Its terminal event still
    /// arrives through [`Self::process_next`].
    pub fn cancel(&self) {
        if let Some(active) = &self.active {
            info!("Cancelling {} ({})", active.operation.kind, active.operation.id);
            active.handle.cancel();
        }
    }

    /// Handle the next event of the running operation. Returns false when
    /// idle.
    pub async fn process_next(&mut self) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };

        let event = match active.handle.next_event().await {
            Some(event) => event,
            None => {
                error!("Runner for {} closed without a terminal event", active.operation.id);
                RunEvent::LaunchFailed(LaunchFailure::Unknown)
            }
        };

        self.handle_event(event).await;
        true
    }

    /// Process events until the running operation (if any) has finished.
    pub async fn wait_idle(&mut self) {
        while self.process_next().await {}
    }

    /// Start `operation` and drive it to completion. Returns false if it was
    /// rejected because another operation is running.
    pub async fn run(&mut self, operation: Operation) -> bool {
        if !self.request_operation(operation) {
            return false;
        }
        self.wait_idle().await;
        true
    }

    async fn handle_event(&mut self, event: RunEvent) {
        match event {
            RunEvent::Output(chunk) => self.on_output(&chunk.text),
            RunEvent::Finished(code) => {
                if let Some(operation) = self.release() {
                    self.on_finished(operation, code).await;
                }
            }
            RunEvent::LaunchFailed(reason) => {
                if let Some(operation) = self.release() {
                    self.on_launch_failed(operation, reason);
                }
            }
        }
    }

    fn on_output(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.append_output(text);

        let tracks_progress = self
            .active
            .as_ref()
            .is_some_and(|active| active.operation.kind.policy().tracks_progress);
        if tracks_progress {
            if let Some(percent) = progress::last_percent(text) {
                debug!("Progress {}%", percent);
                self.notifier.publish(SupervisorEvent::Progress { percent });
            }
        }
    }

    fn append_output(&self, text: &str) {
        self.output.modify(|buffer| {
            buffer.push_str(text);
            true
        });
        self.notifier.publish(SupervisorEvent::Output {
            text: text.to_string(),
        });
    }

    /// Drop the runner and go back to idle.
    fn release(&mut self) -> Option<Operation> {
        let active = self.active.take()?;
        self.busy.set(false);
        Some(active.operation)
    }

    async fn on_finished(&mut self, operation: Operation, exit_code: i32) {
        info!("{} ({}) exited with code {}", operation.kind, operation.id, exit_code);

        if operation.kind == OperationKind::DeleteBackup {
            self.finish_delete(&operation, exit_code);
            return;
        }

        if exit_code != 0 {
            let message = policy::failure_message(&self.output.get(), exit_code);
            self.publish_failure(message);
            return;
        }

        let finish = operation.kind.policy();
        if let Some(note) = finish.output_note {
            self.append_output(note);
        }
        if let Some(message) = finish.success_message {
            self.publish_success(policy::SUCCESS_TITLE, message);
        }
        match finish.follow_up {
            FollowUp::None => {}
            FollowUp::RefreshCatalog => {
                self.refresh_catalog();
            }
            FollowUp::RefreshCurrentSlot => {
                self.refresh_current_slot().await;
            }
        }
    }

    fn finish_delete(&mut self, operation: &Operation, exit_code: i32) {
        if exit_code != 0 {
            let message = policy::delete_failure_message(&self.output.get(), exit_code);
            self.publish_failure(message);
            return;
        }

        if let Some(target) = operation.delete_target() {
            if self.catalog.remove_path(Path::new(target)).is_none() {
                warn!("Deleted {} but it was no longer in the catalog", target);
            }
        }
        if let Some(message) = operation.kind.policy().success_message {
            self.publish_success(policy::SUCCESS_TITLE, message);
        }
    }

    fn on_launch_failed(&mut self, operation: Operation, reason: LaunchFailure) {
        error!("{} ({}) failed to run: {}", operation.kind, operation.id, reason);
        self.publish_failure(policy::launch_failure_message(reason).to_string());
    }

    fn publish_success(&self, title: &str, message: &str) {
        self.notifier.publish(SupervisorEvent::OperationSucceeded {
            title: title.to_string(),
            message: message.to_string(),
        });
    }

    fn publish_failure(&self, message: String) {
        self.notifier.publish(SupervisorEvent::OperationFailed {
            title: policy::ERROR_TITLE.to_string(),
            message,
        });
    }

    /// Rebuild the catalog from disk.
    pub fn refresh_catalog(&mut self) -> usize {
        let backups = self.catalog.scan();
        self.notifier
            .publish(SupervisorEvent::CatalogRefreshed { backups });
        backups
    }

    /// Re-read the booted slot. Subscribers hear about it only on change.
    pub async fn refresh_current_slot(&mut self) -> Option<String> {
        if let Some(slot) =
            system::current_slot(self.launcher.as_ref(), &self.tool, &self.timeouts).await
        {
            self.current_slot.set(Some(slot));
        }
        self.current_slot.get()
    }

    /// Full status probe; also updates the current-slot observable.
    pub async fn refresh_status(&mut self) -> SystemStatus {
        let status = system::probe_status(
            self.launcher.as_ref(),
            &self.tool,
            &self.release_file,
            &self.timeouts,
        )
        .await;
        if let Some(slot) = &status.current_slot {
            self.current_slot.set(Some(slot.clone()));
        }
        status
    }

    pub async fn tool_available(&self) -> bool {
        system::tool_available(self.launcher.as_ref(), &self.tool, &self.timeouts).await
    }

    /// Delete every backup older than `days`, one bounded deletion at a time.
    /// No new deletion starts after `stop` fires.
    pub async fn prune_older_than(&mut self, days: u32, stop: &CancellationToken) -> Result<usize> {
        if let Some(active) = &self.active {
            return Err(AgentError::Busy(active.operation.kind.to_string()));
        }

        let removed = self
            .catalog
            .prune_older_than(
                days,
                self.launcher.as_ref(),
                &self.tool,
                self.timeouts.prune(),
                stop,
            )
            .await;

        info!("Pruned {} backup(s) older than {} day(s)", removed, days);
        self.publish_success(
            "Cleanup Complete",
            &format!("Deleted {} old backups.", removed),
        );
        Ok(removed)
    }
}

impl Drop for OperationSupervisor {
    fn drop(&mut self) {
        // No privileged child may outlive its supervisor.
        self.cancel();
    }
}
