//! Slot Agent - Main entry point
//!
//! Command-line front end over the operation supervisor.

use anyhow::{bail, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use slot_agent::{
    config::Config,
    daemon::ShutdownCoordinator,
    supervisor::{EnvironmentOptions, Operation},
    utils, OperationSupervisor, SupervisorEvent,
};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the booted slot and system version
    Status,
    /// Manage slot backups
    #[command(subcommand)]
    Backups(BackupCommand),
    /// Switch, synchronize and inspect slots
    #[command(subcommand)]
    Slot(SlotCommand),
    /// Apply a system update
    #[command(subcommand)]
    Update(UpdateCommand),
    /// Verify or enter a slot environment
    #[command(subcommand)]
    Env(EnvCommand),
}

#[derive(Subcommand, Debug)]
enum BackupCommand {
    /// List backups, newest first
    List,
    /// Back up a slot
    Create {
        slot: String,
        /// Write the backup here instead of the default directory
        #[arg(long)]
        backup_dir: Option<PathBuf>,
        #[arg(long)]
        full: bool,
    },
    /// Restore the backup at INDEX (from `backups list`) onto a slot
    Restore { index: usize, target_slot: String },
    /// Delete the backup at INDEX
    Delete { index: usize },
    /// Delete every backup older than DAYS
    Prune {
        #[arg(default_value_t = 30)]
        days: u32,
    },
}

#[derive(Subcommand, Debug)]
enum SlotCommand {
    /// Make SLOT the default boot slot
    Switch { slot: String },
    /// Boot SLOT on the next boot only
    SwitchOnce { slot: String },
    /// Synchronize the running slot onto TARGET_SLOT
    Sync { target_slot: String },
    /// Compare both slots
    Diff,
    /// Run the slot health check
    Health,
    /// Print the booted slot
    Current,
}

#[derive(Subcommand, Debug)]
enum UpdateCommand {
    /// Apply a system image file to SLOT
    File { slot: String, image: PathBuf },
    /// Update SLOT from the network
    Network {
        slot: String,
        #[arg(long)]
        break_system: bool,
    },
}

#[derive(Subcommand, Debug)]
enum EnvCommand {
    /// Verify the integrity of SLOT
    Verify { slot: String },
    /// Enter SLOT in a sandboxed session
    Enter {
        slot: String,
        #[command(flatten)]
        options: EnterOptions,
    },
}

#[derive(ClapArgs, Debug)]
struct EnterOptions {
    #[arg(long)]
    enable_networking: bool,
    /// Do not mount /proc, /sys and /dev
    #[arg(long)]
    no_mount_essentials: bool,
    #[arg(long)]
    mount_home: bool,
    #[arg(long)]
    mount_root: bool,
}

impl From<EnterOptions> for EnvironmentOptions {
    fn from(options: EnterOptions) -> Self {
        Self {
            enable_networking: options.enable_networking,
            mount_essentials: !options.no_mount_essentials,
            mount_home: options.mount_home,
            mount_root: options.mount_root,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration
    let config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!("Starting slot-agent v{}", env!("CARGO_PKG_VERSION"));

    let mut supervisor = OperationSupervisor::with_command_runner(&config);
    let printer = tokio::spawn(print_events(supervisor.subscribe()));

    let shutdown = ShutdownCoordinator::new();
    let result = execute(args.command, &mut supervisor, &shutdown).await;

    // Closing the event channel ends the printer.
    drop(supervisor);
    let failed = printer.await.unwrap_or(true);

    result?;
    if failed || shutdown.is_triggered() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn execute(
    command: Command,
    supervisor: &mut OperationSupervisor,
    shutdown: &ShutdownCoordinator,
) -> Result<()> {
    let operation = match command {
        Command::Status => {
            if !supervisor.tool_available().await {
                bail!("`{}` is not installed", supervisor.tool().program());
            }
            let status = supervisor.refresh_status().await;
            println!(
                "Current slot: {}",
                status.current_slot.as_deref().unwrap_or("unknown")
            );
            println!("Version: {}", status.version.as_deref().unwrap_or("unknown"));
            return Ok(());
        }
        Command::Backups(BackupCommand::List) => {
            supervisor.refresh_catalog();
            print_backups(supervisor);
            return Ok(());
        }
        Command::Backups(BackupCommand::Create {
            slot,
            backup_dir,
            full,
        }) => Operation::create_backup(&slot, backup_dir.as_deref(), full),
        Command::Backups(BackupCommand::Restore { index, target_slot }) => {
            supervisor.refresh_catalog();
            supervisor.restore_backup(index, &target_slot)?;
            drive(supervisor, shutdown).await;
            return Ok(());
        }
        Command::Backups(BackupCommand::Delete { index }) => {
            supervisor.refresh_catalog();
            supervisor.delete_backup(index)?;
            drive(supervisor, shutdown).await;
            return Ok(());
        }
        Command::Backups(BackupCommand::Prune { days }) => {
            supervisor.refresh_catalog();
            let listener = shutdown.listen();
            let pruned = supervisor
                .prune_older_than(days, shutdown.cancellation())
                .await;
            listener.abort();
            pruned?;
            return Ok(());
        }
        Command::Slot(SlotCommand::Current) => {
            match supervisor.refresh_current_slot().await {
                Some(slot) => println!("{}", slot),
                None => bail!("Cannot determine the current slot"),
            }
            return Ok(());
        }
        Command::Slot(SlotCommand::Switch { slot }) => Operation::switch_slot(&slot),
        Command::Slot(SlotCommand::SwitchOnce { slot }) => Operation::switch_once(&slot),
        Command::Slot(SlotCommand::Sync { target_slot }) => Operation::sync_slots(&target_slot),
        Command::Slot(SlotCommand::Diff) => Operation::slot_diff(),
        Command::Slot(SlotCommand::Health) => Operation::health_check(),
        Command::Update(UpdateCommand::File { slot, image }) => {
            supervisor.update_from_file(&slot, &image)?;
            drive(supervisor, shutdown).await;
            return Ok(());
        }
        Command::Update(UpdateCommand::Network { slot, break_system }) => {
            Operation::network_update(&slot, break_system)
        }
        Command::Env(EnvCommand::Verify { slot }) => Operation::verify_integrity(&slot),
        Command::Env(EnvCommand::Enter { slot, options }) => {
            Operation::enter_environment(&slot, options.into())
        }
    };

    if !supervisor.request_operation(operation) {
        bail!("Another operation is already running");
    }
    drive(supervisor, shutdown).await;
    Ok(())
}

/// Run the active operation to its end, cancelling it on SIGINT/SIGTERM.
async fn drive(supervisor: &mut OperationSupervisor, shutdown: &ShutdownCoordinator) {
    let listener = shutdown.listen();
    shutdown.drive(supervisor).await;
    listener.abort();
}

fn print_backups(supervisor: &OperationSupervisor) {
    let backups = supervisor.backups();
    if backups.is_empty() {
        println!("No backups found.");
        return;
    }
    for (index, backup) in backups.iter().enumerate() {
        println!(
            "{:>3}  slot {:<4} {}  {:>9}  {}{}",
            index,
            backup.slot,
            backup.timestamp_label(),
            backup.size_label(),
            backup.path.display(),
            if backup.is_full_backup { "  (full)" } else { "" }
        );
    }
}

/// Stream events to the terminal. Returns true if any operation failed.
async fn print_events(mut rx: broadcast::Receiver<SupervisorEvent>) -> bool {
    let mut failed = false;
    loop {
        match rx.recv().await {
            Ok(SupervisorEvent::Output { text }) => {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            Ok(SupervisorEvent::Progress { percent }) => {
                tracing::debug!("Progress: {}%", percent);
            }
            Ok(SupervisorEvent::OperationSucceeded { title, message }) => {
                println!("\n{}: {}", title, message);
            }
            Ok(SupervisorEvent::OperationFailed { title, message }) => {
                eprintln!("\n{}: {}", title, message);
                failed = true;
            }
            Ok(SupervisorEvent::OperationStarted { kind }) => {
                tracing::info!("Running {}", kind);
            }
            Ok(SupervisorEvent::CatalogRefreshed { backups }) => {
                tracing::debug!("Catalog holds {} backup(s)", backups);
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Dropped {} event(s)", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    failed
}
