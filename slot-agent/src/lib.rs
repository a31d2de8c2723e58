//! Slot Agent Library
//!
//! Runs privileged slot-management commands one at a time, streams their
//! output and progress, and keeps a catalog of on-disk slot backups.

pub mod catalog;
pub mod config;
pub mod daemon;
pub mod events;
pub mod observable;
pub mod process;
pub mod supervisor;
pub mod system;
pub mod utils;

// Re-export commonly used types
pub use catalog::{BackupCatalog, BackupRecord};
pub use config::Config;
pub use events::SupervisorEvent;
pub use process::{CommandRunner, Launcher};
pub use supervisor::{Operation, OperationKind, OperationSupervisor};
pub use utils::errors::AgentError;
pub type Result<T> = std::result::Result<T, AgentError>;
