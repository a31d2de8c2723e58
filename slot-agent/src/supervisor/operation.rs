//! Operation kinds and the argument lists each call site hands the tool.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    CreateBackup,
    RestoreBackup,
    DeleteBackup,
    SwitchSlot,
    SwitchOnce,
    SyncSlots,
    HealthCheck,
    SlotDiff,
    ApplyUpdateFromFile,
    ApplyUpdateFromNetwork,
    VerifyIntegrity,
    EnterEnvironment,
}

impl OperationKind {
    pub const ALL: [OperationKind; 12] = [
        Self::CreateBackup,
        Self::RestoreBackup,
        Self::DeleteBackup,
        Self::SwitchSlot,
        Self::SwitchOnce,
        Self::SyncSlots,
        Self::HealthCheck,
        Self::SlotDiff,
        Self::ApplyUpdateFromFile,
        Self::ApplyUpdateFromNetwork,
        Self::VerifyIntegrity,
        Self::EnterEnvironment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateBackup => "create-backup",
            Self::RestoreBackup => "restore-backup",
            Self::DeleteBackup => "delete-backup",
            Self::SwitchSlot => "switch-slot",
            Self::SwitchOnce => "switch-once",
            Self::SyncSlots => "sync-slots",
            Self::HealthCheck => "health-check",
            Self::SlotDiff => "slot-diff",
            Self::ApplyUpdateFromFile => "apply-update-from-file",
            Self::ApplyUpdateFromNetwork => "apply-update-from-network",
            Self::VerifyIntegrity => "verify-integrity",
            Self::EnterEnvironment => "enter-environment",
        }
    }

    /// Tool subcommand. `None` for deletion, which never goes through the tool.
    pub fn subcommand(self) -> Option<&'static str> {
        match self {
            Self::CreateBackup => Some("backup-slot"),
            Self::RestoreBackup => Some("rollback-slot"),
            Self::DeleteBackup => None,
            Self::SwitchSlot => Some("switch"),
            Self::SwitchOnce => Some("switch-once"),
            Self::SyncSlots => Some("sync"),
            Self::HealthCheck => Some("health-check"),
            Self::SlotDiff => Some("slot-diff"),
            Self::ApplyUpdateFromFile => Some("update"),
            Self::ApplyUpdateFromNetwork => Some("netupdate"),
            Self::VerifyIntegrity => Some("verify-integrity"),
            Self::EnterEnvironment => Some("enter-slot"),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mount and network switches for a sandboxed slot session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentOptions {
    pub enable_networking: bool,
    pub mount_essentials: bool,
    pub mount_home: bool,
    pub mount_root: bool,
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            enable_networking: false,
            mount_essentials: true,
            mount_home: false,
            mount_root: false,
        }
    }
}

/// A unit of external work, tagged with its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub arguments: Vec<String>,
    pub privileged: bool,
}

impl Operation {
    pub fn new(kind: OperationKind, arguments: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            arguments,
            privileged: true,
        }
    }

    pub fn unprivileged(mut self) -> Self {
        self.privileged = false;
        self
    }

    pub fn create_backup(slot: &str, custom_dir: Option<&Path>, full_backup: bool) -> Self {
        let mut args = vec![slot.to_string()];
        if let Some(dir) = custom_dir.filter(|d| !d.as_os_str().is_empty()) {
            args.push("--backup-dir".to_string());
            args.push(dir.to_string_lossy().into_owned());
        }
        if full_backup {
            args.push("--full-backup".to_string());
        }
        Self::new(OperationKind::CreateBackup, args)
    }

    pub fn restore_backup(target_slot: &str, backup: &Path) -> Self {
        Self::new(
            OperationKind::RestoreBackup,
            vec![target_slot.to_string(), backup.to_string_lossy().into_owned()],
        )
    }

    /// `rm -f <path>`, run directly through the privilege wrapper.
    pub fn delete_backup(backup: &Path) -> Self {
        Self::new(OperationKind::DeleteBackup, crate::catalog::delete_argv(backup))
    }

    pub fn switch_slot(slot: &str) -> Self {
        Self::new(OperationKind::SwitchSlot, vec![slot.to_string()])
    }

    pub fn switch_once(slot: &str) -> Self {
        Self::new(OperationKind::SwitchOnce, vec![slot.to_string()])
    }

    pub fn sync_slots(target_slot: &str) -> Self {
        Self::new(OperationKind::SyncSlots, vec![target_slot.to_string()])
    }

    pub fn health_check() -> Self {
        Self::new(OperationKind::HealthCheck, Vec::new())
    }

    pub fn slot_diff() -> Self {
        Self::new(OperationKind::SlotDiff, Vec::new())
    }

    pub fn update_from_file(slot: &str, image: &Path) -> Self {
        Self::new(
            OperationKind::ApplyUpdateFromFile,
            vec![slot.to_string(), image.to_string_lossy().into_owned()],
        )
    }

    pub fn network_update(slot: &str, break_system: bool) -> Self {
        let mut args = vec![slot.to_string()];
        if break_system {
            args.push("--break-system".to_string());
        }
        Self::new(OperationKind::ApplyUpdateFromNetwork, args)
    }

    pub fn verify_integrity(slot: &str) -> Self {
        Self::new(OperationKind::VerifyIntegrity, vec![slot.to_string()])
    }

    pub fn enter_environment(slot: &str, options: EnvironmentOptions) -> Self {
        let mut args = vec![slot.to_string()];
        let flags = [
            (options.enable_networking, "--enable-networking"),
            (options.mount_essentials, "--mount-essentials"),
            (options.mount_home, "--mount-home"),
            (options.mount_root, "--mount-root"),
        ];
        args.extend(
            flags
                .iter()
                .filter(|(on, _)| *on)
                .map(|(_, flag)| flag.to_string()),
        );
        Self::new(OperationKind::EnterEnvironment, args)
    }

    /// Message for an operation whose target path is empty. Only restore,
    /// delete and update-from-file carry a path.
    pub(crate) fn missing_target(&self) -> Option<&'static str> {
        let (path, message) = match self.kind {
            OperationKind::RestoreBackup => (self.arguments.get(1), "Invalid backup selection."),
            OperationKind::DeleteBackup => (self.arguments.last(), "Invalid backup selection."),
            OperationKind::ApplyUpdateFromFile => (
                self.arguments.get(1),
                "Please select a valid system image file.",
            ),
            _ => return None,
        };
        match path {
            Some(path) if !path.trim().is_empty() => None,
            _ => Some(message),
        }
    }

    /// Target of a delete operation.
    pub(crate) fn delete_target(&self) -> Option<&str> {
        match self.kind {
            OperationKind::DeleteBackup => self.arguments.last().map(String::as_str),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_backup_arguments() {
        let op = Operation::create_backup("a", Some(Path::new("/mnt/usb")), true);
        assert_eq!(op.kind, OperationKind::CreateBackup);
        assert_eq!(op.arguments, ["a", "--backup-dir", "/mnt/usb", "--full-backup"]);
        assert!(op.privileged);

        let plain = Operation::create_backup("b", Some(Path::new("")), false);
        assert_eq!(plain.arguments, ["b"]);
    }

    #[test]
    fn test_environment_flags_follow_options() {
        let op = Operation::enter_environment("b", EnvironmentOptions::default());
        assert_eq!(op.arguments, ["b", "--mount-essentials"]);

        let all = EnvironmentOptions {
            enable_networking: true,
            mount_essentials: true,
            mount_home: true,
            mount_root: true,
        };
        let op = Operation::enter_environment("a", all);
        assert_eq!(
            op.arguments,
            ["a", "--enable-networking", "--mount-essentials", "--mount-home", "--mount-root"]
        );
    }

    #[test]
    fn test_network_update_break_system() {
        assert_eq!(Operation::network_update("a", false).arguments, ["a"]);
        assert_eq!(
            Operation::network_update("a", true).arguments,
            ["a", "--break-system"]
        );
    }

    #[test]
    fn test_delete_target_only_for_delete() {
        let delete = Operation::delete_backup(Path::new("/b/slot_a/x.sfs"));
        assert_eq!(delete.delete_target(), Some("/b/slot_a/x.sfs"));
        assert_eq!(delete.kind.subcommand(), None);
        assert_eq!(Operation::switch_slot("a").delete_target(), None);
    }

    #[test]
    fn test_missing_target_detects_empty_paths() {
        assert_eq!(
            Operation::delete_backup(Path::new("")).missing_target(),
            Some("Invalid backup selection.")
        );
        assert_eq!(
            Operation::restore_backup("a", Path::new("")).missing_target(),
            Some("Invalid backup selection.")
        );
        assert_eq!(
            Operation::update_from_file("a", Path::new("")).missing_target(),
            Some("Please select a valid system image file.")
        );
        assert_eq!(Operation::delete_backup(Path::new("/b/x.sfs")).missing_target(), None);
        assert_eq!(Operation::health_check().missing_target(), None);
    }

    #[test]
    fn test_every_kind_has_distinct_name() {
        let mut names: Vec<_> = OperationKind::ALL.iter().map(|k| k.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), OperationKind::ALL.len());
    }

    #[test]
    fn test_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&OperationKind::ApplyUpdateFromNetwork).unwrap();
        assert_eq!(json, "\"apply-update-from-network\"");
    }
}
