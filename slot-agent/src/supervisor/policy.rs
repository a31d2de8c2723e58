//! Finish policies: how each operation kind reports its outcome.

use super::operation::OperationKind;
use crate::process::LaunchFailure;

pub const SUCCESS_TITLE: &str = "Success";
pub const ERROR_TITLE: &str = "Error";

/// Work to do after a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    None,
    RefreshCatalog,
    RefreshCurrentSlot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishPolicy {
    /// Message for the success notification, if any
    pub success_message: Option<&'static str>,
    /// Text appended to the output buffer on success
    pub output_note: Option<&'static str>,
    /// Scan output chunks for `<n>%`
    pub tracks_progress: bool,
    pub follow_up: FollowUp,
}

const QUIET: FinishPolicy = FinishPolicy {
    success_message: None,
    output_note: None,
    tracks_progress: false,
    follow_up: FollowUp::None,
};

impl OperationKind {
    pub fn policy(self) -> FinishPolicy {
        match self {
            Self::CreateBackup => FinishPolicy {
                success_message: Some("Backup created successfully!"),
                follow_up: FollowUp::RefreshCatalog,
                ..QUIET
            },
            Self::RestoreBackup => FinishPolicy {
                success_message: Some("Backup restored successfully!"),
                ..QUIET
            },
            Self::DeleteBackup => FinishPolicy {
                success_message: Some("Backup deleted successfully!"),
                ..QUIET
            },
            Self::SwitchSlot => FinishPolicy {
                success_message: Some("Slot switch scheduled. Please reboot to apply."),
                follow_up: FollowUp::RefreshCurrentSlot,
                ..QUIET
            },
            Self::SwitchOnce => FinishPolicy {
                success_message: Some("One-time slot switch scheduled for next boot."),
                ..QUIET
            },
            Self::SyncSlots => FinishPolicy {
                success_message: Some("Slot synchronization completed successfully!"),
                ..QUIET
            },
            Self::HealthCheck => FinishPolicy {
                output_note: Some("\n\nHealth check completed successfully."),
                ..QUIET
            },
            Self::SlotDiff => FinishPolicy {
                output_note: Some("\n\nSlot comparison completed."),
                ..QUIET
            },
            Self::ApplyUpdateFromFile => FinishPolicy {
                success_message: Some("System update completed successfully!"),
                tracks_progress: true,
                ..QUIET
            },
            Self::ApplyUpdateFromNetwork => FinishPolicy {
                success_message: Some("Network update completed successfully!"),
                tracks_progress: true,
                ..QUIET
            },
            Self::VerifyIntegrity => FinishPolicy {
                success_message: Some("Slot integrity verified successfully."),
                output_note: Some("\n\nIntegrity verification completed successfully."),
                ..QUIET
            },
            Self::EnterEnvironment => QUIET,
        }
    }
}

pub fn launch_failure_message(reason: LaunchFailure) -> &'static str {
    match reason {
        LaunchFailure::NotFound => "tool or privilege helper missing",
        LaunchFailure::Crashed => "process crashed",
        LaunchFailure::TimedOut => "process timed out",
        LaunchFailure::Unknown => "unknown process error",
    }
}

/// The process's own output when it said anything, else a generic message.
pub fn failure_message(output: &str, exit_code: i32) -> String {
    fallback_unless_empty(output, || {
        format!("Operation failed with exit code {}", exit_code)
    })
}

pub fn delete_failure_message(output: &str, exit_code: i32) -> String {
    fallback_unless_empty(output, || {
        format!("Failed to delete backup with exit code {}", exit_code)
    })
}

fn fallback_unless_empty(output: &str, fallback: impl FnOnce() -> String) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_updates_track_progress() {
        for kind in OperationKind::ALL {
            let expected = matches!(
                kind,
                OperationKind::ApplyUpdateFromFile | OperationKind::ApplyUpdateFromNetwork
            );
            assert_eq!(kind.policy().tracks_progress, expected, "{}", kind);
        }
    }

    #[test]
    fn test_follow_ups() {
        assert_eq!(OperationKind::CreateBackup.policy().follow_up, FollowUp::RefreshCatalog);
        assert_eq!(OperationKind::SwitchSlot.policy().follow_up, FollowUp::RefreshCurrentSlot);
        assert_eq!(OperationKind::SwitchOnce.policy().follow_up, FollowUp::None);
    }

    #[test]
    fn test_failure_messages() {
        assert_eq!(failure_message("  boom\n", 2), "boom");
        assert_eq!(failure_message(" \n", 2), "Operation failed with exit code 2");
        assert_eq!(delete_failure_message("", 1), "Failed to delete backup with exit code 1");
    }

    #[test]
    fn test_launch_failure_messages() {
        assert_eq!(launch_failure_message(LaunchFailure::NotFound), "tool or privilege helper missing");
        assert_eq!(launch_failure_message(LaunchFailure::Unknown), "unknown process error");
    }
}
