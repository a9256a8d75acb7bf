//! Error catalog for the cluster verification tests.
//!
//! Every failure a check can report maps to a stable `CVT-Exxx` code with a
//! category and remediation steps, so operators reading a failed run get the
//! same vocabulary regardless of which node produced it.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                                   |
//! |------------|-------------|-----------------------------------------------|
//! | E001-E099  | Environment | Node setup: mounts, binaries, users, platform |
//! | E100-E199  | NotReady    | Bounded waits that ran out of time            |
//! | E200-E299  | Terminal    | Explicit failures reported by the scheduler   |
//! | E300-E399  | Config      | Configuration file and environment values     |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering every check failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Environment (E001-E099)
    // =========================================================================
    /// A required shared filesystem is not mounted
    EnvMountMissing,
    /// A scheduler binary could not be started
    EnvSchedulerBinaryMissing,
    /// The scheduler refused or dropped the connection
    EnvSchedulerUnreachable,
    /// The cluster user does not exist on this node
    EnvUserLookupFailed,
    /// Operation is not available on this platform
    EnvUnsupportedPlatform,
    /// Local I/O failed (file read, directory creation, chown)
    EnvIo,

    // =========================================================================
    // NotReady (E100-E199)
    // =========================================================================
    /// Scheduler daemons did not become ready in time
    NotReadyScheduler,
    /// This execute node never appeared in the scheduler status
    NotReadyNodeRegistration,
    /// Jobs did not reach a terminal state before the deadline
    NotReadyJobsTimedOut,

    // =========================================================================
    // Terminal (E200-E299)
    // =========================================================================
    /// One or more jobs terminated with an error
    TerminalJobsFailed,
    /// Job submission output could not be parsed
    TerminalSubmitParseFailed,
    /// A command exited non-zero
    TerminalCommandFailed,
    /// A check assertion did not hold
    TerminalAssertionFailed,

    // =========================================================================
    // Config (E300-E399)
    // =========================================================================
    /// Configuration file could not be read
    ConfigReadError,
    /// Configuration file contains invalid TOML
    ConfigParseError,
    /// Environment variable has an invalid value
    ConfigEnvError,
    /// Configuration contains invalid values
    ConfigValidationError,
}

impl ErrorCode {
    /// Returns the numeric error code (without prefix).
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            Self::EnvMountMissing => 1,
            Self::EnvSchedulerBinaryMissing => 2,
            Self::EnvSchedulerUnreachable => 3,
            Self::EnvUserLookupFailed => 4,
            Self::EnvUnsupportedPlatform => 5,
            Self::EnvIo => 6,

            Self::NotReadyScheduler => 100,
            Self::NotReadyNodeRegistration => 101,
            Self::NotReadyJobsTimedOut => 102,

            Self::TerminalJobsFailed => 200,
            Self::TerminalSubmitParseFailed => 201,
            Self::TerminalCommandFailed => 202,
            Self::TerminalAssertionFailed => 203,

            Self::ConfigReadError => 300,
            Self::ConfigParseError => 301,
            Self::ConfigEnvError => 302,
            Self::ConfigValidationError => 303,
        }
    }

    /// All codes, in catalog order.
    pub fn all() -> &'static [ErrorCode] {
        &[
            Self::EnvMountMissing,
            Self::EnvSchedulerBinaryMissing,
            Self::EnvSchedulerUnreachable,
            Self::EnvUserLookupFailed,
            Self::EnvUnsupportedPlatform,
            Self::EnvIo,
            Self::NotReadyScheduler,
            Self::NotReadyNodeRegistration,
            Self::NotReadyJobsTimedOut,
            Self::TerminalJobsFailed,
            Self::TerminalSubmitParseFailed,
            Self::TerminalCommandFailed,
            Self::TerminalAssertionFailed,
            Self::ConfigReadError,
            Self::ConfigParseError,
            Self::ConfigEnvError,
            Self::ConfigValidationError,
        ]
    }

    /// Returns the formatted error code (e.g., "CVT-E001").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("CVT-E{:03}", self.code_number())
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Environment,
            100..=199 => ErrorCategory::NotReady,
            200..=299 => ErrorCategory::Terminal,
            _ => ErrorCategory::Config,
        }
    }

    /// Whether the failure is the kind a bounded poll retries before giving up.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::NotReady)
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Returns the error message template.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::EnvMountMissing => "Required NFS mount is missing",
            Self::EnvSchedulerBinaryMissing => "Scheduler command could not be started",
            Self::EnvSchedulerUnreachable => "Not able to connect to the scheduler",
            Self::EnvUserLookupFailed => "Cluster user could not be resolved on this node",
            Self::EnvUnsupportedPlatform => "Operation is not supported on this platform",
            Self::EnvIo => "Local filesystem operation failed",

            Self::NotReadyScheduler => "Scheduler services are not ready",
            Self::NotReadyNodeRegistration => "Execute node is not registered with the scheduler",
            Self::NotReadyJobsTimedOut => "Jobs did not complete before the deadline",

            Self::TerminalJobsFailed => "One or more jobs failed",
            Self::TerminalSubmitParseFailed => "Unable to parse job submission output",
            Self::TerminalCommandFailed => "Command exited with a non-zero status",
            Self::TerminalAssertionFailed => "Check assertion failed",

            Self::ConfigReadError => "Failed to read configuration file",
            Self::ConfigParseError => "Configuration file contains invalid TOML syntax",
            Self::ConfigEnvError => "Environment variable has invalid value",
            Self::ConfigValidationError => "Configuration contains invalid values",
        }
    }

    /// Returns remediation steps for the error.
    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::EnvMountMissing => &[
                "Check `mount -l -t nfs` on the node",
                "Verify the NFS server exports /shared and /sched",
                "Re-run the node's cluster-init to remount",
            ],
            Self::EnvSchedulerBinaryMissing => &[
                "Verify the scheduler is installed under the configured bin directory",
                "Set CVT_CONDOR_BIN_DIR if it lives elsewhere",
            ],
            Self::EnvSchedulerUnreachable => &[
                "Check that the central manager is running",
                "Check firewall rules between this node and the central manager",
            ],
            Self::EnvUserLookupFailed => &[
                "Verify the cluster user exists (`getent passwd <user>`)",
                "Set CVT_CLUSTER_USER to the correct account",
            ],
            Self::EnvUnsupportedPlatform => &["Run this check on a Linux node"],
            Self::EnvIo => &[
                "Check permissions on the shared home directory",
                "Run the checks as root on scheduler nodes",
            ],
            Self::NotReadyScheduler => &[
                "Inspect the scheduler daemon logs",
                "Increase CVT_SCHEDD_READY_TIMEOUT_SECS on slow deployments",
            ],
            Self::NotReadyNodeRegistration => &[
                "Inspect the startd log on this node",
                "Check that the node's hostname resolves on the central manager",
            ],
            Self::NotReadyJobsTimedOut => &[
                "Check that execute nodes have joined the pool (`condor_status`)",
                "Increase CVT_JOB_TIMEOUT_SECS; nodes may take minutes to accept jobs",
            ],
            Self::TerminalJobsFailed => &[
                "Read the error lines included in the failure message",
                "Inspect the job logs in the cluster user's results directory",
            ],
            Self::TerminalSubmitParseFailed => &[
                "Run `condor_submit -verbose` manually and check for UserLog lines",
                "Verify the submission file declares a `log` path ending in .log",
            ],
            Self::TerminalCommandFailed => &["Read the captured stdout/stderr artifacts"],
            Self::TerminalAssertionFailed => &["Read the check log for the failed assertion"],
            Self::ConfigReadError => &["Check the path given by --config or CVT_CONFIG"],
            Self::ConfigParseError => &["Validate the file with a TOML linter"],
            Self::ConfigEnvError => &["Unset or correct the CVT_* variable named above"],
            Self::ConfigValidationError => &["Fix the values listed in the validation report"],
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_string(), self.message())
    }
}

/// Error category, matching the failure taxonomy of the checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Node environment problems; surfaced immediately, never retried (E001-E099)
    Environment,
    /// Conditions polled up to a deadline that never held (E100-E199)
    NotReady,
    /// Explicit failures reported by the scheduler or a check (E200-E299)
    Terminal,
    /// Configuration problems (E300-E399)
    Config,
}

impl ErrorCategory {
    /// Returns a human-readable name for the category.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Environment => "Environment",
            Self::NotReady => "Not ready",
            Self::Terminal => "Terminal",
            Self::Config => "Configuration",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Complete error entry with all metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "CVT-E001")
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n", self.code, self.message);

        if !self.remediation.is_empty() {
            output.push_str("\nRemediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }

        output
    }

    /// Formats the error as a single line.
    #[must_use]
    pub fn format_brief(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_brief())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_numbers_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::all() {
            let num = code.code_number();
            assert!(
                seen.insert(num),
                "Duplicate error code number: {} for {:?}",
                num,
                code
            );
        }
    }

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::EnvMountMissing.code_string(), "CVT-E001");
        assert_eq!(ErrorCode::NotReadyScheduler.code_string(), "CVT-E100");
        assert_eq!(ErrorCode::TerminalJobsFailed.code_string(), "CVT-E200");
        assert_eq!(ErrorCode::ConfigReadError.code_string(), "CVT-E300");
    }

    #[test]
    fn test_categories_follow_ranges() {
        for code in ErrorCode::all() {
            let expected = match code.code_number() {
                1..=99 => ErrorCategory::Environment,
                100..=199 => ErrorCategory::NotReady,
                200..=299 => ErrorCategory::Terminal,
                _ => ErrorCategory::Config,
            };
            assert_eq!(code.category(), expected, "{code:?}");
        }
    }

    #[test]
    fn test_only_not_ready_codes_are_retryable() {
        assert!(ErrorCode::NotReadyJobsTimedOut.is_retryable());
        assert!(!ErrorCode::EnvMountMissing.is_retryable());
        assert!(!ErrorCode::TerminalJobsFailed.is_retryable());
    }

    #[test]
    fn test_every_code_has_remediation() {
        for code in ErrorCode::all() {
            assert!(!code.remediation().is_empty(), "{code:?} lacks remediation");
        }
    }

    #[test]
    fn test_entry_format_full_numbers_steps() {
        let full = ErrorCode::NotReadyJobsTimedOut.entry().format_full();
        assert!(full.starts_with("[CVT-E102]"));
        assert!(full.contains("  1. "));
        assert!(full.contains("  2. "));
    }

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::EnvMountMissing).unwrap();
        assert_eq!(json, "\"ENV_MOUNT_MISSING\"");
    }
}
