//! Error catalog and the error type shared by the checks.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                                   |
//! |------------|-------------|-----------------------------------------------|
//! | E001-E099  | Environment | Node setup: mounts, binaries, users, platform |
//! | E100-E199  | NotReady    | Bounded waits that ran out of time            |
//! | E200-E299  | Terminal    | Explicit failures reported by the scheduler   |
//! | E300-E399  | Config      | Configuration file and environment values     |

pub mod catalog;

use std::path::PathBuf;
use std::time::Duration;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};

/// Errors raised by the check primitives.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command `{command}` exited with status {exit_code}\nStderr: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error(
        "Condor services still not ready after {}. Error message is:\n{stderr}",
        describe_wait(.waited)
    )]
    SchedulerNotReady { waited: Duration, stderr: String },

    #[error(
        "Not able to connect to condor master.Return code was {exit_code}\nStdout: {stdout}\nStderr:{stderr}"
    )]
    SchedulerUnreachable {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Current hostname {hostname} not found in condor_status\nStdout: {stdout}")]
    NodeNotRegistered { hostname: String, stdout: String },

    #[error("Unable to parse output of sleep job submission")]
    SubmitParseFailed { output: String },

    #[error("NFS mount for {mount} missing")]
    MountMissing { mount: String },

    #[error("unable to resolve user {user}: {reason}")]
    UserLookup { user: String, reason: String },

    #[error("{operation} is not supported on {platform}")]
    Unsupported {
        operation: &'static str,
        platform: String,
    },

    #[error("{path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CheckError {
    /// Catalog code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Spawn { .. } => ErrorCode::EnvSchedulerBinaryMissing,
            Self::CommandFailed { .. } => ErrorCode::TerminalCommandFailed,
            Self::SchedulerNotReady { .. } => ErrorCode::NotReadyScheduler,
            Self::SchedulerUnreachable { .. } => ErrorCode::EnvSchedulerUnreachable,
            Self::NodeNotRegistered { .. } => ErrorCode::NotReadyNodeRegistration,
            Self::SubmitParseFailed { .. } => ErrorCode::TerminalSubmitParseFailed,
            Self::MountMissing { .. } => ErrorCode::EnvMountMissing,
            Self::UserLookup { .. } => ErrorCode::EnvUserLookupFailed,
            Self::Unsupported { .. } => ErrorCode::EnvUnsupportedPlatform,
            Self::File { .. } | Self::Io(_) => ErrorCode::EnvIo,
        }
    }

    /// Shorthand for `self.code().category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code().category()
    }
}

/// Result type for check primitives
pub type CheckResult<T> = Result<T, CheckError>;

/// "one minute" reads better than "1m" in the scheduler-readiness message.
fn describe_wait(waited: &Duration) -> String {
    if *waited == Duration::from_secs(60) {
        "one minute".to_string()
    } else {
        humantime::format_duration(*waited).to_string()
    }
}
