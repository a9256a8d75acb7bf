//! Shared library for the cluster verification tests.
//!
//! The interesting part is [`joblog`] and [`poll`]: classifying scheduler job
//! logs and waiting, with a hard deadline, for a batch of jobs to reach a
//! terminal state. The remaining modules are the collaborators those checks
//! need (command execution, running as the cluster user, platform quirks,
//! configuration) plus the [`harness`] used to run and report checks.

pub mod config;
pub mod errors;
pub mod exec;
pub mod harness;
pub mod identity;
pub mod joblog;
pub mod logging;
pub mod mounts;
pub mod outcome;
pub mod platform;
pub mod poll;
pub mod scheduler;
pub mod testing;
pub mod util;

pub use config::{ClusterConfig, ConfigError};
pub use errors::{CheckError, CheckResult, ErrorCategory, ErrorCode, ErrorEntry};
pub use exec::{CommandResult, CommandRunner, CommandSpec, LocalRunner};
pub use harness::{
    Check, CheckHarness, CheckReport, CheckStatus, HarnessConfig, HarnessError, Suite, SuiteReport,
};
pub use joblog::{JobLog, JobLogPoller, JobStatus, PollState};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use outcome::BatchOutcome;
pub use platform::Platform;
pub use poll::{Polled, poll_until};
