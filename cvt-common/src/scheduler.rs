//! Waiting on the scheduler daemons and reading `condor_submit` output.
//!
//! Both waits go through [`try_poll_until`]: a command that runs but exits
//! non-zero is retried until the deadline, while a command that cannot be
//! started at all (wrong install path) fails immediately.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::errors::{CheckError, CheckResult};
use crate::exec::{CommandResult, CommandRunner, CommandSpec};
use crate::platform::hostname_matches;
use crate::poll::try_poll_until;

static USER_LOG_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^UserLog = ".*\.log"$"#).expect("user log pattern is a valid regex")
});

/// Run the queue command once. Ready means it exited 0.
pub fn is_schedd_ready<R: CommandRunner + ?Sized>(
    runner: &R,
    queue: &CommandSpec,
) -> CheckResult<CommandResult> {
    let result = runner.run(queue)?;
    debug!(exit_code = result.exit_code, "Probed schedd");
    Ok(result)
}

/// Block until the queue command succeeds or `timeout` elapses.
///
/// On timeout the error carries the stderr of the last attempt.
pub fn wait_for_schedd_ready<R: CommandRunner + ?Sized>(
    runner: &R,
    queue: &CommandSpec,
    timeout: Duration,
    interval: Duration,
) -> CheckResult<()> {
    info!(command = %queue.display(), timeout_secs = timeout.as_secs(), "Waiting for schedd");

    let polled = try_poll_until(
        timeout,
        interval,
        || is_schedd_ready(runner, queue),
        CommandResult::success,
    )?;

    if polled.satisfied {
        info!(attempts = polled.attempts, elapsed_ms = polled.elapsed.as_millis() as u64, "Schedd is ready");
        return Ok(());
    }

    warn!(attempts = polled.attempts, exit_code = polled.last.exit_code, "Schedd not ready before deadline");
    Err(CheckError::SchedulerNotReady {
        waited: timeout,
        stderr: polled.last.stderr,
    })
}

/// Block until the status command succeeds and lists `hostname`.
///
/// Returns the successful status output. After the deadline, a non-zero
/// exit on the last attempt means the central manager was never reached;
/// a zero exit means it was reached but this node never registered.
pub fn wait_for_node_registration<R: CommandRunner + ?Sized>(
    runner: &R,
    status: &CommandSpec,
    hostname: &str,
    timeout: Duration,
    interval: Duration,
) -> CheckResult<CommandResult> {
    info!(hostname, timeout_secs = timeout.as_secs(), "Waiting for node to register with the scheduler");

    let polled = try_poll_until(
        timeout,
        interval,
        || runner.run(status),
        |result: &CommandResult| result.success() && hostname_matches(&result.stdout, hostname),
    )?;

    let last = polled.last;
    if polled.satisfied {
        info!(hostname, attempts = polled.attempts, "Node registered");
        return Ok(last);
    }

    if !last.success() {
        return Err(CheckError::SchedulerUnreachable {
            exit_code: last.exit_code,
            stdout: last.stdout,
            stderr: last.stderr,
        });
    }

    Err(CheckError::NodeNotRegistered {
        hostname: hostname.to_string(),
        stdout: last.stdout,
    })
}

/// Job log paths from `condor_submit -verbose` output.
///
/// Each job's ClassAd carries a `UserLog = "<path>.log"` line; the path is
/// what follows the last `=`, without surrounding whitespace or quotes.
pub fn parse_user_logs(output: &str) -> CheckResult<Vec<PathBuf>> {
    let logs: Vec<PathBuf> = output
        .split('\n')
        .filter(|line| USER_LOG_LINE.is_match(line))
        .filter_map(|line| line.rsplit('=').next())
        .map(|value| PathBuf::from(value.trim().trim_matches('"')))
        .collect();

    if logs.is_empty() {
        return Err(CheckError::SubmitParseFailed {
            output: output.to_string(),
        });
    }
    debug!(count = logs.len(), "Parsed job logs from submit output");
    Ok(logs)
}
