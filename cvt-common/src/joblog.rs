//! Scheduler job logs: classification and polling.
//!
//! The scheduler appends free-form event text to one log per job. We never
//! parse the full grammar; the presence of a few marker strings is enough to
//! tell whether a job is still pending or running, finished cleanly, or died
//! with an errno-style error.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use memchr::memmem;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::CheckResult;
use crate::exec::read_text;
use crate::poll::poll_until;

/// Present once the job has started on an execute node.
pub const EXECUTING_MARKER: &str = "Job executing on host";
/// Present once the job has exited with status 0.
pub const SUCCESS_MARKER: &str = "Normal termination (return value 0)";
/// Precedes the errno lines of a failed job.
pub const ERROR_MARKER: &str = "Error from";

static ERRNO_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.*\(errno=\d:.*?\).*$").expect("errno line pattern is a valid regex")
});

/// Status of one job, derived from its log text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Not started, still running, or no decisive marker yet.
    #[serde(rename = "notready")]
    NotReady,
    Success,
    #[serde(rename = "failed")]
    Failure,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::NotReady)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotReady => "notready",
            Self::Success => "success",
            Self::Failure => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn contains(haystack: &str, needle: &str) -> bool {
    memmem::find(haystack.as_bytes(), needle.as_bytes()).is_some()
}

/// Whether a single line carries an `(errno=N: ...)` error.
pub fn line_has_error(line: &str) -> bool {
    ERRNO_LINE.is_match(line)
}

/// Whether the log reports an error: an `Error from` marker plus at least
/// one errno line.
pub fn has_error(content: &str) -> bool {
    contains(content, ERROR_MARKER) && content.split('\n').any(line_has_error)
}

/// The errno lines of a log, in order and untrimmed.
pub fn errno_lines(content: &str) -> impl Iterator<Item = &str> {
    content.split('\n').filter(|line| line_has_error(line))
}

/// Every errno line in the log, concatenated without separators.
pub fn error_lines(content: &str) -> String {
    errno_lines(content).collect()
}

/// Classify a job from the full text of its log. First match wins.
pub fn classify(content: &str) -> JobStatus {
    if !contains(content, EXECUTING_MARKER) {
        return JobStatus::NotReady;
    }

    if contains(content, SUCCESS_MARKER) {
        return JobStatus::Success;
    }

    if has_error(content) {
        return JobStatus::Failure;
    }

    JobStatus::NotReady
}

/// A job log on disk, written by the scheduler and only read here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobLog {
    path: PathBuf,
}

impl JobLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> CheckResult<String> {
        read_text(&self.path)
    }

    pub fn try_status(&self) -> CheckResult<JobStatus> {
        self.read().map(|content| classify(&content))
    }

    /// Current status. A log that cannot be read yet counts as not ready.
    pub fn status(&self) -> JobStatus {
        self.try_status().unwrap_or_else(|err| {
            warn!(path = %self.path.display(), error = %err, "Job log unreadable; treating as not ready");
            JobStatus::NotReady
        })
    }

    pub fn has_error(&self) -> bool {
        self.read().map(|content| has_error(&content)).unwrap_or(false)
    }

    /// The errno lines of this log, or an empty string if it cannot be read.
    pub fn read_error(&self) -> String {
        self.read()
            .map(|content| error_lines(&content))
            .unwrap_or_default()
    }
}

impl From<&str> for JobLog {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<PathBuf> for JobLog {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

/// Result of polling a batch of job logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollState {
    pub logs: Vec<JobLog>,
    /// One status per log, in input order, from the final pass.
    pub statuses: Vec<JobStatus>,
    pub passes: u32,
    pub elapsed: Duration,
    /// The deadline passed before every job was terminal.
    pub deadline_hit: bool,
}

impl PollState {
    pub fn all_terminal(&self) -> bool {
        self.statuses.iter().all(JobStatus::is_terminal)
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.statuses.iter().filter(|s| **s == status).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&JobLog, JobStatus)> {
        self.logs.iter().zip(self.statuses.iter().copied())
    }
}

/// Re-reads and reclassifies a batch of logs until every job is terminal
/// or the timeout elapses.
///
/// Every log is reclassified on every pass; terminal statuses are not
/// cached, so a log that stops looking terminal is reported as it is now.
#[derive(Debug, Clone, Copy)]
pub struct JobLogPoller {
    timeout: Duration,
    interval: Duration,
}

impl JobLogPoller {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            interval: Duration::ZERO,
        }
    }

    /// Sleep between passes instead of spinning.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll `logs` and return the last status sequence observed.
    ///
    /// Returns on completion and on timeout alike; callers tell them apart
    /// with [`PollState::all_terminal`].
    pub fn poll(&self, logs: &[JobLog]) -> PollState {
        info!(
            jobs = logs.len(),
            timeout_secs = self.timeout.as_secs(),
            "Waiting for jobs to reach a terminal state"
        );

        let mut last_summary = None;
        let mut unreadable = vec![false; logs.len()];
        let polled = poll_until(
            self.timeout,
            self.interval,
            || {
                let statuses: Vec<JobStatus> = logs
                    .iter()
                    .zip(unreadable.iter_mut())
                    .map(|(log, warned)| match log.try_status() {
                        Ok(status) => {
                            *warned = false;
                            status
                        }
                        Err(err) => {
                            // Once per outage, not once per pass.
                            if !*warned {
                                warn!(path = %log.path().display(), error = %err, "Job log unreadable; treating as not ready");
                                *warned = true;
                            }
                            JobStatus::NotReady
                        }
                    })
                    .collect();
                let summary = summarize(&statuses);
                if last_summary.as_ref() != Some(&summary) {
                    debug!(
                        not_ready = summary.0,
                        succeeded = summary.1,
                        failed = summary.2,
                        "Job statuses changed"
                    );
                    last_summary = Some(summary);
                }
                statuses
            },
            |statuses| statuses.iter().all(JobStatus::is_terminal),
        );

        let deadline_hit = polled.timed_out();
        let state = PollState {
            logs: logs.to_vec(),
            statuses: polled.last,
            passes: polled.attempts,
            elapsed: polled.elapsed,
            deadline_hit,
        };

        if state.all_terminal() {
            info!(
                passes = state.passes,
                elapsed_ms = state.elapsed.as_millis() as u64,
                "All jobs reached a terminal state"
            );
        } else {
            warn!(
                not_ready = state.count(JobStatus::NotReady),
                elapsed_ms = state.elapsed.as_millis() as u64,
                "Deadline reached with jobs still pending"
            );
        }
        state
    }
}

fn summarize(statuses: &[JobStatus]) -> (usize, usize, usize) {
    statuses.iter().fold((0, 0, 0), |(n, s, f), status| match status {
        JobStatus::NotReady => (n + 1, s, f),
        JobStatus::Success => (n, s + 1, f),
        JobStatus::Failure => (n, s, f + 1),
    })
}
