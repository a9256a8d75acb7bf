//! Pass/fail aggregation for a polled job batch.

use serde::Serialize;

use crate::errors::ErrorCode;
use crate::joblog::{JobLog, JobStatus, PollState};

/// Final verdict on a batch of jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub succeeded: usize,
    /// Jobs still `NotReady` when polling stopped.
    pub timed_out: usize,
    pub failed: usize,
    /// Errno lines of every log that reports an error, one entry per log.
    pub error_messages: Vec<String>,
}

impl BatchOutcome {
    /// Aggregate `statuses`, reading error details from `logs` when any job
    /// failed.
    ///
    /// Error details come from every log that reports an error, not only
    /// those classified `Failure`; a log with both a success and an error
    /// marker still contributes its lines.
    pub fn from_statuses(logs: &[JobLog], statuses: &[JobStatus]) -> Self {
        let count = |wanted| statuses.iter().filter(|s| **s == wanted).count();
        let failed = count(JobStatus::Failure);

        let error_messages = if failed > 0 {
            logs.iter()
                .filter(|log| log.has_error())
                .map(JobLog::read_error)
                .collect()
        } else {
            Vec::new()
        };

        Self {
            total: statuses.len(),
            succeeded: count(JobStatus::Success),
            timed_out: count(JobStatus::NotReady),
            failed,
            error_messages,
        }
    }

    pub fn from_poll(state: &PollState) -> Self {
        Self::from_statuses(&state.logs, &state.statuses)
    }

    /// Every job succeeded.
    pub fn passed(&self) -> bool {
        self.succeeded == self.total
    }

    /// Catalog code describing why the batch did not pass, if it did not.
    pub fn error_code(&self) -> Option<ErrorCode> {
        if self.failed > 0 {
            Some(ErrorCode::TerminalJobsFailed)
        } else if self.timed_out > 0 {
            Some(ErrorCode::NotReadyJobsTimedOut)
        } else {
            None
        }
    }

    pub fn failure_message(&self) -> String {
        let mut message = String::from("Job submission failed.");
        if self.timed_out > 0 {
            message.push_str(&format!(" {} jobs failed to complete.", self.timed_out));
        }
        if self.failed > 0 {
            message.push_str(&format!(" {} jobs failed.", self.failed));
            message.push_str(" Error messages from logs:\n");
            message.push_str(&self.error_messages.join("\n"));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_log(dir: &Path, name: &str, content: &str) -> JobLog {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        JobLog::new(path)
    }

    #[test]
    fn test_all_success_passes() {
        let outcome = BatchOutcome::from_statuses(&[], &[JobStatus::Success, JobStatus::Success]);
        assert!(outcome.passed());
        assert_eq!(outcome.error_code(), None);
        assert_eq!(outcome.timed_out, 0);
        assert_eq!(outcome.failed, 0);
    }

    #[test]
    fn test_timed_out_message() {
        let outcome = BatchOutcome::from_statuses(
            &[],
            &[JobStatus::Success, JobStatus::NotReady, JobStatus::NotReady],
        );
        assert!(!outcome.passed());
        assert_eq!(
            outcome.failure_message(),
            "Job submission failed. 2 jobs failed to complete."
        );
        assert_eq!(outcome.error_code(), Some(ErrorCode::NotReadyJobsTimedOut));
    }

    #[test]
    fn test_failed_message_includes_error_lines() {
        let dir = tempfile::tempdir().unwrap();
        let logs = vec![
            write_log(
                dir.path(),
                "a.log",
                "Job executing on host x\nNormal termination (return value 0)\n",
            ),
            write_log(
                dir.path(),
                "b.log",
                "Job executing on host x\nError from slot1: (errno=2: No such file)\n",
            ),
            write_log(
                dir.path(),
                "c.log",
                "Job executing on host x\nError from slot2: (errno=9: Bad file)\n",
            ),
            write_log(dir.path(), "d.log", "Job executing on host x\n"),
        ];
        let statuses: Vec<JobStatus> = logs.iter().map(JobLog::status).collect();
        let outcome = BatchOutcome::from_statuses(&logs, &statuses);

        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.timed_out, 1);
        assert_eq!(outcome.error_code(), Some(ErrorCode::TerminalJobsFailed));
        assert_eq!(
            outcome.failure_message(),
            "Job submission failed. 1 jobs failed to complete. 2 jobs failed. \
             Error messages from logs:\n\
             Error from slot1: (errno=2: No such file)\n\
             Error from slot2: (errno=9: Bad file)"
        );
    }

    #[test]
    fn test_one_success_one_failure_counts_one_failed() {
        let dir = tempfile::tempdir().unwrap();
        let logs = vec![
            write_log(
                dir.path(),
                "ok.log",
                "001 Job executing on host: <10.0.0.7>\n\tNormal termination (return value 0)\n",
            ),
            write_log(
                dir.path(),
                "bad.log",
                "001 Job executing on host: <10.0.0.8>\n\tError from slot1@node8: (errno=2: No such file or directory)\n",
            ),
        ];
        let statuses: Vec<JobStatus> = logs.iter().map(JobLog::status).collect();
        assert_eq!(statuses, vec![JobStatus::Success, JobStatus::Failure]);

        let outcome = BatchOutcome::from_statuses(&logs, &statuses);
        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.timed_out, 0);
        assert!(!outcome.passed());
        assert_eq!(outcome.error_code(), Some(ErrorCode::TerminalJobsFailed));
        assert_eq!(
            outcome.failure_message(),
            "Job submission failed. 1 jobs failed. Error messages from logs:\n\
             \tError from slot1@node8: (errno=2: No such file or directory)"
        );
    }

    #[test]
    fn test_empty_batch_passes_vacuously() {
        let outcome = BatchOutcome::from_statuses(&[], &[]);
        assert!(outcome.passed());
    }
}
