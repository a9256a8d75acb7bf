//! Polling a batch of job logs that are written while the poller runs.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::Duration;

use cvt_common::joblog::{EXECUTING_MARKER, SUCCESS_MARKER};
use cvt_common::{BatchOutcome, ErrorCode, JobLog, JobLogPoller, JobStatus};

#[ctor::ctor]
fn setup() {
    cvt_common::testing::init_global_test_logging();
}

const SUBMITTED: &str = "000 (012.000.000) 2024-05-01 10:00:00 Job submitted from host: <10.0.0.4:9618>\n...\n";

fn executing() -> String {
    format!("001 (012.000.000) 2024-05-01 10:00:03 {EXECUTING_MARKER}: <10.0.0.7:9618>\n...\n")
}

fn terminated_ok() -> String {
    format!("005 (012.000.000) 2024-05-01 10:01:03 Job terminated.\n\t(1) {SUCCESS_MARKER}\n...\n")
}

const SHADOW_ERROR: &str = "007 (012.000.000) 2024-05-01 10:00:04 Shadow exception!\n\tError from slot1@node7: Failed to execute '/bin/sleep' (errno=2: No such file or directory)\n...\n";

fn append(path: &Path, text: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

#[test]
fn test_jobs_finishing_during_poll_complete_batch() {
    let dir = tempfile::tempdir().unwrap();
    let paths: Vec<_> = (0..4)
        .map(|i| dir.path().join(format!("sleep.12.{i}.log")))
        .collect();
    for path in &paths {
        append(path, SUBMITTED);
    }

    let writer_paths = paths.clone();
    let writer = thread::spawn(move || {
        for path in &writer_paths {
            thread::sleep(Duration::from_millis(20));
            append(path, &executing());
        }
        for path in &writer_paths {
            thread::sleep(Duration::from_millis(20));
            append(path, &terminated_ok());
        }
    });

    let logs: Vec<JobLog> = paths.iter().cloned().map(JobLog::from).collect();
    let state = JobLogPoller::new(Duration::from_secs(10))
        .with_interval(Duration::from_millis(5))
        .poll(&logs);
    writer.join().unwrap();

    assert!(state.all_terminal());
    assert!(!state.deadline_hit);
    assert!(state.passes > 1);
    assert_eq!(state.count(JobStatus::Success), 4);

    let outcome = BatchOutcome::from_poll(&state);
    assert!(outcome.passed());
    assert_eq!(outcome.error_code(), None);
}

#[test]
fn test_mixed_batch_reports_failures_and_stragglers() {
    let dir = tempfile::tempdir().unwrap();
    let done = dir.path().join("sleep.13.0.log");
    let broken = dir.path().join("sleep.13.1.log");
    let queued = dir.path().join("sleep.13.2.log");
    let never_written = dir.path().join("sleep.13.3.log");

    append(&done, &format!("{SUBMITTED}{}{}", executing(), terminated_ok()));
    append(&broken, &format!("{SUBMITTED}{}{SHADOW_ERROR}", executing()));
    append(&queued, SUBMITTED);

    let logs: Vec<JobLog> = [&done, &broken, &queued, &never_written]
        .into_iter()
        .map(|p| JobLog::new(p.clone()))
        .collect();
    let state = JobLogPoller::new(Duration::from_millis(50))
        .with_interval(Duration::from_millis(10))
        .poll(&logs);

    assert!(state.deadline_hit);
    assert_eq!(
        state.statuses,
        vec![
            JobStatus::Success,
            JobStatus::Failure,
            JobStatus::NotReady,
            JobStatus::NotReady
        ]
    );

    let outcome = BatchOutcome::from_poll(&state);
    assert!(!outcome.passed());
    assert_eq!(outcome.error_code(), Some(ErrorCode::TerminalJobsFailed));
    assert_eq!(
        outcome.failure_message(),
        "Job submission failed. 2 jobs failed to complete. 1 jobs failed. Error messages from logs:\n\
         \tError from slot1@node7: Failed to execute '/bin/sleep' (errno=2: No such file or directory)"
    );
}

#[test]
fn test_zero_timeout_still_observes_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sleep.14.0.log");
    append(&path, &format!("{}{}", executing(), terminated_ok()));

    let state = JobLogPoller::new(Duration::ZERO).poll(&[JobLog::new(&path)]);
    assert_eq!(state.passes, 1);
    assert_eq!(state.statuses, vec![JobStatus::Success]);
    assert!(!state.deadline_hit);
}
