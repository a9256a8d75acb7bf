//! Scheduler waits and submit parsing against stand-in scheduler binaries.
//!
//! Each test writes small shell scripts named like the scheduler tools into a
//! temp `bin/` directory and points a [`ClusterConfig`] at it, so the real
//! [`LocalRunner`] and [`CheckHarness`] paths are exercised.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cvt_common::harness::{CheckHarness, HarnessConfig};
use cvt_common::identity::{check_output_as, current_user};
use cvt_common::platform::Platform;
use cvt_common::scheduler::{parse_user_logs, wait_for_node_registration, wait_for_schedd_ready};
use cvt_common::{CheckError, ClusterConfig, JobLog, JobLogPoller, JobStatus, LocalRunner};

#[ctor::ctor]
fn setup() {
    cvt_common::testing::init_global_test_logging();
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn config_for(bin_dir: &Path) -> ClusterConfig {
    let mut config = ClusterConfig::default();
    config.scheduler.bin_dir = bin_dir.to_path_buf();
    config
}

#[test]
fn test_schedd_becomes_ready_after_failures() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("attempts");
    write_script(
        dir.path(),
        "condor_q",
        &format!(
            "n=$(cat '{c}' 2>/dev/null || echo 0)\nn=$((n + 1))\necho $n > '{c}'\n\
             if [ $n -lt 3 ]; then echo 'Failed to fetch ads from schedd' >&2; exit 1; fi\n\
             echo '-- Schedd: scheduler.cluster'",
            c = counter.display()
        ),
    );

    let config = config_for(dir.path());
    let queue = Platform::Posix.queue_command(&config);
    wait_for_schedd_ready(
        &LocalRunner::new(),
        &queue,
        Duration::from_secs(10),
        Duration::from_millis(10),
    )
    .unwrap();

    assert_eq!(std::fs::read_to_string(&counter).unwrap().trim(), "3");
}

#[test]
fn test_schedd_never_ready_reports_last_stderr() {
    let dir = tempfile::tempdir().unwrap();
    write_script(
        dir.path(),
        "condor_q",
        "echo 'CEDAR:6001:Failed to connect to <10.0.0.4:9618>' >&2\nexit 1",
    );
    let queue = Platform::Posix.queue_command(&config_for(dir.path()));

    let err = wait_for_schedd_ready(
        &LocalRunner::new(),
        &queue,
        Duration::from_millis(100),
        Duration::from_millis(20),
    )
    .unwrap_err();
    match err {
        CheckError::SchedulerNotReady { stderr, .. } => {
            assert!(stderr.contains("CEDAR:6001"));
        }
        other => panic!("expected SchedulerNotReady, got {other:?}"),
    }
}

#[test]
fn test_missing_scheduler_install_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Platform::Posix.queue_command(&config_for(&dir.path().join("missing")));
    let started = std::time::Instant::now();
    let err = wait_for_schedd_ready(
        &LocalRunner::new(),
        &queue,
        Duration::from_secs(60),
        Duration::from_millis(10),
    )
    .unwrap_err();
    assert!(matches!(err, CheckError::Spawn { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_node_registration_through_harness_archives_output() {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    write_script(
        &bin,
        "condor_status",
        "echo 'Name                OpSys  Arch   State'\n\
         echo 'slot1@NODE7.cluster LINUX  X86_64 Unclaimed'",
    );
    let config = config_for(&bin);

    let harness = CheckHarness::new(
        "execute::node_registered_with_scheduler",
        HarnessConfig {
            work_root: dir.path().join("work"),
            cleanup_on_success: false,
            mirror_to_tracing: false,
            ..Default::default()
        },
    )
    .unwrap();

    let status = Platform::Posix.status_command(&config);
    let found = wait_for_node_registration(
        &harness,
        &status,
        "node7",
        Duration::from_secs(5),
        Duration::from_millis(10),
    )
    .unwrap();
    assert!(found.stdout.contains("NODE7"));

    let stdout_artifact = harness
        .work_dir()
        .join("logs/artifacts/001_condor_status_stdout.txt");
    assert!(std::fs::read_to_string(stdout_artifact).unwrap().contains("NODE7"));
    harness.mark_passed();
}

#[test]
fn test_submit_then_poll_logs_written_by_fake_scheduler() {
    let me = current_user().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("bin");
    let results = dir.path().join("results");
    std::fs::create_dir_all(&bin).unwrap();
    std::fs::create_dir_all(&results).unwrap();

    // Writes one finished log per job and prints the verbose ClassAds.
    write_script(
        &bin,
        "condor_submit",
        &format!(
            "for p in 0 1; do\n\
             log='{r}/sleep.20.'$p'.log'\n\
             printf '001 (020.00%s.000) Job executing on host: <10.0.0.7>\\n005 Job terminated.\\n\\t(1) Normal termination (return value 0)\\n' $p > \"$log\"\n\
             echo \"** Proc 20.$p:\"\n\
             echo \"UserLog = \\\"$log\\\"\"\n\
             done",
            r = results.display()
        ),
    );

    let config = config_for(&bin);
    let submit = Platform::Posix.submit_command(&config, Path::new("sleep.sub"));
    let mut argv: Vec<&str> = vec![submit.program.as_str()];
    argv.extend(submit.args.iter().map(String::as_str));

    let output = check_output_as(&LocalRunner::new(), &argv, &me, Some(dir.path())).unwrap();
    let logs: Vec<JobLog> = parse_user_logs(&output)
        .unwrap()
        .into_iter()
        .map(JobLog::from)
        .collect();
    assert_eq!(logs.len(), 2);

    let state = JobLogPoller::new(Duration::from_secs(5)).poll(&logs);
    assert_eq!(state.count(JobStatus::Success), 2);
}
