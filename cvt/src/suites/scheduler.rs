//! Scheduler-node suite: submit a batch of sleep jobs as the cluster user
//! and wait for all of them to finish.

use std::path::Path;

use cvt_common::harness::{Check, CheckHarness, HarnessConfig, HarnessError, HarnessResult, Suite};
use cvt_common::identity::{UserProfile, check_output_as, chown_to};
use cvt_common::scheduler::{parse_user_logs, wait_for_schedd_ready};
use cvt_common::{
    BatchOutcome, CheckError, ClusterConfig, CommandRunner, JobLog, JobLogPoller, Platform,
};

/// Submit description used when `scheduler.submit_file` is not configured.
pub const SLEEP_SUBMIT: &str = include_str!("../../resources/sleep.sub");

const SUBMIT_FILE_NAME: &str = "sleep.sub";

pub fn suite<'a, R>(config: &'a ClusterConfig, platform: Platform, runner: R) -> Suite<'a, R>
where
    R: CommandRunner + Clone + 'a,
{
    Suite::with_runner("scheduler", HarnessConfig::from(config), runner)
        .setup(move |h| prepare(h, config, platform))
        .check(Check::new("sleep_jobs_complete", move |h| {
            sleep_jobs_complete(h, config, platform)
        }))
}

/// Results directory and submit file owned by the cluster user, then a
/// responsive schedd.
fn prepare<R: CommandRunner>(
    h: &CheckHarness<R>,
    config: &ClusterConfig,
    platform: Platform,
) -> HarnessResult<()> {
    let user = config.cluster_user()?;
    let home = config.user_home()?;
    let profile = UserProfile::lookup(user, Some(home.as_path()))?;

    let results = home.join("results");
    std::fs::create_dir_all(&results).map_err(|source| file_error(&results, source))?;
    chown_to(&results, &profile)?;

    let submit_file = home.join(SUBMIT_FILE_NAME);
    if !submit_file.exists() {
        install_submit_file(config, &submit_file)?;
        h.logger
            .info(format!("Installed submit file {}", submit_file.display()));
    }
    chown_to(&submit_file, &profile)?;

    wait_for_schedd_ready(
        h,
        &platform.queue_command(config),
        config.timeouts.schedd_ready,
        config.timeouts.poll_interval,
    )?;
    Ok(())
}

fn install_submit_file(config: &ClusterConfig, dst: &Path) -> HarnessResult<()> {
    match &config.scheduler.submit_file {
        Some(src) => {
            std::fs::copy(src, dst).map_err(|source| file_error(src, source))?;
        }
        None => {
            std::fs::write(dst, SLEEP_SUBMIT).map_err(|source| file_error(dst, source))?;
        }
    }
    Ok(())
}

fn file_error(path: &Path, source: std::io::Error) -> HarnessError {
    CheckError::File {
        path: path.to_path_buf(),
        source,
    }
    .into()
}

fn sleep_jobs_complete<R: CommandRunner>(
    h: &CheckHarness<R>,
    config: &ClusterConfig,
    platform: Platform,
) -> HarnessResult<()> {
    let user = config.cluster_user()?;
    let home = config.user_home()?;

    let submit = platform.submit_command(config, Path::new(SUBMIT_FILE_NAME));
    let mut argv = vec![submit.program.as_str()];
    argv.extend(submit.args.iter().map(String::as_str));
    let output = check_output_as(h, &argv, user, Some(home.as_path()))?;

    let logs: Vec<JobLog> = parse_user_logs(&output)?
        .into_iter()
        .map(JobLog::from)
        .collect();
    h.logger.info(format!("Submitted {} jobs", logs.len()));

    // Execute nodes can join the pool minutes before they accept work.
    let state = JobLogPoller::new(config.timeouts.jobs)
        .with_interval(config.timeouts.poll_interval)
        .poll(&logs);
    let outcome = BatchOutcome::from_poll(&state);
    if let Err(e) = h.logger.capture_artifact_json("batch_outcome", &outcome) {
        h.logger.warn(format!("Could not archive batch outcome: {e}"));
    }

    match outcome.error_code() {
        None => h.assert(outcome.passed(), "all jobs succeeded"),
        Some(code) => h.require(false, code, &outcome.failure_message()),
    }
}
