//! Cluster Verification Tests
//!
//! Acceptance checks run on freshly provisioned HTCondor nodes: the execute
//! suite confirms shared storage and registration with the central manager,
//! the scheduler suite submits a batch of sleep jobs and waits for every one
//! of them to finish. The remaining subcommands expose the building blocks
//! for debugging a node by hand.

#![forbid(unsafe_code)]

mod suites;

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cvt_common::config::LoadedConfig;
use cvt_common::joblog;
use cvt_common::scheduler::{parse_user_logs, wait_for_schedd_ready};
use cvt_common::{
    BatchOutcome, ClusterConfig, ConfigError, JobLog, JobLogPoller, JobStatus, LocalRunner,
    LogConfig, LogFormat, Platform, SuiteReport, init_logging,
};
use tracing::{debug, error, info, warn};

/// Exit status for configuration problems.
const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(name = "cvt")]
#[command(author, version, about = "Cluster verification tests for HTCondor nodes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to $CVT_CONFIG, then ~/.config/cvt/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log to stderr as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Also write JSON logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the execute-node suite
    Execute {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the scheduler-node suite (submits sleep jobs)
    Scheduler {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Classify job logs once and print their status
    Classify {
        #[arg(required = true)]
        logs: Vec<PathBuf>,
    },

    /// Wait for job logs to reach a terminal state
    Poll {
        #[arg(required = true)]
        logs: Vec<PathBuf>,

        /// Give up after this long (default: timeouts.jobs)
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,

        /// Pause between passes (default: timeouts.poll_interval)
        #[arg(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Wait for the schedd to answer condor_q
    WaitSchedd {
        /// Give up after this long (default: timeouts.schedd_ready)
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },

    /// Print job log paths from `condor_submit -verbose` output
    ParseSubmit {
        /// Read from this file instead of stdin
        file: Option<PathBuf>,
    },

    /// Exit 0 if this node has the given role
    HasRole { role: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    if cli.json_logs {
        log_config = log_config.with_format(LogFormat::Json);
    }
    if let Some(path) = &cli.log_file {
        log_config = log_config.with_file(path);
    }
    let _logging_guards = match init_logging(&log_config) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("cvt: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            eprintln!("cvt: {err:#}");
            if err.downcast_ref::<ConfigError>().is_some() {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let loaded = ClusterConfig::load(cli.config.as_deref())?;
    report_config(&loaded);
    let config = loaded.config;
    let platform = Platform::current();

    match cli.command {
        Commands::Execute { json } => {
            let report = suites::execute::suite(&config, platform, LocalRunner::new()).run();
            print_report(&report, json)
        }
        Commands::Scheduler { json } => {
            config.cluster_user()?;
            let report = suites::scheduler::suite(&config, platform, LocalRunner::new()).run();
            print_report(&report, json)
        }
        Commands::Classify { logs } => classify(&logs),
        Commands::Poll {
            logs,
            timeout,
            interval,
            json,
        } => {
            let timeout = timeout.unwrap_or(config.timeouts.jobs);
            let interval = interval.unwrap_or(config.timeouts.poll_interval);
            poll(&logs, timeout, interval, json)
        }
        Commands::WaitSchedd { timeout } => {
            let queue = platform.queue_command(&config);
            wait_for_schedd_ready(
                &LocalRunner::new(),
                &queue,
                timeout.unwrap_or(config.timeouts.schedd_ready),
                config.timeouts.poll_interval,
            )?;
            println!("schedd ready");
            Ok(ExitCode::SUCCESS)
        }
        Commands::ParseSubmit { file } => {
            let output = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => {
                    let mut buffer = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buffer)
                        .context("failed to read submit output from stdin")?;
                    buffer
                }
            };
            for log in parse_user_logs(&output)? {
                println!("{}", log.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::HasRole { role } => {
            let has = config.has_role(&role);
            debug!(role = %role, has, roles = ?config.cluster.roles, "Role lookup");
            Ok(if has {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn report_config(loaded: &LoadedConfig) {
    match &loaded.file {
        Some(path) => info!(path = %path.display(), "Loaded configuration"),
        None => debug!("No config file; using defaults"),
    }
    for value in &loaded.overrides {
        debug!(
            key = value.key,
            value = %value.value,
            source = %value.source,
            env_var = ?value.env_var,
            "Configuration override"
        );
    }
    for warning in &loaded.warnings {
        warn!("{warning}");
    }
}

fn print_report(report: &SuiteReport, json: bool) -> Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(ExitCode::from(report.exit_code() as u8))
}

fn classify(paths: &[PathBuf]) -> Result<ExitCode> {
    for path in paths {
        let log = JobLog::new(path);
        let content = log.read()?;
        let status = joblog::classify(&content);
        println!("{}\t{status}", path.display());
        if status == JobStatus::Failure || joblog::has_error(&content) {
            for line in joblog::errno_lines(&content) {
                println!("\t{}", line.trim_end_matches('\r'));
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn poll(paths: &[PathBuf], timeout: Duration, interval: Duration, json: bool) -> Result<ExitCode> {
    let logs: Vec<JobLog> = paths.iter().map(JobLog::new).collect();
    let state = JobLogPoller::new(timeout).with_interval(interval).poll(&logs);
    let outcome = BatchOutcome::from_poll(&state);

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        for (log, status) in state.iter() {
            println!("{}\t{status}", log.path().display());
        }
        if outcome.passed() {
            println!("All {} jobs succeeded.", outcome.total);
        } else {
            println!("{}", outcome.failure_message());
        }
    }

    Ok(if outcome.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
