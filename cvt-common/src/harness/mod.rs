//! Per-check execution harness.
//!
//! A [`CheckHarness`] owns one check's work directory and [`CheckLogger`].
//! Every command it runs is logged with its exit code and duration. The full
//! stdout, stderr and a JSON trace are archived under `logs/artifacts/`. The
//! harness is itself a [`CommandRunner`], so the scheduler and mount helpers
//! can be handed a harness and get the same treatment for free.

pub mod logger;
pub mod suite;

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{ClusterConfig, ConfigError};
use crate::errors::{CheckError, CheckResult, ErrorCode};
use crate::exec::{CommandResult, CommandRunner, CommandSpec, LocalRunner};

pub use logger::{
    CheckLogger, CheckPhase, LogEntry, LogLevel, LogSource, LoggerConfig,
};
pub use suite::{Check, CheckReport, CheckStatus, Suite, SuiteReport};

/// Error type for harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error(transparent)]
    Check(#[from] CheckError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    /// A check-level failure that already has a catalog code and a final
    /// message, such as an aggregated job batch.
    #[error("{message}")]
    Failed { code: ErrorCode, message: String },

    #[error("Setup failed: {0}")]
    Setup(String),
}

impl HarnessError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Check(e) => e.code(),
            Self::Config(e) => e.code(),
            Self::Io(_) | Self::Setup(_) => ErrorCode::EnvIo,
            Self::AssertionFailed(_) => ErrorCode::TerminalAssertionFailed,
            Self::Failed { code, .. } => *code,
        }
    }
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Parent of every check's work directory.
    pub work_root: PathBuf,
    pub cleanup_on_success: bool,
    pub cleanup_on_failure: bool,
    /// Applied to commands that do not set their own timeout.
    pub command_timeout: Option<Duration>,
    pub min_log_level: LogLevel,
    pub mirror_to_tracing: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir().join("cvt"),
            cleanup_on_success: true,
            cleanup_on_failure: false,
            command_timeout: None,
            min_log_level: LogLevel::Debug,
            mirror_to_tracing: true,
        }
    }
}

impl From<&ClusterConfig> for HarnessConfig {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            work_root: config.harness.artifacts_dir.clone(),
            cleanup_on_success: config.harness.cleanup_on_success,
            cleanup_on_failure: config.harness.cleanup_on_failure,
            command_timeout: config.timeouts.command_timeout(),
            ..Default::default()
        }
    }
}

/// Harness for a single check.
pub struct CheckHarness<R: CommandRunner = LocalRunner> {
    pub config: HarnessConfig,
    pub logger: CheckLogger,
    work_dir: PathBuf,
    runner: R,
    passed: Cell<bool>,
    commands_run: Cell<u32>,
    cleaned: Cell<bool>,
}

impl CheckHarness<LocalRunner> {
    /// Harness that spawns real processes.
    pub fn new(check_name: &str, config: HarnessConfig) -> HarnessResult<Self> {
        Self::with_runner(check_name, config, LocalRunner::new())
    }
}

impl<R: CommandRunner> CheckHarness<R> {
    pub fn with_runner(check_name: &str, config: HarnessConfig, runner: R) -> HarnessResult<Self> {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f");
        let work_dir = config.work_root.join(format!(
            "{}_{timestamp}",
            logger::sanitize_component(&check_name.replace("::", "_"))
        ));
        std::fs::create_dir_all(&work_dir)?;

        let logger = CheckLogger::new(
            check_name,
            LoggerConfig {
                min_level: config.min_log_level,
                mirror_to_tracing: config.mirror_to_tracing,
                log_dir: Some(work_dir.join("logs")),
                ..Default::default()
            },
        );
        logger.log_phase(
            LogLevel::Info,
            CheckPhase::Setup,
            format!("Check harness initialized in {}", work_dir.display()),
            "HARNESS_INIT",
            Vec::new(),
        );

        Ok(Self {
            config,
            logger,
            work_dir,
            runner,
            passed: Cell::new(false),
            commands_run: Cell::new(0),
            cleaned: Cell::new(false),
        })
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run `program` with `args`, capturing output without judging the exit
    /// code.
    pub fn exec<I, S>(&self, program: &str, args: I) -> HarnessResult<CommandResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec_spec(&CommandSpec::new(program).args(args))
    }

    pub fn exec_spec(&self, spec: &CommandSpec) -> HarnessResult<CommandResult> {
        Ok(self.run_logged(spec)?)
    }

    fn run_logged(&self, spec: &CommandSpec) -> CheckResult<CommandResult> {
        let mut spec = spec.clone();
        if spec.timeout.is_none() {
            spec.timeout = self.config.command_timeout;
        }

        let sequence = self.commands_run.get() + 1;
        self.commands_run.set(sequence);
        let command_line = spec.display();
        self.logger.debug(format!("Executing: {command_line}"));

        let result = match self.runner.run(&spec) {
            Ok(result) => result,
            Err(error) => {
                self.logger.log_phase(
                    LogLevel::Error,
                    CheckPhase::Execute,
                    format!("Command could not run: {command_line}: {error}"),
                    "CMD_SPAWN_FAILURE",
                    Vec::new(),
                );
                return Err(error);
            }
        };

        let artifact_paths = self.archive(sequence, &spec, &command_line, &result);
        let program = program_name(&spec.program);

        self.logger.log_with_context(
            if result.success() {
                LogLevel::Debug
            } else {
                LogLevel::Warn
            },
            LogSource::Harness,
            format!("Command completed: {program}"),
            vec![
                ("exit_code".to_string(), result.exit_code.to_string()),
                (
                    "duration_ms".to_string(),
                    result.duration.as_millis().to_string(),
                ),
                ("timed_out".to_string(), result.timed_out.to_string()),
            ],
        );

        let decision_code = if result.timed_out {
            "CMD_TIMEOUT"
        } else if result.success() {
            "CMD_SUCCESS"
        } else {
            "CMD_FAILURE"
        };
        self.logger.log_phase(
            if result.success() {
                LogLevel::Info
            } else {
                LogLevel::Warn
            },
            CheckPhase::Execute,
            format!("Command execution finished: {program}"),
            decision_code,
            artifact_paths,
        );

        for line in result.stdout.lines() {
            self.logger.log(
                LogLevel::Trace,
                LogSource::CommandStdout {
                    program: program.clone(),
                },
                line,
            );
        }
        for line in result.stderr.lines() {
            self.logger.log(
                LogLevel::Trace,
                LogSource::CommandStderr {
                    program: program.clone(),
                },
                line,
            );
        }

        Ok(result)
    }

    fn archive(
        &self,
        sequence: u32,
        spec: &CommandSpec,
        command_line: &str,
        result: &CommandResult,
    ) -> Vec<String> {
        let prefix = format!("{sequence:03}_{}", program_name(&spec.program));
        let mut paths = Vec::new();

        let trace = serde_json::json!({
            "command": command_line,
            "user": spec.user,
            "cwd": spec.cwd.as_ref().map(|p| p.display().to_string()),
            "exit_code": result.exit_code,
            "duration_ms": result.duration.as_millis() as u64,
            "timed_out": result.timed_out,
            "stdout_len_bytes": result.stdout.len(),
            "stderr_len_bytes": result.stderr.len(),
        });
        if let Ok(path) = self
            .logger
            .capture_artifact_json(&format!("{prefix}_trace"), &trace)
        {
            paths.push(path.display().to_string());
        }
        if !result.stdout.is_empty()
            && let Ok(path) = self
                .logger
                .capture_artifact_text(&format!("{prefix}_stdout"), &result.stdout)
        {
            paths.push(path.display().to_string());
        }
        if !result.stderr.is_empty()
            && let Ok(path) = self
                .logger
                .capture_artifact_text(&format!("{prefix}_stderr"), &result.stderr)
        {
            paths.push(path.display().to_string());
        }
        paths
    }

    pub fn mark_passed(&self) {
        self.passed.set(true);
        self.logger.info("Check marked as PASSED");
    }

    pub fn mark_failed(&self, reason: &str) {
        self.passed.set(false);
        self.logger.error(format!("Check marked as FAILED: {reason}"));
    }

    pub fn passed(&self) -> bool {
        self.passed.get()
    }

    fn verdict(&self, ok: bool, message: &str, pass_code: &str, fail_code: &str) {
        let (level, outcome, code) = if ok {
            (LogLevel::Debug, "passed", pass_code)
        } else {
            (LogLevel::Error, "failed", fail_code)
        };
        self.logger.log_phase(
            level,
            CheckPhase::Verify,
            format!("Assertion {outcome}: {message}"),
            code,
            Vec::new(),
        );
    }

    pub fn assert(&self, condition: bool, message: &str) -> HarnessResult<()> {
        self.verdict(condition, message, "ASSERT_PASS", "ASSERT_FAIL");
        if condition {
            Ok(())
        } else {
            Err(HarnessError::AssertionFailed(message.to_string()))
        }
    }

    /// Assert `condition`, failing with a specific catalog code and a message
    /// used verbatim in the report.
    pub fn require(&self, condition: bool, code: ErrorCode, message: &str) -> HarnessResult<()> {
        self.verdict(condition, message, "REQUIRE_PASS", code.code_string().as_str());
        if condition {
            Ok(())
        } else {
            Err(HarnessError::Failed {
                code,
                message: message.to_string(),
            })
        }
    }

    /// Remove the work directory if the outcome calls for it. Runs once.
    pub fn cleanup(&self) {
        if self.cleaned.replace(true) {
            return;
        }

        let passed = self.passed();
        let remove = if passed {
            self.config.cleanup_on_success
        } else {
            self.config.cleanup_on_failure
        };

        if !remove {
            self.logger.log_phase(
                LogLevel::Info,
                CheckPhase::Cleanup,
                format!("Keeping work directory {}", self.work_dir.display()),
                if passed { "KEEP_ON_SUCCESS" } else { "KEEP_ON_FAILURE" },
                Vec::new(),
            );
            return;
        }

        self.logger.log_phase(
            LogLevel::Debug,
            CheckPhase::Cleanup,
            format!("Removing work directory {}", self.work_dir.display()),
            "CLEANUP_REMOVE",
            Vec::new(),
        );
        if let Err(error) = std::fs::remove_dir_all(&self.work_dir) {
            tracing::warn!(dir = %self.work_dir.display(), %error, "Failed to remove check work directory");
        }
    }
}

impl<R: CommandRunner> CommandRunner for CheckHarness<R> {
    fn run(&self, spec: &CommandSpec) -> CheckResult<CommandResult> {
        self.run_logged(spec)
    }
}

impl<R: CommandRunner> Drop for CheckHarness<R> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn program_name(program: &str) -> String {
    let name = Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string());
    logger::sanitize_component(&name)
}
