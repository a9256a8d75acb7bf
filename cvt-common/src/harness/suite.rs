//! Ordered groups of checks.
//!
//! A [`Suite`] runs each [`Check`] in its own [`CheckHarness`], after an
//! optional shared setup step, and collects a [`SuiteReport`]. A failing
//! check never stops the ones after it.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, warn};

use super::{CheckHarness, CheckPhase, HarnessConfig, HarnessResult, LogLevel};
use crate::exec::{CommandRunner, LocalRunner};

type CheckBody<'a, R> = Box<dyn Fn(&CheckHarness<R>) -> HarnessResult<()> + 'a>;

/// One named check.
pub struct Check<'a, R: CommandRunner = LocalRunner> {
    name: String,
    skip_reason: Option<String>,
    body: CheckBody<'a, R>,
}

impl<'a, R: CommandRunner> Check<'a, R> {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&CheckHarness<R>) -> HarnessResult<()> + 'a,
    {
        Self {
            name: name.into(),
            skip_reason: None,
            body: Box::new(body),
        }
    }

    /// Skip the check when `condition` holds.
    #[must_use]
    pub fn skip_if(mut self, condition: bool, reason: impl Into<String>) -> Self {
        if condition {
            self.skip_reason = Some(reason.into());
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passed,
    Failed,
    Skipped,
}

impl CheckStatus {
    fn label(&self) -> &'static str {
        match self {
            Self::Passed => "PASS",
            Self::Failed => "FAIL",
            Self::Skipped => "SKIP",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub name: String,
    pub status: CheckStatus,
    /// Failure message or skip reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Catalog code of the failure, e.g. `CVT-E200`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub duration_ms: u64,
    /// Check log, when it was kept on disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub suite: String,
    pub checks: Vec<CheckReport>,
    pub duration_ms: u64,
}

impl SuiteReport {
    /// No check failed. Skipped checks do not count against the suite.
    pub fn passed(&self) -> bool {
        self.count(CheckStatus::Failed) == 0
    }

    pub fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    /// Process exit status for this report.
    pub fn exit_code(&self) -> i32 {
        if self.passed() { 0 } else { 1 }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "suite {}: {} passed, {} failed, {} skipped ({} ms)",
            self.suite,
            self.count(CheckStatus::Passed),
            self.count(CheckStatus::Failed),
            self.count(CheckStatus::Skipped),
            self.duration_ms
        );
        for check in &self.checks {
            let _ = write!(out, "  {}  {}", check.status.label(), check.name);
            if let Some(code) = &check.code {
                let _ = write!(out, " [{code}]");
            }
            let _ = write!(out, " ({} ms)", check.duration_ms);
            if let Some(message) = &check.message {
                for line in message.lines() {
                    let _ = write!(out, "\n        {line}");
                }
            }
            out.push('\n');
            if check.status == CheckStatus::Failed
                && let Some(path) = &check.log_path
            {
                let _ = writeln!(out, "        log: {}", path.display());
            }
        }
        out
    }
}

/// Ordered checks sharing a harness configuration and an optional setup.
pub struct Suite<'a, R: CommandRunner + Clone = LocalRunner> {
    name: String,
    config: HarnessConfig,
    runner: R,
    setup: Option<CheckBody<'a, R>>,
    checks: Vec<Check<'a, R>>,
}

impl<'a> Suite<'a, LocalRunner> {
    pub fn new(name: impl Into<String>, config: HarnessConfig) -> Self {
        Self::with_runner(name, config, LocalRunner::new())
    }
}

impl<'a, R: CommandRunner + Clone> Suite<'a, R> {
    /// Each check's harness gets its own clone of `runner`.
    pub fn with_runner(name: impl Into<String>, config: HarnessConfig, runner: R) -> Self {
        Self {
            name: name.into(),
            config,
            runner,
            setup: None,
            checks: Vec::new(),
        }
    }

    /// Run `setup` in each check's harness before the check body.
    #[must_use]
    pub fn setup<F>(mut self, setup: F) -> Self
    where
        F: Fn(&CheckHarness<R>) -> HarnessResult<()> + 'a,
    {
        self.setup = Some(Box::new(setup));
        self
    }

    #[must_use]
    pub fn check(mut self, check: Check<'a, R>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn check_names(&self) -> Vec<&str> {
        self.checks.iter().map(Check::name).collect()
    }

    pub fn run(&self) -> SuiteReport {
        let started = Instant::now();
        info!(suite = %self.name, checks = self.checks.len(), "Running suite");

        let checks: Vec<CheckReport> = self.checks.iter().map(|c| self.run_check(c)).collect();

        let report = SuiteReport {
            suite: self.name.clone(),
            checks,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            suite = %self.name,
            passed = report.count(CheckStatus::Passed),
            failed = report.count(CheckStatus::Failed),
            skipped = report.count(CheckStatus::Skipped),
            "Suite finished"
        );
        report
    }

    fn run_check(&self, check: &Check<'a, R>) -> CheckReport {
        let started = Instant::now();
        let qualified = format!("{}::{}", self.name, check.name);

        if let Some(reason) = &check.skip_reason {
            info!(check = %qualified, %reason, "Skipping check");
            return CheckReport {
                name: check.name.clone(),
                status: CheckStatus::Skipped,
                message: Some(reason.clone()),
                code: None,
                duration_ms: 0,
                log_path: None,
            };
        }

        let harness =
            match CheckHarness::with_runner(&qualified, self.config.clone(), self.runner.clone()) {
                Ok(harness) => harness,
                Err(e) => {
                    error!(check = %qualified, error = %e, "Cannot create check harness");
                    return CheckReport {
                        name: check.name.clone(),
                        status: CheckStatus::Failed,
                        message: Some(e.to_string()),
                        code: Some(e.code().code_string()),
                        duration_ms: started.elapsed().as_millis() as u64,
                        log_path: None,
                    };
                }
            };

        let outcome = self
            .setup
            .as_ref()
            .map_or(Ok(()), |setup| {
                setup(&harness).inspect_err(|e| {
                    harness.logger.log_phase(
                        LogLevel::Error,
                        CheckPhase::Setup,
                        format!("Setup failed: {e}"),
                        "SETUP_FAIL",
                        Vec::new(),
                    );
                })
            })
            .and_then(|()| (check.body)(&harness));

        let (status, message, code) = match outcome {
            Ok(()) => {
                harness.mark_passed();
                (CheckStatus::Passed, None, None)
            }
            Err(e) => {
                harness.mark_failed(&e.to_string());
                warn!(check = %qualified, code = %e.code().code_string(), "Check failed");
                (
                    CheckStatus::Failed,
                    Some(e.to_string()),
                    Some(e.code().code_string()),
                )
            }
        };

        let log_path = harness.logger.log_path().map(PathBuf::from);
        drop(harness);

        CheckReport {
            name: check.name.clone(),
            status,
            message,
            code,
            duration_ms: started.elapsed().as_millis() as u64,
            log_path: log_path.filter(|p| p.exists()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CheckResult, ErrorCode};
    use crate::exec::{CommandResult, CommandSpec};
    use crate::harness::HarnessError;
    use std::cell::Cell;
    use std::time::Duration;

    struct AlwaysOk;

    impl CommandRunner for AlwaysOk {
        fn run(&self, _spec: &CommandSpec) -> CheckResult<CommandResult> {
            Ok(CommandResult {
                exit_code: 0,
                stdout: "ok".to_string(),
                stderr: String::new(),
                duration: Duration::ZERO,
                timed_out: false,
            })
        }
    }

    fn config(root: &std::path::Path) -> HarnessConfig {
        HarnessConfig {
            work_root: root.to_path_buf(),
            mirror_to_tracing: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_runs_every_check_and_reports() {
        let root = tempfile::tempdir().unwrap();
        let runner = AlwaysOk;
        let report = Suite::with_runner("execute", config(root.path()), &runner)
            .check(Check::new("passes", |h| {
                let result = h.exec("condor_status", Vec::<String>::new())?;
                h.assert(result.success(), "status exited 0")
            }))
            .check(Check::new("fails", |h| h.assert(false, "mount missing")))
            .check(Check::new("skipped", |_| Ok(())).skip_if(true, "not posix"))
            .check(Check::new("after_failure", |_| Ok(())))
            .run();

        assert_eq!(report.count(CheckStatus::Passed), 2);
        assert_eq!(report.count(CheckStatus::Failed), 1);
        assert_eq!(report.count(CheckStatus::Skipped), 1);
        assert!(!report.passed());
        assert_eq!(report.exit_code(), 1);

        let failed = &report.checks[1];
        assert_eq!(failed.message.as_deref(), Some("Assertion failed: mount missing"));
        assert_eq!(failed.code.as_deref(), Some("CVT-E203"));
        assert!(failed.log_path.as_ref().is_some_and(|p| p.is_file()));

        // Passing checks clean up their work directory by default.
        assert!(report.checks[0].log_path.is_none());
        assert_eq!(report.checks[2].message.as_deref(), Some("not posix"));
    }

    #[test]
    fn test_setup_runs_before_each_check_and_failure_skips_body() {
        let root = tempfile::tempdir().unwrap();
        let setups = Cell::new(0);
        let bodies = Cell::new(0);
        let report = Suite::with_runner("scheduler", config(root.path()), &AlwaysOk)
            .setup(|_| {
                setups.set(setups.get() + 1);
                if setups.get() == 2 {
                    return Err(HarnessError::Setup("schedd down".to_string()));
                }
                Ok(())
            })
            .check(Check::new("first", |_| {
                bodies.set(bodies.get() + 1);
                Ok(())
            }))
            .check(Check::new("second", |_| {
                bodies.set(bodies.get() + 1);
                Ok(())
            }))
            .run();

        assert_eq!(setups.get(), 2);
        assert_eq!(bodies.get(), 1);
        assert_eq!(report.checks[1].status, CheckStatus::Failed);
        assert_eq!(report.checks[1].message.as_deref(), Some("Setup failed: schedd down"));
    }

    #[test]
    fn test_coded_failure_and_rendering() {
        let root = tempfile::tempdir().unwrap();
        let report = Suite::with_runner("scheduler", config(root.path()), &AlwaysOk)
            .check(Check::new("sleep_jobs_complete", |h| {
                h.require(
                    false,
                    ErrorCode::TerminalJobsFailed,
                    "Job submission failed. 1 jobs failed. Error messages from logs:\nerrno=2",
                )
            }))
            .run();

        let text = report.render_text();
        assert!(text.starts_with("suite scheduler: 0 passed, 1 failed, 0 skipped"));
        assert!(text.contains("FAIL  sleep_jobs_complete [CVT-E200]"));
        assert!(text.contains("\n        errno=2"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["checks"][0]["status"], "failed");
        assert_eq!(json["checks"][0]["code"], "CVT-E200");
    }

    #[test]
    fn test_all_skipped_passes() {
        let root = tempfile::tempdir().unwrap();
        let suite = Suite::with_runner("execute", config(root.path()), &AlwaysOk)
            .check(Check::new("nfs_mounts_present", |_| Ok(())).skip_if(true, "windows"));
        assert_eq!(suite.check_names(), vec!["nfs_mounts_present"]);
        let report = suite.run();
        assert!(report.passed());
        assert_eq!(report.exit_code(), 0);
    }
}
