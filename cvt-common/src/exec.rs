//! Command execution with captured output.
//!
//! [`CommandRunner`] is the seam every check goes through to reach the
//! outside world: the scheduler CLI, `mount`, `hostname`. [`LocalRunner`]
//! spawns real processes; the check harness wraps it to log and archive each
//! invocation, and tests substitute scripted runners.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::errors::{CheckError, CheckResult};
use crate::util::mask_sensitive_command;

/// Exit code reported when a command is killed for exceeding its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Description of a command to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Run under this OS user's identity instead of the caller's.
    pub user: Option<String>,
    /// Kill the child after this long. `None` waits for it to exit.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Shell-quoted command line with secrets masked, for logs.
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(shell_escape::escape(self.program.as_str().into()).into_owned());
        parts.extend(
            self.args
                .iter()
                .map(|a| shell_escape::escape(a.as_str().into()).into_owned()),
        );
        mask_sensitive_command(&parts.join(" "))
    }
}

/// Result of a command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl CommandResult {
    /// Check if the command succeeded (exit code 0)
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_contains(&self, pattern: &str) -> bool {
        self.stdout.contains(pattern)
    }

    pub fn stderr_contains(&self, pattern: &str) -> bool {
        self.stderr.contains(pattern)
    }

    /// Get combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }

    /// Turn a non-zero exit into [`CheckError::CommandFailed`].
    pub fn checked(self, spec: &CommandSpec) -> CheckResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(CheckError::CommandFailed {
                command: spec.display(),
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Something that can run a [`CommandSpec`] and capture its output.
///
/// Implementations never treat a non-zero exit as an error; callers that
/// want check-call semantics use [`CommandRunner::check`].
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> CheckResult<CommandResult>;

    /// Run and fail on a non-zero exit code.
    fn check(&self, spec: &CommandSpec) -> CheckResult<CommandResult> {
        self.run(spec)?.checked(spec)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, spec: &CommandSpec) -> CheckResult<CommandResult> {
        (**self).run(spec)
    }
}

/// Runs commands as local child processes.
#[derive(Debug, Clone, Default)]
pub struct LocalRunner {
    default_cwd: Option<PathBuf>,
}

impl LocalRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory used when a spec does not name one.
    #[must_use]
    pub fn with_default_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_cwd = Some(dir.into());
        self
    }

    fn build(&self, spec: &CommandSpec) -> CheckResult<Command> {
        let cwd = spec.cwd.as_deref().or(self.default_cwd.as_deref());

        let mut cmd = match &spec.user {
            Some(user) => {
                let scope = crate::identity::IdentityScope::for_user(user, cwd)?;
                scope.command(&spec.program)
            }
            None => {
                let mut cmd = Command::new(&spec.program);
                if let Some(dir) = cwd {
                    cmd.current_dir(dir);
                }
                cmd
            }
        };

        cmd.args(&spec.args);
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }
        Ok(cmd)
    }
}

impl CommandRunner for LocalRunner {
    fn run(&self, spec: &CommandSpec) -> CheckResult<CommandResult> {
        let cmd = self.build(spec)?;
        debug!(command = %spec.display(), user = ?spec.user, "Executing");
        let result = capture(cmd, &spec.program, spec.timeout)?;
        debug!(
            command = %spec.display(),
            exit_code = result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            timed_out = result.timed_out,
            "Command completed"
        );
        Ok(result)
    }
}

/// Spawn `cmd` with piped output and wait for it.
///
/// Both streams are drained on their own threads so a chatty child cannot
/// block on a full pipe. With a timeout the child is killed once it elapses
/// and the result carries exit code [`TIMEOUT_EXIT_CODE`].
pub fn capture(
    mut cmd: Command,
    program: &str,
    timeout: Option<Duration>,
) -> CheckResult<CommandResult> {
    let start = Instant::now();

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|source| CheckError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let stdout_handle = child
        .stdout
        .take()
        .map(|mut stdout| thread::spawn(move || read_to_string(&mut stdout)));
    let stderr_handle = child
        .stderr
        .take()
        .map(|mut stderr| thread::spawn(move || read_to_string(&mut stderr)));

    let mut timed_out = false;
    let exit_status = match timeout {
        None => Some(child.wait()?),
        Some(limit) => loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }

            if start.elapsed() >= limit {
                timed_out = true;
                let _ = child.kill();
                break child.wait().ok();
            }

            thread::sleep(Duration::from_millis(10));
        },
    };

    let duration = start.elapsed();
    let stdout = join_output(stdout_handle);
    let mut stderr = join_output(stderr_handle);
    if timed_out {
        if !stderr.is_empty() {
            stderr.push('\n');
        }
        if let Some(limit) = timeout {
            stderr.push_str(&format!("Process timed out after {limit:?}."));
        }
    }

    let exit_code = exit_status
        .and_then(|status| status.code())
        .unwrap_or(if timed_out { TIMEOUT_EXIT_CODE } else { -1 });

    trace!(program, exit_code, "captured {} stdout bytes", stdout.len());

    Ok(CommandResult {
        exit_code,
        stdout,
        stderr,
        duration,
        timed_out,
    })
}

fn read_to_string<R: Read>(reader: &mut R) -> String {
    let mut buffer = Vec::new();
    if reader.read_to_end(&mut buffer).is_ok() {
        String::from_utf8_lossy(&buffer).to_string()
    } else {
        String::new()
    }
}

fn join_output(handle: Option<thread::JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.join().unwrap_or_default(),
        None => String::new(),
    }
}

/// Read a whole text file, attaching the path to any error.
pub fn read_text(path: &Path) -> CheckResult<String> {
    std::fs::read_to_string(path).map_err(|source| CheckError::File {
        path: path.to_path_buf(),
        source,
    })
}
