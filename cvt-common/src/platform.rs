//! Per-OS differences: scheduler binary locations, hostname lookup, shell.

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::config::ClusterConfig;
use crate::errors::CheckResult;
use crate::exec::{CommandRunner, CommandSpec};

/// The scheduler reports at most this many characters of a Windows
/// computer name.
pub const WINDOWS_HOSTNAME_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Posix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }

    pub fn is_posix(&self) -> bool {
        matches!(self, Self::Posix)
    }

    /// Wrap a command line for the platform shell.
    pub fn shell(&self, line: &str) -> CommandSpec {
        match self {
            Self::Posix => CommandSpec::new("sh").args(["-c", line]),
            Self::Windows => CommandSpec::new("cmd").args(["/C", line]),
        }
    }

    fn hostname_command(&self) -> CommandSpec {
        match self {
            Self::Posix => CommandSpec::new("hostname").arg("-s"),
            // Plain `hostname` is unreliable here; go through the shell.
            Self::Windows => self.shell("echo %COMPUTERNAME%"),
        }
    }

    /// Short hostname, as the scheduler lists it in `condor_status`.
    pub fn hostname<R: CommandRunner + ?Sized>(&self, runner: &R) -> CheckResult<String> {
        let output = runner.check(&self.hostname_command())?.stdout;
        Ok(self.normalize_hostname(&output))
    }

    fn normalize_hostname(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        match self {
            Self::Posix => trimmed.to_string(),
            Self::Windows => trimmed.chars().take(WINDOWS_HOSTNAME_LEN).collect(),
        }
    }

    fn binary(&self, config: &ClusterConfig, name: &str) -> String {
        match self {
            Self::Posix => config.scheduler.bin_dir.join(name).display().to_string(),
            // Forward slashes only: the same path with backslashes fails.
            Self::Windows => format!(
                "{}/{name}.exe",
                config.scheduler.windows_bin_dir.trim_end_matches(['/', '\\'])
            ),
        }
    }

    pub fn status_command(&self, config: &ClusterConfig) -> CommandSpec {
        CommandSpec::new(self.binary(config, "condor_status"))
    }

    pub fn queue_command(&self, config: &ClusterConfig) -> CommandSpec {
        CommandSpec::new(self.binary(config, "condor_q"))
    }

    pub fn submit_command(&self, config: &ClusterConfig, submit_file: &Path) -> CommandSpec {
        CommandSpec::new(self.binary(config, "condor_submit"))
            .arg("-verbose")
            .arg(submit_file.display().to_string())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Posix => "posix",
            Self::Windows => "windows",
        })
    }
}

/// Whether `host` appears in `output`, ignoring case.
///
/// Windows nodes show up in either case depending on how they registered.
pub fn hostname_matches(output: &str, host: &str) -> bool {
    !host.is_empty() && output.to_lowercase().contains(&host.to_lowercase())
}
