//! Running commands as another OS user.
//!
//! Submitting jobs must happen as the cluster user, not root. An
//! [`IdentityScope`] resolves the target account once and then hands out
//! [`Command`]s whose child process switches to that uid/gid before exec.
//! The calling process never changes its own credentials, so there is
//! nothing to restore when a spawn fails or a check panics.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::errors::{CheckError, CheckResult};
use crate::exec::{CommandResult, CommandRunner, CommandSpec};

/// Account details needed to impersonate a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    /// Working directory for commands run as this user.
    pub cwd: PathBuf,
}

impl UserProfile {
    /// Resolve `user` from the system user database.
    ///
    /// `cwd` defaults to the user's home directory.
    #[cfg(unix)]
    pub fn lookup(user: &str, cwd: Option<&Path>) -> CheckResult<Self> {
        let record = nix::unistd::User::from_name(user)
            .map_err(|errno| CheckError::UserLookup {
                user: user.to_string(),
                reason: errno.desc().to_string(),
            })?
            .ok_or_else(|| CheckError::UserLookup {
                user: user.to_string(),
                reason: "no such user".to_string(),
            })?;

        let cwd = cwd.map(Path::to_path_buf).unwrap_or_else(|| record.dir.clone());
        Ok(Self {
            name: record.name,
            uid: record.uid.as_raw(),
            gid: record.gid.as_raw(),
            home: record.dir,
            cwd,
        })
    }

    #[cfg(not(unix))]
    pub fn lookup(_user: &str, _cwd: Option<&Path>) -> CheckResult<Self> {
        Err(CheckError::Unsupported {
            operation: "user impersonation",
            platform: std::env::consts::OS.to_string(),
        })
    }

    /// Login variables a shell would set for this user.
    ///
    /// Layered over the caller's environment; everything else is inherited.
    pub fn login_env(&self) -> [(&'static str, String); 4] {
        [
            ("HOME", self.home.display().to_string()),
            ("LOGNAME", self.name.clone()),
            ("PWD", self.cwd.display().to_string()),
            ("USER", self.name.clone()),
        ]
    }
}

/// Builds commands that run under a [`UserProfile`].
#[derive(Debug, Clone)]
pub struct IdentityScope {
    profile: UserProfile,
    switch_credentials: bool,
}

impl IdentityScope {
    pub fn new(profile: UserProfile) -> Self {
        let switch_credentials = !is_current_user(&profile.name);
        Self {
            profile,
            switch_credentials,
        }
    }

    /// Look up `user` and open a scope for it.
    pub fn for_user(user: &str, cwd: Option<&Path>) -> CheckResult<Self> {
        Ok(Self::new(UserProfile::lookup(user, cwd)?))
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    /// A [`Command`] for `program` that will execute as the scoped user.
    pub fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.current_dir(&self.profile.cwd);
        cmd.envs(self.profile.login_env());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            if self.switch_credentials {
                cmd.gid(self.profile.gid).uid(self.profile.uid);
            }
        }

        debug!(
            user = %self.profile.name,
            uid = self.profile.uid,
            gid = self.profile.gid,
            switch = self.switch_credentials,
            program,
            "Prepared command under user identity"
        );
        cmd
    }
}

/// Login name of the account this process runs as.
#[cfg(unix)]
pub fn current_user() -> CheckResult<String> {
    whoami::username().map_err(|err| CheckError::UserLookup {
        user: format!("uid {}", nix::unistd::getuid()),
        reason: err.to_string(),
    })
}

#[cfg(not(unix))]
pub fn current_user() -> CheckResult<String> {
    Err(CheckError::Unsupported {
        operation: "user lookup",
        platform: std::env::consts::OS.to_string(),
    })
}

fn is_current_user(name: &str) -> bool {
    current_user().is_ok_and(|current| current == name)
}

fn as_user_spec(argv: &[&str], user: &str, cwd: Option<&Path>) -> CommandSpec {
    let (program, args) = argv.split_first().map_or(("", &[][..]), |(p, a)| (*p, a));
    let mut spec = CommandSpec::new(program)
        .args(args.iter().copied())
        .as_user(user);
    if let Some(dir) = cwd {
        spec = spec.current_dir(dir);
    }
    spec
}

/// Run `argv` as `user`, capturing output without judging the exit code.
pub fn run_as_user<R: CommandRunner + ?Sized>(
    runner: &R,
    argv: &[&str],
    user: &str,
    cwd: Option<&Path>,
) -> CheckResult<CommandResult> {
    runner.run(&as_user_spec(argv, user, cwd))
}

/// Run `argv` as `user`, failing on a non-zero exit.
pub fn check_call_as<R: CommandRunner + ?Sized>(
    runner: &R,
    argv: &[&str],
    user: &str,
    cwd: Option<&Path>,
) -> CheckResult<()> {
    runner.check(&as_user_spec(argv, user, cwd)).map(|_| ())
}

/// Run `argv` as `user` and return its stdout, failing on a non-zero exit.
pub fn check_output_as<R: CommandRunner + ?Sized>(
    runner: &R,
    argv: &[&str],
    user: &str,
    cwd: Option<&Path>,
) -> CheckResult<String> {
    runner
        .check(&as_user_spec(argv, user, cwd))
        .map(|result| result.stdout)
}

/// Give ownership of `path` to the profile's user and group.
#[cfg(unix)]
pub fn chown_to(path: &Path, profile: &UserProfile) -> CheckResult<()> {
    use nix::unistd::{Gid, Uid, chown};

    chown(
        path,
        Some(Uid::from_raw(profile.uid)),
        Some(Gid::from_raw(profile.gid)),
    )
    .map_err(|errno| CheckError::File {
        path: path.to_path_buf(),
        source: std::io::Error::from(errno),
    })
}

#[cfg(not(unix))]
pub fn chown_to(_path: &Path, _profile: &UserProfile) -> CheckResult<()> {
    Err(CheckError::Unsupported {
        operation: "chown",
        platform: std::env::consts::OS.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::time::Duration;

    struct Recording {
        seen: RefCell<Vec<CommandSpec>>,
        exit_code: i32,
    }

    impl CommandRunner for Recording {
        fn run(&self, spec: &CommandSpec) -> CheckResult<CommandResult> {
            self.seen.borrow_mut().push(spec.clone());
            Ok(CommandResult {
                exit_code: self.exit_code,
                stdout: "UserLog = \"/tmp/a.log\"\n".to_string(),
                stderr: "denied".to_string(),
                duration: Duration::ZERO,
                timed_out: false,
            })
        }
    }

    fn sample_profile() -> UserProfile {
        UserProfile {
            name: "cluster.user".to_string(),
            uid: 20001,
            gid: 20001,
            home: PathBuf::from("/shared/home/cluster.user"),
            cwd: PathBuf::from("/shared/home/cluster.user"),
        }
    }

    #[test]
    fn test_login_env_overrides_identity_variables() {
        let env = sample_profile().login_env();
        assert_eq!(env[0], ("HOME", "/shared/home/cluster.user".to_string()));
        assert_eq!(env[1], ("LOGNAME", "cluster.user".to_string()));
        assert_eq!(env[2], ("PWD", "/shared/home/cluster.user".to_string()));
        assert_eq!(env[3], ("USER", "cluster.user".to_string()));
    }

    #[test]
    fn test_check_output_as_passes_user_and_cwd() {
        let runner = Recording {
            seen: RefCell::new(Vec::new()),
            exit_code: 0,
        };
        let out = check_output_as(
            &runner,
            &["condor_submit", "-verbose", "sleep.sub"],
            "cluster.user",
            Some(Path::new("/shared/home/cluster.user")),
        )
        .unwrap();
        assert!(out.contains("UserLog"));

        let seen = runner.seen.borrow();
        assert_eq!(seen[0].program, "condor_submit");
        assert_eq!(seen[0].args, vec!["-verbose", "sleep.sub"]);
        assert_eq!(seen[0].user.as_deref(), Some("cluster.user"));
        assert_eq!(
            seen[0].cwd.as_deref(),
            Some(Path::new("/shared/home/cluster.user"))
        );
    }

    #[test]
    fn test_check_call_as_raises_on_failure() {
        let runner = Recording {
            seen: RefCell::new(Vec::new()),
            exit_code: 2,
        };
        let err = check_call_as(&runner, &["true"], "nobody", None).unwrap_err();
        assert!(matches!(err, CheckError::CommandFailed { exit_code: 2, .. }));
    }

    #[test]
    fn test_run_as_user_does_not_raise() {
        let runner = Recording {
            seen: RefCell::new(Vec::new()),
            exit_code: 2,
        };
        let result = run_as_user(&runner, &["true"], "nobody", None).unwrap();
        assert_eq!(result.exit_code, 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_unknown_user_lookup_fails() {
        let err = UserProfile::lookup("cvt-no-such-user-xyz", None).unwrap_err();
        assert!(matches!(err, CheckError::UserLookup { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_current_user_resolves_in_user_database() {
        let me = current_user().unwrap();
        let profile = UserProfile::lookup(&me, None).unwrap();
        assert_eq!(profile.uid, nix::unistd::getuid().as_raw());
        assert_eq!(profile.cwd, profile.home);
    }

    #[cfg(unix)]
    #[test]
    fn test_scope_for_current_user_runs_without_switching() {
        let me = current_user().unwrap();
        let scope = IdentityScope::for_user(&me, Some(Path::new("/"))).unwrap();
        assert!(!scope.switch_credentials);
        let output = scope.command("pwd").output().unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "/");
    }
}
