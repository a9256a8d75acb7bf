//! Cluster configuration.
//!
//! Values are layered, lowest precedence first: built-in defaults, a TOML
//! file, then `CVT_*` environment variables. The binary applies command-line
//! flags last. Every environment override is recorded with its origin so
//! `cvt -v` can explain where a setting came from.
//!
//! ```toml
//! [cluster]
//! user = "cluster.user"
//! roles = ["scheduler"]
//! shared_home = "/shared/home"
//!
//! [timeouts]
//! jobs = "30m"
//! poll_interval = "1s"
//! ```

pub mod env;
pub mod source;
pub mod validate;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ErrorCode;

pub use env::{EnvError, EnvParser};
pub use source::{ConfigSource, ConfigValueSource, Sourced};
pub use validate::{ConfigWarning, Severity, validate_config};

/// Variable naming an explicit config file.
pub const CONFIG_PATH_VAR: &str = "CVT_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid environment overrides:\n{}", join_lines(.0))]
    Env(Vec<EnvError>),

    #[error("invalid configuration:\n{}", join_lines(.0))]
    Invalid(Vec<ConfigWarning>),

    #[error("{field} is not configured; set it in the config file or via {env_var}")]
    Missing {
        field: &'static str,
        env_var: &'static str,
    },
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Read { .. } => ErrorCode::ConfigReadError,
            Self::Parse { .. } => ErrorCode::ConfigParseError,
            Self::Env(_) => ErrorCode::ConfigEnvError,
            Self::Invalid(_) | Self::Missing { .. } => ErrorCode::ConfigValidationError,
        }
    }
}

fn join_lines<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| format!("  - {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Durations in the file are humantime strings (`"90s"`, `"30m"`).
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::env::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterSection {
    /// Account the scheduler suite submits jobs as.
    pub user: String,
    /// Roles assigned to this node, e.g. `scheduler` or `execute`.
    pub roles: Vec<String>,
    /// Parent of the per-user home directories on the shared filesystem.
    pub shared_home: PathBuf,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            user: String::new(),
            roles: Vec::new(),
            shared_home: PathBuf::from("/shared/home"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSection {
    pub bin_dir: PathBuf,
    /// Windows installs live elsewhere and need forward slashes.
    pub windows_bin_dir: String,
    /// Submit description to copy into the user's home instead of the
    /// bundled sleep job.
    pub submit_file: Option<PathBuf>,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            bin_dir: PathBuf::from("/opt/condor/current/bin"),
            windows_bin_dir: "c:/condor/bin".to_string(),
            submit_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MountSection {
    /// Mount points that must be NFS on execute nodes.
    pub required: Vec<String>,
}

impl Default for MountSection {
    fn default() -> Self {
        Self {
            required: vec!["/shared".to_string(), "/sched".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutSection {
    #[serde(with = "duration_str")]
    pub schedd_ready: Duration,
    #[serde(with = "duration_str")]
    pub node_registration: Duration,
    /// Execute nodes can join the pool minutes before they accept work.
    #[serde(with = "duration_str")]
    pub jobs: Duration,
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
    /// Kill any single scheduler command that runs longer than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<u64>,
}

impl TimeoutSection {
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command.map(Duration::from_secs)
    }
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            schedd_ready: Duration::from_secs(60),
            node_registration: Duration::from_secs(5 * 60),
            jobs: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_secs(1),
            command: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessSection {
    /// Where per-check logs and command artifacts are written.
    pub artifacts_dir: PathBuf,
    pub cleanup_on_success: bool,
    pub cleanup_on_failure: bool,
}

impl Default for HarnessSection {
    fn default() -> Self {
        Self {
            artifacts_dir: std::env::temp_dir().join("cvt"),
            cleanup_on_success: true,
            cleanup_on_failure: false,
        }
    }
}

/// Everything the checks need to know about the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    pub cluster: ClusterSection,
    pub scheduler: SchedulerSection,
    pub mounts: MountSection,
    pub timeouts: TimeoutSection,
    pub harness: HarnessSection,
}

/// A loaded configuration plus how it was assembled.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ClusterConfig,
    /// File the base values came from, if any.
    pub file: Option<PathBuf>,
    /// Settings replaced by environment variables.
    pub overrides: Vec<ConfigValueSource>,
    /// Non-fatal validation findings.
    pub warnings: Vec<ConfigWarning>,
}

impl ClusterConfig {
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.expand_paths();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    /// `<config_dir>/cvt/config.toml`, e.g. `~/.config/cvt/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cvt").join("config.toml"))
    }

    /// Load and validate the configuration.
    ///
    /// `explicit` (from `--config`) and `CVT_CONFIG` must point at a readable
    /// file; the default location is optional. Environment overrides are
    /// applied on top, and any `Error`-severity finding fails the load.
    pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
        let env_path = std::env::var_os(CONFIG_PATH_VAR)
            .filter(|v| !v.is_empty())
            .map(|v| PathBuf::from(shellexpand::tilde(&v.to_string_lossy()).into_owned()));

        let (mut config, file) = match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => (Self::from_file(&path)?, Some(path)),
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => (Self::from_file(&path)?, Some(path)),
                None => (Self::default(), None),
            },
        };

        match &file {
            Some(path) => info!(path = %path.display(), "Loaded configuration file"),
            None => debug!("No configuration file found; using defaults"),
        }

        let mut parser = EnvParser::new();
        let overrides = config.apply_env(&mut parser);
        if parser.has_errors() {
            return Err(ConfigError::Env(parser.take_errors()));
        }

        let warnings = validate_config(&config);
        if warnings.iter().any(|w| w.severity == Severity::Error) {
            return Err(ConfigError::Invalid(
                warnings
                    .into_iter()
                    .filter(|w| w.severity == Severity::Error)
                    .collect(),
            ));
        }

        Ok(LoadedConfig {
            config,
            file,
            overrides,
            warnings,
        })
    }

    /// Replace values with `CVT_*` environment variables where set.
    ///
    /// Parse errors are left in `parser`; the current value is kept for any
    /// variable that fails to parse.
    pub fn apply_env(&mut self, parser: &mut EnvParser) -> Vec<ConfigValueSource> {
        let mut overrides = Vec::new();

        fn record<T: std::fmt::Debug>(
            overrides: &mut Vec<ConfigValueSource>,
            key: &'static str,
            sourced: &Sourced<T>,
        ) -> bool {
            if sourced.is_env() {
                overrides.push(ConfigValueSource {
                    key,
                    value: format!("{:?}", sourced.value),
                    source: sourced.source,
                    env_var: sourced.env_var.clone(),
                });
                true
            } else {
                false
            }
        }

        let user = parser.get_string("CLUSTER_USER", &self.cluster.user);
        if record(&mut overrides, "cluster.user", &user) {
            self.cluster.user = user.value;
        }

        let roles = parser.get_string_list("ROLES", self.cluster.roles.clone());
        if record(&mut overrides, "cluster.roles", &roles) {
            self.cluster.roles = roles.value;
        }

        let shared_home = parser.get_path(
            "SHARED_HOME",
            &self.cluster.shared_home.to_string_lossy(),
        );
        if record(&mut overrides, "cluster.shared_home", &shared_home) {
            self.cluster.shared_home = shared_home.value;
        }

        let bin_dir = parser.get_path(
            "CONDOR_BIN_DIR",
            &self.scheduler.bin_dir.to_string_lossy(),
        );
        if record(&mut overrides, "scheduler.bin_dir", &bin_dir) {
            self.scheduler.bin_dir = bin_dir.value;
        }

        let submit_file = parser.get_optional_string("SUBMIT_FILE");
        if record(&mut overrides, "scheduler.submit_file", &submit_file) {
            self.scheduler.submit_file = submit_file
                .value
                .map(|p| PathBuf::from(shellexpand::tilde(&p).into_owned()));
        }

        let mounts = parser.get_string_list("REQUIRED_MOUNTS", self.mounts.required.clone());
        if record(&mut overrides, "mounts.required", &mounts) {
            self.mounts.required = mounts.value;
        }

        let timeouts = &mut self.timeouts;
        for (name, key, slot) in [
            ("SCHEDD_TIMEOUT", "timeouts.schedd_ready", &mut timeouts.schedd_ready),
            (
                "NODE_TIMEOUT",
                "timeouts.node_registration",
                &mut timeouts.node_registration,
            ),
            ("JOBS_TIMEOUT", "timeouts.jobs", &mut timeouts.jobs),
            ("POLL_INTERVAL", "timeouts.poll_interval", &mut timeouts.poll_interval),
        ] {
            let value = parser.get_duration(name, *slot);
            if record(&mut overrides, key, &value) {
                *slot = value.value;
            }
        }

        let command = parser.get_u64_range(
            "COMMAND_TIMEOUT_SECS",
            timeouts.command.unwrap_or(0),
            0,
            24 * 60 * 60,
        );
        if record(&mut overrides, "timeouts.command", &command) {
            timeouts.command = (command.value > 0).then_some(command.value);
        }

        let artifacts = parser.get_path(
            "ARTIFACTS_DIR",
            &self.harness.artifacts_dir.to_string_lossy(),
        );
        if record(&mut overrides, "harness.artifacts_dir", &artifacts) {
            self.harness.artifacts_dir = artifacts.value;
        }

        let keep = parser.get_bool("KEEP_ARTIFACTS", !self.harness.cleanup_on_success);
        if record(&mut overrides, "harness.cleanup_on_success", &keep) {
            self.harness.cleanup_on_success = !keep.value;
        }

        for item in &overrides {
            debug!(key = item.key, env_var = ?item.env_var, value = %item.value, "Environment override");
        }
        overrides
    }

    fn expand_paths(&mut self) {
        let expand = |p: &Path| PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).into_owned());
        self.cluster.shared_home = expand(&self.cluster.shared_home);
        self.scheduler.bin_dir = expand(&self.scheduler.bin_dir);
        self.harness.artifacts_dir = expand(&self.harness.artifacts_dir);
        if let Some(file) = &self.scheduler.submit_file {
            self.scheduler.submit_file = Some(expand(file));
        }
    }

    /// Whether this node was given `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.cluster.roles.iter().any(|r| r == role)
    }

    /// The cluster user, required by anything that submits jobs.
    pub fn cluster_user(&self) -> Result<&str, ConfigError> {
        let user = self.cluster.user.trim();
        if user.is_empty() {
            Err(ConfigError::Missing {
                field: "cluster.user",
                env_var: "CVT_CLUSTER_USER",
            })
        } else {
            Ok(user)
        }
    }

    /// `<shared_home>/<user>`.
    pub fn user_home(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.cluster.shared_home.join(self.cluster_user()?))
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
