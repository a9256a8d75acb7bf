//! Sanity checks on a loaded [`ClusterConfig`].

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::ClusterConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigWarning {
    pub severity: Severity,
    /// Dotted key, e.g. `timeouts.jobs`.
    pub field: &'static str,
    pub message: String,
}

impl ConfigWarning {
    fn new(severity: Severity, field: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity,
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.field, self.message)
    }
}

/// Check `config` and return every problem found, most severe first.
///
/// `Error` entries make the configuration unusable; the rest are advisory.
pub fn validate_config(config: &ClusterConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if config.cluster.user.trim().is_empty() {
        warnings.push(ConfigWarning::new(
            Severity::Warning,
            "cluster.user",
            "no cluster user configured; the scheduler suite cannot submit jobs",
        ));
    }

    if !config.cluster.shared_home.is_absolute() {
        warnings.push(ConfigWarning::new(
            Severity::Error,
            "cluster.shared_home",
            format!(
                "must be an absolute path, got {}",
                config.cluster.shared_home.display()
            ),
        ));
    }

    if !config.scheduler.bin_dir.is_absolute() {
        warnings.push(ConfigWarning::new(
            Severity::Error,
            "scheduler.bin_dir",
            format!(
                "must be an absolute path, got {}",
                config.scheduler.bin_dir.display()
            ),
        ));
    }

    for mount in &config.mounts.required {
        if !mount.starts_with('/') {
            warnings.push(ConfigWarning::new(
                Severity::Error,
                "mounts.required",
                format!("mount point '{mount}' is not absolute"),
            ));
        }
    }

    let timeouts = &config.timeouts;
    for (field, value) in [
        ("timeouts.schedd_ready", timeouts.schedd_ready),
        ("timeouts.node_registration", timeouts.node_registration),
        ("timeouts.jobs", timeouts.jobs),
    ] {
        if value.is_zero() {
            warnings.push(ConfigWarning::new(
                Severity::Error,
                field,
                "must be greater than zero",
            ));
        }
    }

    if timeouts.jobs < Duration::from_secs(5 * 60) && !timeouts.jobs.is_zero() {
        warnings.push(ConfigWarning::new(
            Severity::Warning,
            "timeouts.jobs",
            "execute nodes can take several minutes to accept work; short job timeouts cause spurious failures",
        ));
    }

    if timeouts.poll_interval >= timeouts.schedd_ready && !timeouts.schedd_ready.is_zero() {
        warnings.push(ConfigWarning::new(
            Severity::Warning,
            "timeouts.poll_interval",
            "poll interval is not shorter than the scheduler readiness timeout; only one attempt will be made",
        ));
    }

    if timeouts.poll_interval.is_zero() {
        warnings.push(ConfigWarning::new(
            Severity::Info,
            "timeouts.poll_interval",
            "zero interval polls without sleeping",
        ));
    }

    warnings.sort_by(|a, b| b.severity.cmp(&a.severity));
    warnings
}
