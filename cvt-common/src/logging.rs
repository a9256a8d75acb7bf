//! Process-wide `tracing` setup for the `cvt` binary.
//!
//! Human-readable or JSON lines go to stderr so stdout stays clean for
//! command output (`classify`, `parse-submit`). An optional JSON file sink
//! runs on a background writer whose guard must outlive `main`.

use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::EnvParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" | "compact" => Ok(Self::Pretty),
            "json" | "jsonl" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}' (expected pretty or json)")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("cannot create log directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("log file path {} has no file name", .0.display())]
    NoFileName(PathBuf),

    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Settings for [`init_logging`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
    pub stderr: bool,
    /// Problems found while reading `CVT_LOG_*`; reported once logging is up.
    env_problems: Vec<String>,
}

impl LogConfig {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            format: LogFormat::default(),
            file: None,
            stderr: false,
            env_problems: Vec::new(),
        }
    }

    /// Read `CVT_LOG_LEVEL`, `CVT_LOG_FORMAT` and `CVT_LOG_FILE`.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        let level = parser.get_log_level("LOG_LEVEL", default_level).value;
        let file = parser
            .get_optional_string("LOG_FILE")
            .value
            .map(|p| PathBuf::from(shellexpand::tilde(&p).into_owned()));

        let mut env_problems: Vec<String> =
            parser.take_errors().iter().map(ToString::to_string).collect();

        let raw_format = parser.get_string("LOG_FORMAT", "pretty");
        let format = raw_format.value.parse().unwrap_or_else(|e: String| {
            env_problems.push(format!("{}: {e}", parser.var_name("LOG_FORMAT")));
            LogFormat::Pretty
        });

        Self {
            level,
            format,
            file,
            stderr: false,
            env_problems,
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    /// `RUST_LOG` wins when set; otherwise our crates log at `level` and
    /// everything else at `warn`.
    fn filter(&self) -> EnvFilter {
        if std::env::var_os("RUST_LOG").is_some() {
            if let Ok(filter) = EnvFilter::try_from_default_env() {
                return filter;
            }
        }
        let directives = format!("warn,cvt={0},cvt_common={0}", self.level);
        EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Keeps background log writers alive. Drop it last.
#[must_use = "dropping the guards stops file logging"]
#[derive(Default)]
pub struct LoggingGuards {
    _workers: Vec<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards, LoggingError> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut guards = LoggingGuards::default();

    if config.stderr {
        let layer = match config.format {
            LogFormat::Pretty => tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact()
                .with_filter(config.filter())
                .boxed(),
            LogFormat::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_filter(config.filter())
                .boxed(),
        };
        layers.push(layer);
    }

    if let Some(path) = &config.file {
        let (dir, name) = split_log_path(path)?;
        std::fs::create_dir_all(&dir).map_err(|source| LoggingError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        let appender = tracing_appender::rolling::never(&dir, name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards._workers.push(guard);
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(config.filter())
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    for problem in &config.env_problems {
        warn!("{problem}");
    }
    Ok(guards)
}

fn split_log_path(path: &Path) -> Result<(PathBuf, &std::ffi::OsStr), LoggingError> {
    let name = path
        .file_name()
        .ok_or_else(|| LoggingError::NoFileName(path.to_path_buf()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, name))
}
