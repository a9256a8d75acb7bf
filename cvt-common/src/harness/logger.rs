//! Per-check structured log.
//!
//! Each check gets its own JSONL file under the harness work directory plus
//! an `artifacts/` folder holding the full stdout, stderr and a JSON trace of
//! every command it ran. Entries are mirrored to `tracing` as they happen so
//! the console shows progress and the JSONL file is the durable record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.pad(s)
    }
}

/// Who produced a log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    Harness,
    /// Output line from a command the check ran.
    CommandStdout { program: String },
    CommandStderr { program: String },
    /// Message from the check body itself.
    Check,
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSource::Harness => write!(f, "harness"),
            LogSource::CommandStdout { program } => write!(f, "{program}:stdout"),
            LogSource::CommandStderr { program } => write!(f, "{program}:stderr"),
            LogSource::Check => write!(f, "check"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since the check started.
    pub elapsed_ms: u64,
    pub level: LogLevel,
    pub source: LogSource,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<CheckPhase>,
    /// Stable tag for machine filtering, e.g. `CMD_FAILURE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifact_paths: Vec<String>,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>6}ms] [{:<5}] [{}] {}",
            self.elapsed_ms, self.level, self.source, self.message
        )?;
        if !self.context.is_empty() {
            write!(f, " {{")?;
            for (i, (k, v)) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{k}={v}")?;
            }
            write!(f, "}}")?;
        }
        Ok(())
    }
}

/// Lifecycle phase of a check, mirroring setUp / test body / tearDown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckPhase {
    Setup,
    Execute,
    Verify,
    Cleanup,
}

impl fmt::Display for CheckPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Self::Setup => "setup",
            Self::Execute => "execute",
            Self::Verify => "verify",
            Self::Cleanup => "cleanup",
        };
        write!(f, "{phase}")
    }
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub min_level: LogLevel,
    /// Forward entries to `tracing` as they are logged.
    pub mirror_to_tracing: bool,
    /// Entries kept in memory (0 = unlimited).
    pub max_entries: usize,
    /// Directory for the JSONL file and artifacts. `None` keeps everything
    /// in memory.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Debug,
            mirror_to_tracing: true,
            max_entries: 10_000,
            log_dir: None,
        }
    }
}

/// Structured logger for one check.
pub struct CheckLogger {
    config: LoggerConfig,
    entries: RefCell<VecDeque<LogEntry>>,
    start_time: Instant,
    check_name: String,
    file_writer: RefCell<Option<BufWriter<File>>>,
    log_path: Option<PathBuf>,
    artifact_root: Option<PathBuf>,
}

impl CheckLogger {
    pub fn new(check_name: &str, config: LoggerConfig) -> Self {
        let mut file_writer = None;
        let mut log_path = None;
        let mut artifact_root = None;

        if let Some(ref dir) = config.log_dir {
            match fs::create_dir_all(dir) {
                Ok(()) => {
                    let path = dir.join(format!("{}.jsonl", sanitize_component(check_name)));
                    match File::create(&path) {
                        Ok(file) => {
                            file_writer = Some(BufWriter::new(file));
                            log_path = Some(path);
                        }
                        Err(error) => {
                            tracing::warn!(path = %path.display(), %error, "Cannot create check log");
                        }
                    }

                    let artifacts_dir = dir.join("artifacts");
                    if fs::create_dir_all(&artifacts_dir).is_ok() {
                        artifact_root = Some(artifacts_dir);
                    }
                }
                Err(error) => {
                    tracing::warn!(dir = %dir.display(), %error, "Cannot create check log directory");
                }
            }
        }

        Self {
            config,
            entries: RefCell::new(VecDeque::new()),
            start_time: Instant::now(),
            check_name: check_name.to_string(),
            file_writer: RefCell::new(file_writer),
            log_path,
            artifact_root,
        }
    }

    /// In-memory logger that does not mirror to `tracing`.
    pub fn in_memory(check_name: &str) -> Self {
        Self::new(
            check_name,
            LoggerConfig {
                mirror_to_tracing: false,
                ..Default::default()
            },
        )
    }

    pub fn check_name(&self) -> &str {
        &self.check_name
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub fn log(&self, level: LogLevel, source: LogSource, message: impl Into<String>) {
        self.log_with_context(level, source, message, Vec::new());
    }

    pub fn log_with_context(
        &self,
        level: LogLevel,
        source: LogSource,
        message: impl Into<String>,
        context: Vec<(String, String)>,
    ) {
        self.record(LogEntry {
            timestamp: Utc::now(),
            elapsed_ms: self.start_time.elapsed().as_millis() as u64,
            level,
            source,
            message: message.into(),
            phase: None,
            decision_code: None,
            context,
            artifact_paths: Vec::new(),
        });
    }

    /// Log a lifecycle event tagged with a decision code.
    pub fn log_phase(
        &self,
        level: LogLevel,
        phase: CheckPhase,
        message: impl Into<String>,
        decision_code: &str,
        artifact_paths: Vec<String>,
    ) {
        self.record(LogEntry {
            timestamp: Utc::now(),
            elapsed_ms: self.start_time.elapsed().as_millis() as u64,
            level,
            source: LogSource::Harness,
            message: format!("[{phase}] {}", message.into()),
            phase: Some(phase),
            decision_code: Some(decision_code.to_string()),
            context: Vec::new(),
            artifact_paths,
        });
    }

    fn record(&self, entry: LogEntry) {
        if entry.level < self.config.min_level {
            return;
        }

        if self.config.mirror_to_tracing {
            self.mirror(&entry);
        }

        if let Some(ref mut w) = *self.file_writer.borrow_mut()
            && let Ok(json) = serde_json::to_string(&entry)
        {
            let _ = writeln!(w, "{json}");
            let _ = w.flush();
        }

        let mut entries = self.entries.borrow_mut();
        entries.push_back(entry);
        if self.config.max_entries > 0 && entries.len() > self.config.max_entries {
            entries.pop_front();
        }
    }

    fn mirror(&self, entry: &LogEntry) {
        let check = self.check_name.as_str();
        let source = entry.source.to_string();
        let message = entry.message.as_str();
        match entry.level {
            LogLevel::Trace => tracing::trace!(check, %source, "{message}"),
            LogLevel::Debug => tracing::debug!(check, %source, "{message}"),
            LogLevel::Info => tracing::info!(check, %source, "{message}"),
            LogLevel::Warn => tracing::warn!(check, %source, "{message}"),
            LogLevel::Error => tracing::error!(check, %source, "{message}"),
        }
    }

    /// Write `content` to `artifacts/<name>.txt`.
    pub fn capture_artifact_text(&self, name: &str, content: &str) -> std::io::Result<PathBuf> {
        let path = self.artifact_path(name, "txt")?;
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Write `value` as pretty JSON to `artifacts/<name>.json`.
    pub fn capture_artifact_json<T: Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> std::io::Result<PathBuf> {
        let serialized = serde_json::to_string_pretty(value).map_err(|error| {
            std::io::Error::other(format!("failed to serialize artifact json: {error}"))
        })?;
        let path = self.artifact_path(name, "json")?;
        fs::write(&path, serialized)?;
        Ok(path)
    }

    fn artifact_path(&self, name: &str, extension: &str) -> std::io::Result<PathBuf> {
        let Some(root) = self.artifact_root.as_deref() else {
            return Err(std::io::Error::other(
                "artifact capture requires a log directory",
            ));
        };
        Ok(root.join(format!("{}.{extension}", sanitize_component(name))))
    }

    pub fn trace(&self, message: impl Into<String>) {
        self.log(LogLevel::Trace, LogSource::Harness, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, LogSource::Harness, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, LogSource::Harness, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, LogSource::Harness, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, LogSource::Harness, message);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.borrow().iter().cloned().collect()
    }
}

pub(crate) fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "artifact".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_levels_order() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn test_entries_keep_level_and_source() {
        let logger = CheckLogger::in_memory("levels");
        logger.info("Waiting for schedd");
        logger.warn("Schedd not ready yet");
        logger.error("Schedd never became ready");

        let entries = logger.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries.iter().map(|e| e.level).collect::<Vec<_>>(),
            vec![LogLevel::Info, LogLevel::Warn, LogLevel::Error]
        );
        assert!(entries.iter().all(|e| e.source == LogSource::Harness));
    }

    #[test]
    fn test_min_level_filters() {
        let logger = CheckLogger::new(
            "filtering",
            LoggerConfig {
                min_level: LogLevel::Info,
                mirror_to_tracing: false,
                ..Default::default()
            },
        );
        logger.trace("t");
        logger.debug("d");
        logger.info("i");
        assert_eq!(logger.entries().len(), 1);
    }

    #[test]
    fn test_max_entries_drops_oldest() {
        let logger = CheckLogger::new(
            "bounded",
            LoggerConfig {
                mirror_to_tracing: false,
                max_entries: 2,
                ..Default::default()
            },
        );
        logger.info("one");
        logger.info("two");
        logger.info("three");
        let messages: Vec<String> = logger.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["two", "three"]);
    }

    #[test]
    fn test_jsonl_file_and_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let logger = CheckLogger::new(
            "scheduler::sleep jobs",
            LoggerConfig {
                mirror_to_tracing: false,
                log_dir: Some(dir.path().to_path_buf()),
                ..Default::default()
            },
        );
        logger.log_phase(
            LogLevel::Info,
            CheckPhase::Verify,
            "Assertion passed",
            "ASSERT_PASS",
            Vec::new(),
        );

        let log_path = logger.log_path().unwrap().to_path_buf();
        assert_eq!(log_path.file_name().unwrap(), "scheduler__sleep_jobs.jsonl");
        let line = std::fs::read_to_string(&log_path).unwrap();
        let entry: LogEntry = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(entry.phase, Some(CheckPhase::Verify));
        assert_eq!(entry.decision_code.as_deref(), Some("ASSERT_PASS"));
        assert_eq!(entry.message, "[verify] Assertion passed");

        let text = logger.capture_artifact_text("001 condor_q stdout", "ok").unwrap();
        assert_eq!(std::fs::read_to_string(&text).unwrap(), "ok");
        assert!(text.ends_with("artifacts/001_condor_q_stdout.txt"));

        let json = logger
            .capture_artifact_json("trace", &serde_json::json!({"exit_code": 0}))
            .unwrap();
        assert!(std::fs::read_to_string(json).unwrap().contains("\"exit_code\": 0"));
    }

    #[test]
    fn test_artifacts_need_log_dir() {
        let logger = CheckLogger::in_memory("no_dir");
        assert!(logger.capture_artifact_text("x", "y").is_err());
    }

    #[test]
    fn test_entry_display() {
        let entry = LogEntry {
            timestamp: Utc::now(),
            elapsed_ms: 12,
            level: LogLevel::Warn,
            source: LogSource::CommandStderr {
                program: "condor_q".to_string(),
            },
            message: "no schedd".to_string(),
            phase: None,
            decision_code: None,
            context: vec![("exit_code".to_string(), "1".to_string())],
            artifact_paths: Vec::new(),
        };
        assert_eq!(
            entry.to_string(),
            "[    12ms] [WARN ] [condor_q:stderr] no schedd {exit_code=1}"
        );
    }
}
