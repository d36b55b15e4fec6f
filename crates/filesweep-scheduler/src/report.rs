//! Outcome reporting — the narrow interface jobs use to record results.
//! Sinks are fire-and-forget: a failing sink logs a warning and never hands an
//! error back to the job or the scheduler.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use filesweep_core::{SinkKind, SweepConfig};
use serde::{Deserialize, Serialize};

/// Severity attached to a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportLevel {
    Info,
    Warning,
    Error,
}

/// Receives task events. Implementations must not panic and must swallow
/// their own failures.
pub trait ReportSink: Send + Sync {
    fn report(&self, task_id: &str, details: &serde_json::Value, status: &str, level: ReportLevel);
}

/// A single recorded event, as written by [`FileSink`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEvent {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub status: String,
    pub level: ReportLevel,
    pub details: serde_json::Value,
}

/// Reports into the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn report(&self, task_id: &str, details: &serde_json::Value, status: &str, level: ReportLevel) {
        match level {
            ReportLevel::Info => tracing::info!(task = task_id, %details, "📋 {status}"),
            ReportLevel::Warning => tracing::warn!(task = task_id, %details, "⚠️ {status}"),
            ReportLevel::Error => tracing::error!(task = task_id, %details, "❌ {status}"),
        }
    }
}

/// Appends one JSON object per line to a report file.
pub struct FileSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")
    }
}

impl ReportSink for FileSink {
    fn report(&self, task_id: &str, details: &serde_json::Value, status: &str, level: ReportLevel) {
        let event = ReportEvent {
            timestamp: Utc::now(),
            task_id: task_id.to_string(),
            status: status.to_string(),
            level,
            details: details.clone(),
        };
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("⚠️ Failed to encode report for '{task_id}': {e}");
                return;
            }
        };

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match self.append(&line) {
            Ok(()) => tracing::debug!("📝 Report for '{task_id}' written to {}", self.path.display()),
            Err(e) => tracing::warn!("⚠️ Failed to write report to {}: {e}", self.path.display()),
        }
    }
}

/// Build the sink selected in the config.
pub fn sink_from_config(config: &SweepConfig) -> Arc<dyn ReportSink> {
    match config.report.sink {
        SinkKind::Log => Arc::new(LogSink),
        SinkKind::File => Arc::new(FileSink::new(config.report_path())),
    }
}

/// Keeps every event in memory; used by tests across the crate.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemorySink {
    events: Mutex<Vec<ReportEvent>>,
}

#[cfg(test)]
impl MemorySink {
    pub(crate) fn events(&self) -> Vec<ReportEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn statuses(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.status).collect()
    }
}

#[cfg(test)]
impl ReportSink for MemorySink {
    fn report(&self, task_id: &str, details: &serde_json::Value, status: &str, level: ReportLevel) {
        self.events.lock().unwrap().push(ReportEvent {
            timestamp: Utc::now(),
            task_id: task_id.to_string(),
            status: status.to_string(),
            level,
            details: details.clone(),
        });
    }
}
