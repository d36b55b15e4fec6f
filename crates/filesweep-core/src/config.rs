//! filesweep configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SweepError};

/// Upper bound for `job.retry_backoff_ms`; retries sleep on the single job worker.
pub const MAX_RETRY_BACKOFF_MS: u64 = 60_000;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Directory holding the task file and the report log.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Task file name, relative to `data_dir` unless absolute.
    #[serde(default = "default_tasks_file")]
    pub tasks_file: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

fn default_data_dir() -> String { "~/.filesweep".into() }
fn default_tasks_file() -> String { "tasks.json".into() }

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            tasks_file: default_tasks_file(),
            scheduler: SchedulerConfig::default(),
            job: JobConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl SweepConfig {
    /// Load config from the default path (~/.filesweep/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SweepError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SweepError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.queue_capacity == 0 {
            return Err(SweepError::Config(
                "scheduler.queue_capacity must be at least 1".into(),
            ));
        }
        if self.job.delete_attempts == 0 {
            return Err(SweepError::Config(
                "job.delete_attempts must be at least 1".into(),
            ));
        }
        if self.job.retry_backoff_ms > MAX_RETRY_BACKOFF_MS {
            return Err(SweepError::Config(format!(
                "job.retry_backoff_ms must be at most {MAX_RETRY_BACKOFF_MS}"
            )));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the filesweep home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".filesweep")
    }

    /// `data_dir` with `~` expanded.
    pub fn data_path(&self) -> PathBuf {
        expand_path(&self.data_dir)
    }

    /// Full path of the task file.
    pub fn tasks_path(&self) -> PathBuf {
        self.resolve(&self.tasks_file)
    }

    /// Full path of the JSON-lines report log.
    pub fn report_path(&self) -> PathBuf {
        self.resolve(&self.report.path)
    }

    fn resolve(&self, file: &str) -> PathBuf {
        let path = expand_path(file);
        if path.is_absolute() {
            path
        } else {
            self.data_path().join(path)
        }
    }
}

/// Expand a leading `~` in a user-supplied path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// Background scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pending job runs buffered between triggers and the worker.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How often the daemon re-reads the task file (0 = never).
    #[serde(default)]
    pub reconcile_secs: u64,
}

fn default_queue_capacity() -> usize { 64 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            reconcile_secs: 0,
        }
    }
}

/// Deletion job behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Attempts per file removal before it is recorded as failed.
    #[serde(default = "default_delete_attempts")]
    pub delete_attempts: u32,
    /// Linear backoff between attempts.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_delete_attempts() -> u32 { 3 }
fn default_retry_backoff_ms() -> u64 { 100 }

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            delete_attempts: default_delete_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Where job outcomes are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Outcomes go to the tracing log only.
    #[default]
    Log,
    /// Outcomes are appended as JSON lines to `report.path`.
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub sink: SinkKind,
    #[serde(default = "default_report_path")]
    pub path: String,
}

fn default_report_path() -> String { "reports.jsonl".into() }

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::default(),
            path: default_report_path(),
        }
    }
}
