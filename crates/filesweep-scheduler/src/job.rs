//! Deletion job — scans a directory tree and removes aged files whose
//! extension is in the task's format set.
//!
//! Failures are isolated per file: a file that cannot be inspected or removed
//! is recorded in the outcome and the scan carries on. Only a problem with the
//! task's root directory fails the run as a whole.

use std::collections::BTreeSet;
use std::fs::{self, ReadDir};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use filesweep_core::config::MAX_RETRY_BACKOFF_MS;
use filesweep_core::{JobConfig, SweepError};
use serde_json::json;

use crate::report::{ReportLevel, ReportSink};
use crate::tasks::TaskDefinition;

const SECS_PER_DAY: u64 = 86_400;

pub const STATUS_DELETED: &str = "Files deleted";
pub const STATUS_NOTHING_DELETED: &str = "No files deleted";
pub const STATUS_PARTIAL: &str = "Files deleted with errors";

/// How often a single removal is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

impl From<&JobConfig> for RetryPolicy {
    fn from(config: &JobConfig) -> Self {
        Self {
            attempts: config.delete_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms.min(MAX_RETRY_BACKOFF_MS)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    Failed(String),
}

/// A file the job wanted to touch but couldn't.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Result of one job run. Reported, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionOutcome {
    pub task_id: String,
    pub deleted: Vec<PathBuf>,
    pub failures: Vec<FileFailure>,
    pub status: OutcomeStatus,
}

impl DeletionOutcome {
    fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            deleted: Vec::new(),
            failures: Vec::new(),
            status: OutcomeStatus::Success,
        }
    }

    fn failed(mut self, error: SweepError) -> Self {
        self.status = OutcomeStatus::Failed(error.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    fn record_failure(&mut self, path: &Path, error: impl ToString) {
        let error = error.to_string();
        tracing::warn!("⚠️ [{}] {}: {error}", self.task_id, path.display());
        self.failures.push(FileFailure {
            path: path.to_path_buf(),
            error,
        });
    }
}

enum Removal {
    Removed,
    /// The file disappeared before we got to it.
    Vanished,
}

/// Removes one file; `fs::remove_file` outside of tests.
type RemoveFn = fn(&Path) -> io::Result<()>;

/// The unit of scheduled work, bound to one task's parameters.
#[derive(Debug, Clone)]
pub struct DeletionJob {
    task_id: String,
    directory: PathBuf,
    age_days: u64,
    formats: BTreeSet<String>,
    retry: RetryPolicy,
    remove: RemoveFn,
}

impl DeletionJob {
    /// `formats` is expected to be normalized (see [`crate::tasks::normalize_formats`]).
    pub fn new(
        task_id: &str,
        directory: impl Into<PathBuf>,
        age_days: u64,
        formats: BTreeSet<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            directory: directory.into(),
            age_days,
            formats,
            retry,
            remove: remove_file,
        }
    }

    #[cfg(test)]
    fn with_remover(mut self, remove: RemoveFn) -> Self {
        self.remove = remove;
        self
    }

    pub fn for_task(task: &TaskDefinition, config: &JobConfig) -> Self {
        Self::new(
            &task.id,
            task.spec.directory.clone(),
            task.spec.age_days,
            task.spec.formats.clone(),
            RetryPolicy::from(config),
        )
    }

    /// Execute and report; what the scheduler calls on every firing.
    pub fn run(&self, sink: &dyn ReportSink) -> DeletionOutcome {
        let outcome = self.execute();
        self.report(&outcome, sink);
        outcome
    }

    pub fn execute(&self) -> DeletionOutcome {
        self.execute_at(SystemTime::now())
    }

    /// Execute with an explicit notion of "now".
    pub fn execute_at(&self, now: SystemTime) -> DeletionOutcome {
        let mut outcome = DeletionOutcome::new(&self.task_id);
        if self.formats.is_empty() {
            return outcome;
        }

        tracing::info!(
            "🧹 Starting file deletion task '{}' in {}",
            self.task_id,
            self.directory.display()
        );

        let entries = match self.open_root() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("❌ File deletion task '{}' failed: {e}", self.task_id);
                return outcome.failed(e);
            }
        };

        // Nothing is older than the epoch.
        let Some(cutoff) = now.checked_sub(Duration::from_secs(self.age_days.saturating_mul(SECS_PER_DAY)))
        else {
            return outcome;
        };
        self.walk(&self.directory, entries, cutoff, &mut outcome);

        if outcome.deleted.is_empty() && outcome.failures.is_empty() {
            tracing::info!("No files deleted in task '{}'.", self.task_id);
        }
        outcome
    }

    fn open_root(&self) -> Result<ReadDir, SweepError> {
        let meta = fs::metadata(&self.directory).map_err(|e| {
            SweepError::Execution(format!("cannot access {}: {e}", self.directory.display()))
        })?;
        if !meta.is_dir() {
            return Err(SweepError::Execution(format!(
                "{} is not a directory",
                self.directory.display()
            )));
        }
        fs::read_dir(&self.directory).map_err(|e| {
            SweepError::Execution(format!("cannot read {}: {e}", self.directory.display()))
        })
    }

    fn walk(&self, dir: &Path, entries: ReadDir, cutoff: SystemTime, outcome: &mut DeletionOutcome) {
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    outcome.record_failure(dir, e);
                    continue;
                }
            };
            let path = entry.path();
            let is_dir = match entry.file_type() {
                Ok(ft) => ft.is_dir(),
                Err(e) => {
                    outcome.record_failure(&path, e);
                    continue;
                }
            };

            if is_dir {
                match fs::read_dir(&path) {
                    Ok(sub) => self.walk(&path, sub, cutoff, outcome),
                    Err(e) => outcome.record_failure(&path, e),
                }
            } else {
                self.consider(&path, cutoff, outcome);
            }
        }
    }

    fn consider(&self, path: &Path, cutoff: SystemTime, outcome: &mut DeletionOutcome) {
        if !self.matches_format(path) {
            return;
        }

        // Follows symlinks; links to directories are never removed.
        let modified = match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => return,
            Ok(meta) => meta.modified(),
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => Err(e),
        };
        let modified = match modified {
            Ok(modified) => modified,
            Err(e) => {
                outcome.record_failure(path, e);
                return;
            }
        };
        if modified >= cutoff {
            return;
        }

        match self.remove_with_retry(path) {
            Ok(Removal::Removed) => {
                tracing::info!("🗑️ Deleted file: {}", path.display());
                outcome.deleted.push(path.to_path_buf());
            }
            Ok(Removal::Vanished) => {}
            Err(e) => outcome.record_failure(path, e),
        }
    }

    fn matches_format(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
            .is_some_and(|ext| self.formats.contains(&ext))
    }

    fn remove_with_retry(&self, path: &Path) -> io::Result<Removal> {
        let mut attempt: u32 = 1;
        loop {
            match (self.remove)(path) {
                Ok(()) => return Ok(Removal::Removed),
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Removal::Vanished),
                Err(e) if attempt < self.retry.attempts && is_transient(&e) => {
                    tracing::debug!(
                        "Retrying removal of {} (attempt {attempt}/{}): {e}",
                        path.display(),
                        self.retry.attempts
                    );
                    std::thread::sleep(self.retry.backoff.saturating_mul(attempt));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send the outcome to the sink with the status and level it maps to.
    pub fn report(&self, outcome: &DeletionOutcome, sink: &dyn ReportSink) {
        let deleted: Vec<String> = outcome
            .deleted
            .iter()
            .map(|p| p.display().to_string())
            .collect();

        match &outcome.status {
            OutcomeStatus::Failed(error) => sink.report(
                &self.task_id,
                &json!({
                    "directory": self.directory.display().to_string(),
                    "age_days": self.age_days,
                    "formats": self.formats,
                }),
                &format!("Error: {error}"),
                ReportLevel::Error,
            ),
            OutcomeStatus::Success if !outcome.failures.is_empty() => {
                let failed: Vec<_> = outcome
                    .failures
                    .iter()
                    .map(|f| json!({"path": f.path.display().to_string(), "error": f.error}))
                    .collect();
                sink.report(
                    &self.task_id,
                    &json!({"deleted_files": deleted, "failed_files": failed}),
                    STATUS_PARTIAL,
                    ReportLevel::Warning,
                )
            }
            OutcomeStatus::Success if !deleted.is_empty() => sink.report(
                &self.task_id,
                &json!({"deleted_files": deleted}),
                STATUS_DELETED,
                ReportLevel::Info,
            ),
            OutcomeStatus::Success => sink.report(
                &self.task_id,
                &json!({}),
                STATUS_NOTHING_DELETED,
                ReportLevel::Info,
            ),
        }
    }
}

fn remove_file(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

fn is_transient(e: &io::Error) -> bool {
    !matches!(
        e.kind(),
        ErrorKind::PermissionDenied | ErrorKind::InvalidInput | ErrorKind::Unsupported
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemorySink;
    use crate::tasks::normalize_formats;
    use std::cell::Cell;
    use std::fs::File;
    use std::time::UNIX_EPOCH;

    thread_local! {
        static REMOVE_CALLS: Cell<u32> = const { Cell::new(0) };
    }

    fn remove_calls() -> u32 {
        REMOVE_CALLS.with(Cell::get)
    }

    fn reset_remove_calls() {
        REMOVE_CALLS.with(|c| c.set(0));
    }

    fn count_call(path: &Path, name: &str) -> bool {
        let hit = path.file_name().is_some_and(|n| n == name);
        if hit {
            REMOVE_CALLS.with(|c| c.set(c.get() + 1));
        }
        hit
    }

    /// `locked.tmp` can never be removed.
    fn deny_locked(path: &Path) -> io::Result<()> {
        if count_call(path, "locked.tmp") {
            return Err(io::Error::new(ErrorKind::PermissionDenied, "locked"));
        }
        fs::remove_file(path)
    }

    /// `flaky.tmp` is removed on the third attempt.
    fn flaky_remove(path: &Path) -> io::Result<()> {
        if count_call(path, "flaky.tmp") && remove_calls() < 3 {
            return Err(io::Error::new(ErrorKind::Interrupted, "busy"));
        }
        fs::remove_file(path)
    }

    /// Every file disappears just before removal.
    fn already_gone(path: &Path) -> io::Result<()> {
        count_call(path, "gone.tmp");
        Err(io::Error::new(ErrorKind::NotFound, "gone"))
    }

    const DAY: Duration = Duration::from_secs(SECS_PER_DAY);

    /// Whole-second "now" so mtimes survive the filesystem round trip exactly.
    fn now() -> SystemTime {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn touch(path: &Path, modified: SystemTime) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let file = File::create(path).unwrap();
        file.set_modified(modified).unwrap();
    }

    fn job(dir: &Path, age_days: u64, formats: &[&str]) -> DeletionJob {
        DeletionJob::new(
            "task_1",
            dir,
            age_days,
            normalize_formats(formats.iter().copied()),
            RetryPolicy::none(),
        )
    }

    #[test]
    fn test_deletes_only_aged_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        let now = now();
        let old_tmp = dir.path().join("old.tmp");
        let new_tmp = dir.path().join("new.tmp");
        let old_log = dir.path().join("old.log");
        touch(&old_tmp, now - DAY * 10);
        touch(&new_tmp, now - DAY * 3);
        touch(&old_log, now - DAY * 10);

        let outcome = job(dir.path(), 7, &[".tmp"]).execute_at(now);

        assert!(outcome.is_success());
        assert_eq!(outcome.deleted, vec![old_tmp.clone()]);
        assert!(!old_tmp.exists());
        assert!(new_tmp.exists());
        assert!(old_log.exists());
    }

    #[test]
    fn test_age_boundary_is_strict() {
        let dir = tempfile::tempdir().unwrap();
        let now = now();
        let cutoff = now - DAY * 7;
        let at_cutoff = dir.path().join("at_cutoff.tmp");
        let before_cutoff = dir.path().join("before_cutoff.tmp");
        touch(&at_cutoff, cutoff);
        touch(&before_cutoff, cutoff - Duration::from_secs(1));

        let outcome = job(dir.path(), 7, &[".tmp"]).execute_at(now);

        assert_eq!(outcome.deleted, vec![before_cutoff]);
        assert!(at_cutoff.exists());
    }

    #[test]
    fn test_zero_age_uses_now_as_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let now = now();
        let past = dir.path().join("past.tmp");
        let current = dir.path().join("current.tmp");
        touch(&past, now - Duration::from_secs(1));
        touch(&current, now);

        let outcome = job(dir.path(), 0, &[".tmp"]).execute_at(now);
        assert_eq!(outcome.deleted, vec![past]);
        assert!(current.exists());
    }

    #[test]
    fn test_extension_matching_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let now = now();
        let upper = dir.path().join("a.LOG");
        let dotfile = dir.path().join(".log");
        touch(&upper, now - DAY * 30);
        touch(&dotfile, now - DAY * 30);

        let outcome = job(dir.path(), 7, &[".Log"]).execute_at(now);
        assert_eq!(outcome.deleted, vec![upper]);
        assert!(dotfile.exists());
    }

    #[test]
    fn test_recurses_into_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let now = now();
        let deep = dir.path().join("a").join("b").join("c").join("deep.tmp");
        let shallow = dir.path().join("a").join("shallow.bak");
        touch(&deep, now - DAY * 9);
        touch(&shallow, now - DAY * 9);

        let mut outcome = job(dir.path(), 1, &[".tmp", ".bak"]).execute_at(now);
        outcome.deleted.sort();
        let mut expected = vec![deep, shallow];
        expected.sort();
        assert_eq!(outcome.deleted, expected);
        assert!(dir.path().join("a").join("b").join("c").is_dir());
    }

    #[test]
    fn test_empty_formats_never_match() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("old.tmp"), now() - DAY * 30);

        let outcome = job(dir.path(), 0, &[]).execute();
        assert!(outcome.is_success());
        assert!(outcome.deleted.is_empty());

        let missing = job(&dir.path().join("missing"), 0, &[]).execute();
        assert!(missing.is_success());
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = job(&dir.path().join("missing"), 7, &[".tmp"]).execute();
        assert!(matches!(outcome.status, OutcomeStatus::Failed(ref e) if e.contains("cannot access")));
    }

    #[test]
    fn test_file_as_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        touch(&file, now());
        let outcome = job(&file, 7, &[".txt"]).execute();
        assert!(!outcome.is_success());
        assert!(file.exists());
    }

    #[test]
    fn test_report_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MemorySink::default();
        let old = dir.path().join("old.tmp");
        touch(&old, now() - DAY * 10);

        let job = job(dir.path(), 7, &[".tmp"]);
        job.run(&sink);
        job.run(&sink);

        let events = sink.events();
        assert_eq!(sink.statuses(), vec![STATUS_DELETED, STATUS_NOTHING_DELETED]);
        assert_eq!(events[0].level, ReportLevel::Info);
        assert_eq!(events[0].details["deleted_files"][0], old.display().to_string());
        assert_eq!(events[1].details, json!({}));
    }

    #[test]
    fn test_report_failure_details() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MemorySink::default();
        let missing = dir.path().join("missing");

        job(&missing, 7, &[".tmp"]).run(&sink);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, ReportLevel::Error);
        assert!(events[0].status.starts_with("Error: "));
        assert_eq!(events[0].details["directory"], missing.display().to_string());
        assert_eq!(events[0].details["age_days"], 7);
        assert_eq!(events[0].details["formats"], json!([".tmp"]));
    }

    #[test]
    fn test_failed_removal_does_not_stop_scan() {
        reset_remove_calls();
        let dir = tempfile::tempdir().unwrap();
        let sink = MemorySink::default();
        let now = now();
        let locked = dir.path().join("locked.tmp");
        let other = dir.path().join("sub").join("other.tmp");
        touch(&locked, now - DAY * 10);
        touch(&other, now - DAY * 10);

        let retry = RetryPolicy {
            attempts: 3,
            backoff: Duration::ZERO,
        };
        let job = DeletionJob::new("task_1", dir.path(), 7, normalize_formats([".tmp"]), retry)
            .with_remover(deny_locked);
        let outcome = job.execute_at(now);

        assert!(outcome.is_success());
        assert_eq!(outcome.deleted, vec![other.clone()]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].path, locked);
        assert!(outcome.failures[0].error.contains("locked"));
        assert!(locked.exists());
        assert!(!other.exists());
        // Permission errors are not retried.
        assert_eq!(remove_calls(), 1);

        job.report(&outcome, &sink);
        let events = sink.events();
        assert_eq!(sink.statuses(), vec![STATUS_PARTIAL]);
        assert_eq!(events[0].level, ReportLevel::Warning);
        assert_eq!(events[0].details["deleted_files"][0], other.display().to_string());
        assert_eq!(events[0].details["failed_files"][0]["path"], locked.display().to_string());
        assert_eq!(events[0].details["failed_files"][0]["error"], "locked");
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let now = now();
        let flaky = dir.path().join("flaky.tmp");
        let retry = |attempts| RetryPolicy {
            attempts,
            backoff: Duration::from_millis(1),
        };

        reset_remove_calls();
        touch(&flaky, now - DAY * 10);
        let outcome = DeletionJob::new("task_1", dir.path(), 7, normalize_formats([".tmp"]), retry(2))
            .with_remover(flaky_remove)
            .execute_at(now);
        assert_eq!(remove_calls(), 2);
        assert!(outcome.deleted.is_empty());
        assert_eq!(outcome.failures.len(), 1);
        assert!(flaky.exists());

        reset_remove_calls();
        let outcome = DeletionJob::new("task_1", dir.path(), 7, normalize_formats([".tmp"]), retry(3))
            .with_remover(flaky_remove)
            .execute_at(now);
        assert_eq!(remove_calls(), 3);
        assert_eq!(outcome.deleted, vec![flaky.clone()]);
        assert!(outcome.failures.is_empty());
        assert!(!flaky.exists());
    }

    #[test]
    fn test_vanished_file_is_silent() {
        reset_remove_calls();
        let dir = tempfile::tempdir().unwrap();
        let sink = MemorySink::default();
        touch(&dir.path().join("gone.tmp"), now() - DAY * 10);

        let retry = RetryPolicy {
            attempts: 3,
            backoff: Duration::ZERO,
        };
        let outcome = DeletionJob::new("task_1", dir.path(), 7, normalize_formats([".tmp"]), retry)
            .with_remover(already_gone)
            .run(&sink);

        assert!(outcome.is_success());
        assert!(outcome.deleted.is_empty());
        assert!(outcome.failures.is_empty());
        assert_eq!(remove_calls(), 1);
        assert_eq!(sink.statuses(), vec![STATUS_NOTHING_DELETED]);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = RetryPolicy::from(&JobConfig {
            delete_attempts: 0,
            retry_backoff_ms: 250,
        });
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.backoff, Duration::from_millis(250));

        let capped = RetryPolicy::from(&JobConfig {
            delete_attempts: 3,
            retry_backoff_ms: u64::MAX,
        });
        assert_eq!(capped.backoff, Duration::from_millis(MAX_RETRY_BACKOFF_MS));
    }
}
