//! Task definitions — the persisted data model for recurring cleanups.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use filesweep_core::{Result, SweepError};
use serde::{Deserialize, Deserializer, Serialize};

/// Longest accepted interval (ten years).
const MAX_INTERVAL_SECS: u64 = 10 * 365 * 86_400;

/// Unit of a task's repeat interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl IntervalUnit {
    /// Length of one unit in seconds.
    pub fn seconds(&self) -> u64 {
        match self {
            IntervalUnit::Seconds => 1,
            IntervalUnit::Minutes => 60,
            IntervalUnit::Hours => 3_600,
            IntervalUnit::Days => 86_400,
        }
    }
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntervalUnit::Seconds => write!(f, "seconds"),
            IntervalUnit::Minutes => write!(f, "minutes"),
            IntervalUnit::Hours => write!(f, "hours"),
            IntervalUnit::Days => write!(f, "days"),
        }
    }
}

impl FromStr for IntervalUnit {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "s" | "sec" | "second" | "seconds" => Ok(IntervalUnit::Seconds),
            "m" | "min" | "minute" | "minutes" => Ok(IntervalUnit::Minutes),
            "h" | "hour" | "hours" => Ok(IntervalUnit::Hours),
            "d" | "day" | "days" => Ok(IntervalUnit::Days),
            other => Err(SweepError::Config(format!(
                "unknown interval unit '{other}' (expected seconds, minutes, hours or days)"
            ))),
        }
    }
}

/// Everything that identifies a cleanup, minus its id.
///
/// Two specs compare equal exactly when they describe duplicate tasks:
/// `formats` is a normalized set, so order and case of the input don't matter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(alias = "interval")]
    pub interval_value: u64,
    #[serde(alias = "unit")]
    pub interval_unit: IntervalUnit,
    pub directory: PathBuf,
    pub age_days: u64,
    #[serde(deserialize_with = "deserialize_formats")]
    pub formats: BTreeSet<String>,
}

impl TaskSpec {
    /// Validate user input and build a spec. A relative `directory` is
    /// resolved against the current working directory; it need not exist yet.
    pub fn new<I, S>(
        interval_value: u64,
        interval_unit: IntervalUnit,
        directory: impl Into<PathBuf>,
        age_days: u64,
        formats: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut spec = Self {
            interval_value,
            interval_unit,
            directory: directory.into(),
            age_days,
            formats: normalize_formats(formats),
        };
        spec.validate()?;
        spec.directory = absolute_dir(&spec.directory)?;
        Ok(spec)
    }

    /// Check the invariants a stored task must satisfy to be schedulable.
    pub fn validate(&self) -> Result<()> {
        if self.interval_value == 0 {
            return Err(SweepError::Config("interval must be a positive integer".into()));
        }
        if self.interval_value.saturating_mul(self.interval_unit.seconds()) > MAX_INTERVAL_SECS {
            return Err(SweepError::Config(format!(
                "interval of {} {} is too long",
                self.interval_value, self.interval_unit
            )));
        }
        if self.directory.as_os_str().is_empty() {
            return Err(SweepError::Config("directory is required".into()));
        }
        if self.formats.is_empty() {
            return Err(SweepError::Config(
                "at least one file format is required (e.g. .log .tmp)".into(),
            ));
        }
        Ok(())
    }

    /// How often the task fires.
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.interval_value.saturating_mul(self.interval_unit.seconds()))
    }

    /// Formats as a comma-separated list, for display.
    pub fn formats_display(&self) -> String {
        self.formats.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// A stored task: its id plus the `TaskSpec` it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub id: String,
    pub spec: TaskSpec,
    /// Creation time; absent for tasks written by older versions.
    pub created_at: Option<DateTime<Utc>>,
}

impl TaskDefinition {
    pub fn is_duplicate_of(&self, spec: &TaskSpec) -> bool {
        self.spec == *spec
    }
}

/// Ordered collection of tasks plus the id high-water mark.
///
/// Ids are `task_<n>` with `n` taken from a counter that only grows, so an id
/// is never handed out twice even after removals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSet {
    last_id: u64,
    tasks: Vec<TaskDefinition>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a set from persisted parts. The counter is raised to cover
    /// every numeric id suffix already present.
    pub fn from_parts(last_id: u64, tasks: Vec<TaskDefinition>) -> Self {
        let highest = tasks
            .iter()
            .filter_map(|t| id_number(&t.id))
            .max()
            .unwrap_or(0);
        Self {
            last_id: last_id.max(highest),
            tasks,
        }
    }

    pub fn last_id(&self) -> u64 {
        self.last_id
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskDefinition> {
        self.tasks.iter()
    }

    pub fn get(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// The stored task that `spec` would duplicate, if any.
    pub fn find_duplicate(&self, spec: &TaskSpec) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.is_duplicate_of(spec))
    }

    /// Append a task under a freshly allocated id. Fails once the counter
    /// has no ids left, leaving the set unchanged.
    pub fn insert(
        &mut self,
        spec: TaskSpec,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<&TaskDefinition> {
        let mut n = next_id(self.last_id)?;
        while self.contains(&format_id(n)) {
            n = next_id(n)?;
        }
        self.last_id = n;
        let index = self.tasks.len();
        self.tasks.push(TaskDefinition {
            id: format_id(n),
            spec,
            created_at,
        });
        Ok(&self.tasks[index])
    }

    pub fn remove(&mut self, id: &str) -> Option<TaskDefinition> {
        let pos = self.tasks.iter().position(|t| t.id == id)?;
        Some(self.tasks.remove(pos))
    }

    pub fn into_vec(self) -> Vec<TaskDefinition> {
        self.tasks
    }
}

fn next_id(n: u64) -> Result<u64> {
    n.checked_add(1)
        .ok_or_else(|| SweepError::Persistence(format!("task id counter exhausted at {n}")))
}

fn absolute_dir(dir: &Path) -> Result<PathBuf> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    std::path::absolute(dir).map_err(|e| {
        SweepError::Config(format!("cannot resolve directory {}: {e}", dir.display()))
    })
}

fn format_id(n: u64) -> String {
    format!("task_{n}")
}

/// Numeric suffix of ids like `task_7` or `file_deletion_task_7`.
fn id_number(id: &str) -> Option<u64> {
    id.rsplit('_').next()?.parse().ok()
}

/// Lowercase, dot-prefixed, de-duplicated extensions. Blank entries are dropped.
pub fn normalize_formats<I, S>(formats: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    formats
        .into_iter()
        .filter_map(|f| {
            let f = f.as_ref().trim().to_lowercase();
            if f.is_empty() || f == "." {
                None
            } else if f.starts_with('.') {
                Some(f)
            } else {
                Some(format!(".{f}"))
            }
        })
        .collect()
}

fn deserialize_formats<'de, D>(deserializer: D) -> std::result::Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    Ok(normalize_formats(raw))
}
