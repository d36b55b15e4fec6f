//! File-based task store — lightweight persistence.
//! Tasks saved as one JSON document, human-readable and rewritten in full on
//! every change. Only reads/writes on task changes, never on scheduler ticks.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use filesweep_core::{Result, SweepError};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::tasks::{TaskDefinition, TaskSet, TaskSpec};

/// File-based task store.
pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    /// Create a store backed by the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save all tasks to disk, replacing the previous content atomically.
    pub fn save(&self, tasks: &TaskSet) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| SweepError::Persistence(format!("Create dir error: {e}")))?;
        }

        let json = serde_json::to_string_pretty(&StoreFileRef::from(tasks))
            .map_err(|e| SweepError::Persistence(format!("Serialize error: {e}")))?;

        let tmp = self.tmp_path();
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            std::fs::rename(&tmp, &self.path)
        };
        if let Err(e) = write() {
            std::fs::remove_file(&tmp).ok();
            return Err(SweepError::Persistence(format!(
                "Write error for {}: {e}",
                self.path.display()
            )));
        }

        tracing::debug!("💾 Saved {} tasks to {}", tasks.len(), self.path.display());
        Ok(())
    }

    /// Load tasks from disk. A missing or malformed file yields an empty set.
    pub fn load(&self) -> TaskSet {
        if !self.path.exists() {
            return TaskSet::new();
        }
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("⚠️ Failed to read {}: {e}", self.path.display());
                return TaskSet::new();
            }
        };
        match serde_json::from_str::<StoreFile>(&json) {
            Ok(file) => file.into_task_set(),
            Err(e) => {
                tracing::warn!("⚠️ Failed to parse {}: {e}", self.path.display());
                TaskSet::new()
            }
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "tasks.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// One task as written under its id.
#[derive(Serialize)]
struct StoredTaskRef<'a> {
    #[serde(flatten)]
    spec: &'a TaskSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<&'a DateTime<Utc>>,
}

#[derive(Deserialize)]
struct StoredTask {
    #[serde(flatten)]
    spec: TaskSpec,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    last_id: u64,
    tasks: TaskMapRef<'a>,
}

impl<'a> From<&'a TaskSet> for StoreFileRef<'a> {
    fn from(set: &'a TaskSet) -> Self {
        Self {
            last_id: set.last_id(),
            tasks: TaskMapRef(set),
        }
    }
}

/// Serializes tasks as an id-keyed map in insertion order.
struct TaskMapRef<'a>(&'a TaskSet);

impl Serialize for TaskMapRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for task in self.0.iter() {
            map.serialize_entry(
                &task.id,
                &StoredTaskRef {
                    spec: &task.spec,
                    created_at: task.created_at.as_ref(),
                },
            )?;
        }
        map.end()
    }
}

/// Either the current `{last_id, tasks}` document or the legacy flat map of
/// id to task fields.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoreFile {
    Current {
        #[serde(default)]
        last_id: u64,
        tasks: OrderedEntries,
    },
    Legacy(OrderedEntries),
}

impl StoreFile {
    fn into_task_set(self) -> TaskSet {
        let (last_id, entries) = match self {
            StoreFile::Current { last_id, tasks } => (last_id, tasks.0),
            StoreFile::Legacy(tasks) => (0, tasks.0),
        };

        let mut tasks: Vec<TaskDefinition> = Vec::with_capacity(entries.len());
        for (id, value) in entries {
            let stored: StoredTask = match serde_json::from_value(value) {
                Ok(stored) => stored,
                Err(e) => {
                    tracing::warn!("⚠️ Skipping stored entry '{id}': {e}");
                    continue;
                }
            };
            if let Err(e) = stored.spec.validate() {
                tracing::warn!("⚠️ Skipping stored task '{id}': {e}");
                continue;
            }
            if tasks.iter().any(|t| t.id == id) {
                continue;
            }
            tasks.push(TaskDefinition {
                id,
                spec: stored.spec,
                created_at: stored.created_at,
            });
        }
        TaskSet::from_parts(last_id, tasks)
    }
}

/// A JSON object kept as `(key, value)` pairs in document order.
struct OrderedEntries(Vec<(String, serde_json::Value)>);

impl<'de> Deserialize<'de> for OrderedEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = OrderedEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of task id to task fields")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, serde_json::Value>()? {
                    entries.push((key, value));
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::IntervalUnit;

    fn spec(dir: &str, formats: &[&str]) -> TaskSpec {
        TaskSpec::new(1, IntervalUnit::Days, dir, 7, formats.iter().copied()).unwrap()
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path().join("tasks.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_malformed_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(TaskStore::new(&path).load().is_empty());

        std::fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(TaskStore::new(&path).load().is_empty());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path().join("nested").join("tasks.json"));

        let mut tasks = TaskSet::new();
        tasks.insert(spec("/tmp/a", &[".tmp", ".log"]), Some(Utc::now())).unwrap();
        tasks.insert(spec("/tmp/b", &[".bak"]), None).unwrap();
        tasks.remove("task_1");
        tasks.insert(spec("/tmp/c", &[".LOG", ".Tmp"]), None).unwrap();

        store.save(&tasks).unwrap();
        let loaded = store.load();
        assert_eq!(loaded, tasks);
        assert_eq!(loaded.last_id(), 3);

        // Saving what was loaded writes the same document again.
        let first = std::fs::read_to_string(store.path()).unwrap();
        store.save(&loaded).unwrap();
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), first);
        assert!(!dir.path().join("nested").join("tasks.json.tmp").exists());
    }

    #[test]
    fn test_insertion_order_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path().join("tasks.json"));

        let mut tasks = TaskSet::new();
        for i in 0..12 {
            tasks.insert(spec(&format!("/tmp/{i}"), &[".tmp"]), None).unwrap();
        }
        store.save(&tasks).unwrap();

        let ids: Vec<String> = store.load().iter().map(|t| t.id.clone()).collect();
        let expected: Vec<String> = (1..=12).map(|n| format!("task_{n}")).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_legacy_format_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(
            &path,
            r#"{
                "file_deletion_task_2": {
                    "interval": 1, "unit": "days", "directory": "/tmp/x",
                    "age_days": 7, "formats": [".TMP", ".log"]
                },
                "backup_task_1": { "interval": 5, "unit": "minutes", "command": "sync" }
            }"#,
        )
        .unwrap();

        let mut loaded = TaskStore::new(&path).load();
        assert_eq!(loaded.len(), 1);
        let task = loaded.get("file_deletion_task_2").unwrap();
        assert_eq!(task.spec, spec("/tmp/x", &[".log", ".tmp"]));
        assert_eq!(task.created_at, None);
        assert_eq!(loaded.insert(spec("/tmp/y", &[".tmp"]), None).unwrap().id, "task_3");
    }

    #[test]
    fn test_invalid_entries_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(
            &path,
            r#"{ "last_id": 2, "tasks": {
                "task_1": { "interval_value": 0, "interval_unit": "days",
                            "directory": "/tmp", "age_days": 1, "formats": [".tmp"] },
                "task_2": { "interval_value": 3, "interval_unit": "hours",
                            "directory": "/tmp", "age_days": 1, "formats": [".tmp"] }
            } }"#,
        )
        .unwrap();

        let loaded = TaskStore::new(&path).load();
        let ids: Vec<&str> = loaded.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["task_2"]);
        assert_eq!(loaded.last_id(), 2);
    }
}
