//! Task manager — the only writer of the task store.
//!
//! Every operation holds one guard across load → save → arm/disarm, so the
//! store is always persisted before the scheduler is touched and concurrent
//! commands cannot lose each other's updates.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use filesweep_core::{JobConfig, Result, SweepError};
use serde_json::json;
use tokio::sync::Mutex;

use crate::engine::{JobFn, Scheduler};
use crate::job::DeletionJob;
use crate::report::{ReportLevel, ReportSink};
use crate::store::TaskStore;
use crate::tasks::{IntervalUnit, TaskDefinition, TaskSpec};

/// What [`TaskManager::reconcile`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub armed: usize,
    pub rearmed: usize,
    pub disarmed: usize,
}

impl ReconcileStats {
    pub fn is_empty(&self) -> bool {
        self.armed == 0 && self.rearmed == 0 && self.disarmed == 0
    }
}

struct State {
    store: TaskStore,
    /// Spec each trigger was armed with, by task id.
    armed: HashMap<String, TaskSpec>,
}

pub struct TaskManager {
    state: Mutex<State>,
    scheduler: Arc<Scheduler>,
    sink: Arc<dyn ReportSink>,
    job_config: JobConfig,
}

impl TaskManager {
    pub fn new(
        store: TaskStore,
        scheduler: Arc<Scheduler>,
        sink: Arc<dyn ReportSink>,
        job_config: JobConfig,
    ) -> Self {
        Self {
            state: Mutex::new(State {
                store,
                armed: HashMap::new(),
            }),
            scheduler,
            sink,
            job_config,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Register a new cleanup task and return its id.
    pub async fn add<I, S>(
        &self,
        interval_value: u64,
        interval_unit: IntervalUnit,
        directory: impl Into<PathBuf>,
        age_days: u64,
        formats: I,
    ) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let spec = TaskSpec::new(interval_value, interval_unit, directory, age_days, formats)?;
        self.add_spec(spec).await
    }

    /// Register an already validated spec.
    pub async fn add_spec(&self, spec: TaskSpec) -> Result<String> {
        spec.validate()?;
        let mut state = self.state.lock().await;
        let mut tasks = state.store.load();

        if let Some(existing) = tasks.find_duplicate(&spec) {
            tracing::warn!("⚠️ Task with the same interval and details already exists: '{}'", existing.id);
            return Err(SweepError::DuplicateTask {
                existing: existing.id.clone(),
            });
        }

        let task = tasks.insert(spec, Some(Utc::now()))?.clone();
        state.store.save(&tasks)?;

        self.scheduler
            .arm(&task.id, task.spec.period(), self.job_for(&task))
            .await?;
        state.armed.insert(task.id.clone(), task.spec.clone());

        tracing::info!(
            "📅 Task added: '{}' (every {} {}, {})",
            task.id,
            task.spec.interval_value,
            task.spec.interval_unit,
            task.spec.directory.display()
        );
        self.sink
            .report(&task.id, &spec_details(&task.spec), "Task added", ReportLevel::Info);
        Ok(task.id)
    }

    /// All stored tasks in insertion order.
    pub async fn list(&self) -> Vec<TaskDefinition> {
        let state = self.state.lock().await;
        state.store.load().into_vec()
    }

    /// Delete a task from the store, then disarm its trigger.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut tasks = state.store.load();

        let Some(task) = tasks.remove(id) else {
            tracing::warn!("⚠️ Task '{id}' not found");
            return Err(SweepError::NotFound(id.to_string()));
        };
        state.store.save(&tasks)?;

        state.armed.remove(id);
        if !self.scheduler.disarm(id).await {
            tracing::debug!("Task '{id}' had no armed trigger");
        }

        tracing::info!("🗑️ Task removed: '{id}'");
        self.sink
            .report(id, &spec_details(&task.spec), "Task removed", ReportLevel::Info);
        Ok(())
    }

    /// Arm a trigger for every stored task. Re-arming replaces, so calling
    /// this repeatedly leaves exactly one trigger per task.
    pub async fn reload(&self) -> usize {
        let mut state = self.state.lock().await;
        let tasks = state.store.load();

        let mut armed = 0;
        for task in tasks.iter() {
            match self
                .scheduler
                .arm(&task.id, task.spec.period(), self.job_for(task))
                .await
            {
                Ok(()) => {
                    state.armed.insert(task.id.clone(), task.spec.clone());
                    armed += 1;
                }
                Err(e) => tracing::warn!("⚠️ Could not schedule task '{}': {e}", task.id),
            }
        }
        tracing::info!("📂 Loaded {armed} task(s) from {}", state.store.path().display());
        armed
    }

    /// Bring the scheduler in line with the store after outside edits:
    /// arm new tasks, re-arm changed ones, disarm removed ones. Unchanged
    /// tasks keep their running timers.
    pub async fn reconcile(&self) -> ReconcileStats {
        let mut state = self.state.lock().await;
        let tasks = state.store.load();
        let mut stats = ReconcileStats::default();

        let stale: Vec<String> = state
            .armed
            .keys()
            .filter(|id| !tasks.contains(id))
            .cloned()
            .collect();
        for id in stale {
            state.armed.remove(&id);
            self.scheduler.disarm(&id).await;
            stats.disarmed += 1;
        }

        for task in tasks.iter() {
            let previous = state.armed.get(&task.id);
            if previous == Some(&task.spec) {
                continue;
            }
            let changed = previous.is_some();
            match self
                .scheduler
                .arm(&task.id, task.spec.period(), self.job_for(task))
                .await
            {
                Ok(()) => {
                    state.armed.insert(task.id.clone(), task.spec.clone());
                    if changed {
                        stats.rearmed += 1;
                    } else {
                        stats.armed += 1;
                    }
                }
                Err(e) => tracing::warn!("⚠️ Could not schedule task '{}': {e}", task.id),
            }
        }

        if !stats.is_empty() {
            tracing::info!(
                "🔄 Reconciled tasks: {} armed, {} re-armed, {} disarmed",
                stats.armed,
                stats.rearmed,
                stats.disarmed
            );
        }
        stats
    }

    fn job_for(&self, task: &TaskDefinition) -> JobFn {
        let job = DeletionJob::for_task(task, &self.job_config);
        let sink = Arc::clone(&self.sink);
        Arc::new(move || {
            job.run(sink.as_ref());
        })
    }
}

fn spec_details(spec: &TaskSpec) -> serde_json::Value {
    json!({
        "interval_value": spec.interval_value,
        "interval_unit": spec.interval_unit,
        "directory": spec.directory.display().to_string(),
        "age_days": spec.age_days,
        "formats": spec.formats,
    })
}
