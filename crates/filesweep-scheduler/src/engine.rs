//! Scheduler engine — fixed-interval triggers keyed by task id.
//!
//! Each armed trigger is a tokio timer task that, on every tick, enqueues a
//! run request. A single worker drains the queue and runs jobs one at a time
//! on the blocking pool, so jobs never overlap each other but do run
//! concurrently with whoever is arming and disarming.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use filesweep_core::{Result, SweepError};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Work bound to a trigger. Runs on the blocking pool.
pub type JobFn = Arc<dyn Fn() + Send + Sync>;

struct Trigger {
    period: Duration,
    job: JobFn,
    /// Distinguishes this arming from earlier ones under the same id.
    generation: u64,
    /// Timer task; `None` while the scheduler is not running.
    handle: Option<JoinHandle<()>>,
}

struct RunRequest {
    id: String,
    generation: u64,
}

struct Running {
    tx: mpsc::Sender<RunRequest>,
    worker: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    triggers: HashMap<String, Trigger>,
    next_generation: u64,
    running: Option<Running>,
    stopping: bool,
    arms_performed: u64,
}

/// Owns every armed trigger. `arm` and `disarm` are the only mutators.
pub struct Scheduler {
    inner: Arc<Mutex<Inner>>,
    queue_capacity: usize,
}

impl Scheduler {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a recurring trigger under `id`, replacing any existing one.
    /// The first firing happens one full `period` after arming, or after
    /// [`Scheduler::start`] for triggers armed before it.
    pub async fn arm(&self, id: &str, period: Duration, job: JobFn) -> Result<()> {
        if period.is_zero() {
            return Err(SweepError::Config(format!("trigger '{id}' needs a non-zero interval")));
        }
        if Instant::now().checked_add(period).is_none() {
            return Err(SweepError::Config(format!("trigger '{id}' interval is too long")));
        }

        let mut inner = self.inner.lock().await;
        inner.next_generation += 1;
        inner.arms_performed += 1;
        let generation = inner.next_generation;

        if let Some(old) = inner.triggers.remove(id) {
            if let Some(handle) = old.handle {
                handle.abort();
            }
            tracing::debug!("🔁 Trigger '{id}' replaced");
        }

        let handle = inner
            .running
            .as_ref()
            .map(|r| spawn_trigger(id.to_string(), generation, period, r.tx.clone()));
        inner.triggers.insert(
            id.to_string(),
            Trigger {
                period,
                job,
                generation,
                handle,
            },
        );
        tracing::info!("⏰ Trigger '{id}' armed (every {}s)", period.as_secs());
        Ok(())
    }

    /// Remove the trigger for `id`. Returns `false` if none was armed.
    pub async fn disarm(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.triggers.remove(id) {
            Some(trigger) => {
                if let Some(handle) = trigger.handle {
                    handle.abort();
                }
                tracing::info!("🔕 Trigger '{id}' disarmed");
                true
            }
            None => {
                tracing::debug!("Trigger '{id}' was not armed");
                false
            }
        }
    }

    /// Start the background worker and every recorded trigger.
    pub async fn start(&self) {
        let mut inner = self.inner.lock().await;
        if inner.running.is_some() {
            tracing::warn!("⚠️ Scheduler already running");
            return;
        }

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let worker = tokio::spawn(run_worker(Arc::clone(&self.inner), rx));
        for (id, trigger) in inner.triggers.iter_mut() {
            trigger.handle = Some(spawn_trigger(
                id.clone(),
                trigger.generation,
                trigger.period,
                tx.clone(),
            ));
        }
        inner.stopping = false;
        inner.running = Some(Running { tx, worker });
        tracing::info!("▶️ Scheduler started with {} trigger(s)", inner.triggers.len());
    }

    /// Stop all timers and the worker. A job already executing finishes;
    /// queued runs are dropped. Safe to call at any time, any number of times.
    pub async fn shutdown(&self) {
        let (running, timers) = {
            let mut inner = self.inner.lock().await;
            inner.stopping = true;
            let timers: Vec<JoinHandle<()>> = inner
                .triggers
                .values_mut()
                .filter_map(|t| t.handle.take())
                .collect();
            (inner.running.take(), timers)
        };

        let Some(Running { tx, worker }) = running else {
            return;
        };

        for timer in timers {
            timer.abort();
            // Cancelled timers release their queue senders.
            let _ = timer.await;
        }
        drop(tx);
        if let Err(e) = worker.await {
            tracing::warn!("⚠️ Scheduler worker ended abnormally: {e}");
        }
        tracing::info!("🛑 Scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.running.is_some()
    }

    pub async fn is_armed(&self, id: &str) -> bool {
        self.inner.lock().await.triggers.contains_key(id)
    }

    /// Ids of all armed triggers, sorted.
    pub async fn armed_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().await.triggers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn trigger_count(&self) -> usize {
        self.inner.lock().await.triggers.len()
    }

    /// Total number of successful `arm` calls since creation.
    pub async fn arms_performed(&self) -> u64 {
        self.inner.lock().await.arms_performed
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(64)
    }
}

fn spawn_trigger(
    id: String,
    generation: u64,
    period: Duration,
    tx: mpsc::Sender<RunRequest>,
) -> JoinHandle<()> {
    let first = Instant::now() + period;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let request = RunRequest {
                id: id.clone(),
                generation,
            };
            match tx.try_send(request) {
                Ok(()) => tracing::debug!("🔔 Trigger '{id}' fired"),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("⚠️ Job queue full, skipping run of '{id}'");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    })
}

async fn run_worker(inner: Arc<Mutex<Inner>>, mut rx: mpsc::Receiver<RunRequest>) {
    while let Some(request) = rx.recv().await {
        let job = {
            let inner = inner.lock().await;
            if inner.stopping {
                break;
            }
            match inner.triggers.get(&request.id) {
                Some(t) if t.generation == request.generation => Arc::clone(&t.job),
                _ => {
                    tracing::debug!("Skipping stale run of '{}'", request.id);
                    continue;
                }
            }
        };

        if let Err(e) = tokio::task::spawn_blocking(move || job()).await {
            tracing::error!("❌ Job '{}' panicked: {e}", request.id);
        }
    }
}
