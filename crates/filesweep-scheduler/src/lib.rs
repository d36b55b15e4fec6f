//! # filesweep scheduler
//!
//! Recurring file-cleanup engine: persistent task definitions, interval
//! triggers and the deletion job they fire.
//!
//! ## Architecture
//! ```text
//! TaskManager (add / list / remove / reload / reconcile)
//!   ├── TaskStore: tasks.json, rewritten atomically on every change
//!   └── Scheduler (tokio timers, one trigger per task id)
//!         └── on tick → queue → single worker → DeletionJob
//!                                                 └── ReportSink (log / JSON lines)
//! ```
//!
//! The store is persisted before any trigger is armed or disarmed, and job
//! failures never leave the worker: they end up in the report sink.

pub mod engine;
pub mod job;
pub mod manager;
pub mod report;
pub mod store;
pub mod tasks;

pub use engine::{JobFn, Scheduler};
pub use job::{DeletionJob, DeletionOutcome, FileFailure, OutcomeStatus, RetryPolicy};
pub use manager::{ReconcileStats, TaskManager};
pub use report::{FileSink, LogSink, ReportEvent, ReportLevel, ReportSink, sink_from_config};
pub use store::TaskStore;
pub use tasks::{IntervalUnit, TaskDefinition, TaskSet, TaskSpec, normalize_formats};
