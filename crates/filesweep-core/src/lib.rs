//! # filesweep core
//!
//! Configuration and the error taxonomy shared by the scheduler crate and the
//! `filesweep` binary.

pub mod config;
pub mod error;

pub use config::{JobConfig, ReportConfig, SchedulerConfig, SinkKind, SweepConfig};
pub use error::{Result, SweepError};
