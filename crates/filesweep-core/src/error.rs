//! Error taxonomy shared by every filesweep crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SweepError>;

#[derive(Debug, Error)]
pub enum SweepError {
    /// Invalid or missing parameters, or an unusable config file.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A task with the same interval, directory, age and formats is already stored.
    #[error("Task with the same interval and details already exists: '{existing}'")]
    DuplicateTask { existing: String },

    #[error("Task '{0}' not found")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A deletion run failed as a whole (missing or unreadable directory).
    #[error("Execution error: {0}")]
    Execution(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
