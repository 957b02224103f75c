//! Task shape errors.

use thiserror::Error;

/// A task rejected before any strategy runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task has an empty id
    #[error("Task has no id: {label}")]
    MissingId {
        /// Description or name used to point at the task
        label: String,
    },

    /// A field holds a value the task model rejects
    #[error("Malformed task {id}: {reason}")]
    Malformed {
        /// Offending task
        id: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Artifact lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    /// No artifact has this name
    #[error("Artifact not found: @{0}")]
    NotFound(String),
}
