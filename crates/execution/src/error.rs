//! Strategy errors.

use conductor_core::{ArtifactError, TaskError};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while selecting or running a strategy.
#[derive(Debug, Clone, Error)]
pub enum StrategyError {
    /// The task failed shape validation
    #[error(transparent)]
    MalformedTask(#[from] TaskError),

    /// No registered strategy can handle the task
    #[error("No strategy found for task {0}")]
    NoStrategyFound(String),

    /// A strategy with this name is already registered
    #[error("Strategy already registered: {0}")]
    AlreadyRegistered(String),

    /// A strategy's `can_handle` check errored
    #[error("Strategy {strategy} cannot evaluate task: {reason}")]
    Evaluation {
        /// Strategy name
        strategy: String,
        /// What went wrong
        reason: String,
    },

    /// Recursion went past the configured depth
    #[error("Maximum depth {max_depth} reached at task {task_id}")]
    DepthExceeded {
        /// Task that would have gone deeper
        task_id: String,
        /// Configured limit
        max_depth: usize,
    },

    /// The task repeats one of its ancestors
    #[error("Cycle detected: task {task_id} repeats ancestor {ancestor}")]
    CycleDetected {
        /// Repeating task
        task_id: String,
        /// Ancestor it repeats
        ancestor: String,
    },

    /// Sibling subtasks wait on each other
    #[error("Circular dependency among subtasks: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    /// Declared dependencies have not completed
    #[error("Dependencies not met for task {task_id}: {}", missing.join(", "))]
    DependenciesNotMet {
        /// Waiting task
        task_id: String,
        /// Dependencies not yet completed
        missing: Vec<String>,
    },

    /// The task carries no func, tool, prompt or data
    #[error("Task {0} has nothing to execute directly")]
    NotExecutable(String),

    /// The named tool is not registered
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The tool errored or reported failure
    #[error("Tool {tool} failed: {message}")]
    ToolFailed {
        /// Tool name
        tool: String,
        /// Failure reported by the tool
        message: String,
    },

    /// An `@name` reference could not be resolved
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// The model client errored
    #[error("Model request failed: {0}")]
    Model(String),

    /// The task's function errored
    #[error("Function of task {task_id} failed: {message}")]
    Function {
        /// Owning task
        task_id: String,
        /// Error chain
        message: String,
    },

    /// An attempt ran past its deadline
    #[error("Task {task_id} timed out after {after:?}")]
    Timeout {
        /// Timed-out task
        task_id: String,
        /// Deadline that expired
        after: Duration,
    },

    /// A critical subtask failed and aborted its parent
    #[error("Subtask {task_id} failed: {message}")]
    SubtaskFailed {
        /// Failed subtask
        task_id: String,
        /// Its error
        message: String,
    },

    /// The result did not pass the task's validation
    #[error("Validation failed for task {task_id}: {reason}")]
    ValidationFailed {
        /// Validated task
        task_id: String,
        /// Rule that failed
        reason: String,
    },

    /// Decomposition could not produce subtasks
    #[error("Decomposition failed: {0}")]
    Decomposition(String),
}

impl StrategyError {
    /// Whether the error propagates out of `execute` instead of becoming a
    /// failed result.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MalformedTask(_)
                | Self::NoStrategyFound(_)
                | Self::DepthExceeded { .. }
                | Self::CycleDetected { .. }
                | Self::CircularDependency(_)
                | Self::DependenciesNotMet { .. }
                | Self::NotExecutable(_)
        )
    }

    /// Whether running the same task again could change the outcome.
    pub fn is_retryable(&self) -> bool {
        !self.is_fatal() && !matches!(self, Self::ToolNotFound(_) | Self::Artifact(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(StrategyError::CycleDetected { task_id: "a".into(), ancestor: "a".into() }.is_fatal());
        assert!(StrategyError::NoStrategyFound("a".into()).is_fatal());
        assert!(!StrategyError::ToolNotFound("x".into()).is_fatal());
        assert!(!StrategyError::Timeout { task_id: "a".into(), after: Duration::from_millis(5) }.is_fatal());
    }

    #[test]
    fn test_dependencies_message() {
        let err = StrategyError::DependenciesNotMet {
            task_id: "t".into(),
            missing: vec!["missing".into(), "other".into()],
        };
        assert_eq!(err.to_string(), "Dependencies not met for task t: missing, other");
    }

    #[test]
    fn test_retryable() {
        assert!(StrategyError::Model("down".into()).is_retryable());
        assert!(!StrategyError::ToolNotFound("x".into()).is_retryable());
        assert!(!StrategyError::NotExecutable("x".into()).is_retryable());
    }
}
