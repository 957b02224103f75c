//! Execution results.

use crate::id::ContextId;
use crate::Time;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one subtask inside a composite strategy. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskResult {
    /// Subtask id
    pub task_id: String,

    /// Whether it succeeded (possibly after recovery)
    pub success: bool,

    /// Result value on success
    pub result: Option<Value>,

    /// Branch the subtask ran on
    pub context: Option<ContextId>,

    /// Error message on failure
    pub error: Option<String>,

    /// Whether an error-recovery collaborator turned a failure into success
    #[serde(default)]
    pub recovered: bool,
}

impl SubtaskResult {
    /// Successful subtask.
    pub fn ok(task_id: impl Into<String>, result: Value) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            result: Some(result),
            context: None,
            error: None,
            recovered: false,
        }
    }

    /// Failed subtask.
    pub fn failed(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            result: None,
            context: None,
            error: Some(error.into()),
            recovered: false,
        }
    }

    /// Attach the branch id.
    pub fn on_context(mut self, context: ContextId) -> Self {
        self.context = Some(context);
        self
    }
}

/// Metadata attached to every task result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    /// Strategy that produced the result
    pub strategy: String,

    /// When the result was produced
    pub timestamp: Time,

    /// Task id
    pub task_id: String,

    /// Wall time in milliseconds
    pub execution_time: u64,
}

/// Result of `Strategy::execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    /// Whether the task succeeded
    pub success: bool,

    /// Result value on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error message on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Error chain on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,

    /// Metadata
    pub metadata: ResultMetadata,

    /// Whether running the task again could change a failed outcome
    #[serde(skip, default = "retryable_by_default")]
    pub retryable: bool,
}

fn retryable_by_default() -> bool {
    true
}

impl TaskResult {
    /// Successful result.
    pub fn success(result: Value, metadata: ResultMetadata) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            error_stack: None,
            metadata,
            retryable: true,
        }
    }

    /// Failed result.
    pub fn failure(error: impl Into<String>, error_stack: impl Into<String>, metadata: ResultMetadata) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            error_stack: Some(error_stack.into()),
            metadata,
            retryable: true,
        }
    }

    /// Mark a failure as not worth retrying.
    pub fn permanent(mut self) -> Self {
        self.retryable = false;
        self
    }

    /// Convert into the subtask view used by composite strategies.
    pub fn into_subtask(self) -> SubtaskResult {
        SubtaskResult {
            task_id: self.metadata.task_id,
            success: self.success,
            result: self.result,
            context: None,
            error: self.error,
            recovered: false,
        }
    }
}
