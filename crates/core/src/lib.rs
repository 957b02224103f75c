//! Conductor core data models.
//!
//! Tasks, execution contexts, artifacts and results shared by the
//! orchestration strategies.

#![warn(missing_docs)]

// Identities
mod id;

// Task model
mod task;
mod decomposition;
mod result;
mod error;

// Branch state
mod artifact;
mod context;
mod conversation;

// Re-exports
pub use id::ContextId;
pub use task::{
    AggregationType, BackoffStrategy, CombineFn, CompositionType, OutputSpec, RetryPolicy, Task, TaskFn,
    TaskTemplate, Validation,
};
pub use decomposition::{Decomposition, DecompositionMetadata, DecompositionSource, DecompositionStrategy};
pub use result::{ResultMetadata, SubtaskResult, TaskResult};
pub use error::{ArtifactError, TaskError};
pub use artifact::{
    reference_name, value_type, ArtifactMetadata, ArtifactRecord, ArtifactRegistry, ResolvedInputs,
    REFERENCE_PREFIX,
};
pub use context::{ExecutionContext, TaskFrame};
pub use conversation::{ConversationEntry, Role};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
