//! The execution strategy interface and the helpers every strategy shares.

use crate::error::StrategyError;
use crate::progress::ProgressEmitter;
use crate::recovery::ErrorRecovery;
use crate::resolver::StrategyResolver;
use async_trait::async_trait;
use conductor_ai::ModelClient;
use conductor_core::{ExecutionContext, ResolvedInputs, ResultMetadata, Task, TaskResult};
use conductor_tools::ToolRegistry;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, warn};

/// Name of the atomic strategy.
pub const ATOMIC: &str = "atomic";
/// Name of the sequential strategy.
pub const SEQUENTIAL: &str = "sequential";
/// Name of the parallel strategy.
pub const PARALLEL: &str = "parallel";
/// Name of the recursive strategy.
pub const RECURSIVE: &str = "recursive";

/// A policy for running a task.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// Registered name.
    fn name(&self) -> &str;

    /// Whether this strategy accepts the task.
    ///
    /// An `Err` means the strategy could not evaluate the task; the resolver
    /// logs it and moves on.
    fn can_handle(&self, task: &Task, ctx: &ExecutionContext) -> Result<bool, StrategyError>;

    /// Complexity estimate in [0, 1], if the strategy computes one.
    fn estimate_complexity(&self, _task: &Task, _ctx: &ExecutionContext) -> Option<f64> {
        None
    }

    /// Run the task.
    ///
    /// Only fatal errors (see [`StrategyError::is_fatal`]) come back as `Err`;
    /// everything else is a failed [`TaskResult`].
    async fn execute(
        &self,
        task: &Task,
        ctx: &mut ExecutionContext,
        resolver: &StrategyResolver,
    ) -> Result<TaskResult, StrategyError>;

    /// Accept new collaborators. Returns false if the instance must be
    /// rebuilt instead.
    fn update_dependencies(&self, _deps: &StrategyDeps) -> bool {
        false
    }
}

/// Collaborators injected into strategies.
#[derive(Clone, Default)]
pub struct StrategyDeps {
    /// Tool registry
    pub tools: Option<Arc<dyn ToolRegistry>>,
    /// Model-prompt client
    pub model: Option<Arc<dyn ModelClient>>,
    /// Error-recovery collaborator
    pub recovery: Option<Arc<dyn ErrorRecovery>>,
    /// Progress emitter
    pub progress: Option<Arc<dyn ProgressEmitter>>,
}

impl StrategyDeps {
    /// No collaborators.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tool registry.
    pub fn with_tools(mut self, tools: Arc<dyn ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Set the model client.
    pub fn with_model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    /// Set the recovery collaborator.
    pub fn with_recovery(mut self, recovery: Arc<dyn ErrorRecovery>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    /// Set the progress emitter.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressEmitter>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Overlay `other` on top of these collaborators.
    pub fn merged(&self, other: &StrategyDeps) -> Self {
        Self {
            tools: other.tools.clone().or_else(|| self.tools.clone()),
            model: other.model.clone().or_else(|| self.model.clone()),
            recovery: other.recovery.clone().or_else(|| self.recovery.clone()),
            progress: other.progress.clone().or_else(|| self.progress.clone()),
        }
    }

    pub(crate) fn emit(&self, f: impl FnOnce(&dyn ProgressEmitter)) {
        if let Some(progress) = self.progress.as_deref() {
            f(progress);
        }
    }
}

impl std::fmt::Debug for StrategyDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyDeps")
            .field("tools", &self.tools.is_some())
            .field("model", &self.model.is_some())
            .field("recovery", &self.recovery.is_some())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Collaborators that can be swapped while a strategy is registered.
#[derive(Debug, Default)]
pub struct DepsCell(RwLock<StrategyDeps>);

impl DepsCell {
    /// Wrap a set of collaborators.
    pub fn new(deps: StrategyDeps) -> Self {
        Self(RwLock::new(deps))
    }

    /// Snapshot of the current collaborators.
    pub fn get(&self) -> StrategyDeps {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Swap in new collaborators.
    pub fn replace(&self, deps: StrategyDeps) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = deps;
    }
}

/// Result metadata for a task run by `strategy` since `started`.
pub fn result_metadata(strategy: &str, task: &Task, started: Instant) -> ResultMetadata {
    ResultMetadata {
        strategy: strategy.to_string(),
        timestamp: chrono::Utc::now(),
        task_id: task.id.clone(),
        execution_time: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    }
}

/// Reject tasks whose dependencies have not completed on this branch.
pub fn check_dependencies(task: &Task, ctx: &ExecutionContext) -> Result<(), StrategyError> {
    let missing = ctx.missing_dependencies(task);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(StrategyError::DependenciesNotMet {
            task_id: task.id.clone(),
            missing,
        })
    }
}

/// Shape and dependency checks run before any strategy work.
pub fn prepare(task: &Task, ctx: &ExecutionContext) -> Result<(), StrategyError> {
    task.validate()?;
    check_dependencies(task, ctx)
}

/// Resolve `@name` references in a task input against the branch artifacts.
///
/// The returned value is an independent copy.
pub fn resolve_tool_inputs(input: Option<&Value>, ctx: &ExecutionContext) -> Result<ResolvedInputs, StrategyError> {
    match input {
        Some(input) => Ok(ctx.artifacts().resolve(input)?),
        None => Ok(ResolvedInputs {
            value: Value::Null,
            referenced: Vec::new(),
        }),
    }
}

/// Turn a strategy outcome into the public result.
///
/// Applies result validation and records successful tasks as completed.
/// Fatal errors propagate; everything else becomes a failed result.
pub fn complete(
    strategy: &str,
    task: &Task,
    ctx: &mut ExecutionContext,
    started: Instant,
    outcome: Result<Value, StrategyError>,
) -> Result<TaskResult, StrategyError> {
    let outcome = outcome.and_then(|value| match &task.validation {
        Some(validation) => validation
            .check(&value)
            .map(|_| value)
            .map_err(|reason| StrategyError::ValidationFailed {
                task_id: task.id.clone(),
                reason,
            }),
        None => Ok(value),
    });

    match outcome {
        Ok(value) => {
            ctx.mark_completed(task.id.clone(), value.clone());
            debug!(task_id = %task.id, strategy, "task succeeded");
            Ok(TaskResult::success(value, result_metadata(strategy, task, started)))
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!(task_id = %task.id, strategy, error = %e, "task failed");
            let result = TaskResult::failure(e.to_string(), format!("{e:?}"), result_metadata(strategy, task, started));
            Ok(if e.is_retryable() { result } else { result.permanent() })
        }
    }
}
