//! The execution engine - entry point for running a task tree.
//!
//! ```text
//! Validate → Root context → Select strategy → Execute → Report
//! ```

use crate::config::ExecutionConfig;
use crate::error::StrategyError;
use crate::resolver::StrategyResolver;
use crate::strategy::StrategyDeps;
use conductor_core::{ArtifactRegistry, ExecutionContext, Task, TaskResult};
use tracing::{debug, error, info, warn};

/// Runs tasks through a [`StrategyResolver`].
#[derive(Debug)]
pub struct ExecutionEngine {
    resolver: StrategyResolver,
    runs: usize,
}

impl ExecutionEngine {
    /// Create an engine around an existing resolver.
    pub fn new(resolver: StrategyResolver) -> Self {
        Self { resolver, runs: 0 }
    }

    /// Create an engine with the built-in strategies.
    pub fn from_config(deps: StrategyDeps, config: ExecutionConfig) -> Self {
        Self::new(StrategyResolver::with_defaults(deps, config))
    }

    /// Run `task` on a fresh root context.
    pub async fn run(&mut self, task: &Task) -> Result<TaskResult, StrategyError> {
        let mut ctx = ExecutionContext::new();
        self.run_in(task, &mut ctx).await
    }

    /// Run `task` on a root context seeded with `artifacts`.
    pub async fn run_with_artifacts(
        &mut self,
        task: &Task,
        artifacts: ArtifactRegistry,
    ) -> Result<TaskResult, StrategyError> {
        let mut ctx = ExecutionContext::new().with_artifacts(artifacts);
        self.run_in(task, &mut ctx).await
    }

    /// Run `task` on the given context.
    ///
    /// Malformed tasks are rejected before any strategy runs. Only fatal
    /// errors come back as `Err`; everything else is a failed [`TaskResult`].
    pub async fn run_in(&mut self, task: &Task, ctx: &mut ExecutionContext) -> Result<TaskResult, StrategyError> {
        self.runs += 1;
        info!(task_id = %task.id, run = self.runs, "Starting task: {}", task.label());

        if let Err(e) = task.validate() {
            error!(task_id = %task.id, error = %e, "Rejected malformed task");
            return Err(e.into());
        }

        let strategy = self.resolver.select_strategy(task, ctx).await?;
        debug!(task_id = %task.id, strategy = %strategy.name(), "Selected strategy");

        match strategy.execute(task, ctx, &self.resolver).await {
            Ok(result) if result.success => {
                info!(
                    task_id = %task.id,
                    strategy = %result.metadata.strategy,
                    elapsed_ms = result.metadata.execution_time,
                    "Task completed"
                );
                Ok(result)
            }
            Ok(result) => {
                warn!(
                    task_id = %task.id,
                    strategy = %result.metadata.strategy,
                    error = result.error.as_deref().unwrap_or_default(),
                    "Task failed"
                );
                Ok(result)
            }
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Task aborted");
                Err(e)
            }
        }
    }

    /// Number of tasks run so far.
    pub fn runs(&self) -> usize {
        self.runs
    }

    /// Get a reference to the resolver.
    pub fn resolver(&self) -> &StrategyResolver {
        &self.resolver
    }

    /// Get a mutable reference to the resolver.
    pub fn resolver_mut(&mut self) -> &mut StrategyResolver {
        &mut self.resolver
    }
}
