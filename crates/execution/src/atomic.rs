//! Atomic strategy - the leaf executor.

use crate::direct::execute_direct;
use crate::error::StrategyError;
use crate::resolver::StrategyResolver;
use crate::strategy::{complete, prepare, DepsCell, ExecutionStrategy, StrategyDeps, ATOMIC};
use async_trait::async_trait;
use conductor_core::{ExecutionContext, Task, TaskResult};
use std::time::Instant;
use tracing::debug;

/// Runs one tool call, function call or model prompt. No retry and no
/// decomposition; callers wrap it in their own retry policy.
#[derive(Debug, Default)]
pub struct AtomicStrategy {
    deps: DepsCell,
}

impl AtomicStrategy {
    /// Create the strategy.
    pub fn new(deps: StrategyDeps) -> Self {
        Self {
            deps: DepsCell::new(deps),
        }
    }
}

#[async_trait]
impl ExecutionStrategy for AtomicStrategy {
    fn name(&self) -> &str {
        ATOMIC
    }

    fn can_handle(&self, task: &Task, _ctx: &ExecutionContext) -> Result<bool, StrategyError> {
        if task.has_tool() || task.func.is_some() {
            return Ok(true);
        }
        Ok((task.direct_text().is_some() || task.data.is_some()) && !task.has_composite_marker())
    }

    async fn execute(
        &self,
        task: &Task,
        ctx: &mut ExecutionContext,
        _resolver: &StrategyResolver,
    ) -> Result<TaskResult, StrategyError> {
        let started = Instant::now();
        prepare(task, ctx)?;

        let deps = self.deps.get();
        debug!(task_id = %task.id, depth = ctx.depth(), "executing atomically");
        let outcome = execute_direct(task, ctx, &deps).await;
        complete(ATOMIC, task, ctx, started, outcome)
    }

    fn update_dependencies(&self, deps: &StrategyDeps) -> bool {
        self.deps.replace(deps.clone());
        true
    }
}
