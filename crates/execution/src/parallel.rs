//! Parallel strategy - bounded concurrent batches.

use crate::aggregate::aggregate;
use crate::config::ParallelConfig;
use crate::direct::execute_direct;
use crate::error::StrategyError;
use crate::resolver::StrategyResolver;
use crate::scheduler::{BoundedRunner, Flow};
use crate::strategy::{complete, prepare, DepsCell, ExecutionStrategy, StrategyDeps, PARALLEL};
use crate::subtask::{run_subtask, SubtaskOptions, SubtaskRunner};
use async_trait::async_trait;
use conductor_core::{ExecutionContext, SubtaskResult, Task, TaskResult};
use serde_json::json;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs a batch of subtasks with at most `max_concurrency` in flight.
///
/// Each subtask runs on its own branch; branches are merged back in
/// subtask order once the batch settles.
#[derive(Debug, Default)]
pub struct ParallelStrategy {
    deps: DepsCell,
    config: ParallelConfig,
}

impl ParallelStrategy {
    /// Create the strategy.
    pub fn new(deps: StrategyDeps, config: ParallelConfig) -> Self {
        Self {
            deps: DepsCell::new(deps),
            config,
        }
    }

    /// Configuration.
    pub fn config(&self) -> &ParallelConfig {
        &self.config
    }

    /// Expand the task's composite markers into concrete subtasks.
    pub fn extract_subtasks(&self, task: &Task) -> Vec<Task> {
        let mut subtasks = task.subtasks.clone();

        subtasks.extend(task.operations.iter().enumerate().map(|(i, op)| {
            let mut op = op.clone();
            if op.id.trim().is_empty() {
                op.id = format!("{}-op-{}", task.id, i);
            }
            op
        }));

        if let Some(template) = &task.batch {
            subtasks.extend(task.items.iter().enumerate().map(|(i, item)| Task {
                id: format!("{}-item-{}", task.id, i),
                input: Some(item.clone()),
                ..(**template).clone()
            }));
        }

        if let Some(map_fn) = &task.map {
            let is_tool = self
                .deps
                .get()
                .tools
                .is_some_and(|tools| tools.get_tool(map_fn).is_some());
            subtasks.extend(task.collection.iter().enumerate().map(|(i, item)| {
                let id = format!("{}-map-{}", task.id, i);
                if is_tool {
                    Task::new(id).with_tool(map_fn.clone(), item.clone())
                } else {
                    Task {
                        operation: Some(map_fn.clone()),
                        input: Some(item.clone()),
                        ..Task::new(id)
                    }
                }
            }));
        }

        subtasks
    }
}

#[async_trait]
impl ExecutionStrategy for ParallelStrategy {
    fn name(&self) -> &str {
        PARALLEL
    }

    fn can_handle(&self, task: &Task, _ctx: &ExecutionContext) -> Result<bool, StrategyError> {
        if task.sequential {
            return Ok(false);
        }
        Ok(task.parallel
            || task.strategy.as_deref() == Some(PARALLEL)
            || !task.subtasks.is_empty()
            || !task.operations.is_empty()
            || task.batch.is_some()
            || task.map.is_some())
    }

    async fn execute(
        &self,
        task: &Task,
        ctx: &mut ExecutionContext,
        resolver: &StrategyResolver,
    ) -> Result<TaskResult, StrategyError> {
        let started = Instant::now();
        prepare(task, ctx)?;
        let deps = self.deps.get();

        let subtasks = self.extract_subtasks(task);
        if subtasks.is_empty() {
            debug!(task_id = %task.id, "empty batch");
            let outcome = if task.has_executable_content() {
                execute_direct(task, ctx, &deps).await
            } else {
                Ok(aggregate(task, &[]))
            };
            return complete(PARALLEL, task, ctx, started, outcome);
        }

        let settings = self.config.effective(task);
        let total = subtasks.len();
        info!(
            task_id = %task.id,
            subtasks = total,
            max_concurrency = settings.max_concurrency.get(),
            fail_fast = settings.fail_fast,
            "running batch"
        );
        deps.emit(|p| p.started(json!({ "taskId": task.id, "strategy": PARALLEL, "subtasks": total })));

        let branches = ctx.create_parallel_contexts(task, total);
        let items: Vec<(Task, ExecutionContext)> = subtasks.into_iter().zip(branches).collect();

        let mut finished = 0usize;
        let mut abort_cause: Option<SubtaskResult> = None;
        let report = {
            let deps = &deps;
            BoundedRunner::new(settings.max_concurrency)
                .run(
                    items,
                    |_, (subtask, mut branch)| async move {
                        let opts = SubtaskOptions {
                            strategy: PARALLEL,
                            timeout: Some(settings.timeout),
                            critical: subtask.is_critical_in_batch(),
                        };
                        let result =
                            run_subtask(&subtask, &mut branch, deps, opts, SubtaskRunner::Resolver(resolver)).await;
                        (result, branch, subtask.is_critical_in_batch())
                    },
                    |_, (result, _, critical)| {
                        finished += 1;
                        deps.emit(|p| {
                            p.progress(
                                finished as f64 * 100.0 / total as f64,
                                json!({ "taskId": task.id, "subtask": result.task_id, "success": result.success }),
                            )
                        });
                        if !result.success && (settings.fail_fast || *critical) {
                            abort_cause = Some(result.clone());
                            Flow::Abort
                        } else {
                            Flow::Continue
                        }
                    },
                )
                .await
        };

        let aborted = report.aborted;
        let mut results = Vec::with_capacity(total);
        let mut branches = Vec::with_capacity(total);
        for (_, (result, branch, _)) in report.finished() {
            results.push(result);
            branches.push(branch);
        }
        ctx.merge_parallel_results(branches);

        let outcome = match abort_cause.filter(|_| aborted) {
            Some(cause) => {
                warn!(task_id = %task.id, subtask = %cause.task_id, "batch aborted");
                deps.emit(|p| p.failed(json!({ "taskId": task.id, "subtask": cause.task_id })));
                Err(StrategyError::SubtaskFailed {
                    task_id: cause.task_id,
                    message: cause.error.unwrap_or_default(),
                })
            }
            None => {
                let failed = results.iter().filter(|r| !r.success).count();
                deps.emit(|p| {
                    p.completed(json!({
                        "taskId": task.id,
                        "successful": results.len() - failed,
                        "failed": failed,
                    }))
                });
                Ok(aggregate(task, &results))
            }
        };
        complete(PARALLEL, task, ctx, started, outcome)
    }

    fn update_dependencies(&self, deps: &StrategyDeps) -> bool {
        self.deps.replace(deps.clone());
        true
    }
}
