//! Sequential strategy - ordered steps, each seeing what the previous left.

use crate::aggregate::compose;
use crate::config::SequentialConfig;
use crate::direct::execute_direct;
use crate::error::StrategyError;
use crate::resolver::StrategyResolver;
use crate::strategy::{complete, prepare, DepsCell, ExecutionStrategy, StrategyDeps, SEQUENTIAL};
use crate::subtask::{run_subtask, SubtaskOptions, SubtaskRunner};
use async_trait::async_trait;
use conductor_core::{ExecutionContext, Task, TaskResult};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs `steps` (or `subtasks`) in order through the resolver.
///
/// A failing step aborts the sequence unless it is marked `critical: false`.
#[derive(Debug, Default)]
pub struct SequentialStrategy {
    deps: DepsCell,
    config: SequentialConfig,
}

impl SequentialStrategy {
    /// Create the strategy.
    pub fn new(deps: StrategyDeps, config: SequentialConfig) -> Self {
        Self {
            deps: DepsCell::new(deps),
            config,
        }
    }

    fn steps(task: &Task) -> &[Task] {
        if task.steps.is_empty() {
            &task.subtasks
        } else {
            &task.steps
        }
    }

    /// Hand the previous step's output to the next one.
    fn with_previous(step: &Task, previous: &Value) -> Task {
        Task {
            previous: Some(previous.clone()),
            ..step.clone()
        }
    }
}

#[async_trait]
impl ExecutionStrategy for SequentialStrategy {
    fn name(&self) -> &str {
        SEQUENTIAL
    }

    fn can_handle(&self, task: &Task, _ctx: &ExecutionContext) -> Result<bool, StrategyError> {
        Ok(task.sequential || task.strategy.as_deref() == Some(SEQUENTIAL) || !task.steps.is_empty())
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

        let steps = Self::steps(task);
        if steps.is_empty() {
            debug!(task_id = %task.id, "no steps, executing directly");
            let outcome = execute_direct(task, ctx, &deps).await;
            return complete(SEQUENTIAL, task, ctx, started, outcome);
        }

        info!(task_id = %task.id, steps = steps.len(), "running sequence");
        deps.emit(|p| p.started(json!({ "taskId": task.id, "strategy": SEQUENTIAL, "steps": steps.len() })));

        let mut results = Vec::with_capacity(steps.len());
        let mut previous: Option<Value> = None;
        let mut aborted = None;

        for (i, step) in steps.iter().enumerate() {
            let step = match (&previous, self.config.pass_previous_output) {
                (Some(prev), true) => Self::with_previous(step, prev),
                _ => step.clone(),
            };

            let mut child = ctx.create_child(task);
            let opts = SubtaskOptions {
                strategy: SEQUENTIAL,
                timeout: step.timeout_override(),
                critical: step.is_critical_in_sequence(),
            };
            let result = run_subtask(&step, &mut child, &deps, opts, SubtaskRunner::Resolver(resolver)).await;
            ctx.merge_child(child);

            deps.emit(|p| {
                p.progress(
                    (i + 1) as f64 * 100.0 / steps.len() as f64,
                    json!({ "taskId": task.id, "step": step.id, "success": result.success }),
                )
            });

            if result.success {
                previous = result.result.clone();
            } else if step.is_critical_in_sequence() {
                aborted = Some(StrategyError::SubtaskFailed {
                    task_id: step.id.clone(),
                    message: result.error.clone().unwrap_or_default(),
                });
                results.push(result);
                break;
            } else {
                warn!(task_id = %task.id, step = %step.id, "non-critical step failed, continuing");
            }
            results.push(result);
        }

        let outcome = match aborted {
            Some(e) => {
                deps.emit(|p| p.failed(json!({ "taskId": task.id, "error": e.to_string() })));
                Err(e)
            }
            None => {
                deps.emit(|p| p.completed(json!({ "taskId": task.id, "steps": results.len() })));
                Ok(compose(task, &results, SEQUENTIAL))
            }
        };
        complete(SEQUENTIAL, task, ctx, started, outcome)
    }

    fn update_dependencies(&self, deps: &StrategyDeps) -> bool {
        self.deps.replace(deps.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::test_support::{deps_with_tools, FailingTool};
    use conductor_core::{ArtifactRecord, CompositionType, OutputSpec};
    use conductor_tools::EchoTool;
    use std::sync::Arc;

    fn setup() -> (SequentialStrategy, StrategyResolver) {
        let deps = deps_with_tools(vec![Arc::new(EchoTool), Arc::new(FailingTool::erroring("broken"))]);
        let resolver = StrategyResolver::with_defaults(deps.clone(), ExecutionConfig::default());
        (SequentialStrategy::new(deps, SequentialConfig::default()), resolver)
    }

    #[test]
    fn test_can_handle() {
        let (strategy, _) = setup();
        let ctx = ExecutionContext::new();
        assert!(strategy
            .can_handle(&Task::new("a").with_steps(vec![Task::new("b").with_data(json!(1))]), &ctx)
            .unwrap());
        assert!(strategy.can_handle(&Task::new("a").with_strategy("sequential"), &ctx).unwrap());
        assert!(!strategy.can_handle(&Task::new("a").with_data(json!(1)), &ctx).unwrap());
    }

    #[tokio::test]
    async fn test_previous_output_flows_forward() {
        let (strategy, resolver) = setup();
        let mut ctx = ExecutionContext::new();
        let task = Task::new("seq")
            .with_steps(vec![
                Task::new("one").with_data(json!("first")),
                Task::new("two").with_tool("echo", json!({"own": 1})),
                Task::new("three").with_fn(|input| Ok(input.clone())),
            ])
            .with_composition(CompositionType::Last);

        let result = strategy.execute(&task, &mut ctx, &resolver).await.unwrap();
        assert!(result.success);
        assert_eq!(result.result, Some(json!({"own": 1, "previous": "first"})));
        assert!(ctx.is_completed("one") && ctx.is_completed("three") && ctx.is_completed("seq"));
    }

    #[tokio::test]
    async fn test_reference_shaped_output_passes_through_unresolved() {
        let (strategy, resolver) = setup();
        let mut ctx = ExecutionContext::new();
        let task = Task::new("seq")
            .with_steps(vec![
                Task::new("one").with_data(json!("@alice")),
                Task::new("two").with_tool("echo", json!({"own": 1})),
                Task::new("three").with_fn(|input| Ok(input.clone())),
            ])
            .with_composition(CompositionType::Last);

        let result = strategy.execute(&task, &mut ctx, &resolver).await.unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.result, Some(json!({"own": 1, "previous": "@alice"})));
        assert!(ctx.is_completed("two"));
    }

    #[tokio::test]
    async fn test_later_steps_see_earlier_artifacts() {
        let (strategy, resolver) = setup();
        let mut ctx = ExecutionContext::new();
        ctx.store_artifact("seed", ArtifactRecord::new(json!(1)));
        let task = Task::new("seq").with_steps(vec![
            Task::new("write").with_data(json!({"n": 2})).with_output(OutputSpec::new("made")),
            Task::new("read").with_tool("echo", json!({"a": "@seed", "b": "@made"})),
        ]);

        let result = strategy.execute(&task, &mut ctx, &resolver).await.unwrap();
        assert!(result.success);
        let value = result.result.unwrap();
        assert_eq!(value["result"][1], json!({"a": 1, "b": {"n": 2}, "previous": {"n": 2}}));
        assert!(ctx.artifacts().contains("made"));
    }

    #[tokio::test]
    async fn test_critical_failure_stops_the_sequence() {
        let (strategy, resolver) = setup();
        let mut ctx = ExecutionContext::new();
        let task = Task::new("seq").with_steps(vec![
            Task::new("a").with_tool("broken", json!({})),
            Task::new("b").with_data(json!(2)),
        ]);

        let result = strategy.execute(&task, &mut ctx, &resolver).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Subtask a failed"));
        assert!(!ctx.is_completed("b"));
    }

    #[tokio::test]
    async fn test_non_critical_failure_is_recorded() {
        let (strategy, resolver) = setup();
        let mut ctx = ExecutionContext::new();
        let task = Task::new("seq").with_steps(vec![
            Task::new("a").with_tool("broken", json!({})).critical(false),
            Task::new("b").with_data(json!(2)),
        ]);

        let result = strategy.execute(&task, &mut ctx, &resolver).await.unwrap();
        assert!(result.success);
        let value = result.result.unwrap();
        assert_eq!(value["result"], json!([2]));
        assert_eq!(value["metadata"]["failed"], 1);
        assert_eq!(value["metadata"]["source"], "sequential");
    }
}
