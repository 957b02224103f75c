//! Decomposition sources, tried in order: predefined subtasks, the model,
//! the task template, then heuristics.

use super::heuristic::heuristic_decomposition;
use super::RecursiveStrategy;
use crate::error::StrategyError;
use crate::strategy::StrategyDeps;
use conductor_ai::{decomposition_prompt, parse_decomposition};
use conductor_core::{Decomposition, DecompositionSource, DecompositionStrategy, ExecutionContext, Task};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Characters of the description that go into the cache key.
const CACHE_PREFIX_CHARS: usize = 100;

pub(crate) fn cache_key(task: &Task, depth: usize) -> String {
    let text = task.description.as_deref().or(task.direct_text()).unwrap_or("");
    let prefix: String = text.chars().take(CACHE_PREFIX_CHARS).collect();
    let constraints = serde_json::to_string(&task.constraints).unwrap_or_default();
    format!("{prefix}|{constraints}|{depth}")
}

fn predefined(task: &Task) -> Decomposition {
    let mut decomposition = Decomposition::new(
        task.subtasks.clone(),
        DecompositionStrategy::Sequential,
        "Subtasks given with the task",
        DecompositionSource::Predefined,
        1.0,
    );
    decomposition.strategy = if decomposition.has_internal_dependencies() {
        DecompositionStrategy::Mixed
    } else if task.parallel {
        DecompositionStrategy::Parallel
    } else {
        DecompositionStrategy::Sequential
    };
    decomposition
}

fn from_template(task: &Task) -> Option<Decomposition> {
    let template = task.template.as_ref().filter(|t| !t.steps.is_empty())?;
    let subtasks = template
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let mut step = step.clone();
            if step.id.trim().is_empty() {
                step.id = format!("{}-tmpl-{}", task.id, i);
            }
            step
        })
        .collect();
    Some(Decomposition::new(
        subtasks,
        template.strategy.unwrap_or_default(),
        "Steps from the task template",
        DecompositionSource::Template,
        0.9,
    ))
}

/// Single-subtask decomposition running the task's own content directly.
fn fallback(task: &Task) -> Decomposition {
    let subtask = Task {
        id: format!("{}-direct", task.id),
        description: task.description.clone(),
        operation: task.operation.clone(),
        prompt: task.prompt.clone(),
        tool: task.tool.clone(),
        func: task.func.clone(),
        input: task.input.clone(),
        data: task.data.clone(),
        atomic: true,
        ..Default::default()
    };
    Decomposition::new(
        vec![subtask],
        DecompositionStrategy::Sequential,
        "Model reply was not a decomposition, executing directly",
        DecompositionSource::Fallback,
        0.3,
    )
}

impl RecursiveStrategy {
    /// Break `task` into subtasks.
    ///
    /// Predefined subtasks are used as they are; other sources are memoized
    /// per (description prefix, constraints, depth) when caching is on.
    pub(crate) async fn decompose(
        &self,
        task: &Task,
        ctx: &ExecutionContext,
        deps: &StrategyDeps,
    ) -> Result<Arc<Decomposition>, StrategyError> {
        if !task.subtasks.is_empty() {
            return Ok(Arc::new(predefined(task)));
        }

        let key = cache_key(task, ctx.depth());
        if self.config.cache_decompositions {
            if let Some(hit) = self.cached(&key) {
                debug!(task_id = %task.id, "decomposition cache hit");
                return Ok(hit);
            }
        }

        let decomposition = Arc::new(self.compute(task, ctx, deps).await?);
        if self.config.cache_decompositions && !decomposition.is_empty() {
            self.cache
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(key, decomposition.clone());
        }
        Ok(decomposition)
    }

    fn cached(&self, key: &str) -> Option<Arc<Decomposition>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
    }

    async fn compute(
        &self,
        task: &Task,
        ctx: &ExecutionContext,
        deps: &StrategyDeps,
    ) -> Result<Decomposition, StrategyError> {
        if let Some(model) = &deps.model {
            let request = decomposition_prompt(task, ctx.depth(), self.config.max_depth)
                .with_temperature(self.config.decomposition_temperature)
                .with_max_tokens(self.config.decomposition_max_tokens);
            let response = model
                .request(request)
                .await
                .map_err(|e| StrategyError::Decomposition(format!("{e:#}")))?;

            return Ok(match parse_decomposition(&task.id, &response.content) {
                Ok(decomposition) => decomposition,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "unparseable decomposition, falling back to direct execution");
                    deps.emit(|p| {
                        p.custom(
                            "decomposition.parse_fallback",
                            json!({ "taskId": task.id, "error": e.to_string() }),
                        )
                    });
                    fallback(task)
                }
            });
        }

        if let Some(decomposition) = from_template(task) {
            return Ok(decomposition);
        }

        Ok(heuristic_decomposition(task))
    }
}
