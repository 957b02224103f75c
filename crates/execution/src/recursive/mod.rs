//! Recursive strategy - hierarchical decomposition.
//!
//! Per invocation: evaluate (dependency, cycle and depth guards) → decompose
//! or execute directly → execute subtasks → compose. Subtasks recurse into
//! this strategy unless they ask for another one.

mod decompose;
mod heuristic;

pub use heuristic::{has_step_structure, heuristic_decomposition, split_steps};

use crate::aggregate::compose;
use crate::config::RecursiveConfig;
use crate::dependency::{DependencyGraph, Resolution};
use crate::direct::execute_direct;
use crate::error::StrategyError;
use crate::resolver::StrategyResolver;
use crate::scheduler::{BoundedRunner, Flow};
use crate::strategy::{complete, prepare, DepsCell, ExecutionStrategy, StrategyDeps, RECURSIVE};
use crate::subtask::{run_subtask, SubtaskOptions, SubtaskRunner};
use async_trait::async_trait;
use conductor_core::{Decomposition, DecompositionStrategy, ExecutionContext, SubtaskResult, Task, TaskResult};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

const COMPLEXITY_KEYWORDS: &[&str] = &[
    "analyze",
    "architecture",
    "complex",
    "comprehensive",
    "design",
    "implement",
    "integrate",
    "multiple",
    "pipeline",
    "refactor",
    "research",
    "system",
];

/// Decomposes tasks and runs the pieces, bounded by `max_depth` and cycle
/// detection.
#[derive(Debug, Default)]
pub struct RecursiveStrategy {
    deps: DepsCell,
    config: RecursiveConfig,
    cache: Mutex<HashMap<String, Arc<Decomposition>>>,
}

impl RecursiveStrategy {
    /// Create the strategy.
    pub fn new(deps: StrategyDeps, config: RecursiveConfig) -> Self {
        Self {
            deps: DepsCell::new(deps),
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Configuration.
    pub fn config(&self) -> &RecursiveConfig {
        &self.config
    }

    /// Drop every memoized decomposition.
    pub fn clear_cache(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Number of memoized decompositions.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether a subtask should go through the resolver instead of recursing.
    pub(crate) fn delegates(task: &Task) -> bool {
        let other_strategy = task.strategy.as_deref().is_some_and(|s| !s.is_empty() && s != RECURSIVE);
        task.atomic
            || other_strategy
            || task.parallel
            || task.sequential
            || !task.steps.is_empty()
            || !task.operations.is_empty()
            || task.batch.is_some()
            || task.map.is_some()
    }

    /// Weighted complexity score in [0, 1]: description length, complexity
    /// keywords, subtasks and constraints, minus a penalty per depth level.
    pub fn complexity(&self, task: &Task, depth: usize) -> f64 {
        let text = task.description.as_deref().or(task.direct_text()).unwrap_or("");
        let lower = text.to_lowercase();

        let length = (text.chars().count() as f64 / 500.0).min(1.0) * 0.3;
        let hits = COMPLEXITY_KEYWORDS.iter().filter(|k| lower.contains(*k)).count();
        let keywords = (hits as f64 * 0.1).min(0.3);
        let subtasks = if task.subtasks.is_empty() { 0.0 } else { 0.2 };
        let constraints = if task.constraints.is_empty() { 0.0 } else { 0.1 };

        (length + keywords + subtasks + constraints - 0.1 * depth as f64).clamp(0.0, 1.0)
    }

    fn wants_recursion(task: &Task) -> bool {
        task.recursive || task.strategy.as_deref() == Some(RECURSIVE)
    }

    fn has_described_steps(task: &Task) -> bool {
        task.direct_text().is_some_and(has_step_structure)
    }

    /// Whether to decompose rather than execute directly. Always false at
    /// the depth limit.
    pub fn should_decompose(&self, task: &Task, ctx: &ExecutionContext) -> bool {
        if ctx.depth() >= self.config.max_depth {
            return false;
        }
        if task.decompose || task.breakdown {
            return true;
        }
        let described = task.description.as_deref().is_some_and(|d| !d.trim().is_empty());
        if Self::wants_recursion(task) && (!task.subtasks.is_empty() || described) {
            return true;
        }
        if Self::has_described_steps(task) {
            return true;
        }
        if !task.subtasks.is_empty() && !task.has_executable_content() {
            return true;
        }
        self.complexity(task, ctx.depth()) >= self.config.decompose_threshold
    }

    async fn run_sequential(
        &self,
        task: &Task,
        subtasks: &[Task],
        ctx: &mut ExecutionContext,
        deps: &StrategyDeps,
        resolver: &StrategyResolver,
    ) -> Result<Vec<SubtaskResult>, StrategyError> {
        let runner = SubtaskRunner::Recursive { strategy: self, resolver };
        let mut results = Vec::with_capacity(subtasks.len());

        for subtask in subtasks {
            let mut child = ctx.create_child(task);
            let opts = SubtaskOptions {
                strategy: RECURSIVE,
                timeout: subtask.timeout_override(),
                critical: subtask.is_critical_in_sequence(),
            };
            let result = run_subtask(subtask, &mut child, deps, opts, runner).await;
            ctx.merge_child(child);

            if !result.success && subtask.is_critical_in_sequence() {
                return Err(StrategyError::SubtaskFailed {
                    task_id: subtask.id.clone(),
                    message: result.error.unwrap_or_default(),
                });
            }
            results.push(result);
        }
        Ok(results)
    }

    /// Run `batch` (indices into `subtasks`) concurrently on fresh branches
    /// and merge them back. A failed `critical: true` subtask aborts.
    async fn run_concurrent(
        &self,
        task: &Task,
        subtasks: &[Task],
        batch: Vec<usize>,
        ctx: &mut ExecutionContext,
        deps: &StrategyDeps,
        resolver: &StrategyResolver,
    ) -> Result<Vec<(usize, SubtaskResult)>, StrategyError> {
        let runner = SubtaskRunner::Recursive { strategy: self, resolver };
        let branches = ctx.create_parallel_contexts(task, batch.len());
        let items: Vec<(usize, ExecutionContext)> = batch.into_iter().zip(branches).collect();

        let report = BoundedRunner::new(self.config.concurrency(task))
            .run(
                items,
                |_, (index, mut branch)| async move {
                    let subtask = &subtasks[index];
                    let opts = SubtaskOptions {
                        strategy: RECURSIVE,
                        timeout: subtask.timeout_override(),
                        critical: subtask.is_critical_in_batch(),
                    };
                    let result = run_subtask(subtask, &mut branch, deps, opts, runner).await;
                    (index, result, branch)
                },
                |_, (index, result, _)| {
                    if !result.success && subtasks[*index].is_critical_in_batch() {
                        Flow::Abort
                    } else {
                        Flow::Continue
                    }
                },
            )
            .await;

        let mut results = Vec::new();
        let mut branches = Vec::new();
        for (_, (index, result, branch)) in report.finished() {
            results.push((index, result));
            branches.push(branch);
        }
        ctx.merge_parallel_results(branches);

        if let Some((index, cause)) = results
            .iter()
            .find(|(index, r)| !r.success && subtasks[*index].is_critical_in_batch())
        {
            return Err(StrategyError::SubtaskFailed {
                task_id: subtasks[*index].id.clone(),
                message: cause.error.clone().unwrap_or_default(),
            });
        }
        Ok(results)
    }

    async fn run_parallel(
        &self,
        task: &Task,
        subtasks: &[Task],
        ctx: &mut ExecutionContext,
        deps: &StrategyDeps,
        resolver: &StrategyResolver,
    ) -> Result<Vec<SubtaskResult>, StrategyError> {
        let all = (0..subtasks.len()).collect();
        let mut results = self.run_concurrent(task, subtasks, all, ctx, deps, resolver).await?;
        results.sort_by_key(|(index, _)| *index);
        Ok(results.into_iter().map(|(_, r)| r).collect())
    }

    /// Frontier by frontier along sibling dependencies. Subtasks whose
    /// dependency failed are recorded as failed without running.
    async fn run_mixed(
        &self,
        task: &Task,
        subtasks: &[Task],
        ctx: &mut ExecutionContext,
        deps: &StrategyDeps,
        resolver: &StrategyResolver,
    ) -> Result<Vec<SubtaskResult>, StrategyError> {
        let graph = DependencyGraph::build(subtasks);
        let mut settled = HashSet::new();
        let mut failed = HashSet::new();
        let mut results: Vec<Option<SubtaskResult>> = vec![None; subtasks.len()];

        loop {
            let frontier = match graph.frontier(&settled) {
                Resolution::Done => break,
                Resolution::Circular(ids) => return Err(StrategyError::CircularDependency(ids)),
                Resolution::Ready(frontier) => frontier,
            };

            let mut runnable = Vec::new();
            for index in frontier {
                settled.insert(index);
                match graph.dependencies(index).iter().find(|d| failed.contains(*d)) {
                    Some(&dep) => {
                        debug!(task_id = %subtasks[index].id, dependency = %subtasks[dep].id, "skipping subtask");
                        failed.insert(index);
                        results[index] = Some(SubtaskResult::failed(
                            subtasks[index].id.clone(),
                            format!("Dependency {} failed", subtasks[dep].id),
                        ));
                    }
                    None => runnable.push(index),
                }
            }

            for (index, result) in self.run_concurrent(task, subtasks, runnable, ctx, deps, resolver).await? {
                if !result.success {
                    failed.insert(index);
                }
                results[index] = Some(result);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }
}

#[async_trait]
impl ExecutionStrategy for RecursiveStrategy {
    fn name(&self) -> &str {
        RECURSIVE
    }

    fn can_handle(&self, task: &Task, ctx: &ExecutionContext) -> Result<bool, StrategyError> {
        if Self::wants_recursion(task) || task.decompose || task.breakdown {
            return Ok(true);
        }
        if Self::delegates(task) || task.strategy.is_some() {
            return Ok(false);
        }
        if ctx.depth() >= self.config.max_depth {
            return Ok(false);
        }
        Ok(Self::has_described_steps(task) || self.complexity(task, ctx.depth()) >= self.config.decompose_threshold)
    }

    fn estimate_complexity(&self, task: &Task, ctx: &ExecutionContext) -> Option<f64> {
        Some(self.complexity(task, ctx.depth()))
    }

    async fn execute(
        &self,
        task: &Task,
        ctx: &mut ExecutionContext,
        resolver: &StrategyResolver,
    ) -> Result<TaskResult, StrategyError> {
        let started = Instant::now();
        prepare(task, ctx)?;

        if self.config.cycle_detection {
            if let Some(ancestor) = ctx.find_cycle(task) {
                return Err(StrategyError::CycleDetected {
                    task_id: task.id.clone(),
                    ancestor: ancestor.id.clone(),
                });
            }
        }

        let deps = self.deps.get();
        let depth = ctx.depth();

        if depth >= self.config.max_depth {
            if !task.has_executable_content() {
                return Err(StrategyError::DepthExceeded {
                    task_id: task.id.clone(),
                    max_depth: self.config.max_depth,
                });
            }
            warn!(task_id = %task.id, depth, "maximum depth reached, executing directly");
            let outcome = execute_direct(task, ctx, &deps).await;
            return complete(RECURSIVE, task, ctx, started, outcome);
        }

        if !self.should_decompose(task, ctx) {
            debug!(task_id = %task.id, depth, "executing directly");
            let outcome = execute_direct(task, ctx, &deps).await;
            return complete(RECURSIVE, task, ctx, started, outcome);
        }

        let decomposition = match self.decompose(task, ctx, &deps).await {
            Ok(d) if !d.is_empty() => d,
            Ok(_) => {
                debug!(task_id = %task.id, "empty decomposition, executing directly");
                let outcome = execute_direct(task, ctx, &deps).await;
                return complete(RECURSIVE, task, ctx, started, outcome);
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "decomposition failed, executing directly");
                let outcome = execute_direct(task, ctx, &deps).await;
                return complete(RECURSIVE, task, ctx, started, outcome);
            }
        };

        let mode = match decomposition.strategy {
            DecompositionStrategy::Parallel if decomposition.has_internal_dependencies() => DecompositionStrategy::Mixed,
            other => other,
        };
        let source = decomposition.metadata.source.to_string();
        info!(
            task_id = %task.id,
            depth,
            subtasks = decomposition.subtasks.len(),
            mode = %mode,
            source = %source,
            "decomposed task"
        );
        deps.emit(|p| {
            p.custom(
                "decomposition.created",
                serde_json::json!({
                    "taskId": task.id,
                    "subtasks": decomposition.subtasks.len(),
                    "strategy": mode.to_string(),
                    "source": source,
                }),
            )
        });

        let subtasks = &decomposition.subtasks;
        let results = match mode {
            DecompositionStrategy::Sequential => self.run_sequential(task, subtasks, ctx, &deps, resolver).await,
            DecompositionStrategy::Parallel => self.run_parallel(task, subtasks, ctx, &deps, resolver).await,
            DecompositionStrategy::Mixed => self.run_mixed(task, subtasks, ctx, &deps, resolver).await,
        };

        let outcome = results.map(|results| compose(task, &results, &source));
        complete(RECURSIVE, task, ctx, started, outcome)
    }

    fn update_dependencies(&self, deps: &StrategyDeps) -> bool {
        self.deps.replace(deps.clone());
        true
    }
}
