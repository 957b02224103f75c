//! Strategy resolver - picks the strategy that runs a task.
//!
//! Strategies are held in priority order (ties broken by registration
//! order). Selection tries, in turn: an explicit `task.strategy`, the
//! `atomic` flag, the task analyzer's recommendations, a priority scan of
//! `can_handle`, and finally the atomic strategy.

use crate::analysis::TaskAnalyzer;
use crate::atomic::AtomicStrategy;
use crate::config::ExecutionConfig;
use crate::error::StrategyError;
use crate::parallel::ParallelStrategy;
use crate::recursive::RecursiveStrategy;
use crate::sequential::SequentialStrategy;
use crate::strategy::{ExecutionStrategy, StrategyDeps, ATOMIC, PARALLEL, RECURSIVE, SEQUENTIAL};
use conductor_core::{ExecutionContext, Task, TaskResult};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds a strategy instance from the shared collaborators and configuration.
pub type StrategyFactory = Arc<dyn Fn(&StrategyDeps, &ExecutionConfig) -> Arc<dyn ExecutionStrategy> + Send + Sync>;

struct Registration {
    name: String,
    strategy: Arc<dyn ExecutionStrategy>,
    priority: i32,
}

/// What one strategy thinks of a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyEvaluation {
    /// Strategy name
    pub name: String,
    /// Registered priority
    pub priority: i32,
    /// `can_handle` answer, `None` if it failed
    pub can_handle: Option<bool>,
    /// Why `can_handle` failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Complexity estimate, if the strategy makes one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<f64>,
}

/// Priority-ordered set of strategies.
pub struct StrategyResolver {
    registrations: Vec<Registration>,
    factories: HashMap<String, StrategyFactory>,
    deps: StrategyDeps,
    analyzer: Option<Arc<dyn TaskAnalyzer>>,
    config: ExecutionConfig,
}

impl std::fmt::Debug for StrategyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyResolver")
            .field("strategies", &self.strategy_names())
            .field("deps", &self.deps)
            .field("analyzer", &self.analyzer.is_some())
            .finish()
    }
}

const DEFAULT_STRATEGIES: [&str; 4] = [RECURSIVE, PARALLEL, SEQUENTIAL, ATOMIC];

fn factory<F>(f: F) -> StrategyFactory
where
    F: Fn(&StrategyDeps, &ExecutionConfig) -> Arc<dyn ExecutionStrategy> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn default_factory(name: &str) -> Option<StrategyFactory> {
    let built = match name {
        RECURSIVE => factory(|deps, config| Arc::new(RecursiveStrategy::new(deps.clone(), config.recursive.clone()))),
        PARALLEL => factory(|deps, config| Arc::new(ParallelStrategy::new(deps.clone(), config.parallel.clone()))),
        SEQUENTIAL => factory(|deps, config| Arc::new(SequentialStrategy::new(deps.clone(), config.sequential.clone()))),
        ATOMIC => factory(|deps, _| Arc::new(AtomicStrategy::new(deps.clone()))),
        _ => return None,
    };
    Some(built)
}

impl StrategyResolver {
    /// Create an empty resolver.
    pub fn new(deps: StrategyDeps, config: ExecutionConfig) -> Self {
        Self {
            registrations: Vec::new(),
            factories: HashMap::new(),
            deps,
            analyzer: None,
            config,
        }
    }

    /// Create a resolver with the four built-in strategies, unless the
    /// configuration turns them off.
    pub fn with_defaults(deps: StrategyDeps, config: ExecutionConfig) -> Self {
        let mut resolver = Self::new(deps, config);
        if resolver.config.resolver.include_defaults {
            resolver.register_defaults();
        }
        resolver
    }

    fn register_defaults(&mut self) {
        for name in DEFAULT_STRATEGIES {
            if self.get_strategy(name).is_some() {
                continue;
            }
            let Some(factory) = default_factory(name) else {
                continue;
            };
            let priority = self.config.resolver.priorities.for_name(name).unwrap_or_default();
            let strategy = factory(&self.deps, &self.config);
            self.insert(strategy, priority);
            self.factories.insert(name.to_string(), factory);
        }
    }

    /// Set the task analyzer consulted before the priority scan.
    pub fn with_analyzer(mut self, analyzer: Arc<dyn TaskAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Shared collaborators.
    pub fn deps(&self) -> &StrategyDeps {
        &self.deps
    }

    /// Configuration.
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    fn insert(&mut self, strategy: Arc<dyn ExecutionStrategy>, priority: i32) {
        let registration = Registration {
            name: strategy.name().to_string(),
            strategy,
            priority,
        };

        // Highest priority first, earlier registration first on ties.
        let at = self
            .registrations
            .iter()
            .position(|r| r.priority < priority)
            .unwrap_or(self.registrations.len());
        self.registrations.insert(at, registration);
    }

    /// Register a strategy under its own name.
    pub fn register_strategy(&mut self, strategy: Arc<dyn ExecutionStrategy>, priority: i32) -> Result<(), StrategyError> {
        if self.get_strategy(strategy.name()).is_some() {
            return Err(StrategyError::AlreadyRegistered(strategy.name().to_string()));
        }
        info!(strategy = %strategy.name(), priority, "registered strategy");
        self.insert(strategy, priority);
        Ok(())
    }

    /// Register a strategy built by `factory`. The factory is kept so the
    /// instance can be rebuilt when collaborators change.
    pub fn register_factory(&mut self, priority: i32, factory: StrategyFactory) -> Result<(), StrategyError> {
        let strategy = factory(&self.deps, &self.config);
        let name = strategy.name().to_string();
        self.register_strategy(strategy, priority)?;
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Remove a strategy.
    pub fn unregister_strategy(&mut self, name: &str) -> Option<Arc<dyn ExecutionStrategy>> {
        let at = self.registrations.iter().position(|r| r.name == name)?;
        self.factories.remove(name);
        info!(strategy = name, "unregistered strategy");
        Some(self.registrations.remove(at).strategy)
    }

    /// Look up a strategy by name.
    pub fn get_strategy(&self, name: &str) -> Option<Arc<dyn ExecutionStrategy>> {
        self.registrations
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.strategy.clone())
    }

    /// Registered names, in the order the priority scan tries them.
    pub fn strategy_names(&self) -> Vec<&str> {
        self.registrations.iter().map(|r| r.name.as_str()).collect()
    }

    /// Choose the strategy for `task`.
    pub async fn select_strategy(
        &self,
        task: &Task,
        ctx: &ExecutionContext,
    ) -> Result<Arc<dyn ExecutionStrategy>, StrategyError> {
        if let Some(name) = task.strategy.as_deref().filter(|s| !s.is_empty()) {
            match self.get_strategy(name) {
                Some(strategy) => return Ok(strategy),
                None => warn!(task_id = %task.id, strategy = name, "requested strategy is not registered"),
            }
        }

        if task.atomic {
            if let Some(strategy) = self.get_strategy(ATOMIC) {
                return Ok(strategy);
            }
        }

        if let Some(analyzer) = &self.analyzer {
            match analyzer.analyze_task(task, ctx).await {
                Ok(analysis) => {
                    for name in analysis.recommendation.candidates() {
                        let Some(strategy) = self.get_strategy(name) else {
                            debug!(task_id = %task.id, strategy = name, "recommended strategy is not registered");
                            continue;
                        };
                        match strategy.can_handle(task, ctx) {
                            Ok(true) => {
                                debug!(task_id = %task.id, strategy = name, "using recommended strategy");
                                return Ok(strategy);
                            }
                            Ok(false) => {}
                            Err(e) => warn!(task_id = %task.id, strategy = name, error = %e, "strategy evaluation failed"),
                        }
                    }
                }
                Err(e) => warn!(task_id = %task.id, error = %format!("{e:#}"), "task analysis failed"),
            }
        }

        for registration in &self.registrations {
            match registration.strategy.can_handle(task, ctx) {
                Ok(true) => {
                    debug!(task_id = %task.id, strategy = %registration.name, "selected strategy");
                    return Ok(registration.strategy.clone());
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(task_id = %task.id, strategy = %registration.name, error = %e, "strategy evaluation failed, skipping")
                }
            }
        }

        self.get_strategy(ATOMIC)
            .ok_or_else(|| StrategyError::NoStrategyFound(task.id.clone()))
    }

    /// Select a strategy for `task` and run it.
    pub async fn execute_task(&self, task: &Task, ctx: &mut ExecutionContext) -> Result<TaskResult, StrategyError> {
        let strategy = self.select_strategy(task, ctx).await?;
        debug!(task_id = %task.id, strategy = %strategy.name(), depth = ctx.depth(), "executing task");
        strategy.execute(task, ctx, self).await
    }

    /// Ask every strategy about `task`, in priority order.
    pub fn evaluate_strategies(&self, task: &Task, ctx: &ExecutionContext) -> Vec<StrategyEvaluation> {
        self.registrations
            .iter()
            .map(|r| {
                let (can_handle, error) = match r.strategy.can_handle(task, ctx) {
                    Ok(handles) => (Some(handles), None),
                    Err(e) => (None, Some(e.to_string())),
                };
                StrategyEvaluation {
                    name: r.name.clone(),
                    priority: r.priority,
                    can_handle,
                    error,
                    complexity: r.strategy.estimate_complexity(task, ctx),
                }
            })
            .collect()
    }

    /// Merge new collaborators into the shared set and push them to every
    /// strategy. Strategies that refuse live updates are rebuilt from their
    /// factory.
    pub fn update_dependencies(&mut self, deps: StrategyDeps) {
        self.deps = self.deps.merged(&deps);

        for registration in &mut self.registrations {
            if registration.strategy.update_dependencies(&self.deps) {
                continue;
            }
            match self.factories.get(&registration.name) {
                Some(factory) => {
                    registration.strategy = factory(&self.deps, &self.config);
                    debug!(strategy = %registration.name, "rebuilt strategy with new dependencies");
                }
                None => warn!(strategy = %registration.name, "strategy does not accept dependency updates"),
            }
        }
    }

    /// A new resolver with the same configuration and analyzer, `overrides`
    /// merged into the collaborators. Strategies with a factory are rebuilt,
    /// others are shared.
    pub fn clone_with(&self, overrides: StrategyDeps, include_defaults: bool) -> Self {
        let mut clone = Self::new(self.deps.merged(&overrides), self.config.clone());
        clone.analyzer = self.analyzer.clone();

        for registration in &self.registrations {
            if !include_defaults && DEFAULT_STRATEGIES.contains(&registration.name.as_str()) {
                continue;
            }
            let strategy = match self.factories.get(&registration.name) {
                Some(factory) => {
                    clone.factories.insert(registration.name.clone(), factory.clone());
                    factory(&clone.deps, &clone.config)
                }
                None => registration.strategy.clone(),
            };
            clone.insert(strategy, registration.priority);
        }
        clone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Alternative, Recommendation, TaskAnalysis};
    use crate::strategy::result_metadata;
    use crate::test_support::ScriptedModel;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Instant;

    struct Fixed {
        name: &'static str,
        handles: Option<bool>,
        live: bool,
    }

    impl Fixed {
        fn new(name: &'static str, handles: bool) -> Self {
            Self { name, handles: Some(handles), live: true }
        }

        fn broken(name: &'static str) -> Self {
            Self { name, handles: None, live: true }
        }
    }

    #[async_trait]
    impl ExecutionStrategy for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn can_handle(&self, _task: &Task, _ctx: &ExecutionContext) -> Result<bool, StrategyError> {
            self.handles.ok_or_else(|| StrategyError::Evaluation {
                strategy: self.name.to_string(),
                reason: "cannot tell".to_string(),
            })
        }

        async fn execute(
            &self,
            task: &Task,
            _ctx: &mut ExecutionContext,
            _resolver: &StrategyResolver,
        ) -> Result<TaskResult, StrategyError> {
            Ok(TaskResult::success(json!(self.name), result_metadata(self.name, task, Instant::now())))
        }

        fn update_dependencies(&self, _deps: &StrategyDeps) -> bool {
            self.live
        }
    }

    struct Recommends(&'static str, Vec<&'static str>);

    #[async_trait]
    impl TaskAnalyzer for Recommends {
        async fn analyze_task(&self, _task: &Task, _ctx: &ExecutionContext) -> anyhow::Result<TaskAnalysis> {
            Ok(TaskAnalysis {
                recommendation: Recommendation {
                    strategy: self.0.to_string(),
                    confidence: 0.9,
                    pattern: None,
                    alternatives: self
                        .1
                        .iter()
                        .map(|s| Alternative { strategy: s.to_string(), reason: String::new() })
                        .collect(),
                },
            })
        }
    }

    fn defaults() -> StrategyResolver {
        StrategyResolver::with_defaults(StrategyDeps::new(), ExecutionConfig::default())
    }

    #[test]
    fn test_default_priority_order() {
        assert_eq!(defaults().strategy_names(), vec!["recursive", "parallel", "sequential", "atomic"]);
    }

    #[test]
    fn test_ties_keep_registration_order() {
        let mut resolver = StrategyResolver::new(StrategyDeps::new(), ExecutionConfig::default());
        resolver.register_strategy(Arc::new(Fixed::new("first", true)), 3).unwrap();
        resolver.register_strategy(Arc::new(Fixed::new("second", true)), 3).unwrap();
        resolver.register_strategy(Arc::new(Fixed::new("top", false)), 9).unwrap();
        assert_eq!(resolver.strategy_names(), vec!["top", "first", "second"]);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut resolver = defaults();
        let err = resolver
            .register_strategy(Arc::new(Fixed::new("atomic", true)), 100)
            .unwrap_err();
        assert!(matches!(err, StrategyError::AlreadyRegistered(name) if name == "atomic"));
    }

    #[tokio::test]
    async fn test_selection_is_deterministic() {
        let resolver = defaults();
        let ctx = ExecutionContext::new();
        let tasks = [
            (Task::new("a").with_subtasks(vec![Task::new("x").with_data(json!(1))]), "parallel"),
            (Task::new("b").with_steps(vec![Task::new("x").with_data(json!(1))]), "sequential"),
            (Task::new("c").with_description("Step 1: a. Step 2: b."), "recursive"),
            (Task::new("d").with_tool("echo", json!({})), "atomic"),
            (Task::new("e").with_data(json!(1)), "atomic"),
        ];
        for (task, expected) in &tasks {
            for _ in 0..3 {
                let strategy = resolver.select_strategy(task, &ctx).await.unwrap();
                assert_eq!(strategy.name(), *expected, "{}", task.id);
            }
        }
    }

    #[tokio::test]
    async fn test_explicit_name_and_atomic_flag() {
        let resolver = defaults();
        let ctx = ExecutionContext::new();

        let named = Task::new("n")
            .with_subtasks(vec![Task::new("x").with_data(json!(1))])
            .with_strategy("sequential");
        assert_eq!(resolver.select_strategy(&named, &ctx).await.unwrap().name(), "sequential");

        let unknown = Task::new("u").with_data(json!(1)).with_strategy("nonexistent");
        assert_eq!(resolver.select_strategy(&unknown, &ctx).await.unwrap().name(), "atomic");

        let flagged = Task {
            atomic: true,
            ..Task::new("f").with_description("Step 1: a. Step 2: b.")
        };
        assert_eq!(resolver.select_strategy(&flagged, &ctx).await.unwrap().name(), "atomic");
    }

    #[tokio::test]
    async fn test_failing_can_handle_is_skipped() {
        let mut resolver = StrategyResolver::new(StrategyDeps::new(), ExecutionConfig::default());
        resolver.register_strategy(Arc::new(Fixed::broken("broken")), 10).unwrap();
        resolver.register_strategy(Arc::new(Fixed::new("fine", true)), 5).unwrap();

        let ctx = ExecutionContext::new();
        let strategy = resolver.select_strategy(&Task::new("t").with_data(json!(1)), &ctx).await.unwrap();
        assert_eq!(strategy.name(), "fine");

        let evaluations = resolver.evaluate_strategies(&Task::new("t").with_data(json!(1)), &ctx);
        assert_eq!(evaluations[0].can_handle, None);
        assert!(evaluations[0].error.as_deref().unwrap().contains("cannot tell"));
        assert_eq!(evaluations[1].can_handle, Some(true));
    }

    #[tokio::test]
    async fn test_no_strategy_found() {
        let mut resolver = StrategyResolver::new(StrategyDeps::new(), ExecutionConfig::default());
        let ctx = ExecutionContext::new();
        let task = Task::new("lonely").with_data(json!(1));

        let err = resolver.select_strategy(&task, &ctx).await.err().unwrap();
        assert!(matches!(err, StrategyError::NoStrategyFound(id) if id == "lonely"));

        resolver.register_strategy(Arc::new(Fixed::new(ATOMIC, false)), 1).unwrap();
        assert_eq!(resolver.select_strategy(&task, &ctx).await.unwrap().name(), ATOMIC);
    }

    #[tokio::test]
    async fn test_analyzer_recommendation() {
        let mut resolver = defaults();
        resolver.register_strategy(Arc::new(Fixed::new("picky", false)), 0).unwrap();
        resolver.register_strategy(Arc::new(Fixed::new("eager", true)), 0).unwrap();
        let resolver = resolver.with_analyzer(Arc::new(Recommends("picky", vec!["missing", "eager"])));

        let ctx = ExecutionContext::new();
        let task = Task::new("t").with_subtasks(vec![Task::new("x").with_data(json!(1))]);
        assert_eq!(resolver.select_strategy(&task, &ctx).await.unwrap().name(), "eager");
    }

    #[tokio::test]
    async fn test_update_dependencies_reaches_strategies() {
        let mut resolver = defaults();
        resolver
            .register_factory(
                0,
                Arc::new(|_: &StrategyDeps, _: &ExecutionConfig| {
                    Arc::new(Fixed { name: "frozen", handles: Some(false), live: false }) as Arc<dyn ExecutionStrategy>
                }),
            )
            .unwrap();
        let before = resolver.get_strategy("frozen").unwrap();

        let model = Arc::new(ScriptedModel::new(vec!["hello"]));
        resolver.update_dependencies(StrategyDeps::new().with_model(model));
        assert!(resolver.deps().model.is_some());
        assert!(!Arc::ptr_eq(&before, &resolver.get_strategy("frozen").unwrap()));

        let task = Task::new("p").with_prompt("say hello");
        let mut ctx = ExecutionContext::new();
        let result = resolver.execute_task(&task, &mut ctx).await.unwrap();
        assert_eq!(result.result, Some(json!("hello")));
    }

    #[tokio::test]
    async fn test_clone_with_overrides() {
        let mut resolver = defaults();
        resolver.register_strategy(Arc::new(Fixed::new("custom", true)), 20).unwrap();

        let bare = resolver.clone_with(StrategyDeps::new(), false);
        assert_eq!(bare.strategy_names(), vec!["custom"]);

        let model = Arc::new(ScriptedModel::new(vec!["cloned"]));
        let full = resolver.clone_with(StrategyDeps::new().with_model(model), true);
        assert_eq!(full.strategy_names(), vec!["custom", "recursive", "parallel", "sequential", "atomic"]);
        assert!(full.deps().model.is_some());
        assert!(resolver.deps().model.is_none());

        let task = Task::new("p").with_prompt("hi").with_strategy("atomic");
        let mut ctx = ExecutionContext::new();
        assert_eq!(full.execute_task(&task, &mut ctx).await.unwrap().result, Some(json!("cloned")));
    }

    #[test]
    fn test_unregister() {
        let mut resolver = defaults();
        assert!(resolver.unregister_strategy("recursive").is_some());
        assert!(resolver.unregister_strategy("recursive").is_none());
        assert_eq!(resolver.strategy_names(), vec!["parallel", "sequential", "atomic"]);
    }
}
