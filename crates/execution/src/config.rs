//! Execution configuration.

use anyhow::Context as _;
use conductor_core::Task;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

/// Configuration for the whole orchestration core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionConfig {
    /// Strategy selection
    pub resolver: ResolverConfig,
    /// Concurrent batches
    pub parallel: ParallelConfig,
    /// Hierarchical decomposition
    pub recursive: RecursiveConfig,
    /// Ordered steps
    pub sequential: SequentialConfig,
}

impl ExecutionConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Set the parallel config.
    pub fn with_parallel(mut self, parallel: ParallelConfig) -> Self {
        self.parallel = parallel;
        self
    }

    /// Set the recursive config.
    pub fn with_recursive(mut self, recursive: RecursiveConfig) -> Self {
        self.recursive = recursive;
        self
    }

    /// Set the sequential config.
    pub fn with_sequential(mut self, sequential: SequentialConfig) -> Self {
        self.sequential = sequential;
        self
    }

    /// Set the resolver config.
    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }
}

/// Priorities of the default strategies. Higher is checked first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyPriorities {
    /// Recursive strategy
    pub recursive: i32,
    /// Parallel strategy
    pub parallel: i32,
    /// Sequential strategy
    pub sequential: i32,
    /// Atomic strategy
    pub atomic: i32,
}

impl Default for StrategyPriorities {
    fn default() -> Self {
        Self {
            recursive: 10,
            parallel: 8,
            sequential: 6,
            atomic: 1,
        }
    }
}

impl StrategyPriorities {
    /// Priority of a default strategy by name.
    pub fn for_name(&self, name: &str) -> Option<i32> {
        match name {
            crate::strategy::RECURSIVE => Some(self.recursive),
            crate::strategy::PARALLEL => Some(self.parallel),
            crate::strategy::SEQUENTIAL => Some(self.sequential),
            crate::strategy::ATOMIC => Some(self.atomic),
            _ => None,
        }
    }
}

/// Strategy resolver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolverConfig {
    /// Default strategy priorities
    pub priorities: StrategyPriorities,
    /// Register the four default strategies at construction
    pub include_defaults: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            priorities: StrategyPriorities::default(),
            include_defaults: true,
        }
    }
}

/// Parallel strategy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParallelConfig {
    /// Subtasks in flight at once
    pub max_concurrency: usize,
    /// Per-subtask timeout in milliseconds
    pub timeout_per_task_ms: u64,
    /// Abort the batch on the first failure
    pub fail_fast: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            timeout_per_task_ms: 30_000,
            fail_fast: false,
        }
    }
}

impl ParallelConfig {
    /// Set max concurrency.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Set the per-subtask timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_per_task_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set fail-fast.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Effective settings for one call, after task-level overrides.
    pub fn effective(&self, task: &Task) -> BatchSettings {
        let max = task.max_concurrency.unwrap_or(self.max_concurrency);
        BatchSettings {
            max_concurrency: NonZeroUsize::new(max).unwrap_or(NonZeroUsize::MIN),
            timeout: task
                .timeout_override()
                .unwrap_or(Duration::from_millis(self.timeout_per_task_ms)),
            fail_fast: task.fail_fast.unwrap_or(self.fail_fast),
        }
    }
}

/// Resolved per-call batch settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    /// Subtasks in flight at once
    pub max_concurrency: NonZeroUsize,
    /// Deadline per subtask attempt
    pub timeout: Duration,
    /// Stop the batch at the first failure
    pub fail_fast: bool,
}

/// Recursive strategy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecursiveConfig {
    /// Depth at which decomposition is refused
    pub max_depth: usize,
    /// Complexity score that triggers decomposition
    pub decompose_threshold: f64,
    /// Reject tasks repeating an ancestor
    pub cycle_detection: bool,
    /// Memoize decompositions for the strategy lifetime
    pub cache_decompositions: bool,
    /// Concurrency for parallel and mixed decompositions
    pub max_concurrency: usize,
    /// Sampling temperature for decomposition prompts
    pub decomposition_temperature: f32,
    /// Token cap for decomposition replies
    pub decomposition_max_tokens: u32,
}

impl Default for RecursiveConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            decompose_threshold: 0.7,
            cycle_detection: true,
            cache_decompositions: true,
            max_concurrency: 5,
            decomposition_temperature: 0.2,
            decomposition_max_tokens: 2000,
        }
    }
}

impl RecursiveConfig {
    /// Set max depth.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the decomposition threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.decompose_threshold = threshold;
        self
    }

    /// Enable or disable cycle detection.
    pub fn with_cycle_detection(mut self, enabled: bool) -> Self {
        self.cycle_detection = enabled;
        self
    }

    /// Enable or disable the decomposition cache.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_decompositions = enabled;
        self
    }

    /// Set max concurrency.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub(crate) fn concurrency(&self, task: &Task) -> NonZeroUsize {
        NonZeroUsize::new(task.max_concurrency.unwrap_or(self.max_concurrency)).unwrap_or(NonZeroUsize::MIN)
    }
}

/// Sequential strategy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SequentialConfig {
    /// Feed each step the previous step's output
    pub pass_previous_output: bool,
}

impl Default for SequentialConfig {
    fn default() -> Self {
        Self {
            pass_previous_output: true,
        }
    }
}
