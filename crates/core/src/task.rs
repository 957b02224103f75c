//! Task model - the unit of work handed to the orchestration core.
//!
//! A task is a single struct with optional fields. Which fields are present
//! decides how it runs: executable content (`description`, `operation`,
//! `prompt`, `tool`, `func`, `data`) makes it runnable directly, composite
//! markers (`subtasks`, `operations`, `steps`, `batch`+`items`,
//! `map`+`collection`) make it a batch, and hint flags steer strategy
//! selection. [`Task::validate`] enforces the shape before anything runs.

use crate::error::TaskError;
use crate::result::SubtaskResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A unit of requested work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Identifier (required, validated non-empty)
    #[serde(default)]
    pub id: String,

    /// Natural language description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Named operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,

    /// Explicit model prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Tool to invoke
    #[serde(default, alias = "toolName", skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// In-process function to invoke
    #[serde(skip)]
    pub func: Option<TaskFn>,

    /// Tool / function input. Strings of the form `@name` reference artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    /// Output of the preceding sequential step, attached to the resolved
    /// input as-is (never treated as an artifact reference)
    #[serde(skip)]
    pub previous: Option<Value>,

    /// Literal result value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Subtasks (parallel batch or predefined decomposition)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<Task>,

    /// Operations, each becomes a synthetic subtask
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<Task>,

    /// Ordered steps for sequential execution
    #[serde(default, alias = "sequence", skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Task>,

    /// Template applied to every entry of `items`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<Box<Task>>,

    /// Batch items
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Value>,

    /// Operation applied to every entry of `collection`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,

    /// Map collection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collection: Vec<Value>,

    /// Explicit strategy override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,

    /// Hint: run as a single step
    #[serde(default)]
    pub atomic: bool,

    /// Hint: run subtasks concurrently
    #[serde(default)]
    pub parallel: bool,

    /// Hint: run steps in order
    #[serde(default)]
    pub sequential: bool,

    /// Hint: decompose hierarchically
    #[serde(default)]
    pub recursive: bool,

    /// Explicit decomposition request
    #[serde(default)]
    pub decompose: bool,

    /// Explicit decomposition request (alias spelling used by planners)
    #[serde(default)]
    pub breakdown: bool,

    /// Retry policy applied by the enclosing strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,

    /// Result validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Validation>,

    /// Ids of tasks that must have completed first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Failure propagation flag (default direction depends on the strategy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical: Option<bool>,

    /// How a parallel batch combines its results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_type: Option<AggregationType>,

    /// How a decomposition combines its results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition_type: Option<CompositionType>,

    /// Custom aggregation, overrides `aggregation_type`
    #[serde(skip)]
    pub aggregate: Option<CombineFn>,

    /// Custom composition, overrides `composition_type`
    #[serde(skip)]
    pub compose: Option<CombineFn>,

    /// Always annotate aggregated results with success/failure counts
    #[serde(default)]
    pub include_details: bool,

    /// Decomposition template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TaskTemplate>,

    /// Constraints (part of the decomposition cache key)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,

    /// Artifacts to store from the result
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputSpec>,

    /// Per-task concurrency override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,

    /// Per-subtask timeout override, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_per_task: Option<u64>,

    /// Fail-fast override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_fast: Option<bool>,

    /// Free-form metadata
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

impl Task {
    /// Create a task with only an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set prompt.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Set tool and its input.
    pub fn with_tool(mut self, tool: impl Into<String>, input: Value) -> Self {
        self.tool = Some(tool.into());
        self.input = Some(input);
        self
    }

    /// Set an in-process function.
    pub fn with_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.func = Some(TaskFn::new(f));
        self
    }

    /// Set the literal data value.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Set subtasks.
    pub fn with_subtasks(mut self, subtasks: Vec<Task>) -> Self {
        self.subtasks = subtasks;
        self
    }

    /// Set sequential steps.
    pub fn with_steps(mut self, steps: Vec<Task>) -> Self {
        self.steps = steps;
        self
    }

    /// Set the strategy override.
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// Ask for decomposition.
    pub fn with_decompose(mut self) -> Self {
        self.decompose = true;
        self
    }

    /// Set dependencies.
    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Set the critical flag.
    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = Some(critical);
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the aggregation type.
    pub fn with_aggregation(mut self, kind: AggregationType) -> Self {
        self.aggregation_type = Some(kind);
        self
    }

    /// Set the composition type.
    pub fn with_composition(mut self, kind: CompositionType) -> Self {
        self.composition_type = Some(kind);
        self
    }

    /// Set a custom aggregation function.
    pub fn with_aggregate<F>(mut self, f: F) -> Self
    where
        F: Fn(&[SubtaskResult]) -> Value + Send + Sync + 'static,
    {
        self.aggregate = Some(CombineFn::new(f));
        self
    }

    /// Set a custom composition function.
    pub fn with_compose<F>(mut self, f: F) -> Self
    where
        F: Fn(&[SubtaskResult]) -> Value + Send + Sync + 'static,
    {
        self.compose = Some(CombineFn::new(f));
        self
    }

    /// Declare an artifact output.
    pub fn with_output(mut self, output: OutputSpec) -> Self {
        self.outputs.push(output);
        self
    }

    /// Text usable as a model prompt, in order of precedence.
    pub fn direct_text(&self) -> Option<&str> {
        [&self.prompt, &self.description, &self.operation]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|s| !s.trim().is_empty())
    }

    /// Human readable label for logs.
    pub fn label(&self) -> &str {
        self.description
            .as_deref()
            .or(self.prompt.as_deref())
            .or(self.operation.as_deref())
            .unwrap_or(&self.id)
    }

    /// Whether the task names a tool.
    pub fn has_tool(&self) -> bool {
        self.tool.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Whether the task can be executed as a single step.
    pub fn has_executable_content(&self) -> bool {
        self.direct_text().is_some() || self.has_tool() || self.func.is_some() || self.data.is_some()
    }

    /// Whether the task carries a composite marker.
    pub fn has_composite_marker(&self) -> bool {
        !self.subtasks.is_empty()
            || !self.operations.is_empty()
            || !self.steps.is_empty()
            || self.batch.is_some()
            || self.map.is_some()
    }

    /// Whether a failure must abort an enclosing sequence (`critical !== false`).
    pub fn is_critical_in_sequence(&self) -> bool {
        self.critical != Some(false)
    }

    /// Whether a failure must abort an enclosing concurrent batch (`critical === true`).
    pub fn is_critical_in_batch(&self) -> bool {
        self.critical == Some(true)
    }

    /// Per-subtask timeout override.
    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout_per_task.map(Duration::from_millis)
    }

    /// Check the task shape before execution.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.id.trim().is_empty() {
            return Err(TaskError::MissingId {
                label: self.label().to_string(),
            });
        }

        let has_strategy = self.strategy.as_deref().is_some_and(|s| !s.is_empty());
        if !self.has_executable_content() && !self.has_composite_marker() && !has_strategy {
            return Err(TaskError::Malformed {
                id: self.id.clone(),
                reason: "no executable content, composite marker or strategy".to_string(),
            });
        }

        Ok(())
    }
}

/// In-process function attached to a task.
#[derive(Clone)]
pub struct TaskFn(Arc<dyn Fn(&Value) -> anyhow::Result<Value> + Send + Sync>);

impl TaskFn {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invoke the function.
    pub fn call(&self, input: &Value) -> anyhow::Result<Value> {
        (self.0)(input)
    }
}

impl std::fmt::Debug for TaskFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TaskFn(..)")
    }
}

/// Custom aggregation / composition over subtask results.
#[derive(Clone)]
pub struct CombineFn(Arc<dyn Fn(&[SubtaskResult]) -> Value + Send + Sync>);

impl CombineFn {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[SubtaskResult]) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invoke the function.
    pub fn call(&self, results: &[SubtaskResult]) -> Value {
        (self.0)(results)
    }
}

impl std::fmt::Debug for CombineFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CombineFn(..)")
    }
}

/// Retry policy for a subtask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Backoff curve
    #[serde(default)]
    pub strategy_name: BackoffStrategy,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            strategy_name: BackoffStrategy::default(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(max_attempts: u32, backoff_ms: u64, strategy_name: BackoffStrategy) -> Self {
        Self {
            max_attempts,
            backoff_ms,
            strategy_name,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let millis = match self.strategy_name {
            BackoffStrategy::Exponential => {
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                self.backoff_ms.saturating_mul(factor)
            }
            BackoffStrategy::Linear => self.backoff_ms.saturating_mul(u64::from(attempt)),
            BackoffStrategy::Constant => self.backoff_ms,
        };
        Duration::from_millis(millis)
    }
}

/// Backoff curve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base * 2^(n-1)`
    Exponential,
    /// `base * n`
    Linear,
    /// `base`
    #[default]
    Constant,
}

/// Result validation rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    /// Reject null or empty results
    #[serde(default)]
    pub required: bool,

    /// Substrings that must appear in the rendered result
    #[serde(default)]
    pub criteria: Vec<String>,
}

impl Validation {
    /// Check a result value, returning the reason on failure.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        if self.required && is_empty_value(value) {
            return Err("result is required but empty".to_string());
        }

        if self.criteria.is_empty() {
            return Ok(());
        }

        let rendered = match value {
            Value::String(s) => s.to_lowercase(),
            other => other.to_string().to_lowercase(),
        };
        let missing: Vec<&str> = self
            .criteria
            .iter()
            .filter(|c| !rendered.contains(&c.to_lowercase()))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("criteria not met: {}", missing.join(", ")))
        }
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Built-in aggregation for parallel batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    /// List of successful results
    #[default]
    Array,
    /// Shallow merge of object results
    Object,
    /// Numeric sum
    Sum,
    /// Flatten array results
    Concat,
    /// First successful result
    First,
    /// Last successful result
    Last,
    /// Every result, failures as `{error}` placeholders
    All,
}

/// Built-in composition for decomposed tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositionType {
    /// `{result: [...], metadata: {...}}`
    #[default]
    Aggregate,
    /// Shallow merge of object results
    Merge,
    /// First successful result
    First,
    /// Last successful result
    Last,
}

/// Decomposition template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Template steps, become subtasks
    #[serde(default)]
    pub steps: Vec<Task>,

    /// How the steps run
    #[serde(default)]
    pub strategy: Option<crate::DecompositionStrategy>,
}

/// Declared artifact output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Artifact name
    pub name: String,

    /// Artifact type (inferred from the value when absent)
    #[serde(default, rename = "type")]
    pub artifact_type: Option<String>,

    /// Description
    #[serde(default)]
    pub description: String,

    /// Why the artifact exists
    #[serde(default)]
    pub purpose: String,

    /// JSON pointer into the result selecting the stored value
    #[serde(default)]
    pub pointer: Option<String>,
}

impl OutputSpec {
    /// Output storing the whole result under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}
