//! Task-analysis collaborator.

use async_trait::async_trait;
use conductor_core::{ExecutionContext, Task};
use serde::{Deserialize, Serialize};

/// A strategy the analyzer considers viable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    /// Strategy name
    pub strategy: String,
    /// Why it fits
    #[serde(default)]
    pub reason: String,
}

/// The analyzer's recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Preferred strategy name
    pub strategy: String,
    /// Confidence in [0, 1]
    #[serde(default)]
    pub confidence: f64,
    /// Recognized pattern
    #[serde(default)]
    pub pattern: Option<String>,
    /// Ranked alternatives
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

impl Recommendation {
    /// Strategy names in the order they should be tried.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.strategy.as_str()).chain(self.alternatives.iter().map(|a| a.strategy.as_str()))
    }
}

/// Result of analyzing a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAnalysis {
    /// Recommendation
    pub recommendation: Recommendation,
}

/// Recommends strategies for tasks.
#[async_trait]
pub trait TaskAnalyzer: Send + Sync {
    /// Analyze a task.
    async fn analyze_task(&self, task: &Task, ctx: &ExecutionContext) -> anyhow::Result<TaskAnalysis>;
}
