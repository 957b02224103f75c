//! Decomposition - the output of breaking one task into subtasks.

use crate::task::Task;
use serde::{Deserialize, Serialize};

/// How the subtasks of a decomposition run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecompositionStrategy {
    /// In list order
    #[default]
    Sequential,
    /// All at once
    Parallel,
    /// Frontier by frontier along `dependencies`
    Mixed,
}

impl std::fmt::Display for DecompositionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
            Self::Mixed => write!(f, "mixed"),
        }
    }
}

/// Where a decomposition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecompositionSource {
    /// `task.subtasks` used verbatim
    Predefined,
    /// Model-guided
    Llm,
    /// `task.template.steps`
    Template,
    /// Pattern split of the description
    Heuristic,
    /// Single-subtask fallback after an unparseable model response
    Fallback,
}

impl std::fmt::Display for DecompositionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Predefined => "predefined",
            Self::Llm => "llm",
            Self::Template => "template",
            Self::Heuristic => "heuristic",
            Self::Fallback => "fallback",
        };
        f.write_str(s)
    }
}

/// Provenance of a decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionMetadata {
    /// Producer
    pub source: DecompositionSource,

    /// Confidence in [0, 1]
    pub confidence: f64,
}

/// A task broken into subtasks. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decomposition {
    /// Subtasks
    pub subtasks: Vec<Task>,

    /// How they run
    pub strategy: DecompositionStrategy,

    /// Why this split
    pub reasoning: String,

    /// Provenance
    pub metadata: DecompositionMetadata,
}

impl Decomposition {
    /// Create a decomposition.
    pub fn new(
        subtasks: Vec<Task>,
        strategy: DecompositionStrategy,
        reasoning: impl Into<String>,
        source: DecompositionSource,
        confidence: f64,
    ) -> Self {
        Self {
            subtasks,
            strategy,
            reasoning: reasoning.into(),
            metadata: DecompositionMetadata {
                source,
                confidence: confidence.clamp(0.0, 1.0),
            },
        }
    }

    /// Whether the decomposition produced nothing to run.
    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    /// Whether any subtask depends on a sibling.
    pub fn has_internal_dependencies(&self) -> bool {
        self.subtasks.iter().any(|task| {
            task.dependencies
                .iter()
                .any(|dep| self.subtasks.iter().any(|other| &other.id == dep))
        })
    }
}
