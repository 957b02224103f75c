//! Tool abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A tool that can be executed.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get tool name.
    fn name(&self) -> &str;

    /// Get tool description.
    fn description(&self) -> &str;

    /// Execute the tool with resolved inputs.
    async fn execute(&self, inputs: &Value) -> Result<ToolOutput, anyhow::Error>;

    /// Get tool schema (for discovery).
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: Vec::new(),
        }
    }
}

/// Tool registry - looks tools up by name.
pub trait ToolRegistry: Send + Sync {
    /// Get a tool by name.
    fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>>;

    /// Schemas of every registered tool.
    fn list_tools(&self) -> Vec<ToolSchema>;
}

/// Output from a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Explicit success flag; `None` means the call itself succeeding is enough
    #[serde(default)]
    pub success: Option<bool>,

    /// Produced data
    pub data: Value,

    /// Extra information (error details, timings)
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl ToolOutput {
    /// Successful output.
    pub fn ok(data: Value) -> Self {
        Self {
            success: Some(true),
            data,
            metadata: None,
        }
    }

    /// Output reporting failure.
    pub fn failed(data: Value, metadata: Option<Value>) -> Self {
        Self {
            success: Some(false),
            data,
            metadata,
        }
    }

    /// Whether the tool reported failure.
    pub fn is_failure(&self) -> bool {
        self.success == Some(false)
    }
}

/// Tool schema for discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name
    pub name: String,

    /// Description
    pub description: String,

    /// Parameters
    pub parameters: Vec<Parameter>,
}

/// A tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name
    pub name: String,

    /// Description
    pub description: String,

    /// Type
    pub param_type: String,

    /// Required
    pub required: bool,

    /// Default value
    pub default: Option<Value>,
}

impl Parameter {
    /// Required parameter.
    pub fn required(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            param_type: param_type.to_string(),
            required: true,
            default: None,
        }
    }

    /// Optional parameter.
    pub fn optional(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }
}

type ToolFn = dyn Fn(&Value) -> anyhow::Result<Value> + Send + Sync;

/// Tool backed by a closure.
pub struct FnTool {
    name: String,
    description: String,
    func: Arc<ToolFn>,
}

impl FnTool {
    /// Wrap a closure as a tool.
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            func: Arc::new(f),
        }
    }

    /// Set description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, inputs: &Value) -> Result<ToolOutput, anyhow::Error> {
        (self.func)(inputs).map(ToolOutput::ok)
    }
}
