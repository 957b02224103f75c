//! Single-step execution: one function call, one tool call or one prompt.

use crate::error::StrategyError;
use crate::strategy::{resolve_tool_inputs, StrategyDeps};
use conductor_ai::{direct_prompt, PromptScaffold};
use conductor_core::{ArtifactMetadata, ArtifactRecord, ExecutionContext, ResolvedInputs, Role, Task};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Run the task's executable content once and store its declared outputs.
pub(crate) async fn execute_direct(
    task: &Task,
    ctx: &mut ExecutionContext,
    deps: &StrategyDeps,
) -> Result<Value, StrategyError> {
    let (value, tool_name, referenced) = if let Some(func) = &task.func {
        let inputs = step_inputs(task, ctx)?;
        let value = func.call(&inputs.value).map_err(|e| StrategyError::Function {
            task_id: task.id.clone(),
            message: format!("{e:#}"),
        })?;
        (value, None, inputs.referenced)
    } else if let Some(tool_name) = task.tool.as_deref().filter(|t| !t.is_empty()) {
        let inputs = step_inputs(task, ctx)?;
        let value = call_tool(tool_name, &inputs.value, deps).await?;
        (value, Some(tool_name.to_string()), inputs.referenced)
    } else if let Some(text) = task.direct_text() {
        match (&deps.model, &task.data) {
            (Some(model), _) => {
                let request = direct_prompt(text, ctx, PromptScaffold::default());
                ctx.add_message(Role::User, text);
                let response = model
                    .request(request)
                    .await
                    .map_err(|e| StrategyError::Model(format!("{e:#}")))?;
                ctx.add_message(Role::Assistant, response.content.clone());
                (Value::String(response.content), None, Vec::new())
            }
            (None, Some(data)) => (data.clone(), None, Vec::new()),
            (None, None) => {
                warn!(task_id = %task.id, "no model client configured, task acknowledged without execution");
                deps.emit(|p| p.custom("task.unexecuted", json!({ "taskId": task.id })));
                let ack = json!({
                    "taskId": task.id,
                    "description": text,
                    "executed": false,
                });
                (ack, None, Vec::new())
            }
        }
    } else if let Some(data) = &task.data {
        (data.clone(), None, Vec::new())
    } else {
        return Err(StrategyError::NotExecutable(task.id.clone()));
    };

    store_outputs(task, ctx, &value, tool_name, referenced);
    Ok(value)
}

/// Resolve the authored input, then attach the preceding step's output.
fn step_inputs(task: &Task, ctx: &ExecutionContext) -> Result<ResolvedInputs, StrategyError> {
    let mut inputs = resolve_tool_inputs(task.input.as_ref(), ctx)?;
    if let Some(previous) = &task.previous {
        match &mut inputs.value {
            Value::Null => inputs.value = previous.clone(),
            Value::Object(fields) if !fields.contains_key("previous") => {
                fields.insert("previous".to_string(), previous.clone());
            }
            _ => {}
        }
    }
    Ok(inputs)
}

async fn call_tool(name: &str, inputs: &Value, deps: &StrategyDeps) -> Result<Value, StrategyError> {
    let tool = deps
        .tools
        .as_ref()
        .and_then(|registry| registry.get_tool(name))
        .ok_or_else(|| StrategyError::ToolNotFound(name.to_string()))?;

    debug!(tool = name, "invoking tool");
    let output = tool.execute(inputs).await.map_err(|e| StrategyError::ToolFailed {
        tool: name.to_string(),
        message: format!("{e:#}"),
    })?;

    if output.is_failure() {
        return Err(StrategyError::ToolFailed {
            tool: name.to_string(),
            message: output.data.to_string(),
        });
    }
    Ok(output.data)
}

fn store_outputs(
    task: &Task,
    ctx: &mut ExecutionContext,
    result: &Value,
    tool_name: Option<String>,
    referenced: Vec<String>,
) {
    for output in &task.outputs {
        let value = match output.pointer.as_deref() {
            Some(pointer) => result.pointer(pointer).cloned().unwrap_or_else(|| {
                warn!(task_id = %task.id, artifact = %output.name, pointer, "output pointer matched nothing");
                Value::Null
            }),
            None => result.clone(),
        };

        let mut record = ArtifactRecord::new(value)
            .with_description(output.description.clone())
            .with_purpose(output.purpose.clone())
            .with_metadata(ArtifactMetadata {
                tool_name: tool_name.clone(),
                success: true,
                input_artifacts: referenced.clone(),
            });
        if let Some(kind) = &output.artifact_type {
            record = record.with_type(kind.clone());
        }

        debug!(task_id = %task.id, artifact = %output.name, "storing artifact");
        ctx.store_artifact(output.name.clone(), record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{deps_with_tools, FailingTool, ScriptedModel};
    use conductor_core::OutputSpec;
    use conductor_tools::EchoTool;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_tool_inputs_resolve_artifacts_and_outputs_are_stored() {
        let deps = deps_with_tools(vec![Arc::new(EchoTool)]);
        let mut ctx = ExecutionContext::new();
        ctx.store_artifact("greeting", ArtifactRecord::new(json!("hello")));

        let task = Task::new("t")
            .with_tool("echo", json!({"text": "@greeting", "n": 2}))
            .with_output(OutputSpec {
                pointer: Some("/text".into()),
                description: "echoed text".into(),
                ..OutputSpec::new("echoed")
            });

        let value = execute_direct(&task, &mut ctx, &deps).await.unwrap();
        assert_eq!(value, json!({"text": "hello", "n": 2}));

        let stored = ctx.artifacts().get("echoed").unwrap();
        assert_eq!(stored.value, json!("hello"));
        assert_eq!(stored.artifact_type, "string");
        assert_eq!(stored.metadata.tool_name.as_deref(), Some("echo"));
        assert_eq!(stored.metadata.input_artifacts, vec!["greeting".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_tool_and_failed_output() {
        let deps = deps_with_tools(vec![Arc::new(FailingTool::reporting("flaky"))]);
        let mut ctx = ExecutionContext::new();

        let missing = execute_direct(&Task::new("a").with_tool("nope", json!({})), &mut ctx, &deps).await;
        assert!(matches!(missing, Err(StrategyError::ToolNotFound(_))));

        let failed = execute_direct(&Task::new("b").with_tool("flaky", json!({})), &mut ctx, &deps).await;
        assert!(matches!(failed, Err(StrategyError::ToolFailed { .. })));
    }

    #[tokio::test]
    async fn test_prompt_goes_to_model_and_conversation() {
        let model = Arc::new(ScriptedModel::new(vec!["the answer"]));
        let deps = StrategyDeps::new().with_model(model.clone());
        let mut ctx = ExecutionContext::new();

        let value = execute_direct(&Task::new("q").with_prompt("what is it?"), &mut ctx, &deps)
            .await
            .unwrap();
        assert_eq!(value, json!("the answer"));
        assert_eq!(ctx.history().len(), 2);
        assert_eq!(ctx.history()[1].role, Role::Assistant);
        assert!(model.prompts()[0].contains("Task:\nwhat is it?"));
    }

    #[tokio::test]
    async fn test_without_model_description_is_acknowledged() {
        let mut ctx = ExecutionContext::new();
        let value = execute_direct(&Task::new("d").with_description("do X"), &mut ctx, &StrategyDeps::new())
            .await
            .unwrap();
        assert_eq!(value, json!({"taskId": "d", "description": "do X", "executed": false}));
    }

    #[tokio::test]
    async fn test_function_and_data() {
        let mut ctx = ExecutionContext::new();
        let deps = StrategyDeps::new();

        let mut doubled = Task::new("f")
            .with_fn(|input| Ok(json!(input.as_i64().unwrap_or(0) * 2)))
            .with_data(json!("ignored"));
        doubled.input = Some(json!(21));
        assert_eq!(execute_direct(&doubled, &mut ctx, &deps).await.unwrap(), json!(42));

        let data = Task::new("d").with_data(json!([1, 2]));
        assert_eq!(execute_direct(&data, &mut ctx, &deps).await.unwrap(), json!([1, 2]));

        let empty = execute_direct(&Task::new("e"), &mut ctx, &deps).await;
        assert!(matches!(empty, Err(StrategyError::NotExecutable(_))));
    }
}
