//! Built-in tools (echo, process command).

use super::r#trait::*;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Returns its inputs unchanged.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the inputs unchanged"
    }

    async fn execute(&self, inputs: &Value) -> Result<ToolOutput, anyhow::Error> {
        Ok(ToolOutput::ok(inputs.clone()))
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "echo".to_string(),
            description: "Return the inputs unchanged".to_string(),
            parameters: vec![Parameter::optional("*", "any", "Any JSON value")],
        }
    }
}

/// Runs an external program.
///
/// Inputs: `{ "program": "git", "args": ["status"], "stdin": "..." }`.
/// A non-zero exit code is reported as `success: false`, not as an error.
pub struct CommandTool;

impl CommandTool {
    fn parse_args(inputs: &Value) -> Result<(String, Vec<String>, Option<String>), anyhow::Error> {
        let program = inputs
            .get("program")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow::anyhow!("command tool requires a 'program' string"))?
            .to_string();

        let args = match inputs.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            Some(other) => anyhow::bail!("'args' must be an array, got {}", other),
        };

        let stdin = inputs.get("stdin").and_then(Value::as_str).map(str::to_string);

        Ok((program, args, stdin))
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        "command"
    }

    fn description(&self) -> &str {
        "Run an external program"
    }

    async fn execute(&self, inputs: &Value) -> Result<ToolOutput, anyhow::Error> {
        let start = std::time::Instant::now();
        let (program, args, stdin) = Self::parse_args(inputs)?;

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        if let (Some(text), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(text.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        let exit_code = output.status.code().unwrap_or(-1);

        let data = json!({
            "exitCode": exit_code,
            "stdout": String::from_utf8_lossy(&output.stdout).to_string(),
            "stderr": String::from_utf8_lossy(&output.stderr).to_string(),
        });
        let metadata = Some(json!({
            "program": program,
            "durationMs": start.elapsed().as_millis() as u64,
        }));

        Ok(ToolOutput {
            success: Some(exit_code == 0),
            data,
            metadata,
        })
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "command".to_string(),
            description: "Run an external program".to_string(),
            parameters: vec![
                Parameter::required("program", "string", "Program to run"),
                Parameter::optional("args", "array", "Arguments"),
                Parameter::optional("stdin", "string", "Text written to standard input"),
            ],
        }
    }
}
