//! Model client backed by an external command.

use crate::client::{ModelClient, PromptRequest, PromptResponse};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Pipes each prompt to a child process and returns its standard output.
///
/// The system prompt, when present, is written first and separated from the
/// user prompt by a blank line.
#[derive(Debug, Clone)]
pub struct CommandModel {
    program: String,
    args: Vec<String>,
}

impl CommandModel {
    /// Create a client running `program args...` per request.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a shell-like command line (whitespace separated, no quoting).
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    fn render(request: &PromptRequest) -> String {
        match &request.system_prompt {
            Some(system) => format!("{}\n\n{}", system, request.prompt),
            None => request.prompt.clone(),
        }
    }
}

#[async_trait]
impl ModelClient for CommandModel {
    async fn request(&self, request: PromptRequest) -> Result<PromptResponse, anyhow::Error> {
        debug!(program = %self.program, prompt_len = request.prompt.len(), "Sending prompt to command model");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(Self::render(&request).as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "model command '{}' exited with {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(PromptResponse::new(String::from_utf8_lossy(&output.stdout).trim_end()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_command_line() {
        let model = CommandModel::from_command_line("llm -m local").unwrap();
        assert_eq!(model.program, "llm");
        assert_eq!(model.args, vec!["-m", "local"]);
        assert!(CommandModel::from_command_line("   ").is_none());
    }

    #[test]
    fn test_render_prepends_system_prompt() {
        let req = PromptRequest::new("question").with_system("rules");
        assert_eq!(CommandModel::render(&req), "rules\n\nquestion");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cat_echoes_prompt() {
        let model = CommandModel::new("cat", vec![]);
        let reply = model.request(PromptRequest::new("hello model")).await.unwrap();
        assert_eq!(reply.content, "hello model");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_is_an_error() {
        let model = CommandModel::new("sh", vec!["-c".into(), "exit 2".into()]);
        assert!(model.request(PromptRequest::new("x")).await.is_err());
    }
}
