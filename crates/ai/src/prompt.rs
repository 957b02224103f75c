//! Prompt construction and structured-reply parsing.

use crate::client::PromptRequest;
use conductor_core::{
    Decomposition, DecompositionSource, DecompositionStrategy, ExecutionContext, Task,
};
use serde::Deserialize;
use thiserror::Error;

const DIRECT_SYSTEM_PROMPT: &str =
    "You are an autonomous agent completing one step of a larger task. Answer with the result of the step only.";

const DECOMPOSITION_SYSTEM_PROMPT: &str = "You break tasks into smaller subtasks. \
Respond with a single JSON object and nothing else:\n\
{\"subtasks\": [{\"id\": \"short-id\", \"description\": \"what to do\", \"dependencies\": [\"id\"]}], \
\"strategy\": \"sequential\" | \"parallel\" | \"mixed\", \"reasoning\": \"why\"}\n\
Use \"mixed\" when some subtasks depend on others. Subtasks may name a \"tool\" with an \"input\" object.";

/// Confidence assigned to model decompositions that do not state one.
const DEFAULT_MODEL_CONFIDENCE: f64 = 0.8;

/// How much branch state goes into a direct prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptScaffold {
    /// Number of most recent conversation entries included
    pub history_window: usize,

    /// Whether to list available artifacts
    pub include_artifacts: bool,
}

impl Default for PromptScaffold {
    fn default() -> Self {
        Self {
            history_window: 10,
            include_artifacts: true,
        }
    }
}

/// Prompt for executing `text` directly on the given branch.
pub fn direct_prompt(text: &str, ctx: &ExecutionContext, scaffold: PromptScaffold) -> PromptRequest {
    let mut sections = Vec::new();

    let recent = ctx.recent_history(scaffold.history_window);
    if !recent.is_empty() {
        let lines: Vec<String> = recent
            .iter()
            .map(|entry| format!("[{}] {}", entry.role, entry.content))
            .collect();
        sections.push(format!("Previous conversation:\n{}", lines.join("\n")));
    }

    if scaffold.include_artifacts && !ctx.artifacts().is_empty() {
        sections.push(format!("Available artifacts:\n{}", ctx.artifacts().summary()));
    }

    sections.push(format!("Task:\n{}", text));

    PromptRequest::new(sections.join("\n\n")).with_system(DIRECT_SYSTEM_PROMPT)
}

/// Prompt asking the model to decompose `task`.
pub fn decomposition_prompt(task: &Task, depth: usize, max_depth: usize) -> PromptRequest {
    let mut prompt = format!(
        "Decompose the following task (depth {} of at most {}).\n\nTask id: {}\nTask: {}",
        depth,
        max_depth,
        task.id,
        task.direct_text().unwrap_or(&task.id)
    );

    if !task.constraints.is_empty() {
        prompt.push_str("\n\nConstraints:\n");
        for constraint in &task.constraints {
            prompt.push_str("- ");
            prompt.push_str(constraint);
            prompt.push('\n');
        }
    }

    if let Some(tool) = task.tool.as_deref() {
        prompt.push_str(&format!("\n\nThe task is expected to use the '{}' tool.", tool));
    }

    PromptRequest::new(prompt).with_system(DECOMPOSITION_SYSTEM_PROMPT)
}

/// Why a model reply could not be read as a decomposition.
#[derive(Debug, Error)]
pub enum DecompositionParseError {
    /// No `{...}` block anywhere in the reply
    #[error("reply contains no JSON object")]
    NoJson,

    /// The JSON block did not deserialize
    #[error("reply JSON is invalid: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The subtask list is missing or empty
    #[error("reply lists no subtasks")]
    NoSubtasks,
}

#[derive(Debug, Deserialize)]
struct RawDecomposition {
    #[serde(default)]
    subtasks: Vec<Task>,
    #[serde(default)]
    strategy: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Read a model reply as a decomposition of the task `parent_id`.
///
/// Tolerates code fences and prose around the JSON object. Subtasks without
/// an id get `<parent>-<n>`.
pub fn parse_decomposition(parent_id: &str, content: &str) -> Result<Decomposition, DecompositionParseError> {
    let json = extract_json_object(content).ok_or(DecompositionParseError::NoJson)?;
    let raw: RawDecomposition = serde_json::from_str(json)?;

    if raw.subtasks.is_empty() {
        return Err(DecompositionParseError::NoSubtasks);
    }

    let subtasks = raw
        .subtasks
        .into_iter()
        .enumerate()
        .map(|(i, mut task)| {
            if task.id.trim().is_empty() {
                task.id = format!("{}-{}", parent_id, i + 1);
            }
            task
        })
        .collect();

    let strategy = match raw.strategy.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("parallel") => DecompositionStrategy::Parallel,
        Some("mixed") => DecompositionStrategy::Mixed,
        _ => DecompositionStrategy::Sequential,
    };

    Ok(Decomposition::new(
        subtasks,
        strategy,
        raw.reasoning.unwrap_or_default(),
        DecompositionSource::Llm,
        raw.confidence.unwrap_or(DEFAULT_MODEL_CONFIDENCE),
    ))
}

fn extract_json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::{ArtifactRecord, Role};
    use serde_json::json;

    #[test]
    fn test_parse_fenced_reply() {
        let reply = "Here you go:\n```json\n{\"subtasks\": [{\"description\": \"read\"}, \
                     {\"id\": \"w\", \"description\": \"write\", \"dependencies\": [\"t-1\"]}], \
                     \"strategy\": \"Mixed\", \"reasoning\": \"write needs read\"}\n```";
        let d = parse_decomposition("t", reply).unwrap();

        assert_eq!(d.subtasks.len(), 2);
        assert_eq!(d.subtasks[0].id, "t-1");
        assert_eq!(d.subtasks[1].id, "w");
        assert_eq!(d.strategy, DecompositionStrategy::Mixed);
        assert_eq!(d.metadata.source, DecompositionSource::Llm);
        assert_eq!(d.reasoning, "write needs read");
        assert!(d.has_internal_dependencies());
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(parse_decomposition("t", "no json here"), Err(DecompositionParseError::NoJson)));
        assert!(matches!(
            parse_decomposition("t", "{not valid}"),
            Err(DecompositionParseError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_decomposition("t", "{\"subtasks\": []}"),
            Err(DecompositionParseError::NoSubtasks)
        ));
    }

    #[test]
    fn test_unknown_strategy_defaults_to_sequential() {
        let d = parse_decomposition("t", "{\"subtasks\": [{\"id\": \"a\", \"data\": 1}], \"strategy\": \"odd\"}").unwrap();
        assert_eq!(d.strategy, DecompositionStrategy::Sequential);
    }

    #[test]
    fn test_direct_prompt_includes_history_and_artifacts() {
        let mut ctx = ExecutionContext::new();
        ctx.add_message(Role::User, "earlier question");
        ctx.store_artifact("notes", ArtifactRecord::new(json!("x")).with_description("meeting notes"));

        let req = direct_prompt("summarize", &ctx, PromptScaffold::default());
        assert!(req.prompt.contains("[user] earlier question"));
        assert!(req.prompt.contains("@notes (string): meeting notes"));
        assert!(req.prompt.ends_with("Task:\nsummarize"));
        assert!(req.system_prompt.is_some());

        let bare = direct_prompt(
            "summarize",
            &ctx,
            PromptScaffold { history_window: 0, include_artifacts: false },
        );
        assert_eq!(bare.prompt, "Task:\nsummarize");
    }

    #[test]
    fn test_decomposition_prompt_lists_constraints() {
        let mut task = Task::new("t").with_description("build a parser");
        task.constraints = vec!["no unsafe".to_string()];
        let req = decomposition_prompt(&task, 1, 5);
        assert!(req.prompt.contains("depth 1 of at most 5"));
        assert!(req.prompt.contains("- no unsafe"));
        assert!(req.system_prompt.unwrap().contains("\"strategy\""));
    }
}
