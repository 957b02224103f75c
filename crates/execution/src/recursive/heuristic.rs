//! Pattern-based decomposition used when no model or template applies.

use conductor_core::{Decomposition, DecompositionSource, DecompositionStrategy, Task};
use regex::Regex;
use std::sync::OnceLock;

struct StepPatterns {
    /// `Step 1:`, `step 2.`, `STEP 3)`
    step_marker: Regex,
    /// Leading `first` / `firstly`
    first_marker: Regex,
    /// Connectives after a leading `first`
    then_marker: Regex,
    /// `1. foo`, `2) bar`, `- baz`, `* qux`
    list_item: Regex,
}

fn patterns() -> Option<&'static StepPatterns> {
    static PATTERNS: OnceLock<Option<StepPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(StepPatterns {
                step_marker: Regex::new(r"(?i)\bstep\s*\d+\s*[:.)\-]").ok()?,
                first_marker: Regex::new(r"(?i)^\s*first(?:ly)?\b[,:]?\s*").ok()?,
                then_marker: Regex::new(r"(?i)[,;.]?\s*\b(?:and\s+)?(?:then|after that|next|finally)\b[,:]?").ok()?,
                list_item: Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+(.+?)\s*$").ok()?,
            })
        })
        .as_ref()
}

fn clean(part: &str) -> Option<String> {
    let part = part.trim().trim_end_matches(['.', ',', ';']).trim();
    (!part.is_empty()).then(|| part.to_string())
}

fn at_least_two(parts: Vec<String>) -> Option<Vec<String>> {
    (parts.len() >= 2).then_some(parts)
}

/// Split a description into steps, if it reads like a list of steps.
pub fn split_steps(text: &str) -> Option<Vec<String>> {
    let patterns = patterns()?;

    if patterns.step_marker.is_match(text) {
        let parts = patterns.step_marker.split(text).filter_map(clean).collect();
        if let Some(parts) = at_least_two(parts) {
            return Some(parts);
        }
    }

    if let Some(first) = patterns.first_marker.find(text) {
        let parts = patterns.then_marker.split(&text[first.end()..]).filter_map(clean).collect();
        if let Some(parts) = at_least_two(parts) {
            return Some(parts);
        }
    }

    let items = text
        .lines()
        .filter_map(|line| patterns.list_item.captures(line))
        .filter_map(|caps| caps.get(1).and_then(|m| clean(m.as_str())))
        .collect();
    at_least_two(items)
}

/// Whether a description has explicit step structure.
pub fn has_step_structure(text: &str) -> bool {
    split_steps(text).is_some()
}

/// Decompose without a model: split on step patterns, else a single tool
/// call, else a plan/execute pair.
pub fn heuristic_decomposition(task: &Task) -> Decomposition {
    let text = task.direct_text().unwrap_or_else(|| task.label());

    if let Some(steps) = split_steps(text) {
        let count = steps.len();
        let subtasks = steps
            .into_iter()
            .enumerate()
            .map(|(i, step)| Task::new(format!("{}-step-{}", task.id, i + 1)).with_description(step))
            .collect();
        return Decomposition::new(
            subtasks,
            DecompositionStrategy::Sequential,
            format!("Description lists {count} steps"),
            DecompositionSource::Heuristic,
            0.6,
        );
    }

    if let Some(tool) = task.tool.as_deref().filter(|t| !t.is_empty()) {
        let subtask = Task {
            atomic: true,
            ..Task::new(format!("{}-tool", task.id))
                .with_description(format!("Run {tool}"))
                .with_tool(tool, task.input.clone().unwrap_or_default())
        };
        return Decomposition::new(
            vec![subtask],
            DecompositionStrategy::Sequential,
            format!("Task names the '{tool}' tool"),
            DecompositionSource::Heuristic,
            0.5,
        );
    }

    let plan_id = format!("{}-plan", task.id);
    let plan = Task::new(plan_id.clone()).with_description(format!("Plan how to: {text}"));
    let execute = Task::new(format!("{}-execute", task.id))
        .with_description(format!("Carry out the plan for: {text}"))
        .with_dependencies(vec![plan_id]);
    Decomposition::new(
        vec![plan, execute],
        DecompositionStrategy::Sequential,
        "No structure found, planning before executing",
        DecompositionSource::Heuristic,
        0.4,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_markers() {
        assert_eq!(
            split_steps("Step 1: do X. Step 2: do Y."),
            Some(vec!["do X".to_string(), "do Y".to_string()])
        );
        assert_eq!(
            split_steps("step 1) fetch, step 2) parse; STEP 3 - store"),
            Some(vec!["fetch".into(), "parse".into(), "store".into()])
        );
        assert_eq!(split_steps("Step 1: only one"), None);
    }

    #[test]
    fn test_first_then() {
        assert_eq!(
            split_steps("First, read the file, then count the words and finally print the total."),
            Some(vec!["read the file".into(), "count the words".into(), "print the total".into()])
        );
        let parts = split_steps("first gather requirements then write code").unwrap();
        assert_eq!(parts, vec!["gather requirements", "write code"]);
    }

    #[test]
    fn test_lists() {
        let text = "Release checklist:\n1. bump version\n2) tag\n- publish.";
        assert_eq!(
            split_steps(text),
            Some(vec!["bump version".into(), "tag".into(), "publish".into()])
        );
        assert!(!has_step_structure("just one sentence with no structure"));
    }

    #[test]
    fn test_step_decomposition_ids() {
        let d = heuristic_decomposition(&Task::new("d").with_description("Step 1: do X. Step 2: do Y."));
        let ids: Vec<&str> = d.subtasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["d-step-1", "d-step-2"]);
        assert_eq!(d.strategy, DecompositionStrategy::Sequential);
        assert_eq!(d.metadata.source, DecompositionSource::Heuristic);
    }

    #[test]
    fn test_tool_and_plan_fallbacks() {
        let tool = heuristic_decomposition(&Task::new("t").with_tool("echo", json!({"a": 1})));
        assert_eq!(tool.subtasks.len(), 1);
        assert!(tool.subtasks[0].atomic);
        assert_eq!(tool.subtasks[0].input, Some(json!({"a": 1})));

        let plan = heuristic_decomposition(&Task::new("p").with_description("write a compiler"));
        assert_eq!(plan.subtasks[0].id, "p-plan");
        assert_eq!(plan.subtasks[1].dependencies, vec!["p-plan".to_string()]);
        assert!(plan.has_internal_dependencies());
    }
}
