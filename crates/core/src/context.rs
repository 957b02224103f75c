//! Execution context - per-branch state threaded through strategy calls.
//!
//! Each branch owns its context exclusively. Children start from a snapshot
//! of the parent (artifacts, conversation, completed tasks) and record what
//! they add on top; nothing reaches the parent until it calls
//! [`ExecutionContext::merge_parallel_results`].

use crate::artifact::{ArtifactRecord, ArtifactRegistry};
use crate::conversation::{ConversationEntry, Role};
use crate::id::ContextId;
use crate::task::Task;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// An ancestor in the execution chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFrame {
    /// Task id
    pub id: String,

    /// Task description, if any
    pub description: Option<String>,
}

impl TaskFrame {
    /// Frame for a task.
    pub fn of(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            description: task.description.clone(),
        }
    }

    /// Whether `task` repeats this frame (same id, or same non-empty description).
    pub fn matches(&self, task: &Task) -> bool {
        if !task.id.is_empty() && self.id == task.id {
            return true;
        }
        match (&self.description, &task.description) {
            (Some(a), Some(b)) => !a.trim().is_empty() && a.trim() == b.trim(),
            _ => false,
        }
    }
}

/// Per-branch execution state.
#[derive(Debug)]
pub struct ExecutionContext {
    id: ContextId,
    parent: Option<ContextId>,
    depth: usize,
    ancestors: Vec<TaskFrame>,
    artifacts: ArtifactRegistry,
    written: Vec<String>,
    history: Vec<ConversationEntry>,
    history_base: usize,
    completed: HashMap<String, Value>,
    completed_here: Vec<String>,
    started: Instant,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// Create a root context at depth 0.
    pub fn new() -> Self {
        Self {
            id: ContextId::new(),
            parent: None,
            depth: 0,
            ancestors: Vec::new(),
            artifacts: ArtifactRegistry::new(),
            written: Vec::new(),
            history: Vec::new(),
            history_base: 0,
            completed: HashMap::new(),
            completed_here: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Seed the root context with artifacts.
    pub fn with_artifacts(mut self, artifacts: ArtifactRegistry) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Context id.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Id of the context this one was branched from.
    pub fn parent_id(&self) -> Option<ContextId> {
        self.parent
    }

    /// Nesting depth (0 at the root).
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Ancestor chain from the root task to the parent task.
    pub fn ancestors(&self) -> &[TaskFrame] {
        &self.ancestors
    }

    /// First ancestor that `task` repeats.
    pub fn find_cycle(&self, task: &Task) -> Option<&TaskFrame> {
        self.ancestors.iter().find(|frame| frame.matches(task))
    }

    /// Time since this context was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Branch for running a subtask of `parent`.
    pub fn create_child(&self, parent: &Task) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(TaskFrame::of(parent));

        Self {
            id: ContextId::new(),
            parent: Some(self.id),
            depth: self.depth + 1,
            ancestors,
            artifacts: self.artifacts.clone(),
            written: Vec::new(),
            history: self.history.clone(),
            history_base: self.history.len(),
            completed: self.completed.clone(),
            completed_here: Vec::new(),
            started: Instant::now(),
        }
    }

    /// One branch per concurrent subtask of `parent`, all linked to the
    /// current artifact set.
    pub fn create_parallel_contexts(&self, parent: &Task, count: usize) -> Vec<Self> {
        (0..count).map(|_| self.create_child(parent)).collect()
    }

    /// Fold finished child branches back into this context.
    ///
    /// Conversation entries are appended in child order; artifacts and
    /// completion records written by later children win on name collision.
    pub fn merge_parallel_results(&mut self, children: Vec<ExecutionContext>) {
        for child in children {
            for name in &child.written {
                if let Some(record) = child.artifacts.get_shared(name) {
                    self.artifacts.insert_shared(name.clone(), record);
                    self.note_written(name);
                }
            }

            self.history
                .extend(child.history.into_iter().skip(child.history_base));

            for id in child.completed_here {
                if let Some(value) = child.completed.get(&id) {
                    self.completed.insert(id.clone(), value.clone());
                    if !self.completed_here.contains(&id) {
                        self.completed_here.push(id);
                    }
                }
            }
        }
    }

    /// Fold a single child branch back into this context.
    pub fn merge_child(&mut self, child: ExecutionContext) {
        self.merge_parallel_results(vec![child]);
    }

    /// Artifact registry.
    pub fn artifacts(&self) -> &ArtifactRegistry {
        &self.artifacts
    }

    /// Store an artifact on this branch.
    pub fn store_artifact(&mut self, name: impl Into<String>, record: ArtifactRecord) {
        let name = name.into();
        self.artifacts.insert(name.clone(), record);
        self.note_written(&name);
    }

    fn note_written(&mut self, name: &str) {
        if !self.written.iter().any(|w| w == name) {
            self.written.push(name.to_string());
        }
    }

    /// Conversation so far.
    pub fn history(&self) -> &[ConversationEntry] {
        &self.history
    }

    /// The last `n` conversation entries.
    pub fn recent_history(&self, n: usize) -> &[ConversationEntry] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    /// Append a conversation entry.
    pub fn add_message(&mut self, role: Role, content: impl Into<String>) {
        self.history.push(ConversationEntry::new(role, content));
    }

    /// Record a task as completed with its result.
    pub fn mark_completed(&mut self, task_id: impl Into<String>, result: Value) {
        let id = task_id.into();
        if !self.completed_here.contains(&id) {
            self.completed_here.push(id.clone());
        }
        self.completed.insert(id, result);
    }

    /// Whether a task has completed on this branch or before it.
    pub fn is_completed(&self, task_id: &str) -> bool {
        self.completed.contains_key(task_id)
    }

    /// Result of a completed task.
    pub fn completed_result(&self, task_id: &str) -> Option<&Value> {
        self.completed.get(task_id)
    }

    /// Dependencies of `task` that have not completed.
    pub fn missing_dependencies(&self, task: &Task) -> Vec<String> {
        task.dependencies
            .iter()
            .filter(|dep| !self.is_completed(dep))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parent_task() -> Task {
        Task::new("parent").with_description("parent work")
    }

    #[test]
    fn test_child_tracks_depth_and_ancestors() {
        let root = ExecutionContext::new();
        let child = root.create_child(&parent_task());
        let grandchild = child.create_child(&Task::new("mid"));

        assert_eq!(child.depth(), 1);
        assert_eq!(grandchild.depth(), 2);
        assert_eq!(grandchild.parent_id(), Some(child.id()));
        let ids: Vec<&str> = grandchild.ancestors().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["parent", "mid"]);
    }

    #[test]
    fn test_find_cycle_by_id_or_description() {
        let root = ExecutionContext::new();
        let child = root.create_child(&parent_task());

        assert!(child.find_cycle(&Task::new("parent")).is_some());
        assert!(child.find_cycle(&Task::new("other").with_description("parent work")).is_some());
        assert!(child.find_cycle(&Task::new("other").with_description("new work")).is_none());
    }

    #[test]
    fn test_children_do_not_write_into_parent() {
        let mut root = ExecutionContext::new();
        root.store_artifact("base", ArtifactRecord::new(json!(1)));

        let mut child = root.create_child(&parent_task());
        assert!(child.artifacts().contains("base"));
        child.store_artifact("extra", ArtifactRecord::new(json!(2)));

        assert!(!root.artifacts().contains("extra"));
        root.merge_child(child);
        assert_eq!(root.artifacts().value("extra"), Some(json!(2)));
    }

    #[test]
    fn test_merge_parallel_results_last_write_wins_and_appends_history() {
        let mut root = ExecutionContext::new();
        root.add_message(Role::User, "before");

        let mut children = root.create_parallel_contexts(&parent_task(), 2);
        assert!(children.iter().all(|c| c.depth() == 1));

        children[0].store_artifact("shared", ArtifactRecord::new(json!("first")));
        children[0].add_message(Role::Assistant, "from first");
        children[0].mark_completed("a", json!(1));
        children[1].store_artifact("shared", ArtifactRecord::new(json!("second")));
        children[1].add_message(Role::Assistant, "from second");

        root.merge_parallel_results(children);

        assert_eq!(root.artifacts().value("shared"), Some(json!("second")));
        let contents: Vec<&str> = root.history().iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["before", "from first", "from second"]);
        assert!(root.is_completed("a"));
    }

    #[test]
    fn test_merged_writes_propagate_through_levels() {
        let mut root = ExecutionContext::new();
        let mut child = root.create_child(&parent_task());
        let mut grandchild = child.create_child(&Task::new("mid"));
        grandchild.store_artifact("deep", ArtifactRecord::new(json!(true)));
        grandchild.mark_completed("leaf", json!("ok"));

        child.merge_child(grandchild);
        root.merge_child(child);

        assert!(root.artifacts().contains("deep"));
        assert_eq!(root.completed_result("leaf"), Some(&json!("ok")));
    }

    #[test]
    fn test_missing_dependencies() {
        let mut ctx = ExecutionContext::new();
        ctx.mark_completed("done", json!(null));
        let task = Task::new("t").with_dependencies(vec!["done".into(), "missing".into()]);
        assert_eq!(ctx.missing_dependencies(&task), vec!["missing".to_string()]);
    }

    #[test]
    fn test_recent_history_window() {
        let mut ctx = ExecutionContext::new();
        for i in 0..5 {
            ctx.add_message(Role::User, format!("m{i}"));
        }
        let recent: Vec<&str> = ctx.recent_history(2).iter().map(|e| e.content.as_str()).collect();
        assert_eq!(recent, vec!["m3", "m4"]);
        assert_eq!(ctx.recent_history(10).len(), 5);
    }
}
