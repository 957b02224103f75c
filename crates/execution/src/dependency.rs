//! Dependency graph over the subtasks of one decomposition.

use conductor_core::Task;
use std::collections::{HashMap, HashSet};

/// Readiness of a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// These tasks can run now
    Ready(Vec<usize>),
    /// Nothing pending
    Done,
    /// Pending tasks wait on each other
    Circular(Vec<String>),
}

/// Subtasks and their dependencies on siblings.
///
/// Dependencies naming tasks outside the graph are ignored here; they are
/// checked against the execution context when the subtask runs.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    ids: Vec<String>,
    /// task -> [dependencies]
    graph: HashMap<usize, Vec<usize>>,
}

impl DependencyGraph {
    /// Build a graph over `tasks`, in list order.
    pub fn build(tasks: &[Task]) -> Self {
        let index: HashMap<&str, usize> = tasks.iter().enumerate().map(|(i, t)| (t.id.as_str(), i)).collect();

        // A task naming itself is kept as an edge so it can never become ready.
        let mut graph: HashMap<usize, Vec<usize>> = HashMap::new();
        for (i, task) in tasks.iter().enumerate() {
            for dep in &task.dependencies {
                if let Some(&d) = index.get(dep.as_str()) {
                    graph.entry(i).or_default().push(d);
                }
            }
        }

        Self {
            ids: tasks.iter().map(|t| t.id.clone()).collect(),
            graph,
        }
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Sibling dependencies of task `i`.
    pub fn dependencies(&self, i: usize) -> &[usize] {
        self.graph.get(&i).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Frontier of pending tasks whose dependencies have all settled.
    pub fn frontier(&self, settled: &HashSet<usize>) -> Resolution {
        let pending: Vec<usize> = (0..self.len()).filter(|i| !settled.contains(i)).collect();
        if pending.is_empty() {
            return Resolution::Done;
        }

        let ready: Vec<usize> = pending
            .iter()
            .copied()
            .filter(|&i| self.dependencies(i).iter().all(|d| settled.contains(d)))
            .collect();

        if ready.is_empty() {
            Resolution::Circular(pending.into_iter().map(|i| self.ids[i].clone()).collect())
        } else {
            Resolution::Ready(ready)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task::new(id)
            .with_data(json!(id))
            .with_dependencies(deps.iter().map(|d| d.to_string()).collect())
    }

    fn waves(graph: &DependencyGraph) -> Vec<Vec<usize>> {
        let mut settled = HashSet::new();
        let mut waves = Vec::new();
        while let Resolution::Ready(wave) = graph.frontier(&settled) {
            settled.extend(wave.iter().copied());
            waves.push(wave);
        }
        waves
    }

    #[test]
    fn test_frontier_follows_dependencies() {
        let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["a"]), task("d", &["b", "c"])];
        let graph = DependencyGraph::build(&tasks);
        assert_eq!(waves(&graph), vec![vec![0], vec![1, 2], vec![3]]);
        assert_eq!(graph.dependencies(3), &[1, 2]);
        assert_eq!(graph.frontier(&(0..4).collect()), Resolution::Done);
    }

    #[test]
    fn test_external_dependencies_are_ignored() {
        let tasks = vec![task("a", &["outside"]), task("b", &["a"])];
        let graph = DependencyGraph::build(&tasks);
        assert_eq!(waves(&graph), vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_self_dependency_is_circular() {
        let tasks = vec![task("a", &[]), task("b", &["a", "b"])];
        let graph = DependencyGraph::build(&tasks);
        assert_eq!(graph.dependencies(1), &[0, 1]);

        let settled = HashSet::from([0]);
        assert_eq!(graph.frontier(&settled), Resolution::Circular(vec!["b".into()]));
    }

    #[test]
    fn test_cycle_reports_pending_ids() {
        let tasks = vec![task("a", &[]), task("b", &["c"]), task("c", &["b"])];
        let graph = DependencyGraph::build(&tasks);

        let mut settled = HashSet::new();
        assert_eq!(graph.frontier(&settled), Resolution::Ready(vec![0]));
        settled.insert(0);
        assert_eq!(graph.frontier(&settled), Resolution::Circular(vec!["b".into(), "c".into()]));
    }
}
