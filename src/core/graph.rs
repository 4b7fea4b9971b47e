//! Dependency graph over plan task ids.
//!
//! Edges point from a dependency to its dependent, so topological order is
//! execution order. Edges that would introduce a cycle are rejected.

use crate::core::task::SwarmTaskId;
use crate::{Error, Result};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<SwarmTaskId, ()>,
    nodes: HashMap<SwarmTaskId, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task node. Idempotent.
    pub fn add_task(&mut self, id: SwarmTaskId) {
        self.nodes
            .entry(id)
            .or_insert_with(|| self.graph.add_node(id));
    }

    /// Add an edge `dep -> dependent`. Rejects edges that would make the
    /// graph cyclic; the graph is left unchanged in that case.
    pub fn add_dependency(&mut self, dependent: SwarmTaskId, dep: SwarmTaskId) -> Result<()> {
        let from = *self
            .nodes
            .get(&dep)
            .ok_or_else(|| Error::TaskNotFound(dep.to_string()))?;
        let to = *self
            .nodes
            .get(&dependent)
            .ok_or_else(|| Error::TaskNotFound(dependent.to_string()))?;

        let edge = self.graph.add_edge(from, to, ());
        if is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            return Err(Error::Validation(format!(
                "dependency {} -> {} would create a cycle",
                dep, dependent
            )));
        }
        Ok(())
    }

    /// Direct dependencies of a task.
    pub fn deps_of(&self, id: SwarmTaskId) -> Vec<SwarmTaskId> {
        let Some(&idx) = self.nodes.get(&id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, petgraph::Direction::Incoming)
            .map(|n| self.graph[n])
            .collect()
    }

    /// Check whether every dependency of `id` is in the completed set.
    pub fn deps_satisfied(&self, id: SwarmTaskId, completed: &HashSet<SwarmTaskId>) -> bool {
        self.deps_of(id).iter().all(|d| completed.contains(d))
    }

    pub fn contains(&self, id: SwarmTaskId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(p: u32, o: u32) -> SwarmTaskId {
        SwarmTaskId::new(p, o)
    }

    #[test]
    fn test_add_task_idempotent() {
        let mut g = DependencyGraph::new();
        g.add_task(id(1, 1));
        g.add_task(id(1, 1));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_add_dependency_and_query() {
        let mut g = DependencyGraph::new();
        g.add_task(id(1, 1));
        g.add_task(id(1, 2));
        g.add_dependency(id(1, 2), id(1, 1)).unwrap();

        assert_eq!(g.deps_of(id(1, 2)), vec![id(1, 1)]);
        assert!(g.deps_of(id(1, 1)).is_empty());
    }

    #[test]
    fn test_dependency_on_unknown_task() {
        let mut g = DependencyGraph::new();
        g.add_task(id(1, 1));
        let result = g.add_dependency(id(1, 1), id(9, 9));
        assert!(matches!(result, Err(Error::TaskNotFound(_))));
    }

    #[test]
    fn test_cycle_rejected_and_graph_unchanged() {
        let mut g = DependencyGraph::new();
        g.add_task(id(1, 1));
        g.add_task(id(1, 2));
        g.add_task(id(1, 3));
        g.add_dependency(id(1, 2), id(1, 1)).unwrap();
        g.add_dependency(id(1, 3), id(1, 2)).unwrap();

        let result = g.add_dependency(id(1, 1), id(1, 3));
        assert!(matches!(result, Err(Error::Validation(_))));
        // Edge must have been removed again.
        assert!(g.deps_of(id(1, 1)).is_empty());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut g = DependencyGraph::new();
        g.add_task(id(1, 1));
        assert!(g.add_dependency(id(1, 1), id(1, 1)).is_err());
    }

    #[test]
    fn test_deps_satisfied() {
        let mut g = DependencyGraph::new();
        g.add_task(id(1, 1));
        g.add_task(id(1, 2));
        g.add_task(id(2, 1));
        g.add_dependency(id(2, 1), id(1, 1)).unwrap();
        g.add_dependency(id(2, 1), id(1, 2)).unwrap();

        let mut completed = HashSet::new();
        assert!(!g.deps_satisfied(id(2, 1), &completed));
        completed.insert(id(1, 1));
        assert!(!g.deps_satisfied(id(2, 1), &completed));
        completed.insert(id(1, 2));
        assert!(g.deps_satisfied(id(2, 1), &completed));
    }

    #[test]
    fn test_task_with_no_deps_is_satisfied() {
        let mut g = DependencyGraph::new();
        g.add_task(id(1, 1));
        assert!(g.deps_satisfied(id(1, 1), &HashSet::new()));
    }
}
