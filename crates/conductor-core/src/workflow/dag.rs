//! Task dependency graph, cycle detection, and wave preview.
//!
//! Uses `petgraph` to model task dependencies as a directed graph with edges
//! running from a dependency to its dependent. Structural validation happens
//! once, before any task executes: unknown dependency IDs and cycles are
//! hard failures, never repaired.

use std::collections::{HashMap, HashSet};

use conductor_types::task::TaskSpec;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use super::error::StepError;

/// Validated, acyclic dependency graph over the tasks of one plan.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    /// Build the graph and validate it.
    ///
    /// Fails with `UnknownDependency` when a task names an ID absent from the
    /// plan, and with `CyclicDependency` (naming the cycle path) when the
    /// dependency relation is not acyclic.
    pub fn build(specs: &[TaskSpec]) -> Result<Self, StepError> {
        let mut graph = DiGraph::<String, ()>::with_capacity(specs.len(), specs.len());
        let mut index = HashMap::with_capacity(specs.len());
        for spec in specs {
            let node = graph.add_node(spec.id.clone());
            index.insert(spec.id.clone(), node);
        }

        for spec in specs {
            let to = index[spec.id.as_str()];
            for dep in &spec.depends_on {
                let from = index.get(dep.as_str()).ok_or_else(|| StepError::UnknownDependency {
                    task: spec.id.clone(),
                    dependency: dep.clone(),
                })?;
                graph.add_edge(*from, to, ());
            }
        }

        let dag = Self { graph, index };
        if let Some(cycle) = dag.find_cycle() {
            return Err(StepError::CyclicDependency { cycle });
        }
        Ok(dag)
    }

    /// DFS three-coloring. Returns the first cycle found as a closed path of
    /// task IDs in dependency order, e.g. `["t1", "t2", "t1"]`.
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut color = vec![Color::White; self.graph.node_count()];

        for root in self.graph.node_indices() {
            if color[root.index()] != Color::White {
                continue;
            }

            // Explicit stack of (node, remaining successors) to avoid recursion.
            let mut path: Vec<NodeIndex> = vec![root];
            let mut stack = vec![self.successors(root)];
            color[root.index()] = Color::Gray;

            while let Some(successors) = stack.last_mut() {
                match successors.pop() {
                    Some(next) => match color[next.index()] {
                        Color::White => {
                            color[next.index()] = Color::Gray;
                            path.push(next);
                            stack.push(self.successors(next));
                        }
                        Color::Gray => {
                            let start = path.iter().position(|n| *n == next).unwrap_or(0);
                            let mut cycle: Vec<String> =
                                path[start..].iter().map(|n| self.graph[*n].clone()).collect();
                            cycle.push(self.graph[next].clone());
                            return Some(cycle);
                        }
                        Color::Black => {}
                    },
                    None => {
                        stack.pop();
                        if let Some(done) = path.pop() {
                            color[done.index()] = Color::Black;
                        }
                    }
                }
            }
        }
        None
    }

    /// Dependents of `node`, reversed so popping visits them in insertion order.
    fn successors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut next: Vec<NodeIndex> = self.graph.edges(node).map(|e| e.target()).collect();
        next.sort();
        next.dedup();
        next.reverse();
        next
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Tasks that list `id` as a direct dependency, in plan order.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        let Some(&node) = self.index.get(id) else {
            return Vec::new();
        };
        let mut nodes: Vec<NodeIndex> = self.graph.neighbors_directed(node, Direction::Outgoing).collect();
        nodes.sort();
        nodes.dedup();
        nodes.into_iter().map(|n| self.graph[n].as_str()).collect()
    }

    /// Every task that transitively depends on `id`, each paired with the
    /// direct dependency through which it was reached. Breadth-first, so
    /// direct dependents come first.
    pub fn descendants(&self, id: &str) -> Vec<(&str, &str)> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        let mut frontier = vec![self.graph[start].as_str()];

        while !frontier.is_empty() {
            let mut next = Vec::new();
            for parent in frontier {
                for child in self.dependents(parent) {
                    if visited.insert(child) {
                        out.push((child, parent));
                        next.push(child);
                    }
                }
            }
            frontier = next;
        }
        out
    }

    /// Depth-based wave grouping: wave 0 holds tasks without dependencies,
    /// wave n holds tasks whose deepest dependency sits in wave n - 1. Within
    /// a wave tasks keep plan order.
    pub fn waves(&self) -> Vec<Vec<&str>> {
        if self.is_empty() {
            return Vec::new();
        }

        // Acyclic by construction; a failed sort leaves every task in wave 0.
        let sorted = toposort(&self.graph, None).unwrap_or_default();

        let mut depths = vec![0usize; self.graph.node_count()];
        for node in sorted {
            let depth = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .map(|dep| depths[dep.index()] + 1)
                .max()
                .unwrap_or(0);
            depths[node.index()] = depth;
        }

        let max_depth = depths.iter().copied().max().unwrap_or(0);
        let mut waves: Vec<Vec<&str>> = vec![Vec::new(); max_depth + 1];
        for node in self.graph.node_indices() {
            waves[depths[node.index()]].push(self.graph[node].as_str());
        }
        waves
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
