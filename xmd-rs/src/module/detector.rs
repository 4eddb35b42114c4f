//! Circular dependency detection.
//!
//! Three-colour DFS over the child edges.  Revisiting a `Visiting` node is a
//! back edge; the cycle is the slice of the active DFS stack from that node
//! to the top, closed with the node itself (`a -> b -> a`, or `a -> a` for a
//! self-loop).

use super::graph::{DependencyGraph, VisitState};
use crate::error::ModuleError;

/// A graph plus the path of the most recently detected cycle.
#[derive(Debug, Clone, Default)]
pub struct DependencyDetector {
    graph: DependencyGraph,
    cycle: Vec<String>,
}

impl DependencyDetector {
    pub fn new(graph: DependencyGraph) -> Self {
        DependencyDetector {
            graph,
            cycle: Vec::new(),
        }
    }

    /// Check the whole graph.
    pub fn check_circular(&mut self) -> Result<(), ModuleError> {
        let found = find_cycle(&mut self.graph, None);
        self.record(found)
    }

    /// Check only what is reachable from `start`.
    pub fn check_circular_from(&mut self, start: &str) -> Result<(), ModuleError> {
        let idx = self
            .graph
            .find(start)
            .ok_or_else(|| ModuleError::NotFound { name: start.to_owned() })?;
        let found = find_cycle(&mut self.graph, Some(idx));
        self.record(found)
    }

    /// Module names of the last cycle found; empty if the last check passed.
    pub fn cycle_path(&self) -> &[String] {
        &self.cycle
    }

    fn record(&mut self, found: Option<Vec<String>>) -> Result<(), ModuleError> {
        match found {
            Some(path) => {
                self.cycle = path.clone();
                Err(ModuleError::CircularDependency { path })
            }
            None => {
                self.cycle.clear();
                Ok(())
            }
        }
    }
}

/// Reset every marker, then DFS from `start` (or from every unvisited node).
/// Returns the first cycle found.
pub(crate) fn find_cycle(graph: &mut DependencyGraph, start: Option<usize>) -> Option<Vec<String>> {
    graph.reset_states();
    let roots: Vec<usize> = match start {
        Some(idx) => vec![idx],
        None => (0..graph.len()).collect(),
    };
    for root in roots {
        if graph.nodes()[root].state != VisitState::Unvisited {
            continue;
        }
        if let Some(path) = visit(graph, root) {
            return Some(path);
        }
    }
    None
}

/// Iterative DFS from `root`; `stack` holds `(node, next child)` pairs and
/// is exactly the active recursion path.
fn visit(graph: &mut DependencyGraph, root: usize) -> Option<Vec<String>> {
    let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
    graph.nodes_mut()[root].state = VisitState::Visiting;
    while let Some(top) = stack.last_mut() {
        let node = top.0;
        let child = graph.nodes()[node].children.get(top.1).copied();
        let Some(child) = child else {
            graph.nodes_mut()[node].state = VisitState::Done;
            stack.pop();
            continue;
        };
        top.1 += 1;
        let state = graph.nodes()[child].state;
        match state {
            VisitState::Unvisited => {
                graph.nodes_mut()[child].state = VisitState::Visiting;
                stack.push((child, 0));
            }
            VisitState::Visiting => {
                let names = |i: usize| graph.nodes()[i].module.clone();
                let from = stack.iter().position(|&(n, _)| n == child).unwrap_or(0);
                let mut path: Vec<String> = stack[from..].iter().map(|&(n, _)| names(n)).collect();
                path.push(names(child));
                return Some(path);
            }
            VisitState::Done => {}
        }
    }
    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────
