//! Dependency graph and topological load order.
//!
//! A node's children are the modules that depend on it.  [`topological_sort`]
//! is Kahn's algorithm over those edges; when it cannot emit every node the
//! graph has a cycle, and the detector's DFS names it.
//!
//! [`topological_sort`]: DependencyGraph::topological_sort

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use super::detector::find_cycle;
use super::registry::ModuleRegistry;
use crate::error::ModuleError;

/// DFS marker, reset before every detection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisitState {
    #[default]
    Unvisited,
    Visiting,
    Done,
}

#[derive(Debug, Clone)]
pub struct DependencyNode {
    /// Name of the registry module this node stands for.
    pub module: String,
    /// Indices of dependent nodes.
    pub children: Vec<usize>,
    pub state: VisitState,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<DependencyNode>,
    index: HashMap<String, usize>,
    load_order: Vec<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module(&mut self, name: &str) -> Result<usize, ModuleError> {
        if self.index.contains_key(name) {
            return Err(ModuleError::AlreadyLoaded { name: name.to_owned() });
        }
        let idx = self.nodes.len();
        self.nodes.push(DependencyNode {
            module: name.to_owned(),
            children: Vec::new(),
            state: VisitState::Unvisited,
        });
        self.index.insert(name.to_owned(), idx);
        Ok(idx)
    }

    /// Record that `module` depends on `dependency`: `module` becomes a child
    /// of `dependency`.
    pub fn add_dependency(&mut self, module: &str, dependency: &str) -> Result<(), ModuleError> {
        let not_found = |name: &str| ModuleError::NotFound { name: name.to_owned() };
        let m = self.find(module).ok_or_else(|| not_found(module))?;
        let d = self.find(dependency).ok_or_else(|| not_found(dependency))?;
        let children = &mut self.nodes[d].children;
        if !children.contains(&m) {
            children.push(m);
        }
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn nodes(&self) -> &[DependencyNode] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [DependencyNode] {
        &mut self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn reset_states(&mut self) {
        for node in &mut self.nodes {
            node.state = VisitState::Unvisited;
        }
    }

    /// The order computed by the last successful sort; empty otherwise.
    pub fn load_order(&self) -> &[String] {
        &self.load_order
    }

    /// Kahn's algorithm.  Ties are broken by insertion order, so the result
    /// is deterministic.
    pub fn topological_sort(&mut self) -> Result<&[String], ModuleError> {
        self.load_order.clear();
        let mut in_degree = vec![0usize; self.nodes.len()];
        for node in &self.nodes {
            for &child in &node.children {
                in_degree[child] += 1;
            }
        }
        let mut queue: VecDeque<usize> = (0..self.nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(idx) = queue.pop_front() {
            order.push(self.nodes[idx].module.clone());
            for &child in &self.nodes[idx].children {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    queue.push_back(child);
                }
            }
        }
        if order.len() < self.nodes.len() {
            let path = find_cycle(self, None).unwrap_or_else(|| {
                (0..self.nodes.len())
                    .filter(|&i| in_degree[i] > 0)
                    .map(|i| self.nodes[i].module.clone())
                    .collect()
            });
            debug!(?path, "topological sort found a cycle");
            return Err(ModuleError::CircularDependency { path });
        }
        self.load_order = order;
        Ok(&self.load_order)
    }
}

/// One node per registered module, one edge per declared dependency that is
/// itself registered.  Unknown dependencies are left to [`validate_all`].
pub fn build_graph(registry: &ModuleRegistry) -> Result<DependencyGraph, ModuleError> {
    let mut graph = DependencyGraph::new();
    for module in registry.iter() {
        graph.add_module(&module.name)?;
    }
    for module in registry.iter() {
        for dep in &module.dependencies {
            if registry.contains(dep) {
                graph.add_dependency(&module.name, dep)?;
            } else {
                debug!(module = %module.name, dependency = %dep, "skipping unregistered dependency");
            }
        }
    }
    Ok(graph)
}

/// Fail with `NotFound` for the first declared dependency that is not
/// registered.
pub fn validate_all(registry: &ModuleRegistry) -> Result<(), ModuleError> {
    for module in registry.iter() {
        if let Some(dep) = module.dependencies.iter().find(|d| !registry.contains(d)) {
            return Err(ModuleError::NotFound { name: dep.clone() });
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
