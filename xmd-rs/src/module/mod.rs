//! Module subsystem: registry, dependency graph, cycle detection, and
//! import/export binding.
//!
//! | File | Role |
//! |------|------|
//! | `registry.rs` | owns [`Module`]s, resolves names to files |
//! | `graph.rs`    | [`DependencyGraph`], Kahn topological sort, [`validate_all`] |
//! | `detector.rs` | [`DependencyDetector`], DFS cycle detection with the true path |
//! | `resolver.rs` | [`import_symbol`], [`import_all_symbols`], [`export_symbol`] |
//!
//! Graph edges run from a dependency to its dependents, so walking children
//! visits prerequisites before the modules that use them.

pub mod detector;
pub mod graph;
pub mod registry;
pub mod resolver;

pub use detector::DependencyDetector;
pub use graph::{build_graph, validate_all, DependencyGraph, DependencyNode, VisitState};
pub use registry::{FsLoader, MemoryLoader, Module, ModuleLoader, ModuleRegistry};
pub use resolver::{export_symbol, import_all_symbols, import_symbol};
