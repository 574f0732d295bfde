//! Cellflow Core
//!
//! This crate provides the core of the Cellflow reactive execution
//! environment. It implements:
//!
//! - A live dependency graph over named computation blocks ("cells")
//! - Incremental cycle detection and name-collision tracking
//! - Stale-state and disablement propagation
//! - Deterministic topological scheduling and a cell runner
//!
//! The crate owns no source analysis and no code evaluation: an external
//! analyzer supplies each cell's fact sheet (defs, refs, language,
//! import-block classification), and an external executor runs cell bodies
//! through the [`runner::CellExecutor`] trait.
//!
//! # Architecture
//!
//! The crate is organized into two dependency-ordered modules:
//!
//! - `graph`: the cell data model and the directed dependency graph
//! - `runner`: ancestor resolution and topological execution on top of the
//!   graph
//!
//! # Example
//!
//! ```rust,ignore
//! use cellflow_core::graph::{Cell, CellId, DirectedGraph};
//! use cellflow_core::runner::{Namespace, Runner};
//!
//! let graph = DirectedGraph::new();
//! graph.register(Cell::new("a", "x = 1").with_defs(["x"]))?;
//! graph.register(Cell::new("b", "y = x + 1").with_defs(["y"]).with_refs(["x"]))?;
//!
//! // Executes "a", then "b"; returns y = 2 and its defs.
//! let mut runner = Runner::new(&graph, executor);
//! let (output, defs) = runner.run_sync(&CellId::new("b"), Namespace::new())?;
//! ```

pub mod error;
pub mod graph;
pub mod runner;

pub use error::{ComputeError, GraphError};
pub use graph::{Cell, CellId, DirectedGraph, Edge, EdgeWithVars, Language, RunState};
pub use runner::{CellExecutor, Namespace, Runner};
