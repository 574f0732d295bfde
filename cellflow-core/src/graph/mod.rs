//! Dependency Graph
//!
//! This module implements the dependency graph that tracks dataflow
//! relationships between cells.
//!
//! # Overview
//!
//! The graph is a directed graph where:
//!
//! - Nodes are cells: named computation blocks with declared defs and refs
//! - Edges represent dataflow: an edge from A to B means B references a name
//!   defined in A
//!
//! When a cell is registered, edited, or deleted, the graph updates both
//! edge directions, detects newly closed cycles, and propagates staleness
//! and disablement to affected descendants. The runner then asks the graph
//! which ancestors a cell needs and in what order to execute them.
//!
//! # Design Decisions
//!
//! 1. We use a centralized graph rather than per-cell subscription lists
//!    because:
//!    - It enables efficient topological ordering over arbitrary subsets
//!    - It keeps cycle bookkeeping incremental (checked at edge insertion)
//!    - It gives collision detection (siblings) a single home
//!
//! 2. Cells are stored in registration order; that order is the
//!    deterministic tie-break for topological sorting.
//!
//! 3. We maintain both forward (children) and reverse (parents) edges to
//!    enable efficient traversal in both directions.

mod cell;
mod directed;
mod edge;
mod traverse;

pub use cell::{
    code_key, Cell, CellId, CodeKey, ImportData, ImportWorkspace, Language, Name, RunState,
    VariableData,
};
pub use directed::DirectedGraph;
pub use edge::{Edge, EdgeWithVars};
pub use traverse::{Direction, EdgeRelation};

pub(crate) use directed::GraphState;
