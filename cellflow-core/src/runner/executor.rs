//! Executor Contract
//!
//! The runner drives cell bodies through this trait; how a body actually
//! runs is the embedder's business. The core never parses or evaluates
//! code itself.
//!
//! # Obligations
//!
//! An implementation must populate the namespace with every name the cell
//! defines that it successfully computed, and must update the cell's run
//! state as a side effect (running, then idle on success or
//! errored/interrupted/cancelled on failure). Failures inside a cell's
//! body are opaque to the core: they surface through the cell's run state
//! and through the executor's own error type.

use std::collections::HashMap;

use crate::graph::{Cell, DirectedGraph, Name};

/// The accumulated values cells define and read during one compute call.
pub type Namespace<V> = HashMap<Name, V>;

/// Executes cell bodies on behalf of the runner.
///
/// Both entry points share the same obligations; the suspending form is
/// for cells whose bodies must run under cooperative suspension.
#[allow(async_fn_in_trait)]
pub trait CellExecutor {
    /// The value type cells produce and namespaces hold.
    type Value;
    /// The failure type for a cell body that does not complete.
    type Error: std::error::Error;

    /// Run a cell body to completion, blocking.
    fn execute(
        &mut self,
        cell: &Cell,
        namespace: &mut Namespace<Self::Value>,
        graph: &DirectedGraph,
    ) -> Result<Self::Value, Self::Error>;

    /// Run a possibly suspending cell body.
    async fn execute_async(
        &mut self,
        cell: &Cell,
        namespace: &mut Namespace<Self::Value>,
        graph: &DirectedGraph,
    ) -> Result<Self::Value, Self::Error>;
}
