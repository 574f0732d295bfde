//! Cell Runner
//!
//! Utility for running individual cells in a graph and obtaining their
//! output together with the values of their defs.
//!
//! # How It Works
//!
//! 1. The caller asks for a cell's value, optionally supplying override
//!    values for some of its refs.
//!
//! 2. The runner computes the minimal ancestor set: direct parents whose
//!    defs intersect the refs that were *not* overridden, then the full
//!    parent closure from that seed. Ancestors needed only to satisfy an
//!    overridden ref are excluded entirely.
//!
//! 3. Ancestors execute one at a time in topological order against a single
//!    namespace; each later cell sees the side effects of all predecessors.
//!
//! 4. Overrides are injected, the target executes, and the namespace is
//!    restricted to the target's declared defs for the return value.
//!
//! # Blocking vs. suspending
//!
//! Two entry points share all of the graph logic and differ only in how
//! each cell invocation is awaited. The blocking entry point fails fast,
//! before any execution, when the target or any unsubstituted ancestor
//! requires suspension.

mod executor;

pub use executor::{CellExecutor, Namespace};

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::ComputeError;
use crate::graph::{Cell, CellId, DirectedGraph, Direction, Name};

/// Runs cells in a graph through an external [`CellExecutor`].
pub struct Runner<'g, E> {
    graph: &'g DirectedGraph,
    executor: E,
}

impl<'g, E: CellExecutor> Runner<'g, E> {
    pub fn new(graph: &'g DirectedGraph, executor: E) -> Self {
        Self { graph, executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn into_executor(self) -> E {
        self.executor
    }

    /// Run a cell and its ancestors, blocking.
    ///
    /// Fails before any execution if the target or any unsubstituted
    /// ancestor requires suspension; use [`run_async`](Self::run_async)
    /// for those. Returns the target's output and the values of its defs.
    pub fn run_sync(
        &mut self,
        id: &CellId,
        overrides: Namespace<E::Value>,
    ) -> Result<(E::Value, Namespace<E::Value>), ComputeError<E::Error>> {
        let cell = self.target(id)?;
        if cell.is_async() {
            return Err(ComputeError::SuspendingCell(id.clone()));
        }
        Self::validate_overrides(&cell, &overrides)?;

        let overridden: HashSet<Name> = overrides.keys().cloned().collect();
        let ancestors = self.ancestor_set(&cell, &overridden);
        if let Some(ancestor) = ancestors
            .iter()
            .find(|cid| self.graph.cell(cid).is_some_and(|c| c.is_async()))
        {
            return Err(ComputeError::SuspendingAncestor {
                cell: id.clone(),
                ancestor: ancestor.clone(),
            });
        }

        let mut namespace = Namespace::new();
        for cid in self.graph.topological_sort(&ancestors) {
            let Some(ancestor) = self.graph.cell(&cid) else {
                continue;
            };
            debug!(cell = %cid, target = %id, "executing ancestor");
            self.executor.execute(&ancestor, &mut namespace, self.graph)?;
        }

        namespace.extend(overrides);
        debug!(cell = %id, "executing target");
        let output = self.executor.execute(&cell, &mut namespace, self.graph)?;
        let defs = Self::collect_defs(&cell, namespace);
        Ok((output, defs))
    }

    /// Run a possibly suspending cell and its ancestors.
    ///
    /// Accepts any lineage; suspension happens only inside the executor's
    /// invocation, never in the runner's own logic.
    pub async fn run_async(
        &mut self,
        id: &CellId,
        overrides: Namespace<E::Value>,
    ) -> Result<(E::Value, Namespace<E::Value>), ComputeError<E::Error>> {
        let cell = self.target(id)?;
        Self::validate_overrides(&cell, &overrides)?;

        let overridden: HashSet<Name> = overrides.keys().cloned().collect();
        let ancestors = self.ancestor_set(&cell, &overridden);

        let mut namespace = Namespace::new();
        for cid in self.graph.topological_sort(&ancestors) {
            let Some(ancestor) = self.graph.cell(&cid) else {
                continue;
            };
            debug!(cell = %cid, target = %id, "executing ancestor");
            self.executor
                .execute_async(&ancestor, &mut namespace, self.graph)
                .await?;
        }

        namespace.extend(overrides);
        debug!(cell = %id, "executing target");
        let output = self
            .executor
            .execute_async(&cell, &mut namespace, self.graph)
            .await?;
        let defs = Self::collect_defs(&cell, namespace);
        Ok((output, defs))
    }

    /// Whether running `id` requires the suspending entry point: the cell
    /// itself, or any of its ancestors, is suspending.
    pub fn requires_suspension(&self, id: &CellId) -> Result<bool, ComputeError<E::Error>> {
        let cell = self.target(id)?;
        if cell.is_async() {
            return Ok(true);
        }
        Ok(self
            .ancestor_set(&cell, &HashSet::new())
            .iter()
            .any(|cid| self.graph.cell(cid).is_some_and(|c| c.is_async())))
    }

    fn target(&self, id: &CellId) -> Result<Arc<Cell>, ComputeError<E::Error>> {
        self.graph
            .cell(id)
            .ok_or_else(|| ComputeError::CellNotFound(id.clone()))
    }

    fn validate_overrides(
        cell: &Cell,
        overrides: &Namespace<E::Value>,
    ) -> Result<(), ComputeError<E::Error>> {
        for name in overrides.keys() {
            if !cell.refs().contains(name) {
                return Err(ComputeError::UnexpectedOverride {
                    cell: cell.id().clone(),
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }

    /// The parent closure over refs the caller did not substitute.
    ///
    /// Direct parents whose defs intersect the unsubstituted refs seed the
    /// walk; the closure is inclusive of the seed.
    fn ancestor_set(&self, cell: &Cell, overridden: &HashSet<Name>) -> HashSet<CellId> {
        let unsubstituted: HashSet<Name> =
            cell.refs().difference(overridden).cloned().collect();
        let seed: HashSet<CellId> = self
            .graph
            .parents_of(cell.id())
            .into_iter()
            .filter(|parent_id| {
                self.graph.cell(parent_id).is_some_and(|parent| {
                    parent.defs().intersection(&unsubstituted).next().is_some()
                })
            })
            .collect();
        self.graph
            .transitive_closure(&seed, Direction::Parents, true)
    }

    fn collect_defs(cell: &Cell, namespace: Namespace<E::Value>) -> Namespace<E::Value> {
        namespace
            .into_iter()
            .filter(|(name, _)| cell.defs().contains(name))
            .collect()
    }
}
