//! Graph Traversal
//!
//! Breadth-first machinery shared by every structural query: transitive
//! closure, shortest-path search, induced subgraphs, cycle filtering, and
//! deterministic topological sorting.
//!
//! # Design
//!
//! All traversals run over a borrowed [`GraphState`], so the caller decides
//! how long the read guard lives. The closure walk is one generic BFS
//! parameterized by direction, seed inclusion, an edge-relation override
//! (the import-aware variant), and an inclusion predicate; cycle detection
//! and ancestor/descendant queries are thin instantiations of it.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use super::cell::{Cell, CellId, Language};
use super::edge::Edge;
use super::GraphState;

/// Which adjacency map a traversal follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow `children`: walk toward dependents (descendants).
    Children,
    /// Follow `parents`: walk toward dependencies (ancestors).
    Parents,
}

/// Which edge relation a closure walk consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeRelation {
    /// The graph's recorded adjacency, as-is.
    Structural,
    /// Adjacency with import-block children pruned to not-yet-bound defs,
    /// plus referrers left in a recovery state. Used by staleness
    /// propagation.
    ImportAware,
}

/// Return the seed cells' descendants or ancestors.
///
/// If `inclusive`, the seed cells themselves are part of the result. Cells
/// rejected by `predicate` are excluded from the result but still traversed
/// through, so a rejected cell does not cut off the walk behind it.
pub(crate) fn transitive_closure(
    state: &GraphState,
    seed: &HashSet<CellId>,
    direction: Direction,
    inclusive: bool,
    relation: EdgeRelation,
    predicate: Option<&dyn Fn(&Cell) -> bool>,
) -> HashSet<CellId> {
    let mut result: HashSet<CellId> = if inclusive { seed.clone() } else { HashSet::new() };
    let mut seen: HashSet<CellId> = seed.clone();
    let mut queue: VecDeque<CellId> = seed.iter().cloned().collect();

    while let Some(cid) = queue.pop_front() {
        let relatives = match relation {
            EdgeRelation::Structural => match direction {
                Direction::Children => state.children.get(&cid).cloned().unwrap_or_default(),
                Direction::Parents => state.parents.get(&cid).cloned().unwrap_or_default(),
            },
            EdgeRelation::ImportAware => import_block_relatives(state, &cid, direction),
        };

        for relative in relatives {
            if seen.contains(&relative) {
                continue;
            }
            let include = predicate.map_or(true, |accept| {
                state.cells.get(&relative).is_some_and(|cell| accept(cell))
            });
            if include {
                result.insert(relative.clone());
            }
            seen.insert(relative.clone());
            queue.push_back(relative);
        }
    }

    result
}

/// Shortest edge path from `source` to `dst` over `children`.
///
/// Empty when `source == dst` or when `dst` is unreachable.
pub(crate) fn path(state: &GraphState, source: &CellId, dst: &CellId) -> Vec<Edge> {
    if source == dst {
        return Vec::new();
    }

    let mut queue: VecDeque<(CellId, Vec<Edge>)> =
        VecDeque::from([(source.clone(), Vec::new())]);
    let mut found: HashSet<CellId> = HashSet::from([source.clone()]);

    while let Some((node, walked)) = queue.pop_front() {
        for cid in state.children.get(&node).into_iter().flatten() {
            if found.contains(cid) {
                continue;
            }
            let mut next = walked.clone();
            next.push(Edge {
                source: node.clone(),
                target: cid.clone(),
            });
            if cid == dst {
                return next;
            }
            found.insert(cid.clone());
            queue.push_back((cid.clone(), next));
        }
    }

    Vec::new()
}

/// In-subset parents and children for each cell in `ids`: the subgraph
/// induced by `ids`.
pub(crate) fn induced_subgraph(
    state: &GraphState,
    ids: &HashSet<CellId>,
) -> (
    HashMap<CellId, HashSet<CellId>>,
    HashMap<CellId, HashSet<CellId>>,
) {
    let mut parents = HashMap::with_capacity(ids.len());
    let mut children = HashMap::with_capacity(ids.len());
    for cid in ids {
        let in_subset = |relatives: Option<&HashSet<CellId>>| -> HashSet<CellId> {
            relatives
                .into_iter()
                .flatten()
                .filter(|relative| ids.contains(*relative))
                .cloned()
                .collect()
        };
        parents.insert(cid.clone(), in_subset(state.parents.get(cid)));
        children.insert(cid.clone(), in_subset(state.children.get(cid)));
    }
    (parents, children)
}

/// The recorded cycles lying entirely within the subgraph induced by `ids`,
/// sorted for stable output.
pub(crate) fn cycles_within(state: &GraphState, ids: &HashSet<CellId>) -> Vec<Vec<Edge>> {
    let (_, induced_children) = induced_subgraph(state, ids);
    let induced_edges: HashSet<Edge> = induced_children
        .iter()
        .flat_map(|(source, targets)| {
            targets.iter().map(|target| Edge {
                source: source.clone(),
                target: target.clone(),
            })
        })
        .collect();

    let mut cycles: Vec<Vec<Edge>> = state
        .cycles
        .iter()
        .filter(|cycle| cycle.iter().all(|edge| induced_edges.contains(edge)))
        .cloned()
        .collect();
    cycles.sort();
    cycles
}

/// Topologically sort `ids` over their induced subgraph.
///
/// # Algorithm
///
/// Kahn's algorithm with a min-heap keyed by registration order: compute
/// in-subset in-degrees, seed the heap with the zero-in-degree cells, and
/// repeatedly extract the earliest-registered cell, decrementing its
/// in-subset children. Ties between structurally identical cells always
/// break toward the cell registered first, so re-running the sort without
/// structural changes yields the same sequence.
pub(crate) fn topological_sort(state: &GraphState, ids: &HashSet<CellId>) -> Vec<CellId> {
    let (parents, children) = induced_subgraph(state, ids);
    let order_key =
        |cid: &CellId| state.cells.get_index_of(cid).unwrap_or(usize::MAX);

    let mut in_degree: HashMap<CellId, usize> = ids
        .iter()
        .map(|cid| (cid.clone(), parents.get(cid).map_or(0, HashSet::len)))
        .collect();

    let mut heap: BinaryHeap<Reverse<(usize, CellId)>> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(cid, _)| Reverse((order_key(cid), cid.clone())))
        .collect();

    let mut sorted = Vec::with_capacity(ids.len());
    while let Some(Reverse((_, cid))) = heap.pop() {
        for child in children.get(&cid).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(child) {
                *degree -= 1;
                if *degree == 0 {
                    heap.push(Reverse((order_key(child), child.clone())));
                }
            }
        }
        sorted.push(cid);
    }

    sorted
}

/// The import-aware edge relation.
///
/// Parents are untouched. For children of an import block, only defs the
/// import mechanism has not yet bound find referrers; already-bound names
/// should not force a re-run of dependents. If bound defs exist, referrers
/// stuck in a recovery state (interrupted, cancelled, errored, or never
/// ran) are pulled back in, so a partially-executed import lineage heals on
/// the next propagation.
pub(crate) fn import_block_relatives(
    state: &GraphState,
    cid: &CellId,
    direction: Direction,
) -> HashSet<CellId> {
    if direction == Direction::Parents {
        return state.parents.get(cid).cloned().unwrap_or_default();
    }

    let Some(cell) = state.cells.get(cid) else {
        return HashSet::new();
    };
    let workspace = cell.import_workspace();
    if !workspace.is_import_block {
        return state.children.get(cid).cloned().unwrap_or_default();
    }

    let mut children: HashSet<CellId> = cell
        .defs()
        .iter()
        .filter(|def| !workspace.imported_defs.contains(*def))
        .flat_map(|def| state.referring_cells(def, Language::Python))
        .collect();

    if !workspace.imported_defs.is_empty() {
        for name in &workspace.imported_defs {
            for child_id in state.referring_cells(name, Language::Python) {
                let needs_recovery = state
                    .cells
                    .get(&child_id)
                    .is_some_and(|child| match child.run_state() {
                        None => true,
                        Some(run_state) => run_state.needs_recovery(),
                    });
                if needs_recovery {
                    children.insert(child_id);
                }
            }
        }
    }

    children
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::graph::{Cell, CellId, DirectedGraph, Direction, Edge, RunState};

    fn ids(raw: &[&str]) -> HashSet<CellId> {
        raw.iter().map(|id| CellId::new(*id)).collect()
    }

    /// Build a diamond: a -> b, a -> c, b -> d, c -> d.
    fn diamond() -> DirectedGraph {
        let graph = DirectedGraph::new();
        graph
            .register(Cell::new("a", "x = 1").with_defs(["x"]))
            .unwrap();
        graph
            .register(
                Cell::new("b", "y = x + 1")
                    .with_defs(["y"])
                    .with_refs(["x"]),
            )
            .unwrap();
        graph
            .register(
                Cell::new("c", "z = x * 2")
                    .with_defs(["z"])
                    .with_refs(["x"]),
            )
            .unwrap();
        graph
            .register(
                Cell::new("d", "w = y + z")
                    .with_defs(["w"])
                    .with_refs(["y", "z"]),
            )
            .unwrap();
        graph
    }

    #[test]
    fn closures_exclude_the_seed() {
        let graph = diamond();
        let a = CellId::new("a");
        let d = CellId::new("d");

        assert_eq!(graph.descendants(&a), ids(&["b", "c", "d"]));
        assert_eq!(graph.ancestors(&d), ids(&["a", "b", "c"]));
        assert!(!graph.descendants(&a).contains(&a));
        assert!(!graph.ancestors(&d).contains(&d));
    }

    #[test]
    fn closures_are_empty_for_isolated_cells() {
        let graph = DirectedGraph::new();
        graph.register(Cell::new("lone", "1 + 1")).unwrap();
        let lone = CellId::new("lone");

        assert!(graph.descendants(&lone).is_empty());
        assert!(graph.ancestors(&lone).is_empty());
    }

    #[test]
    fn inclusive_closure_contains_the_seed() {
        let graph = diamond();
        let seed = ids(&["a"]);
        let closure = graph.transitive_closure(&seed, Direction::Children, true);
        assert_eq!(closure, ids(&["a", "b", "c", "d"]));
    }

    #[test]
    fn predicate_excludes_but_does_not_cut_off() {
        let graph = diamond();
        let seed = ids(&["a"]);
        // Reject the middle cells; "d" must still be reached through them.
        let closure = graph.transitive_closure_with(
            &seed,
            Direction::Children,
            false,
            crate::graph::EdgeRelation::Structural,
            Some(&|cell: &Cell| cell.id().as_str() != "b" && cell.id().as_str() != "c"),
        );
        assert_eq!(closure, ids(&["d"]));
    }

    #[test]
    fn shortest_path_over_children() {
        let graph = diamond();
        let a = CellId::new("a");
        let d = CellId::new("d");

        let found = graph.path(&a, &d);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].source, a);
        assert_eq!(found[1].target, d);

        // Self and unreachable paths are empty.
        assert!(graph.path(&a, &a).is_empty());
        assert!(graph.path(&d, &a).is_empty());
    }

    #[test]
    fn topological_sort_respects_edges_and_registration_order() {
        let graph = diamond();
        let all = ids(&["a", "b", "c", "d"]);

        let sorted = graph.topological_sort(&all);
        assert_eq!(
            sorted,
            vec![
                CellId::new("a"),
                CellId::new("b"),
                CellId::new("c"),
                CellId::new("d"),
            ]
        );

        // Deterministic across repeated runs.
        assert_eq!(graph.topological_sort(&all), sorted);
    }

    #[test]
    fn topological_sort_breaks_ties_by_registration() {
        let graph = DirectedGraph::new();
        // Three independent cells, registered out of alphabetical order.
        graph.register(Cell::new("late", "3")).unwrap();
        graph.register(Cell::new("early", "1")).unwrap();
        graph.register(Cell::new("middle", "2")).unwrap();

        let sorted = graph.topological_sort(&ids(&["early", "middle", "late"]));
        assert_eq!(
            sorted,
            vec![
                CellId::new("late"),
                CellId::new("early"),
                CellId::new("middle"),
            ]
        );
    }

    #[test]
    fn topological_sort_over_subset_only() {
        let graph = diamond();
        let subset = ids(&["b", "d"]);
        let sorted = graph.topological_sort(&subset);
        assert_eq!(sorted, vec![CellId::new("b"), CellId::new("d")]);
    }

    #[test]
    fn cycles_within_filters_to_induced_subgraph() {
        let graph = DirectedGraph::new();
        graph
            .register(
                Cell::new("a", "x = y").with_defs(["x"]).with_refs(["y"]),
            )
            .unwrap();
        graph
            .register(
                Cell::new("b", "y = x").with_defs(["y"]).with_refs(["x"]),
            )
            .unwrap();

        let both = ids(&["a", "b"]);
        let cycles = graph.cycles_within(&both);
        assert_eq!(cycles.len(), 1);

        // Restricting to one endpoint drops the cycle.
        assert!(graph.cycles_within(&ids(&["a"])).is_empty());
    }

    #[test]
    fn import_aware_children_skip_bound_defs() {
        let graph = DirectedGraph::new();
        graph
            .register(
                Cell::new("imports", "import numpy as np; import sys")
                    .with_defs(["np", "sys"])
                    .as_import_block(["np"]),
            )
            .unwrap();
        graph
            .register(
                Cell::new("uses_np", "np.zeros(3)").with_refs(["np"]),
            )
            .unwrap();
        graph
            .register(
                Cell::new("uses_sys", "sys.path").with_refs(["sys"]),
            )
            .unwrap();

        // Mark the children as having completed a run.
        graph
            .cell(&CellId::new("uses_np"))
            .unwrap()
            .set_run_state(RunState::Idle);
        graph
            .cell(&CellId::new("uses_sys"))
            .unwrap()
            .set_run_state(RunState::Idle);

        graph.set_stale(&ids(&["imports"]), true);

        // "np" is already bound, so its referrer is not re-marked; "sys" is
        // not bound yet, so its referrer is.
        assert!(!graph.cell(&CellId::new("uses_np")).unwrap().is_stale());
        assert!(graph.cell(&CellId::new("uses_sys")).unwrap().is_stale());
    }

    #[test]
    fn import_aware_children_recover_interrupted_referrers() {
        let graph = DirectedGraph::new();
        graph
            .register(
                Cell::new("imports", "import numpy as np")
                    .with_defs(["np"])
                    .as_import_block(["np"]),
            )
            .unwrap();
        graph
            .register(
                Cell::new("crashed", "np.zeros(3)").with_refs(["np"]),
            )
            .unwrap();
        graph
            .register(
                Cell::new("never_ran", "np.ones(3)").with_refs(["np"]),
            )
            .unwrap();

        graph
            .cell(&CellId::new("crashed"))
            .unwrap()
            .set_run_state(RunState::Interrupted);
        // "never_ran" keeps its unset state.

        graph.set_stale(&ids(&["imports"]), true);

        assert!(graph.cell(&CellId::new("crashed")).unwrap().is_stale());
        assert!(graph.cell(&CellId::new("never_ran")).unwrap().is_stale());
    }

    #[test]
    fn recorded_cycles_expose_their_edges() {
        let graph = DirectedGraph::new();
        graph
            .register(Cell::new("a", "x = y").with_defs(["x"]).with_refs(["y"]))
            .unwrap();
        graph
            .register(Cell::new("b", "y = x").with_defs(["y"]).with_refs(["x"]))
            .unwrap();

        let cycles = graph.cycles_within(&ids(&["a", "b"]));
        let edges: HashSet<Edge> = cycles[0].iter().cloned().collect();
        assert_eq!(
            edges,
            HashSet::from([Edge::new("a", "b"), Edge::new("b", "a")])
        );
    }
}
