//! Directed Dependency Graph
//!
//! The central aggregate owning every registered cell and the relations
//! derived from their defs and refs: dataflow edges (children/parents),
//! name collisions (siblings), the definition index, and the recorded
//! cycles.
//!
//! # Locking
//!
//! All structural maps live in one [`GraphState`] behind a single
//! `parking_lot::RwLock`. Multi-step mutations (`register`, `delete`) hold
//! the write guard for the whole update, so the adjacency, sibling,
//! definition, and cycle structures are never observed partially updated.
//! Queries take brief read guards. Status-only operations (stale, disabled,
//! run state) go through per-cell atomics and never hold the write guard.
//! The lock is shared between the execution loop and interactive services
//! such as code completion, and is almost always uncontended.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;

use super::cell::{code_key, Cell, CellId, ImportData, Language, Name, RunState, VariableData};
use super::edge::{Edge, EdgeWithVars};
use super::traverse::{self, Direction, EdgeRelation};
use crate::error::GraphError;

/// The structural maps, kept consistent as one unit under the lock.
#[derive(Debug, Default)]
pub(crate) struct GraphState {
    /// Registered cells in registration order. The order is the
    /// tie-break key for topological sorting.
    pub(crate) cells: IndexMap<CellId, Arc<Cell>>,

    /// Edge (u, v) means v is a child of u: v references a name defined
    /// in u.
    pub(crate) children: HashMap<CellId, HashSet<CellId>>,

    /// Reversed edges (parent pointers); the exact transpose of `children`.
    pub(crate) parents: HashMap<CellId, HashSet<CellId>>,

    /// Cells sharing at least one defined name. Non-empty sets mean the
    /// program multiply defines names and is in an error state.
    pub(crate) siblings: HashMap<CellId, HashSet<CellId>>,

    /// Defined name -> cells defining it. More than one definer signals a
    /// collision.
    pub(crate) definitions: HashMap<Name, HashSet<CellId>>,

    /// Recorded cycles, each an ordered closed walk of edges currently
    /// present in `children`.
    pub(crate) cycles: HashSet<Vec<Edge>>,
}

impl GraphState {
    /// Cells defining `name`. A singleton for well-formed graphs.
    pub(crate) fn defining_cells(&self, name: &str) -> HashSet<CellId> {
        self.definitions.get(name).cloned().unwrap_or_default()
    }

    /// Cells holding a ref to `name`, by local analysis only.
    ///
    /// When the definition language is SQL, only SQL cells count: SQL
    /// names do not leak to Python. Python definitions leak everywhere,
    /// so no filter applies.
    pub(crate) fn referring_cells(&self, name: &str, language: Language) -> HashSet<CellId> {
        self.cells
            .iter()
            .filter(|(_, cell)| cell.refs().contains(name))
            .filter(|(_, cell)| language != Language::Sql || cell.language() == Language::Sql)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether `id` is disabled directly or through any ancestor.
    fn is_disabled(&self, id: &CellId) -> bool {
        let Some(cell) = self.cells.get(id) else {
            return false;
        };
        if cell.is_disabled() {
            return true;
        }
        let mut seen: HashSet<CellId> = HashSet::new();
        let mut queue = vec![id.clone()];
        while let Some(cid) = queue.pop() {
            seen.insert(cid.clone());
            for parent in self.parents.get(&cid).into_iter().flatten() {
                if seen.contains(parent) {
                    continue;
                }
                if self.cells.get(parent).is_some_and(|p| p.is_disabled()) {
                    return true;
                }
                queue.push(parent.clone());
            }
        }
        false
    }
}

/// The dependency graph shared between the kernel loop and interactive
/// services.
#[derive(Debug, Default)]
pub struct DirectedGraph {
    state: RwLock<GraphState>,
}

impl DirectedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Add a cell to the graph.
    ///
    /// Holds the write guard for the whole structural update. Fails before
    /// any mutation if the id is already registered.
    ///
    /// Newly closed cycles are recorded as they are discovered: adding an
    /// edge (a, b) while a path b -> a already exists closes a cycle, which
    /// is stored as the new edge followed by that path. After the guard is
    /// released, the cell inherits staleness and transitive disablement
    /// from its ancestors.
    pub fn register(&self, cell: Cell) -> Result<(), GraphError> {
        let cell_id = cell.id().clone();
        debug!(cell = %cell_id, "acquiring graph lock to register cell");
        {
            let mut guard = self.state.write();
            let state = &mut *guard;
            if state.cells.contains_key(&cell_id) {
                return Err(GraphError::AlreadyRegistered(cell_id));
            }

            let cell = Arc::new(cell);
            state.cells.insert(cell_id.clone(), Arc::clone(&cell));
            state.children.insert(cell_id.clone(), HashSet::new());
            state.parents.insert(cell_id.clone(), HashSet::new());
            state.siblings.insert(cell_id.clone(), HashSet::new());

            for name in cell.defs() {
                state
                    .definitions
                    .entry(name.clone())
                    .or_default()
                    .insert(cell_id.clone());

                let definers: Vec<CellId> =
                    state.definitions[name].iter().cloned().collect();
                for sibling in definers {
                    if sibling == cell_id {
                        continue;
                    }
                    state
                        .siblings
                        .entry(cell_id.clone())
                        .or_default()
                        .insert(sibling.clone());
                    state
                        .siblings
                        .entry(sibling)
                        .or_default()
                        .insert(cell_id.clone());
                }

                // A cell can refer to its own defs, but that does not add
                // an edge to the graph.
                let mut referring =
                    state.referring_cells(name, cell.definition_language(name));
                referring.remove(&cell_id);

                for child in &referring {
                    // The new edge is (cell_id, child); an existing path
                    // from the child back to this cell closes a cycle.
                    let walked = traverse::path(state, child, &cell_id);
                    if !walked.is_empty() {
                        let mut cycle = Vec::with_capacity(walked.len() + 1);
                        cycle.push(Edge {
                            source: cell_id.clone(),
                            target: child.clone(),
                        });
                        cycle.extend(walked);
                        state.cycles.insert(cycle);
                    }
                }

                state
                    .children
                    .entry(cell_id.clone())
                    .or_default()
                    .extend(referring.iter().cloned());
                for child in &referring {
                    state
                        .parents
                        .entry(child.clone())
                        .or_default()
                        .insert(cell_id.clone());
                }
            }

            for name in cell.refs() {
                // An empty definer set here means the name must resolve to
                // a builtin, or the cell will fail at run time.
                let mut others = state.defining_cells(name);
                others.remove(&cell_id);

                for other in others {
                    let definer_language = state
                        .cells
                        .get(&other)
                        .map_or(cell.language(), |definer| {
                            definer.definition_language(name)
                        });
                    if !definer_language.visible_to(cell.language()) {
                        continue;
                    }

                    state
                        .parents
                        .entry(cell_id.clone())
                        .or_default()
                        .insert(other.clone());
                    // The new edge is (other, cell_id); an existing path
                    // from this cell back to the definer closes a cycle.
                    let walked = traverse::path(state, &cell_id, &other);
                    if !walked.is_empty() {
                        let mut cycle = Vec::with_capacity(walked.len() + 1);
                        cycle.push(Edge {
                            source: other.clone(),
                            target: cell_id.clone(),
                        });
                        cycle.extend(walked);
                        state.cycles.insert(cycle);
                    }
                    state
                        .children
                        .entry(other)
                        .or_default()
                        .insert(cell_id.clone());
                }
            }
        }
        debug!(cell = %cell_id, "registered cell and released graph lock");

        let seed = HashSet::from([cell_id.clone()]);
        if self.is_any_ancestor_stale(&cell_id) {
            self.set_stale(&seed, false);
        }
        if self.is_any_ancestor_disabled(&cell_id) {
            if let Some(cell) = self.cell(&cell_id) {
                cell.set_run_state(RunState::DisabledTransitively);
            }
        }
        Ok(())
    }

    /// Remove a cell from the graph.
    ///
    /// Holds the write guard for the whole repair: unindexes the cell's
    /// defs, purges cycles using any edge touching the cell, and detaches
    /// the cell from every adjacency and sibling set. Returns the children
    /// the removed cell had, so the caller can decide what to re-evaluate.
    pub fn delete(&self, id: &CellId) -> Result<HashSet<CellId>, GraphError> {
        debug!(cell = %id, "acquiring graph lock to delete cell");
        let children = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let Some(cell) = state.cells.get(id).cloned() else {
                return Err(GraphError::CellNotFound(id.clone()));
            };

            for name in cell.defs() {
                let mut emptied = false;
                if let Some(definers) = state.definitions.get_mut(name) {
                    definers.remove(id);
                    emptied = definers.is_empty();
                }
                if emptied {
                    // No cell defines this name anymore.
                    state.definitions.remove(name);
                }
            }

            let mut touching: Vec<Edge> = state
                .children
                .get(id)
                .into_iter()
                .flatten()
                .map(|child| Edge {
                    source: id.clone(),
                    target: child.clone(),
                })
                .collect();
            touching.extend(state.parents.get(id).into_iter().flatten().map(|parent| {
                Edge {
                    source: parent.clone(),
                    target: id.clone(),
                }
            }));
            for edge in &touching {
                let broken: Vec<Vec<Edge>> = state
                    .cycles
                    .iter()
                    .filter(|cycle| cycle.contains(edge))
                    .cloned()
                    .collect();
                for cycle in broken {
                    state.cycles.remove(&cycle);
                }
            }

            let children = state.children.remove(id).unwrap_or_default();
            state.cells.shift_remove(id);
            state.parents.remove(id);
            state.siblings.remove(id);

            for relatives in state.parents.values_mut() {
                relatives.remove(id);
            }
            for relatives in state.children.values_mut() {
                relatives.remove(id);
            }
            for relatives in state.siblings.values_mut() {
                relatives.remove(id);
            }
            children
        };
        debug!(cell = %id, "deleted cell and released graph lock");
        Ok(children)
    }

    // ------------------------------------------------------------------
    // Status propagation
    // ------------------------------------------------------------------

    /// Disable a cell.
    ///
    /// Does not mutate the graph structure, only statuses: sets the cell's
    /// own disabled flag and marks every strict descendant as disabled
    /// transitively.
    pub fn disable(&self, id: &CellId) -> Result<(), GraphError> {
        let state = self.state.read();
        let cell = state
            .cells
            .get(id)
            .ok_or_else(|| GraphError::CellNotFound(id.clone()))?;
        cell.set_disabled(true);

        let seed = HashSet::from([id.clone()]);
        for cid in traverse::transitive_closure(
            &state,
            &seed,
            Direction::Children,
            false,
            EdgeRelation::Structural,
            None,
        ) {
            if let Some(descendant) = state.cells.get(&cid) {
                descendant.set_run_state(RunState::DisabledTransitively);
            }
        }
        Ok(())
    }

    /// Enable a cell.
    ///
    /// Clears the cell's own disabled flag, then walks the descendant set
    /// (inclusive); every cell not otherwise disabled (directly or through
    /// a still-disabled ancestor) returns from disabled-transitively to
    /// idle. Returns the cells among them that are stale and should be
    /// re-run.
    pub fn enable(&self, id: &CellId) -> Result<HashSet<CellId>, GraphError> {
        let state = self.state.read();
        let cell = state
            .cells
            .get(id)
            .ok_or_else(|| GraphError::CellNotFound(id.clone()))?;
        cell.set_disabled(false);

        let mut cells_to_run: HashSet<CellId> = HashSet::new();
        let seed = HashSet::from([id.clone()]);
        for cid in traverse::transitive_closure(
            &state,
            &seed,
            Direction::Children,
            true,
            EdgeRelation::Structural,
            None,
        ) {
            if state.is_disabled(&cid) {
                continue;
            }
            let Some(descendant) = state.cells.get(&cid) else {
                continue;
            };
            if descendant.is_stale() {
                // Previously disabled, no longer disabled, and stale:
                // needs to run.
                cells_to_run.insert(cid.clone());
            }
            if descendant.disabled_transitively() {
                descendant.set_run_state(RunState::Idle);
            }
        }
        Ok(cells_to_run)
    }

    /// Whether `id` is disabled directly or through any ancestor.
    pub fn is_disabled(&self, id: &CellId) -> Result<bool, GraphError> {
        let state = self.state.read();
        if !state.cells.contains_key(id) {
            return Err(GraphError::CellNotFound(id.clone()));
        }
        Ok(state.is_disabled(id))
    }

    /// Mark `ids` and their descendant closure stale.
    ///
    /// With `prune_imports`, the walk uses the import-aware child relation:
    /// defs an import block has already bound do not re-mark their
    /// referrers unless those referrers are in a recovery state.
    pub fn set_stale(&self, ids: &HashSet<CellId>, prune_imports: bool) {
        let state = self.state.read();
        let relation = if prune_imports {
            EdgeRelation::ImportAware
        } else {
            EdgeRelation::Structural
        };
        for cid in traverse::transitive_closure(
            &state,
            ids,
            Direction::Children,
            true,
            relation,
            None,
        ) {
            if let Some(cell) = state.cells.get(&cid) {
                cell.set_stale(true);
            }
        }
    }

    /// Ids of all currently stale cells.
    pub fn stale_cells(&self) -> HashSet<CellId> {
        let state = self.state.read();
        state
            .cells
            .iter()
            .filter(|(_, cell)| cell.is_stale())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn is_any_ancestor_stale(&self, id: &CellId) -> bool {
        let state = self.state.read();
        let seed = HashSet::from([id.clone()]);
        traverse::transitive_closure(
            &state,
            &seed,
            Direction::Parents,
            false,
            EdgeRelation::Structural,
            None,
        )
        .iter()
        .any(|cid| state.cells.get(cid).is_some_and(|cell| cell.is_stale()))
    }

    pub fn is_any_ancestor_disabled(&self, id: &CellId) -> bool {
        let state = self.state.read();
        let seed = HashSet::from([id.clone()]);
        traverse::transitive_closure(
            &state,
            &seed,
            Direction::Parents,
            false,
            EdgeRelation::Structural,
            None,
        )
        .iter()
        .any(|cid| state.cells.get(cid).is_some_and(|cell| cell.is_disabled()))
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// The cell registered under `id`, if any.
    pub fn cell(&self, id: &CellId) -> Option<Arc<Cell>> {
        self.state.read().cells.get(id).cloned()
    }

    pub fn contains(&self, id: &CellId) -> bool {
        self.state.read().cells.contains_key(id)
    }

    /// Registered cell ids, in registration order.
    pub fn cell_ids(&self) -> Vec<CellId> {
        self.state.read().cells.keys().cloned().collect()
    }

    pub fn cell_count(&self) -> usize {
        self.state.read().cells.len()
    }

    /// Whether a cell with this id and this exact code is already
    /// registered.
    pub fn is_cached(&self, id: &CellId, code: &str) -> bool {
        self.state
            .read()
            .cells
            .get(id)
            .is_some_and(|cell| cell.key() == code_key(code))
    }

    /// All cells that define `name`. A singleton for well-formed graphs.
    pub fn defining_cells(&self, name: &str) -> HashSet<CellId> {
        self.state.read().defining_cells(name)
    }

    /// All cells that have a ref to `name`, given the language the
    /// definition was made in.
    pub fn referring_cells(&self, name: &str, language: Language) -> HashSet<CellId> {
        self.state.read().referring_cells(name, language)
    }

    /// Direct children of `id` (empty if unknown).
    pub fn children_of(&self, id: &CellId) -> HashSet<CellId> {
        self.state
            .read()
            .children
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Direct parents of `id` (empty if unknown).
    pub fn parents_of(&self, id: &CellId) -> HashSet<CellId> {
        self.state
            .read()
            .parents
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Cells sharing a defined name with `id` (empty if unknown).
    pub fn siblings_of(&self, id: &CellId) -> HashSet<CellId> {
        self.state
            .read()
            .siblings
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Structural queries
    // ------------------------------------------------------------------

    /// Shortest edge path from `source` to `dst`, if any.
    pub fn path(&self, source: &CellId, dst: &CellId) -> Vec<Edge> {
        traverse::path(&self.state.read(), source, dst)
    }

    /// Strict descendants of `id`.
    pub fn descendants(&self, id: &CellId) -> HashSet<CellId> {
        let seed = HashSet::from([id.clone()]);
        self.transitive_closure(&seed, Direction::Children, false)
    }

    /// Strict ancestors of `id`.
    pub fn ancestors(&self, id: &CellId) -> HashSet<CellId> {
        let seed = HashSet::from([id.clone()]);
        self.transitive_closure(&seed, Direction::Parents, false)
    }

    /// Descendants or ancestors of the seed set over the structural edge
    /// relation.
    pub fn transitive_closure(
        &self,
        seed: &HashSet<CellId>,
        direction: Direction,
        inclusive: bool,
    ) -> HashSet<CellId> {
        self.transitive_closure_with(seed, direction, inclusive, EdgeRelation::Structural, None)
    }

    /// Fully parameterized closure walk: edge relation override and an
    /// inclusion predicate over each discovered cell. Rejected cells are
    /// excluded from the result but still traversed through.
    pub fn transitive_closure_with(
        &self,
        seed: &HashSet<CellId>,
        direction: Direction,
        inclusive: bool,
        relation: EdgeRelation,
        predicate: Option<&dyn Fn(&Cell) -> bool>,
    ) -> HashSet<CellId> {
        traverse::transitive_closure(
            &self.state.read(),
            seed,
            direction,
            inclusive,
            relation,
            predicate,
        )
    }

    /// In-subset parents and children for each cell in `ids`.
    pub fn induced_subgraph(
        &self,
        ids: &HashSet<CellId>,
    ) -> (
        HashMap<CellId, HashSet<CellId>>,
        HashMap<CellId, HashSet<CellId>>,
    ) {
        traverse::induced_subgraph(&self.state.read(), ids)
    }

    /// Recorded cycles lying entirely within the subgraph induced by `ids`.
    pub fn cycles_within(&self, ids: &HashSet<CellId>) -> Vec<Vec<Edge>> {
        traverse::cycles_within(&self.state.read(), ids)
    }

    /// All recorded cycles, sorted for stable output.
    pub fn cycles(&self) -> Vec<Vec<Edge>> {
        let state = self.state.read();
        let mut cycles: Vec<Vec<Edge>> = state.cycles.iter().cloned().collect();
        cycles.sort();
        cycles
    }

    /// Topological order over the subgraph induced by `ids`, ties broken
    /// by registration order.
    pub fn topological_sort(&self, ids: &HashSet<CellId>) -> Vec<CellId> {
        traverse::topological_sort(&self.state.read(), ids)
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Names with more than one definer, sorted.
    pub fn multiply_defined(&self) -> Vec<Name> {
        let state = self.state.read();
        let mut names: Vec<Name> = state
            .definitions
            .iter()
            .filter(|(_, definers)| definers.len() > 1)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Names some cell explicitly deleted from its own scope that are
    /// still defined elsewhere in the graph: dangling external bindings.
    /// Cells are visited in registration order; each cell's names are
    /// sorted.
    pub fn deleted_nonlocal_refs(&self) -> Vec<Name> {
        let state = self.state.read();
        let mut names: Vec<Name> = Vec::new();
        for cell in state.cells.values() {
            let mut dangling: Vec<Name> = cell
                .deleted_refs()
                .iter()
                .filter(|name| state.definitions.contains_key(*name))
                .cloned()
                .collect();
            dangling.sort();
            names.extend(dangling);
        }
        names
    }

    /// Import records, keyed by the name each import binds. With a cell
    /// id, only that cell's imports; otherwise all cells'.
    pub fn imports(&self, cell_id: Option<&CellId>) -> HashMap<Name, ImportData> {
        let state = self.state.read();
        let mut imports = HashMap::new();
        let cells: Vec<Arc<Cell>> = match cell_id {
            None => state.cells.values().cloned().collect(),
            Some(id) => state.cells.get(id).cloned().into_iter().collect(),
        };
        for cell in cells {
            for imported in cell.imports() {
                imports.insert(imported.definition.clone(), imported.clone());
            }
        }
        imports
    }

    /// Every dataflow edge annotated with the sorted list of names
    /// justifying it, for diagnostic and visualization consumers.
    pub fn edges_with_vars(&self) -> Vec<EdgeWithVars> {
        let state = self.state.read();
        let mut edges: Vec<EdgeWithVars> = Vec::new();
        for (source, targets) in &state.children {
            let Some(source_cell) = state.cells.get(source) else {
                continue;
            };
            for target in targets {
                let Some(target_cell) = state.cells.get(target) else {
                    continue;
                };
                let mut vars: Vec<Name> = source_cell
                    .defs()
                    .intersection(target_cell.refs())
                    .cloned()
                    .collect();
                vars.sort();
                edges.push(EdgeWithVars {
                    source: source.clone(),
                    vars,
                    target: target.clone(),
                });
            }
        }
        edges.sort();
        edges
    }

    /// Expand a seed set of refs through definition chains.
    ///
    /// Each queued name resolves to its defining cell(s); every matching
    /// definition record contributes its own required refs (subject to
    /// `predicate`). Required names that are not graph-level definitions
    /// but are private symbols of the resolving cell are absorbed as well,
    /// since they are invisible externally yet still required. Returns the
    /// accumulated set, unioned with the seed when `inclusive`, minus the
    /// seed otherwise.
    pub fn transitive_references(
        &self,
        refs: &HashSet<Name>,
        inclusive: bool,
        predicate: Option<&dyn Fn(&str, &VariableData) -> bool>,
    ) -> HashSet<Name> {
        let state = self.state.read();
        let mut processed: HashSet<Name> = HashSet::new();
        let mut queue: HashSet<Name> = refs
            .iter()
            .filter(|name| state.definitions.contains_key(*name))
            .cloned()
            .collect();

        while !queue.is_empty() {
            // Ideally one cell per ref, but stay agnostic to collisions
            // and cycles.
            let resolvers: HashSet<CellId> = queue
                .iter()
                .flat_map(|name| {
                    state.definitions.get(name).into_iter().flatten().cloned()
                })
                .collect();

            for cell_id in resolvers {
                let Some(cell) = state.cells.get(&cell_id) else {
                    continue;
                };
                let data = cell.variable_data();
                let newly_processed: Vec<Name> = data
                    .keys()
                    .filter(|name| queue.contains(*name))
                    .cloned()
                    .collect();
                for name in &newly_processed {
                    processed.insert(name.clone());
                    queue.remove(name);
                }
                for variable in &newly_processed {
                    // A name can be defined more than once in one cell.
                    for record in data.get(variable).into_iter().flatten() {
                        if !predicate.map_or(true, |accept| accept(variable, record)) {
                            continue;
                        }
                        let to_process: Vec<Name> = record
                            .required_refs
                            .difference(&processed)
                            .cloned()
                            .collect();
                        for required in to_process {
                            if state.definitions.contains_key(&required) {
                                queue.insert(required);
                            } else if cell.is_private_name(&required) {
                                // Private symbols referenced by public
                                // definitions still count as required.
                                processed.insert(required);
                            }
                        }
                    }
                }
            }
        }

        if inclusive {
            processed.union(refs).cloned().collect()
        } else {
            processed.difference(refs).cloned().collect()
        }
    }
}
