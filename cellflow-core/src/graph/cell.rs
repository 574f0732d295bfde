//! Cell Data Model
//!
//! This module defines the cells that live in the dependency graph, together
//! with the per-cell facts the external code analyzer produces (defined
//! names, referenced names, per-definition records) and the runtime status
//! machinery the graph and the runner mutate.
//!
//! # Status fields
//!
//! A cell's structural facts (defs, refs, language, ...) are immutable once
//! the cell is built. Its status fields (disabled flag, stale flag, run
//! state) are stored in atomics so they can be flipped through a shared
//! reference without touching the graph's structural lock. Transitions are
//! only triggered by the graph's disable/enable/stale APIs and by the
//! executor contract.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A variable name, as produced by the external code analyzer.
pub type Name = String;

/// Stable identifier for a cell, supplied by the caller at registration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CellId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for CellId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Content fingerprint over a cell's code.
///
/// Used to detect whether the exact same code is already registered under a
/// given id, without retaining or comparing the full source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeKey(u64);

/// Compute the content fingerprint for a piece of code.
pub fn code_key(code: &str) -> CodeKey {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    code.hash(&mut hasher);
    CodeKey(hasher.finish())
}

/// Source language of a cell or of a single definition record.
///
/// Python is the general-purpose language; SQL is restricted. SQL
/// definitions (tables, views) are visible to other SQL cells and leak into
/// nothing else, while Python definitions are visible everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Sql,
}

impl Language {
    /// Whether a definition made in `self` can satisfy a reference written
    /// in a cell of language `referrer`.
    ///
    /// The table is asymmetric: SQL defs do not leak to Python referrers,
    /// but Python defs do leak to SQL.
    pub fn visible_to(self, referrer: Language) -> bool {
        !matches!((self, referrer), (Language::Sql, Language::Python))
    }
}

/// One definition record for a name a cell defines.
///
/// A name can be defined more than once within a cell (e.g. reassignment),
/// so a cell carries one or more records per defined name. Each record knows
/// the language it was made in and the set of names its value transitively
/// requires at the block (function / class) level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableData {
    pub language: Language,
    pub required_refs: HashSet<Name>,
}

impl VariableData {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            required_refs: HashSet::new(),
        }
    }

    pub fn with_required_refs(
        mut self,
        refs: impl IntoIterator<Item = impl Into<Name>>,
    ) -> Self {
        self.required_refs = refs.into_iter().map(Into::into).collect();
        self
    }
}

/// One import statement's binding, as reported by the analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportData {
    /// The module being imported.
    pub module: String,
    /// The name the import binds in the cell's scope.
    pub definition: Name,
    /// The symbol imported from the module, if any (`from m import s`).
    pub imported_symbol: Option<Name>,
}

/// Import-machinery bookkeeping for a cell.
///
/// An import block is a cell whose defs are bound by the import mechanism
/// rather than ordinary assignment. `imported_defs` is the subset of the
/// cell's defs the mechanism has already bound; those names should not force
/// a re-run of dependents on staleness propagation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportWorkspace {
    pub is_import_block: bool,
    pub imported_defs: HashSet<Name>,
}

/// Runtime state of a cell.
///
/// The absent state ("never ran, nothing decided yet") is modeled as
/// `Option::None` wherever a state is read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum RunState {
    Idle = 1,
    Queued = 2,
    Running = 3,
    DisabledTransitively = 4,
    Interrupted = 5,
    Cancelled = 6,
    Errored = 7,
}

impl RunState {
    /// States after which a previous run is known not to have completed
    /// normally, so dependents may need to be pulled back in.
    pub fn needs_recovery(self) -> bool {
        matches!(
            self,
            RunState::Interrupted | RunState::Cancelled | RunState::Errored
        )
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RunState::Idle),
            2 => Some(RunState::Queued),
            3 => Some(RunState::Running),
            4 => Some(RunState::DisabledTransitively),
            5 => Some(RunState::Interrupted),
            6 => Some(RunState::Cancelled),
            7 => Some(RunState::Errored),
            _ => None,
        }
    }
}

/// Atomic storage for an optional [`RunState`]. Zero encodes "unset".
#[derive(Debug, Default)]
struct AtomicRunState(AtomicU8);

impl AtomicRunState {
    fn load(&self) -> Option<RunState> {
        RunState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn store(&self, state: Option<RunState>) {
        self.0.store(state.map_or(0, |s| s as u8), Ordering::SeqCst);
    }
}

/// One computation block in the dependency graph.
///
/// Constructed from the analyzer's per-cell fact sheet with the builder-style
/// `with_*` methods, then handed to [`DirectedGraph::register`].
///
/// [`DirectedGraph::register`]: crate::graph::DirectedGraph::register
#[derive(Debug)]
pub struct Cell {
    id: CellId,
    code: String,
    key: CodeKey,
    defs: HashSet<Name>,
    refs: HashSet<Name>,
    deleted_refs: HashSet<Name>,
    variable_data: HashMap<Name, SmallVec<[VariableData; 1]>>,
    imports: Vec<ImportData>,
    language: Language,
    import_workspace: ImportWorkspace,
    is_async: bool,
    disabled: AtomicBool,
    stale: AtomicBool,
    run_state: AtomicRunState,
}

impl Cell {
    /// Create a cell with the given id and code. The content fingerprint is
    /// computed here; all analysis facts default to empty and are filled in
    /// with the `with_*` builders.
    pub fn new(id: impl Into<CellId>, code: impl Into<String>) -> Self {
        let code = code.into();
        let key = code_key(&code);
        Self {
            id: id.into(),
            code,
            key,
            defs: HashSet::new(),
            refs: HashSet::new(),
            deleted_refs: HashSet::new(),
            variable_data: HashMap::new(),
            imports: Vec::new(),
            language: Language::Python,
            import_workspace: ImportWorkspace::default(),
            is_async: false,
            disabled: AtomicBool::new(false),
            stale: AtomicBool::new(false),
            run_state: AtomicRunState::default(),
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_defs(mut self, defs: impl IntoIterator<Item = impl Into<Name>>) -> Self {
        self.defs = defs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_refs(mut self, refs: impl IntoIterator<Item = impl Into<Name>>) -> Self {
        self.refs = refs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_deleted_refs(
        mut self,
        refs: impl IntoIterator<Item = impl Into<Name>>,
    ) -> Self {
        self.deleted_refs = refs.into_iter().map(Into::into).collect();
        self
    }

    /// Append definition records for one defined name.
    pub fn with_variable_data(
        mut self,
        name: impl Into<Name>,
        records: impl IntoIterator<Item = VariableData>,
    ) -> Self {
        self.variable_data
            .entry(name.into())
            .or_default()
            .extend(records);
        self
    }

    pub fn with_imports(mut self, imports: impl IntoIterator<Item = ImportData>) -> Self {
        self.imports = imports.into_iter().collect();
        self
    }

    /// Classify the cell as an import block with the given already-bound
    /// defs.
    pub fn as_import_block(
        mut self,
        imported_defs: impl IntoIterator<Item = impl Into<Name>>,
    ) -> Self {
        self.import_workspace = ImportWorkspace {
            is_import_block: true,
            imported_defs: imported_defs.into_iter().map(Into::into).collect(),
        };
        self
    }

    /// Mark the cell's body as requiring cooperative suspension.
    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> &CellId {
        &self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn key(&self) -> CodeKey {
        self.key
    }

    pub fn defs(&self) -> &HashSet<Name> {
        &self.defs
    }

    pub fn refs(&self) -> &HashSet<Name> {
        &self.refs
    }

    pub fn deleted_refs(&self) -> &HashSet<Name> {
        &self.deleted_refs
    }

    pub fn variable_data(&self) -> &HashMap<Name, SmallVec<[VariableData; 1]>> {
        &self.variable_data
    }

    pub fn imports(&self) -> &[ImportData] {
        &self.imports
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn import_workspace(&self) -> &ImportWorkspace {
        &self.import_workspace
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// The language of the last definition record for `name`, falling back
    /// to the cell's own language when the analyzer supplied no record.
    pub fn definition_language(&self, name: &str) -> Language {
        self.variable_data
            .get(name)
            .and_then(|records| records.last())
            .map_or(self.language, |record| record.language)
    }

    /// Whether `name` is lexically private to this cell.
    ///
    /// The analyzer mangles underscore-prefixed names to
    /// `_cell_<id><name>`; such names are invisible to other cells but still
    /// count as required when resolving transitive references.
    pub fn is_private_name(&self, name: &str) -> bool {
        name.strip_prefix("_cell_")
            .is_some_and(|rest| rest.starts_with(self.id.as_str()))
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// The cell's own disabled flag (local config, not inherited).
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    pub fn set_stale(&self, stale: bool) {
        self.stale.store(stale, Ordering::SeqCst);
    }

    pub fn run_state(&self) -> Option<RunState> {
        self.run_state.load()
    }

    pub fn set_run_state(&self, state: RunState) {
        self.run_state.store(Some(state));
    }

    /// Whether the cell is disabled because of an ancestor rather than its
    /// own flag.
    pub fn disabled_transitively(&self) -> bool {
        self.run_state() == Some(RunState::DisabledTransitively)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_key_is_stable_and_content_sensitive() {
        assert_eq!(code_key("x = 1"), code_key("x = 1"));
        assert_ne!(code_key("x = 1"), code_key("x = 2"));
    }

    #[test]
    fn language_visibility_table() {
        // Python defs leak everywhere.
        assert!(Language::Python.visible_to(Language::Python));
        assert!(Language::Python.visible_to(Language::Sql));
        // SQL defs stay within SQL.
        assert!(Language::Sql.visible_to(Language::Sql));
        assert!(!Language::Sql.visible_to(Language::Python));
    }

    #[test]
    fn run_state_starts_unset() {
        let cell = Cell::new("a", "x = 1");
        assert_eq!(cell.run_state(), None);

        cell.set_run_state(RunState::Running);
        assert_eq!(cell.run_state(), Some(RunState::Running));

        cell.set_run_state(RunState::Idle);
        assert_eq!(cell.run_state(), Some(RunState::Idle));
    }

    #[test]
    fn recovery_states() {
        assert!(RunState::Interrupted.needs_recovery());
        assert!(RunState::Cancelled.needs_recovery());
        assert!(RunState::Errored.needs_recovery());
        assert!(!RunState::Idle.needs_recovery());
        assert!(!RunState::Queued.needs_recovery());
        assert!(!RunState::Running.needs_recovery());
        assert!(!RunState::DisabledTransitively.needs_recovery());
    }

    #[test]
    fn status_flags_flip_through_shared_references() {
        let cell = Cell::new("a", "x = 1");
        let shared = &cell;

        assert!(!shared.is_disabled());
        shared.set_disabled(true);
        assert!(shared.is_disabled());

        assert!(!shared.is_stale());
        shared.set_stale(true);
        assert!(shared.is_stale());
        shared.set_stale(false);
        assert!(!shared.is_stale());
    }

    #[test]
    fn definition_language_falls_back_to_cell_language() {
        let cell = Cell::new("a", "CREATE TABLE t AS SELECT 1")
            .with_language(Language::Sql)
            .with_defs(["t", "u"])
            .with_variable_data("t", [VariableData::new(Language::Sql)]);

        assert_eq!(cell.definition_language("t"), Language::Sql);
        // No record for "u": the cell-level language applies.
        assert_eq!(cell.definition_language("u"), Language::Sql);
    }

    #[test]
    fn private_names_are_scoped_to_the_owning_cell() {
        let cell = Cell::new("abc", "_x = 1");
        assert!(cell.is_private_name("_cell_abc_x"));
        assert!(!cell.is_private_name("_cell_def_x"));
        assert!(!cell.is_private_name("_x"));
    }

    #[test]
    fn import_block_classification() {
        let cell = Cell::new("imports", "import numpy as np")
            .with_defs(["np"])
            .as_import_block(["np"]);

        assert!(cell.import_workspace().is_import_block);
        assert!(cell.import_workspace().imported_defs.contains("np"));
    }
}
