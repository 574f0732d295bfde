//! Error Types
//!
//! Caller-misuse errors for the graph and the runner. Graph-state warnings
//! (multiply defined names, dangling deleted refs, recorded cycles) are
//! queryable facts, not errors, and execution failures inside a cell's body
//! are reported through that cell's run state rather than through these
//! types.

use thiserror::Error;

use crate::graph::{CellId, Name};

/// Misuse of the graph API. Each variant is returned before any structural
/// mutation happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("cell {0} is already registered")]
    AlreadyRegistered(CellId),

    #[error("cell {0} not found")]
    CellNotFound(CellId),
}

/// Misuse or failure of a runner compute call.
#[derive(Debug, Error)]
pub enum ComputeError<E: std::error::Error> {
    #[error("cell {0} not found")]
    CellNotFound(CellId),

    /// An override key that is not among the target's refs.
    #[error("cell {cell} got unexpected override `{name}`; overrides must name refs of the cell")]
    UnexpectedOverride { cell: CellId, name: Name },

    /// The target itself requires suspension; use the suspending entry
    /// point.
    #[error("cell {0} requires suspension and cannot run through the blocking entry point")]
    SuspendingCell(CellId),

    /// An unsubstituted ancestor requires suspension; use the suspending
    /// entry point.
    #[error(
        "cell {cell} has suspending ancestor {ancestor} and cannot run through the blocking entry point"
    )]
    SuspendingAncestor { cell: CellId, ancestor: CellId },

    /// The executor reported a failure while running a cell body.
    #[error(transparent)]
    Execution(#[from] E),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_errors_name_the_offending_cell() {
        let err = GraphError::CellNotFound(CellId::new("abc"));
        assert_eq!(err.to_string(), "cell abc not found");

        let err = GraphError::AlreadyRegistered(CellId::new("abc"));
        assert_eq!(err.to_string(), "cell abc is already registered");
    }
}
