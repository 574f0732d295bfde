//! Edge Payloads
//!
//! Dataflow edges and their serializable diagnostic form. An edge
//! `source -> target` means the target references a name the source defines.

use serde::{Deserialize, Serialize};

use super::cell::{CellId, Name};

/// A directed dependency edge: `target` depends on `source`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: CellId,
    pub target: CellId,
}

impl Edge {
    pub fn new(source: impl Into<CellId>, target: impl Into<CellId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// An edge annotated with the names that justify it.
///
/// `vars` is a `Vec` rather than a set so the payload serializes as a plain
/// ordered sequence for external consumers; it is kept sorted so output is
/// order-stable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeWithVars {
    pub source: CellId,
    pub vars: Vec<Name>,
    pub target: CellId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_serialize_to_plain_payloads() {
        let edge = Edge::new("a", "b");
        let json = serde_json::to_string(&edge).unwrap();
        assert_eq!(json, r#"{"source":"a","target":"b"}"#);

        let annotated = EdgeWithVars {
            source: CellId::new("a"),
            vars: vec!["x".into(), "y".into()],
            target: CellId::new("b"),
        };
        let json = serde_json::to_string(&annotated).unwrap();
        assert_eq!(json, r#"{"source":"a","vars":["x","y"],"target":"b"}"#);

        let back: EdgeWithVars = serde_json::from_str(&json).unwrap();
        assert_eq!(back, annotated);
    }
}
