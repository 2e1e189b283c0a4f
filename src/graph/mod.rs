//! Repository knowledge graph: typed nodes and relationships with
//! schema-level invariants, deterministic serialization, and inter-run
//! diffing.

pub mod builder;
pub mod diff;
pub mod serialize;
pub mod types;
pub mod validate;

pub use builder::GraphBuilder;
pub use diff::{diff_graphs, GraphDiff};
pub use types::{AttrValue, KnowledgeGraph, Node, NodeKind, Relationship, RelationshipKind};
pub use validate::validate;

use serde::{Deserialize, Serialize};

/// Projection applied to the graph before serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GraphScope {
    /// Every node kind.
    Full,
    /// Code entities only: run, file, module, function, class, test.
    Code,
    /// Modules and the packages they depend on.
    Dependencies,
    /// Tests and the modules they exercise.
    Tests,
}

impl GraphScope {
    /// Node kinds retained by this scope. The run root, files, and modules
    /// survive every scope so containment stays rooted.
    pub fn keeps(&self, kind: NodeKind) -> bool {
        use NodeKind::*;
        match self {
            GraphScope::Full => true,
            GraphScope::Code => {
                matches!(kind, Run | File | Module | Function | Class | Test)
            }
            GraphScope::Dependencies => matches!(kind, Run | File | Module | Dependency),
            GraphScope::Tests => matches!(kind, Run | File | Module | Test),
        }
    }
}
