//! Structural and memory analyses over the block graph.
//!
//! Analyses are read-only: they borrow a [`Graph`](crate::ir::Graph) and
//! produce an owned result that stays valid until the control flow changes.
//! The pass manager caches the expensive ones and drops them whenever a pass
//! declares that it changed the structure they describe.
//!
//! # Architecture
//!
//! - [`traversal`] - postorder, reverse postorder and reachability sets
//! - [`dominators`] - dominator tree (Lengauer-Tarjan) and dominance queries
//! - [`scc`] - strongly connected components of the block graph
//! - [`loops`] - natural and irreducible loop forest
//! - [`alias`] - conservative memory disambiguation
//!
//! # Usage
//!
//! ```rust,ignore
//! use midend::analysis::{DominatorTree, LoopInfo};
//!
//! let dom = DominatorTree::compute(&graph);
//! let loops = LoopInfo::compute(&graph, &dom);
//! for lp in loops.loops() {
//!     println!("{} blocks in loop headed by {}", lp.size(), lp.header);
//! }
//! ```

pub mod alias;
pub mod dominators;
pub mod loops;
pub mod scc;
pub mod traversal;

pub use alias::{
    alias_locations, index_expr, location, may_alias, AliasResult, IndexExpr, MemoryLocation,
};
pub use dominators::{DominatorIterator, DominatorTree};
pub use loops::{Loop, LoopExit, LoopInfo};
pub use scc::{is_cyclic, strongly_connected_components};
pub use traversal::{postorder, reachable_from, reaching, reverse_postorder};
