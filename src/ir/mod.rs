//! Mid-level intermediate representation.
//!
//! A method is a [`Graph`] of [`BasicBlock`]s holding [`Instruction`]s in SSA
//! form. Entities are stored in per-graph arenas and addressed by [`BlockId`]
//! and [`InstId`]; every mutation goes through [`Graph`] so that use/def
//! edges, predecessor/successor lists and phi inputs stay consistent.
//!
//! # Key Components
//!
//! - [`Graph`] - arenas, queries and the mutation API
//! - [`GraphBuilder`] - closure-style construction used by front ends and tests
//! - [`Opcode`] - closed set of operations with their immediates
//! - [`LocalArena`] / [`Marker`] - pass-local scratch marks reset between passes
//! - [`Graph::dump`] / [`Graph::to_dot`] - textual and Graphviz renderings

mod arena;
mod block;
mod builder;
mod dump;
mod graph;
mod ids;
mod inst;
mod opcode;
mod types;

pub use arena::{LocalArena, Marker, MAX_MARKERS};
pub use block::{BasicBlock, BlockFlags};
pub use builder::{BlockBuilder, FunctionBuilder, GraphBuilder};
pub use dump::escape_dot;
pub use graph::Graph;
pub use ids::{BlockId, InstId};
pub use inst::{Instruction, User};
pub use opcode::{FieldId, Opcode};
pub use types::{ConditionCode, DataType};
