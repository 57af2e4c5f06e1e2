//! Built-in optimization passes.
//!
//! Each pass implements the [`Pass`](crate::compiler::Pass) trait, declares
//! the analyses it reads and invalidates, and records its rewrites into the
//! [`EventLog`](crate::compiler::EventLog) of its context.
//!
//! # Standard Pipeline
//!
//! [`standard_pipeline`] returns the passes in the order the
//! [`PassManager`](crate::compiler::PassManager) runs them:
//!
//! | Pass | Description |
//! |------|-------------|
//! | [`CodeSinkPass`] | Moves instructions into the narrowest block dominating their uses |
//! | [`MemoryCoalescingPass`] | Fuses adjacent array accesses into paired loads and stores |
//! | [`SchedulerPass`] | Reorders instructions inside blocks to shorten the critical path |
//!
//! Sinking runs first because it can move loads next to each other, and
//! scheduling runs last so it sees the pairs the coalescer created and keeps
//! them glued to their part extractions.
//!
//! # Analysis Integration
//!
//! - **Dominators and loops** ([`DominatorTree`](crate::analysis::DominatorTree),
//!   [`LoopInfo`](crate::analysis::LoopInfo)): used by code sinking to pick
//!   targets and to stay out of loops
//! - **Alias queries** ([`may_alias`](crate::analysis::may_alias)): used by
//!   every pass to keep memory operations in order

mod coalescing;
mod scheduler;
mod sink;

pub use coalescing::{is_pairable_type, MemoryCoalescingPass};
pub use scheduler::SchedulerPass;
pub use sink::CodeSinkPass;

use crate::compiler::pass::Pass;

/// The passes of the standard pipeline, in execution order.
#[must_use]
pub fn standard_pipeline() -> Vec<Box<dyn Pass>> {
    vec![
        Box::new(CodeSinkPass::new()),
        Box::new(MemoryCoalescingPass::new()),
        Box::new(SchedulerPass::new()),
    ]
}
